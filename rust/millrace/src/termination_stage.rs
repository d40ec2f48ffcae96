//! The sink at the end of a pipeline.

use std::{
    marker::PhantomData,
    panic::{self, AssertUnwindSafe},
};

use millrace_common::Result;
use millrace_workflow::deferred::{Deferred, TaskFailure};

use crate::{
    bridge::Bridge,
    options::StageOptions,
    stage::{Stage, Upstream},
};

/// Hands every result of a predecessor stage to a terminal function.
///
/// The stage has no worker pool and no output queue: its bridging thread calls
/// the terminal function itself, one deferred at a time and in the order the
/// predecessor published them. The terminal function decides how to retrieve
/// each result; it is the place where failures that nobody else observed get
/// noticed. A panic inside the terminal function is logged and does not stop
/// the bridge.
pub struct TerminationStage<T> {
    name: String,
    bridge: Bridge,
    _marker: PhantomData<fn(Deferred<T>)>,
}

impl<T: Send + 'static> TerminationStage<T> {
    pub fn new<F>(predecessor: &impl Upstream<T>, f: F) -> Result<TerminationStage<T>>
    where
        F: FnMut(Deferred<T>) + Send + 'static,
    {
        TerminationStage::with_options(StageOptions::default(), predecessor, f)
    }

    pub fn with_options<F>(
        options: StageOptions,
        predecessor: &impl Upstream<T>,
        mut f: F,
    ) -> Result<TerminationStage<T>>
    where
        F: FnMut(Deferred<T>) + Send + 'static,
    {
        let name = options.name_or("termination-stage");
        let bridge = Bridge::spawn(
            &name,
            predecessor.output().clone(),
            options.poll_interval,
            {
                let name = name.clone();
                move |item| {
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| f(item))) {
                        let failure = TaskFailure::Panicked(payload);
                        log::error!("terminal function of '{name}' failed: {failure}");
                    }
                }
            },
            {
                let name = name.clone();
                move || log::debug!("stage '{name}' stopped")
            },
        )?;
        Ok(TerminationStage {
            name,
            bridge,
            _marker: PhantomData,
        })
    }
}

impl<T> Stage for TerminationStage<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn cancel(&self) {
        self.bridge.cancel();
    }

    fn is_canceled(&self) -> bool {
        self.bridge.is_canceled()
    }

    /// Blocks until the bridge has delivered everything it is going to deliver.
    fn wait(&self) {
        self.bridge.join();
    }
}

impl<T> Drop for TerminationStage<T> {
    fn drop(&mut self) {
        self.cancel();
        self.wait();
    }
}
