//! A buffered stage bound to a fixed transform.

use std::sync::Arc;

use millrace_common::Result;
use millrace_workflow::{blocking_queue::BlockingQueue, deferred::Deferred};

use crate::{
    buffered_stage::BufferedTaskStage,
    options::StageOptions,
    stage::{Stage, Upstream},
};

pub(crate) type Transform<I, O> = Arc<dyn Fn(I) -> O + Send + Sync + 'static>;

/// A [`BufferedTaskStage`] whose every job applies the same transform
/// `f: I -> O` to a pushed input value.
///
/// Results come out of the output queue in push order; a panic inside the
/// transform is captured into the result of the offending input only.
pub struct DataStage<I, O> {
    stage: BufferedTaskStage<O>,
    transform: Transform<I, O>,
}

impl<I, O> DataStage<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn new<F>(workers: usize, f: F) -> Result<DataStage<I, O>>
    where
        F: Fn(I) -> O + Send + Sync + 'static,
    {
        DataStage::with_options(workers, StageOptions::default(), f)
    }

    pub fn with_options<F>(workers: usize, options: StageOptions, f: F) -> Result<DataStage<I, O>>
    where
        F: Fn(I) -> O + Send + Sync + 'static,
    {
        let options = StageOptions {
            name: Some(options.name_or("data-stage")),
            ..options
        };
        Ok(DataStage {
            stage: BufferedTaskStage::with_options(workers, options)?,
            transform: Arc::new(f),
        })
    }

    /// Submits `value` to be transformed. Its deferred result becomes available
    /// on the output queue immediately.
    pub fn push(&self, value: I) -> Result<()> {
        let transform = self.transform.clone();
        self.stage.push(move || transform(value))
    }

    pub fn num_workers(&self) -> usize {
        self.stage.num_workers()
    }

    /// Returns a submission handle that outlives borrows of the stage, for use
    /// by a bridging thread.
    pub(crate) fn feeder(&self) -> impl Fn(I) -> Result<()> + Send + 'static {
        let core = self.stage.core().clone();
        let transform = self.transform.clone();
        move |value| {
            let transform = transform.clone();
            core.submit(move || transform(value))
        }
    }

    /// Returns a handle that cancels both queues of the stage.
    pub(crate) fn canceler(&self) -> impl FnOnce() + Send + 'static {
        let core = self.stage.core().clone();
        move || core.cancel()
    }
}

impl<I, O> Stage for DataStage<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        self.stage.name()
    }

    fn cancel(&self) {
        self.stage.cancel();
    }

    fn is_canceled(&self) -> bool {
        self.stage.is_canceled()
    }

    fn wait(&self) {
        self.stage.wait();
    }
}

impl<I, O> Upstream<O> for DataStage<I, O> {
    fn output(&self) -> &Arc<BlockingQueue<Deferred<O>>> {
        self.stage.output()
    }
}
