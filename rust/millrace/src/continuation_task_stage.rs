//! A buffered stage that pairs each submitted closure with the next result of a
//! predecessor stage.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use millrace_common::{Result, error::Error};
use millrace_workflow::{blocking_queue::BlockingQueue, deferred::Deferred};

use crate::{
    buffered_stage::{BufferedTaskStage, Submission},
    options::StageOptions,
    stage::{Stage, Upstream},
};

/// Like a [`ContinuationStage`](crate::continuation_stage::ContinuationStage),
/// but without a fixed transform and without a bridging thread.
///
/// Every [`push`](ContinuationTaskStage::push) takes the next deferred from the
/// predecessor's output queue, blocking until one is available, and submits the
/// given closure to run on its value. Upstream results and closures are paired
/// strictly in FIFO order. A blocked `push` notices [`cancel`](Stage::cancel)
/// within one poll interval and leaves the predecessor's queue untouched.
///
/// Cancellation does not cascade automatically: once the predecessor is
/// canceled and drained, `push` fails with
/// [`ErrorKind::Exhausted`](millrace_common::error::ErrorKind::Exhausted) and
/// the caller is expected to cancel this stage.
pub struct ContinuationTaskStage<U, T> {
    stage: BufferedTaskStage<T>,
    predecessor: Arc<BlockingQueue<Deferred<U>>>,
    poll_interval: Duration,
    /// Held from taking an upstream result until its closure is submitted, so
    /// concurrent pushes cannot reorder the pairs.
    pairing: Mutex<()>,
}

impl<U, T> ContinuationTaskStage<U, T>
where
    U: Send + 'static,
    T: Send + 'static,
{
    pub fn new(
        workers: usize,
        predecessor: &impl Upstream<U>,
    ) -> Result<ContinuationTaskStage<U, T>> {
        ContinuationTaskStage::with_options(workers, StageOptions::default(), predecessor)
    }

    pub fn with_options(
        workers: usize,
        options: StageOptions,
        predecessor: &impl Upstream<U>,
    ) -> Result<ContinuationTaskStage<U, T>> {
        let options = StageOptions {
            name: Some(options.name_or("continuation-task-stage")),
            ..options
        };
        let poll_interval = options.poll_interval;
        Ok(ContinuationTaskStage {
            stage: BufferedTaskStage::with_options(workers, options)?,
            predecessor: predecessor.output().clone(),
            poll_interval,
            pairing: Mutex::new(()),
        })
    }

    /// Submits `f` to run on the value of the next upstream result.
    ///
    /// Blocks until the predecessor has published a result, or fails with
    /// [`ErrorKind::Closed`](millrace_common::error::ErrorKind::Closed) once this
    /// stage is canceled. A failure of that result propagates into this stage's
    /// result without calling `f`.
    pub fn push<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(U) -> T + Send + 'static,
    {
        let _pairing = self.pairing.lock().unwrap_or_else(PoisonError::into_inner);
        let mut make = move |upstream: Deferred<U>| move || f(upstream.join());
        loop {
            match self.stage.core().submit_next(&self.predecessor, make)? {
                Submission::Submitted => return Ok(()),
                Submission::Empty(m) => make = m,
            }
            // Nothing is pushed after cancel, so canceled-then-empty is final.
            if self.predecessor.is_canceled() && self.predecessor.is_empty() {
                return Err(Error::exhausted(self.stage.name()));
            }
            self.predecessor.wait_for_item(self.poll_interval);
        }
    }

    pub fn num_workers(&self) -> usize {
        self.stage.num_workers()
    }
}

impl<U, T> Stage for ContinuationTaskStage<U, T>
where
    U: Send + 'static,
    T: Send + 'static,
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

impl<U, T> Upstream<T> for ContinuationTaskStage<U, T> {
    fn output(&self) -> &Arc<BlockingQueue<Deferred<T>>> {
        self.stage.output()
    }
}
