//! A task stage that collects its results in submission order.

use std::sync::{Arc, Mutex, PoisonError};

use millrace_common::{Result, error::Error};
use millrace_workflow::{
    blocking_queue::BlockingQueue,
    deferred::{self, Deferred, Job},
    worker_pool::WorkerPool,
};

use crate::{
    options::StageOptions,
    stage::{Stage, Upstream},
};

/// The queues of a buffered stage, shared with the closures that feed it.
pub(crate) struct BufferedCore<T> {
    name: String,
    /// Serializes submissions against each other and against `cancel`, so the
    /// output queue order always matches the input queue order.
    gate: Mutex<()>,
    input: Arc<BlockingQueue<Job>>,
    output: Arc<BlockingQueue<Deferred<T>>>,
}

impl<T: Send + 'static> BufferedCore<T> {
    fn new(name: String) -> BufferedCore<T> {
        BufferedCore {
            name,
            gate: Mutex::new(()),
            input: Arc::new(BlockingQueue::new()),
            output: Arc::new(BlockingQueue::new()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues the deferred result of `f` on the output queue, then `f` itself
    /// on the input queue.
    pub(crate) fn submit<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let (job, deferred) = deferred::package(f);
        self.output
            .push(deferred)
            .map_err(|_| Error::closed(&self.name))?;
        // Both queues are canceled together under the gate, so this cannot
        // fail once the output push went through.
        self.input.push(job).map_err(|_| Error::closed(&self.name))
    }

    /// Takes the front item of `source` and submits `make(item)`, both under the
    /// gate, so no item leaves `source` unless its closure is enqueued.
    ///
    /// Hands `make` back in [`Submission::Empty`] when `source` has nothing queued.
    pub(crate) fn submit_next<S, M, F>(
        &self,
        source: &BlockingQueue<S>,
        make: M,
    ) -> Result<Submission<M>>
    where
        M: FnOnce(S) -> F,
        F: FnOnce() -> T + Send + 'static,
    {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_canceled() {
            return Err(Error::closed(&self.name));
        }
        let Some(item) = source.pop() else {
            return Ok(Submission::Empty(make));
        };
        let (job, deferred) = deferred::package(make(item));
        self.output
            .push(deferred)
            .map_err(|_| Error::closed(&self.name))?;
        self.input.push(job).map_err(|_| Error::closed(&self.name))?;
        Ok(Submission::Submitted)
    }

    pub(crate) fn cancel(&self) {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.output.cancel();
        self.input.cancel();
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.input.is_canceled()
    }
}

pub(crate) enum Submission<M> {
    Submitted,
    Empty(M),
}

/// A worker pool fed through an input queue, publishing one [`Deferred`] per
/// submitted closure on an output queue.
///
/// The deferred is placed on the output queue synchronously inside
/// [`push`](BufferedTaskStage::push), before the closure has necessarily run.
/// Consumers therefore receive results strictly in submission order, no matter
/// how many workers there are or in which order they finish.
pub struct BufferedTaskStage<T> {
    core: Arc<BufferedCore<T>>,
    pool: WorkerPool,
}

impl<T: Send + 'static> BufferedTaskStage<T> {
    pub fn new(workers: usize) -> Result<BufferedTaskStage<T>> {
        BufferedTaskStage::with_options(workers, StageOptions::default())
    }

    pub fn with_options(workers: usize, options: StageOptions) -> Result<BufferedTaskStage<T>> {
        let core = Arc::new(BufferedCore::new(options.name_or("buffered-stage")));
        let pool = WorkerPool::spawn(
            core.input.clone(),
            workers,
            options.poll_interval,
            |i| format!("{}-worker-{i}", core.name),
        )?;
        log::debug!("stage '{}' started with {workers} worker(s)", core.name);
        Ok(BufferedTaskStage { core, pool })
    }

    /// Submits `f` for execution. Its deferred result becomes available on the
    /// output queue immediately.
    pub fn push<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        self.core.submit(f)
    }

    pub fn num_workers(&self) -> usize {
        self.pool.num_threads()
    }

    pub(crate) fn core(&self) -> &Arc<BufferedCore<T>> {
        &self.core
    }
}

impl<T: Send + 'static> Stage for BufferedTaskStage<T> {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn cancel(&self) {
        log::debug!("canceling stage '{}'", self.core.name);
        self.core.cancel();
    }

    fn is_canceled(&self) -> bool {
        self.core.is_canceled()
    }

    fn wait(&self) {
        self.pool.join();
    }
}

impl<T> Upstream<T> for BufferedTaskStage<T> {
    fn output(&self) -> &Arc<BlockingQueue<Deferred<T>>> {
        &self.core.output
    }
}

impl<T> Drop for BufferedTaskStage<T> {
    fn drop(&mut self) {
        self.core.output.cancel();
        self.core.input.cancel();
        self.pool.join();
    }
}
