//! Traits shared by all pipeline stages.

use std::{sync::Arc, time::Duration};

use millrace_workflow::{blocking_queue::BlockingQueue, deferred::Deferred};

/// Lifecycle of a pipeline stage.
///
/// Every stage owns threads: a worker pool, a bridging thread, or both. Dropping
/// a stage performs [`cancel`](Stage::cancel) followed by [`wait`](Stage::wait).
pub trait Stage {
    /// The name used in errors, log records and thread names.
    fn name(&self) -> &str;

    /// Stops accepting new work. Idempotent and irreversible.
    fn cancel(&self);

    fn is_canceled(&self) -> bool;

    /// Blocks until all threads owned by the stage have exited.
    ///
    /// A stage without a canceled input never finishes, so this blocks forever
    /// unless the stage itself or one of its predecessors was canceled first.
    fn wait(&self);
}

/// A stage that publishes one [`Deferred`] per submitted item, in submission
/// order, on an output queue.
///
/// Successor stages hold a clone of the queue handle, so the queue outlives
/// the stage that produced it for as long as someone still reads from it.
pub trait Upstream<T> {
    /// The output queue of this stage.
    fn output(&self) -> &Arc<BlockingQueue<Deferred<T>>>;

    /// Takes the next result without blocking.
    fn pop(&self) -> Option<Deferred<T>> {
        self.output().pop()
    }

    /// Takes the next result, blocking until one is available.
    ///
    /// Returns `None` only after the stage is canceled and its output drained.
    fn pop_or_wait(&self) -> Option<Deferred<T>> {
        self.output().pop_or_wait()
    }

    /// Takes the next result, blocking for at most `timeout`.
    fn pop_or_wait_timeout(&self, timeout: Duration) -> Option<Deferred<T>> {
        self.output().pop_or_wait_timeout(timeout)
    }
}
