//! Fixed-size worker pools draining a [`BlockingQueue`].
//!
//! Every worker thread runs [`run_worker`]: it pulls items from the shared queue
//! and executes them until the queue is canceled, then drains whatever is left.
//! Work pushed before cancellation is therefore processed exactly once, by exactly
//! one worker.

use std::{
    sync::{Arc, Mutex, PoisonError},
    thread,
    time::Duration,
};

use millrace_common::{Result, error::Error, verify_arg};

use crate::{blocking_queue::BlockingQueue, deferred::Job};

/// The interval at which idle workers re-check the cancellation flag.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Runs the generic worker loop on the calling thread.
///
/// While the queue is not canceled, waits up to `poll_interval` for an item and
/// hands it to `action`. The wait is bounded: `cancel` may be signaled after the
/// flag check but before the wait begins, and an unbounded wait would then never
/// wake up. Once the queue is canceled, switches to draining: pops without waiting
/// and hands each item to `action` until the queue is empty, then returns.
pub fn run_worker<T>(
    queue: &BlockingQueue<T>,
    poll_interval: Duration,
    mut action: impl FnMut(T),
) {
    while !queue.is_canceled() {
        if let Some(item) = queue.pop_or_wait_timeout(poll_interval) {
            action(item);
        }
    }
    // No new items can arrive anymore; take only what is already there.
    while let Some(item) = queue.pop() {
        action(item);
    }
}

/// A fixed set of threads executing the [`Job`]s of one queue.
///
/// The thread count is set at construction and never changes. Dropping the pool
/// cancels its queue and joins all threads.
pub struct WorkerPool {
    queue: Arc<BlockingQueue<Job>>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    num_threads: usize,
}

impl WorkerPool {
    /// Spawns `num_threads` workers draining `queue`.
    ///
    /// # Arguments
    ///
    /// * `queue` - The queue to drain. Cancel it to make the workers finish.
    /// * `num_threads` - The number of worker threads. Must be greater than 0.
    /// * `poll_interval` - How long an idle worker waits before re-checking
    ///   cancellation. Must be greater than 0.
    /// * `thread_name` - Produces the name of the thread with the given index. An
    ///   empty string leaves the thread unnamed.
    pub fn spawn(
        queue: Arc<BlockingQueue<Job>>,
        num_threads: usize,
        poll_interval: Duration,
        thread_name: impl Fn(usize) -> String,
    ) -> Result<WorkerPool> {
        verify_arg!(num_threads, num_threads > 0);
        verify_arg!(poll_interval, !poll_interval.is_zero());

        let mut threads = Vec::with_capacity(num_threads);
        for i in 0..num_threads {
            let name = thread_name(i);
            let mut builder = thread::Builder::new();
            if !name.is_empty() {
                builder = builder.name(name.clone());
            }
            let spawned = builder.spawn({
                let queue = queue.clone();
                move || run_worker(&queue, poll_interval, |job: Job| job())
            });
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    queue.cancel();
                    join_all(threads);
                    return Err(Error::spawn(name, e));
                }
            }
        }

        log::debug!("started {num_threads} worker thread(s)");
        Ok(WorkerPool {
            queue,
            threads: Mutex::new(threads),
            num_threads,
        })
    }

    /// The queue drained by this pool.
    pub fn queue(&self) -> &Arc<BlockingQueue<Job>> {
        &self.queue
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Blocks until every worker thread has exited.
    ///
    /// Workers exit only after their queue is canceled and drained, so this blocks
    /// forever on a queue nobody cancels. Concurrent callers are serialized; calls
    /// after the threads have been joined return immediately.
    pub fn join(&self) {
        let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        join_all(threads.drain(..));
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.queue.cancel();
        self.join();
    }
}

fn join_all(threads: impl IntoIterator<Item = thread::JoinHandle<()>>) {
    for handle in threads {
        let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
        if handle.join().is_err() {
            log::error!("worker thread '{name}' panicked");
        }
    }
}
