//! A worker pool that runs arbitrary closures and hands back their results.

use std::sync::Arc;

use millrace_common::{Result, error::Error};
use millrace_workflow::{
    blocking_queue::BlockingQueue,
    deferred::{self, Deferred},
    worker_pool::WorkerPool,
};

use crate::{options::StageOptions, stage::Stage};

/// The simplest stage: a pool of workers draining a single job queue.
///
/// The result of every submitted closure is returned directly to the caller as a
/// [`Deferred`]; nothing is retained by the stage. Use
/// [`BufferedTaskStage`](crate::buffered_stage::BufferedTaskStage) when results
/// must be collected from the stage in submission order instead.
pub struct TaskStage {
    name: String,
    pool: WorkerPool,
}

impl TaskStage {
    /// Creates a stage with `workers` threads and default options.
    pub fn new(workers: usize) -> Result<TaskStage> {
        TaskStage::with_options(workers, StageOptions::default())
    }

    pub fn with_options(workers: usize, options: StageOptions) -> Result<TaskStage> {
        let name = options.name_or("task-stage");
        let pool = WorkerPool::spawn(
            Arc::new(BlockingQueue::new()),
            workers,
            options.poll_interval,
            |i| format!("{name}-worker-{i}"),
        )?;
        log::debug!("stage '{name}' started with {workers} worker(s)");
        Ok(TaskStage { name, pool })
    }

    /// Submits `f` for execution and returns its deferred result.
    ///
    /// A panic inside `f` is captured into the returned deferred. Fails with
    /// [`ErrorKind::Closed`](millrace_common::error::ErrorKind::Closed) once the
    /// stage is canceled.
    pub fn push<F, T>(&self, f: F) -> Result<Deferred<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (job, deferred) = deferred::package(f);
        self.pool
            .queue()
            .push(job)
            .map_err(|_| Error::closed(&self.name))?;
        Ok(deferred)
    }

    /// Submits `f` to run on the value of `upstream` once it is available.
    ///
    /// A failure of the upstream computation propagates into the returned
    /// deferred without calling `f`. The waiting happens on a worker thread, so
    /// chaining a stage onto its own results can starve a small pool.
    pub fn push_after<U, F, T>(&self, upstream: Deferred<U>, f: F) -> Result<Deferred<T>>
    where
        U: Send + 'static,
        F: FnOnce(U) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.push(move || f(upstream.join()))
    }

    pub fn num_workers(&self) -> usize {
        self.pool.num_threads()
    }
}

impl Stage for TaskStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn cancel(&self) {
        log::debug!("canceling stage '{}'", self.name);
        self.pool.queue().cancel();
    }

    fn is_canceled(&self) -> bool {
        self.pool.queue().is_canceled()
    }

    fn wait(&self) {
        self.pool.join();
    }
}

impl Drop for TaskStage {
    fn drop(&mut self) {
        self.cancel();
        self.wait();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
        time::{Duration, Instant},
    };

    use millrace_workflow::deferred::Deferred;

    use super::TaskStage;
    use crate::{options::StageOptions, stage::Stage};

    fn stage(workers: usize) -> TaskStage {
        let options = StageOptions::new().with_poll_interval(Duration::from_millis(20));
        TaskStage::with_options(workers, options).unwrap()
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(TaskStage::new(0).is_err());
    }

    #[test]
    fn test_push_returns_result() {
        let stage = stage(2);
        assert_eq!(stage.num_workers(), 2);
        let deferred = (0..20)
            .map(|i| stage.push(move || i * i).unwrap())
            .collect::<Vec<_>>();
        let results = Deferred::wait_all(deferred)
            .into_iter()
            .map(Result::unwrap)
            .collect::<Vec<_>>();
        assert_eq!(results, (0..20).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn test_failure_is_local() {
        let stage = stage(1);
        let a = stage.push(|| 3).unwrap();
        let b = stage.push(|| -> i32 { panic!("task failed") }).unwrap();
        let c = stage.push(|| 7).unwrap();
        assert_eq!(a.join(), 3);
        assert_eq!(b.wait().unwrap_err().message(), Some("task failed"));
        assert_eq!(c.join(), 7);
    }

    #[test]
    fn test_push_after_cancel_fails() {
        let stage = stage(1);
        stage.cancel();
        stage.cancel();
        assert!(stage.is_canceled());
        let err = stage.push(|| 1).unwrap_err();
        assert!(err.is_closed());
    }

    #[test]
    fn test_cancel_runs_pending_work() {
        let counter = Arc::new(AtomicUsize::new(0));
        let stage = stage(2);
        for _ in 0..50 {
            let counter = counter.clone();
            stage
                .push(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        stage.cancel();
        stage.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn test_push_after_chains_stages() {
        let a = stage(2);
        let b = stage(2);
        let results = (0..10)
            .map(|i| {
                let first = a.push(move || i + 1).unwrap();
                b.push_after(first, |x| x * 10).unwrap()
            })
            .collect::<Vec<_>>();
        let values = results.into_iter().map(Deferred::join).collect::<Vec<_>>();
        assert_eq!(values, (1..=10).map(|x| x * 10).collect::<Vec<_>>());
    }

    #[test]
    fn test_push_after_propagates_failure() {
        let a = stage(1);
        let b = stage(1);
        let first = a.push(|| -> i32 { panic!("upstream") }).unwrap();
        let second = b.push_after(first, |x| x + 1).unwrap();
        assert_eq!(second.wait().unwrap_err().message(), Some("upstream"));
    }

    #[test]
    fn test_unit_results() {
        let stage = stage(1);
        let deferred = stage.push(|| thread::sleep(Duration::from_millis(10))).unwrap();
        deferred.join();
    }

    #[test]
    fn test_drop_is_prompt_when_idle() {
        let stage = stage(4);
        let start = Instant::now();
        drop(stage);
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
