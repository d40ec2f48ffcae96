//! A data stage fed by the output of a predecessor stage.

use std::sync::Arc;

use millrace_common::Result;
use millrace_workflow::{blocking_queue::BlockingQueue, deferred::Deferred};

use crate::{
    bridge::Bridge,
    data_stage::DataStage,
    options::StageOptions,
    stage::{Stage, Upstream},
};

/// A [`DataStage`] whose inputs are the deferred results of a predecessor.
///
/// A bridging thread takes every deferred the predecessor publishes and submits
/// it to this stage, where the transform `g` receives it still unresolved. A
/// transform that calls [`Deferred::join`] on its input inherits any upstream
/// failure into its own result.
///
/// Canceling the predecessor lets the bridge forward what the predecessor still
/// holds; the bridge then cancels this stage's queues, so cancellation travels
/// down the pipeline one stage at a time and nothing is lost. Canceling this
/// stage directly stops the bridge without draining the predecessor.
pub struct ContinuationStage<U, O> {
    bridge: Bridge,
    stage: DataStage<Deferred<U>, O>,
}

impl<U, O> ContinuationStage<U, O>
where
    U: Send + 'static,
    O: Send + 'static,
{
    pub fn new<G>(
        workers: usize,
        predecessor: &impl Upstream<U>,
        g: G,
    ) -> Result<ContinuationStage<U, O>>
    where
        G: Fn(Deferred<U>) -> O + Send + Sync + 'static,
    {
        ContinuationStage::with_options(workers, StageOptions::default(), predecessor, g)
    }

    pub fn with_options<G>(
        workers: usize,
        options: StageOptions,
        predecessor: &impl Upstream<U>,
        g: G,
    ) -> Result<ContinuationStage<U, O>>
    where
        G: Fn(Deferred<U>) -> O + Send + Sync + 'static,
    {
        let name = options.name_or("continuation-stage");
        let poll_interval = options.poll_interval;
        let stage = DataStage::with_options(
            workers,
            StageOptions {
                name: Some(name.clone()),
                poll_interval,
            },
            g,
        )?;

        let feed = stage.feeder();
        let bridge = Bridge::spawn(
            &name,
            predecessor.output().clone(),
            poll_interval,
            {
                let name = name.clone();
                move |item| {
                    if let Err(e) = feed(item) {
                        log::warn!("stage '{name}' rejected an upstream result: {e}");
                    }
                }
            },
            stage.canceler(),
        )?;
        Ok(ContinuationStage { bridge, stage })
    }

    /// Submits an upstream result directly, bypassing the bridge.
    pub fn push(&self, upstream: Deferred<U>) -> Result<()> {
        self.stage.push(upstream)
    }

    pub fn num_workers(&self) -> usize {
        self.stage.num_workers()
    }
}

impl<U, O> Stage for ContinuationStage<U, O>
where
    U: Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        self.stage.name()
    }

    /// Stops the bridge. The stage's own queues are canceled as soon as the
    /// bridge has exited.
    fn cancel(&self) {
        self.bridge.cancel();
    }

    fn is_canceled(&self) -> bool {
        self.bridge.is_canceled() || self.stage.is_canceled()
    }

    /// Joins the bridge first, then the worker pool.
    fn wait(&self) {
        self.bridge.join();
        self.stage.wait();
    }
}

impl<U, O> Upstream<O> for ContinuationStage<U, O> {
    fn output(&self) -> &Arc<BlockingQueue<Deferred<O>>> {
        self.stage.output()
    }
}

impl<U, O> Drop for ContinuationStage<U, O> {
    fn drop(&mut self) {
        self.bridge.cancel();
        self.bridge.join();
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use millrace_workflow::deferred::Deferred;

    use super::ContinuationStage;
    use crate::{
        data_stage::DataStage,
        options::StageOptions,
        stage::{Stage, Upstream},
    };

    fn options(name: &str) -> StageOptions {
        StageOptions::new()
            .with_name(name)
            .with_poll_interval(Duration::from_millis(20))
    }

    #[test]
    fn test_double_then_add_one() {
        let a = DataStage::with_options(2, options("double"), |x: i32| x * 2).unwrap();
        let b = ContinuationStage::with_options(2, options("add"), &a, |d: Deferred<i32>| {
            d.join() + 1
        })
        .unwrap();
        for x in [1, 2, 3] {
            a.push(x).unwrap();
        }
        a.cancel();
        b.wait();
        assert!(b.is_canceled());
        let results = std::iter::from_fn(|| b.pop())
            .map(Deferred::join)
            .collect::<Vec<_>>();
        assert_eq!(results, vec![3, 5, 7]);
    }

    #[test]
    fn test_upstream_failure_propagates() {
        let a = DataStage::with_options(1, options("source"), |x: i32| {
            assert!(x != 5, "rejected {x}");
            x
        })
        .unwrap();
        let b = ContinuationStage::with_options(1, options("next"), &a, |d: Deferred<i32>| {
            d.join() * 10
        })
        .unwrap();
        for x in [1, 5, 2] {
            a.push(x).unwrap();
        }
        assert_eq!(b.pop_or_wait().unwrap().join(), 10);
        let failure = b.pop_or_wait().unwrap().wait().unwrap_err();
        assert_eq!(failure.message(), Some("rejected 5"));
        assert_eq!(b.pop_or_wait().unwrap().join(), 20);
    }

    #[test]
    fn test_self_cancel_stops_bridge_and_closes_stage() {
        let a = DataStage::with_options(1, options("source"), |x: i32| x).unwrap();
        let b = ContinuationStage::with_options(1, options("next"), &a, Deferred::join).unwrap();
        let start = Instant::now();
        b.cancel();
        b.wait();
        assert!(start.elapsed() < Duration::from_millis(500));
        assert!(b.push(Deferred::ready(1)).unwrap_err().is_closed());
        assert!(!a.is_canceled());
        a.push(1).unwrap();
        assert_eq!(a.pop_or_wait().unwrap().join(), 1);
    }

    #[test]
    fn test_self_cancel_leaves_predecessor_items() {
        let a = DataStage::with_options(1, options("source"), |x: i32| x * 2).unwrap();
        let b = ContinuationStage::with_options(1, options("next"), &a, Deferred::join).unwrap();
        b.cancel();
        b.wait();
        for x in [1, 2, 3] {
            a.push(x).unwrap();
        }
        assert_eq!(a.output().len(), 3);
        assert!(b.pop().is_none());
        let left = std::iter::from_fn(|| a.pop())
            .map(Deferred::join)
            .collect::<Vec<_>>();
        assert_eq!(left, vec![2, 4, 6]);
        assert!(!a.is_canceled());
    }

    #[test]
    fn test_direct_push() {
        let a = DataStage::with_options(1, options("source"), |x: i32| x).unwrap();
        let b = ContinuationStage::with_options(1, options("next"), &a, |d: Deferred<i32>| {
            d.join() - 1
        })
        .unwrap();
        b.push(Deferred::ready(10)).unwrap();
        assert_eq!(b.pop_or_wait().unwrap().join(), 9);
    }

    #[test]
    fn test_upstream_dropped_first() {
        let a = DataStage::with_options(1, options("source"), |x: i32| x + 100).unwrap();
        let b = ContinuationStage::with_options(1, options("next"), &a, Deferred::join).unwrap();
        a.push(1).unwrap();
        a.push(2).unwrap();
        drop(a);
        b.wait();
        let results = std::iter::from_fn(|| b.pop())
            .map(Deferred::join)
            .collect::<Vec<_>>();
        assert_eq!(results, vec![101, 102]);
    }
}
