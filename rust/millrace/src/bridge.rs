//! The bridging thread that connects a stage to the output queue of its
//! predecessor.
//!
//! A bridge moves deferred results from the predecessor's output queue into a
//! sink (the input side of a continuation stage, or the terminal function of a
//! termination stage). It runs the state machine of [`BridgeState`]:
//!
//! ```text
//!            self canceled
//!   Running ----------------------------------------> Stopped
//!      |                                                 ^
//!      | predecessor canceled                            | predecessor empty
//!      v                                                 |
//!   DrainingPredecessor ---------------------------------+
//! ```
//!
//! Canceling the bridge itself stops it right away and leaves whatever the
//! predecessor still holds behind. Canceling the predecessor instead makes the
//! bridge forward everything the predecessor produced before it stops, which is
//! how cancellation cascades through a pipeline without losing items. Once the
//! bridge is stopped it runs its stop action, which for a continuation stage
//! cancels the stage's own queues and thereby signals the next bridge
//! downstream.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use millrace_common::{Result, error::Error, verify_arg};
use millrace_workflow::{blocking_queue::BlockingQueue, deferred::Deferred};

/// The states of a bridging thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BridgeState {
    /// Forwarding items as they appear on the predecessor's output queue.
    Running,
    /// The predecessor is canceled; forwarding what is left without waiting.
    DrainingPredecessor,
    /// Terminal state: the thread exits.
    Stopped,
}

impl BridgeState {
    /// Performs one transition, forwarding any items taken from `predecessor`.
    fn step<T>(
        self,
        canceled: &AtomicBool,
        predecessor: &BlockingQueue<Deferred<T>>,
        poll_interval: Duration,
        forward: &mut impl FnMut(Deferred<T>),
    ) -> BridgeState {
        match self {
            BridgeState::Running => {
                if canceled.load(Ordering::Acquire) {
                    return BridgeState::Stopped;
                }
                if predecessor.is_canceled() {
                    return BridgeState::DrainingPredecessor;
                }
                if let Some(item) = predecessor.pop_or_wait_timeout(poll_interval) {
                    forward(item);
                }
                BridgeState::Running
            }
            BridgeState::DrainingPredecessor => {
                while let Some(item) = predecessor.pop() {
                    log::trace!("forwarding drained item");
                    forward(item);
                }
                BridgeState::Stopped
            }
            BridgeState::Stopped => BridgeState::Stopped,
        }
    }
}

/// Handle to a running bridging thread.
pub(crate) struct Bridge {
    name: String,
    canceled: Arc<AtomicBool>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Bridge {
    /// Spawns a thread named `{name}-bridge` that forwards every item of
    /// `predecessor` to `forward` and calls `on_stop` once it has stopped.
    pub(crate) fn spawn<T, F, S>(
        name: &str,
        predecessor: Arc<BlockingQueue<Deferred<T>>>,
        poll_interval: Duration,
        mut forward: F,
        on_stop: S,
    ) -> Result<Bridge>
    where
        T: Send + 'static,
        F: FnMut(Deferred<T>) + Send + 'static,
        S: FnOnce() + Send + 'static,
    {
        verify_arg!(poll_interval, !poll_interval.is_zero());

        let canceled = Arc::new(AtomicBool::new(false));
        let thread_name = format!("{name}-bridge");
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn({
                let canceled = canceled.clone();
                let name = name.to_string();
                move || {
                    let mut state = BridgeState::Running;
                    while state != BridgeState::Stopped {
                        let next = state.step(&canceled, &predecessor, poll_interval, &mut forward);
                        if next != state {
                            log::debug!("bridge of '{name}': {state:?} -> {next:?}");
                        }
                        state = next;
                    }
                    on_stop();
                }
            })
            .map_err(|e| Error::spawn(thread_name, e))?;

        Ok(Bridge {
            name: name.to_string(),
            canceled,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Asks the bridge to stop without draining the predecessor.
    pub(crate) fn cancel(&self) {
        if !self.canceled.swap(true, Ordering::AcqRel) {
            log::debug!("canceling bridge of '{}'", self.name);
        }
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Blocks until the bridging thread has exited and its stop action has run.
    pub(crate) fn join(&self) {
        let mut thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = thread.take() {
            if handle.join().is_err() {
                log::error!("bridge of '{}' panicked", self.name);
            }
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.cancel();
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc, Mutex,
            atomic::{AtomicBool, Ordering},
        },
        thread,
        time::{Duration, Instant},
    };

    use millrace_workflow::{blocking_queue::BlockingQueue, deferred::Deferred};

    use super::{Bridge, BridgeState};

    const POLL: Duration = Duration::from_millis(20);

    fn queue_of(values: &[i32]) -> BlockingQueue<Deferred<i32>> {
        let queue = BlockingQueue::new();
        for &v in values {
            queue.push(Deferred::ready(v)).unwrap();
        }
        queue
    }

    #[test]
    fn test_running_forwards_one_item() {
        let queue = queue_of(&[1, 2]);
        let canceled = AtomicBool::new(false);
        let mut seen = Vec::new();
        let next = BridgeState::Running.step(&canceled, &queue, POLL, &mut |d: Deferred<i32>| {
            seen.push(d.join())
        });
        assert_eq!(next, BridgeState::Running);
        assert_eq!(seen, vec![1]);
    }

    #[test]
    fn test_self_cancel_stops_without_drain() {
        let queue = queue_of(&[1, 2]);
        let canceled = AtomicBool::new(true);
        let mut seen = Vec::new();
        let next = BridgeState::Running.step(&canceled, &queue, POLL, &mut |d: Deferred<i32>| {
            seen.push(d.join())
        });
        assert_eq!(next, BridgeState::Stopped);
        assert!(seen.is_empty());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_predecessor_cancel_drains() {
        let queue = queue_of(&[1, 2, 3]);
        queue.cancel();
        let canceled = AtomicBool::new(false);
        let mut seen = Vec::new();
        let mut forward = |d: Deferred<i32>| seen.push(d.join());
        let mut state = BridgeState::Running;
        let mut states = vec![state];
        while state != BridgeState::Stopped {
            state = state.step(&canceled, &queue, POLL, &mut forward);
            states.push(state);
        }
        assert_eq!(
            states,
            vec![
                BridgeState::Running,
                BridgeState::DrainingPredecessor,
                BridgeState::Stopped
            ]
        );
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn test_spawned_bridge_runs_stop_action() {
        let queue = Arc::new(BlockingQueue::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let stopped = Arc::new(AtomicBool::new(false));
        let bridge = Bridge::spawn(
            "test",
            queue.clone(),
            POLL,
            {
                let seen = seen.clone();
                move |d: Deferred<i32>| seen.lock().unwrap().push(d.join())
            },
            {
                let stopped = stopped.clone();
                move || stopped.store(true, Ordering::SeqCst)
            },
        )
        .unwrap();
        for v in [4, 5, 6] {
            queue.push(Deferred::ready(v)).unwrap();
        }
        queue.cancel();
        bridge.join();
        assert!(stopped.load(Ordering::SeqCst));
        assert_eq!(*seen.lock().unwrap(), vec![4, 5, 6]);
    }

    #[test]
    fn test_cancel_stops_idle_bridge_promptly() {
        let queue = Arc::new(BlockingQueue::<Deferred<i32>>::new());
        let bridge = Bridge::spawn("idle", queue.clone(), POLL, |_| {}, || {}).unwrap();
        thread::sleep(Duration::from_millis(30));
        let start = Instant::now();
        bridge.cancel();
        assert!(bridge.is_canceled());
        bridge.join();
        assert!(start.elapsed() < Duration::from_millis(500));
        assert!(!queue.is_canceled());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let queue = Arc::new(BlockingQueue::<Deferred<i32>>::new());
        assert!(Bridge::spawn("bad", queue, Duration::ZERO, |_| {}, || {}).is_err());
    }
}
