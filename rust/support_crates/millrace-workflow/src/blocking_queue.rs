//! An unbounded, cancelable, blocking FIFO queue.
//!
//! [`BlockingQueue`] is the building block every pipeline stage is made of: worker
//! pools drain one, stages publish their deferred results through one, and bridging
//! threads poll the output queue of a predecessor stage.
//!
//! Unlike [`std::sync::mpsc`] or the channel types, the queue has no notion of
//! producers and consumers. It is shared (usually behind an `Arc`) and closed
//! explicitly with [`BlockingQueue::cancel`]. Cancellation is one-way:
//!
//! - further pushes are rejected with a [`PushError`] that hands the item back,
//! - items pushed before cancellation remain available to [`pop`](BlockingQueue::pop)
//!   and friends until the queue is drained,
//! - every thread parked in a blocking pop is woken up.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A thread-safe FIFO queue with blocking pops and one-way cancellation.
pub struct BlockingQueue<T> {
    state: Mutex<State<T>>,
    /// Signaled when an item is pushed or the queue is canceled.
    not_empty: Condvar,
}

struct State<T> {
    items: VecDeque<T>,
    canceled: bool,
}

impl<T> BlockingQueue<T> {
    /// Creates an empty, non-canceled queue.
    pub fn new() -> BlockingQueue<T> {
        BlockingQueue {
            state: Mutex::new(State {
                items: VecDeque::new(),
                canceled: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Appends an item to the back of the queue and wakes one waiting consumer.
    ///
    /// Returns the item inside a [`PushError`] if the queue has been canceled.
    /// The queue is unbounded, so a push never blocks and never fails for
    /// capacity reasons.
    pub fn push(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.lock();
        if state.canceled {
            return Err(PushError(item));
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Removes the front item without blocking.
    ///
    /// The cancellation flag is not consulted: a canceled queue keeps handing out
    /// the items that were pushed before cancellation.
    pub fn pop(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    /// Removes the front item, blocking until one is available.
    ///
    /// Returns `None` only when the queue is canceled and empty.
    pub fn pop_or_wait(&self) -> Option<T> {
        let state = self.lock();
        let mut state = self
            .not_empty
            .wait_while(state, |state| state.items.is_empty() && !state.canceled)
            .unwrap_or_else(PoisonError::into_inner);
        state.items.pop_front()
    }

    /// Removes the front item, blocking for at most `timeout` until one is available.
    ///
    /// Returns `None` if the timeout elapsed, or the queue got canceled, while the
    /// queue was empty.
    pub fn pop_or_wait_timeout(&self, timeout: Duration) -> Option<T> {
        let state = self.lock();
        let (mut state, _) = self
            .not_empty
            .wait_timeout_while(state, timeout, |state| {
                state.items.is_empty() && !state.canceled
            })
            .unwrap_or_else(PoisonError::into_inner);
        state.items.pop_front()
    }

    /// Blocks for at most `timeout` until the queue holds an item or is canceled,
    /// without removing anything.
    ///
    /// Returns `true` if an item was queued when the wait ended. Another consumer
    /// may still take it before the caller gets to pop.
    pub fn wait_for_item(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .not_empty
            .wait_timeout_while(state, timeout, |state| {
                state.items.is_empty() && !state.canceled
            })
            .unwrap_or_else(PoisonError::into_inner);
        !state.items.is_empty()
    }

    /// Cancels the queue and wakes all waiting consumers. Idempotent.
    pub fn cancel(&self) {
        self.lock().canceled = true;
        self.not_empty.notify_all();
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_canceled(&self) -> bool {
        self.lock().canceled
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // Items are plain data and no user code runs under the lock,
        // so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        BlockingQueue::new()
    }
}

impl<T> Drop for BlockingQueue<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// An error returned from [`BlockingQueue::push`] when the queue is canceled.
///
/// The rejected item is handed back to the caller.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct PushError<T>(pub T);

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> std::fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PushError(..)")
    }
}

impl<T> std::fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "queue already canceled")
    }
}

impl<T> std::error::Error for PushError<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    struct Uncopyable(i32);

    #[test]
    fn test_blocking_queue_send_sync() {
        fn is_send_sync<T: Send + Sync>() {}
        is_send_sync::<BlockingQueue<Box<dyn FnOnce() + Send>>>();
    }

    #[test]
    fn test_push_pop() {
        let q = BlockingQueue::new();
        q.push(23).unwrap();
        assert_eq!(q.pop(), Some(23));
    }

    #[test]
    fn test_fifo_order() {
        let q = BlockingQueue::new();
        q.push(23).unwrap();
        q.push(5).unwrap();
        q.push(7).unwrap();
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop(), Some(23));
        assert_eq!(q.pop_or_wait(), Some(5));
        assert_eq!(q.pop_or_wait_timeout(Duration::from_secs(1)), Some(7));
        assert!(q.is_empty());
    }

    #[test]
    fn test_empty_pop_does_not_block() {
        let q = BlockingQueue::<i32>::new();
        let start = Instant::now();
        assert_eq!(q.pop(), None);
        assert_eq!(q.pop(), None);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_pop_or_wait_timeout_elapses() {
        let q = BlockingQueue::<i32>::new();
        let start = Instant::now();
        assert_eq!(q.pop_or_wait_timeout(Duration::from_millis(200)), None);
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn test_pop_or_wait_wakes_on_push() {
        let q = Arc::new(BlockingQueue::new());
        let start = Instant::now();
        let handle = thread::spawn({
            let q = q.clone();
            move || q.pop_or_wait_timeout(Duration::from_secs(2))
        });
        thread::sleep(Duration::from_millis(50));
        q.push(23).unwrap();
        assert_eq!(handle.join().unwrap(), Some(23));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_cancel_breaks_wait() {
        let q = Arc::new(BlockingQueue::<i32>::new());
        let start = Instant::now();
        let waiters = (0..3)
            .map(|i| {
                let q = q.clone();
                thread::spawn(move || {
                    if i == 0 {
                        q.pop_or_wait()
                    } else {
                        q.pop_or_wait_timeout(Duration::from_secs(5))
                    }
                })
            })
            .collect::<Vec<_>>();
        thread::sleep(Duration::from_millis(50));
        q.cancel();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), None);
        }
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_wait_for_item_leaves_item_queued() {
        let q = BlockingQueue::new();
        assert!(!q.wait_for_item(Duration::from_millis(20)));
        thread::scope(|s| {
            let waiter = s.spawn(|| q.wait_for_item(Duration::from_secs(5)));
            thread::sleep(Duration::from_millis(50));
            q.push(23).unwrap();
            assert!(waiter.join().unwrap());
        });
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop(), Some(23));

        let start = Instant::now();
        thread::scope(|s| {
            let waiter = s.spawn(|| q.wait_for_item(Duration::from_secs(5)));
            thread::sleep(Duration::from_millis(50));
            q.cancel();
            assert!(!waiter.join().unwrap());
        });
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_cancel_stops_push() {
        let q = BlockingQueue::new();
        q.push(23).unwrap();
        q.push(5).unwrap();
        q.cancel();
        q.cancel();
        assert!(q.is_canceled());
        assert_eq!(q.push(7), Err(PushError(7)));
        assert_eq!(q.pop(), Some(23));
        assert_eq!(q.pop_or_wait(), Some(5));
        assert_eq!(q.pop(), None);
        assert_eq!(q.pop_or_wait(), None);
    }

    #[test]
    fn test_move_only_items() {
        let q = BlockingQueue::new();
        q.push(Uncopyable(23)).unwrap();
        q.push(Uncopyable(5)).unwrap();
        q.cancel();
        let rejected = q.push(Uncopyable(7)).unwrap_err().into_inner();
        assert_eq!(rejected.0, 7);
        assert_eq!(q.pop().unwrap().0, 23);
        assert_eq!(q.pop_or_wait().unwrap().0, 5);
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_multi_producer_multi_consumer() {
        const PRODUCERS: usize = 4;
        const CONSUMERS: usize = 3;
        const ITEMS_PER_PRODUCER: usize = 1000;

        let q = BlockingQueue::new();
        thread::scope(|s| {
            let producers = (0..PRODUCERS)
                .map(|i| {
                    let q = &q;
                    s.spawn(move || {
                        for j in 0..ITEMS_PER_PRODUCER {
                            q.push(i * ITEMS_PER_PRODUCER + j).unwrap();
                        }
                    })
                })
                .collect::<Vec<_>>();
            let consumers = (0..CONSUMERS)
                .map(|_| {
                    let q = &q;
                    s.spawn(move || {
                        let mut received = Vec::new();
                        while let Some(item) = q.pop_or_wait() {
                            received.push(item);
                        }
                        received
                    })
                })
                .collect::<Vec<_>>();

            for producer in producers {
                producer.join().unwrap();
            }
            q.cancel();

            let mut all = consumers
                .into_iter()
                .flat_map(|c| c.join().unwrap())
                .collect::<Vec<_>>();
            all.sort();
            assert_eq!(all, (0..PRODUCERS * ITEMS_PER_PRODUCER).collect::<Vec<_>>());
        });
    }
}
