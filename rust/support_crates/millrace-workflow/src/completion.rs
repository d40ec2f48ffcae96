//! Single-assignment completion slots.
//!
//! A [`Completer`] fills the slot shared with its [`Completion`] at most once, and
//! the completion hands the value to exactly one reader. Both halves are move-only
//! and consumed by use. If the completer goes away without filling the slot, the
//! slot is marked abandoned and a blocked reader wakes up with `None`.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// Creates an empty slot, returning its writing and reading halves.
pub fn pair<T>() -> (Completer<T>, Completion<T>) {
    let slot = Arc::new(Slot::new(Phase::Empty));
    (
        Completer { slot: slot.clone() },
        Completion { slot },
    )
}

/// Creates a completion that already holds `value`.
pub fn completed<T>(value: T) -> Completion<T> {
    Completion {
        slot: Arc::new(Slot::new(Phase::Filled(value))),
    }
}

/// The writing half of a slot.
pub struct Completer<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Completer<T> {
    /// Fills the slot and wakes the reader.
    ///
    /// Hands `value` back when the reading half no longer exists.
    pub fn complete(self, value: T) -> Result<(), T> {
        if Arc::strong_count(&self.slot) == 1 {
            return Err(value);
        }
        self.slot.resolve(Some(value));
        Ok(())
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        // No-op after `complete`.
        self.slot.resolve(None);
    }
}

/// The reading half of a slot.
pub struct Completion<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Completion<T> {
    /// Blocks until the slot is resolved.
    ///
    /// Returns `None` if the completer was dropped without filling the slot.
    pub fn wait(self) -> Option<T> {
        let phase = self.slot.lock();
        let mut phase = self
            .slot
            .resolved
            .wait_while(phase, |phase| phase.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        phase.take()
    }

    /// Blocks for at most `timeout` until the slot is resolved.
    ///
    /// Gives the completion back in `Err` if the slot is still empty afterwards.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Option<T>, Completion<T>> {
        let value = {
            let phase = self.slot.lock();
            let (mut phase, _) = self
                .slot
                .resolved
                .wait_timeout_while(phase, timeout, |phase| phase.is_empty())
                .unwrap_or_else(PoisonError::into_inner);
            if phase.is_empty() {
                None
            } else {
                Some(phase.take())
            }
        };
        value.ok_or(self)
    }

    /// Checks without blocking whether the slot has been filled or abandoned.
    pub fn is_resolved(&self) -> bool {
        !self.slot.lock().is_empty()
    }
}

struct Slot<T> {
    phase: Mutex<Phase<T>>,
    /// Signaled once, when the slot leaves `Phase::Empty`.
    resolved: Condvar,
}

impl<T> Slot<T> {
    fn new(phase: Phase<T>) -> Slot<T> {
        Slot {
            phase: Mutex::new(phase),
            resolved: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Phase<T>> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves an empty slot to `Filled` or `Abandoned`. Later calls are ignored.
    fn resolve(&self, value: Option<T>) {
        let mut phase = self.lock();
        if !phase.is_empty() {
            return;
        }
        *phase = match value {
            Some(value) => Phase::Filled(value),
            None => Phase::Abandoned,
        };
        drop(phase);
        self.resolved.notify_all();
    }
}

/// `Empty` -> `Filled` | `Abandoned`; `Filled` -> `Taken`.
enum Phase<T> {
    Empty,
    Filled(T),
    Abandoned,
    Taken,
}

impl<T> Phase<T> {
    fn is_empty(&self) -> bool {
        matches!(self, Phase::Empty)
    }

    /// Moves the value out of a resolved slot.
    fn take(&mut self) -> Option<T> {
        debug_assert!(!self.is_empty());
        match std::mem::replace(self, Phase::Taken) {
            Phase::Filled(value) => Some(value),
            Phase::Empty | Phase::Abandoned | Phase::Taken => None,
        }
    }
}
