//! Deferred results of jobs executed by worker pools.
//!
//! A [`Deferred<T>`] is handed out at submission time, before the bound job has
//! necessarily run. Blocking retrieval waits for the job and yields either its value
//! or the [`TaskFailure`] captured while running it. A failing job never unwinds the
//! thread that ran it: the panic is caught and stored in the deferred, and it
//! surfaces only when someone retrieves that specific deferred.
//!
//! ## Retrieval
//!
//! - [`Deferred::wait`] returns `Result<T, TaskFailure>`.
//! - [`Deferred::join`] returns `T` and re-raises a captured panic on the calling
//!   thread with its original payload. Inside another job this moves the upstream
//!   failure into the downstream deferred, which is how failures travel along a
//!   pipeline.
//!
//! A deferred is consumed by retrieval, so each result is observed at most once.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    time::Duration,
};

use crate::completion::{self, Completion};

/// A type-erased unit of work, ready to be executed by a worker thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Binds `f` to a fresh [`Deferred`].
///
/// Running the returned [`Job`] executes `f`, capturing a panic if one occurs, and
/// resolves the deferred. Dropping the job without running it resolves the deferred
/// to [`TaskFailure::Abandoned`].
pub fn package<F, T>(f: F) -> (Job, Deferred<T>)
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (completer, completion) = completion::pair::<Outcome<T>>();
    let job = Box::new(move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(f)).map_err(TaskFailure::Panicked);
        // The consumer may have dropped its deferred; nothing to report then.
        let _ = completer.complete(outcome);
    });
    (job, Deferred(completion))
}

/// Explicit tagged result carried from the job to its [`Deferred`].
pub type Outcome<T> = Result<T, TaskFailure>;

/// A handle to the not-yet-necessarily-complete result of a job.
pub struct Deferred<T>(Completion<Outcome<T>>);

impl<T> Deferred<T> {
    /// Creates a deferred that is already resolved with `value`.
    pub fn ready(value: T) -> Deferred<T> {
        Deferred(completion::completed(Ok(value)))
    }

    /// Creates a deferred that is already resolved with `failure`.
    pub fn failed(failure: TaskFailure) -> Deferred<T> {
        Deferred(completion::completed(Err(failure)))
    }

    /// Checks without blocking whether the job has finished.
    pub fn is_ready(&self) -> bool {
        self.0.is_resolved()
    }

    /// Waits for the job to finish and returns its value or captured failure.
    pub fn wait(self) -> Outcome<T> {
        self.0.wait().unwrap_or(Err(TaskFailure::Abandoned))
    }

    /// Waits for the job to finish for at most `timeout`.
    ///
    /// Hands the deferred back in `Err` if the job is still running.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Outcome<T>, Deferred<T>> {
        match self.0.wait_timeout(timeout) {
            Ok(outcome) => Ok(outcome.unwrap_or(Err(TaskFailure::Abandoned))),
            Err(completion) => Err(Deferred(completion)),
        }
    }

    /// Waits for the job to finish and returns its value.
    ///
    /// # Panics
    ///
    /// Re-raises the failure captured while running the job: a panic resumes with its
    /// original payload, an abandoned job panics with a descriptive message.
    pub fn join(self) -> T {
        match self.wait() {
            Ok(value) => value,
            Err(TaskFailure::Panicked(payload)) => panic::resume_unwind(payload),
            Err(TaskFailure::Abandoned) => panic!("{}", TaskFailure::Abandoned),
        }
    }

    /// Waits for all deferred results, returning them in the order of the input.
    pub fn wait_all(deferred: impl IntoIterator<Item = Deferred<T>>) -> Vec<Outcome<T>> {
        deferred.into_iter().map(Deferred::wait).collect()
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// The failure captured while running a job.
pub enum TaskFailure {
    /// The job panicked; holds the panic payload.
    Panicked(Box<dyn Any + Send + 'static>),
    /// The job was dropped without being run.
    Abandoned,
}

impl TaskFailure {
    /// Creates a failure that looks like a panic with the given message.
    pub fn with_message(message: impl Into<String>) -> TaskFailure {
        TaskFailure::Panicked(Box::new(message.into()))
    }

    /// The panic message, when the payload is a string.
    pub fn message(&self) -> Option<&str> {
        match self {
            TaskFailure::Panicked(payload) => payload
                .downcast_ref::<&'static str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str)),
            TaskFailure::Abandoned => None,
        }
    }

    pub fn is_abandoned(&self) -> bool {
        matches!(self, TaskFailure::Abandoned)
    }
}

impl std::fmt::Debug for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskFailure::Panicked(_) => f
                .debug_tuple("Panicked")
                .field(&self.message().unwrap_or("<non-string payload>"))
                .finish(),
            TaskFailure::Abandoned => f.write_str("Abandoned"),
        }
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskFailure::Panicked(_) => match self.message() {
                Some(message) => write!(f, "task panicked: {message}"),
                None => write!(f, "task panicked"),
            },
            TaskFailure::Abandoned => write!(f, "task was dropped before it ran"),
        }
    }
}

impl std::error::Error for TaskFailure {}
