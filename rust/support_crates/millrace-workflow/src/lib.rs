//! Threading primitives the millrace pipeline stages are built from.
//!
//! # Key Components
//!
//! - [`blocking_queue::BlockingQueue`] - An unbounded FIFO with blocking pops and
//!   one-way cancellation
//! - [`deferred::Deferred`] - The result of a submitted job, with the failure captured
//!   while running it
//! - [`worker_pool::WorkerPool`] - A fixed set of threads draining a job queue until it
//!   is canceled and empty
//! - [`completion`] - A single-assignment slot shared by two threads, backing
//!   [`deferred::Deferred`]

pub mod blocking_queue;
pub mod completion;
pub mod deferred;
pub mod worker_pool;
