//! Composable concurrent stage pipelines.
//!
//! A pipeline is a chain of stages, each backed by its own worker threads:
//!
//! - [`TaskStage`]: runs arbitrary closures, returning each result directly.
//! - [`BufferedTaskStage`]: runs arbitrary closures and collects their results on
//!   an output queue in submission order.
//! - [`DataStage`]: a buffered stage with a fixed transform, fed with raw values.
//! - [`ContinuationStage`]: a data stage fed by a bridging thread with the results
//!   of a predecessor stage.
//! - [`ContinuationTaskStage`]: pairs each submitted closure with the next result
//!   of a predecessor stage.
//! - [`TerminationStage`]: hands every result of a predecessor to a terminal
//!   function.
//!
//! Results travel between stages as [`Deferred`] handles, which resolve either to a
//! value or to the [`TaskFailure`] captured while computing it. Failures stay local
//! to the item they belong to.
//!
//! ```no_run
//! use millrace::{ContinuationStage, DataStage, Deferred, Stage, TerminationStage};
//!
//! let double = DataStage::new(2, |x: i64| x * 2)?;
//! let add_one = ContinuationStage::new(2, &double, |d: Deferred<i64>| d.join() + 1)?;
//! let sink = TerminationStage::new(&add_one, |d: Deferred<i64>| println!("{}", d.join()))?;
//! for x in [1, 2, 3] {
//!     double.push(x)?;
//! }
//! // Cancel upstream first; cancellation cascades once everything is drained.
//! double.cancel();
//! sink.wait();
//! # Ok::<(), millrace::Error>(())
//! ```

pub mod buffered_stage;
pub mod continuation_stage;
pub mod continuation_task_stage;
pub mod data_stage;
pub mod options;
pub mod stage;
pub mod task_stage;
pub mod termination_stage;

mod bridge;

pub use buffered_stage::BufferedTaskStage;
pub use continuation_stage::ContinuationStage;
pub use continuation_task_stage::ContinuationTaskStage;
pub use data_stage::DataStage;
pub use options::StageOptions;
pub use stage::{Stage, Upstream};
pub use task_stage::TaskStage;
pub use termination_stage::TerminationStage;

pub use millrace_common::{Result, error::Error, error::ErrorKind};
pub use millrace_workflow::deferred::{Deferred, Outcome, TaskFailure};
