//! Results storage and reporting module
//!
//! Persists the execute step state and renders the saved result set.

mod junit;
mod storage;

pub use junit::write_junit;
pub use storage::{ExportFormat, ResultsStorage, StepStatus};
