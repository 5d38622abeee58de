//! Test execution engine
//!
//! Runs discovered tests on guests: the per-test invocation lifecycle, result
//! extraction, checks, the phase queue and the execute step controller.

mod checks;
mod error;
mod extract;
mod framework;
mod invocation;
mod plugin;
mod queue;
mod step;

pub use error::ExecuteError;
pub use plugin::{ExecutePlugin, ExecuteStepData, ExecutionContext, PhaseRun, PluginRegistry};
pub use queue::Action;
pub use step::ExecuteStep;
