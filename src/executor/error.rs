//! Execution errors

use std::path::PathBuf;
use thiserror::Error;

use crate::guest::{GuestError, RunError};

/// Errors raised by the execution engine
#[derive(Error, Debug)]
pub enum ExecuteError {
    /// Invalid step configuration, reported before anything runs
    #[error("{0}")]
    Specification(String),

    #[error("{0}")]
    Execute(String),

    #[error("Failed to reboot guest '{guest}' in time.")]
    RebootTimeout { guest: String },

    #[error("Failed to reboot guest '{guest}': {source}")]
    Reboot {
        guest: String,
        #[source]
        source: GuestError,
    },

    #[error("Guest '{guest}' failed: {source}")]
    Guest {
        guest: String,
        #[source]
        source: GuestError,
    },

    /// Stop the whole step now
    #[error("Execution aborted: {0}")]
    Abort(String),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("Failed to parse results file '{path}': {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Several tasks failed
    #[error("{message}")]
    General {
        message: String,
        causes: Vec<ExecuteError>,
    },
}

impl ExecuteError {
    /// Wrap a failed guest operation other than a reboot
    pub fn guest(guest: &str, error: GuestError) -> Self {
        match error {
            GuestError::Run(error) => ExecuteError::Run(error),
            GuestError::Io(error) => ExecuteError::Io(error),
            source => ExecuteError::Guest {
                guest: guest.to_string(),
                source,
            },
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, ExecuteError::Abort(_))
    }

    /// The error and all of its causes, one per line
    pub fn report(&self) -> String {
        match self {
            ExecuteError::General { message, causes } => {
                let mut lines = vec![message.clone()];
                for cause in causes {
                    lines.push(format!("  {cause}"));
                }
                lines.join("\n")
            }
            other => other.to_string(),
        }
    }
}
