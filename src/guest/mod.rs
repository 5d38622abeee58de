//! Guests: execution targets tests run on
//!
//! A guest is an already provisioned and connected machine or container.
//! The execution engine only needs to run commands on it, reboot it,
//! reconnect to it, and push the working directory to it.

use async_trait::async_trait;
use nix::sys::signal::Signal;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::models::ResultGuestData;
use crate::utils::{safe_name, LogLevel, Waiting};

mod local;
#[cfg(test)]
pub mod mock;
mod process;
mod ssh;

pub use local::LocalGuest;
pub use process::ProcessHandle;
pub use ssh::{SshConfig, SshGuest};

/// Well-known exit codes of test processes
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
    /// The test failed to lock its pidfile
    pub const TEST_PIDFILE_LOCK_FAILED: i32 = 122;
    /// The test failed to unlock its pidfile
    pub const TEST_PIDFILE_UNLOCK_FAILED: i32 = 123;
    /// The test ran out of its duration
    pub const TIMEOUT: i32 = 124;
    pub const PERMISSION_DENIED: i32 = 126;
    pub const NOT_FOUND: i32 = 127;

    pub fn is_pidfile(code: i32) -> bool {
        code == TEST_PIDFILE_LOCK_FAILED || code == TEST_PIDFILE_UNLOCK_FAILED
    }
}

/// Captured output of a command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Both streams joined, stdout first
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}{}", self.stdout, self.stderr)
        }
    }
}

/// A command run on a guest finished unsuccessfully
#[derive(Error, Clone, Debug)]
#[error("Command '{command}' returned {returncode}.")]
pub struct RunError {
    pub command: String,
    pub returncode: i32,
    pub output: CommandOutput,
}

impl RunError {
    pub fn new(command: impl Into<String>, returncode: i32, output: CommandOutput) -> Self {
        Self {
            command: command.into(),
            returncode,
            output,
        }
    }
}

/// Guest operation errors
#[derive(Error, Debug)]
pub enum GuestError {
    #[error("Guest does not support soft reboot")]
    RebootModeNotSupported,

    #[error("Operation not supported by guest '{guest}': {operation}")]
    Unsupported { guest: String, operation: String },

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Options for running a command on a guest
#[derive(Clone, Debug)]
pub struct ExecuteOptions {
    /// Working directory of the command
    pub cwd: Option<PathBuf>,

    /// Variables added to the command environment
    pub env: BTreeMap<String, String>,

    /// Kill the command if still running after this long
    pub timeout: Option<Duration>,

    /// Connect the command to the terminal instead of capturing output
    pub interactive: bool,

    /// Level captured output lines are logged at
    pub log: LogLevel,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            env: BTreeMap::new(),
            timeout: None,
            interactive: false,
            log: LogLevel::Debug,
        }
    }
}

/// Observer of the process spawned by [`Guest::execute`]
pub trait ProcessHooks: Send + Sync {
    /// Called right after the process has been spawned
    fn on_process_start(&self, process: ProcessHandle);

    /// Called once the process has finished, before output is returned
    fn on_process_end(&self, process: ProcessHandle, output: &CommandOutput);
}

/// An execution target
#[async_trait]
pub trait Guest: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn role(&self) -> Option<&str>;

    /// Name usable as a file name
    fn safe_name(&self) -> String {
        safe_name(self.name())
    }

    /// Name and role as recorded in results
    fn info(&self) -> ResultGuestData {
        ResultGuestData::new(self.name(), self.role().map(str::to_string))
    }

    /// Run a shell command on the guest
    async fn execute(
        &self,
        command: &str,
        options: &ExecuteOptions,
        hooks: Option<&dyn ProcessHooks>,
    ) -> Result<CommandOutput, RunError>;

    /// Reboot the guest and wait for it to come back.
    ///
    /// Returns `false` if the guest did not come back in time.
    async fn reboot(
        &self,
        hard: bool,
        command: Option<&str>,
        waiting: Waiting,
    ) -> Result<bool, GuestError>;

    /// Re-establish the connection, waiting for the guest if needed
    async fn reconnect(&self) -> bool;

    /// Push the given path, or the whole working directory, to the guest
    async fn push(&self, path: Option<&Path>) -> Result<(), GuestError>;

    /// Release connection helpers after a process got signalled
    fn cleanup_after_signal(&self, _signal: Signal) {}
}
