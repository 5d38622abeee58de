//! Local guest: runs tests directly on the orchestrator host

use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use super::process::run_process;
use super::{CommandOutput, ExecuteOptions, Guest, GuestError, ProcessHooks, RunError};
use crate::utils::Waiting;

/// Guest running commands through `bash` on the local host
#[derive(Clone, Debug)]
pub struct LocalGuest {
    name: String,
    role: Option<String>,
}

impl LocalGuest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

#[async_trait]
impl Guest for LocalGuest {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    async fn execute(
        &self,
        command: &str,
        options: &ExecuteOptions,
        hooks: Option<&dyn ProcessHooks>,
    ) -> Result<CommandOutput, RunError> {
        debug!("Run '{}' on local guest {}", command, self.name);

        let mut process = Command::new("bash");
        process.arg("-c").arg(command);
        run_process(process, command, options, hooks).await
    }

    async fn reboot(
        &self,
        hard: bool,
        _command: Option<&str>,
        _waiting: Waiting,
    ) -> Result<bool, GuestError> {
        if !hard {
            return Err(GuestError::RebootModeNotSupported);
        }

        Err(GuestError::Unsupported {
            guest: self.name.clone(),
            operation: "hard reboot".to_string(),
        })
    }

    async fn reconnect(&self) -> bool {
        true
    }

    async fn push(&self, _path: Option<&Path>) -> Result<(), GuestError> {
        // Local guest shares the filesystem with the orchestrator.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_execute() {
        let guest = LocalGuest::new("local").with_role("server");
        let output = guest
            .execute("echo local", &ExecuteOptions::default(), None)
            .await
            .unwrap();

        assert_eq!(output.stdout, "local\n");
        assert_eq!(guest.info().role.as_deref(), Some("server"));
    }

    #[tokio::test]
    async fn test_local_reboot_unsupported() {
        let guest = LocalGuest::new("local");

        assert!(matches!(
            guest.reboot(false, None, Waiting::default()).await,
            Err(GuestError::RebootModeNotSupported)
        ));
        assert!(matches!(
            guest.reboot(true, None, Waiting::default()).await,
            Err(GuestError::Unsupported { .. })
        ));
        assert!(guest.reconnect().await);
    }
}
