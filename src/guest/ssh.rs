//! SSH guest
//!
//! Runs tests on a remote machine reachable over SSH, sharing one
//! ControlMaster connection between commands.

use async_trait::async_trait;
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::process::run_process;
use super::{CommandOutput, ExecuteOptions, Guest, GuestError, ProcessHooks, RunError};
use crate::utils::Waiting;

/// Exit code `ssh` uses when the connection itself failed
const SSH_CONNECTION_ERROR: i32 = 255;

fn default_port() -> u16 {
    22
}

fn default_timeout() -> u64 {
    30
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5
}

/// SSH connection configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SshConfig {
    /// SSH username
    pub username: String,

    /// SSH private key path
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,

    /// SSH port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Connection timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Strict host key checking
    #[serde(default)]
    pub strict_host_key_checking: bool,

    /// Number of reconnection attempts
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Delay between reconnection attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Local command power-cycling the machine, enables hard reboot
    #[serde(default)]
    pub hard_reboot: Option<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            username: "root".to_string(),
            private_key_path: None,
            port: default_port(),
            timeout_secs: default_timeout(),
            strict_host_key_checking: false,
            retries: default_retries(),
            retry_delay_secs: default_retry_delay(),
            hard_reboot: None,
        }
    }
}

impl SshConfig {
    /// Create a new SSH config
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    /// Set port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set connection timeout
    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set retries
    pub fn retries(mut self, count: u32) -> Self {
        self.retries = count;
        self
    }
}

/// Guest reachable over SSH
#[derive(Clone, Debug)]
pub struct SshGuest {
    name: String,
    role: Option<String>,
    host: String,
    config: SshConfig,
    /// ControlMaster socket shared by all connections
    control_path: Option<PathBuf>,
    /// Directory mirrored to the guest by `push()`
    workdir: PathBuf,
}

impl SshGuest {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        config: SshConfig,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            role: None,
            host: host.into(),
            config,
            control_path: None,
            workdir: workdir.into(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_control_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.control_path = Some(path.into());
        self
    }

    fn common_options(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            format!(
                "StrictHostKeyChecking={}",
                if self.config.strict_host_key_checking {
                    "yes"
                } else {
                    "no"
                }
            ),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.timeout_secs),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
        ];

        if let Some(control_path) = &self.control_path {
            args.push("-o".to_string());
            args.push("ControlMaster=auto".to_string());
            args.push("-o".to_string());
            args.push(format!("ControlPath={}", control_path.display()));
            args.push("-o".to_string());
            args.push("ControlPersist=60s".to_string());
        }

        if let Some(ref key_path) = self.config.private_key_path {
            args.push("-i".to_string());
            args.push(key_path.to_string_lossy().to_string());
        }

        args
    }

    /// Build SSH command arguments
    fn build_ssh_args(&self) -> Vec<String> {
        let mut args = self.common_options();
        args.push("-p".to_string());
        args.push(self.config.port.to_string());
        args.push(format!("{}@{}", self.config.username, self.host));
        args
    }

    /// Wrap a command with the environment and working directory
    fn remote_command(command: &str, options: &ExecuteOptions) -> String {
        let mut script = String::new();
        for (key, value) in &options.env {
            script.push_str(&format!("export {}={}; ", key, shell_quote(value)));
        }
        if let Some(cwd) = &options.cwd {
            script.push_str(&format!("cd {} && ", shell_quote(&cwd.to_string_lossy())));
        }
        script.push_str(&format!("bash -c {}", shell_quote(command)));
        script
    }

    /// Test SSH connectivity
    pub async fn test_connection(&self) -> bool {
        debug!(
            "Testing SSH connection to {}@{}",
            self.config.username, self.host
        );

        let mut args = self.build_ssh_args();
        args.push("echo".to_string());
        args.push("connected".to_string());

        match Command::new("ssh").args(&args).output().await {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).trim() == "connected"
            }
            Ok(output) => {
                debug!(
                    "SSH connection test failed: {}",
                    String::from_utf8_lossy(&output.stderr)
                );
                false
            }
            Err(e) => {
                debug!("Failed to execute SSH command: {}", e);
                false
            }
        }
    }

    async fn wait_for_ssh(&self, waiting: Waiting) -> bool {
        info!(
            "Waiting for SSH on {}:{} (timeout: {}s)",
            self.host,
            self.config.port,
            waiting.timeout.as_secs()
        );

        let ready = waiting.wait(|| self.test_connection()).await;
        if ready {
            info!("SSH is available on {}", self.host);
        } else {
            warn!("Timeout waiting for SSH on {}", self.host);
        }
        ready
    }

    fn reconnect_waiting(&self) -> Waiting {
        let delay = Duration::from_secs(self.config.retry_delay_secs);
        Waiting::new(delay * self.config.retries.max(1)).with_tick(delay)
    }

    fn drop_control_master(&self) {
        let Some(control_path) = &self.control_path else {
            return;
        };

        let result = std::process::Command::new("ssh")
            .arg("-S")
            .arg(control_path)
            .arg("-O")
            .arg("exit")
            .arg(format!("{}@{}", self.config.username, self.host))
            .output();

        if let Err(e) = result {
            debug!("Failed to stop SSH master process: {}", e);
        }
    }
}

#[async_trait]
impl Guest for SshGuest {
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
        debug!("Executing SSH command on {}: {}", self.host, command);

        let mut args = self.build_ssh_args();
        if options.interactive {
            args.insert(0, "-t".to_string());
        }
        args.push(Self::remote_command(command, options));

        let mut process = Command::new("ssh");
        process.args(&args);

        // Environment and working directory are applied on the remote side.
        let local = ExecuteOptions {
            cwd: None,
            env: Default::default(),
            ..options.clone()
        };
        run_process(process, command, &local, hooks).await
    }

    async fn reboot(
        &self,
        hard: bool,
        command: Option<&str>,
        waiting: Waiting,
    ) -> Result<bool, GuestError> {
        if hard {
            let Some(hard_reboot) = &self.config.hard_reboot else {
                return Err(GuestError::Unsupported {
                    guest: self.name.clone(),
                    operation: "hard reboot".to_string(),
                });
            };

            info!("Hard reboot of guest {} using '{}'", self.name, hard_reboot);
            let mut process = Command::new("bash");
            process.arg("-c").arg(hard_reboot);
            run_process(process, hard_reboot, &ExecuteOptions::default(), None).await?;
        } else {
            let command = command.unwrap_or("reboot");
            info!("Soft reboot of guest {} using '{}'", self.name, command);

            match self.execute(command, &ExecuteOptions::default(), None).await {
                Ok(_) => {}
                // The connection drops while the guest goes down.
                Err(error) if error.returncode == SSH_CONNECTION_ERROR => {}
                Err(error) => return Err(error.into()),
            }
        }

        self.drop_control_master();
        sleep(waiting.tick).await;

        Ok(self.wait_for_ssh(waiting).await)
    }

    async fn reconnect(&self) -> bool {
        self.wait_for_ssh(self.reconnect_waiting()).await
    }

    async fn push(&self, path: Option<&Path>) -> Result<(), GuestError> {
        let source = path.unwrap_or(&self.workdir);
        let parent = source.parent().unwrap_or(Path::new("/"));

        debug!(
            "Push {} -> {}@{}:{}",
            source.display(),
            self.config.username,
            self.host,
            parent.display()
        );

        let mkdir = format!("mkdir -p {}", shell_quote(&parent.to_string_lossy()));
        self.execute(&mkdir, &ExecuteOptions::default(), None)
            .await?;

        let mut args = self.common_options();
        args.push("-r".to_string());
        args.push("-P".to_string());
        args.push(self.config.port.to_string());
        args.push(source.to_string_lossy().to_string());
        args.push(format!(
            "{}@{}:{}",
            self.config.username,
            self.host,
            parent.display()
        ));

        let mut process = Command::new("scp");
        process.args(&args);
        run_process(process, "scp", &ExecuteOptions::default(), None).await?;
        Ok(())
    }

    fn cleanup_after_signal(&self, signal: Signal) {
        debug!(
            "Stopping SSH master process of {} after {}",
            self.name,
            signal.as_str()
        );
        self.drop_control_master();
    }
}

/// Quote a string for POSIX shells
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r#"'\''"#))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_config_builder() {
        let config = SshConfig::new("testuser").port(2222).timeout(60).retries(5);

        assert_eq!(config.username, "testuser");
        assert_eq!(config.port, 2222);
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.retries, 5);
    }

    #[test]
    fn test_ssh_args() {
        let guest = SshGuest::new(
            "server",
            "192.168.1.100",
            SshConfig::new("fedora").port(22),
            "/var/tmp/run",
        )
        .with_control_path("/tmp/server.socket");
        let args = guest.build_ssh_args();

        assert!(args.contains(&"-p".to_string()));
        assert!(args.contains(&"22".to_string()));
        assert!(args.contains(&"ControlPath=/tmp/server.socket".to_string()));
        assert_eq!(args.last().unwrap(), "fedora@192.168.1.100");
    }

    #[test]
    fn test_remote_command() {
        let mut options = ExecuteOptions {
            cwd: Some(PathBuf::from("/var/tmp/data")),
            ..Default::default()
        };
        options.env.insert("NAME".to_string(), "it's".to_string());

        let script = SshGuest::remote_command("echo ok", &options);
        assert_eq!(
            script,
            "export NAME='it'\\''s'; cd '/var/tmp/data' && bash -c 'echo ok'"
        );
    }

    #[test]
    fn test_config_from_yaml() {
        let config: SshConfig = serde_yaml::from_str("username: fedora\nport: 2222\n").unwrap();
        assert_eq!(config.port, 2222);
        assert_eq!(config.retries, 3);
        assert!(config.hard_reboot.is_none());
    }
}
