//! Scripted guest for unit tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use super::{CommandOutput, ExecuteOptions, Guest, GuestError, ProcessHooks, RunError};
use crate::utils::Waiting;

/// Behaviour of a soft reboot request
#[derive(Clone, Debug)]
pub enum SoftReboot {
    /// Reboot happens, guest comes back or not
    Rebooted(bool),
    NotSupported,
    /// Reboot command fails with the given code
    Fails(i32),
}

#[derive(Debug)]
pub struct MockGuest {
    name: String,
    role: Option<String>,
    outputs: Mutex<VecDeque<Result<CommandOutput, RunError>>>,
    soft_reboot: SoftReboot,
    hard_reboot: bool,
    reconnect: bool,
    calls: Mutex<Vec<String>>,
}

impl MockGuest {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            role: None,
            outputs: Mutex::new(VecDeque::new()),
            soft_reboot: SoftReboot::Rebooted(true),
            hard_reboot: true,
            reconnect: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    pub fn with_soft_reboot(mut self, behaviour: SoftReboot) -> Self {
        self.soft_reboot = behaviour;
        self
    }

    pub fn with_hard_reboot(mut self, comes_back: bool) -> Self {
        self.hard_reboot = comes_back;
        self
    }

    pub fn with_reconnect(mut self, reconnects: bool) -> Self {
        self.reconnect = reconnects;
        self
    }

    /// Queue the outcome of the next `execute()` call
    pub fn push_output(&self, output: Result<CommandOutput, RunError>) {
        self.outputs.lock().unwrap().push_back(output);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl Guest for MockGuest {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    async fn execute(
        &self,
        command: &str,
        _options: &ExecuteOptions,
        _hooks: Option<&dyn ProcessHooks>,
    ) -> Result<CommandOutput, RunError> {
        self.record(format!("execute:{command}"));
        self.outputs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(CommandOutput::default()))
    }

    async fn reboot(
        &self,
        hard: bool,
        command: Option<&str>,
        _waiting: Waiting,
    ) -> Result<bool, GuestError> {
        if hard {
            self.record("reboot:hard");
            return Ok(self.hard_reboot);
        }

        self.record(format!("reboot:soft:{}", command.unwrap_or("reboot")));
        match &self.soft_reboot {
            SoftReboot::Rebooted(back) => Ok(*back),
            SoftReboot::NotSupported => Err(GuestError::RebootModeNotSupported),
            SoftReboot::Fails(code) => Err(RunError::new(
                command.unwrap_or("reboot"),
                *code,
                CommandOutput::default(),
            )
            .into()),
        }
    }

    async fn reconnect(&self) -> bool {
        self.record("reconnect");
        self.reconnect
    }

    async fn push(&self, _path: Option<&Path>) -> Result<(), GuestError> {
        self.record("push");
        Ok(())
    }
}
