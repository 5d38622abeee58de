//! Configuration module
//!
//! Handles loading plan files and turning their guest entries into guests.

mod env;
mod file;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::guest::{Guest, LocalGuest, SshConfig, SshGuest};

pub use env::EnvConfig;
pub use file::PlanFile;

/// Guest entry of a plan file
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "how", rename_all = "lowercase")]
pub enum GuestConfig {
    /// Run tests on the orchestrator host
    Local {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },

    /// Run tests on a machine reachable over SSH
    Ssh {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        host: String,
        #[serde(default)]
        ssh: SshConfig,
    },
}

impl GuestConfig {
    pub fn name(&self) -> &str {
        match self {
            GuestConfig::Local { name, .. } | GuestConfig::Ssh { name, .. } => name,
        }
    }

    /// Build the guest; `workdir` is the step working directory mirrored to
    /// remote guests
    pub fn build(&self, workdir: &Path) -> Arc<dyn Guest> {
        match self {
            GuestConfig::Local { name, role } => {
                let mut guest = LocalGuest::new(name);
                if let Some(role) = role {
                    guest = guest.with_role(role);
                }
                Arc::new(guest)
            }
            GuestConfig::Ssh {
                name,
                role,
                host,
                ssh,
            } => {
                let mut guest = SshGuest::new(name, host, ssh.clone(), workdir)
                    .with_control_path(control_path(workdir, name));
                if let Some(role) = role {
                    guest = guest.with_role(role);
                }
                Arc::new(guest)
            }
        }
    }
}

fn control_path(workdir: &Path, name: &str) -> PathBuf {
    workdir
        .join("ssh-sockets")
        .join(format!("{}.socket", crate::utils::safe_name(name).replace('/', "-")))
}

/// Build all guests of the plan
pub fn build_guests(guests: &[GuestConfig], workdir: &Path) -> Vec<Arc<dyn Guest>> {
    guests.iter().map(|guest| guest.build(workdir)).collect()
}
