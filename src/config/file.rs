//! Plan file management
//!
//! Handles finding, loading, and validating plan files.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::GuestConfig;
use crate::executor::{Action, ExecuteStepData};
use crate::models::{CheckSpec, DiscoverPhase, Test};

/// Plan file locations (in order of precedence)
const PLAN_LOCATIONS: &[&str] = &[
    "./guestrun.yaml",
    "./guestrun.yml",
    "./.guestrun.yaml",
    "~/.config/guestrun/plan.yaml",
];

fn default_name() -> String {
    "/plan".to_string()
}

/// Single mapping or a list of mappings
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(item) => vec![item],
        OneOrMany::Many(items) => items,
    })
}

/// Full plan file structure
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanFile {
    /// Plan name, used in reports
    #[serde(default = "default_name")]
    pub name: String,

    /// Directory test paths are relative to, the plan file's directory by
    /// default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Execute step configuration, a mapping or a list of mappings
    #[serde(default, deserialize_with = "one_or_many")]
    pub execute: Vec<ExecuteStepData>,

    #[serde(default)]
    pub guests: Vec<GuestConfig>,

    #[serde(default)]
    pub discover: Vec<DiscoverPhase>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,

    /// Dimensions describing the environment tests run in
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, Vec<String>>,
}

impl Default for PlanFile {
    fn default() -> Self {
        Self {
            name: default_name(),
            root: None,
            execute: Vec::new(),
            guests: Vec::new(),
            discover: Vec::new(),
            actions: Vec::new(),
            context: BTreeMap::new(),
        }
    }
}

impl PlanFile {
    /// Find a plan file in standard locations
    pub fn find() -> Option<PathBuf> {
        PLAN_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load a plan from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;

        let mut plan: Self = if is_json_file(path) {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON plan: {}", path.display()))?
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML plan: {}", path.display()))?
        };

        if plan.root.is_none() {
            plan.root = path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .map(Path::to_path_buf);
        }

        plan.validate()
            .with_context(|| format!("Invalid plan file: {}", path.display()))?;
        Ok(plan)
    }

    /// Save the plan to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_json_file(path) {
            serde_json::to_string_pretty(self).context("Failed to serialize plan")?
        } else {
            serde_yaml::to_string(self).context("Failed to serialize plan")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write plan file: {}", path.display()))?;

        Ok(())
    }

    /// Validate the plan
    pub fn validate(&self) -> Result<()> {
        let mut guests = BTreeSet::new();
        for guest in &self.guests {
            if !guests.insert(guest.name()) {
                anyhow::bail!("Duplicate guest name '{}'", guest.name());
            }
        }

        let mut phases = BTreeSet::new();
        for phase in &self.discover {
            if phase.name.is_empty() {
                anyhow::bail!("Discover phase without a name");
            }
            if !phases.insert(phase.name.as_str()) {
                anyhow::bail!("Duplicate discover phase '{}'", phase.name);
            }

            for test in &phase.tests {
                if !test.name.starts_with('/') {
                    anyhow::bail!("Test name '{}' must start with '/'", test.name);
                }
                test.duration_limit().with_context(|| {
                    format!("Invalid duration '{}' of test '{}'", test.duration, test.name)
                })?;
            }
        }

        for data in &self.execute {
            if data.max_workers == 0 {
                anyhow::bail!("Execute step needs at least one worker");
            }
        }

        Ok(())
    }

    /// Generate an example plan
    pub fn example() -> Self {
        let mut smoke = Test::new("/tests/smoke", "uname -a");
        smoke.summary = Some("Basic sanity of the guest".to_string());

        let mut kernel = Test::new("/tests/kernel", "./run.sh");
        kernel.path = Some(PathBuf::from("/tests/kernel"));
        kernel.duration = "15m".to_string();
        kernel.check = vec![CheckSpec::new("dmesg")];
        kernel.restart_on_exit_code = vec![79];
        kernel.restart_max_count = 2;

        Self {
            name: "/plans/example".to_string(),
            root: None,
            execute: vec![ExecuteStepData::default()],
            guests: vec![GuestConfig::Local {
                name: "default-0".to_string(),
                role: None,
            }],
            discover: vec![DiscoverPhase::new("default-0")
                .with_test(smoke)
                .with_test(kernel)],
            actions: vec![Action::new("sync", "sync").with_order(60)],
            context: BTreeMap::from([(
                "distro".to_string(),
                vec!["fedora-40".to_string()],
            )]),
        }
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is JSON based on extension
fn is_json_file(path: &Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}
