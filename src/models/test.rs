//! Test metadata models
//!
//! Defines discovered tests and the discover phases grouping them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::result::{FmfId, ResultInterpret};
use crate::utils::safe_name;

/// Duration of a test which does not declare one
pub const DEFAULT_TEST_DURATION: &str = "5m";

/// How many times a test may be restarted by default
pub const DEFAULT_TEST_RESTART_LIMIT: u32 = 1;

/// Framework used when a test does not name one
pub const DEFAULT_FRAMEWORK: &str = "shell";

fn default_framework() -> String {
    DEFAULT_FRAMEWORK.to_string()
}

fn default_duration() -> String {
    DEFAULT_TEST_DURATION.to_string()
}

fn default_restart_max_count() -> u32 {
    DEFAULT_TEST_RESTART_LIMIT
}

fn default_true() -> bool {
    true
}

/// A check attached to a test
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSpec {
    pub how: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl CheckSpec {
    pub fn new(how: impl Into<String>) -> Self {
        Self {
            how: how.into(),
            enabled: true,
        }
    }
}

/// A discovered test
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Test {
    /// Test name, e.g. `/tests/core/basic`
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Shell script running the test
    #[serde(default)]
    pub test: String,

    /// Directory the test runs in, relative to the plan root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default = "default_framework")]
    pub framework: String,

    /// Maximum duration, e.g. `5m` or `1h 30m`
    #[serde(default = "default_duration")]
    pub duration: String,

    #[serde(default)]
    pub result: ResultInterpret,

    /// Guest names or roles the test is limited to
    #[serde(default, rename = "where")]
    pub where_: Vec<String>,

    #[serde(default)]
    pub check: Vec<CheckSpec>,

    #[serde(default)]
    pub restart_on_exit_code: Vec<i32>,

    #[serde(default = "default_restart_max_count")]
    pub restart_max_count: u32,

    #[serde(default)]
    pub restart_with_reboot: bool,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub tty: bool,

    /// Run-scoped identifier, assigned by discovery
    #[serde(default)]
    pub serial_number: u32,
}

impl Test {
    pub fn new(name: impl Into<String>, test: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            summary: None,
            test: test.into(),
            path: None,
            framework: default_framework(),
            duration: default_duration(),
            result: ResultInterpret::default(),
            where_: Vec::new(),
            check: Vec::new(),
            restart_on_exit_code: Vec::new(),
            restart_max_count: DEFAULT_TEST_RESTART_LIMIT,
            restart_with_reboot: false,
            environment: BTreeMap::new(),
            enabled: true,
            id: None,
            tty: false,
            serial_number: 0,
        }
    }

    pub fn with_serial_number(mut self, serial_number: u32) -> Self {
        self.serial_number = serial_number;
        self
    }

    pub fn with_result(mut self, result: ResultInterpret) -> Self {
        self.result = result;
        self
    }

    pub fn with_framework(mut self, framework: impl Into<String>) -> Self {
        self.framework = framework.into();
        self
    }

    pub fn with_where(mut self, destination: impl Into<String>) -> Self {
        self.where_.push(destination.into());
        self
    }

    pub fn with_restart(mut self, exit_codes: Vec<i32>, max_count: u32, reboot: bool) -> Self {
        self.restart_on_exit_code = exit_codes;
        self.restart_max_count = max_count;
        self.restart_with_reboot = reboot;
        self
    }

    pub fn safe_name(&self) -> String {
        safe_name(&self.name)
    }

    /// Parse the declared duration
    pub fn duration_limit(&self) -> Result<Duration, humantime::DurationError> {
        humantime::parse_duration(&self.duration)
    }

    pub fn fmf_id(&self) -> FmfId {
        FmfId {
            name: Some(self.name.clone()),
            path: self.path.as_ref().map(|p| p.display().to_string()),
            ..Default::default()
        }
    }

    /// Check if the test is enabled on a guest with the given name and role
    pub fn enabled_on_guest(&self, name: &str, role: Option<&str>) -> bool {
        matches_where(&self.where_, name, role)
    }
}

impl fmt::Display for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A test together with the discover phase it came from
#[derive(Clone, Debug)]
pub struct TestOrigin {
    pub phase: String,
    pub test: Arc<Test>,
}

/// A named group of tests sharing enablement rules
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscoverPhase {
    pub name: String,

    /// Whether the phase is enabled at all
    #[serde(default = "default_true")]
    pub when: bool,

    /// Guest names or roles the phase is limited to
    #[serde(default, rename = "where")]
    pub where_: Vec<String>,

    #[serde(default)]
    pub tests: Vec<Test>,
}

impl DiscoverPhase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            when: true,
            where_: Vec::new(),
            tests: Vec::new(),
        }
    }

    pub fn with_test(mut self, test: Test) -> Self {
        self.tests.push(test);
        self
    }

    pub fn enabled_by_when(&self) -> bool {
        self.when
    }

    pub fn enabled_on_guest(&self, name: &str, role: Option<&str>) -> bool {
        matches_where(&self.where_, name, role)
    }
}

fn matches_where(destinations: &[String], name: &str, role: Option<&str>) -> bool {
    if destinations.is_empty() {
        return true;
    }

    destinations
        .iter()
        .any(|destination| destination == name || Some(destination.as_str()) == role)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_yaml() {
        let test: Test = serde_yaml::from_str("name: /t\ntest: ./run.sh\n").unwrap();
        assert_eq!(test.framework, "shell");
        assert_eq!(test.duration, "5m");
        assert_eq!(test.restart_max_count, 1);
        assert_eq!(test.result, ResultInterpret::Respect);
        assert!(test.enabled);
    }

    #[test]
    fn test_kebab_case_keys() {
        let test: Test = serde_yaml::from_str(
            "name: /t\nrestart-on-exit-code: [79]\nrestart-max-count: 3\nrestart-with-reboot: true\nresult: custom\n",
        )
        .unwrap();
        assert_eq!(test.restart_on_exit_code, vec![79]);
        assert_eq!(test.restart_max_count, 3);
        assert!(test.restart_with_reboot);
        assert_eq!(test.result, ResultInterpret::Custom);
    }

    #[test]
    fn test_duration_limit() {
        let mut test = Test::new("/t", "true");
        assert_eq!(test.duration_limit().unwrap(), Duration::from_secs(300));
        test.duration = "1h 30m".to_string();
        assert_eq!(test.duration_limit().unwrap(), Duration::from_secs(5400));
        test.duration = "forever".to_string();
        assert!(test.duration_limit().is_err());
    }

    #[test]
    fn test_enabled_on_guest() {
        let test = Test::new("/t", "true").with_where("server");
        assert!(test.enabled_on_guest("server", None));
        assert!(test.enabled_on_guest("guest-1", Some("server")));
        assert!(!test.enabled_on_guest("client", Some("clients")));
        assert!(Test::new("/t", "true").enabled_on_guest("anything", None));
    }
}
