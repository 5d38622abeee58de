//! Result models
//!
//! Canonical test and check results, their outcomes, and the raw record
//! format tests use when reporting their own results.

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Outcome of a test or check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResultOutcome {
    Pass,
    Fail,
    Info,
    Warn,
    Error,
    Skip,
    /// Placeholder for a test which has not been executed yet
    Pending,
}

impl ResultOutcome {
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pass" => Some(ResultOutcome::Pass),
            "fail" => Some(ResultOutcome::Fail),
            "info" => Some(ResultOutcome::Info),
            "warn" => Some(ResultOutcome::Warn),
            "error" => Some(ResultOutcome::Error),
            "skip" => Some(ResultOutcome::Skip),
            "pending" => Some(ResultOutcome::Pending),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            ResultOutcome::Pass => "✓",
            ResultOutcome::Fail => "✗",
            ResultOutcome::Info => "i",
            ResultOutcome::Warn => "~",
            ResultOutcome::Error => "!",
            ResultOutcome::Skip => "○",
            ResultOutcome::Pending => "…",
        }
    }

    /// Outcomes which make `exit-first` stop the execution
    pub fn is_failure(&self) -> bool {
        matches!(self, ResultOutcome::Fail | ResultOutcome::Error)
    }
}

impl fmt::Display for ResultOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultOutcome::Pass => write!(f, "PASS"),
            ResultOutcome::Fail => write!(f, "FAIL"),
            ResultOutcome::Info => write!(f, "INFO"),
            ResultOutcome::Warn => write!(f, "WARN"),
            ResultOutcome::Error => write!(f, "ERROR"),
            ResultOutcome::Skip => write!(f, "SKIP"),
            ResultOutcome::Pending => write!(f, "PENDING"),
        }
    }
}

/// How results of a test should be interpreted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultInterpret {
    /// Results come from the test framework
    #[default]
    Respect,
    /// The test writes its own `results.yaml` or `results.json`
    Custom,
    /// Every reported result becomes a standalone result
    Restraint,
}

/// Moment a check runs at
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum CheckEvent {
    BeforeTest,
    AfterTest,
}

impl fmt::Display for CheckEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckEvent::BeforeTest => write!(f, "before-test"),
            CheckEvent::AfterTest => write!(f, "after-test"),
        }
    }
}

/// Guest a result was produced on
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResultGuestData {
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
}

impl Default for ResultGuestData {
    fn default() -> Self {
        Self {
            name: "default-0".to_string(),
            role: None,
        }
    }
}

impl ResultGuestData {
    pub fn new(name: impl Into<String>, role: Option<String>) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }
}

/// Identifier of the metadata node a test came from
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FmfId {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Result of a single check
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CheckResult {
    pub name: String,
    pub result: ResultOutcome,
    pub event: CheckEvent,
    #[serde(default, deserialize_with = "one_or_many")]
    pub note: Vec<String>,
    #[serde(default)]
    pub log: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

impl CheckResult {
    pub fn new(name: impl Into<String>, result: ResultOutcome, event: CheckEvent) -> Self {
        Self {
            name: name.into(),
            result,
            event,
            note: Vec::new(),
            log: Vec::new(),
            start_time: None,
            end_time: None,
            duration: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note.push(note.into());
        self
    }

    pub fn with_log(mut self, log: impl Into<PathBuf>) -> Self {
        self.log.push(log.into());
        self
    }
}

/// Identity of a result within the step's result set
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResultKey {
    pub serial_number: u32,
    pub name: String,
    pub guest: String,
}

/// Canonical result of a test
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestResult {
    pub name: String,
    #[serde(default)]
    pub serial_number: u32,
    pub result: ResultOutcome,
    #[serde(default, deserialize_with = "one_or_many")]
    pub note: Vec<String>,
    /// Log paths, relative to the execute step working directory
    #[serde(default)]
    pub log: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ids: BTreeMap<String, Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fmf_id: Option<FmfId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub guest: ResultGuestData,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub check: Vec<CheckResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_path: Option<PathBuf>,
}

impl TestResult {
    pub fn new(name: impl Into<String>, result: ResultOutcome) -> Self {
        Self {
            name: name.into(),
            serial_number: 0,
            result,
            note: Vec::new(),
            log: Vec::new(),
            start_time: None,
            end_time: None,
            duration: None,
            ids: BTreeMap::new(),
            fmf_id: None,
            context: BTreeMap::new(),
            guest: ResultGuestData::default(),
            check: Vec::new(),
            data_path: None,
        }
    }

    /// Placeholder for a test not executed yet
    pub fn pending(name: impl Into<String>, serial_number: u32, guest: ResultGuestData) -> Self {
        Self::new(name, ResultOutcome::Pending)
            .with_serial_number(serial_number)
            .with_guest(guest)
    }

    /// Build a result from a raw, untyped record
    pub fn from_serialized(raw: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(raw)
    }

    pub fn with_serial_number(mut self, serial_number: u32) -> Self {
        self.serial_number = serial_number;
        self
    }

    pub fn with_guest(mut self, guest: ResultGuestData) -> Self {
        self.guest = guest;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note.push(note.into());
        self
    }

    pub fn with_log(mut self, log: impl Into<PathBuf>) -> Self {
        self.log.push(log.into());
        self
    }

    pub fn key(&self) -> ResultKey {
        ResultKey {
            serial_number: self.serial_number,
            name: self.name.clone(),
            guest: self.guest.name.clone(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.result == ResultOutcome::Pending
    }

    /// Whether this result stands in for a pending parent of `other`
    ///
    /// Matching is a plain string prefix on names, limited to results of the
    /// same test instance on the same guest.
    pub fn is_pending_parent_of(&self, other: &TestResult) -> bool {
        self.is_pending()
            && self.name != other.name
            && other.name.starts_with(&self.name)
            && self.guest.name == other.guest.name
            && self.serial_number == other.serial_number
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} ({})",
            self.result.symbol(),
            self.result,
            self.name,
            self.guest.name
        )?;
        if let Some(duration) = &self.duration {
            write!(f, " [{duration}]")?;
        }
        if !self.note.is_empty() {
            write!(f, " - {}", self.note.join(", "))?;
        }
        Ok(())
    }
}

/// Raw result record as written by tests and the reporting helper.
///
/// Used to validate loaded records and to publish their schema; loaded
/// records are converted with [`TestResult::from_serialized`].
#[derive(Clone, Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
#[allow(dead_code)]
pub struct RawResult {
    pub name: String,
    pub result: ResultOutcome,
    #[serde(default)]
    pub note: Option<RawNote>,
    #[serde(default)]
    pub log: Vec<String>,
    #[serde(default)]
    pub serial_number: Option<u32>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub ids: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub fmf_id: Option<FmfId>,
    #[serde(default)]
    pub context: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub guest: Option<ResultGuestData>,
    #[serde(default)]
    pub check: Vec<serde_json::Value>,
    #[serde(default)]
    pub data_path: Option<String>,
}

/// Note given either as a single string or a list of strings
#[derive(Clone, Debug, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum RawNote {
    One(String),
    Many(Vec<String>),
}

impl RawNote {
    fn into_vec(self) -> Vec<String> {
        match self {
            RawNote::One(note) => vec![note],
            RawNote::Many(notes) => notes,
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let note: Option<RawNote> = Option::deserialize(deserializer)?;
    Ok(note.map(RawNote::into_vec).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_from_name() {
        assert_eq!(ResultOutcome::from_name("PASS"), Some(ResultOutcome::Pass));
        assert_eq!(
            ResultOutcome::from_name("pending"),
            Some(ResultOutcome::Pending)
        );
        assert_eq!(ResultOutcome::from_name("maybe"), None);
    }

    #[test]
    fn test_from_serialized_accepts_string_note() {
        let result = TestResult::from_serialized(json!({
            "name": "/sub",
            "result": "fail",
            "note": "broken",
            "log": ["a.log"],
        }))
        .unwrap();

        assert_eq!(result.name, "/sub");
        assert_eq!(result.result, ResultOutcome::Fail);
        assert_eq!(result.note, vec!["broken".to_string()]);
        assert_eq!(result.log, vec![PathBuf::from("a.log")]);
        assert_eq!(result.guest.name, "default-0");
    }

    #[test]
    fn test_from_serialized_kebab_keys() {
        let result = TestResult::from_serialized(json!({
            "name": "/t",
            "result": "pass",
            "serial-number": 7,
            "start-time": "2024-01-01T00:00:00+00:00",
            "guest": {"name": "client", "role": "clients"},
        }))
        .unwrap();

        assert_eq!(result.serial_number, 7);
        assert_eq!(result.start_time.as_deref(), Some("2024-01-01T00:00:00+00:00"));
        assert_eq!(result.guest.role.as_deref(), Some("clients"));
    }

    #[test]
    fn test_pending_parent_matching() {
        let guest = ResultGuestData::new("g", None);
        let parent = TestResult::pending("/test", 1, guest.clone());
        let child = TestResult::new("/test/sub", ResultOutcome::Pass)
            .with_serial_number(1)
            .with_guest(guest.clone());
        let other_serial = child.clone().with_serial_number(2);
        let other_guest = child.clone().with_guest(ResultGuestData::new("h", None));

        assert!(parent.is_pending_parent_of(&child));
        assert!(!parent.is_pending_parent_of(&other_serial));
        assert!(!parent.is_pending_parent_of(&other_guest));
        assert!(!parent.is_pending_parent_of(&parent.clone()));
        assert!(!child.is_pending_parent_of(&parent));
    }

    #[test]
    fn test_raw_result_rejects_unknown_keys() {
        let raw: Result<RawResult, _> = serde_json::from_value(json!({
            "name": "/x",
            "result": "pass",
            "bogus": 1,
        }));
        assert!(raw.is_err());
    }

    #[test]
    fn test_result_key() {
        let result = TestResult::new("/t", ResultOutcome::Pass)
            .with_serial_number(3)
            .with_guest(ResultGuestData::new("guest", None));
        let key = result.key();
        assert_eq!(key.serial_number, 3);
        assert_eq!(key.name, "/t");
        assert_eq!(key.guest, "guest");
    }
}
