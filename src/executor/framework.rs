//! Test frameworks
//!
//! A framework knows how a test reports its outcome: through the exit code
//! (`shell`) or through the journal left behind by the test (`beakerlib`).

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::error::ExecuteError;
use super::invocation::{TestInvocation, TEST_OUTPUT_FILENAME};
use crate::guest::{exit_code, CommandOutput};
use crate::models::{ResultOutcome, TestResult};

/// Interprets the outcome of a finished test
pub trait TestFramework: Send + Sync {
    fn name(&self) -> &'static str;

    /// Variables the framework needs exported to the test
    fn environment(&self, _invocation: &TestInvocation) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Produce results of the invocation.
    ///
    /// `results` are the results already reported by the test through the
    /// reporting helper.
    fn extract_results(
        &self,
        invocation: &TestInvocation,
        results: Vec<TestResult>,
        output: &CommandOutput,
    ) -> Result<Vec<TestResult>, ExecuteError>;
}

/// Look up a framework by name
pub fn framework_for(name: &str) -> Result<&'static dyn TestFramework, ExecuteError> {
    match name {
        "shell" => Ok(&ShellFramework),
        "beakerlib" => Ok(&BeakerlibFramework),
        other => Err(ExecuteError::Specification(format!(
            "Unsupported test framework '{other}'."
        ))),
    }
}

fn output_log(invocation: &TestInvocation) -> PathBuf {
    invocation.relative_path().join(TEST_OUTPUT_FILENAME)
}

/// Stamp results reported by the test with the invocation identity
fn claim(invocation: &TestInvocation, results: Vec<TestResult>) -> Vec<TestResult> {
    results
        .into_iter()
        .map(|mut result| {
            result.serial_number = invocation.test.serial_number;
            result.guest = invocation.guest_info();
            if result.log.is_empty() {
                result.log.push(output_log(invocation));
            }
            result
        })
        .collect()
}

/// Outcome given by the exit code alone
#[derive(Clone, Copy, Debug)]
pub struct ShellFramework;

impl TestFramework for ShellFramework {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn extract_results(
        &self,
        invocation: &TestInvocation,
        results: Vec<TestResult>,
        _output: &CommandOutput,
    ) -> Result<Vec<TestResult>, ExecuteError> {
        if !results.is_empty() {
            return Ok(claim(invocation, results));
        }

        let (outcome, note) = match invocation.return_code {
            Some(exit_code::SUCCESS) => (ResultOutcome::Pass, None),
            Some(exit_code::TIMEOUT) => (ResultOutcome::Error, Some("timeout")),
            Some(code) if exit_code::is_pidfile(code) => {
                (ResultOutcome::Error, Some("pidfile locking"))
            }
            Some(_) => (ResultOutcome::Fail, None),
            None => (ResultOutcome::Error, Some("test did not run")),
        };

        let mut result = invocation.result(outcome).with_log(output_log(invocation));
        if let Some(note) = note {
            result = result.with_note(note);
        }

        Ok(vec![result])
    }
}

/// Outcome read from the `TestResults` file of a beakerlib test
#[derive(Clone, Copy, Debug)]
pub struct BeakerlibFramework;

impl BeakerlibFramework {
    const RESULTS_FILE: &'static str = "TestResults";
    const JOURNAL_FILE: &'static str = "journal.txt";

    fn parse(content: &str) -> BTreeMap<String, String> {
        content
            .lines()
            .filter_map(|line| line.trim().split_once('='))
            .map(|(key, value)| {
                let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
                (key.trim().to_string(), value.to_string())
            })
            .collect()
    }
}

impl TestFramework for BeakerlibFramework {
    fn name(&self) -> &'static str {
        "beakerlib"
    }

    fn environment(&self, invocation: &TestInvocation) -> BTreeMap<String, String> {
        let mut environment = BTreeMap::new();
        if let Ok(test_data) = invocation.test_data_path() {
            environment.insert(
                "BEAKERLIB_DIR".to_string(),
                test_data.to_string_lossy().to_string(),
            );
        }
        environment
    }

    fn extract_results(
        &self,
        invocation: &TestInvocation,
        results: Vec<TestResult>,
        _output: &CommandOutput,
    ) -> Result<Vec<TestResult>, ExecuteError> {
        if !results.is_empty() {
            return Ok(claim(invocation, results));
        }

        let mut logs = vec![output_log(invocation)];
        let test_data = invocation.test_data_path()?;
        if test_data.join(Self::JOURNAL_FILE).exists() {
            logs.push(
                invocation
                    .relative_test_data_path()
                    .join(Self::JOURNAL_FILE),
            );
        }

        let timed_out = invocation.return_code == Some(exit_code::TIMEOUT);

        let (outcome, note) = match std::fs::read_to_string(test_data.join(Self::RESULTS_FILE)) {
            Err(_) => (
                ResultOutcome::Error,
                Some("beakerlib: TestResults FileError".to_string()),
            ),
            Ok(content) => {
                let values = Self::parse(&content);
                match (
                    values.get("TESTRESULT_RESULT_STRING"),
                    values.get("TESTRESULT_STATE"),
                ) {
                    (Some(result), Some(state)) => {
                        if state != "complete" {
                            let note = if timed_out {
                                "timeout".to_string()
                            } else {
                                format!("beakerlib: State '{state}'")
                            };
                            (ResultOutcome::Error, Some(note))
                        } else {
                            match ResultOutcome::from_name(result) {
                                Some(outcome) => (outcome, None),
                                None => (
                                    ResultOutcome::Error,
                                    Some(format!("beakerlib: Invalid result '{result}'")),
                                ),
                            }
                        }
                    }
                    _ => (
                        ResultOutcome::Error,
                        Some("beakerlib: Result/State missing".to_string()),
                    ),
                }
            }
        };

        let mut result = invocation.result(outcome);
        result.log = logs;
        if let Some(note) = note {
            result = result.with_note(note);
        }

        Ok(vec![result])
    }
}
