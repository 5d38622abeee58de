//! Checks run around a test
//!
//! A check observes the guest before and after the test and reports its own
//! results, attached to the result standing for the test itself.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::error::ExecuteError;
use super::invocation::TestInvocation;
use crate::guest::ExecuteOptions;
use crate::models::{CheckEvent, CheckResult, ResultOutcome};
use crate::utils::{LogLevel, Stopwatch};

/// A check capability
#[async_trait]
pub trait Check: Send + Sync {
    fn how(&self) -> &'static str;

    async fn go(
        &self,
        event: CheckEvent,
        invocation: &mut TestInvocation,
        environment: &BTreeMap<String, String>,
    ) -> Result<Vec<CheckResult>, ExecuteError>;
}

/// Look up a check by its `how`
pub fn check_for(how: &str) -> Result<&'static dyn Check, ExecuteError> {
    match how {
        "dmesg" => Ok(&DmesgCheck),
        other => Err(ExecuteError::Specification(format!(
            "Unsupported test check '{other}'."
        ))),
    }
}

/// Run all enabled checks of the invocation's test for the given event
pub async fn run_checks_for_test(
    event: CheckEvent,
    invocation: &mut TestInvocation,
    environment: &BTreeMap<String, String>,
) -> Result<Vec<CheckResult>, ExecuteError> {
    let mut results = Vec::new();
    let checks = invocation.test.check.clone();

    for spec in checks.iter().filter(|spec| spec.enabled) {
        let check = check_for(&spec.how)?;

        let stopwatch = Stopwatch::start();
        let mut check_results = check.go(event, invocation, environment).await?;
        let timing = stopwatch.stop();

        for result in &mut check_results {
            result.event = event;
            result.start_time = Some(timing.formatted_start());
            result.end_time = Some(timing.formatted_end());
            result.duration = Some(timing.formatted_duration());
        }

        results.extend(check_results);
    }

    Ok(results)
}

/// Kernel ring buffer snapshots; fails when new messages report a kernel
/// problem
#[derive(Clone, Copy, Debug)]
pub struct DmesgCheck;

impl DmesgCheck {
    const NAME: &'static str = "dmesg";

    const FAILURE_PATTERNS: [&'static str; 5] = [
        "Call Trace:",
        "Kernel panic",
        "BUG:",
        "Oops:",
        " segfault at ",
    ];

    fn failures(lines: &[&str]) -> Vec<String> {
        lines
            .iter()
            .filter(|line| {
                Self::FAILURE_PATTERNS
                    .iter()
                    .any(|pattern| line.contains(pattern))
            })
            .map(|line| line.trim().to_string())
            .collect()
    }
}

#[async_trait]
impl Check for DmesgCheck {
    fn how(&self) -> &'static str {
        Self::NAME
    }

    async fn go(
        &self,
        event: CheckEvent,
        invocation: &mut TestInvocation,
        environment: &BTreeMap<String, String>,
    ) -> Result<Vec<CheckResult>, ExecuteError> {
        let filename = format!("dmesg-{event}.txt");
        let path = invocation.check_files_path()?.join(&filename);
        let log = invocation
            .relative_path()
            .join(super::invocation::CHECK_DATA)
            .join(&filename);

        let options = ExecuteOptions {
            env: environment.clone(),
            log: LogLevel::Trace,
            ..Default::default()
        };

        let output = match invocation.guest.execute("dmesg", &options, None).await {
            Ok(output) => output,
            Err(error) => {
                warn!("Failed to capture kernel messages: {}", error);
                std::fs::write(&path, error.output.combined())?;
                return Ok(vec![CheckResult::new(Self::NAME, ResultOutcome::Error, event)
                    .with_note(error.to_string())
                    .with_log(log)]);
            }
        };

        std::fs::write(&path, &output.stdout)?;
        let lines: Vec<&str> = output.stdout.lines().collect();

        let result = match event {
            CheckEvent::BeforeTest => {
                invocation
                    .check_data
                    .insert(Self::NAME.to_string(), serde_json::json!(lines.len()));
                CheckResult::new(Self::NAME, ResultOutcome::Pass, event)
            }
            CheckEvent::AfterTest => {
                let seen = invocation
                    .check_data
                    .get(Self::NAME)
                    .and_then(|value| value.as_u64())
                    .unwrap_or(0) as usize;
                // The buffer may have been cleared or rotated meanwhile.
                let fresh = if seen <= lines.len() {
                    &lines[seen..]
                } else {
                    &lines[..]
                };

                let failures = Self::failures(fresh);
                debug!(
                    "{} new kernel messages, {} failures",
                    fresh.len(),
                    failures.len()
                );

                if failures.is_empty() {
                    CheckResult::new(Self::NAME, ResultOutcome::Pass, event)
                } else {
                    let mut result = CheckResult::new(Self::NAME, ResultOutcome::Fail, event);
                    result.note = failures;
                    result
                }
            }
        };

        Ok(vec![result.with_log(log)])
    }
}
