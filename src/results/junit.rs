//! JUnit XML report of the step's result set

use anyhow::{Context, Result};
use quick_junit::{NonSuccessKind, Property, Report, TestCase, TestCaseStatus, TestSuite};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::models::{ResultOutcome, TestResult};
use crate::utils::parse_formatted_duration;

/// Status of a test case for the given outcome
fn testcase_status(result: &TestResult) -> TestCaseStatus {
    let mut status = match result.result {
        ResultOutcome::Pass => return TestCaseStatus::success(),
        ResultOutcome::Fail => TestCaseStatus::non_success(NonSuccessKind::Failure),
        ResultOutcome::Error | ResultOutcome::Warn => {
            TestCaseStatus::non_success(NonSuccessKind::Error)
        }
        ResultOutcome::Skip | ResultOutcome::Info | ResultOutcome::Pending => {
            TestCaseStatus::skipped()
        }
    };

    status.set_type(result.result.to_string());
    if !result.note.is_empty() {
        status.set_message(result.note.join(", "));
    }
    status
}

fn duration(result: &TestResult) -> Option<Duration> {
    result
        .duration
        .as_deref()
        .and_then(parse_formatted_duration)
        .map(Duration::from_secs)
}

/// Build a report with one test suite holding every result.
///
/// With `include_output`, the first log of each result, read relative to
/// `workdir`, becomes the test case's system output.
pub fn junit_report(
    name: &str,
    results: &[TestResult],
    workdir: &Path,
    include_output: bool,
) -> Report {
    let mut suite = TestSuite::new(name);
    let mut total = Duration::ZERO;

    for result in results {
        let mut testcase = TestCase::new(result.name.clone(), testcase_status(result));
        testcase.set_classname(result.guest.name.clone());

        if let Some(duration) = duration(result) {
            testcase.set_time(duration);
            total += duration;
        }

        if include_output {
            if let Some(log) = result.log.first() {
                match std::fs::read(workdir.join(log)) {
                    Ok(content) => {
                        testcase.set_system_out_lossy(content);
                    }
                    Err(e) => debug!("Unable to read log {}: {}", log.display(), e),
                }
            }
        }

        suite.add_test_case(testcase);
    }

    suite.set_time(total);
    suite.add_property(Property::new("workdir", workdir.display().to_string()));

    let mut report = Report::new(name);
    report.set_time(total);
    report.add_test_suite(suite);
    report
}

/// Write the JUnit report to `path`
pub fn write_junit(
    name: &str,
    results: &[TestResult],
    workdir: &Path,
    path: &Path,
    include_output: bool,
) -> Result<()> {
    let report = junit_report(name, results, workdir, include_output);

    let file = File::create(path)
        .with_context(|| format!("Failed to create JUnit report {}", path.display()))?;
    report
        .serialize(BufWriter::new(file))
        .with_context(|| format!("Failed to write JUnit report {}", path.display()))?;

    info!("JUnit report written to {}", path.display());
    Ok(())
}
