//! Result extraction
//!
//! Turns files written by a test (custom results) or by the reporting
//! helper (report results) into canonical results.

use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::error::ExecuteError;
use super::framework::framework_for;
use super::invocation::{TestInvocation, TEST_OUTPUT_FILENAME};
use crate::guest::CommandOutput;
use crate::models::{RawResult, ResultInterpret, ResultOutcome, TestResult};

/// Raw results loaded from a results file
#[derive(Debug, Default)]
pub struct ResultCollection {
    pub filepaths: Vec<PathBuf>,
    pub file_exists: bool,
    pub results: Vec<Value>,
}

impl ResultCollection {
    fn new(filepaths: Vec<PathBuf>) -> Self {
        Self {
            filepaths,
            ..Default::default()
        }
    }

    /// Check raw results against the result record format.
    ///
    /// Violations are reported as warnings, returns their count.
    pub fn validate(&self) -> usize {
        let mut violations = 0;

        for (index, raw) in self.results.iter().enumerate() {
            if let Err(e) = serde_json::from_value::<RawResult>(raw.clone()) {
                warn!("Result format violation: result #{}: {}", index + 1, e);
                violations += 1;
            }
        }

        if violations == 0 {
            debug!("Results successfully validated.");
        }

        violations
    }
}

/// Parse a YAML or JSON document holding a list of records
fn parse_list(path: &Path, content: &str, yaml: bool) -> Result<Vec<Value>, ExecuteError> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let malformed = |message: String| ExecuteError::Malformed {
        path: path.to_path_buf(),
        message,
    };

    let document: Value = if yaml {
        serde_yaml::from_str(content).map_err(|e| malformed(e.to_string()))?
    } else {
        serde_json::from_str(content).map_err(|e| malformed(e.to_string()))?
    };

    match document {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items),
        _ => Err(malformed("expected a list of results".to_string())),
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Load `results.yaml` or `results.json` written by the test
pub fn load_custom_results(invocation: &TestInvocation) -> Result<ResultCollection, ExecuteError> {
    let test_data = invocation.test_data_path()?;
    let yaml_path = test_data.join("results.yaml");
    let json_path = test_data.join("results.json");

    let mut collection = ResultCollection::new(vec![yaml_path.clone(), json_path.clone()]);

    for path in [yaml_path, json_path] {
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            collection.results = parse_list(&path, &content, is_yaml(&path))?;
            collection.file_exists = true;
            break;
        }
    }

    Ok(collection)
}

/// Load results recorded by the reporting helper
pub fn load_report_results(invocation: &TestInvocation) -> Result<ResultCollection, ExecuteError> {
    let path = invocation.report_results_path();
    let mut collection = ResultCollection::new(vec![path.clone()]);

    if !path.exists() {
        return Ok(collection);
    }

    let content = std::fs::read_to_string(&path)?;
    collection.file_exists = true;
    collection.results = parse_list(&path, &content, true)?;

    Ok(collection)
}

fn from_raw(raw: Value, path: &Path) -> Result<TestResult, ExecuteError> {
    TestResult::from_serialized(raw).map_err(|e| ExecuteError::Malformed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Treat raw results as partial results of the invocation's test
pub fn process_partials(
    invocation: &TestInvocation,
    results: Vec<Value>,
    source: &Path,
    default_log: Option<&Path>,
) -> Result<Vec<TestResult>, ExecuteError> {
    let test = &invocation.test;
    let relative_test_data = invocation.relative_test_data_path();
    let mut partials = Vec::with_capacity(results.len());

    for raw in results {
        let mut partial = from_raw(raw, source)?;

        // Name '/' stands for the test itself
        if partial.name == "/" {
            partial.name = test.name.clone();
        } else {
            if !partial.name.starts_with('/') {
                warn!(
                    "Custom test result name '{}' should start with '/'.",
                    partial.name
                );
                partial
                    .note
                    .push("custom test result name should start with '/'".to_string());
                partial.name = format!("/{}", partial.name);
            }
            partial.name = format!("{}{}", test.name, partial.name);
        }

        partial.log = partial
            .log
            .iter()
            .map(|log| relative_test_data.join(log))
            .collect();

        if partial.log.is_empty() {
            if let Some(default_log) = default_log {
                partial.log.push(default_log.to_path_buf());
            }
        }

        partial.serial_number = test.serial_number;
        partial.guest = invocation.guest_info();

        if partial.name == test.name {
            partial.start_time = invocation.start_time.clone();
            partial.end_time = invocation.end_time.clone();
            partial.duration = invocation.real_duration.clone();
            partial.context = (*invocation.context).clone();
        }

        partials.push(partial);
    }

    Ok(partials)
}

/// Results the test wrote on its own
pub fn extract_custom_results(invocation: &TestInvocation) -> Result<Vec<TestResult>, ExecuteError> {
    let collection = load_custom_results(invocation)?;

    if !collection.file_exists {
        let test_data = invocation.test_data_path()?;
        return Ok(vec![invocation.result(ResultOutcome::Error).with_note(format!(
            "custom results file not found in '{}'",
            test_data.display()
        ))]);
    }

    if collection.results.is_empty() {
        return Ok(vec![invocation
            .result(ResultOutcome::Error)
            .with_note("no custom results were provided")]);
    }

    collection.validate();

    let source = source_path(&collection);
    process_partials(invocation, collection.results, &source, None)
}

fn source_path(collection: &ResultCollection) -> PathBuf {
    collection
        .filepaths
        .iter()
        .find(|path| path.exists())
        .or_else(|| collection.filepaths.first())
        .cloned()
        .unwrap_or_default()
}

/// Load report results, failing when the file exists but holds nothing
fn load_declared_report_results(
    invocation: &TestInvocation,
) -> Result<Option<ResultCollection>, ExecuteError> {
    let collection = load_report_results(invocation)?;
    let path = source_path(&collection);

    if !collection.file_exists {
        debug!("Report results file '{}' does not exist.", path.display());
        return Ok(None);
    }

    debug!("Report results file '{}' detected.", path.display());

    if collection.results.is_empty() {
        return Err(ExecuteError::Execute(format!(
            "Test results not found in result file '{}'.",
            path.display()
        )));
    }

    collection.validate();
    Ok(Some(collection))
}

/// Results recorded by the reporting helper, each one standalone
pub fn extract_report_results(invocation: &TestInvocation) -> Result<Vec<TestResult>, ExecuteError> {
    let Some(collection) = load_declared_report_results(invocation)? else {
        return Ok(Vec::new());
    };

    let path = source_path(&collection);
    let relative_test_data = invocation.relative_test_data_path();

    collection
        .results
        .into_iter()
        .map(|raw| {
            let mut result = from_raw(raw, &path)?;
            result.log = result
                .log
                .iter()
                .map(|log| relative_test_data.join(log))
                .collect();
            Ok(result)
        })
        .collect()
}

/// Report results turned into partial results of the test
pub fn extract_restraint_results(
    invocation: &TestInvocation,
    default_log: &Path,
) -> Result<Vec<TestResult>, ExecuteError> {
    let Some(collection) = load_declared_report_results(invocation)? else {
        return Ok(Vec::new());
    };

    let path = source_path(&collection);
    process_partials(invocation, collection.results, &path, Some(default_log))
}

/// Extract results of a finished invocation according to its test's
/// result interpretation
pub fn extract_results(
    invocation: &TestInvocation,
    output: &CommandOutput,
) -> Result<Vec<TestResult>, ExecuteError> {
    debug!("Extract results of '{}'.", invocation.test.name);

    match invocation.test.result {
        ResultInterpret::Custom => extract_custom_results(invocation),
        ResultInterpret::Restraint => {
            let default_log = invocation.relative_path().join(TEST_OUTPUT_FILENAME);
            extract_restraint_results(invocation, &default_log)
        }
        ResultInterpret::Respect => {
            let results = if invocation.report_results_path().exists() {
                extract_report_results(invocation)?
            } else {
                Vec::new()
            };

            framework_for(&invocation.test.framework)?.extract_results(invocation, results, output)
        }
    }
}
