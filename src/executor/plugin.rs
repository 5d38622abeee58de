//! Execute plugins
//!
//! An execute plugin runs the tests of one discover phase on one guest. The
//! method is selected by the `how` key of the execute step data.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, Instrument};

use super::checks::run_checks_for_test;
use super::error::ExecuteError;
use super::extract::extract_results;
use super::framework::framework_for;
use super::invocation::{TestInvocation, TEST_METADATA_FILENAME};
use crate::discover::Discover;
use crate::guest::{exit_code, Guest};
use crate::models::{CheckEvent, TestOrigin, TestResult};
use crate::utils::{InterruptRegistry, LogLevel};

/// Method used when the step data names none
pub const DEFAULT_HOW: &str = "tmt";

/// Environment variable turning `ignore_duration` on by default
pub const IGNORE_DURATION_ENV: &str = "GUESTRUN_IGNORE_DURATION";

fn default_how() -> String {
    DEFAULT_HOW.to_string()
}

fn default_ignore_duration() -> bool {
    std::env::var(IGNORE_DURATION_ENV).is_ok_and(|value| value == "1" || value == "true")
}

fn default_max_workers() -> usize {
    4
}

/// Configuration of the execute step
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExecuteStepData {
    #[serde(default = "default_how")]
    pub how: String,

    /// Run tests without their duration limit
    #[serde(default = "default_ignore_duration")]
    pub ignore_duration: bool,

    /// Stop after the first failed test
    #[serde(default)]
    pub exit_first: bool,

    /// Guests running tests at the same time
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for ExecuteStepData {
    fn default() -> Self {
        Self {
            how: default_how(),
            ignore_duration: default_ignore_duration(),
            exit_first: false,
            max_workers: default_max_workers(),
        }
    }
}

/// Everything plugins share within one execute step
pub struct ExecutionContext {
    /// Execute step working directory
    pub workdir: PathBuf,
    /// Directory test paths are relative to
    pub root: PathBuf,
    pub discover: Arc<dyn Discover>,
    pub context: Arc<BTreeMap<String, Vec<String>>>,
    pub interrupts: &'static InterruptRegistry,
}

/// What running a discover phase on a guest produced
#[derive(Debug, Default)]
pub struct PhaseRun {
    pub results: Vec<TestResult>,
    /// Set when the run stopped early
    pub error: Option<ExecuteError>,
}

impl PhaseRun {
    fn failed(results: Vec<TestResult>, error: ExecuteError) -> Self {
        Self {
            results,
            error: Some(error),
        }
    }
}

/// An execute method
#[async_trait]
pub trait ExecutePlugin: Send + Sync {
    fn how(&self) -> &str;

    fn data(&self) -> &ExecuteStepData;

    /// Run the enabled tests of `discover_phase` on `guest`
    async fn go(&self, discover_phase: &str, guest: Arc<dyn Guest>) -> PhaseRun;
}

type PluginConstructor = fn(ExecuteStepData, Arc<ExecutionContext>) -> Arc<dyn ExecutePlugin>;

/// Execute methods known by name
pub struct PluginRegistry {
    methods: BTreeMap<&'static str, PluginConstructor>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        let mut registry = Self {
            methods: BTreeMap::new(),
        };
        registry.register(DEFAULT_HOW, |data, context| {
            Arc::new(InternalExecutor::new(data, context))
        });
        registry
    }
}

impl PluginRegistry {
    pub fn register(&mut self, how: &'static str, constructor: PluginConstructor) {
        self.methods.insert(how, constructor);
    }

    pub fn methods(&self) -> impl Iterator<Item = &&'static str> {
        self.methods.keys()
    }

    /// Find a method by its exact name or an unambiguous prefix
    pub fn resolve(&self, how: &str) -> Result<&'static str, ExecuteError> {
        if let Some((name, _)) = self.methods.get_key_value(how) {
            return Ok(*name);
        }

        let candidates: Vec<&'static str> = self
            .methods
            .keys()
            .copied()
            .filter(|name| name.starts_with(how))
            .collect();

        match candidates.as_slice() {
            [name] => Ok(*name),
            [] => Err(ExecuteError::Specification(format!(
                "Unsupported execute method '{how}'."
            ))),
            _ => Err(ExecuteError::Specification(format!(
                "Execute method '{how}' is ambiguous, matches {}.",
                candidates.join(", ")
            ))),
        }
    }

    /// Build the plugin for the given step data
    pub fn delegate(
        &self,
        data: ExecuteStepData,
        context: Arc<ExecutionContext>,
    ) -> Result<Arc<dyn ExecutePlugin>, ExecuteError> {
        let name = self.resolve(&data.how)?;
        let constructor = self.methods[name];
        Ok(constructor(data, context))
    }
}

/// Built-in executor running each test through its shell script
pub struct InternalExecutor {
    data: ExecuteStepData,
    context: Arc<ExecutionContext>,
}

impl InternalExecutor {
    pub fn new(data: ExecuteStepData, context: Arc<ExecutionContext>) -> Self {
        Self { data, context }
    }

    /// Create invocations of the phase's tests enabled on the guest and
    /// write their metadata
    fn prepare_tests(
        &self,
        discover_phase: &str,
        guest: &Arc<dyn Guest>,
    ) -> Result<Vec<TestInvocation>, ExecuteError> {
        let tests: Vec<TestOrigin> = self
            .context
            .discover
            .tests(Some(discover_phase), true)
            .into_iter()
            .filter(|origin| origin.test.enabled_on_guest(guest.name(), guest.role()))
            .collect();

        let mut invocations = Vec::with_capacity(tests.len());

        for origin in tests {
            let invocation = TestInvocation::new(
                &self.context.workdir,
                origin.phase.clone(),
                origin.test.clone(),
                guest.clone(),
            )
            .with_context(self.context.context.clone())
            .with_interrupts(self.context.interrupts);

            let mut metadata = serde_yaml::to_value(origin.test.as_ref())?;
            if let serde_yaml::Value::Mapping(mapping) = &mut metadata {
                mapping.insert(
                    "context".into(),
                    serde_yaml::to_value(self.context.context.as_ref())?,
                );
            }
            std::fs::write(
                invocation.path()?.join(TEST_METADATA_FILENAME),
                serde_yaml::to_string(&metadata)?,
            )?;

            invocations.push(invocation);
        }

        Ok(invocations)
    }

    fn environment(&self, invocation: &TestInvocation) -> Result<BTreeMap<String, String>, ExecuteError> {
        let test = &invocation.test;
        let path = |path: PathBuf| path.to_string_lossy().to_string();

        let mut environment = test.environment.clone();
        environment.extend(framework_for(&test.framework)?.environment(invocation));
        environment.extend([
            ("TEST_DATA".to_string(), path(invocation.test_data_path()?)),
            ("TEST_NAME".to_string(), test.name.clone()),
            (
                "TEST_SERIAL_NUMBER".to_string(),
                test.serial_number.to_string(),
            ),
            (
                "REBOOT_COUNT".to_string(),
                invocation.reboot_count().to_string(),
            ),
            (
                "RESTART_COUNT".to_string(),
                invocation.restart_count().to_string(),
            ),
            (
                "REBOOT_REQUEST_FILE".to_string(),
                path(invocation.reboot_request_path()),
            ),
            (
                "ABORT_REQUEST_FILE".to_string(),
                path(invocation.abort_request_path()),
            ),
            (
                "REPORT_RESULTS_FILE".to_string(),
                path(invocation.report_results_path()),
            ),
        ]);

        Ok(environment)
    }

    fn working_directory(&self, invocation: &TestInvocation) -> PathBuf {
        match &invocation.test.path {
            Some(path) => self.context.root.join(path.strip_prefix("/").unwrap_or(path)),
            None => self.context.root.clone(),
        }
    }

    /// Run the test once: checks, the test itself, result extraction
    async fn execute(&self, invocation: &mut TestInvocation) -> Result<(), ExecuteError> {
        let test = invocation.test.clone();
        let environment = self.environment(invocation)?;

        invocation.check_results =
            run_checks_for_test(CheckEvent::BeforeTest, invocation, &environment).await?;

        let timeout = if self.data.ignore_duration {
            None
        } else {
            Some(test.duration_limit().map_err(|e| {
                ExecuteError::Specification(format!(
                    "Invalid duration '{}' of test '{}': {}",
                    test.duration, test.name, e
                ))
            })?)
        };

        let cwd = self.working_directory(invocation);
        let output = invocation
            .invoke_test(
                &test.test,
                Some(&cwd),
                environment.clone(),
                LogLevel::Debug,
                false,
                timeout,
            )
            .await;

        let output_path = invocation.output_path()?;
        std::fs::write(&output_path, output.combined())?;
        if invocation.return_code == Some(exit_code::TIMEOUT) {
            timeout_hint(&output_path, &test.duration)?;
        }

        let mut results = extract_results(invocation, &output)?;

        if invocation.is_guest_healthy() {
            let after =
                run_checks_for_test(CheckEvent::AfterTest, invocation, &environment).await?;
            invocation.check_results.extend(after);
        } else {
            debug!("Skipping checks after test, guest is not healthy.");
        }

        for result in results.iter_mut().filter(|r| r.name == test.name) {
            result.check = invocation.check_results.clone();
        }

        invocation.results = results;
        Ok(())
    }

    /// Run the test, repeating it while it asks for a restart or a reboot
    async fn run_test(&self, invocation: &mut TestInvocation) -> Result<(), ExecuteError> {
        loop {
            self.execute(invocation).await?;

            if invocation.handle_restart().await? {
                continue;
            }

            if invocation.handle_reboot().await? {
                continue;
            }

            return Ok(());
        }
    }
}

/// Append a hint about the exceeded duration to the test output
fn timeout_hint(output_path: &Path, duration: &str) -> std::io::Result<()> {
    use std::io::Write;

    let mut file = std::fs::OpenOptions::new().append(true).open(output_path)?;
    write!(
        file,
        "\nMaximum test time '{duration}' exceeded.\nAdjust the test 'duration' attribute if necessary.\n"
    )
}

#[async_trait]
impl ExecutePlugin for InternalExecutor {
    fn how(&self) -> &str {
        DEFAULT_HOW
    }

    fn data(&self) -> &ExecuteStepData {
        &self.data
    }

    async fn go(&self, discover_phase: &str, guest: Arc<dyn Guest>) -> PhaseRun {
        debug!("ignore-duration: {}", self.data.ignore_duration);
        debug!("exit-first: {}", self.data.exit_first);

        let mut invocations = match self.prepare_tests(discover_phase, &guest) {
            Ok(invocations) => invocations,
            Err(error) => return PhaseRun::failed(Vec::new(), error),
        };

        if invocations.is_empty() {
            debug!("No tests to run on guest {}.", guest.name());
            return PhaseRun::default();
        }

        if let Err(error) = guest.push(None).await {
            return PhaseRun::failed(Vec::new(), ExecuteError::guest(guest.name(), error));
        }

        let total = invocations.len();
        let mut results = Vec::new();

        for (index, invocation) in invocations.iter_mut().enumerate() {
            info!("[{}/{}] {}", index + 1, total, invocation.test.name);

            let span = invocation.span().clone();
            if let Err(error) = self.run_test(invocation).instrument(span).await {
                results.append(&mut invocation.results);
                return PhaseRun::failed(results, error);
            }

            for result in &invocation.results {
                info!("{}", result);
            }

            let failed = invocation.results.iter().any(|r| r.result.is_failure());
            let name = invocation.test.name.clone();
            results.append(&mut invocation.results);

            if invocation.abort_requested() {
                return PhaseRun::failed(
                    results,
                    ExecuteError::Abort(format!("Test '{name}' requested abort.")),
                );
            }

            if self.data.exit_first && failed {
                return PhaseRun::failed(
                    results,
                    ExecuteError::Abort(format!("Test '{name}' failed, exit-first requested.")),
                );
            }
        }

        PhaseRun {
            results,
            error: None,
        }
    }
}
