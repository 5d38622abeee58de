//! Test invocation
//!
//! One test bound to one guest: owns the live test process, the on-disk
//! invocation directory and the reboot/restart bookkeeping.

use nix::sys::signal::Signal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use tracing::{debug, error, info_span, warn, Span};

use super::error::ExecuteError;
use crate::guest::{
    exit_code, CommandOutput, ExecuteOptions, Guest, GuestError, ProcessHandle, ProcessHooks,
};
use crate::models::{CheckResult, ResultGuestData, Test, TestResult};
use crate::utils::{CallbackToken, InterruptRegistry, LogLevel, Stopwatch, Waiting};

/// Directory holding data produced by the test itself
pub const TEST_DATA: &str = "data";

/// Directory holding files produced by checks
pub const CHECK_DATA: &str = "checks";

pub const TEST_OUTPUT_FILENAME: &str = "output.txt";
pub const TEST_METADATA_FILENAME: &str = "metadata.yaml";

/// Marker a test creates to ask for a guest reboot
pub const REBOOT_REQUEST_FILENAME: &str = "reboot-request";

/// Marker a test creates to stop the whole execution
pub const ABORT_REQUEST_FILENAME: &str = "abort-request";

/// Results reported by the test through the reporting helper
pub const REPORT_RESULTS_FILENAME: &str = "report-results.yaml";

/// Content of the reboot request marker
#[derive(Debug, Default, Deserialize)]
struct RebootRequest {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Default)]
struct ProcessSlot {
    process: Option<ProcessHandle>,
    token: Option<CallbackToken>,
}

/// Registers the live process of an invocation and terminates it on request
#[derive(Clone)]
struct ProcessTracker {
    slot: Arc<Mutex<ProcessSlot>>,
    guest: Arc<dyn Guest>,
    interrupts: &'static InterruptRegistry,
}

impl ProcessTracker {
    fn lock(&self) -> MutexGuard<'_, ProcessSlot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn terminate(&self, signal: Signal) {
        let slot = self.lock();

        let Some(process) = slot.process else {
            debug!("Test invocation process cannot be terminated because it is unset.");
            return;
        };

        debug!("Terminating process {} with {}.", process.pid, signal.as_str());

        if let Err(e) = process.signal(signal) {
            warn!("Failed to signal process {}: {}", process.pid, e);
        }

        self.guest.cleanup_after_signal(signal);
    }
}

impl ProcessHooks for ProcessTracker {
    fn on_process_start(&self, process: ProcessHandle) {
        let mut slot = self.lock();
        slot.process = Some(process);

        let tracker = self.clone();
        slot.token = Some(
            self.interrupts
                .add(Arc::new(move |signal| tracker.terminate(signal))),
        );
    }

    fn on_process_end(&self, _process: ProcessHandle, _output: &CommandOutput) {
        let mut slot = self.lock();
        slot.process = None;

        if let Some(token) = slot.token.take() {
            self.interrupts.remove(token);
        }
    }
}

/// A single test run on a single guest
pub struct TestInvocation {
    pub test: Arc<Test>,
    pub guest: Arc<dyn Guest>,
    /// Discover phase the test belongs to
    pub phase: String,
    /// Context exported with results standing for the test itself
    pub context: Arc<BTreeMap<String, Vec<String>>>,

    pub results: Vec<TestResult>,
    pub check_results: Vec<CheckResult>,
    /// Data checks keep between their runs, keyed by check name
    pub check_data: BTreeMap<String, serde_json::Value>,

    pub return_code: Option<i32>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub real_duration: Option<String>,

    restart_count: u32,
    reboot_count: u32,
    hard_reboot_requested: Arc<AtomicBool>,

    tracker: ProcessTracker,
    step_workdir: PathBuf,
    relative_path: PathBuf,
    path: OnceLock<PathBuf>,
    span: Span,
}

impl TestInvocation {
    pub fn new(
        step_workdir: impl Into<PathBuf>,
        phase: impl Into<String>,
        test: Arc<Test>,
        guest: Arc<dyn Guest>,
    ) -> Self {
        let test_dir = test.safe_name();
        let test_dir = match test_dir.trim_start_matches('/') {
            "" => "default",
            trimmed => trimmed,
        };
        let relative_path = PathBuf::from(TEST_DATA)
            .join("guest")
            .join(guest.safe_name())
            .join(format!("{}-{}", test_dir, test.serial_number));

        let span = info_span!(
            "invocation",
            test = %test.name,
            serial = test.serial_number,
            guest = %guest.name()
        );

        Self {
            tracker: ProcessTracker {
                slot: Arc::new(Mutex::new(ProcessSlot::default())),
                guest: guest.clone(),
                interrupts: InterruptRegistry::global(),
            },
            test,
            guest,
            phase: phase.into(),
            context: Arc::new(BTreeMap::new()),
            results: Vec::new(),
            check_results: Vec::new(),
            check_data: BTreeMap::new(),
            return_code: None,
            start_time: None,
            end_time: None,
            real_duration: None,
            restart_count: 0,
            reboot_count: 0,
            hard_reboot_requested: Arc::new(AtomicBool::new(false)),
            step_workdir: step_workdir.into(),
            relative_path,
            path: OnceLock::new(),
            span,
        }
    }

    pub fn with_context(mut self, context: Arc<BTreeMap<String, Vec<String>>>) -> Self {
        self.context = context;
        self
    }

    /// Use a dedicated interrupt registry instead of the process-wide one
    pub fn with_interrupts(mut self, interrupts: &'static InterruptRegistry) -> Self {
        self.tracker.interrupts = interrupts;
        self
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Invocation directory relative to the step working directory
    pub fn relative_path(&self) -> &Path {
        &self.relative_path
    }

    pub fn relative_test_data_path(&self) -> PathBuf {
        self.relative_path.join(TEST_DATA)
    }

    /// Absolute invocation directory, created together with its test data
    /// and check data directories on first access
    pub fn path(&self) -> std::io::Result<&Path> {
        if let Some(path) = self.path.get() {
            return Ok(path.as_path());
        }

        let path = self.step_workdir.join(&self.relative_path);
        std::fs::create_dir_all(path.join(TEST_DATA))?;
        std::fs::create_dir_all(path.join(CHECK_DATA))?;

        Ok(self.path.get_or_init(|| path).as_path())
    }

    pub fn test_data_path(&self) -> std::io::Result<PathBuf> {
        Ok(self.path()?.join(TEST_DATA))
    }

    pub fn check_files_path(&self) -> std::io::Result<PathBuf> {
        Ok(self.path()?.join(CHECK_DATA))
    }

    pub fn output_path(&self) -> std::io::Result<PathBuf> {
        Ok(self.path()?.join(TEST_OUTPUT_FILENAME))
    }

    pub fn reboot_request_path(&self) -> PathBuf {
        self.absolute_test_data().join(REBOOT_REQUEST_FILENAME)
    }

    pub fn abort_request_path(&self) -> PathBuf {
        self.absolute_test_data().join(ABORT_REQUEST_FILENAME)
    }

    pub fn report_results_path(&self) -> PathBuf {
        self.absolute_test_data().join(REPORT_RESULTS_FILENAME)
    }

    fn absolute_test_data(&self) -> PathBuf {
        self.step_workdir.join(&self.relative_path).join(TEST_DATA)
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn reboot_count(&self) -> u32 {
        self.reboot_count
    }

    /// Flag an asynchronous observer sets to ask for a hard reboot
    pub fn hard_reboot_flag(&self) -> Arc<AtomicBool> {
        self.hard_reboot_requested.clone()
    }

    pub fn request_hard_reboot(&self) {
        self.hard_reboot_requested.store(true, Ordering::SeqCst);
    }

    pub fn hard_reboot_requested(&self) -> bool {
        self.hard_reboot_requested.load(Ordering::SeqCst)
    }

    pub fn soft_reboot_requested(&self) -> bool {
        self.reboot_request_path().exists()
    }

    pub fn reboot_requested(&self) -> bool {
        self.soft_reboot_requested() || self.hard_reboot_requested()
    }

    pub fn restart_requested(&self) -> bool {
        self.return_code
            .is_some_and(|code| self.test.restart_on_exit_code.contains(&code))
    }

    pub fn abort_requested(&self) -> bool {
        self.abort_request_path().exists()
    }

    /// Whether the guest is deemed healthy.
    ///
    /// Deduced from flags set while observing the test, the guest itself is
    /// not probed.
    pub fn is_guest_healthy(&self) -> bool {
        !(self.hard_reboot_requested() || self.restart_requested())
    }

    pub fn guest_info(&self) -> ResultGuestData {
        self.guest.info()
    }

    /// Result standing for the whole test, stamped with this invocation's
    /// identity and timing
    pub fn result(&self, outcome: crate::models::ResultOutcome) -> TestResult {
        let mut result = TestResult::new(self.test.name.clone(), outcome)
            .with_serial_number(self.test.serial_number)
            .with_guest(self.guest_info());
        result.fmf_id = Some(self.test.fmf_id());
        result.start_time = self.start_time.clone();
        result.end_time = self.end_time.clone();
        result.duration = self.real_duration.clone();
        result.context = (*self.context).clone();
        result.data_path = Some(self.relative_test_data_path());
        result
    }

    /// Run the test command on the guest.
    ///
    /// The live process is registered for interruption while it runs. A
    /// failed command is not an error: its return code is recorded and its
    /// output returned.
    pub async fn invoke_test(
        &mut self,
        command: &str,
        cwd: Option<&Path>,
        env: BTreeMap<String, String>,
        log: LogLevel,
        interactive: bool,
        timeout: Option<Duration>,
    ) -> CommandOutput {
        let options = ExecuteOptions {
            cwd: cwd.map(Path::to_path_buf),
            env,
            timeout,
            interactive: interactive || self.test.tty,
            log,
        };

        let stopwatch = Stopwatch::start();
        self.start_time = Some(crate::utils::format_timestamp(&stopwatch.start_time()));

        let outcome = self
            .guest
            .execute(command, &options, Some(&self.tracker))
            .await;

        let output = match outcome {
            Ok(output) => {
                self.return_code = Some(exit_code::SUCCESS);
                output
            }
            Err(error) => {
                self.return_code = Some(error.returncode);

                if error.returncode == exit_code::TIMEOUT {
                    debug!("Test duration '{}' exceeded.", self.test.duration);
                } else if exit_code::is_pidfile(error.returncode) {
                    warn!("Test failed to manage its pidfile.");
                }

                error.output
            }
        };

        let timing = stopwatch.stop();
        self.end_time = Some(timing.formatted_end());
        self.real_duration = Some(timing.formatted_duration());

        output
    }

    /// Send a signal to the running test process, if any
    pub fn terminate_process(&self, signal: Signal) {
        self.tracker.terminate(signal);
    }

    /// Reboot the guest if the test or an observer asked for it.
    ///
    /// Returns `true` when the reboot took place.
    pub async fn handle_reboot(&mut self) -> Result<bool, ExecuteError> {
        if !self.reboot_requested() {
            return Ok(false);
        }

        self.reboot_count += 1;
        self.restart_count += 1;

        let hard = self.hard_reboot_requested();
        debug!(
            "{} reboot during test '{}' with reboot count {} and test restart count {}.",
            if hard { "Hard" } else { "Soft" },
            self.test,
            self.reboot_count,
            self.restart_count
        );

        let guest = self.guest.name().to_string();
        let reboot_error = |source: GuestError| ExecuteError::Reboot {
            guest: guest.clone(),
            source,
        };

        let rebooted = if hard {
            self.guest
                .reboot(true, None, Waiting::default())
                .await
                .map_err(reboot_error)?
        } else {
            let marker = self.reboot_request_path();
            let request: RebootRequest = match std::fs::read_to_string(&marker)?.trim() {
                "" => RebootRequest::default(),
                content => serde_json::from_str(content)?,
            };
            let command = request.command.filter(|command| !command.is_empty());
            let waiting = request
                .timeout
                .filter(|timeout| *timeout > 0)
                .map(Waiting::from_secs)
                .unwrap_or_default();

            std::fs::remove_file(&marker)?;
            let test_data = self.test_data_path()?;
            self.guest
                .push(Some(&test_data))
                .await
                .map_err(|e| ExecuteError::guest(&guest, e))?;

            match self.guest.reboot(false, command.as_deref(), waiting).await {
                Ok(rebooted) => rebooted,
                Err(GuestError::Run(run_error)) => {
                    if let Some(command) = &command {
                        error!("Failed to reboot guest using the custom command '{command}'.");
                    }
                    return Err(ExecuteError::Run(run_error));
                }
                Err(GuestError::RebootModeNotSupported) => {
                    warn!("Guest does not support soft reboot, trying hard reboot.");
                    self.guest
                        .reboot(true, None, waiting)
                        .await
                        .map_err(reboot_error)?
                }
                Err(other) => return Err(reboot_error(other)),
            }
        };

        if !rebooted {
            return Err(ExecuteError::RebootTimeout { guest });
        }

        self.hard_reboot_requested.store(false, Ordering::SeqCst);
        Ok(true)
    }

    /// Prepare running the test once again if its exit code asks for it.
    ///
    /// Returns `true` when the test should be run again.
    pub async fn handle_restart(&mut self) -> Result<bool, ExecuteError> {
        if !self.restart_requested() {
            return Ok(false);
        }

        if self.restart_count >= self.test.restart_max_count {
            debug!(
                "Test restart denied during test '{}' with reboot count {} and test restart count {}.",
                self.test, self.reboot_count, self.restart_count
            );
            return Ok(false);
        }

        if self.test.restart_with_reboot {
            self.request_hard_reboot();

            if !self.handle_reboot().await? {
                return Ok(false);
            }
        } else {
            self.restart_count += 1;

            // The guest may have rebooted on its own, make sure it is back.
            if !self.guest.reconnect().await {
                return Ok(false);
            }
        }

        debug!(
            "Test restart during test '{}' with reboot count {} and test restart count {}.",
            self.test, self.reboot_count, self.restart_count
        );

        self.guest
            .push(None)
            .await
            .map_err(|e| ExecuteError::guest(self.guest.name(), e))?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::mock::{MockGuest, SoftReboot};
    use crate::guest::LocalGuest;
    use crate::models::ResultOutcome;
    use std::fs;
    use tempfile::tempdir;

    fn registry() -> &'static InterruptRegistry {
        Box::leak(Box::new(InterruptRegistry::new()))
    }

    fn invocation(workdir: &Path, test: Test, guest: Arc<dyn Guest>) -> TestInvocation {
        TestInvocation::new(workdir, "default-0", Arc::new(test), guest)
            .with_interrupts(registry())
    }

    fn restarting_test(max: u32, reboot: bool) -> Test {
        Test::new("/tests/restart", "./run.sh")
            .with_serial_number(1)
            .with_restart(vec![79], max, reboot)
    }

    #[test]
    fn test_relative_path() {
        let dir = tempdir().unwrap();
        let guest: Arc<dyn Guest> = Arc::new(MockGuest::new("client 1"));

        let nested = invocation(
            dir.path(),
            Test::new("/tests/basic", "true").with_serial_number(4),
            guest.clone(),
        );
        assert_eq!(
            nested.relative_path(),
            Path::new("data/guest/client-1/tests/basic-4")
        );

        let root = invocation(dir.path(), Test::new("/", "true").with_serial_number(2), guest);
        assert_eq!(root.relative_path(), Path::new("data/guest/client-1/default-2"));
    }

    #[test]
    fn test_path_created_on_first_access() {
        let dir = tempdir().unwrap();
        let guest: Arc<dyn Guest> = Arc::new(MockGuest::new("guest"));
        let invocation = invocation(
            dir.path(),
            Test::new("/t", "true").with_serial_number(1),
            guest,
        );

        let expected = dir.path().join("data/guest/guest/t-1");
        assert!(!expected.exists());

        let path = invocation.path().unwrap().to_path_buf();
        assert_eq!(path, expected);
        assert!(path.join(TEST_DATA).is_dir());
        assert!(path.join(CHECK_DATA).is_dir());
        assert_eq!(invocation.path().unwrap(), path.as_path());
    }

    #[test]
    fn test_terminate_without_process() {
        let dir = tempdir().unwrap();
        let guest: Arc<dyn Guest> = Arc::new(MockGuest::new("guest"));
        let invocation = invocation(dir.path(), Test::new("/t", "true"), guest);

        invocation.terminate_process(Signal::SIGTERM);
        invocation.terminate_process(Signal::SIGKILL);
    }

    #[tokio::test]
    async fn test_invoke_records_return_code_and_timing() {
        let dir = tempdir().unwrap();
        let guest: Arc<dyn Guest> = Arc::new(LocalGuest::new("local"));
        let mut invocation = invocation(dir.path(), Test::new("/t", "exit 3"), guest);

        let output = invocation
            .invoke_test(
                "echo partial; exit 3",
                None,
                BTreeMap::new(),
                LogLevel::Debug,
                false,
                None,
            )
            .await;

        assert_eq!(output.stdout, "partial\n");
        assert_eq!(invocation.return_code, Some(3));
        assert!(invocation.start_time.is_some());
        assert!(invocation.end_time.is_some());
        assert_eq!(invocation.real_duration.as_deref(), Some("00:00:00"));
    }

    #[tokio::test]
    async fn test_invoke_timeout() {
        let dir = tempdir().unwrap();
        let guest: Arc<dyn Guest> = Arc::new(LocalGuest::new("local"));
        let mut invocation = invocation(dir.path(), Test::new("/t", "sleep 5"), guest);

        invocation
            .invoke_test(
                "sleep 5",
                None,
                BTreeMap::new(),
                LogLevel::Debug,
                false,
                Some(Duration::from_millis(100)),
            )
            .await;

        assert_eq!(invocation.return_code, Some(exit_code::TIMEOUT));
    }

    #[tokio::test]
    async fn test_interrupt_terminates_live_process() {
        let dir = tempdir().unwrap();
        let interrupts = registry();
        let guest: Arc<dyn Guest> = Arc::new(LocalGuest::new("local"));
        let mut invocation = TestInvocation::new(
            dir.path(),
            "default-0",
            Arc::new(Test::new("/t", "sleep 30")),
            guest,
        )
        .with_interrupts(interrupts);

        let interrupter = tokio::spawn(async move {
            while interrupts.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            interrupts.fire(Signal::SIGTERM);
        });

        invocation
            .invoke_test(
                "sleep 30",
                None,
                BTreeMap::new(),
                LogLevel::Debug,
                false,
                Some(Duration::from_secs(20)),
            )
            .await;
        interrupter.await.unwrap();

        assert_eq!(invocation.return_code, Some(128 + Signal::SIGTERM as i32));
        assert!(interrupts.is_empty());
    }

    #[tokio::test]
    async fn test_no_reboot_requested() {
        let dir = tempdir().unwrap();
        let guest = Arc::new(MockGuest::new("guest"));
        let mut invocation = invocation(dir.path(), Test::new("/t", "true"), guest.clone());

        assert!(!invocation.handle_reboot().await.unwrap());
        assert_eq!(invocation.reboot_count(), 0);
        assert!(guest.calls().is_empty());
    }

    #[tokio::test]
    async fn test_soft_reboot_with_custom_command() {
        let dir = tempdir().unwrap();
        let guest = Arc::new(MockGuest::new("guest"));
        let mut invocation = invocation(dir.path(), Test::new("/t", "true"), guest.clone());

        fs::write(
            invocation.test_data_path().unwrap().join(REBOOT_REQUEST_FILENAME),
            r#"{"command": "systemctl kexec", "timeout": 30}"#,
        )
        .unwrap();

        assert!(invocation.soft_reboot_requested());
        assert!(invocation.handle_reboot().await.unwrap());
        assert!(!invocation.soft_reboot_requested());
        assert_eq!(invocation.reboot_count(), 1);
        assert_eq!(invocation.restart_count(), 1);
        assert_eq!(
            guest.calls(),
            vec!["push".to_string(), "reboot:soft:systemctl kexec".to_string()]
        );
    }

    #[tokio::test]
    async fn test_soft_reboot_falls_back_to_hard() {
        let dir = tempdir().unwrap();
        let guest = Arc::new(MockGuest::new("guest").with_soft_reboot(SoftReboot::NotSupported));
        let mut invocation = invocation(dir.path(), Test::new("/t", "true"), guest.clone());

        invocation.path().unwrap();
        fs::write(invocation.reboot_request_path(), "{}").unwrap();

        assert!(invocation.handle_reboot().await.unwrap());
        assert_eq!(
            guest.calls(),
            vec![
                "push".to_string(),
                "reboot:soft:reboot".to_string(),
                "reboot:hard".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_soft_reboot_command_failure() {
        let dir = tempdir().unwrap();
        let guest = Arc::new(MockGuest::new("guest").with_soft_reboot(SoftReboot::Fails(2)));
        let mut invocation = invocation(dir.path(), Test::new("/t", "true"), guest);

        invocation.path().unwrap();
        fs::write(invocation.reboot_request_path(), r#"{"command": "bogus"}"#).unwrap();

        match invocation.handle_reboot().await {
            Err(ExecuteError::Run(error)) => assert_eq!(error.returncode, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reboot_timeout() {
        let dir = tempdir().unwrap();
        let guest = Arc::new(MockGuest::new("guest").with_hard_reboot(false));
        let mut invocation = invocation(dir.path(), Test::new("/t", "true"), guest);

        invocation.request_hard_reboot();
        assert!(!invocation.is_guest_healthy());

        assert!(matches!(
            invocation.handle_reboot().await,
            Err(ExecuteError::RebootTimeout { .. })
        ));
        assert!(invocation.hard_reboot_requested());
    }

    #[tokio::test]
    async fn test_hard_reboot_clears_flag() {
        let dir = tempdir().unwrap();
        let guest = Arc::new(MockGuest::new("guest"));
        let mut invocation = invocation(dir.path(), Test::new("/t", "true"), guest.clone());

        invocation.hard_reboot_flag().store(true, Ordering::SeqCst);

        assert!(invocation.handle_reboot().await.unwrap());
        assert!(!invocation.hard_reboot_requested());
        assert!(invocation.is_guest_healthy());
        assert_eq!(guest.calls(), vec!["reboot:hard".to_string()]);
    }

    #[tokio::test]
    async fn test_restart_limit() {
        let dir = tempdir().unwrap();
        let guest = Arc::new(MockGuest::new("guest"));
        let mut invocation = invocation(dir.path(), restarting_test(2, false), guest.clone());

        invocation.return_code = Some(0);
        assert!(!invocation.handle_restart().await.unwrap());

        invocation.return_code = Some(79);
        assert!(!invocation.is_guest_healthy());
        assert!(invocation.handle_restart().await.unwrap());
        assert!(invocation.handle_restart().await.unwrap());
        assert_eq!(invocation.restart_count(), 2);

        // Limit reached, further requests are denied without state change.
        assert!(!invocation.handle_restart().await.unwrap());
        assert!(!invocation.handle_restart().await.unwrap());
        assert_eq!(invocation.restart_count(), 2);
        assert_eq!(
            guest.calls(),
            vec!["reconnect", "push", "reconnect", "push"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_restart_fails_without_reconnect() {
        let dir = tempdir().unwrap();
        let guest = Arc::new(MockGuest::new("guest").with_reconnect(false));
        let mut invocation = invocation(dir.path(), restarting_test(1, false), guest);

        invocation.return_code = Some(79);
        assert!(!invocation.handle_restart().await.unwrap());
        assert_eq!(invocation.restart_count(), 1);
    }

    #[tokio::test]
    async fn test_restart_with_reboot() {
        let dir = tempdir().unwrap();
        let guest = Arc::new(MockGuest::new("guest"));
        let mut invocation = invocation(dir.path(), restarting_test(1, true), guest.clone());

        invocation.return_code = Some(79);
        assert!(invocation.handle_restart().await.unwrap());
        assert_eq!(invocation.reboot_count(), 1);
        assert_eq!(invocation.restart_count(), 1);
        assert!(!invocation.hard_reboot_requested());
        assert_eq!(
            guest.calls(),
            vec!["reboot:hard".to_string(), "push".to_string()]
        );
    }

    #[test]
    fn test_result_for_test_itself() {
        let dir = tempdir().unwrap();
        let guest: Arc<dyn Guest> = Arc::new(MockGuest::new("guest").with_role("server"));
        let mut invocation = invocation(
            dir.path(),
            Test::new("/t", "true").with_serial_number(5),
            guest,
        );
        invocation.real_duration = Some("00:00:01".to_string());

        let result = invocation.result(ResultOutcome::Pass);
        assert_eq!(result.serial_number, 5);
        assert_eq!(result.guest.role.as_deref(), Some("server"));
        assert_eq!(result.duration.as_deref(), Some("00:00:01"));
        assert_eq!(result.data_path, Some(PathBuf::from("data/guest/guest/t-5/data")));
    }
}
