//! Child process supervision shared by guest implementations

use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{exit_code, CommandOutput, ExecuteOptions, ProcessHooks, RunError};
use crate::utils::LogLevel;

/// Handle of a live child process
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
}

impl ProcessHandle {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }

    /// Deliver a signal to the process
    pub fn signal(&self, signal: Signal) -> nix::Result<()> {
        kill(Pid::from_raw(self.pid as i32), signal)
    }
}

/// Live child as seen by `hooks`.
///
/// Dropping it before [`LiveProcess::finish`] kills the process group and
/// still reports the end, so a cancelled wait never leaves a stale handle
/// registered.
struct LiveProcess<'a> {
    hooks: Option<&'a dyn ProcessHooks>,
    handle: Option<ProcessHandle>,
}

impl<'a> LiveProcess<'a> {
    fn start(hooks: Option<&'a dyn ProcessHooks>, handle: Option<ProcessHandle>) -> Self {
        if let (Some(hooks), Some(handle)) = (hooks, handle) {
            hooks.on_process_start(handle);
        }
        Self { hooks, handle }
    }

    fn finish(mut self, output: &CommandOutput) {
        if let (Some(hooks), Some(handle)) = (self.hooks, self.handle.take()) {
            hooks.on_process_end(handle, output);
        }
    }
}

impl Drop for LiveProcess<'_> {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        debug!("Process {} abandoned, killing its process group", handle.pid);
        let _ = killpg(Pid::from_raw(handle.pid as i32), Signal::SIGKILL);
        if let Some(hooks) = self.hooks {
            hooks.on_process_end(handle, &CommandOutput::default());
        }
    }
}

/// Spawn `command`, notify `hooks`, and wait for it to finish.
///
/// `command_line` is the human readable command used in errors.
pub(super) async fn run_process(
    mut command: Command,
    command_line: &str,
    options: &ExecuteOptions,
    hooks: Option<&dyn ProcessHooks>,
) -> Result<CommandOutput, RunError> {
    if let Some(cwd) = &options.cwd {
        command.current_dir(cwd);
    }
    command.envs(&options.env);
    command.process_group(0);
    command.kill_on_drop(true);

    if options.interactive {
        command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
    } else {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
    }

    let mut child = command.spawn().map_err(|e| {
        let code = if e.kind() == std::io::ErrorKind::PermissionDenied {
            exit_code::PERMISSION_DENIED
        } else {
            exit_code::NOT_FOUND
        };
        RunError::new(
            command_line,
            code,
            CommandOutput {
                stdout: String::new(),
                stderr: e.to_string(),
            },
        )
    })?;

    let handle = child.id().map(ProcessHandle::new);
    let live = LiveProcess::start(hooks, handle);

    let stdout_reader = child.stdout.take().map(|s| spawn_reader(s, options.log));
    let stderr_reader = child.stderr.take().map(|s| spawn_reader(s, options.log));

    let status = match options.timeout {
        Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status.map(Some),
            Err(_) => {
                debug!(
                    "Command '{}' timed out after {}s",
                    command_line,
                    timeout.as_secs()
                );
                if let Some(handle) = handle {
                    let _ = killpg(Pid::from_raw(handle.pid as i32), Signal::SIGKILL);
                }
                let _ = child.start_kill();
                let _ = child.wait().await;
                Ok(None)
            }
        },
        None => child.wait().await.map(Some),
    };

    let output = CommandOutput {
        stdout: collect(stdout_reader).await,
        stderr: collect(stderr_reader).await,
    };

    live.finish(&output);

    let returncode = match status {
        Ok(Some(status)) => status_code(status),
        Ok(None) => exit_code::TIMEOUT,
        Err(e) => {
            return Err(RunError::new(
                command_line,
                exit_code::FAILURE,
                CommandOutput {
                    stdout: output.stdout,
                    stderr: e.to_string(),
                },
            ))
        }
    };

    if returncode == exit_code::SUCCESS {
        Ok(output)
    } else {
        Err(RunError::new(command_line, returncode, output))
    }
}

/// Exit code, or `128 + signal` for processes killed by a signal
fn status_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(exit_code::FAILURE)
}

fn spawn_reader<R>(stream: R, level: LogLevel) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        let mut captured = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            level.log_line(&line);
            captured.push_str(&line);
            captured.push('\n');
        }
        captured
    })
}

async fn collect(reader: Option<JoinHandle<String>>) -> String {
    match reader {
        Some(reader) => reader.await.unwrap_or_default(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ProcessHooks for Recorder {
        fn on_process_start(&self, process: ProcessHandle) {
            assert!(process.pid > 0);
            self.events.lock().unwrap().push("start".to_string());
        }

        fn on_process_end(&self, _process: ProcessHandle, output: &CommandOutput) {
            self.events
                .lock()
                .unwrap()
                .push(format!("end:{}", output.stdout.trim()));
        }
    }

    fn bash(script: &str) -> Command {
        let mut command = Command::new("bash");
        command.arg("-c").arg(script);
        command
    }

    #[tokio::test]
    async fn test_run_process_success() {
        let recorder = Recorder::default();
        let output = run_process(
            bash("echo hello"),
            "echo hello",
            &ExecuteOptions::default(),
            Some(&recorder),
        )
        .await
        .unwrap();

        assert_eq!(output.stdout, "hello\n");
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["start".to_string(), "end:hello".to_string()]
        );
    }

    #[tokio::test]
    async fn test_run_process_failure_code() {
        let error = run_process(
            bash("echo oops >&2; exit 3"),
            "fail",
            &ExecuteOptions::default(),
            None,
        )
        .await
        .unwrap_err();

        assert_eq!(error.returncode, 3);
        assert_eq!(error.output.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_run_process_timeout() {
        let options = ExecuteOptions {
            timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        let error = run_process(bash("sleep 5"), "sleep", &options, None)
            .await
            .unwrap_err();

        assert_eq!(error.returncode, exit_code::TIMEOUT);
    }

    #[tokio::test]
    async fn test_cancelled_wait_kills_process_and_reports_end() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let script = format!("sleep 1; touch {}", marker.display());
        let recorder = Recorder::default();

        let cancelled = tokio::time::timeout(
            Duration::from_millis(200),
            run_process(bash(&script), "sleep", &ExecuteOptions::default(), Some(&recorder)),
        )
        .await;
        assert!(cancelled.is_err());

        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["start".to_string(), "end:".to_string()]
        );

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_run_process_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = ExecuteOptions {
            cwd: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        options.env.insert("GREETING".to_string(), "hi".to_string());

        let output = run_process(bash("echo $GREETING; pwd"), "env", &options, None)
            .await
            .unwrap();

        let lines: Vec<&str> = output.stdout.lines().collect();
        assert_eq!(lines[0], "hi");
        assert!(lines[1].ends_with(dir.path().file_name().unwrap().to_str().unwrap()));
    }
}
