use crate::trace::TraceWriter;
use anyhow::{Context, Result};
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The duration to wait after sending SIGINT before escalating to SIGTERM.
const SIGINT_TIMEOUT: Duration = Duration::from_millis(7500);
/// The duration to wait after sending SIGTERM before escalating to SIGKILL.
const SIGTERM_TIMEOUT: Duration = Duration::from_millis(2500);

/// Event data for a line received from stdout or stderr.
#[derive(Debug, Clone)]
pub struct ProcessDataReceivedEventArgs {
    pub data: String,
}

/// Spawns a child process, reads stdout/stderr on separate tasks, supports
/// graceful cancellation (SIGINT → SIGTERM → SIGKILL), and delivers output
/// lines through channels.
pub struct ProcessInvoker {
    trace: Arc<dyn TraceWriter>,
    stdout_tx: mpsc::UnboundedSender<ProcessDataReceivedEventArgs>,
    stdout_rx: Option<mpsc::UnboundedReceiver<ProcessDataReceivedEventArgs>>,
    stderr_tx: mpsc::UnboundedSender<ProcessDataReceivedEventArgs>,
    stderr_rx: Option<mpsc::UnboundedReceiver<ProcessDataReceivedEventArgs>>,
}

impl ProcessInvoker {
    /// Create a new `ProcessInvoker` with the given trace writer.
    pub fn new(trace: Arc<dyn TraceWriter>) -> Self {
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();
        Self {
            trace,
            stdout_tx,
            stdout_rx: Some(stdout_rx),
            stderr_tx,
            stderr_rx: Some(stderr_rx),
        }
    }

    /// Take the stdout receiver. Can only be called once; subsequent calls return `None`.
    pub fn take_stdout_receiver(
        &mut self,
    ) -> Option<mpsc::UnboundedReceiver<ProcessDataReceivedEventArgs>> {
        self.stdout_rx.take()
    }

    /// Take the stderr receiver. Can only be called once; subsequent calls return `None`.
    pub fn take_stderr_receiver(
        &mut self,
    ) -> Option<mpsc::UnboundedReceiver<ProcessDataReceivedEventArgs>> {
        self.stderr_rx.take()
    }

    /// Execute a process and wait for it to exit.
    ///
    /// * `working_directory` - The working directory for the process.
    /// * `file_name` - The executable to run.
    /// * `arguments` - Command-line arguments, passed verbatim.
    /// * `removed_variables` - Variables stripped from the inherited environment.
    /// * `cancellation_token` - Token to cancel/kill the process.
    ///
    /// Returns the process exit code, zero or not. A process killed by a
    /// signal reports `128 + signal`, the shell convention. Cancellation is
    /// an error.
    pub async fn execute(
        &self,
        working_directory: &Path,
        file_name: &str,
        arguments: &[String],
        removed_variables: &[&str],
        cancellation_token: CancellationToken,
    ) -> Result<i32> {
        anyhow::ensure!(!file_name.is_empty(), "file_name must not be empty");

        self.trace.info("Starting process:");
        self.trace.info(&format!("  File name: '{file_name}'"));
        self.trace
            .verbose(&format!("  Arguments: '{}'", arguments.join(" ")));
        self.trace.info(&format!(
            "  Working directory: '{}'",
            working_directory.display()
        ));

        let mut cmd = Command::new(file_name);
        cmd.args(arguments);

        if working_directory.is_dir() {
            cmd.current_dir(working_directory);
        }

        for name in removed_variables {
            cmd.env_remove(name);
        }

        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.stdin(std::process::Stdio::null());

        let start = std::time::Instant::now();
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to start process '{file_name}'"))?;

        let pid = child.id().unwrap_or(0);
        self.trace.info(&format!(
            "Process started with process id {pid}, waiting for process exit."
        ));

        let stdout = child.stdout.take();
        let stdout_tx = self.stdout_tx.clone();
        let stdout_task = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let _ = stdout_tx.send(ProcessDataReceivedEventArgs { data: line });
                }
            }
        });

        let stderr = child.stderr.take();
        let stderr_tx = self.stderr_tx.clone();
        let stderr_task = tokio::spawn(async move {
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let _ = stderr_tx.send(ProcessDataReceivedEventArgs { data: line });
                }
            }
        });

        let exit_code: i32;
        let was_cancelled;

        tokio::select! {
            status = child.wait() => {
                was_cancelled = false;
                let status = status.context("Failed to wait for process")?;
                exit_code = exit_code_of(status);
            }
            _ = cancellation_token.cancelled() => {
                was_cancelled = true;
                self.trace.info("Cancellation requested.");
                exit_code = self.cancel_and_kill_process(&mut child).await;
            }
        }

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        let elapsed = start.elapsed();
        self.trace.info(&format!(
            "Finished process {pid} with exit code {exit_code}, and elapsed time {elapsed:.2?}."
        ));

        if was_cancelled {
            anyhow::bail!("Process '{file_name}' was cancelled");
        }

        Ok(exit_code)
    }

    /// Attempt graceful cancellation: SIGINT → SIGTERM → SIGKILL.
    async fn cancel_and_kill_process(&self, child: &mut tokio::process::Child) -> i32 {
        for (signal, timeout) in [(Signal::Int, SIGINT_TIMEOUT), (Signal::Term, SIGTERM_TIMEOUT)] {
            if self.send_signal_and_wait(child, signal, timeout).await {
                self.trace
                    .info(&format!("Process exited after {signal:?} signal."));
                return child.wait().await.map(exit_code_of).unwrap_or(-1);
            }
        }

        self.trace
            .info("Killing process since cancel and terminate signals have been ignored.");
        let _ = child.kill().await;
        child.wait().await.map(exit_code_of).unwrap_or(-1)
    }

    /// Send a signal to the child process and wait up to `timeout` for it to exit.
    /// Returns `true` if the process exited within the timeout.
    #[cfg(unix)]
    async fn send_signal_and_wait(
        &self,
        child: &mut tokio::process::Child,
        signal: Signal,
        timeout: Duration,
    ) -> bool {
        let pid = match child.id() {
            Some(id) => id,
            None => return true,
        };

        let sig = match signal {
            Signal::Int => nix::sys::signal::Signal::SIGINT,
            Signal::Term => nix::sys::signal::Signal::SIGTERM,
        };

        self.trace.info(&format!("Sending {sig:?} to process {pid}."));

        if nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), sig).is_err() {
            self.trace
                .info(&format!("{sig:?} signal failed to send to process {pid}."));
            return false;
        }

        tokio::select! {
            result = child.wait() => result.is_ok(),
            _ = tokio::time::sleep(timeout) => {
                self.trace.info(&format!(
                    "Process did not honor {sig:?} within {:.1}s.",
                    timeout.as_secs_f64()
                ));
                false
            }
        }
    }

    #[cfg(not(unix))]
    async fn send_signal_and_wait(
        &self,
        child: &mut tokio::process::Child,
        _signal: Signal,
        timeout: Duration,
    ) -> bool {
        tokio::select! {
            result = child.wait() => result.is_ok(),
            _ = tokio::time::sleep(timeout) => false,
        }
    }
}

/// Internal signal type for cross-platform abstraction.
#[derive(Debug, Clone, Copy)]
enum Signal {
    Int,
    Term,
}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::NullTraceWriter;

    fn make_invoker() -> ProcessInvoker {
        ProcessInvoker::new(Arc::new(NullTraceWriter))
    }

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn execute_echo_streams_stdout() {
        let mut invoker = make_invoker();
        let mut rx = invoker.take_stdout_receiver().unwrap();

        let handle = tokio::spawn(async move {
            invoker
                .execute(
                    Path::new(""),
                    "echo",
                    &args(&["hello"]),
                    &[],
                    CancellationToken::new(),
                )
                .await
        });

        let mut lines = Vec::new();
        while let Some(evt) = rx.recv().await {
            lines.push(evt.data);
        }

        assert_eq!(handle.await.unwrap().unwrap(), 0);
        assert_eq!(lines, vec!["hello"]);
    }

    #[tokio::test]
    async fn execute_nonexistent_fails_to_start() {
        let result = make_invoker()
            .execute(
                Path::new(""),
                "nonexistent_command_xyz_123",
                &[],
                &[],
                CancellationToken::new(),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn non_zero_exit_is_returned() {
        let code = make_invoker()
            .execute(
                Path::new(""),
                "sh",
                &args(&["-c", "exit 3"]),
                &[],
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(code, 3);
    }

    #[tokio::test]
    async fn signalled_process_reports_shell_style_code() {
        let code = make_invoker()
            .execute(
                Path::new(""),
                "sh",
                &args(&["-c", "kill -9 $$"]),
                &[],
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(code, 128 + 9);
    }

    #[tokio::test]
    async fn removed_variables_are_not_inherited() {
        std::env::set_var("RNDFLOW_INVOKER_TEST_SECRET", "hunter2");
        std::env::set_var("RNDFLOW_INVOKER_TEST_VISIBLE", "yes");

        let mut invoker = make_invoker();
        let mut rx = invoker.take_stdout_receiver().unwrap();
        let handle = tokio::spawn(async move {
            invoker
                .execute(
                    Path::new(""),
                    "sh",
                    &args(&[
                        "-c",
                        "echo \"${RNDFLOW_INVOKER_TEST_SECRET:-unset} $RNDFLOW_INVOKER_TEST_VISIBLE\"",
                    ]),
                    &["RNDFLOW_INVOKER_TEST_SECRET"],
                    CancellationToken::new(),
                )
                .await
        });

        let mut lines = Vec::new();
        while let Some(evt) = rx.recv().await {
            lines.push(evt.data);
        }
        assert_eq!(handle.await.unwrap().unwrap(), 0);
        assert_eq!(lines, vec!["unset yes"]);
    }

    #[tokio::test]
    async fn cancellation_stops_long_running_process() {
        let invoker = make_invoker();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = invoker
            .execute(
                Path::new(""),
                "sleep",
                &args(&["30"]),
                &[],
                cancel,
            )
            .await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(15));
    }
}
