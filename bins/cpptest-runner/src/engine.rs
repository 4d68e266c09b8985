/// Process Engine - Runs One Test Binary Invocation
///
/// **Core Responsibility:**
/// Launch a child process, capture stdout and stderr independently, enforce a
/// hard timeout, and hand back an `ExecutionResult`.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (spawn, pipes, kill)
/// - Engine does NOT know framework grammars
/// - Engine does NOT classify outcomes
/// - Engine never fails: every failure mode is recorded in the result
///
/// The argv handed to the child is exactly `invocation.args`, in order and
/// unmodified; no shell is involved.

use crate::cancel::CancelSignal;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Guardrail against runaway output; bytes past this are drained and dropped
const MAX_CAPTURE_BYTES: usize = 16 * 1024 * 1024;

/// How long stream readers may keep draining after the child is gone.
/// Grandchildren that inherited the pipes can otherwise hold them open forever.
const STREAM_DRAIN_GRACE: Duration = Duration::from_secs(2);

const TRUNCATION_MARKER: &[u8] = b"\n[output truncated]\n";

/// A fully resolved command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
    /// File the framework writes a machine-readable report to, if any
    pub report_path: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            timeout,
            report_path: None,
        }
    }

    /// Render for logs
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push_str(&format!("{:?}", arg));
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

/// Raw outcome of one invocation. Produced by the engine, consumed by the parser.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// Exit code; the negated signal number when killed by a signal, -1 when
    /// the process never exited on its own
    pub exit_code: i32,
    pub signal: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Contents of `Invocation::report_path` after exit
    pub report: Option<Vec<u8>>,
    pub duration: Duration,
    /// Limit the run was held to
    pub timeout: Duration,
    pub timed_out: bool,
    pub cancelled: bool,
    /// Spawn or wait failure; the child never produced a usable run
    pub launch_error: Option<String>,
}

impl ExecutionResult {
    pub fn launch_failure(message: String, duration: Duration) -> Self {
        Self {
            exit_code: -1,
            duration,
            launch_error: Some(message),
            ..Default::default()
        }
    }

    pub fn cancelled(duration: Duration) -> Self {
        Self {
            exit_code: -1,
            duration,
            cancelled: true,
            ..Default::default()
        }
    }

    /// Exited by itself (any exit code), not killed, not timed out
    pub fn exited(&self) -> bool {
        self.launch_error.is_none() && !self.timed_out && !self.cancelled && self.signal.is_none()
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// stdout followed by stderr, for error messages
    pub fn combined_output(&self) -> String {
        let stdout = self.stdout_text();
        let stderr = self.stderr_text();
        match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
            (true, true) => String::new(),
            (false, true) => stdout,
            (true, false) => stderr,
            (false, false) => format!("{}\n{}", stdout.trim_end(), stderr),
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }
}

enum Completion {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Local process execution engine
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEngine;

impl ProcessEngine {
    pub fn new() -> Self {
        Self
    }

    /// Run an invocation to completion, timeout or cancellation
    pub async fn run(&self, invocation: &Invocation, cancel: &CancelSignal) -> ExecutionResult {
        let start_time = Instant::now();

        if cancel.is_cancelled() {
            return ExecutionResult::cancelled(start_time.elapsed());
        }

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so a timeout also reaches whatever the binary
        // (or its harness) started
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(
                    program = %invocation.program.display(),
                    error = %e,
                    "Failed to launch test binary"
                );
                return ExecutionResult::launch_failure(
                    format!("failed to launch {}: {}", invocation.program.display(), e),
                    start_time.elapsed(),
                );
            }
        };

        debug!(pid = ?child.id(), command = %invocation.command_line(), "Spawned child");

        let mut stdout_task = tokio::spawn(capture(child.stdout.take()));
        let mut stderr_task = tokio::spawn(capture(child.stderr.take()));

        let completion = tokio::select! {
            status = child.wait() => Completion::Exited(status),
            _ = tokio::time::sleep(invocation.timeout) => Completion::TimedOut,
            _ = cancel.cancelled() => Completion::Cancelled,
        };

        let mut result = ExecutionResult {
            exit_code: -1,
            timeout: invocation.timeout,
            ..Default::default()
        };

        match completion {
            Completion::Exited(Ok(status)) => {
                let (code, signal) = exit_code_of(&status);
                result.exit_code = code;
                result.signal = signal;
            }
            Completion::Exited(Err(e)) => {
                result.launch_error = Some(format!("failed to wait for child: {}", e));
            }
            Completion::TimedOut => {
                warn!(
                    program = %invocation.program.display(),
                    timeout_ms = invocation.timeout.as_millis() as u64,
                    "Execution timed out - killing child"
                );
                result.timed_out = true;
                kill(&mut child).await;
            }
            Completion::Cancelled => {
                warn!(program = %invocation.program.display(), "Cancelled - killing child");
                result.cancelled = true;
                kill(&mut child).await;
            }
        }

        result.stdout = collect(&mut stdout_task).await;
        result.stderr = collect(&mut stderr_task).await;

        if let Some(ref path) = invocation.report_path {
            match tokio::fs::read(path).await {
                Ok(bytes) if !bytes.is_empty() => result.report = Some(bytes),
                Ok(_) => debug!(path = %path.display(), "Report file is empty"),
                Err(e) => debug!(path = %path.display(), error = %e, "No report file written"),
            }
        }

        result.duration = start_time.elapsed();

        debug!(
            exit_code = result.exit_code,
            signal = ?result.signal,
            timed_out = result.timed_out,
            cancelled = result.cancelled,
            stdout_bytes = result.stdout.len(),
            stderr_bytes = result.stderr.len(),
            duration_ms = result.duration_ms(),
            "Child finished"
        );

        result
    }
}

async fn kill(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                debug!(pid, error = %e, "Failed to kill process group");
            }
        }
    }
    if let Err(e) = child.kill().await {
        warn!(error = %e, "Failed to kill child");
    }
}

fn exit_code_of(status: &ExitStatus) -> (i32, Option<i32>) {
    if let Some(code) = status.code() {
        return (code, None);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return (-signal, Some(signal));
        }
    }
    (-1, None)
}

/// Read a pipe to its end, keeping at most `MAX_CAPTURE_BYTES`
async fn capture<R>(stream: Option<R>) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut captured = Vec::new();
    let Some(mut stream) = stream else {
        return Ok(captured);
    };

    let mut chunk = [0u8; 8192];
    let mut truncated = false;
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = MAX_CAPTURE_BYTES.saturating_sub(captured.len());
        if room >= n {
            captured.extend_from_slice(&chunk[..n]);
        } else {
            captured.extend_from_slice(&chunk[..room]);
            truncated = true;
        }
    }
    if truncated {
        captured.extend_from_slice(TRUNCATION_MARKER);
    }
    Ok(captured)
}

async fn collect(task: &mut JoinHandle<std::io::Result<Vec<u8>>>) -> Vec<u8> {
    match tokio::time::timeout(STREAM_DRAIN_GRACE, &mut *task).await {
        Ok(Ok(Ok(bytes))) => bytes,
        Ok(Ok(Err(e))) => {
            warn!(error = %e, "Failed to read child output");
            Vec::new()
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Output reader task failed");
            Vec::new()
        }
        Err(_) => {
            warn!("Output stream still open after child exit - abandoning");
            task.abort();
            Vec::new()
        }
    }
}
