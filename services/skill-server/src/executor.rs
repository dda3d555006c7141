//! Sandboxed skill execution.
//!
//! Runs a skill's `scripts/run.*` with the skill directory as working
//! directory, feeds the intent on stdin (and in `SKILLSCALE_INTENT`),
//! captures both output streams with a per-stream cap, and enforces the
//! per-request timeout with SIGTERM followed by SIGKILL.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use ss_skills::SkillDetail;

/// Captured output cap per stream; anything past it is discarded (the
/// stream keeps draining so the child never blocks on a full pipe).
pub const STREAM_CAP: usize = 8 * 1024 * 1024;

/// Grace between SIGTERM and SIGKILL on timeout.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Outcome of one skill execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ExecutionResult {
    fn failed(stderr: String) -> Self {
        ExecutionResult {
            success: false,
            exit_code: -1,
            stdout: String::new(),
            stderr,
            timed_out: false,
        }
    }
}

/// Run `detail`'s executable with `exec_input` on stdin.
///
/// `executor` overrides the interpreter; otherwise it is inferred from the
/// script extension (`py` -> `python3`, `sh` -> `sh`, anything else runs
/// directly).
pub async fn execute_skill(
    detail: &SkillDetail,
    exec_input: &str,
    timeout: Duration,
    executor: Option<&str>,
) -> ExecutionResult {
    let Some(script) = &detail.script_path else {
        return ExecutionResult::failed(format!("no runnable for skill {}", detail.name));
    };

    let mut command = match executor.or_else(|| interpreter_for(script)) {
        Some(interpreter) => {
            let mut c = Command::new(interpreter);
            c.arg(script);
            c
        }
        None => Command::new(script),
    };

    command
        .current_dir(&detail.base_dir)
        .env("SKILLSCALE_INTENT", exec_input)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(skill = %detail.name, script = %script.display(), "running skill executable");

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return ExecutionResult::failed(format!(
                "failed to spawn '{}': {}",
                script.display(),
                e
            ));
        }
    };

    // Drain stdout/stderr concurrently with the stdin write, so a child
    // that fills an output pipe before reading its input cannot deadlock.
    let stdout_task = child.stdout.take().map(|s| tokio::spawn(read_capped(s)));
    let stderr_task = child.stderr.take().map(|s| tokio::spawn(read_capped(s)));

    // Feed the intent from its own task (a child that never reads stdin
    // must not stall the timeout clock) and close the pipe for EOF.
    if let Some(mut stdin) = child.stdin.take() {
        let input = exec_input.as_bytes().to_vec();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&input).await {
                debug!(error = %e, "skill closed stdin early");
            }
        });
    }

    let (status, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => (Some(status), false),
        Ok(Err(e)) => {
            return ExecutionResult::failed(format!("wait failed: {}", e));
        }
        Err(_) => {
            warn!(skill = %detail.name, timeout = ?timeout, "skill timed out, terminating");
            terminate(&child);
            if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
                let _ = child.kill().await;
            }
            (None, true)
        }
    };

    let stdout = collect(stdout_task, "stdout").await;
    let stderr = collect(stderr_task, "stderr").await;

    match status {
        Some(status) => {
            let exit_code = status.code().unwrap_or(-1);
            ExecutionResult {
                success: status.success(),
                exit_code,
                stdout,
                stderr,
                timed_out: false,
            }
        }
        None => {
            debug_assert!(timed_out);
            ExecutionResult {
                success: false,
                exit_code: -1,
                stdout,
                stderr: format!("timeout after {}s", timeout.as_secs_f64()),
                timed_out: true,
            }
        }
    }
}

/// Default interpreter for a script, by extension.
fn interpreter_for(script: &std::path::Path) -> Option<&'static str> {
    match script.extension().and_then(|e| e.to_str()) {
        Some("py") => Some("python3"),
        Some("sh") => Some("sh"),
        _ => None,
    }
}

/// Read a stream to EOF, keeping at most [`STREAM_CAP`] bytes.
async fn read_capped<R>(mut stream: R) -> (Vec<u8>, bool)
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if buf.len() < STREAM_CAP {
                    let take = n.min(STREAM_CAP - buf.len());
                    buf.extend_from_slice(&chunk[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
        }
    }
    (buf, truncated)
}

async fn collect(
    task: Option<tokio::task::JoinHandle<(Vec<u8>, bool)>>,
    stream: &'static str,
) -> String {
    let Some(task) = task else {
        return String::new();
    };
    match task.await {
        Ok((bytes, truncated)) => {
            if truncated {
                warn!(stream, cap = STREAM_CAP, "skill output truncated at cap");
            }
            String::from_utf8_lossy(&bytes).into_owned()
        }
        Err(_) => String::new(),
    }
}

/// Ask the child to exit before the hard kill.
#[cfg(unix)]
fn terminate(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: signalling a pid we own; a stale pid at worst hits
        // nothing because the child is still un-reaped here.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate(_child: &Child) {}
