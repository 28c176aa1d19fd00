//! Single-shot shell executor.
//!
//! Runs entirely inside a dispatcher-created container with no network and
//! no capabilities beyond its declared mounts. Reads exactly one task,
//! redeems exactly one capability token, and emits exactly one JSON
//! envelope on stdout before exiting.

use std::process::Stdio;
use std::time::{Duration, Instant};

use secureclaw_core::dispatcher::ExecutorResult;
use secureclaw_core::executor::output::CappedBuffer;
use secureclaw_core::executor::{bootstrap, emit_and_exit};
use secureclaw_core::security::capabilities::ExecutorKind;
use secureclaw_core::security::{paths, sandbox};
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

#[derive(Debug, Deserialize)]
struct ShellTask {
    command: String,
    #[serde(default, rename = "workingDir")]
    working_dir: Option<String>,
}

const DEFAULT_WORKDIR: &str = "/workspace";

#[tokio::main]
async fn main() {
    let (boot, task): (_, ShellTask) = match bootstrap(ExecutorKind::Shell) {
        Ok(v) => v,
        Err(envelope) => emit_and_exit(envelope),
    };
    let capability = boot.capability;

    sandbox::apply_resource_limits(&sandbox::ResourceLimits::default());
    sandbox::apply_landlock(std::path::Path::new(DEFAULT_WORKDIR), &capability.mounts);

    let requested = task.working_dir.clone().unwrap_or_default();
    let confined = match paths::confine(&requested, DEFAULT_WORKDIR, &capability.mounts) {
        Ok(c) => c,
        Err(e) => {
            emit_and_exit(ExecutorResult {
                success: false,
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: 0,
                error: Some(e.to_string()),
            });
        }
    };

    let result = run(&task.command, &confined.resolved, capability.timeout_seconds, capability.max_output_bytes).await;
    emit_and_exit(result);
}

async fn run(command: &str, work_dir: &std::path::Path, timeout_secs: u64, max_output_bytes: usize) -> ExecutorResult {
    let start = Instant::now();

    let mut child = match Command::new("/bin/sh")
        .arg("-c")
        .arg(command)
        .current_dir(work_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(c) => c,
        Err(e) => {
            return ExecutorResult {
                success: false,
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: start.elapsed().as_millis() as u64,
                error: Some(format!("failed to spawn: {e}")),
            };
        }
    };

    let stdout_pipe = child.stdout.take().expect("piped stdout");
    let stderr_pipe = child.stderr.take().expect("piped stderr");

    let timeout = Duration::from_secs(timeout_secs);
    let drain_and_wait = async {
        let (stdout, stderr) = read_to_completion(stdout_pipe, stderr_pipe, max_output_bytes).await;
        let status = child.wait().await;
        (stdout, stderr, status)
    };

    // `child` was spawned with `kill_on_drop(true)`; if the timeout below
    // fires, dropping it at function return sends SIGKILL.
    let outcome = tokio::time::timeout(timeout, drain_and_wait).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let (stdout, stderr, wait_result) = match outcome {
        Ok(triple) => triple,
        Err(_elapsed) => {
            return ExecutorResult {
                success: false,
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms,
                error: Some("timeout".to_string()),
            };
        }
    };

    match wait_result {
        Ok(status) => ExecutorResult {
            success: status.success(),
            exit_code: status.code().map(|c| c as i64),
            stdout: stdout.into_string(),
            stderr: stderr.into_string(),
            duration_ms,
            error: None,
        },
        Err(e) => ExecutorResult {
            success: false,
            exit_code: None,
            stdout: stdout.into_string(),
            stderr: stderr.into_string(),
            duration_ms,
            error: Some(format!("wait failed: {e}")),
        },
    }
}

/// Reads both pipes to EOF (or until their caps are reached), returning the
/// accumulated buffers. The two reads run concurrently so a slow stderr
/// consumer can't stall stdout collection or vice versa.
async fn read_to_completion(
    mut stdout_pipe: tokio::process::ChildStdout,
    mut stderr_pipe: tokio::process::ChildStderr,
    max_output_bytes: usize,
) -> (CappedBuffer, CappedBuffer) {
    let mut stdout = CappedBuffer::new(max_output_bytes);
    let mut stderr = CappedBuffer::new(max_output_bytes);

    let stdout_task = async {
        let mut chunk = [0u8; 8192];
        loop {
            match stdout_pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    stdout.push(&String::from_utf8_lossy(&chunk[..n]));
                    if stdout.is_full() {
                        break;
                    }
                }
            }
        }
        stdout
    };
    let stderr_task = async {
        let mut chunk = [0u8; 8192];
        loop {
            match stderr_pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    stderr.push(&String::from_utf8_lossy(&chunk[..n]));
                    if stderr.is_full() {
                        break;
                    }
                }
            }
        }
        stderr
    };

    tokio::join!(stdout_task, stderr_task)
}
