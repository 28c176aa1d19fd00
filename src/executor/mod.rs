//! Shared bootstrap for the three single-shot executor binaries
//! (`secureclaw-exec-{shell,file,web}`).
//!
//! Each executor is a standalone process started by the dispatcher inside
//! a fresh container. All three share the same entry sequence: read the
//! three env vars, verify the capability token, decode the task, run the
//! tool-specific logic, and emit exactly one JSON envelope on stdout. That
//! shared sequence lives here so the three `src/bin/exec_*.rs` files only
//! contain the tool-specific middle.

pub mod output;

use base64::Engine;
use serde::de::DeserializeOwned;

use crate::dispatcher::ExecutorResult;
use crate::security::capabilities::{self, Capability, CapabilitySecret, ExecutorKind};

/// The capability every executor verifies before doing anything else.
/// Never logged, never written anywhere but the env the dispatcher set.
pub struct Bootstrap {
    pub capability: Capability,
}

/// Read `CAPABILITY_TOKEN`/`TASK`/`CAPABILITY_SECRET` from the environment,
/// verify the token against `expected_kind`, and decode the base64-JSON
/// task payload.
///
/// Any failure here is fatal: the caller is expected to print the
/// resulting envelope and exit nonzero without performing any privileged
/// action.
pub fn bootstrap<T: DeserializeOwned>(expected_kind: ExecutorKind) -> Result<(Bootstrap, T), ExecutorResult> {
    let token = read_env("CAPABILITY_TOKEN")?;
    let task_b64 = read_env("TASK")?;
    let secret = read_env("CAPABILITY_SECRET")?;

    let capability = capabilities::verify(&token, &CapabilitySecret::new(secret), expected_kind)
        .map_err(|e| fatal(format!("capability verification failed: {e}")))?;

    let task_json = base64::engine::general_purpose::STANDARD
        .decode(task_b64.as_bytes())
        .map_err(|e| fatal(format!("invalid task encoding: {e}")))?;
    let task: T = serde_json::from_slice(&task_json).map_err(|e| fatal(format!("invalid task payload: {e}")))?;

    eprintln!("[executor] {expected_kind} task verified, timeout={}s", capability.timeout_seconds);

    Ok((Bootstrap { capability }, task))
}

fn read_env(name: &str) -> Result<String, ExecutorResult> {
    std::env::var(name).map_err(|_| fatal(format!("missing required env var {name}")))
}

fn fatal(message: String) -> ExecutorResult {
    ExecutorResult {
        success: false,
        exit_code: None,
        stdout: String::new(),
        stderr: String::new(),
        duration_ms: 0,
        error: Some(message),
    }
}

/// Print `result` as the single stdout envelope and exit 0 whenever the
/// envelope itself was successfully emitted, regardless of
/// `result.success` — the envelope, not the process exit code, is how
/// callers learn whether the tool action succeeded.
pub fn emit_and_exit(result: ExecutorResult) -> ! {
    match serde_json::to_string(&result) {
        Ok(line) => {
            println!("{line}");
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("[executor] failed to serialize envelope: {e}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_envelope_is_never_success() {
        let r = fatal("boom".into());
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("boom"));
    }
}
