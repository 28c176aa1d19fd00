//! Single-shot file executor.
//!
//! Operations: `list`, `read`, `write`, `search`, `stat`. Every operation
//! resolves its target path through the same mount-confinement helper the
//! shell executor uses (`security::paths`), so the path-confinement
//! invariant holds identically for both.

use std::path::Path;
use std::time::{Duration, Instant};

use regex::Regex;
use secureclaw_core::dispatcher::ExecutorResult;
use secureclaw_core::executor::{bootstrap, emit_and_exit};
use secureclaw_core::security::capabilities::{Capability, ExecutorKind};
use secureclaw_core::security::paths::{self, Confined};
use secureclaw_core::security::sandbox;
use serde::Deserialize;
use serde_json::{Value, json};

const DEFAULT_WORKDIR: &str = "/workspace";
/// Wall-clock ceiling for `search`, independent of the capability's overall
/// timeout: a runaway regex over a huge tree should not be able to consume
/// the entire container budget before producing partial results.
const SEARCH_CEILING: Duration = Duration::from_secs(10);
const SEARCH_SKIP_DIRS: &[&str] = &["node_modules", "target", "dist", "build", "vendor", ".git"];

#[derive(Debug, Deserialize)]
struct FileTask {
    operation: String,
    #[serde(default)]
    params: Value,
}

#[tokio::main]
async fn main() {
    let (boot, task): (_, FileTask) = match bootstrap(ExecutorKind::File) {
        Ok(v) => v,
        Err(envelope) => emit_and_exit(envelope),
    };

    sandbox::apply_resource_limits(&sandbox::ResourceLimits::default());
    sandbox::apply_landlock(Path::new(DEFAULT_WORKDIR), &boot.capability.mounts);

    let result = dispatch(&task.operation, &task.params, &boot.capability);
    emit_and_exit(result);
}

fn dispatch(operation: &str, params: &Value, capability: &Capability) -> ExecutorResult {
    let start = Instant::now();
    let outcome = match operation {
        "list" => list(params, capability),
        "read" => read(params, capability),
        "write" => write(params, capability),
        "search" => search(params, capability),
        "stat" => stat(params, capability),
        other => Err(format!("unknown operation '{other}'")),
    };
    let duration_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(stdout) => ExecutorResult {
            success: true,
            exit_code: Some(0),
            stdout,
            stderr: String::new(),
            duration_ms,
            error: None,
        },
        Err(message) => ExecutorResult {
            success: false,
            exit_code: Some(1),
            stdout: String::new(),
            stderr: String::new(),
            duration_ms,
            error: Some(message),
        },
    }
}

fn confine(params: &Value, capability: &Capability) -> Result<Confined<'_>, String> {
    let path = params.get("path").and_then(Value::as_str).unwrap_or("");
    paths::confine(path, DEFAULT_WORKDIR, &capability.mounts).map_err(|e| e.to_string())
}

fn confine_writable(params: &Value, capability: &Capability) -> Result<Confined<'_>, String> {
    let path = params.get("path").and_then(Value::as_str).unwrap_or("");
    paths::confine_writable(path, DEFAULT_WORKDIR, &capability.mounts).map_err(|e| e.to_string())
}

fn list(params: &Value, capability: &Capability) -> Result<String, String> {
    let confined = confine(params, capability)?;
    let mut entries = Vec::new();
    let read_dir = std::fs::read_dir(&confined.resolved).map_err(|e| format!("list failed: {e}"))?;
    for entry in read_dir {
        let entry = entry.map_err(|e| format!("list failed: {e}"))?;
        let meta = entry.metadata().map_err(|e| format!("list failed: {e}"))?;
        entries.push(json!({
            "name": entry.file_name().to_string_lossy(),
            "type": if meta.is_dir() { "dir" } else { "file" },
            "size": meta.len(),
        }));
    }
    Ok(serde_json::to_string(&json!({ "entries": entries })).unwrap())
}

fn read(params: &Value, capability: &Capability) -> Result<String, String> {
    let confined = confine(params, capability)?;
    let bytes = std::fs::read(&confined.resolved).map_err(|e| format!("read failed: {e}"))?;
    let mut content = String::from_utf8_lossy(&bytes).into_owned();
    if content.len() > capability.max_output_bytes {
        content.truncate(capability.max_output_bytes);
        content.push_str("\n... [output truncated]");
    }
    Ok(content)
}

fn write(params: &Value, capability: &Capability) -> Result<String, String> {
    let confined = confine_writable(params, capability)?;
    let content = params.get("content").and_then(Value::as_str).unwrap_or("");
    if let Some(parent) = confined.resolved.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("write failed: {e}"))?;
    }
    std::fs::write(&confined.resolved, content).map_err(|e| format!("write failed: {e}"))?;
    Ok(serde_json::to_string(&json!({ "bytesWritten": content.len() })).unwrap())
}

fn stat(params: &Value, capability: &Capability) -> Result<String, String> {
    let confined = confine(params, capability)?;
    let meta = std::fs::metadata(&confined.resolved).map_err(|e| format!("stat failed: {e}"))?;
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs());
    Ok(serde_json::to_string(&json!({
        "size": meta.len(),
        "isDir": meta.is_dir(),
        "modifiedUnix": modified,
    }))
    .unwrap())
}

fn search(params: &Value, capability: &Capability) -> Result<String, String> {
    let confined = confine(params, capability)?;
    let pattern = params.get("pattern").and_then(Value::as_str).ok_or("search requires 'pattern'")?;
    let regex = Regex::new(pattern).map_err(|e| format!("invalid pattern: {e}"))?;
    let max_results = params.get("maxResults").and_then(Value::as_u64).unwrap_or(200) as usize;

    let mut matches = Vec::new();
    let start = Instant::now();
    walk(&confined.resolved, &regex, max_results, &start, &mut matches);

    Ok(serde_json::to_string(&json!({ "matches": matches })).unwrap())
}

fn walk(dir: &Path, regex: &Regex, max_results: usize, start: &Instant, out: &mut Vec<Value>) {
    if out.len() >= max_results || start.elapsed() > SEARCH_CEILING {
        return;
    }
    let Ok(read_dir) = std::fs::read_dir(dir) else { return };
    for entry in read_dir.flatten() {
        if out.len() >= max_results || start.elapsed() > SEARCH_CEILING {
            return;
        }
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || SEARCH_SKIP_DIRS.contains(&name.as_ref()) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if meta.is_dir() {
            walk(&path, regex, max_results, start, out);
        } else if meta.is_file() {
            search_file(&path, regex, max_results, out);
        }
    }
}

fn search_file(path: &Path, regex: &Regex, max_results: usize, out: &mut Vec<Value>) {
    let Ok(content) = std::fs::read_to_string(path) else { return };
    for (lineno, line) in content.lines().enumerate() {
        if out.len() >= max_results {
            return;
        }
        if regex.is_match(line) {
            out.push(json!({
                "file": path.to_string_lossy(),
                "line": lineno + 1,
                "text": line,
            }));
        }
    }
}
