//! Append-only, daily-rotated JSONL audit trail.
//!
//! This is the authoritative execution trace: every classification,
//! approval, and tool execution writes exactly one line here before (or
//! immediately after) it happens. Unlike the relational tables in `db.rs`,
//! the audit log is a plain file — one writer per process, never updated
//! in place, rotated at UTC midnight.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::Result;

/// The kinds of event the audit trail records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    MessageReceived,
    LlmRequest,
    LlmResponse,
    ToolCall,
    ToolResult,
    ActionClassified,
    ApprovalRequested,
    ApprovalResolved,
    MessageSent,
    Error,
}

/// One line of the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub data: Value,
}

struct OpenFile {
    date: NaiveDate,
    file: File,
}

/// Writes audit entries to `{dir}/audit-YYYY-MM-DD.jsonl`, rotating to a new
/// file whenever the UTC date changes.
pub struct AuditLogger {
    dir: PathBuf,
    current: Mutex<Option<OpenFile>>,
}

impl AuditLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            current: Mutex::new(None),
        })
    }

    /// Append one entry for `session_id`. `data` is whatever type-specific
    /// payload the entry kind calls for; callers build it with `serde_json::json!`.
    pub async fn log(&self, entry_type: EntryType, session_id: &str, data: Value) -> Result<()> {
        let entry = AuditEntry {
            timestamp: Utc::now().to_rfc3339(),
            entry_type,
            session_id: session_id.to_string(),
            data,
        };
        let line = serde_json::to_string(&entry)?;

        let mut guard = self.current.lock().await;
        let today = Utc::now().date_naive();
        let needs_open = match guard.as_ref() {
            Some(open) => open.date != today,
            None => true,
        };
        if needs_open {
            let path = self.path_for(today);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            *guard = Some(OpenFile { date: today, file });
        }

        let open = guard.as_mut().expect("just opened above");
        writeln!(open.file, "{line}")?;
        open.file.flush()?;
        Ok(())
    }

    fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("audit-{}.jsonl", date.format("%Y-%m-%d")))
    }

    /// Path of the log file that would be (or was) written to for `date`.
    /// Exposed for tests and operational tooling; not used by the hot path.
    pub fn log_path_for(&self, date: NaiveDate) -> PathBuf {
        self.path_for(date)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::BufRead;

    fn read_lines(path: &Path) -> Vec<AuditEntry> {
        let file = File::open(path).unwrap();
        std::io::BufReader::new(file)
            .lines()
            .map(|l| serde_json::from_str(&l.unwrap()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn writes_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(dir.path()).unwrap();

        logger
            .log(EntryType::MessageReceived, "session-1", json!({"text": "hi"}))
            .await
            .unwrap();
        logger
            .log(EntryType::ToolCall, "session-1", json!({"toolName": "read_file"}))
            .await
            .unwrap();

        let path = logger.log_path_for(Utc::now().date_naive());
        let entries = read_lines(&path);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].session_id, "session-1");
        assert!(matches!(entries[1].entry_type, EntryType::ToolCall));
    }

    #[test]
    fn entry_type_serializes_to_spec_enumerated_strings() {
        for (variant, expected) in [
            (EntryType::MessageReceived, "message_received"),
            (EntryType::LlmRequest, "llm_request"),
            (EntryType::LlmResponse, "llm_response"),
            (EntryType::ToolCall, "tool_call"),
            (EntryType::ToolResult, "tool_result"),
            (EntryType::ActionClassified, "action_classified"),
            (EntryType::ApprovalRequested, "approval_requested"),
            (EntryType::ApprovalResolved, "approval_resolved"),
            (EntryType::MessageSent, "message_sent"),
            (EntryType::Error, "error"),
        ] {
            let json = serde_json::to_string(&variant).unwrap();
            assert_eq!(json, format!("\"{expected}\""));
        }
    }

    #[tokio::test]
    async fn log_file_name_matches_daily_rotation_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(dir.path()).unwrap();
        logger.log(EntryType::Error, "s", json!({})).await.unwrap();

        let today = Utc::now().date_naive();
        let expected = dir.path().join(format!("audit-{}.jsonl", today.format("%Y-%m-%d")));
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn creates_audit_dir_if_missing() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested").join("audit");
        let logger = AuditLogger::new(&nested).unwrap();
        logger.log(EntryType::Error, "s", json!({})).await.unwrap();
        assert!(nested.exists());
    }
}
