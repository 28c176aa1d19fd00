use std::path::Path;

use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

pub fn open(path: &Path) -> Result<Connection> {
    info!("opening database at {}", path.display());
    let conn = Connection::open(path)?;

    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    migrate(&conn)?;
    Ok(conn)
}

/// Run database migrations. Exposed for tests that use in-memory DBs.
pub(crate) fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- HITL approval gate: one row per require-approval tool call. A
        -- row transitions pending -> {approved,rejected,expired}
        -- at most once; approval::store enforces this with a
        -- `WHERE status = 'pending'` guard on the UPDATE.
        CREATE TABLE IF NOT EXISTS pending_approvals (
            id              TEXT PRIMARY KEY,
            session_id      TEXT NOT NULL,
            user_id         TEXT,
            tool_name       TEXT NOT NULL,
            tool_input      TEXT NOT NULL,
            capability      TEXT NOT NULL,
            reason          TEXT NOT NULL DEFAULT '',
            plan_context    TEXT,
            status          TEXT NOT NULL DEFAULT 'pending',
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            resolved_at     TEXT,
            ext_chat_id     TEXT,
            ext_message_id  TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_pending_approvals_status
            ON pending_approvals (status, created_at);

        -- Continuation loop task sessions.
        CREATE TABLE IF NOT EXISTS task_sessions (
            id               TEXT PRIMARY KEY,
            user_id          TEXT,
            status           TEXT NOT NULL DEFAULT 'active',
            original_request TEXT NOT NULL,
            plan_json        TEXT,
            iteration        INTEGER NOT NULL DEFAULT 0,
            max_iterations   INTEGER NOT NULL DEFAULT 10,
            created_at       TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at       TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Session grants. The gate keeps the authoritative copy
        -- in-process for the life of the session; this table exists so a
        -- restart does not immediately re-prompt for a grant a user already
        -- gave earlier in the process's lifetime. Keyed by
        -- (user_id, tool_name, pattern_key).
        CREATE TABLE IF NOT EXISTS session_grants (
            user_id     TEXT NOT NULL,
            tool_name   TEXT NOT NULL,
            pattern_key TEXT NOT NULL,
            granted_at  TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (user_id, tool_name, pattern_key)
        );

        -- In-process memory tool backing store. Ungated: the orchestrator
        -- never gates memory tool calls, so this table holds nothing an
        -- executor container ever touches.
        CREATE TABLE IF NOT EXISTS memory_entries (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     TEXT,
            category    TEXT NOT NULL DEFAULT 'note',
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_memory_entries_user
            ON memory_entries (user_id, created_at);
        ",
    )?;
    Ok(())
}

/// Creates an in-memory database with migrations applied. Use in tests.
#[cfg(test)]
pub(crate) fn test_db() -> std::sync::Arc<tokio::sync::Mutex<Connection>> {
    use std::sync::Arc;

    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
    migrate(&conn).unwrap();
    Arc::new(tokio::sync::Mutex::new(conn))
}
