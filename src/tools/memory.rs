//! In-process handlers for the `remember` / `recall` / `forget_memory`
//! tools. Never gated (spec §4.6 step 5: "Memory tools: handled in-process,
//! no gating, returned result is a plain string") and backed by the plain
//! `memory_entries` table, not the FTS-backed long-term memory store that
//! is an explicit non-goal for this core.

use std::sync::Arc;

use rusqlite::{Connection, params};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::Result;

/// `remember({content, category?})` → a confirmation string.
pub async fn remember(db: &Arc<Mutex<Connection>>, user_id: Option<&str>, input: &Value) -> Result<String> {
    let content = input.get("content").and_then(Value::as_str).unwrap_or_default();
    if content.is_empty() {
        return Ok("content is required".to_string());
    }
    let category = input.get("category").and_then(Value::as_str).unwrap_or("note");

    let conn = db.lock().await;
    conn.execute(
        "INSERT INTO memory_entries (user_id, category, content) VALUES (?1, ?2, ?3)",
        params![user_id, category, content],
    )?;
    let id = conn.last_insert_rowid();
    Ok(format!("Remembered (id {id}): {content}"))
}

/// `recall({query, limit?})` → matching entries, newest first.
pub async fn recall(db: &Arc<Mutex<Connection>>, user_id: Option<&str>, input: &Value) -> Result<String> {
    let query = input.get("query").and_then(Value::as_str).unwrap_or_default();
    if query.is_empty() {
        return Ok("query is required".to_string());
    }
    let limit = input.get("limit").and_then(Value::as_i64).unwrap_or(10).clamp(1, 100);
    let pattern = format!("%{query}%");

    let conn = db.lock().await;
    let mut stmt = conn.prepare(
        "SELECT id, category, content, created_at FROM memory_entries
         WHERE content LIKE ?1 AND (user_id = ?2 OR user_id IS NULL)
         ORDER BY created_at DESC LIMIT ?3",
    )?;
    let rows: Vec<String> = stmt
        .query_map(params![pattern, user_id, limit], |row| {
            let id: i64 = row.get(0)?;
            let category: String = row.get(1)?;
            let content: String = row.get(2)?;
            let created_at: String = row.get(3)?;
            Ok(format!("[{id}] [{created_at}] ({category}) {content}"))
        })?
        .collect::<std::result::Result<_, _>>()?;

    if rows.is_empty() {
        Ok("No matching memories found.".to_string())
    } else {
        Ok(rows.join("\n"))
    }
}

/// `forget_memory({id})` → a confirmation or not-found string.
pub async fn forget(db: &Arc<Mutex<Connection>>, input: &Value) -> Result<String> {
    let id = match input.get("id").and_then(Value::as_i64) {
        Some(id) => id,
        None => return Ok("id is required".to_string()),
    };
    let conn = db.lock().await;
    let deleted = conn.execute("DELETE FROM memory_entries WHERE id = ?1", params![id])?;
    if deleted > 0 {
        Ok(format!("Forgot memory {id}"))
    } else {
        Ok(format!("Memory {id} not found"))
    }
}
