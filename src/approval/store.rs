//! Synchronous `pending_approvals`/`session_grants` queries. Kept separate
//! from `ApprovalGate` so the transition guard (`WHERE status = 'pending'`)
//! lives in one place and is trivially testable against a plain
//! `rusqlite::Connection`.

use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::error::Result;

use super::types::{ApprovalStatus, PendingApproval};

pub fn insert(conn: &Connection, row: &PendingApproval) -> Result<()> {
    conn.execute(
        "INSERT INTO pending_approvals
            (id, session_id, user_id, tool_name, tool_input, capability, reason, plan_context, status, ext_chat_id, ext_message_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            row.id,
            row.session_id,
            row.user_id,
            row.tool_name,
            row.tool_input.to_string(),
            row.capability.to_string(),
            row.reason,
            row.plan_context,
            row.status.as_str(),
            row.ext_chat_id,
            row.ext_message_id,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<PendingApproval>> {
    conn.query_row(
        "SELECT id, session_id, user_id, tool_name, tool_input, capability, reason,
                plan_context, status, created_at, resolved_at, ext_chat_id, ext_message_id
         FROM pending_approvals WHERE id = ?1",
        [id],
        row_to_pending_approval,
    )
    .optional()
    .map_err(Into::into)
}

/// Transition `id` from `pending` to `status`, iff it is currently pending.
/// Returns whether a row was actually updated (the monotonicity invariant:
/// a second resolution attempt is a no-op that returns `false`).
pub fn resolve(conn: &Connection, id: &str, status: ApprovalStatus) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE pending_approvals
         SET status = ?2, resolved_at = datetime('now')
         WHERE id = ?1 AND status = 'pending'",
        params![id, status.as_str()],
    )?;
    Ok(rows > 0)
}

/// Sweep every row that has been pending longer than `timeout_secs` to
/// `expired`, returning the ids actually swept. Run periodically for crash
/// recovery: persistence is authoritative across restarts, the in-process
/// waiter is not.
pub fn sweep_expired(conn: &Connection, timeout_secs: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM pending_approvals
         WHERE status = 'pending'
           AND strftime('%s', 'now') - strftime('%s', created_at) > ?1",
    )?;
    let ids: Vec<String> = stmt
        .query_map([timeout_secs], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;
    drop(stmt);

    let mut swept = Vec::new();
    for id in ids {
        if resolve(conn, &id, ApprovalStatus::Expired)? {
            swept.push(id);
        }
    }
    Ok(swept)
}

pub fn grant_exists(conn: &Connection, user_id: &str, tool_name: &str, pattern_key: &str) -> Result<bool> {
    let exists: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM session_grants WHERE user_id = ?1 AND tool_name = ?2 AND pattern_key = ?3)",
            params![user_id, tool_name, pattern_key],
            |row| row.get(0),
        )?;
    Ok(exists)
}

pub fn insert_grant(conn: &Connection, user_id: &str, tool_name: &str, pattern_key: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO session_grants (user_id, tool_name, pattern_key) VALUES (?1, ?2, ?3)",
        params![user_id, tool_name, pattern_key],
    )?;
    Ok(())
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn row_to_pending_approval(row: &rusqlite::Row) -> rusqlite::Result<PendingApproval> {
    let tool_input: String = row.get(4)?;
    let capability: String = row.get(5)?;
    let status: String = row.get(8)?;
    Ok(PendingApproval {
        id: row.get(0)?,
        session_id: row.get(1)?,
        user_id: row.get(2)?,
        tool_name: row.get(3)?,
        tool_input: serde_json::from_str(&tool_input).unwrap_or(serde_json::Value::Null),
        capability: serde_json::from_str(&capability).unwrap_or(serde_json::Value::Null),
        reason: row.get(6)?,
        plan_context: row.get(7)?,
        status: ApprovalStatus::from_str_opt(&status).unwrap_or(ApprovalStatus::Pending),
        created_at: row.get(9)?,
        resolved_at: row.get(10)?,
        ext_chat_id: row.get(11)?,
        ext_message_id: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::migrate(&conn).unwrap();
        conn
    }

    fn row(id: &str) -> PendingApproval {
        PendingApproval {
            id: id.to_string(),
            session_id: "s1".into(),
            user_id: Some("u1".into()),
            tool_name: "write_file".into(),
            tool_input: json!({"path": "/workspace/a.txt"}),
            capability: json!({"executorKind": "file"}),
            reason: "writing notes".into(),
            plan_context: None,
            status: ApprovalStatus::Pending,
            created_at: String::new(),
            resolved_at: None,
            ext_chat_id: Some("chat-1".into()),
            ext_message_id: None,
        }
    }

    #[test]
    fn insert_then_get_round_trips() {
        let conn = test_conn();
        insert(&conn, &row("a1")).unwrap();
        let fetched = get(&conn, "a1").unwrap().unwrap();
        assert_eq!(fetched.tool_name, "write_file");
        assert_eq!(fetched.status, ApprovalStatus::Pending);
        assert!(fetched.resolved_at.is_none());
    }

    #[test]
    fn resolve_transitions_pending_row() {
        let conn = test_conn();
        insert(&conn, &row("a1")).unwrap();
        let updated = resolve(&conn, "a1", ApprovalStatus::Approved).unwrap();
        assert!(updated);

        let fetched = get(&conn, "a1").unwrap().unwrap();
        assert_eq!(fetched.status, ApprovalStatus::Approved);
        assert!(fetched.resolved_at.is_some());
    }

    #[test]
    fn second_resolve_is_a_no_op() {
        let conn = test_conn();
        insert(&conn, &row("a1")).unwrap();
        assert!(resolve(&conn, "a1", ApprovalStatus::Approved).unwrap());
        assert!(!resolve(&conn, "a1", ApprovalStatus::Rejected).unwrap());

        let fetched = get(&conn, "a1").unwrap().unwrap();
        assert_eq!(fetched.status, ApprovalStatus::Approved);
    }

    #[test]
    fn sweep_expired_only_touches_rows_older_than_timeout() {
        let conn = test_conn();
        conn.execute(
            "INSERT INTO pending_approvals (id, session_id, tool_name, tool_input, capability, created_at)
             VALUES ('old', 's1', 'exec', '{}', '{}', datetime('now', '-10 minutes'))",
            [],
        )
        .unwrap();
        insert(&conn, &row("fresh")).unwrap();

        let swept = sweep_expired(&conn, 300).unwrap();
        assert_eq!(swept, vec!["old".to_string()]);

        assert_eq!(get(&conn, "old").unwrap().unwrap().status, ApprovalStatus::Expired);
        assert_eq!(get(&conn, "fresh").unwrap().unwrap().status, ApprovalStatus::Pending);
    }

    #[test]
    fn session_grants_round_trip() {
        let conn = test_conn();
        assert!(!grant_exists(&conn, "u1", "browse", "example.com").unwrap());
        insert_grant(&conn, "u1", "browse", "example.com").unwrap();
        assert!(grant_exists(&conn, "u1", "browse", "example.com").unwrap());
    }
}
