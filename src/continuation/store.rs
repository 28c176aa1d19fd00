//! `task_sessions` persistence.

use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::error::Result;

use super::types::{Plan, TaskSession, TaskStatus};

pub fn create(conn: &Connection, user_id: Option<&str>, original_request: &str, max_iterations: u32) -> Result<TaskSession> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO task_sessions (id, user_id, status, original_request, plan_json, iteration, max_iterations)
         VALUES (?1, ?2, 'active', ?3, NULL, 0, ?4)",
        params![id, user_id, original_request, max_iterations],
    )?;
    get(conn, &id)?.ok_or_else(|| crate::error::CoreError::Runtime("task session vanished immediately after insert".into()))
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<TaskSession>> {
    conn.query_row(
        "SELECT id, user_id, status, original_request, plan_json, iteration, max_iterations, created_at, updated_at
         FROM task_sessions WHERE id = ?1",
        [id],
        row_to_task_session,
    )
    .optional()
    .map_err(Into::into)
}

pub fn save_plan(conn: &Connection, id: &str, plan: &Plan, iteration: u32) -> Result<()> {
    let plan_json = serde_json::to_string(plan)?;
    conn.execute(
        "UPDATE task_sessions SET plan_json = ?2, iteration = ?3, updated_at = datetime('now') WHERE id = ?1",
        params![id, plan_json, iteration],
    )?;
    Ok(())
}

pub fn set_status(conn: &Connection, id: &str, status: TaskStatus) -> Result<()> {
    conn.execute(
        "UPDATE task_sessions SET status = ?2, updated_at = datetime('now') WHERE id = ?1",
        params![id, status.as_str()],
    )?;
    Ok(())
}

fn row_to_task_session(row: &rusqlite::Row) -> rusqlite::Result<TaskSession> {
    let status: String = row.get(2)?;
    let plan_json: Option<String> = row.get(4)?;
    Ok(TaskSession {
        id: row.get(0)?,
        user_id: row.get(1)?,
        status: TaskStatus::from_str_opt(&status).unwrap_or(TaskStatus::Active),
        original_request: row.get(3)?,
        plan: plan_json.and_then(|s| serde_json::from_str(&s).ok()),
        iteration: row.get(5)?,
        max_iterations: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::migrate(&conn).unwrap();
        conn
    }

    #[test]
    fn create_then_get_round_trips() {
        let conn = test_conn();
        let session = create(&conn, Some("u1"), "write a report", 10).unwrap();
        assert_eq!(session.status, TaskStatus::Active);
        assert_eq!(session.iteration, 0);
        assert!(session.plan.is_none());

        let fetched = get(&conn, &session.id).unwrap().unwrap();
        assert_eq!(fetched.original_request, "write a report");
    }

    #[test]
    fn save_plan_persists_and_bumps_iteration() {
        let conn = test_conn();
        let session = create(&conn, None, "do a thing", 10).unwrap();
        let plan = Plan::new("do a thing");
        save_plan(&conn, &session.id, &plan, 1).unwrap();

        let fetched = get(&conn, &session.id).unwrap().unwrap();
        assert_eq!(fetched.iteration, 1);
        assert_eq!(fetched.plan.unwrap().goal, "do a thing");
    }

    #[test]
    fn set_status_transitions_task() {
        let conn = test_conn();
        let session = create(&conn, None, "do a thing", 10).unwrap();
        set_status(&conn, &session.id, TaskStatus::Failed).unwrap();
        let fetched = get(&conn, &session.id).unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Failed);
    }

    #[test]
    fn get_missing_session_is_none() {
        let conn = test_conn();
        assert!(get(&conn, "nonexistent").unwrap().is_none());
    }
}
