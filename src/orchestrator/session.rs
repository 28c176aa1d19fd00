//! Transient per-user conversation state. Unlike `task_sessions` (the
//! continuation loop's durable state), a `Session` lives only in memory and
//! is rebuilt from nothing on restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use super::messages::Message;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub user_id: Option<String>,
    pub messages: Vec<Message>,
    pub created_at: Instant,
    pub updated_at: Instant,
}

impl Session {
    fn new(id: String, user_id: Option<String>) -> Self {
        let now = Instant::now();
        Self { id, user_id, messages: Vec::new(), created_at: now, updated_at: now }
    }
}

/// In-process map of live sessions, keyed by session id. Entries expire
/// `ttl` after their last update and are bounded to `max_messages`
/// messages, oldest dropped first.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    ttl: Duration,
    max_messages: usize,
}

impl SessionStore {
    pub fn new(ttl_secs: u64, max_messages: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl: Duration::from_secs(ttl_secs),
            max_messages,
        }
    }

    /// Fetch a session's current transcript, creating an empty one if this
    /// is the first turn seen for `session_id`.
    pub async fn get_or_create(&self, session_id: &str, user_id: Option<&str>) -> Vec<Message> {
        let mut guard = self.sessions.lock().await;
        self.evict_expired_locked(&mut guard);
        let session = guard
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id.to_string(), user_id.map(str::to_string)));
        session.messages.clone()
    }

    /// Replace a session's transcript after a completed turn, truncating to
    /// the most recent `max_messages` entries.
    pub async fn set_messages(&self, session_id: &str, mut messages: Vec<Message>) {
        let mut guard = self.sessions.lock().await;
        if messages.len() > self.max_messages {
            let drop_count = messages.len() - self.max_messages;
            messages.drain(0..drop_count);
        }
        let entry = guard
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id.to_string(), None));
        entry.messages = messages;
        entry.updated_at = Instant::now();
    }

    fn evict_expired_locked(&self, guard: &mut HashMap<String, Session>) {
        let ttl = self.ttl;
        guard.retain(|_, session| session.updated_at.elapsed() < ttl);
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

pub type SharedSessionStore = Arc<SessionStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_session_starts_empty() {
        let store = SessionStore::new(3600, 50);
        let messages = store.get_or_create("s1", Some("u1")).await;
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn set_messages_persists_for_the_next_get() {
        let store = SessionStore::new(3600, 50);
        store.get_or_create("s1", None).await;
        store.set_messages("s1", vec![Message::user("hi")]).await;
        let messages = store.get_or_create("s1", None).await;
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn set_messages_truncates_to_max_messages() {
        let store = SessionStore::new(3600, 2);
        let messages = vec![Message::user("a"), Message::user("b"), Message::user("c")];
        store.set_messages("s1", messages).await;
        let retained = store.get_or_create("s1", None).await;
        assert_eq!(retained.len(), 2);
        assert_eq!(retained[0], Message::user("b"));
    }

    #[tokio::test]
    async fn expired_sessions_are_evicted_on_next_access() {
        let store = SessionStore::new(0, 50);
        store.set_messages("s1", vec![Message::user("hi")]).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let messages = store.get_or_create("s1", None).await;
        assert!(messages.is_empty());
    }
}
