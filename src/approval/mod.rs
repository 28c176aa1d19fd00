pub mod store;
pub mod types;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{Mutex, oneshot};
use tracing::{info, warn};

use crate::classifier::{self, Rule, Tier};
use crate::error::Result;
use crate::security::audit::{AuditLogger, EntryType};
use types::{ApprovalStatus, Decision, PendingApproval};

/// Five minutes.
const APPROVAL_TIMEOUT_SECS: u64 = 300;
/// Crash-recovery sweep cadence.
const SWEEP_INTERVAL_SECS: u64 = 60;

/// Everything needed to classify and, if required, gate one proposed tool
/// call.
pub struct GateRequest {
    pub session_id: String,
    pub user_id: Option<String>,
    pub tool_name: String,
    pub tool_input: Value,
    pub chat_id: Option<String>,
    pub reason: String,
    pub plan_context: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GateResponse {
    pub tier: Tier,
    pub proceed: bool,
    pub approval_id: Option<String>,
}

/// Outbound messages the gate hands to whatever owns the bridge connection.
/// The gate never talks to the bridge socket itself: it only ever pushes
/// onto this channel, and something upstream (the bridge server) drains it.
pub type BridgeSender = tokio::sync::mpsc::UnboundedSender<Value>;

/// Three-tier classify-then-gate decision point.
pub struct ApprovalGate {
    db: Arc<Mutex<Connection>>,
    audit: Arc<AuditLogger>,
    bridge: BridgeSender,
    rules: Vec<Rule>,
    waiters: Mutex<HashMap<String, oneshot::Sender<Decision>>>,
    session_grants: Mutex<HashSet<(String, String, String)>>,
    trusted_domains: Mutex<HashMap<String, HashSet<String>>>,
}

impl ApprovalGate {
    pub fn new(db: Arc<Mutex<Connection>>, audit: Arc<AuditLogger>, bridge: BridgeSender, rules: Vec<Rule>) -> Self {
        Self {
            db,
            audit,
            bridge,
            rules,
            waiters: Mutex::new(HashMap::new()),
            session_grants: Mutex::new(HashSet::new()),
            trusted_domains: Mutex::new(HashMap::new()),
        }
    }

    /// Register `domain` as trusted for browsing by `user_id`, downgrading
    /// future require-approval browse calls to that host to `notify`.
    /// In-process only; not persisted.
    pub async fn mark_trusted_domain(&self, user_id: &str, domain: &str) {
        let mut guard = self.trusted_domains.lock().await;
        guard.entry(user_id.to_string()).or_default().insert(domain.to_lowercase());
    }

    async fn is_trusted_domain(&self, user_id: &str, host: &str) -> bool {
        let guard = self.trusted_domains.lock().await;
        guard
            .get(user_id)
            .map(|domains| domains.iter().any(|d| domain_allows(d, host)))
            .unwrap_or(false)
    }

    async fn has_session_grant(&self, user_id: &str, tool_name: &str, pattern_key: &str) -> Result<bool> {
        {
            let guard = self.session_grants.lock().await;
            if guard.contains(&(user_id.to_string(), tool_name.to_string(), pattern_key.to_string())) {
                return Ok(true);
            }
        }
        let db = self.db.lock().await;
        store::grant_exists(&db, user_id, tool_name, pattern_key)
    }

    async fn install_session_grant(&self, user_id: &str, tool_name: &str, pattern_key: &str) -> Result<()> {
        {
            let mut guard = self.session_grants.lock().await;
            guard.insert((user_id.to_string(), tool_name.to_string(), pattern_key.to_string()));
        }
        let db = self.db.lock().await;
        store::insert_grant(&db, user_id, tool_name, pattern_key)
    }

    /// Classify and, if required, gate a proposed tool call. Blocks (without
    /// holding any lock) on the approval decision when the tier is
    /// `require-approval`.
    pub async fn gate(&self, req: GateRequest) -> Result<GateResponse> {
        let classification = classifier::classify(&req.tool_name, &req.tool_input, &self.rules);
        let mut tier = classification.tier;

        let pattern_key = pattern_key(&req.tool_name, &req.tool_input);
        if tier == Tier::RequireApproval {
            if let Some(user_id) = req.user_id.as_deref() {
                if let Some(host) = host_of(&req.tool_input) {
                    if self.is_trusted_domain(user_id, &host).await {
                        tier = Tier::Notify;
                    }
                }
                if tier == Tier::RequireApproval {
                    if let Some(ref key) = pattern_key {
                        if self.has_session_grant(user_id, &req.tool_name, key).await? {
                            tier = Tier::Notify;
                        }
                    }
                }
            }
        }

        self.audit
            .log(
                EntryType::ActionClassified,
                &req.session_id,
                json!({
                    "toolName": req.tool_name,
                    "tier": tier,
                    "explicit": classification.explicit,
                }),
            )
            .await?;

        match tier {
            Tier::AutoApprove => Ok(GateResponse {
                tier,
                proceed: true,
                approval_id: None,
            }),
            Tier::Notify => {
                let _ = self.bridge.send(json!({
                    "type": "notification",
                    "sessionId": req.session_id,
                    "chatId": req.chat_id,
                    "text": summarize(&req.tool_name, &req.tool_input),
                }));
                Ok(GateResponse {
                    tier,
                    proceed: true,
                    approval_id: None,
                })
            }
            Tier::RequireApproval => {
                let decision = self.require_approval(&req).await?;
                let approval_id = decision.0;
                Ok(GateResponse {
                    tier,
                    proceed: decision.1.proceeds(),
                    approval_id: Some(approval_id),
                })
            }
        }
    }

    async fn require_approval(&self, req: &GateRequest) -> Result<(String, Decision)> {
        let id = store::new_id();
        let row = PendingApproval {
            id: id.clone(),
            session_id: req.session_id.clone(),
            user_id: req.user_id.clone(),
            tool_name: req.tool_name.clone(),
            tool_input: req.tool_input.clone(),
            capability: req.metadata.clone().unwrap_or(Value::Null),
            reason: req.reason.clone(),
            plan_context: req.plan_context.clone(),
            status: ApprovalStatus::Pending,
            created_at: String::new(),
            resolved_at: None,
            ext_chat_id: req.chat_id.clone(),
            ext_message_id: None,
        };
        {
            let db = self.db.lock().await;
            store::insert(&db, &row)?;
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.waiters.lock().await;
            waiters.insert(id.clone(), tx);
        }

        let _ = self.bridge.send(json!({
            "type": "approval-request",
            "approvalId": id,
            "sessionId": req.session_id,
            "chatId": req.chat_id,
            "toolName": req.tool_name,
            "toolInput": req.tool_input,
            "reason": req.reason,
            "planContext": req.plan_context,
        }));
        self.audit
            .log(
                EntryType::ApprovalRequested,
                &req.session_id,
                json!({"approvalId": id, "toolName": req.tool_name}),
            )
            .await?;

        let decision = tokio::select! {
            received = rx => received.unwrap_or(Decision::Rejected),
            _ = tokio::time::sleep(Duration::from_secs(APPROVAL_TIMEOUT_SECS)) => {
                self.waiters.lock().await.remove(&id);
                let db = self.db.lock().await;
                if store::resolve(&db, &id, ApprovalStatus::Expired)? {
                    drop(db);
                    let _ = self.bridge.send(json!({"type": "approval-expired", "approvalId": id}));
                    self.audit
                        .log(EntryType::ApprovalResolved, &req.session_id, json!({"approvalId": id, "decision": "expired"}))
                        .await?;
                }
                Decision::Rejected
            }
        };

        Ok((id, decision))
    }

    /// Deliver a bridge-supplied decision for a pending approval. Called
    /// from the bridge's message-handling path, never from `gate` itself.
    pub async fn resolve_approval(&self, approval_id: &str, session_id: &str, decision: Decision) -> Result<bool> {
        let updated = {
            let db = self.db.lock().await;
            store::resolve(&db, approval_id, decision.resolved_status())?
        };
        if !updated {
            warn!(approval_id, "resolve_approval: row already resolved or missing");
            return Ok(false);
        }

        if let Decision::SessionApproved = decision {
            let row = {
                let db = self.db.lock().await;
                store::get(&db, approval_id)?
            };
            if let (Some(row), Some(user_id)) = (row.as_ref(), row.as_ref().and_then(|r| r.user_id.clone())) {
                if let Some(key) = pattern_key(&row.tool_name, &row.tool_input) {
                    self.install_session_grant(&user_id, &row.tool_name, &key).await?;
                }
            }
        }

        self.audit
            .log(
                EntryType::ApprovalResolved,
                session_id,
                json!({"approvalId": approval_id, "decision": decision}),
            )
            .await?;

        let waiter = self.waiters.lock().await.remove(approval_id);
        if let Some(tx) = waiter {
            let _ = tx.send(decision);
        }
        Ok(true)
    }

    /// Periodic crash-recovery sweep: rows that outlived their deadline
    /// without an in-process waiter (e.g. after a restart) are moved to
    /// `expired` directly. Spawn with `tokio::spawn` at startup.
    pub async fn run_sweeper(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let swept = {
                let db = self.db.lock().await;
                store::sweep_expired(&db, APPROVAL_TIMEOUT_SECS as i64)
            };
            match swept {
                Ok(ids) => {
                    for id in ids {
                        info!(approval_id = %id, "swept stale pending approval to expired");
                        let _ = self.bridge.send(json!({"type": "approval-expired", "approvalId": id}));
                    }
                }
                Err(e) => warn!(error = %e, "approval sweep failed"),
            }
        }
    }
}

/// Derive the pattern-key used for trusted-domain and session-grant
/// downgrades: hostname for browse-shaped input, first path segment for
/// file/shell-shaped input.
fn pattern_key(_tool_name: &str, tool_input: &Value) -> Option<String> {
    if let Some(host) = host_of(tool_input) {
        return Some(host);
    }
    let path = tool_input.get("path").and_then(Value::as_str)?;
    let first_segment = path.trim_start_matches('/').split('/').next()?;
    if first_segment.is_empty() {
        None
    } else {
        Some(first_segment.to_string())
    }
}

fn host_of(tool_input: &Value) -> Option<String> {
    let url = tool_input.get("url").and_then(Value::as_str)?;
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let host = without_scheme.split(['/', '?', '#']).next()?;
    let host = host.rsplit_once('@').map(|(_, h)| h).unwrap_or(host);
    let host = host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host);
    if host.is_empty() { None } else { Some(host.to_lowercase()) }
}

/// A host is subsumed by an allowed domain if it matches exactly or is one
/// of its subdomains. Mirrors `security::capabilities::host_allowed` but
/// takes a single domain, which is what a trusted-domain downgrade checks
/// against.
fn domain_allows(allowed: &str, host: &str) -> bool {
    host == allowed || host.ends_with(&format!(".{allowed}"))
}

/// Human-readable, tool-specific one-liner for `notify`-tier bridge messages.
fn summarize(tool_name: &str, tool_input: &Value) -> String {
    match tool_name {
        "read_file" | "write_file" | "list_files" | "search_files" => {
            let path = tool_input.get("path").and_then(Value::as_str).unwrap_or("?");
            format!("{tool_name}: {path}")
        }
        "exec" => {
            let command = tool_input.get("command").and_then(Value::as_str).unwrap_or("?");
            format!("exec: {command}")
        }
        "browse" | "navigate" => {
            let url = tool_input.get("url").and_then(Value::as_str).unwrap_or("?");
            format!("{tool_name}: {url}")
        }
        other => format!("{other}: {tool_input}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;
    use tempfile::tempdir;

    fn test_gate(rules: Vec<Rule>) -> (Arc<ApprovalGate>, tokio::sync::mpsc::UnboundedReceiver<Value>) {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::migrate(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));
        let dir = tempdir().unwrap();
        let audit = Arc::new(AuditLogger::new(dir.path()).unwrap());
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Arc::new(ApprovalGate::new(db, audit, tx, rules)), rx)
    }

    fn req(tool_name: &str, input: Value) -> GateRequest {
        GateRequest {
            session_id: "s1".into(),
            user_id: Some("u1".into()),
            tool_name: tool_name.into(),
            tool_input: input,
            chat_id: Some("c1".into()),
            reason: "because".into(),
            plan_context: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn auto_approve_proceeds_without_a_record() {
        let rules = vec![Rule {
            tier: Tier::AutoApprove,
            tool_name: "read_file".into(),
            conditions: None,
        }];
        let (gate, _rx) = test_gate(rules);
        let resp = gate.gate(req("read_file", json!({"path": "/workspace/a.txt"}))).await.unwrap();
        assert_eq!(resp.tier, Tier::AutoApprove);
        assert!(resp.proceed);
        assert!(resp.approval_id.is_none());
    }

    #[tokio::test]
    async fn require_approval_then_bridge_approves() {
        let (gate, mut rx) = test_gate(vec![]);
        let gate2 = gate.clone();
        let call = tokio::spawn(async move { gate2.gate(req("exec", json!({"command": "ls"}))).await.unwrap() });

        let msg = tokio::time::timeout(StdDuration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        let approval_id = msg["approvalId"].as_str().unwrap().to_string();

        gate.resolve_approval(&approval_id, "s1", Decision::Approved).await.unwrap();
        let resp = call.await.unwrap();
        assert_eq!(resp.tier, Tier::RequireApproval);
        assert!(resp.proceed);
    }

    #[tokio::test]
    async fn require_approval_then_bridge_rejects() {
        let (gate, mut rx) = test_gate(vec![]);
        let gate2 = gate.clone();
        let call = tokio::spawn(async move { gate2.gate(req("exec", json!({"command": "rm -rf /"}))).await.unwrap() });

        let msg = tokio::time::timeout(StdDuration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        let approval_id = msg["approvalId"].as_str().unwrap().to_string();

        gate.resolve_approval(&approval_id, "s1", Decision::Rejected).await.unwrap();
        let resp = call.await.unwrap();
        assert!(!resp.proceed);
    }

    #[tokio::test]
    async fn session_approved_installs_grant_for_future_calls() {
        let (gate, mut rx) = test_gate(vec![]);
        let gate2 = gate.clone();
        let call = tokio::spawn(async move { gate2.gate(req("exec", json!({"path": "/workspace/a"}))).await.unwrap() });
        let msg = tokio::time::timeout(StdDuration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        let approval_id = msg["approvalId"].as_str().unwrap().to_string();
        gate.resolve_approval(&approval_id, "s1", Decision::SessionApproved).await.unwrap();
        let resp = call.await.unwrap();
        assert!(resp.proceed);

        // Second, otherwise-identical call downgrades to notify via the grant.
        let resp2 = gate.gate(req("exec", json!({"path": "/workspace/b"}))).await.unwrap();
        assert_eq!(resp2.tier, Tier::Notify);
        assert!(resp2.proceed);
    }

    #[tokio::test]
    async fn trusted_domain_downgrades_to_notify() {
        let (gate, _rx) = test_gate(vec![]);
        gate.mark_trusted_domain("u1", "example.com").await;
        let resp = gate.gate(req("browse", json!({"url": "https://example.com/page"}))).await.unwrap();
        assert_eq!(resp.tier, Tier::Notify);
        assert!(resp.proceed);
    }

    #[test]
    fn domain_allows_subsumption() {
        assert!(domain_allows("example.com", "example.com"));
        assert!(domain_allows("example.com", "api.example.com"));
        assert!(!domain_allows("example.com", "evilexample.com"));
    }

    #[test]
    fn host_of_extracts_hostname_ignoring_scheme_and_path() {
        assert_eq!(host_of(&json!({"url": "https://EXAMPLE.com:443/a/b"})), Some("example.com".to_string()));
        assert_eq!(host_of(&json!({"url": "not a url"})), Some("not a url".to_string()));
        assert_eq!(host_of(&json!({})), None);
    }

    #[test]
    fn pattern_key_uses_first_path_segment_for_file_tools() {
        assert_eq!(pattern_key("read_file", &json!({"path": "/workspace/a/b.txt"})), Some("workspace".to_string()));
    }
}
