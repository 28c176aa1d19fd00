//! Bridge↔core wire types. The socket carries newline-delimited JSON; each
//! line deserializes into one incoming message, and outgoing messages are
//! arbitrary `Value`s built with `serde_json::json!` at the call site (the
//! approval gate and orchestrator already do this for `notification`,
//! `approval-request`, etc.) and serialized the same way.

use serde::Deserialize;
use serde_json::Value;

use crate::approval::types::Decision;

/// One line read from a bridge connection, before it's been classified.
/// Bridge→core has two shapes in practice: the legacy untyped envelope for
/// ordinary user messages (`requestId` + `message`, no `type`), and typed
/// messages that carry a `type` discriminant (`approval-decision` being the
/// one this core acts on directly).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawIncoming {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
    pub message: Option<Value>,
    #[serde(rename = "replyTo")]
    pub reply_to: Option<Value>,
    #[serde(rename = "approvalId")]
    pub approval_id: Option<String>,
    pub decision: Option<Decision>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// A `RawIncoming` line classified into the two shapes the core actually
/// acts on. Anything else (the Phase-4/5 typed request messages spec §6
/// mentions in passing — memory-list, session-list, task-stop) is a
/// protocol detail of the external bridge adapter and is not redesigned
/// here; `RawIncoming` deserializes them without error, but `classify`
/// reports them as `Unrecognized` rather than guessing a handler for them.
#[derive(Debug, Clone)]
pub enum Incoming {
    ApprovalDecision { approval_id: String, session_id: String, decision: Decision },
    UserMessage { request_id: String, message: Value, reply_to: Option<Value> },
    Unrecognized,
}

pub fn classify(raw: RawIncoming) -> Incoming {
    if raw.kind.as_deref() == Some("approval-decision") {
        if let Some(approval_id) = raw.approval_id {
            return Incoming::ApprovalDecision {
                approval_id,
                session_id: raw.session_id.unwrap_or_default(),
                decision: raw.decision.unwrap_or(Decision::Rejected),
            };
        }
        return Incoming::Unrecognized;
    }
    if raw.kind.is_none() {
        if let (Some(request_id), Some(message)) = (raw.request_id, raw.message) {
            return Incoming::UserMessage { request_id, message, reply_to: raw.reply_to };
        }
    }
    Incoming::Unrecognized
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_approval_decision() {
        let raw: RawIncoming = serde_json::from_value(json!({
            "type": "approval-decision",
            "approvalId": "a1",
            "sessionId": "s1",
            "decision": "approved",
        }))
        .unwrap();
        match classify(raw) {
            Incoming::ApprovalDecision { approval_id, decision, .. } => {
                assert_eq!(approval_id, "a1");
                assert_eq!(decision, Decision::Approved);
            }
            other => panic!("expected ApprovalDecision, got {other:?}"),
        }
    }

    #[test]
    fn classifies_legacy_user_message() {
        let raw: RawIncoming = serde_json::from_value(json!({
            "requestId": "r1",
            "message": {"text": "hi"},
        }))
        .unwrap();
        match classify(raw) {
            Incoming::UserMessage { request_id, .. } => assert_eq!(request_id, "r1"),
            other => panic!("expected UserMessage, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_message_is_reported_not_guessed() {
        let raw: RawIncoming = serde_json::from_value(json!({"type": "memory-list-request"})).unwrap();
        assert!(matches!(classify(raw), Incoming::Unrecognized));
    }
}
