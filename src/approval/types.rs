use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A durable row in `pending_approvals`.
///
/// Invariant: at most one transition out of `pending`; `resolved_at` is
/// `Some` iff `status != Pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub tool_name: String,
    pub tool_input: Value,
    pub capability: Value,
    pub reason: String,
    pub plan_context: Option<String>,
    pub status: ApprovalStatus,
    pub created_at: String,
    pub resolved_at: Option<String>,
    pub ext_chat_id: Option<String>,
    pub ext_message_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decision delivered via the bridge's `resolveApproval` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    Approved,
    Rejected,
    SessionApproved,
}

impl Decision {
    /// The terminal `ApprovalStatus` this decision resolves a row to.
    /// `session-approved` is treated as `approved` for persistence and for
    /// the current call.
    pub fn resolved_status(self) -> ApprovalStatus {
        match self {
            Decision::Approved | Decision::SessionApproved => ApprovalStatus::Approved,
            Decision::Rejected => ApprovalStatus::Rejected,
        }
    }

    pub fn proceeds(self) -> bool {
        matches!(self, Decision::Approved | Decision::SessionApproved)
    }
}
