//! Durable state for the continuation loop, persisted in `task_sessions`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Active,
    Completed,
    Failed,
    Paused,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub description: String,
    pub status: StepStatus,
    #[serde(default)]
    pub result: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub iteration: u32,
    pub step: Option<String>,
    pub action: String,
    pub result: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub log: Vec<LogEntry>,
}

impl Plan {
    pub fn new(goal: impl Into<String>) -> Self {
        Self { goal: goal.into(), steps: Vec::new(), assumptions: Vec::new(), log: Vec::new() }
    }

    /// First step that is not yet completed, in declaration order.
    pub fn next_pending_step(&self) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.status != StepStatus::Completed)
    }

    /// A compact, structured rendering of progress for the continuation
    /// prompt (spec §4.7 step 1): no prior turn text, just plan state.
    pub fn summarize(&self) -> String {
        let mut out = format!("Goal: {}\n", self.goal);
        if !self.assumptions.is_empty() {
            out.push_str(&format!("Assumptions: {}\n", self.assumptions.join("; ")));
        }
        out.push_str("Steps:\n");
        for step in &self.steps {
            let marker = match step.status {
                StepStatus::Completed => "[x]",
                StepStatus::InProgress => "[~]",
                StepStatus::Pending => "[ ]",
            };
            out.push_str(&format!("  {marker} {}: {}\n", step.id, step.description));
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct TaskSession {
    pub id: String,
    pub user_id: Option<String>,
    pub status: TaskStatus,
    pub original_request: String,
    pub plan: Option<Plan>,
    pub iteration: u32,
    pub max_iterations: u32,
    pub created_at: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_pending_step_skips_completed() {
        let mut plan = Plan::new("ship feature");
        plan.steps.push(PlanStep { id: "1".into(), description: "design".into(), status: StepStatus::Completed, result: None });
        plan.steps.push(PlanStep { id: "2".into(), description: "implement".into(), status: StepStatus::Pending, result: None });
        assert_eq!(plan.next_pending_step().unwrap().id, "2");
    }

    #[test]
    fn summarize_includes_goal_and_step_markers() {
        let mut plan = Plan::new("ship feature");
        plan.steps.push(PlanStep { id: "1".into(), description: "design".into(), status: StepStatus::Completed, result: None });
        let summary = plan.summarize();
        assert!(summary.contains("Goal: ship feature"));
        assert!(summary.contains("[x] 1: design"));
    }
}
