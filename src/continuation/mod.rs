//! Fresh-context continuation loop for tasks whose full execution would
//! exceed a single orchestrator turn's context budget.
//!
//! Each iteration replaces conversation history with a compact plan
//! summary (`Plan::summarize`), invokes the orchestrator with a single
//! synthetic user message about the next pending step, and persists
//! whatever progress the model claims before deciding whether to keep
//! going.

pub mod store;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::Result;
use crate::llm::prompts;
use crate::orchestrator::Orchestrator;
use crate::orchestrator::messages::Message;

use types::{LogEntry, Plan, StepStatus, TaskStatus};

/// Sleep between iterations: long enough to avoid hammering the LLM API on
/// a tight loop, short enough not to matter for a background task.
const INTER_ITERATION_DELAY: Duration = Duration::from_millis(500);

/// Create a new task session for a request too large for one orchestrator
/// turn, and return its id.
pub async fn start(
    db: &Arc<Mutex<Connection>>,
    user_id: Option<&str>,
    original_request: &str,
    max_iterations: u32,
) -> Result<String> {
    let conn = db.lock().await;
    let session = store::create(&conn, user_id, original_request, max_iterations)?;
    Ok(session.id)
}

/// Cooperatively cancel a task session: takes effect at the next iteration
/// boundary, not mid-call (spec §4.7 step 5).
pub async fn stop(db: &Arc<Mutex<Connection>>, task_id: &str) -> Result<()> {
    let conn = db.lock().await;
    store::set_status(&conn, task_id, TaskStatus::Failed)
}

/// Drive one task session to completion, cancellation, or its iteration
/// ceiling. Returns once the session is no longer `active`.
pub async fn run(orchestrator: &Orchestrator, db: &Arc<Mutex<Connection>>, task_id: &str, chat_id: Option<&str>, agent_name: &str) -> Result<()> {
    loop {
        let session = {
            let conn = db.lock().await;
            store::get(&conn, task_id)?
        };
        let Some(session) = session else {
            return Ok(());
        };
        if session.status != TaskStatus::Active {
            return Ok(());
        }
        if session.iteration >= session.max_iterations {
            let conn = db.lock().await;
            store::set_status(&conn, task_id, TaskStatus::Completed)?;
            info!(task_id, "continuation loop hit its iteration ceiling, marking completed");
            return Ok(());
        }

        let mut plan = session.plan.clone().unwrap_or_else(|| Plan::new(session.original_request.clone()));
        let next_step_description = plan.next_pending_step().map(|s| s.description.clone());
        let user_message = match &next_step_description {
            Some(desc) => format!("Continue the task. Next step: {desc}"),
            None => "Continue the task. Make progress toward the overall goal.".to_string(),
        };

        let system_prompt = prompts::continuation_prompt(agent_name, &plan.summarize());
        let iteration = session.iteration + 1;

        let chat_result = orchestrator
            .chat(task_id, vec![Message::user(user_message)], chat_id, session.user_id.as_deref(), system_prompt)
            .await?;

        let (should_continue, cleaned_text) = strip_continue_marker(&chat_result.final_text);
        advance_completed_steps(&mut plan, &cleaned_text);
        plan.log.push(LogEntry {
            iteration,
            step: next_step_description,
            action: "iterate".to_string(),
            result: cleaned_text,
            timestamp: chrono::Utc::now().to_rfc3339(),
        });

        {
            let conn = db.lock().await;
            store::save_plan(&conn, task_id, &plan, iteration)?;
            if !should_continue {
                store::set_status(&conn, task_id, TaskStatus::Completed)?;
            }
        }

        if !should_continue {
            return Ok(());
        }

        tokio::time::sleep(INTER_ITERATION_DELAY).await;
    }
}

/// Scan the assistant's final text for a `[CONTINUE]` marker on its own
/// line, per spec §4.7 step 3. Returns whether it was present and the text
/// with the marker line removed.
fn strip_continue_marker(text: &str) -> (bool, String) {
    let mut found = false;
    let cleaned: Vec<&str> = text
        .lines()
        .filter(|line| {
            if line.trim() == "[CONTINUE]" {
                found = true;
                false
            } else {
                true
            }
        })
        .collect();
    (found, cleaned.join("\n").trim().to_string())
}

/// Heuristic step-completion detection: a pending/in-progress step advances
/// to completed if its description appears in the model's reply alongside
/// a completion cue word. This is a regex-free substring heuristic, not a
/// semantic check, so it will occasionally advance a step the model only
/// mentioned in passing (e.g. while questioning whether it's done) or miss
/// one described in different words. Preserved as specified rather than
/// replaced with something more robust.
fn advance_completed_steps(plan: &mut Plan, final_text: &str) {
    const COMPLETION_CUES: &[&str] = &["done", "completed", "finished", "complete."];
    let lower_text = final_text.to_lowercase();
    let mentions_completion = COMPLETION_CUES.iter().any(|cue| lower_text.contains(cue));
    if !mentions_completion {
        return;
    }
    for step in plan.steps.iter_mut() {
        if step.status == StepStatus::Completed {
            continue;
        }
        if lower_text.contains(&step.description.to_lowercase()) {
            step.status = StepStatus::Completed;
            step.result = Some(final_text.to_string());
        }
    }
}
