//! Anthropic Messages API provider.
//!
//! Talks to `{base_url}/v1/messages` directly over HTTP rather than
//! shelling out to a CLI: the core runs unattended as a daemon, and the
//! Messages API already returns structured `tool_use` blocks, so there is
//! nothing to gain from a subprocess or from text-parsing fenced tool-call
//! blocks out of free-form output.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::llm::{ChatParams, ChatResponse, ContentBlock, LlmProvider, StopReason, ToolDefinition, Usage};
use crate::orchestrator::messages::Message;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct ClaudeProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl ClaudeProvider {
    pub fn new(config: &Config) -> Result<Self> {
        if config.llm.anthropic_api_key.is_empty() {
            return Err(CoreError::Config(
                "llm.anthropic_api_key is required when llm.provider = \"claude\"".into(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.llm.timeout_secs))
            .build()
            .map_err(|e| CoreError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: config.llm.anthropic_api_key.clone(),
            base_url: config.llm.anthropic_base_url.clone(),
        })
    }
}

#[async_trait::async_trait]
impl LlmProvider for ClaudeProvider {
    fn name(&self) -> &str {
        "claude"
    }

    async fn chat(&self, params: ChatParams<'_>) -> Result<ChatResponse> {
        let body = AnthropicRequest {
            model: params.model.clone(),
            max_tokens: params.max_tokens,
            system: params.system_prompt.clone(),
            messages: params.messages.iter().map(to_anthropic_message).collect(),
            tools: params.tools.iter().map(to_anthropic_tool).collect(),
        };

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));

        debug!(model = %params.model, messages = params.messages.len(), "calling anthropic messages api");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::Llm(format!("anthropic request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(%status, body = %text, "anthropic api error");
            return Err(CoreError::Llm(format!("anthropic api returned {status}: {text}")));
        }

        let parsed: AnthropicResponse = resp
            .json()
            .await
            .map_err(|e| CoreError::Llm(format!("failed to parse anthropic response: {e}")))?;

        Ok(ChatResponse {
            content: parsed.content.into_iter().map(from_anthropic_block).collect(),
            stop_reason: match parsed.stop_reason.as_deref() {
                Some("tool_use") => StopReason::ToolUse,
                Some("end_turn") => StopReason::EndTurn,
                Some("max_tokens") => StopReason::MaxTokens,
                _ => StopReason::Unknown,
            },
            usage: parsed.usage.map(|u| Usage { input_tokens: u.input_tokens, output_tokens: u.output_tokens }),
        })
    }
}

// -- Anthropic wire types ----------------------------------------------------

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: usize,
    system: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
}

#[derive(Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicBlock>,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

fn to_anthropic_tool(tool: &ToolDefinition) -> AnthropicTool {
    AnthropicTool {
        name: tool.name.clone(),
        description: tool.description.clone(),
        input_schema: tool.parameters_schema.clone(),
    }
}

/// Anthropic has no `tool_results` role: tool results are `user` messages
/// carrying `tool_result` blocks instead.
fn to_anthropic_message(message: &Message) -> AnthropicMessage {
    match message {
        Message::User { content } => {
            AnthropicMessage { role: "user".to_string(), content: vec![AnthropicBlock::Text { text: content.clone() }] }
        }
        Message::Assistant { content } => AnthropicMessage {
            role: "assistant".to_string(),
            content: content
                .iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => AnthropicBlock::Text { text: text.clone() },
                    ContentBlock::ToolUse { id, name, input } => {
                        AnthropicBlock::ToolUse { id: id.clone(), name: name.clone(), input: input.clone() }
                    }
                })
                .collect(),
        },
        Message::ToolResults { content } => AnthropicMessage {
            role: "user".to_string(),
            content: content
                .iter()
                .map(|entry| AnthropicBlock::ToolResult {
                    tool_use_id: entry.tool_call_id.clone(),
                    content: entry.content.clone(),
                })
                .collect(),
        },
    }
}

fn from_anthropic_block(block: AnthropicBlock) -> ContentBlock {
    match block {
        AnthropicBlock::Text { text } => ContentBlock::Text { text },
        AnthropicBlock::ToolUse { id, name, input } => ContentBlock::ToolUse { id, name, input },
        AnthropicBlock::ToolResult { tool_use_id, content } => {
            ContentBlock::Text { text: format!("[stray tool_result {tool_use_id}] {content}") }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_api_key_is_a_config_error() {
        let config = Config::default();
        let result = ClaudeProvider::new(&config);
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn present_api_key_builds_successfully() {
        let mut config = Config::default();
        config.llm.anthropic_api_key = "sk-ant-test".to_string();
        assert!(ClaudeProvider::new(&config).is_ok());
    }

    #[test]
    fn user_message_converts_to_single_text_block() {
        let message = Message::user("hello");
        let converted = to_anthropic_message(&message);
        assert_eq!(converted.role, "user");
        assert_eq!(converted.content.len(), 1);
    }

    #[test]
    fn tool_results_message_converts_to_user_role_with_tool_result_blocks() {
        let message = Message::tool_results(vec![crate::orchestrator::messages::ToolResultEntry {
            tool_call_id: "t1".to_string(),
            content: "ok".to_string(),
        }]);
        let converted = to_anthropic_message(&message);
        assert_eq!(converted.role, "user");
        assert!(matches!(converted.content[0], AnthropicBlock::ToolResult { .. }));
    }

    #[test]
    fn assistant_tool_use_block_round_trips() {
        let message = Message::assistant(vec![ContentBlock::ToolUse {
            id: "t1".to_string(),
            name: "exec".to_string(),
            input: json!({"command": "ls"}),
        }]);
        let converted = to_anthropic_message(&message);
        assert_eq!(converted.role, "assistant");
        let back = from_anthropic_block(converted.content.into_iter().next().unwrap());
        assert_eq!(back, ContentBlock::ToolUse { id: "t1".to_string(), name: "exec".to_string(), input: json!({"command": "ls"}) });
    }
}
