//! The LLM provider boundary: a single trait behind which vendor-specific
//! wire formats are translated into the tagged `ContentBlock`/`StopReason`
//! shapes the orchestrator operates on.

pub mod prompts;

mod claude;
mod openrouter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::orchestrator::messages::Message;

/// One block of an assistant turn: free text, or a proposed tool
/// invocation the orchestrator must classify and gate before it runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    ToolUse,
    EndTurn,
    MaxTokens,
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

/// A tool the LLM may propose, described to it as name + description +
/// JSON-schema-shaped parameters. Populated from the tool catalog.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

pub struct ChatParams<'a> {
    pub model: String,
    pub max_tokens: usize,
    pub system_prompt: String,
    pub tools: &'a [ToolDefinition],
    pub messages: &'a [Message],
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub usage: Option<Usage>,
}

/// The single interface the orchestrator calls. Vendor-specific request/
/// response translation lives entirely inside each implementer.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn chat(&self, params: ChatParams<'_>) -> Result<ChatResponse>;
}

/// Construct the configured provider. `provider` selects between the CLI
/// subprocess backend and the OpenRouter HTTP backend; anything else is a
/// config error caught at startup.
pub fn build_provider(config: &Config) -> Result<Box<dyn LlmProvider>> {
    match config.llm.provider.as_str() {
        "claude" => Ok(Box::new(claude::ClaudeProvider::new(config)?)),
        "openrouter" => Ok(Box::new(openrouter::OpenRouterProvider::new(config)?)),
        other => Err(CoreError::Config(format!(
            "unknown llm.provider '{other}': expected 'claude' or 'openrouter'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_is_a_config_error() {
        let mut config = Config::default();
        config.llm.provider = "gpt5-home-edition".to_string();
        let result = build_provider(&config);
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn content_block_serializes_tagged() {
        let block = ContentBlock::ToolUse {
            id: "t1".to_string(),
            name: "read_file".to_string(),
            input: serde_json::json!({"path": "/workspace/a.txt"}),
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "tool_use");
        assert_eq!(json["name"], "read_file");
    }
}
