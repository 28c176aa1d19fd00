//! OpenRouter provider: an OpenAI-compatible `chat/completions` endpoint
//! that routes to whichever backing model `llm.model` names.
//!
//! Tool calls use the OpenAI function-calling convention
//! (`tool_calls` on the assistant message, `role: "tool"` replies keyed by
//! `tool_call_id`) rather than Anthropic's content-block shape; the
//! conversion lives entirely in this file so the orchestrator never has to
//! know which vendor it is talking to.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::llm::{ChatParams, ChatResponse, ContentBlock, LlmProvider, StopReason, ToolDefinition, Usage};
use crate::orchestrator::messages::Message;

pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenRouterProvider {
    pub fn new(config: &Config) -> Result<Self> {
        if config.llm.openrouter_api_key.is_empty() {
            return Err(CoreError::Config(
                "llm.openrouter_api_key is required when llm.provider = \"openrouter\"".into(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.llm.timeout_secs))
            .build()
            .map_err(|e| CoreError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: config.llm.openrouter_api_key.clone(),
            base_url: config.llm.openrouter_base_url.clone(),
        })
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn chat(&self, params: ChatParams<'_>) -> Result<ChatResponse> {
        let mut messages = vec![OpenAiMessage {
            role: "system".to_string(),
            content: Some(params.system_prompt.clone()),
            tool_calls: None,
            tool_call_id: None,
        }];
        for message in params.messages {
            messages.extend(to_openai_messages(message));
        }

        let tools: Vec<OpenAiTool> = params.tools.iter().map(to_openai_tool).collect();

        let body = ChatRequest {
            model: params.model.clone(),
            messages,
            max_tokens: Some(params.max_tokens),
            tools: if tools.is_empty() { None } else { Some(tools) },
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        debug!(model = %params.model, messages = params.messages.len(), "calling openrouter chat completions");

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::Llm(format!("openrouter request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(%status, body = %text, "openrouter api error");
            return Err(CoreError::Llm(format!("openrouter api returned {status}: {text}")));
        }

        let parsed: ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| CoreError::Llm(format!("failed to parse openrouter response: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::Llm("openrouter response had no choices".into()))?;

        let mut content = Vec::new();
        if let Some(text) = choice.message.content {
            if !text.is_empty() {
                content.push(ContentBlock::Text { text });
            }
        }
        for call in choice.message.tool_calls.unwrap_or_default() {
            let input: Value = serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null);
            content.push(ContentBlock::ToolUse { id: call.id, name: call.function.name, input });
        }

        let stop_reason = match choice.finish_reason.as_deref() {
            Some("tool_calls") => StopReason::ToolUse,
            Some("stop") => StopReason::EndTurn,
            Some("length") => StopReason::MaxTokens,
            _ => StopReason::Unknown,
        };

        Ok(ChatResponse {
            content,
            stop_reason,
            usage: parsed.usage.map(|u| Usage { input_tokens: u.prompt_tokens, output_tokens: u.completion_tokens }),
        })
    }
}

// -- OpenAI-compatible wire types ---------------------------------------------

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
}

#[derive(Serialize, Deserialize, Clone)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize, Clone)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: OpenAiFunctionCall,
}

#[derive(Serialize, Deserialize, Clone)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    kind: String,
    function: OpenAiFunctionDef,
}

#[derive(Serialize)]
struct OpenAiFunctionDef {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

fn to_openai_tool(tool: &ToolDefinition) -> OpenAiTool {
    OpenAiTool {
        kind: "function".to_string(),
        function: OpenAiFunctionDef {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters_schema.clone(),
        },
    }
}

/// Unlike Anthropic, OpenAI-compatible APIs want one `tool` message per
/// result rather than a single message bundling several, so a `ToolResults`
/// turn fans out into N messages here.
fn to_openai_messages(message: &Message) -> Vec<OpenAiMessage> {
    match message {
        Message::User { content } => {
            vec![OpenAiMessage { role: "user".to_string(), content: Some(content.clone()), tool_calls: None, tool_call_id: None }]
        }
        Message::Assistant { content } => {
            let mut text = String::new();
            let mut tool_calls = Vec::new();
            for block in content {
                match block {
                    ContentBlock::Text { text: t } => text.push_str(t),
                    ContentBlock::ToolUse { id, name, input } => tool_calls.push(OpenAiToolCall {
                        id: id.clone(),
                        kind: "function".to_string(),
                        function: OpenAiFunctionCall { name: name.clone(), arguments: input.to_string() },
                    }),
                }
            }
            vec![OpenAiMessage {
                role: "assistant".to_string(),
                content: if text.is_empty() { None } else { Some(text) },
                tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                tool_call_id: None,
            }]
        }
        Message::ToolResults { content } => content
            .iter()
            .map(|entry| OpenAiMessage {
                role: "tool".to_string(),
                content: Some(entry.content.clone()),
                tool_calls: None,
                tool_call_id: Some(entry.tool_call_id.clone()),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_api_key_is_a_config_error() {
        let config = Config::default();
        let result = OpenRouterProvider::new(&config);
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn present_api_key_builds_successfully() {
        let mut config = Config::default();
        config.llm.openrouter_api_key = "sk-or-test".to_string();
        assert!(OpenRouterProvider::new(&config).is_ok());
    }

    #[test]
    fn tool_results_message_fans_out_to_one_message_per_result() {
        let message = Message::tool_results(vec![
            crate::orchestrator::messages::ToolResultEntry { tool_call_id: "t1".to_string(), content: "a".to_string() },
            crate::orchestrator::messages::ToolResultEntry { tool_call_id: "t2".to_string(), content: "b".to_string() },
        ]);
        let converted = to_openai_messages(&message);
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0].role, "tool");
        assert_eq!(converted[0].tool_call_id.as_deref(), Some("t1"));
    }

    #[test]
    fn assistant_message_with_tool_use_produces_tool_calls_with_json_arguments() {
        let message = Message::assistant(vec![ContentBlock::ToolUse {
            id: "t1".to_string(),
            name: "exec".to_string(),
            input: json!({"command": "ls"}),
        }]);
        let converted = to_openai_messages(&message);
        let tool_calls = converted[0].tool_calls.as_ref().unwrap();
        assert_eq!(tool_calls[0].function.name, "exec");
        let args: Value = serde_json::from_str(&tool_calls[0].function.arguments).unwrap();
        assert_eq!(args["command"], "ls");
    }

    #[test]
    fn user_message_has_no_tool_calls() {
        let converted = to_openai_messages(&Message::user("hi"));
        assert_eq!(converted.len(), 1);
        assert!(converted[0].tool_calls.is_none());
    }
}
