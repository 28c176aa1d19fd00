//! The conversation transcript type threaded through one orchestrator
//! `chat` call. Ordering is significant and preserved across iterations.

use serde::{Deserialize, Serialize};

use crate::llm::ContentBlock;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResultEntry {
    pub tool_call_id: String,
    pub content: String,
}

/// One turn in the transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User { content: String },
    Assistant { content: Vec<ContentBlock> },
    ToolResults { content: Vec<ToolResultEntry> },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User { content: content.into() }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Message::Assistant { content }
    }

    pub fn tool_results(content: Vec<ToolResultEntry>) -> Self {
        Message::ToolResults { content }
    }

    /// Concatenate every `Text` block, ignoring `ToolUse` blocks. Used to
    /// produce `finalText` once a turn ends without a pending tool call.
    pub fn assistant_text(&self) -> Option<String> {
        match self {
            Message::Assistant { content } => {
                let text: String = content
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        ContentBlock::ToolUse { .. } => None,
                    })
                    .collect::<Vec<_>>()
                    .join("");
                Some(text)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_text_concatenates_text_blocks_only() {
        let message = Message::assistant(vec![
            ContentBlock::Text { text: "part one. ".to_string() },
            ContentBlock::ToolUse { id: "t1".to_string(), name: "read_file".to_string(), input: serde_json::json!({}) },
            ContentBlock::Text { text: "part two.".to_string() },
        ]);
        assert_eq!(message.assistant_text().unwrap(), "part one. part two.");
    }

    #[test]
    fn assistant_text_is_none_for_non_assistant_messages() {
        assert!(Message::user("hi").assistant_text().is_none());
        assert!(Message::tool_results(vec![]).assistant_text().is_none());
    }

    #[test]
    fn round_trips_through_json() {
        let message = Message::user("hello");
        let json = serde_json::to_string(&message).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(message, back);
    }
}
