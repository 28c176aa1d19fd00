//! The tool catalog the orchestrator exposes to the LLM, and the three-way
//! split (executor / service / memory) that decides how a proposed call is
//! actually carried out once it clears the approval gate.
//!
//! This module does not execute anything itself — `catalog()` only
//! describes tools to the LLM provider and classifies them by name. Actual
//! execution is `dispatcher::Dispatcher::execute` for executor tools,
//! `tools::service` for OAuth-bearing external APIs, and `tools::memory`
//! for the in-process note store.

pub mod memory;
pub mod service;

use serde_json::json;

use crate::llm::ToolDefinition;
use crate::security::capabilities::ExecutorKind;

/// How a tool call, once approved, is actually carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Runs in a dispatcher-created container that redeems a capability
    /// token.
    Executor(ExecutorKind),
    /// Runs in-process against an OAuth-bearing external API. Never
    /// touches a container; the token never leaves the core process.
    Service,
    /// Runs in-process against the local note store. Never gated.
    Memory,
}

/// Look up how `tool_name` is carried out. Returns `None` for a name not in
/// the catalog at all (the orchestrator treats that as a protocol error:
/// the LLM proposed a tool it was never offered).
pub fn tool_kind(tool_name: &str) -> Option<ToolKind> {
    match tool_name {
        "read_file" | "write_file" | "list_files" | "search_files" | "stat_file" => {
            Some(ToolKind::Executor(ExecutorKind::File))
        }
        "exec" => Some(ToolKind::Executor(ExecutorKind::Shell)),
        "browse" => Some(ToolKind::Executor(ExecutorKind::Web)),
        "remember" | "recall" | "forget_memory" => Some(ToolKind::Memory),
        "send_email" => Some(ToolKind::Service),
        _ => None,
    }
}

/// The file executor operation a file-kind tool name maps to. Callers build
/// the file executor's task JSON directly from the tool-call input; this
/// just supplies the `operation` discriminant the task envelope expects.
pub fn file_operation(tool_name: &str) -> &'static str {
    match tool_name {
        "read_file" => "read",
        "write_file" => "write",
        "list_files" => "list",
        "search_files" => "search",
        "stat_file" => "stat",
        _ => "read",
    }
}

/// Every tool definition offered to the LLM, in a fixed order (memory tools
/// first, then executor tools, then service tools — matches the order the
/// spec lists them in §4.6).
pub fn catalog() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "remember".to_string(),
            description: "Save a short note to persistent memory for later recall. Not gated: memory tools never need operator approval.".to_string(),
            parameters_schema: json!({
                "type": "object",
                "required": ["content"],
                "properties": {
                    "content": {"type": "string", "description": "The text to remember"},
                    "category": {"type": "string", "description": "Optional grouping label, e.g. \"preference\" or \"fact\""}
                }
            }),
        },
        ToolDefinition {
            name: "recall".to_string(),
            description: "Search previously remembered notes by substring match.".to_string(),
            parameters_schema: json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {"type": "string", "description": "Substring to search for"},
                    "limit": {"type": "integer", "description": "Max results (default 10)"}
                }
            }),
        },
        ToolDefinition {
            name: "forget_memory".to_string(),
            description: "Delete a previously remembered note by id.".to_string(),
            parameters_schema: json!({
                "type": "object",
                "required": ["id"],
                "properties": {
                    "id": {"type": "integer", "description": "The memory entry id returned by recall"}
                }
            }),
        },
        ToolDefinition {
            name: "read_file".to_string(),
            description: "Read a file's contents. The path must fall within a mounted directory.".to_string(),
            parameters_schema: json!({
                "type": "object",
                "required": ["path"],
                "properties": {"path": {"type": "string"}}
            }),
        },
        ToolDefinition {
            name: "write_file".to_string(),
            description: "Write text content to a file. The path must fall within a mounted, writable directory."
                .to_string(),
            parameters_schema: json!({
                "type": "object",
                "required": ["path", "content"],
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                }
            }),
        },
        ToolDefinition {
            name: "list_files".to_string(),
            description: "List entries in a directory.".to_string(),
            parameters_schema: json!({
                "type": "object",
                "required": ["path"],
                "properties": {"path": {"type": "string"}}
            }),
        },
        ToolDefinition {
            name: "search_files".to_string(),
            description: "Search file contents for a regular expression, recursively from a path.".to_string(),
            parameters_schema: json!({
                "type": "object",
                "required": ["path", "pattern"],
                "properties": {
                    "path": {"type": "string"},
                    "pattern": {"type": "string"}
                }
            }),
        },
        ToolDefinition {
            name: "stat_file".to_string(),
            description: "Return metadata (size, modified time, kind) for a path.".to_string(),
            parameters_schema: json!({
                "type": "object",
                "required": ["path"],
                "properties": {"path": {"type": "string"}}
            }),
        },
        ToolDefinition {
            name: "exec".to_string(),
            description: "Run a shell command in an isolated, network-disabled container. Requires operator approval unless classified auto-approve.".to_string(),
            parameters_schema: json!({
                "type": "object",
                "required": ["command"],
                "properties": {
                    "command": {"type": "string"},
                    "workingDir": {"type": "string"}
                }
            }),
        },
        ToolDefinition {
            name: "browse".to_string(),
            description: "Drive a headless browser: navigate, click, type, screenshot, or extract the accessibility tree of a page. Network is restricted to an explicit domain allowlist.".to_string(),
            parameters_schema: json!({
                "type": "object",
                "required": ["action"],
                "properties": {
                    "action": {"type": "string", "enum": ["navigate", "click", "type", "screenshot", "extract"]},
                    "url": {"type": "string"},
                    "selector": {"type": "string"},
                    "label": {"type": "string"},
                    "text": {"type": "string"},
                    "screenshot": {"type": "boolean"}
                }
            }),
        },
        ToolDefinition {
            name: "send_email".to_string(),
            description: "Send an email via the operator's connected mail account. Runs in-process against an OAuth-bearing service; never runs in a container.".to_string(),
            parameters_schema: json!({
                "type": "object",
                "required": ["to", "subject", "body"],
                "properties": {
                    "to": {"type": "string"},
                    "subject": {"type": "string"},
                    "body": {"type": "string"}
                }
            }),
        },
    ]
}
