//! In-process handlers for service tools: thin wrappers around external
//! APIs that require an OAuth-bearing credential resident in the core
//! process. Spec §1 places the OAuth dance and encrypted token store
//! out of scope as an external collaborator; this module only specifies
//! the interface the orchestrator calls once a service tool clears the
//! approval gate, the same way `dispatcher::execute` is the interface for
//! executor tools.
//!
//! Service tools never run inside a sandboxed container: the whole point
//! is that the bearer token they need must never be handed to
//! LLM-controlled code.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{CoreError, Result};

/// One external-API-backed tool. A production deployment registers real
/// implementations (`send_email` via a connected mail provider, calendar
/// lookups, etc.) that hold a `TokenStore` reference; the core itself only
/// depends on this trait.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn invoke(&self, input: &Value) -> Result<String>;
}

/// Looks up a registered `ServiceHandler` by tool name and invokes it.
#[derive(Default)]
pub struct ServiceRegistry {
    handlers: Vec<Box<dyn ServiceHandler>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register(&mut self, handler: Box<dyn ServiceHandler>) {
        self.handlers.push(handler);
    }

    pub async fn invoke(&self, tool_name: &str, input: &Value) -> Result<String> {
        match self.handlers.iter().find(|h| h.name() == tool_name) {
            Some(handler) => handler.invoke(input).await,
            None => Err(CoreError::ToolNotFound(format!(
                "no service handler registered for '{tool_name}' (OAuth token store is an external collaborator)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl ServiceHandler for EchoHandler {
        fn name(&self) -> &str {
            "send_email"
        }

        async fn invoke(&self, input: &Value) -> Result<String> {
            Ok(format!("sent to {}", input.get("to").and_then(Value::as_str).unwrap_or("?")))
        }
    }

    #[tokio::test]
    async fn registered_handler_is_invoked_by_name() {
        let mut registry = ServiceRegistry::new();
        registry.register(Box::new(EchoHandler));
        let result = registry.invoke("send_email", &json!({"to": "ops@example.com"})).await.unwrap();
        assert_eq!(result, "sent to ops@example.com");
    }

    #[tokio::test]
    async fn unregistered_handler_is_a_tool_not_found_error() {
        let registry = ServiceRegistry::new();
        let result = registry.invoke("send_email", &json!({})).await;
        assert!(matches!(result, Err(CoreError::ToolNotFound(_))));
    }
}
