//! Tool capability registry and call dispatch
//!
//! The engine does not hardcode any functions. The embedding application
//! registers named handlers; when a model completion requests tool calls,
//! the dispatcher resolves them by name and runs the whole batch
//! concurrently. Results come back in request order regardless of completion
//! order, so replay stays deterministic, and a single failing call becomes a
//! tool-result error payload instead of aborting the batch.

use crate::client::ToolCall;
use crate::error::Result;
use crate::session::conversation::Message;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// An invocable capability exposed to the model
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Function-declaration schema forwarded to the API client
    fn declaration(&self) -> serde_json::Value;

    /// Executes the tool with a structured argument payload
    ///
    /// # Errors
    ///
    /// A failure here is captured per call by the dispatcher; it does not
    /// abort the batch.
    async fn invoke(&self, args: serde_json::Value) -> Result<serde_json::Value>;
}

/// Name-keyed registry of tool handlers
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers a handler under a name, replacing any previous one
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Looks up a handler by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Declaration schemas for every registered tool
    pub fn declarations(&self) -> Vec<serde_json::Value> {
        self.handlers
            .values()
            .map(|handler| handler.declaration())
            .collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when no tools are registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs batches of tool calls against a registry
pub struct ToolCallDispatcher {
    registry: Arc<ToolRegistry>,
}

impl ToolCallDispatcher {
    /// A dispatcher over the given registry
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// The underlying registry
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Executes every call in the batch concurrently and returns tool-role
    /// messages in the same order as the requests.
    ///
    /// An unknown name or a failing invocation yields a tool message whose
    /// response is `{"error": ...}`.
    pub async fn dispatch(&self, calls: &[ToolCall]) -> Vec<Message> {
        debug!(batch = calls.len(), "dispatching tool calls");

        let futures = calls.iter().map(|call| {
            let handler = self.registry.get(&call.name);
            let name = call.name.clone();
            let args = call.args.clone();
            async move {
                let response = match handler {
                    Some(handler) => match handler.invoke(args).await {
                        Ok(response) => response,
                        Err(err) => {
                            warn!(tool = %name, error = %err, "tool invocation failed");
                            serde_json::json!({ "error": err.to_string() })
                        }
                    },
                    None => {
                        warn!(tool = %name, "tool not found in registry");
                        serde_json::json!({ "error": format!("Tool not found: {name}") })
                    }
                };
                Message::tool(name, response)
            }
        });

        join_all(futures).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        fn declaration(&self) -> serde_json::Value {
            serde_json::json!({
                "name": "echo",
                "description": "Echoes its arguments",
                "parameters": {"type": "object"}
            })
        }

        async fn invoke(&self, args: serde_json::Value) -> Result<serde_json::Value> {
            Ok(serde_json::json!({ "echo": args }))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl ToolHandler for FailingTool {
        fn declaration(&self) -> serde_json::Value {
            serde_json::json!({"name": "fail", "parameters": {"type": "object"}})
        }

        async fn invoke(&self, _args: serde_json::Value) -> Result<serde_json::Value> {
            anyhow::bail!("deliberate failure")
        }
    }

    /// Sleeps for the duration given in its arguments, then reports it
    struct SlowTool;

    #[async_trait]
    impl ToolHandler for SlowTool {
        fn declaration(&self) -> serde_json::Value {
            serde_json::json!({"name": "slow", "parameters": {"type": "object"}})
        }

        async fn invoke(&self, args: serde_json::Value) -> Result<serde_json::Value> {
            let millis = args["millis"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(serde_json::json!({ "slept": millis }))
        }
    }

    fn registry_with(entries: Vec<(&str, Arc<dyn ToolHandler>)>) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        for (name, handler) in entries {
            registry.register(name, handler);
        }
        Arc::new(registry)
    }

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            name: name.to_string(),
            args,
        }
    }

    #[test]
    fn test_registry_register_and_get() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.register("echo", Arc::new(EchoTool));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_registry_declarations() {
        let mut registry = ToolRegistry::new();
        registry.register("echo", Arc::new(EchoTool));
        registry.register("fail", Arc::new(FailingTool));
        assert_eq!(registry.declarations().len(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_preserves_request_order() {
        let registry = registry_with(vec![("slow", Arc::new(SlowTool))]);
        let dispatcher = ToolCallDispatcher::new(registry);

        // The first call finishes last; output order must still match input
        let calls = vec![
            call("slow", serde_json::json!({"millis": 30})),
            call("slow", serde_json::json!({"millis": 1})),
        ];
        let results = dispatcher.dispatch(&calls).await;
        assert_eq!(results.len(), 2);

        let payload = |message: &Message| match message {
            Message::Tool(tool) => tool.response.clone(),
            other => panic!("expected tool message, got {}", other.role()),
        };
        assert_eq!(payload(&results[0])["slept"], 30);
        assert_eq!(payload(&results[1])["slept"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_runs_batch_concurrently() {
        let registry = registry_with(vec![("slow", Arc::new(SlowTool))]);
        let dispatcher = ToolCallDispatcher::new(registry);

        let calls = vec![
            call("slow", serde_json::json!({"millis": 50})),
            call("slow", serde_json::json!({"millis": 50})),
        ];
        let start = tokio::time::Instant::now();
        dispatcher.dispatch(&calls).await;
        // Sequential execution would take 100ms
        assert_eq!(start.elapsed(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_failing_call_becomes_error_payload() {
        let registry = registry_with(vec![
            ("echo", Arc::new(EchoTool) as Arc<dyn ToolHandler>),
            ("fail", Arc::new(FailingTool)),
        ]);
        let dispatcher = ToolCallDispatcher::new(registry);

        let calls = vec![
            call("fail", serde_json::json!({})),
            call("echo", serde_json::json!({"x": 1})),
        ];
        let results = dispatcher.dispatch(&calls).await;
        assert_eq!(results.len(), 2);

        match &results[0] {
            Message::Tool(tool) => {
                assert_eq!(tool.name, "fail");
                assert!(tool.response["error"]
                    .as_str()
                    .expect("error string")
                    .contains("deliberate failure"));
            }
            other => panic!("expected tool message, got {}", other.role()),
        }
        match &results[1] {
            Message::Tool(tool) => assert_eq!(tool.response["echo"]["x"], 1),
            other => panic!("expected tool message, got {}", other.role()),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_error_payload() {
        let dispatcher = ToolCallDispatcher::new(Arc::new(ToolRegistry::new()));
        let results = dispatcher
            .dispatch(&[call("ghost", serde_json::json!({}))])
            .await;

        match &results[0] {
            Message::Tool(tool) => {
                assert!(tool.response["error"]
                    .as_str()
                    .expect("error string")
                    .contains("ghost"));
            }
            other => panic!("expected tool message, got {}", other.role()),
        }
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let dispatcher = ToolCallDispatcher::new(Arc::new(ToolRegistry::new()));
        assert!(dispatcher.dispatch(&[]).await.is_empty());
    }
}
