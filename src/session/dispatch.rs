//! Tool dispatch
//!
//! Routes a model-requested tool call to the capability server that owns it
//! and converts any failure into a structured result block the model can
//! react to. Dispatch never raises.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, warn};

use crate::domain::{CapabilityPort, ContentBlock, ToolDescriptor};
use crate::error::CapabilityResult;

/// A tool invocation requested by the model
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Dispatcher over an ordered collection of capability clients
pub struct ToolDispatcher {
    clients: Vec<Arc<dyn CapabilityPort>>,
}

impl ToolDispatcher {
    /// Create a dispatcher; registration order decides resolution priority
    pub fn new(clients: Vec<Arc<dyn CapabilityPort>>) -> Self {
        Self { clients }
    }

    /// Union of all clients' current tool catalogs.
    ///
    /// Catalogs are fetched fresh; failures here happen before the gateway
    /// call and propagate, aborting the turn.
    pub async fn catalog(&self) -> CapabilityResult<Vec<ToolDescriptor>> {
        let mut tools = Vec::new();
        for client in &self.clients {
            tools.extend(client.list_tools().await?);
        }
        Ok(tools)
    }

    /// First client (in registration order) whose current catalog contains
    /// the tool. Catalogs are re-queried on every dispatch; freshness over
    /// latency.
    async fn find_owner(&self, tool_name: &str) -> Option<&Arc<dyn CapabilityPort>> {
        for client in &self.clients {
            match client.list_tools().await {
                Ok(tools) => {
                    if tools.iter().any(|tool| tool.name == tool_name) {
                        return Some(client);
                    }
                }
                Err(e) => {
                    warn!(
                        "Skipping server '{}' while resolving tool '{}': {}",
                        client.name(),
                        tool_name,
                        e
                    );
                }
            }
        }
        None
    }

    /// Execute one tool request, always producing a tool-result block
    pub async fn execute(&self, request: &ToolRequest) -> ContentBlock {
        let client = match self.find_owner(&request.name).await {
            Some(client) => client,
            None => {
                return ContentBlock::tool_result(&request.id, "Could not find that tool", true);
            }
        };

        match client
            .call_tool(&request.name, request.input.clone(), None)
            .await
        {
            Ok(output) => {
                let segments = output.text_segments();
                let content =
                    serde_json::to_string(&segments).unwrap_or_else(|_| "[]".to_string());
                ContentBlock::tool_result(&request.id, content, output.is_error)
            }
            Err(e) => {
                let error_message = format!("Error executing tool '{}': {}", request.name, e);
                error!("{}", error_message);
                let content = json!({"error": error_message}).to_string();
                ContentBlock::tool_result(&request.id, content, true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Message, ProgressSink, PromptDescriptor, ResourceContent, ToolContentItem, ToolOutput,
    };
    use crate::error::CapabilityError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Capability double: fixed catalog, scripted tool outcome
    struct StubCapability {
        name: String,
        tools: Vec<String>,
        fail_listing: bool,
        fail_call_with: Option<String>,
        output_text: Vec<String>,
        output_is_error: bool,
        calls: AtomicUsize,
    }

    impl StubCapability {
        fn with_tools(name: &str, tools: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                tools: tools.iter().map(|t| t.to_string()).collect(),
                fail_listing: false,
                fail_call_with: None,
                output_text: vec!["ok".to_string()],
                output_is_error: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing_listing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                tools: Vec::new(),
                fail_listing: true,
                fail_call_with: None,
                output_text: Vec::new(),
                output_is_error: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn raising(name: &str, tools: &[&str], message: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                tools: tools.iter().map(|t| t.to_string()).collect(),
                fail_listing: false,
                fail_call_with: Some(message.to_string()),
                output_text: Vec::new(),
                output_is_error: false,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CapabilityPort for StubCapability {
        fn name(&self) -> &str {
            &self.name
        }

        async fn list_tools(&self) -> CapabilityResult<Vec<ToolDescriptor>> {
            if self.fail_listing {
                return Err(CapabilityError::Unreachable("listing failed".into()));
            }
            Ok(self
                .tools
                .iter()
                .map(|t| ToolDescriptor::new(t.clone(), "", json!({"type": "object"})))
                .collect())
        }

        async fn list_prompts(&self) -> CapabilityResult<Vec<PromptDescriptor>> {
            Ok(Vec::new())
        }

        async fn get_prompt(
            &self,
            name: &str,
            _args: &HashMap<String, String>,
        ) -> CapabilityResult<Vec<Message>> {
            Err(CapabilityError::NotFound(name.to_string()))
        }

        async fn read_resource(&self, uri: &str) -> CapabilityResult<ResourceContent> {
            Err(CapabilityError::NotFound(uri.to_string()))
        }

        async fn call_tool(
            &self,
            _name: &str,
            _input: Value,
            _progress: Option<ProgressSink>,
        ) -> CapabilityResult<ToolOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = &self.fail_call_with {
                return Err(CapabilityError::ToolExecution(message.clone()));
            }
            Ok(ToolOutput {
                content: self
                    .output_text
                    .iter()
                    .map(|text| ToolContentItem {
                        content_type: "text".to_string(),
                        text: Some(text.clone()),
                    })
                    .collect(),
                is_error: self.output_is_error,
            })
        }

        async fn release(&self) {}
    }

    fn request(id: &str, name: &str) -> ToolRequest {
        ToolRequest {
            id: id.to_string(),
            name: name.to_string(),
            input: json!({}),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_yields_error_result() {
        let dispatcher = ToolDispatcher::new(vec![StubCapability::with_tools("a", &["add"])]);

        let block = dispatcher.execute(&request("t1", "X")).await;
        assert_eq!(
            block,
            ContentBlock::tool_result("t1", "Could not find that tool", true)
        );
    }

    #[tokio::test]
    async fn test_invocation_failure_becomes_error_result() {
        let dispatcher =
            ToolDispatcher::new(vec![StubCapability::raising("a", &["Y"], "boom")]);

        let block = dispatcher.execute(&request("t1", "Y")).await;
        match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                assert_eq!(tool_use_id, "t1");
                assert!(is_error);
                let decoded: Value = serde_json::from_str(&content).unwrap();
                let message = decoded["error"].as_str().unwrap();
                assert!(message.contains("Y"));
                assert!(message.contains("boom"));
            }
            other => panic!("Unexpected block: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_success_encodes_text_segments() {
        let dispatcher = ToolDispatcher::new(vec![StubCapability::with_tools("a", &["add"])]);

        let block = dispatcher.execute(&request("t1", "add")).await;
        assert_eq!(
            block,
            ContentBlock::tool_result("t1", r#"["ok"]"#, false)
        );
    }

    #[tokio::test]
    async fn test_first_registered_owner_wins() {
        let first = StubCapability::with_tools("first", &["shared"]);
        let second = StubCapability::with_tools("second", &["shared"]);
        let dispatcher = ToolDispatcher::new(vec![first.clone(), second.clone()]);

        dispatcher.execute(&request("t1", "shared")).await;
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failing_catalog_is_skipped_during_resolution() {
        let broken = StubCapability::failing_listing("broken");
        let healthy = StubCapability::with_tools("healthy", &["add"]);
        let dispatcher = ToolDispatcher::new(vec![broken, healthy.clone()]);

        let block = dispatcher.execute(&request("t1", "add")).await;
        assert_eq!(healthy.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(block, ContentBlock::ToolResult { is_error: false, .. }));
    }

    #[tokio::test]
    async fn test_catalog_union_propagates_errors() {
        let dispatcher = ToolDispatcher::new(vec![StubCapability::failing_listing("broken")]);
        assert!(dispatcher.catalog().await.is_err());
    }
}
