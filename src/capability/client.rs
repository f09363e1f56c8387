//! Capability server client
//!
//! Proxy to exactly one capability server process: connect and handshake,
//! discover tool/prompt catalogs, invoke tools with progress reporting, read
//! resources, release the connection.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::transport::{StdioTransport, Transport};
use crate::config::CapabilityServerConfig;
use crate::domain::{
    default_input_schema, noop_progress_sink, CapabilityPort, ContentBlock, Message,
    ProgressSink, PromptDescriptor, ResourceContent, Role, ToolDescriptor, ToolOutput,
};
use crate::error::{CapabilityError, CapabilityResult};

const PROTOCOL_VERSION: &str = "2025-06-18";

#[derive(Debug, Deserialize)]
struct RawTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    input_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<RawTool>,
}

#[derive(Debug, Deserialize)]
struct RawPrompt {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListPromptsResult {
    #[serde(default)]
    prompts: Vec<RawPrompt>,
}

#[derive(Debug, Deserialize)]
struct GetPromptResult {
    #[serde(default)]
    messages: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawResourceContents {
    #[serde(rename = "mimeType", default)]
    mime_type: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReadResourceResult {
    #[serde(default)]
    contents: Vec<RawResourceContents>,
}

/// Client owning one connection to one capability server.
///
/// Lifecycle is strictly connect → operations → release; calling `connect`
/// twice without a release in between is not supported.
pub struct CapabilityClient {
    name: String,
    transport: Arc<dyn Transport>,
}

impl CapabilityClient {
    /// Spawn the server subprocess and perform the initialize handshake
    pub async fn connect(config: &CapabilityServerConfig) -> CapabilityResult<Self> {
        let transport: Arc<dyn Transport> = Arc::new(StdioTransport::spawn(config)?);
        Self::initialize(config.name.clone(), transport).await
    }

    /// Handshake over an established transport.
    ///
    /// On any handshake failure the transport is closed before the error is
    /// returned, so no subprocess state leaks.
    pub async fn initialize(
        name: String,
        transport: Arc<dyn Transport>,
    ) -> CapabilityResult<Self> {
        match Self::handshake(transport.as_ref()).await {
            Ok(()) => {
                info!("Capability server '{}' initialized", name);
                Ok(Self { name, transport })
            }
            Err(e) => {
                transport.close().await;
                Err(e)
            }
        }
    }

    async fn handshake(transport: &dyn Transport) -> CapabilityResult<()> {
        transport
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                })),
            )
            .await?;
        transport.notify("notifications/initialized", None).await
    }

    fn convert_prompt_message(raw: &Value) -> Message {
        let role = match raw.get("role").and_then(Value::as_str) {
            Some("user") => Role::User,
            _ => Role::Assistant,
        };
        let content = match raw.get("content") {
            Some(Value::Array(items)) => items.iter().map(ContentBlock::from_value).collect(),
            Some(value) => vec![ContentBlock::from_value(value)],
            None => vec![ContentBlock::text("")],
        };
        Message { role, content }
    }
}

#[async_trait]
impl CapabilityPort for CapabilityClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> CapabilityResult<Vec<ToolDescriptor>> {
        let result = self.transport.request("tools/list", None).await?;
        let parsed: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| CapabilityError::Protocol(format!("Bad tools/list result: {}", e)))?;

        Ok(parsed
            .tools
            .into_iter()
            .map(|tool| ToolDescriptor {
                description: tool
                    .description
                    .unwrap_or_else(|| format!("Tool provided by {}", self.name)),
                input_schema: tool.input_schema.unwrap_or_else(default_input_schema),
                name: tool.name,
            })
            .collect())
    }

    async fn list_prompts(&self) -> CapabilityResult<Vec<PromptDescriptor>> {
        let result = self.transport.request("prompts/list", None).await?;
        let parsed: ListPromptsResult = serde_json::from_value(result)
            .map_err(|e| CapabilityError::Protocol(format!("Bad prompts/list result: {}", e)))?;

        Ok(parsed
            .prompts
            .into_iter()
            .map(|prompt| PromptDescriptor {
                name: prompt.name,
                description: prompt.description,
            })
            .collect())
    }

    async fn get_prompt(
        &self,
        name: &str,
        args: &HashMap<String, String>,
    ) -> CapabilityResult<Vec<Message>> {
        let result = self
            .transport
            .request(
                "prompts/get",
                Some(json!({"name": name, "arguments": args})),
            )
            .await?;
        let parsed: GetPromptResult = serde_json::from_value(result)
            .map_err(|e| CapabilityError::Protocol(format!("Bad prompts/get result: {}", e)))?;

        Ok(parsed
            .messages
            .iter()
            .map(Self::convert_prompt_message)
            .collect())
    }

    async fn read_resource(&self, uri: &str) -> CapabilityResult<ResourceContent> {
        let result = self
            .transport
            .request("resources/read", Some(json!({"uri": uri})))
            .await?;
        let parsed: ReadResourceResult = serde_json::from_value(result)
            .map_err(|e| CapabilityError::Protocol(format!("Bad resources/read result: {}", e)))?;

        let first = parsed.contents.into_iter().next().ok_or_else(|| {
            CapabilityError::NotFound(format!("Resource {} returned no contents", uri))
        })?;
        let text = first.text.ok_or_else(|| {
            CapabilityError::Protocol(format!("Resource {} has no text content", uri))
        })?;

        if first.mime_type.as_deref() == Some("application/json") {
            let value = serde_json::from_str(&text).map_err(|e| {
                CapabilityError::Protocol(format!("Resource {} is not valid JSON: {}", uri, e))
            })?;
            Ok(ResourceContent::Json(value))
        } else {
            Ok(ResourceContent::Text(text))
        }
    }

    async fn call_tool(
        &self,
        name: &str,
        input: Value,
        progress: Option<ProgressSink>,
    ) -> CapabilityResult<ToolOutput> {
        // Always register a sink so the progress token is sent; servers that
        // don't support progress simply never invoke it.
        let token = uuid::Uuid::new_v4().to_string();
        let sink = progress.unwrap_or_else(noop_progress_sink);
        self.transport.register_progress(&token, sink);

        let params = json!({
            "name": name,
            "arguments": input,
            "_meta": {"progressToken": token},
        });
        let result = self.transport.request("tools/call", Some(params)).await;
        self.transport.unregister_progress(&token);

        // A server whose tool raises reports it as a generic JSON-RPC error;
        // reclassify so dispatch sees an execution failure, not a protocol one
        let value = result.map_err(|e| match e {
            CapabilityError::Protocol(message) => CapabilityError::ToolExecution(message),
            other => other,
        })?;

        let output: ToolOutput = serde_json::from_value(value)
            .map_err(|e| CapabilityError::Protocol(format!("Bad tools/call result: {}", e)))?;
        Ok(output)
    }

    async fn release(&self) {
        debug!("Releasing capability server '{}'", self.name);
        self.transport.close().await;
    }
}
