//! Tool, prompt, and progress types

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::WebSearchSettings;

/// A tool advertised by a capability server.
///
/// Descriptors are discovered, not persisted; callers re-fetch catalogs on
/// every use because a server's advertised tools may change between calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDescriptor {
    /// Create a new tool descriptor
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A prompt template advertised by a capability server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One entry in the tool catalog handed to the model gateway.
///
/// The catalog always starts with the fixed built-in web-search entry, which
/// the gateway side executes itself and which is never dispatched through the
/// tool dispatcher.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ToolEntry {
    WebSearch {
        #[serde(rename = "type")]
        kind: &'static str,
        name: &'static str,
        max_uses: u32,
        allowed_domains: Vec<String>,
    },
    Server(ToolDescriptor),
}

impl ToolEntry {
    /// The built-in web-search entry
    pub fn web_search(settings: &WebSearchSettings) -> Self {
        ToolEntry::WebSearch {
            kind: "web_search_20250305",
            name: "web_search",
            max_uses: settings.max_uses,
            allowed_domains: settings.allowed_domains.clone(),
        }
    }

    /// The entry's tool name
    pub fn name(&self) -> &str {
        match self {
            ToolEntry::WebSearch { name, .. } => name,
            ToolEntry::Server(descriptor) => &descriptor.name,
        }
    }
}

/// Incremental progress reported by a capability server during a tool call.
///
/// Delivered zero or more times per invocation; `progress` is monotonically
/// non-decreasing, with no other ordering guarantee.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgressEvent {
    pub progress: f64,
    pub total: Option<f64>,
    pub message: Option<String>,
}

/// Callback invoked for each progress event of a tool invocation
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// A no-op progress sink, registered when the caller does not provide one so
/// the transport-level progress token is still sent.
pub fn noop_progress_sink() -> ProgressSink {
    Arc::new(|_| {})
}

/// One content item of a tool invocation result
#[derive(Debug, Clone, Deserialize)]
pub struct ToolContentItem {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// Result of a tool invocation on a capability server
#[derive(Debug, Clone, Deserialize)]
pub struct ToolOutput {
    #[serde(default)]
    pub content: Vec<ToolContentItem>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolOutput {
    /// Extract the text segments of the result, in order
    pub fn text_segments(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter(|item| item.content_type == "text")
            .filter_map(|item| item.text.as_deref())
            .collect()
    }
}

/// Resource content fetched from a capability server, parsed according to the
/// server-declared content type.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceContent {
    Json(Value),
    Text(String),
}

impl ResourceContent {
    /// Render the content as plain text
    pub fn as_text(&self) -> String {
        match self {
            ResourceContent::Text(text) => text.clone(),
            ResourceContent::Json(value) => match value.as_str() {
                Some(s) => s.to_string(),
                None => value.to_string(),
            },
        }
    }

    /// Interpret the content as a list of string ids
    pub fn as_id_list(&self) -> Vec<String> {
        match self {
            ResourceContent::Json(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Default input schema for tools that advertise none
pub fn default_input_schema() -> Value {
    json!({"type": "object"})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_web_search_entry_shape() {
        let settings = WebSearchSettings {
            max_uses: 5,
            allowed_domains: vec!["google.com".to_string()],
        };
        let value = serde_json::to_value(ToolEntry::web_search(&settings)).unwrap();
        assert_eq!(value["type"], "web_search_20250305");
        assert_eq!(value["name"], "web_search");
        assert_eq!(value["max_uses"], 5);
        assert_eq!(value["allowed_domains"][0], "google.com");
    }

    #[test]
    fn test_tool_output_text_segments() {
        let output: ToolOutput = serde_json::from_value(serde_json::json!({
            "content": [
                {"type": "text", "text": "one"},
                {"type": "image", "data": "…"},
                {"type": "text", "text": "two"}
            ],
            "isError": false
        }))
        .unwrap();
        assert_eq!(output.text_segments(), vec!["one", "two"]);
        assert!(!output.is_error);
    }

    #[test]
    fn test_resource_id_list() {
        let content = ResourceContent::Json(serde_json::json!(["a.pdf", "b.md"]));
        assert_eq!(content.as_id_list(), vec!["a.pdf", "b.md"]);
        assert!(ResourceContent::Text("not a list".to_string())
            .as_id_list()
            .is_empty());
    }
}
