//! Anthropic gateway implementation

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::env;

use super::{ModelGateway, ModelResponse, StopReason};
use crate::config::GatewaySettings;
use crate::domain::{ContentBlock, Message, ToolEntry};
use crate::error::{GatewayError, GatewayResult};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Gateway to the Anthropic messages API
#[derive(Debug)]
pub struct AnthropicGateway {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: Option<f32>,
    system_prompt: Option<String>,
    stop_sequences: Option<Vec<String>>,
}

impl AnthropicGateway {
    /// Create a gateway from configuration, reading the API key from the
    /// configured environment variable (default `ANTHROPIC_API_KEY`)
    pub fn new(settings: &GatewaySettings) -> GatewayResult<Self> {
        let env_var = settings.api_key_env.as_deref().unwrap_or("ANTHROPIC_API_KEY");
        let api_key = env::var(env_var).map_err(|_| {
            GatewayError::Authentication(format!("Environment variable {} not set", env_var))
        })?;
        Ok(Self::with_api_key(settings, api_key))
    }

    /// Create a gateway with an explicit API key
    pub fn with_api_key(settings: &GatewaySettings, api_key: impl Into<String>) -> Self {
        let base_url = settings
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.anthropic.com".to_string());

        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url,
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            system_prompt: settings.system_prompt.clone(),
            stop_sequences: settings.stop_sequences.clone(),
        }
    }

    fn build_request_body(&self, messages: &[Message], tools: &[ToolEntry]) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": messages,
        });

        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }

        if let Some(stop_sequences) = &self.stop_sequences {
            body["stop_sequences"] = json!(stop_sequences);
        }

        if let Some(system) = &self.system_prompt {
            body["system"] = json!([{
                "type": "text",
                "text": system,
                "cache_control": {"type": "ephemeral"},
            }]);
        }

        if !tools.is_empty() {
            let mut entries: Vec<Value> = tools
                .iter()
                .map(|entry| serde_json::to_value(entry).unwrap_or(Value::Null))
                .collect();
            // The last tool entry carries the prompt-cache breakpoint
            if let Some(Value::Object(last)) = entries.last_mut() {
                last.insert("cache_control".to_string(), json!({"type": "ephemeral"}));
            }
            body["tools"] = Value::Array(entries);
        }

        body
    }
}

#[async_trait]
impl ModelGateway for AnthropicGateway {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolEntry],
    ) -> GatewayResult<ModelResponse> {
        let body = self.build_request_body(messages, tools);

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Parse(format!("Failed to parse response: {}", e)))?;

        // Single decode step at the boundary; unknown block shapes normalize
        // to empty text
        let content = api_response
            .content
            .iter()
            .map(ContentBlock::from_value)
            .collect();

        let stop_reason = match api_response.stop_reason.as_deref() {
            Some("tool_use") => StopReason::ToolUse,
            Some("max_tokens") => StopReason::MaxTokens,
            Some("stop_sequence") => StopReason::StopSequence,
            _ => StopReason::EndTurn,
        };

        Ok(ModelResponse {
            content,
            stop_reason,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    content: Vec<Value>,
    stop_reason: Option<String>,
}
