//! Language-model gateway
//!
//! The session layer talks to the model through the [`ModelGateway`] trait;
//! [`AnthropicGateway`] is the concrete implementation.

mod anthropic;

pub use anthropic::AnthropicGateway;

use async_trait::async_trait;

use crate::domain::{ContentBlock, Message, ToolEntry};
use crate::error::GatewayResult;

/// Terminal signal of a model response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Final answer
    EndTurn,
    /// More tool use requested
    ToolUse,
    /// Output truncated at the token limit
    MaxTokens,
    /// A configured stop sequence fired
    StopSequence,
}

/// Structured model response: ordered content blocks plus the terminal signal
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
}

impl ModelResponse {
    /// Whether the model requested another tool round
    pub fn wants_tools(&self) -> bool {
        self.stop_reason == StopReason::ToolUse
    }
}

/// Trait for language-model gateways
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// The model being used
    fn model(&self) -> &str;

    /// Send the full message history plus tool catalog, returning the
    /// structured response
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolEntry],
    ) -> GatewayResult<ModelResponse>;
}
