//! Domain types for the conversational agent core
//!
//! Core abstractions shared across the session, dispatch, and capability
//! layers.

mod message;
mod tool;

pub use message::*;
pub use tool::*;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::CapabilityResult;

/// Port trait for one capability server connection.
///
/// Session-layer code depends on this trait so dispatch and resolution can be
/// exercised against test doubles; `CapabilityClient` is the subprocess-backed
/// implementation.
#[async_trait]
pub trait CapabilityPort: Send + Sync {
    /// The server's configured name
    fn name(&self) -> &str;

    /// Fetch the current tool catalog. Never cached; callers must assume the
    /// advertised set can change between calls.
    async fn list_tools(&self) -> CapabilityResult<Vec<ToolDescriptor>>;

    /// Fetch the current prompt catalog
    async fn list_prompts(&self) -> CapabilityResult<Vec<PromptDescriptor>>;

    /// Render a named prompt template into an ordered message sequence
    async fn get_prompt(
        &self,
        name: &str,
        args: &HashMap<String, String>,
    ) -> CapabilityResult<Vec<Message>>;

    /// Read a resource by opaque URI
    async fn read_resource(&self, uri: &str) -> CapabilityResult<ResourceContent>;

    /// Invoke a tool. A progress sink, when given, receives zero or more
    /// events before the final result; a no-op sink is registered otherwise.
    async fn call_tool(
        &self,
        name: &str,
        input: Value,
        progress: Option<ProgressSink>,
    ) -> CapabilityResult<ToolOutput>;

    /// Tear down the connection. Safe to call on a connection that never
    /// fully initialized.
    async fn release(&self);
}
