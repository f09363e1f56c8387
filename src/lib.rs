//! # Fulcrum - Tool-Orchestrating Conversation Backend
//!
//! Fulcrum runs conversations against an Anthropic model while brokering the
//! model's tool calls to a set of Model Context Protocol (MCP) capability
//! servers spawned as subprocesses.
//!
//! ## Features
//!
//! - **Tool orchestration**: automatic execute/feed-back loop until the model
//!   stops requesting tools
//! - **Capability servers**: newline-delimited JSON-RPC over stdio, with
//!   progress notifications and server-side logging
//! - **Documents and prompts**: `@id` mention expansion and `/command` prompt
//!   templates backed by a document store server
//! - **Web search**: the Anthropic server-side web search tool, always in the
//!   catalog
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fulcrum::capability::CapabilityClient;
//! use fulcrum::config::Settings;
//! use fulcrum::gateway::AnthropicGateway;
//! use fulcrum::session::ConversationSession;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::new()?;
//!     let gateway = Arc::new(AnthropicGateway::new(&settings.gateway)?);
//!
//!     let mut clients = Vec::new();
//!     for server in settings.capability_servers.iter().filter(|s| s.enabled) {
//!         clients.push(Arc::new(CapabilityClient::connect(server).await?));
//!     }
//!
//!     let store = clients.first().cloned();
//!     let mut session = ConversationSession::new(
//!         gateway,
//!         clients.into_iter().map(|c| c as _).collect(),
//!         store.map(|c| c as _),
//!         settings.web_search.clone(),
//!         settings.session.max_turns,
//!     );
//!     let answer = session.run("What documents are available?").await?;
//!     println!("{}", answer);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Domain**: messages, content blocks, tool types, the capability port
//! - **Capability**: stdio JSON-RPC transport and the MCP client adapter
//! - **Gateway**: the Anthropic Messages API adapter
//! - **Session**: dispatch, resource resolution, and the conversation loop
//! - **Config**: file-based settings with validation

pub mod capability;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod session;

/// Install the global tracing subscriber.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().try_init();
}
