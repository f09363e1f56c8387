//! Conversation sessions
//!
//! A session owns the full message history and drives the
//! model/tool-execution loop: send history plus the current tool catalog to
//! the gateway, execute whatever tools the model requested, feed the results
//! back, repeat until the model stops asking for tools.

mod dispatch;
mod resolve;

pub use dispatch::{ToolDispatcher, ToolRequest};
pub use resolve::{wrap_query, ResourceResolver, DOCUMENTS_URI};

use std::sync::Arc;
use tracing::debug;

use crate::config::WebSearchSettings;
use crate::domain::{CapabilityPort, Message, ToolEntry};
use crate::error::{SessionError, SessionResult};
use crate::gateway::ModelGateway;

/// One conversation against a model gateway and a set of capability servers
pub struct ConversationSession {
    gateway: Arc<dyn ModelGateway>,
    dispatcher: ToolDispatcher,
    resolver: Option<ResourceResolver>,
    web_search: WebSearchSettings,
    max_turns: Option<u32>,
    messages: Vec<Message>,
}

impl ConversationSession {
    /// Create a session. `document_store` is the client queried for document
    /// resources and prompt templates; without one, queries are wrapped with
    /// empty context and commands and mentions are inert.
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        clients: Vec<Arc<dyn CapabilityPort>>,
        document_store: Option<Arc<dyn CapabilityPort>>,
        web_search: WebSearchSettings,
        max_turns: Option<u32>,
    ) -> Self {
        Self {
            gateway,
            dispatcher: ToolDispatcher::new(clients),
            resolver: document_store.map(ResourceResolver::new),
            web_search,
            max_turns,
            messages: Vec::new(),
        }
    }

    /// Run one user query to completion and return the model's final text.
    ///
    /// A gateway failure propagates immediately: history keeps everything
    /// appended before the failed call and nothing from it, so no partial
    /// assistant message is ever recorded.
    pub async fn run(&mut self, query: &str) -> SessionResult<String> {
        let new_messages = match &self.resolver {
            Some(resolver) => resolver.preprocess(query).await?,
            None => vec![Message::user(wrap_query(query, ""))],
        };
        self.messages.extend(new_messages);

        let mut turns = 0u32;
        loop {
            if let Some(cap) = self.max_turns {
                if turns >= cap {
                    return Err(SessionError::TurnLimit(cap));
                }
            }
            turns += 1;

            let catalog = self.catalog().await?;
            let response = self.gateway.complete(&self.messages, &catalog).await?;

            let wants_tools = response.wants_tools();
            let assistant = Message::assistant_blocks(response.content);
            let requests: Vec<ToolRequest> = assistant
                .tool_uses()
                .map(|(id, name, input)| ToolRequest {
                    id: id.to_string(),
                    name: name.to_string(),
                    input: input.clone(),
                })
                .collect();
            let final_text = assistant.text();
            self.messages.push(assistant);

            if !wants_tools {
                return Ok(final_text);
            }
            if !final_text.is_empty() {
                debug!("Intermediate model text: {}", final_text);
            }

            let mut results = Vec::with_capacity(requests.len());
            for request in &requests {
                results.push(self.dispatcher.execute(request).await);
            }
            self.messages.push(Message::user_blocks(results));
        }
    }

    /// Current catalog: the built-in web search entry followed by every
    /// server tool, in client registration order.
    async fn catalog(&self) -> SessionResult<Vec<ToolEntry>> {
        let mut entries = vec![ToolEntry::web_search(&self.web_search)];
        entries.extend(
            self.dispatcher
                .catalog()
                .await?
                .into_iter()
                .map(ToolEntry::Server),
        );
        Ok(entries)
    }

    /// Identifiers of stored documents, empty without a document store
    pub async fn list_resource_ids(&self) -> SessionResult<Vec<String>> {
        match &self.resolver {
            Some(resolver) => Ok(resolver.list_ids().await?),
            None => Ok(Vec::new()),
        }
    }

    /// Content of one stored document
    pub async fn resource_content(&self, id: &str) -> SessionResult<String> {
        match &self.resolver {
            Some(resolver) => Ok(resolver.content(id).await?),
            None => Ok(String::new()),
        }
    }

    /// Names of available prompt templates, empty without a document store
    pub async fn list_prompt_names(&self) -> SessionResult<Vec<String>> {
        match &self.resolver {
            Some(resolver) => Ok(resolver.prompt_names().await?),
            None => Ok(Vec::new()),
        }
    }

    /// The full message history so far
    pub fn history(&self) -> &[Message] {
        &self.messages
    }
}
