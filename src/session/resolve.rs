//! Resource resolution
//!
//! Turns raw user input into the message list actually sent to the model:
//! slash commands resolve to server-side prompt templates, `@id` mentions
//! inline document content, and plain queries get wrapped with whatever
//! context the mentions produced.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::{CapabilityPort, Message};
use crate::error::CapabilityResult;

/// URI of the document index resource
pub const DOCUMENTS_URI: &str = "docs://documents";

/// Resolver bound to the capability server that stores documents and prompts
pub struct ResourceResolver {
    store: Arc<dyn CapabilityPort>,
}

impl ResourceResolver {
    pub fn new(store: Arc<dyn CapabilityPort>) -> Self {
        Self { store }
    }

    /// Identifiers of all stored documents
    pub async fn list_ids(&self) -> CapabilityResult<Vec<String>> {
        let content = self.store.read_resource(DOCUMENTS_URI).await?;
        Ok(content.as_id_list())
    }

    /// Raw content of one document
    pub async fn content(&self, id: &str) -> CapabilityResult<String> {
        let uri = format!("{}/{}", DOCUMENTS_URI, id);
        let content = self.store.read_resource(&uri).await?;
        Ok(content.as_text())
    }

    /// Names of the prompt templates the store exposes
    pub async fn prompt_names(&self) -> CapabilityResult<Vec<String>> {
        let prompts = self.store.list_prompts().await?;
        Ok(prompts.into_iter().map(|p| p.name).collect())
    }

    /// If the query is a slash command with an argument, render the named
    /// prompt template. Returns the template messages verbatim, or `None`
    /// when the query does not have the `/command arg` shape.
    ///
    /// A command naming no known template is an error, not a fall-through:
    /// the store's `NotFound` propagates to the caller.
    pub async fn resolve_command(&self, query: &str) -> CapabilityResult<Option<Vec<Message>>> {
        if !query.starts_with('/') {
            return Ok(None);
        }
        let words: Vec<&str> = query.split_whitespace().collect();
        if words.len() < 2 {
            return Ok(None);
        }
        let command = words[0].trim_start_matches('/');

        let mut args = HashMap::new();
        args.insert("doc_id".to_string(), words[1].to_string());
        let messages = self.store.get_prompt(command, &args).await?;
        Ok(Some(messages))
    }

    /// Expand `@id` mentions into inlined document blocks.
    ///
    /// Mentions that match no stored document are ignored; matched documents
    /// are inlined in store order, not mention order. A matched document
    /// that then fails to read is an error.
    pub async fn expand_mentions(&self, query: &str) -> CapabilityResult<String> {
        let mentions: Vec<&str> = query
            .split_whitespace()
            .filter_map(|word| word.strip_prefix('@'))
            .filter(|id| !id.is_empty())
            .collect();
        if mentions.is_empty() {
            return Ok(String::new());
        }

        let mut context = String::new();
        for id in self.list_ids().await? {
            if !mentions.contains(&id.as_str()) {
                continue;
            }
            let text = self.content(&id).await?;
            context.push_str(&format!(
                "\n<document id=\"{}\">\n{}\n</document>\n",
                id, text
            ));
        }
        Ok(context)
    }

    /// Full preprocessing of one user query into the messages to append
    pub async fn preprocess(&self, query: &str) -> CapabilityResult<Vec<Message>> {
        if let Some(messages) = self.resolve_command(query).await? {
            return Ok(messages);
        }
        let context = self.expand_mentions(query).await?;
        Ok(vec![Message::user(wrap_query(query, &context))])
    }
}

/// Wrap a user query and its gathered document context into the prompt the
/// model actually receives.
pub fn wrap_query(query: &str, context: &str) -> String {
    format!(
        r#"
The user has a question:
<query>
{query}
</query>

The following context may be useful in answering their question:
<context>
{context}
</context>

Note the user's query might contain references to documents like "@report.docx". The "@" is only
included as a way of mentioning the doc. The actual name of the document would be "report.docx".
If the document content is included in this prompt, you don't need to use an additional tool to read the document.
Answer the user's question directly and concisely. Start with the exact information they need.
Don't refer to or mention the provided context in any way - just use it to inform your answer.
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ContentBlock, ProgressSink, PromptDescriptor, ResourceContent, ToolDescriptor, ToolOutput,
    };
    use crate::error::CapabilityError;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    /// Store double: in-memory documents plus one "format" prompt
    struct StubStore {
        documents: Vec<(String, String)>,
        /// Ids advertised in the listing whose reads fail
        unreadable: Vec<String>,
    }

    impl StubStore {
        fn with_documents(documents: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                documents: documents
                    .iter()
                    .map(|(id, text)| (id.to_string(), text.to_string()))
                    .collect(),
                unreadable: Vec::new(),
            })
        }

        fn with_unreadable(documents: &[(&str, &str)], unreadable: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                documents: documents
                    .iter()
                    .map(|(id, text)| (id.to_string(), text.to_string()))
                    .collect(),
                unreadable: unreadable.iter().map(|id| id.to_string()).collect(),
            })
        }
    }

    #[async_trait]
    impl CapabilityPort for StubStore {
        fn name(&self) -> &str {
            "documents"
        }

        async fn list_tools(&self) -> CapabilityResult<Vec<ToolDescriptor>> {
            Ok(Vec::new())
        }

        async fn list_prompts(&self) -> CapabilityResult<Vec<PromptDescriptor>> {
            Ok(vec![PromptDescriptor {
                name: "format".to_string(),
                description: None,
            }])
        }

        async fn get_prompt(
            &self,
            name: &str,
            args: &HashMap<String, String>,
        ) -> CapabilityResult<Vec<Message>> {
            if name != "format" {
                return Err(CapabilityError::NotFound(name.to_string()));
            }
            let doc_id = args.get("doc_id").cloned().unwrap_or_default();
            Ok(vec![Message::user(format!(
                "Reformat the document '{}' into markdown.",
                doc_id
            ))])
        }

        async fn read_resource(&self, uri: &str) -> CapabilityResult<ResourceContent> {
            if uri == DOCUMENTS_URI {
                let ids: Vec<Value> = self
                    .documents
                    .iter()
                    .map(|(id, _)| id.clone())
                    .chain(self.unreadable.iter().cloned())
                    .map(Value::String)
                    .collect();
                return Ok(ResourceContent::Json(Value::Array(ids)));
            }
            let id = uri.trim_start_matches(&format!("{}/", DOCUMENTS_URI));
            if self.unreadable.iter().any(|broken| broken == id) {
                return Err(CapabilityError::Unreachable(format!(
                    "read failed for {}",
                    uri
                )));
            }
            self.documents
                .iter()
                .find(|(doc_id, _)| doc_id == id)
                .map(|(_, text)| ResourceContent::Text(text.clone()))
                .ok_or_else(|| CapabilityError::NotFound(uri.to_string()))
        }

        async fn call_tool(
            &self,
            name: &str,
            _input: Value,
            _progress: Option<ProgressSink>,
        ) -> CapabilityResult<ToolOutput> {
            Err(CapabilityError::NotFound(name.to_string()))
        }

        async fn release(&self) {}
    }

    fn resolver() -> ResourceResolver {
        ResourceResolver::new(StubStore::with_documents(&[
            ("report.pdf", "quarterly numbers"),
            ("plan.md", "the plan"),
        ]))
    }

    #[tokio::test]
    async fn test_plain_query_wrapped_with_empty_context() {
        let messages = resolver().preprocess("hello").await.unwrap();
        assert_eq!(messages.len(), 1);
        let text = messages[0].text();
        assert!(text.contains("<query>\nhello\n</query>"));
        assert!(text.contains("<context>\n\n</context>"));
    }

    #[tokio::test]
    async fn test_mention_inlines_document() {
        let messages = resolver()
            .preprocess("summarize @report.pdf")
            .await
            .unwrap();
        let text = messages[0].text();
        assert!(text.contains(
            "\n<document id=\"report.pdf\">\nquarterly numbers\n</document>\n"
        ));
        assert!(!text.contains("plan.md"));
    }

    #[tokio::test]
    async fn test_unknown_mention_is_ignored() {
        let messages = resolver().preprocess("read @missing.txt").await.unwrap();
        let text = messages[0].text();
        assert!(text.contains("<context>\n\n</context>"));
    }

    #[tokio::test]
    async fn test_command_resolves_to_prompt_messages() {
        let messages = resolver().preprocess("/format report.pdf").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].content,
            vec![ContentBlock::text(
                "Reformat the document 'report.pdf' into markdown."
            )]
        );
    }

    #[tokio::test]
    async fn test_command_without_argument_falls_through_to_wrapping() {
        let messages = resolver().preprocess("/format").await.unwrap();
        assert!(messages[0].text().contains("<query>\n/format\n</query>"));
    }

    #[tokio::test]
    async fn test_unknown_command_propagates_not_found() {
        let outcome = resolver().preprocess("/summarize report.pdf").await;
        match outcome {
            Err(CapabilityError::NotFound(name)) => assert_eq!(name, "summarize"),
            other => panic!("Unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreadable_mentioned_document_propagates() {
        let resolver = ResourceResolver::new(StubStore::with_unreadable(
            &[("plan.md", "the plan")],
            &["report.pdf"],
        ));

        let outcome = resolver.preprocess("summarize @report.pdf").await;
        assert!(matches!(outcome, Err(CapabilityError::Unreachable(_))));

        // Readable mentions are unaffected
        let messages = resolver.preprocess("read @plan.md").await.unwrap();
        assert!(messages[0]
            .text()
            .contains("\n<document id=\"plan.md\">\nthe plan\n</document>\n"));
    }

    #[tokio::test]
    async fn test_document_listing_and_content() {
        let resolver = resolver();
        assert_eq!(
            resolver.list_ids().await.unwrap(),
            vec!["report.pdf".to_string(), "plan.md".to_string()]
        );
        assert_eq!(resolver.content("plan.md").await.unwrap(), "the plan");
        assert_eq!(
            resolver.prompt_names().await.unwrap(),
            vec!["format".to_string()]
        );
    }
}
