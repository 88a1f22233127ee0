//! Knowledge search tool for the assistant.
//!
//! [`KnowledgeSearchTool`] exposes a [`Retriever`] through the JSON tool
//! surface an LLM agent calls: a name, a description, a parameter schema and
//! an `execute` entry point taking and returning JSON.
//!
//! # Example
//!
//! ```rust,ignore
//! use pdfrag::{KnowledgeSearchTool, Retriever};
//!
//! let tool = KnowledgeSearchTool::new(Arc::new(retriever));
//!
//! // The agent calls the tool with:
//! // { "query": "What is the warranty period?", "top_k": 3 }
//! let reply = tool.execute(json!({ "query": "warranty period" })).await?;
//! ```

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{error, info};

use crate::document::{META_TITLE, SearchResult};
use crate::error::{RagError, Result};
use crate::retrieval::{INSUFFICIENT_INFORMATION, KnowledgeLookup, Retriever};

/// Name under which the assistant calls the tool.
pub const TOOL_NAME: &str = "search_knowledge_base";

/// One passage in a tool reply.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Passage {
    /// Document id (path relative to the ingestion root).
    pub document: String,
    /// Document title.
    pub title: String,
    /// 1-based page number.
    pub page: u32,
    /// Similarity score.
    pub score: f32,
    /// Passage text.
    pub text: String,
}

impl From<SearchResult> for Passage {
    fn from(result: SearchResult) -> Self {
        let SearchResult { mut chunk, score } = result;
        let title = chunk.metadata.remove(META_TITLE).unwrap_or_else(|| chunk.document_id.clone());
        Self { document: chunk.document_id, title, page: chunk.page, score, text: chunk.text }
    }
}

/// A retrieval tool over a [`Retriever`].
///
/// The tool accepts a required `query` string and an optional `top_k`. It
/// never reports retrieval failures as errors: an unreachable store or
/// embedder yields `status: "unavailable"` plus the fallback reply, so the
/// assistant can still answer.
pub struct KnowledgeSearchTool {
    retriever: Arc<Retriever>,
}

impl KnowledgeSearchTool {
    /// Create a new tool backed by the given retriever.
    pub fn new(retriever: Arc<Retriever>) -> Self {
        Self { retriever }
    }

    /// Tool name.
    pub fn name(&self) -> &str {
        TOOL_NAME
    }

    /// Tool description shown to the model.
    pub fn description(&self) -> &str {
        "Search the PDF knowledge base for passages relevant to a query. Returns passages with \
         document name, title, page number and similarity score."
    }

    /// JSON schema of the arguments.
    pub fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query to find relevant passages"
                },
                "top_k": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum number of passages to return. Uses the configured default if omitted."
                }
            },
            "required": ["query"]
        })
    }

    /// Run a search.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] only when the arguments are malformed.
    pub async fn execute(&self, args: Value) -> Result<Value> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| RagError::ConfigError("missing required 'query' parameter".into()))?;
        let top_k = match args.get("top_k") {
            None | Some(Value::Null) => self.retriever.config().top_k,
            Some(v) => v
                .as_u64()
                .filter(|k| *k > 0)
                .map(|k| k as usize)
                .ok_or_else(|| RagError::ConfigError("'top_k' must be a positive integer".into()))?,
        };

        info!(tool = TOOL_NAME, query, top_k, "knowledge search called");

        let reply = match self.retriever.lookup(query, top_k).await {
            KnowledgeLookup::Passages(results) => {
                let passages: Vec<Passage> = results.into_iter().map(Passage::from).collect();
                json!({ "status": "ok", "passages": passages })
            }
            KnowledgeLookup::NoRelevantInformation => json!({
                "status": "no_information",
                "passages": [],
                "reply": INSUFFICIENT_INFORMATION,
            }),
            KnowledgeLookup::Unavailable { reason } => {
                error!(tool = TOOL_NAME, %reason, "knowledge base unavailable");
                json!({
                    "status": "unavailable",
                    "passages": [],
                    "reason": reason,
                    "reply": INSUFFICIENT_INFORMATION,
                })
            }
        };
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::config::RagConfig;
    use crate::document::Chunk;
    use crate::embedding::EmbeddingProvider;
    use crate::inmemory::InMemoryVectorStore;
    use crate::vectorstore::VectorStore;

    struct Unit;

    #[async_trait]
    impl EmbeddingProvider for Unit {
        fn name(&self) -> &str {
            "unit"
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
        fn dimensions(&self) -> usize {
            2
        }
    }

    async fn tool(with_data: bool) -> KnowledgeSearchTool {
        let store = Arc::new(InMemoryVectorStore::new());
        if with_data {
            store.create_collection("c", 2).await.unwrap();
            let chunk = Chunk {
                id: "manual.pdf#p4#c0".into(),
                document_id: "manual.pdf".into(),
                page: 4,
                text: "Keep away from water.".into(),
                start_offset: 0,
                end_offset: 21,
                embedding: vec![1.0, 0.0],
                metadata: HashMap::from([(META_TITLE.to_string(), "Pump Manual".to_string())]),
            };
            store.upsert("c", &[chunk]).await.unwrap();
        }
        let retriever = Retriever::new(Arc::new(Unit), store, "c", RagConfig::default());
        KnowledgeSearchTool::new(Arc::new(retriever))
    }

    #[tokio::test]
    async fn returns_citable_passages() {
        let reply = tool(true).await.execute(json!({ "query": "water" })).await.unwrap();
        assert_eq!(reply["status"], "ok");
        let passage = &reply["passages"][0];
        assert_eq!(passage["document"], "manual.pdf");
        assert_eq!(passage["title"], "Pump Manual");
        assert_eq!(passage["page"], 4);
        assert_eq!(passage["text"], "Keep away from water.");
    }

    #[tokio::test]
    async fn empty_knowledge_base_gives_fallback_reply() {
        let reply = tool(false).await.execute(json!({ "query": "anything" })).await.unwrap();
        assert_eq!(reply["status"], "no_information");
        assert_eq!(reply["reply"], INSUFFICIENT_INFORMATION);
    }

    #[tokio::test]
    async fn rejects_malformed_arguments() {
        let tool = tool(false).await;
        assert!(tool.execute(json!({})).await.is_err());
        assert!(tool.execute(json!({ "query": "x", "top_k": 0 })).await.is_err());
        assert_eq!(tool.name(), "search_knowledge_base");
        assert_eq!(tool.parameters_schema()["required"][0], "query");
    }
}
