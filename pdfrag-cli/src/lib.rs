//! Command implementations behind the `pdfrag` binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pdfrag::ollama::OllamaEmbeddingProvider;
use pdfrag::qdrant::QdrantVectorStore;
use pdfrag::tool::Passage;
use pdfrag::{
    AssistantProfile, CancellationToken, DirectoryLoader, EmbeddingProvider,
    INSUFFICIENT_INFORMATION, InMemoryVectorStore, IngestionPipeline, IngestionSummary,
    MetadataFilter, RagError, Retriever, SearchResult, Settings, StoreBackend, VectorStore,
};
use pdfrag_telemetry::LogFormat;
use tracing::{info, warn};

/// Ingest a directory of PDFs into a vector store and search it.
#[derive(Parser, Debug)]
#[command(name = "pdfrag", version, about)]
pub struct Cli {
    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "PDFRAG_LOG_FORMAT", default_value = "pretty", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Load, chunk, embed and upsert every supported file under a directory.
    Ingest {
        /// Directory to scan. Defaults to PDFRAG_DOCUMENTS_DIR.
        dir: Option<PathBuf>,
        /// Only scan the top level of the directory.
        #[arg(long)]
        no_recursive: bool,
    },
    /// Search the knowledge base.
    Query {
        query: String,
        /// Number of passages. Defaults to PDFRAG_TOP_K.
        #[arg(long, short = 'k')]
        top_k: Option<usize>,
        /// Restrict to one document id (path relative to the ingestion root).
        #[arg(long)]
        document: Option<String>,
        /// Restrict to one page; combine with --document.
        #[arg(long)]
        page: Option<u32>,
        /// Print passages as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the assistant profile and its system prompt.
    Profile {
        /// Print the profile as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// Execute a parsed command against `settings`.
pub async fn run(command: Command, settings: Settings) -> Result<()> {
    match command {
        Command::Ingest { dir, no_recursive } => {
            let dir = dir.unwrap_or_else(|| settings.documents_dir.clone());
            let recursive = settings.recursive && !no_recursive;
            ingest(&settings, dir, recursive).await
        }
        Command::Query { query, top_k, document, page, json } => {
            let filter = filter(document, page);
            let top_k = top_k.unwrap_or(settings.rag.top_k);
            let results = query_knowledge(&settings, &query, top_k, filter.as_ref()).await?;
            println!("{}", render_results(&results, json)?);
            Ok(())
        }
        Command::Profile { json } => {
            let profile = AssistantProfile::from_settings(&settings);
            if json {
                println!("{}", serde_json::to_string_pretty(&profile)?);
            } else {
                println!("{}", profile.system_prompt());
            }
            Ok(())
        }
    }
}

/// The embedding client described by `settings`.
pub fn open_embedder(settings: &Settings) -> Arc<dyn EmbeddingProvider> {
    Arc::new(
        OllamaEmbeddingProvider::new()
            .with_base_url(&settings.embedding.base_url)
            .with_model(&settings.embedding.model, settings.embedding.dimensions),
    )
}

/// A new store handle. Ingestion and retrieval each open their own.
pub fn open_store(settings: &Settings) -> Result<Arc<dyn VectorStore>> {
    match settings.store.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryVectorStore::with_distance(
            settings.rag.distance,
        ))),
        StoreBackend::Qdrant => {
            let url = settings.store.url.as_deref().context("qdrant backend needs a url")?;
            let store = QdrantVectorStore::with_timeout(url, settings.rag.request_timeout)?
                .with_distance(settings.rag.distance);
            Ok(Arc::new(store))
        }
    }
}

fn filter(document: Option<String>, page: Option<u32>) -> Option<MetadataFilter> {
    if document.is_none() && page.is_none() {
        return None;
    }
    let mut filter = MetadataFilter::new();
    if let Some(document) = document {
        filter = filter.document(document);
    }
    if let Some(page) = page {
        filter = filter.page(page);
    }
    Some(filter)
}

async fn ingest(settings: &Settings, dir: PathBuf, recursive: bool) -> Result<()> {
    let pipeline = IngestionPipeline::builder()
        .config(settings.rag.clone())
        .loader(DirectoryLoader::new().recursive(recursive))
        .embedding_provider(open_embedder(settings))
        .vector_store(open_store(settings)?)
        .collection(settings.store.collection.clone())
        .build()?;

    let token = CancellationToken::new();
    let interrupt = {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing in-flight work");
                token.cancel();
            }
        })
    };
    let mut state = pipeline.state();
    let progress = tokio::spawn(async move {
        while state.changed().await.is_ok() {
            info!(state = ?*state.borrow(), "ingestion state changed");
        }
    });

    let outcome = pipeline.ingest_directory(&dir, &token).await;
    interrupt.abort();
    drop(pipeline);
    progress.abort();

    match outcome {
        Ok(summary) => {
            println!("{}", render_summary(&summary)?);
            if settings.store.backend == StoreBackend::Memory {
                warn!("memory backend selected; ingested chunks are dropped on exit");
            }
            Ok(())
        }
        Err(RagError::IngestionFailed { stage, cause, summary }) => {
            println!("{}", render_summary(&summary)?);
            Err(anyhow::anyhow!("ingestion failed while {stage}: {cause}"))
        }
        Err(e) => Err(e.into()),
    }
}

async fn query_knowledge(
    settings: &Settings,
    query: &str,
    top_k: usize,
    filter: Option<&MetadataFilter>,
) -> Result<Vec<SearchResult>> {
    if settings.store.backend == StoreBackend::Memory {
        warn!("memory backend selected; nothing survives between invocations");
    }
    let retriever = Retriever::new(
        open_embedder(settings),
        open_store(settings)?,
        settings.store.collection.clone(),
        settings.rag.clone(),
    );
    Ok(retriever.retrieve_filtered(query, top_k, filter).await?)
}

pub fn render_summary(summary: &IngestionSummary) -> Result<String> {
    Ok(serde_json::to_string_pretty(summary)?)
}

/// Passages as numbered citations, or as a JSON array.
pub fn render_results(results: &[SearchResult], json: bool) -> Result<String> {
    let passages: Vec<Passage> = results.iter().cloned().map(Passage::from).collect();
    if json {
        return Ok(serde_json::to_string_pretty(&passages)?);
    }
    if passages.is_empty() {
        return Ok(INSUFFICIENT_INFORMATION.to_string());
    }
    let blocks: Vec<String> = passages
        .iter()
        .enumerate()
        .map(|(i, p)| {
            format!(
                "[{}] {} ({}, page {}) score {:.3}\n{}",
                i + 1,
                p.title,
                p.document,
                p.page,
                p.score,
                p.text.trim()
            )
        })
        .collect();
    Ok(blocks.join("\n\n"))
}

/// Parse the command line after loading `.env`.
pub fn parse() -> Cli {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("warning: could not read .env: {e}");
        }
    }
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use pdfrag::Chunk;

    fn settings(vars: &[(&str, &str)]) -> Settings {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|k| vars.get(k).cloned()).unwrap()
    }

    fn result(title: &str, page: u32, score: f32) -> SearchResult {
        let mut metadata = HashMap::new();
        metadata.insert("title".to_string(), title.to_string());
        SearchResult {
            chunk: Chunk {
                id: format!("manual.pdf#p{page}#c0"),
                document_id: "manual.pdf".into(),
                page,
                text: "  Hold the button for ten seconds. ".into(),
                start_offset: 0,
                end_offset: 33,
                embedding: Vec::new(),
                metadata,
            },
            score,
        }
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["pdfrag", "query", "reset steps", "-k", "3", "--page", "2"])
            .unwrap();
        assert_eq!(
            cli.command,
            Command::Query {
                query: "reset steps".into(),
                top_k: Some(3),
                document: None,
                page: Some(2),
                json: false,
            }
        );

        let cli =
            Cli::try_parse_from(["pdfrag", "--log-format", "json", "ingest", "--no-recursive"])
                .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.command, Command::Ingest { dir: None, no_recursive: true });

        assert!(Cli::try_parse_from(["pdfrag", "--log-format", "xml", "profile"]).is_err());
        assert!(Cli::try_parse_from(["pdfrag"]).is_err());
    }

    #[test]
    fn builds_filter_only_when_asked() {
        assert!(filter(None, None).is_none());
        let expected = MetadataFilter::new().document("a.pdf").page(4);
        assert_eq!(filter(Some("a.pdf".into()), Some(4)), Some(expected));
    }

    #[test]
    fn renders_citations() {
        let text = render_results(&[result("Manual", 2, 0.91234)], false).unwrap();
        assert_eq!(
            text,
            "[1] Manual (manual.pdf, page 2) score 0.912\nHold the button for ten seconds."
        );
        assert_eq!(render_results(&[], false).unwrap(), INSUFFICIENT_INFORMATION);
        assert_eq!(render_results(&[], true).unwrap(), "[]");

        let json: serde_json::Value =
            serde_json::from_str(&render_results(&[result("Manual", 2, 0.5)], true).unwrap())
                .unwrap();
        assert_eq!(json[0]["page"], 2);
        assert_eq!(json[0]["document"], "manual.pdf");
    }

    #[tokio::test]
    async fn memory_backend_needs_no_services() {
        let settings = settings(&[("PDFRAG_VECTOR_STORE", "memory")]);
        let store = open_store(&settings).unwrap();
        assert_eq!(store.backend(), "memory");

        let results = query_knowledge(&settings, "", 5, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn qdrant_backend_requires_a_valid_url() {
        let settings = settings(&[
            ("PDFRAG_VECTOR_STORE", "qdrant"),
            ("PDFRAG_QDRANT_URL", "http://localhost:6334"),
        ]);
        assert!(open_store(&settings).is_ok());
    }
}
