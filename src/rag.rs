//! Retrieval-augmented question answering over ingested documents.
//!
//! ```text
//! bytes ─▶ extract ─▶ split ─▶ embed (batched) ─▶ index.insert
//!
//! query ─▶ embed ─▶ index.nearest(k) ─▶ prompt ─▶ LLM ─▶ { answer, citations }
//! ```
//!
//! [`DocumentAssistant`] owns the embedding provider and the index and is
//! shared (behind `Arc`) by the HTTP handlers, the CLI and the agent's
//! `vector_search` tool.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::chunk::split_text;
use crate::config::{ChunkingConfig, RetrievalConfig};
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::AssistantError;
use crate::extract::{self, FileType};
use crate::llm::{complete_prompt, ChatModel};
use crate::models::{Chunk, ChunkMetadata, Citation, IndexEntry, SearchHit};
use crate::store::VectorIndex;

pub const GREETING: &str = "Hello! How can I assist you today?";
pub const NO_DOCUMENTS: &str = "No documents ingested yet.";

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub chunks: usize,
    pub file_type: FileType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
}

impl AskResponse {
    fn bare(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            citations: Vec::new(),
        }
    }
}

pub struct DocumentAssistant {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    chunking: ChunkingConfig,
    retrieval: RetrievalConfig,
    batch_size: usize,
}

/// Prompt sent to the LLM for a grounded answer.
pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "You are a helpful building-ops assistant.\n\nCONTEXT:\n{}\n\nQUESTION: {}\n\nANSWER:",
        context, question
    )
}

impl DocumentAssistant {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        chunking: ChunkingConfig,
        retrieval: RetrievalConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            chunking,
            retrieval,
            batch_size: batch_size.max(1),
        }
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Clamp a requested `k` into `1..=max_k`, defaulting when absent.
    pub fn effective_k(&self, k: Option<usize>) -> usize {
        k.unwrap_or(self.retrieval.default_k)
            .clamp(1, self.retrieval.max_k.max(1))
    }

    /// Extract, split, embed and index one document.
    ///
    /// `filename` decides the format; only its basename is recorded as the
    /// chunk source.
    pub async fn ingest_bytes(&self, filename: &str, bytes: Vec<u8>) -> Result<IngestReport> {
        let file_type = FileType::from_filename(filename)?;
        let source = Path::new(filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.to_string());

        let chunks = match file_type {
            FileType::Csv => extract::load_csv(&bytes, &source)?,
            FileType::Pdf => {
                let pages = tokio::task::spawn_blocking(move || extract::load_pdf(&bytes))
                    .await
                    .map_err(|e| AssistantError::Extraction(format!("PDF worker: {}", e)))??;

                let mut chunks = Vec::new();
                for page in pages {
                    for piece in split_text(
                        &page.text,
                        self.chunking.max_chars,
                        self.chunking.overlap_chars,
                    ) {
                        chunks.push(Chunk::new(
                            piece,
                            ChunkMetadata {
                                source: source.clone(),
                                page: Some(page.page),
                                row: None,
                            },
                        ));
                    }
                }
                chunks
            }
        };

        let count = chunks.len();
        self.embed_and_insert(chunks).await?;

        tracing::info!(
            source = %source,
            file_type = %file_type,
            chunks = count,
            "document ingested"
        );
        Ok(IngestReport {
            chunks: count,
            file_type,
        })
    }

    /// Read a file from disk and ingest it.
    pub async fn ingest_path(&self, path: &Path) -> Result<IngestReport> {
        let name = path.to_string_lossy().into_owned();
        FileType::from_filename(&name)?;
        let bytes = tokio::fs::read(path).await?;
        self.ingest_bytes(&name, bytes).await
    }

    /// Embed every batch before touching the index, then insert once, so a
    /// failed embedding call leaves nothing of the document behind.
    async fn embed_and_insert(&self, chunks: Vec<Chunk>) -> Result<()> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            vectors.extend(self.embedder.embed(&texts).await?);
        }
        if vectors.len() != chunks.len() {
            anyhow::bail!(
                "embedding provider returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry { chunk, vector })
            .collect();
        if !entries.is_empty() {
            self.index.insert(&entries).await?;
        }
        Ok(())
    }

    /// Nearest chunks for `query`, or [`AssistantError::IndexUnavailable`]
    /// when nothing has been ingested.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        if self.index.count().await? == 0 {
            return Err(AssistantError::IndexUnavailable.into());
        }
        let vector = embed_query(self.embedder.as_ref(), query).await?;
        self.index.nearest(&vector, k).await
    }

    /// Like [`retrieve`](Self::retrieve), but an empty index yields no hits.
    pub async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        match self.retrieve(query, k).await {
            Err(e) if is_index_unavailable(&e) => Ok(Vec::new()),
            other => other,
        }
    }

    /// Answer `query` from the top `k` chunks.
    ///
    /// Queries shorter than `retrieval.greeting_min_words` words get the
    /// fixed greeting without touching the index or the model. An empty
    /// index answers with [`NO_DOCUMENTS`], also without a model call.
    pub async fn answer(
        &self,
        query: &str,
        k: Option<usize>,
        llm: &dyn ChatModel,
    ) -> Result<AskResponse> {
        if query.split_whitespace().count() < self.retrieval.greeting_min_words {
            return Ok(AskResponse::bare(GREETING));
        }

        let hits = match self.retrieve(query, self.effective_k(k)).await {
            Err(e) if is_index_unavailable(&e) => return Ok(AskResponse::bare(NO_DOCUMENTS)),
            other => other?,
        };

        let context = hits
            .iter()
            .map(|h| h.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let answer = complete_prompt(llm, &build_prompt(&context, query)).await?;

        Ok(AskResponse {
            answer,
            citations: hits.iter().map(|h| Citation::from_chunk(&h.chunk)).collect(),
        })
    }
}

fn is_index_unavailable(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<AssistantError>(),
        Some(AssistantError::IndexUnavailable)
    )
}
