//! Core data models used throughout the assistant.
//!
//! These types represent the chunks, index entries, search hits and
//! citations that flow through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// Sensor name → reading (e.g. `temperature`, `vibration`, `pressure`).
pub type SensorReadings = BTreeMap<String, f64>;

/// Characters of chunk text shown in a citation.
pub const SNIPPET_CHARS: usize = 160;

/// Provenance of a chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// File name the chunk came from.
    pub source: String,
    /// Zero-based PDF page index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    /// Zero-based CSV data row index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<i64>,
}

/// A bounded text fragment with provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn new(text: impl Into<String>, metadata: ChunkMetadata) -> Self {
        let text = text.into();
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let hash = format!("{:x}", hasher.finalize());

        Self {
            id: Uuid::new_v4().to_string(),
            text,
            hash,
            metadata,
        }
    }
}

/// A chunk together with its embedding, as stored in the index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A nearest-neighbour result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: Chunk,
    /// Cosine similarity, higher is closer.
    pub score: f32,
}

/// User-facing pointer back to the chunk that grounded an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// File basename.
    pub source: String,
    /// Page index, or `-1` when the chunk has no page (CSV rows).
    pub page: i64,
    pub snippet: String,
}

impl Citation {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        let source = Path::new(&chunk.metadata.source)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let snippet: String = chunk.text.chars().take(SNIPPET_CHARS).collect();

        Self {
            source,
            page: chunk.metadata.page.unwrap_or(-1),
            snippet: snippet.replace('\n', " "),
        }
    }
}
