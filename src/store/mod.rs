//! Similarity index abstraction.
//!
//! The [`VectorIndex`] trait is the persistence seam of the retrieval
//! pipeline. Three backends implement it:
//!
//! | Backend | Type | Selected by |
//! |---------|------|-------------|
//! | SQLite file (default) | [`SqliteIndex`] | `store.backend = "sqlite"` |
//! | Postgres + pgvector | [`PgVectorIndex`] | `store.backend = "postgres"` / `USE_PGVECTOR=true` |
//! | In-process | [`MemoryIndex`] | `store.backend = "memory"`, tests, degraded mode |
//!
//! The index is append-only: entries are never re-embedded or removed,
//! and `nearest` breaks score ties by insertion order.
//!
//! [`open_index`] never fails. A corrupt or unreachable backend is logged
//! and replaced by an empty in-memory index so the service still starts.

pub mod memory;
pub mod pgvector;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::models::{IndexEntry, SearchHit};

pub use memory::MemoryIndex;
pub use pgvector::PgVectorIndex;
pub use sqlite::SqliteIndex;

/// Durable store of embedded chunks with nearest-neighbour lookup.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Append entries. Existing entries are untouched.
    async fn insert(&self, entries: &[IndexEntry]) -> Result<()>;

    /// Up to `k` entries by descending cosine similarity to `query`.
    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    async fn count(&self) -> Result<usize>;

    /// Every stored entry in insertion order.
    async fn entries(&self) -> Result<Vec<IndexEntry>>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// Brute-force ranking shared by the SQLite and memory backends.
///
/// `entries` must be in insertion order; the stable sort keeps that order
/// among equal scores.
pub(crate) fn rank(
    entries: impl IntoIterator<Item = IndexEntry>,
    query: &[f32],
    k: usize,
) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = entries
        .into_iter()
        .map(|entry| SearchHit {
            score: cosine_similarity(query, &entry.vector),
            chunk: entry.chunk,
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(k);
    hits
}

/// Open the configured index, degrading to [`MemoryIndex`] on failure.
pub async fn open_index(config: &Config, provider: &dyn EmbeddingProvider) -> Arc<dyn VectorIndex> {
    let opened: Result<Arc<dyn VectorIndex>> = match config.store.backend.as_str() {
        "memory" => return Arc::new(MemoryIndex::new()),
        "postgres" => match config.store.postgres_url.as_deref() {
            Some(url) => PgVectorIndex::connect(url, &config.store.collection, provider.dims())
                .await
                .map(|idx| Arc::new(idx) as Arc<dyn VectorIndex>),
            None => Err(anyhow::anyhow!("store.postgres_url is not set")),
        },
        _ => SqliteIndex::open(
            &config.store.index_dir,
            provider.model_name(),
            provider.dims(),
        )
        .await
        .map(|idx| Arc::new(idx) as Arc<dyn VectorIndex>),
    };

    match opened {
        Ok(index) => {
            tracing::info!(index = %index.describe(), "similarity index ready");
            index
        }
        Err(e) => {
            tracing::warn!(
                backend = %config.store.backend,
                error = %e,
                "similarity index unavailable, continuing with an empty in-memory index"
            );
            Arc::new(MemoryIndex::new())
        }
    }
}

/// Copy the local SQLite index into the configured pgvector collection.
///
/// Vectors are copied as stored; nothing is re-embedded. Returns the
/// number of entries written.
pub async fn migrate_to_pgvector(
    config: &Config,
    provider: &dyn EmbeddingProvider,
) -> Result<usize> {
    let url = config.store.postgres_url.as_deref().ok_or_else(|| {
        anyhow::anyhow!("store.postgres_url (or PG_CONN) is required to migrate the index")
    })?;

    let source = SqliteIndex::open(
        &config.store.index_dir,
        provider.model_name(),
        provider.dims(),
    )
    .await?;
    let entries = source.entries().await?;
    if entries.is_empty() {
        return Ok(0);
    }

    let dims = entries[0].vector.len();
    let target = PgVectorIndex::connect(url, &config.store.collection, dims).await?;

    for batch in entries.chunks(100) {
        target.insert(batch).await?;
    }

    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkMetadata};

    fn entry(text: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk: Chunk::new(text, ChunkMetadata::default()),
            vector,
        }
    }

    #[test]
    fn rank_orders_by_similarity() {
        let hits = rank(
            vec![
                entry("far", vec![0.0, 1.0]),
                entry("near", vec![1.0, 0.1]),
                entry("exact", vec![1.0, 0.0]),
            ],
            &[1.0, 0.0],
            2,
        );
        let texts: Vec<&str> = hits.iter().map(|h| h.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["exact", "near"]);
    }

    #[test]
    fn rank_ties_keep_insertion_order() {
        let hits = rank(
            vec![
                entry("first", vec![1.0, 0.0]),
                entry("second", vec![2.0, 0.0]),
                entry("third", vec![3.0, 0.0]),
            ],
            &[1.0, 0.0],
            3,
        );
        let texts: Vec<&str> = hits.iter().map(|h| h.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn open_index_memory_backend() {
        let mut config = Config::default();
        config.store.backend = "memory".to_string();
        let provider = crate::embedding::HashProvider::new(8);
        let index = open_index(&config, &provider).await;
        assert_eq!(index.describe(), "memory");
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unreachable_postgres_degrades_to_memory() {
        let mut config = Config::default();
        config.store.backend = "postgres".to_string();
        config.store.postgres_url = Some("postgres://nobody:x@127.0.0.1:9/none".to_string());
        let provider = crate::embedding::HashProvider::new(8);
        let index = open_index(&config, &provider).await;
        assert_eq!(index.describe(), "memory");
    }

    #[tokio::test]
    async fn migrate_empty_index_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.store.index_dir = tmp.path().to_path_buf();
        config.store.postgres_url = Some("postgres://nobody:x@127.0.0.1:9/none".to_string());
        let provider = crate::embedding::HashProvider::new(8);
        assert_eq!(migrate_to_pgvector(&config, &provider).await.unwrap(), 0);
    }
}
