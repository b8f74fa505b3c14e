//! In-memory [`VectorIndex`] for tests and degraded mode.
//!
//! Entries live in a `Vec` behind a tokio `RwLock`; search is brute-force
//! cosine similarity. Nothing survives a restart.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{rank, VectorIndex};
use crate::models::{IndexEntry, SearchHit};

#[derive(Default)]
pub struct MemoryIndex {
    entries: RwLock<Vec<IndexEntry>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn insert(&self, entries: &[IndexEntry]) -> Result<()> {
        self.entries.write().await.extend_from_slice(entries);
        Ok(())
    }

    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let entries = self.entries.read().await;
        Ok(rank(entries.iter().cloned(), query, k))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }

    async fn entries(&self) -> Result<Vec<IndexEntry>> {
        Ok(self.entries.read().await.clone())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkMetadata};

    #[tokio::test]
    async fn insert_then_search() {
        let index = MemoryIndex::new();
        assert!(index.nearest(&[1.0, 0.0], 4).await.unwrap().is_empty());

        index
            .insert(&[
                IndexEntry {
                    chunk: Chunk::new("a", ChunkMetadata::default()),
                    vector: vec![1.0, 0.0],
                },
                IndexEntry {
                    chunk: Chunk::new("b", ChunkMetadata::default()),
                    vector: vec![0.0, 1.0],
                },
            ])
            .await
            .unwrap();

        assert_eq!(index.count().await.unwrap(), 2);
        let hits = index.nearest(&[0.0, 1.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.text, "b");
    }
}
