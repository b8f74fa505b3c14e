//! Local [`VectorIndex`] backed by a SQLite file.
//!
//! The index lives at `<store.index_dir>/index.sqlite`. Vectors are stored
//! as little-endian f32 BLOBs next to the chunk text and its JSON metadata;
//! search loads every vector and ranks by cosine similarity.
//!
//! Opening recovers from a damaged file: the file is renamed to
//! `index.sqlite.corrupt-<unix-ts>` and a fresh index is created in its
//! place, so an unreadable index costs the previously ingested documents
//! but never the service.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};

use super::{rank, VectorIndex};
use crate::db;
use crate::error::AssistantError;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::migrate::{init_index_schema, INDEX_FILE};
use crate::models::{Chunk, ChunkMetadata, IndexEntry, SearchHit};

pub struct SqliteIndex {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteIndex {
    /// Open or create the index in `dir`, recovering from corruption.
    ///
    /// `model` and `dims` identify the embedding space; an index built
    /// with a different model is reported, not rejected.
    pub async fn open(dir: &Path, model: &str, dims: usize) -> Result<Self> {
        let path = dir.join(INDEX_FILE);

        match Self::try_open(&path, model, dims).await {
            Ok(index) => Ok(index),
            Err(e) if path.exists() && is_corruption(&e) => {
                let aside = move_aside(&path)?;
                tracing::warn!(
                    error = %e,
                    moved_to = %aside.display(),
                    "index unreadable, starting a fresh one"
                );
                Self::try_open(&path, model, dims).await
            }
            Err(e) => Err(e),
        }
    }

    async fn try_open(path: &Path, model: &str, dims: usize) -> Result<Self> {
        let pool = db::connect_sqlite(path).await?;

        let check: String = sqlx::query_scalar("PRAGMA quick_check")
            .fetch_one(&pool)
            .await?;
        if check != "ok" {
            pool.close().await;
            return Err(IntegrityCheckFailed(check).into());
        }

        init_index_schema(&pool).await?;
        check_embedding_model(&pool, model, dims).await?;

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const SQLITE_CORRUPT: i32 = 11;
const SQLITE_NOTADB: i32 = 26;

#[derive(Debug, thiserror::Error)]
#[error("integrity check failed: {0}")]
struct IntegrityCheckFailed(String);

/// Only a damaged file justifies starting over; busy or permission errors
/// are returned to the caller with the index left in place.
fn is_corruption(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if cause.is::<IntegrityCheckFailed>() {
            return true;
        }
        match cause.downcast_ref::<sqlx::Error>() {
            Some(sqlx::Error::Database(db)) => db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| matches!(code & 0xff, SQLITE_CORRUPT | SQLITE_NOTADB))
                .unwrap_or(false),
            _ => false,
        }
    })
}

/// Rename a damaged index and its WAL side files out of the way.
fn move_aside(path: &Path) -> Result<PathBuf> {
    let ts = chrono::Utc::now().timestamp();
    let aside = PathBuf::from(format!("{}.corrupt-{}", path.display(), ts));
    std::fs::rename(path, &aside)
        .with_context(|| format!("Failed to move corrupt index {}", path.display()))?;

    for suffix in ["-wal", "-shm"] {
        let side = PathBuf::from(format!("{}{}", path.display(), suffix));
        if side.exists() {
            let _ = std::fs::remove_file(side);
        }
    }
    Ok(aside)
}

/// Record the embedding model on first use; warn when it later differs.
async fn check_embedding_model(pool: &SqlitePool, model: &str, dims: usize) -> Result<()> {
    if dims == 0 {
        return Ok(());
    }

    let stored: Option<String> =
        sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'embedding_model'")
            .fetch_optional(pool)
            .await?;
    let stored_dims: Option<String> =
        sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'embedding_dims'")
            .fetch_optional(pool)
            .await?;

    match (stored, stored_dims) {
        (Some(m), Some(d)) => {
            if m != model || d != dims.to_string() {
                tracing::warn!(
                    index_model = %m,
                    index_dims = %d,
                    model,
                    dims,
                    "index was built with a different embedding model; results will be unreliable until it is rebuilt"
                );
            }
        }
        _ => {
            let meta = [
                ("embedding_model", model.to_string()),
                ("embedding_dims", dims.to_string()),
            ];
            for (key, value) in meta {
                sqlx::query(
                    "INSERT INTO index_meta (key, value) VALUES (?, ?)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                )
                .bind(key)
                .bind(value)
                .execute(pool)
                .await?;
            }
        }
    }
    Ok(())
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<IndexEntry> {
    let metadata_json: String = row.try_get("metadata_json")?;
    let metadata: ChunkMetadata = serde_json::from_str(&metadata_json).unwrap_or_default();
    let blob: Vec<u8> = row.try_get("embedding")?;

    Ok(IndexEntry {
        chunk: Chunk {
            id: row.try_get("id")?,
            text: row.try_get("text")?,
            hash: row.try_get("hash")?,
            metadata,
        },
        vector: blob_to_vec(&blob),
    })
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn insert(&self, entries: &[IndexEntry]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            let metadata_json = serde_json::to_string(&entry.chunk.metadata)?;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, text, hash, metadata_json, embedding, dims, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.chunk.id)
            .bind(&entry.chunk.text)
            .bind(&entry.chunk.hash)
            .bind(&metadata_json)
            .bind(vec_to_blob(&entry.vector))
            .bind(entry.vector.len() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(AssistantError::from)?;
        }

        tx.commit().await.map_err(AssistantError::from)?;
        Ok(())
    }

    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        Ok(rank(self.entries().await?, query, k))
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn entries(&self) -> Result<Vec<IndexEntry>> {
        let rows = sqlx::query(
            "SELECT id, text, hash, metadata_json, embedding FROM chunks ORDER BY seq",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(text: &str, page: i64, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk: Chunk::new(
                text,
                ChunkMetadata {
                    source: "manual.pdf".to_string(),
                    page: Some(page),
                    row: None,
                },
            ),
            vector,
        }
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let index = SqliteIndex::open(tmp.path(), "m", 2).await.unwrap();
            index
                .insert(&[entry("filters", 0, vec![1.0, 0.0]), entry("belts", 1, vec![0.0, 1.0])])
                .await
                .unwrap();
            index.pool().close().await;
        }

        let index = SqliteIndex::open(tmp.path(), "m", 2).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 2);
        let hits = index.nearest(&[0.0, 1.0], 1).await.unwrap();
        assert_eq!(hits[0].chunk.text, "belts");
        assert_eq!(hits[0].chunk.metadata.page, Some(1));
        assert_eq!(hits[0].chunk.metadata.source, "manual.pdf");
    }

    #[tokio::test]
    async fn entries_keep_insertion_order() {
        let tmp = tempfile::tempdir().unwrap();
        let index = SqliteIndex::open(tmp.path(), "m", 2).await.unwrap();
        index.insert(&[entry("one", 0, vec![1.0, 0.0])]).await.unwrap();
        index.insert(&[entry("two", 0, vec![1.0, 0.0])]).await.unwrap();
        let texts: Vec<String> = index
            .entries()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.chunk.text)
            .collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn corrupt_file_is_moved_aside() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(INDEX_FILE),
            b"this is not a sqlite database at all, not even close",
        )
        .unwrap();

        let index = SqliteIndex::open(tmp.path(), "m", 2).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 0);

        let moved = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains(".corrupt-"));
        assert!(moved);
    }

    #[tokio::test]
    async fn open_failure_that_is_not_corruption_keeps_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        // A directory where the file should be cannot be opened, but is not damaged data
        let blocker = tmp.path().join(INDEX_FILE);
        std::fs::create_dir(&blocker).unwrap();

        assert!(SqliteIndex::open(tmp.path(), "m", 2).await.is_err());
        assert!(blocker.is_dir());
        let moved = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains(".corrupt-"));
        assert!(!moved);
    }

    #[test]
    fn failed_integrity_check_counts_as_corruption() {
        let err = anyhow::Error::from(IntegrityCheckFailed("page 3 is never used".into()));
        assert!(is_corruption(&err.context("opening index")));
        assert!(!is_corruption(&anyhow::anyhow!("database is locked")));
    }

    #[tokio::test]
    async fn model_change_is_tolerated() {
        let tmp = tempfile::tempdir().unwrap();
        SqliteIndex::open(tmp.path(), "model-a", 4).await.unwrap();
        let index = SqliteIndex::open(tmp.path(), "model-b", 8).await.unwrap();
        let model: String =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'embedding_model'")
                .fetch_one(index.pool())
                .await
                .unwrap();
        assert_eq!(model, "model-a");
    }
}
