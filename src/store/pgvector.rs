//! [`VectorIndex`] on Postgres with the pgvector extension.
//!
//! All collections share one `document_chunks` table, partitioned by the
//! `collection` column (default `docs`). Ranking is done by the database
//! with the cosine-distance operator `<=>`; vectors cross the wire in
//! pgvector's text form (`[0.1,0.2,...]`) and are cast with `::vector`.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::VectorIndex;
use crate::db;
use crate::error::AssistantError;
use crate::models::{Chunk, ChunkMetadata, IndexEntry, SearchHit};

pub struct PgVectorIndex {
    pool: PgPool,
    collection: String,
}

impl PgVectorIndex {
    /// Connect and ensure the extension and table exist.
    ///
    /// `dims` fixes the column width when the table is first created;
    /// `0` leaves it unconstrained.
    pub async fn connect(url: &str, collection: &str, dims: usize) -> Result<Self> {
        let pool = db::connect_postgres(url).await?;

        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&pool)
            .await?;

        let column = if dims > 0 {
            format!("vector({})", dims)
        } else {
            "vector".to_string()
        };
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS document_chunks (
                seq BIGSERIAL,
                id TEXT PRIMARY KEY,
                collection TEXT NOT NULL,
                text TEXT NOT NULL,
                hash TEXT NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{{}}',
                embedding {} NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            column
        ))
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_document_chunks_collection ON document_chunks(collection)",
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            collection: collection.to_string(),
        })
    }
}

/// pgvector text literal for `v`.
pub fn to_vector_literal(v: &[f32]) -> String {
    let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
    format!("[{}]", parts.join(","))
}

/// Parse pgvector's text output back into floats.
pub fn parse_vector_literal(s: &str) -> Vec<f32> {
    s.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .filter_map(|p| p.trim().parse::<f32>().ok())
        .collect()
}

fn row_to_chunk(row: &sqlx::postgres::PgRow) -> Result<Chunk> {
    let metadata_json: String = row.try_get("metadata")?;
    Ok(Chunk {
        id: row.try_get("id")?,
        text: row.try_get("text")?,
        hash: row.try_get("hash")?,
        metadata: serde_json::from_str::<ChunkMetadata>(&metadata_json).unwrap_or_default(),
    })
}

#[async_trait]
impl VectorIndex for PgVectorIndex {
    async fn insert(&self, entries: &[IndexEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO document_chunks (id, collection, text, hash, metadata, embedding)
                VALUES ($1, $2, $3, $4, $5, $6::vector)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(&entry.chunk.id)
            .bind(&self.collection)
            .bind(&entry.chunk.text)
            .bind(&entry.chunk.hash)
            .bind(serde_json::to_value(&entry.chunk.metadata)?)
            .bind(to_vector_literal(&entry.vector))
            .execute(&mut *tx)
            .await
            .map_err(AssistantError::from)?;
        }

        tx.commit().await.map_err(AssistantError::from)?;
        Ok(())
    }

    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let rows = sqlx::query(
            r#"
            SELECT id, text, hash, metadata::text AS metadata,
                   (1 - (embedding <=> $1::vector))::float8 AS score
            FROM document_chunks
            WHERE collection = $2
            ORDER BY embedding <=> $1::vector, seq
            LIMIT $3
            "#,
        )
        .bind(to_vector_literal(query))
        .bind(&self.collection)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let score: f64 = row.try_get("score")?;
                Ok(SearchHit {
                    chunk: row_to_chunk(row)?,
                    score: score as f32,
                })
            })
            .collect()
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks WHERE collection = $1")
                .bind(&self.collection)
                .fetch_one(&self.pool)
                .await?;
        Ok(n as usize)
    }

    async fn entries(&self) -> Result<Vec<IndexEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, text, hash, metadata::text AS metadata, embedding::text AS embedding
            FROM document_chunks
            WHERE collection = $1
            ORDER BY seq
            "#,
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let embedding: String = row.try_get("embedding")?;
                Ok(IndexEntry {
                    chunk: row_to_chunk(row)?,
                    vector: parse_vector_literal(&embedding),
                })
            })
            .collect()
    }

    fn describe(&self) -> String {
        format!("pgvector:{}", self.collection)
    }
}
