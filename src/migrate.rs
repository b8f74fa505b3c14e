//! Schema creation for the index and operational databases.
//!
//! All statements are idempotent (`CREATE ... IF NOT EXISTS`) so `init`
//! can run any number of times and the index opens lazily on first use.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db::{self, SqlDatabase};

/// File name of the local similarity index inside `store.index_dir`.
pub const INDEX_FILE: &str = "index.sqlite";

/// Tables of the local similarity index.
pub async fn init_index_schema(pool: &SqlitePool) -> Result<()> {
    // Embedding model the index was built with
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // `seq` preserves insertion order for tie-breaking
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_hash ON chunks(hash)")
        .execute(pool)
        .await?;

    Ok(())
}

const SENSOR_HISTORY_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS sensor_history (
        timestamp TEXT NOT NULL,
        equipment_id TEXT NOT NULL,
        temperature DOUBLE PRECISION,
        vibration DOUBLE PRECISION,
        pressure DOUBLE PRECISION,
        UNIQUE(equipment_id, timestamp)
    )
"#;

/// `sensor_history` in the operational database (SQLite or Postgres).
pub async fn init_sensor_history_schema(db: &SqlDatabase) -> Result<()> {
    match db {
        SqlDatabase::Sqlite(pool) => {
            sqlx::query(SENSOR_HISTORY_DDL).execute(pool).await?;
        }
        SqlDatabase::Postgres(pool) => {
            sqlx::query(SENSOR_HISTORY_DDL).execute(pool).await?;
        }
    }
    Ok(())
}

/// Create every table the assistant owns. Backs `bldg init`.
pub async fn run_migrations(config: &Config) -> Result<()> {
    if config.store.backend == "sqlite" {
        let pool = db::connect_sqlite(&config.store.index_dir.join(INDEX_FILE)).await?;
        init_index_schema(&pool).await?;
        pool.close().await;
    }

    let ops = SqlDatabase::connect(&config.sql.url, false).await?;
    init_sensor_history_schema(&ops).await?;
    ops.close().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.store.index_dir = tmp.path().join("indexes");
        config.sql.url = format!("sqlite:{}", tmp.path().join("ops.sqlite").display());

        run_migrations(&config).await.unwrap();
        run_migrations(&config).await.unwrap();

        assert!(tmp.path().join("indexes").join(INDEX_FILE).exists());

        let pool = db::connect_sqlite(&tmp.path().join("ops.sqlite")).await.unwrap();
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='sensor_history'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(n, 1);
    }
}
