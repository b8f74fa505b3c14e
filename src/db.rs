//! Database connections.
//!
//! Two databases are in play: the local similarity index (always SQLite)
//! and the operational SQL database that holds `sensor_history` and is the
//! target of the agent's `sql_query` tool (SQLite or Postgres, chosen by
//! the URL scheme).

use anyhow::{bail, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Open (creating if needed) a SQLite database file in WAL mode.
pub async fn connect_sqlite(path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Open an existing SQLite file with writes refused (`query_only`).
pub async fn connect_sqlite_read_only(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(false)
        .pragma("query_only", "ON");

    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await?;

    Ok(pool)
}

pub async fn connect_postgres(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(url)
        .await?;
    Ok(pool)
}

/// The operational database behind `sql.url`.
#[derive(Clone)]
pub enum SqlDatabase {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

/// Path part of a `sqlite:` URL (`sqlite:foo.db`, `sqlite://foo.db`).
pub fn sqlite_path(url: &str) -> Option<&Path> {
    let rest = url.strip_prefix("sqlite:")?;
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    Some(Path::new(rest.split('?').next().unwrap_or(rest)))
}

impl SqlDatabase {
    /// Connect by URL scheme. `read_only` opens SQLite files without write
    /// access and never creates them.
    pub async fn connect(url: &str, read_only: bool) -> Result<Self> {
        if let Some(path) = sqlite_path(url) {
            let pool = if read_only {
                connect_sqlite_read_only(path).await?
            } else {
                connect_sqlite(path).await?
            };
            return Ok(SqlDatabase::Sqlite(pool));
        }
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Ok(SqlDatabase::Postgres(connect_postgres(url).await?));
        }
        bail!("Unsupported database URL '{}': expected sqlite: or postgres://", url)
    }

    pub async fn close(&self) {
        match self {
            SqlDatabase::Sqlite(pool) => pool.close().await,
            SqlDatabase::Postgres(pool) => pool.close().await,
        }
    }
}
