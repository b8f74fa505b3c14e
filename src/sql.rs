//! Read-only ad-hoc SQL against the operational database.
//!
//! Guarding happens twice: the statement must start with a read keyword
//! and be a single statement, and the connection itself is read-only
//! (SQLite with `query_only`, Postgres inside a `READ ONLY`
//! transaction that is always rolled back). At most `max_rows` rows are
//! pulled from the cursor.

use anyhow::{bail, Result};
use futures_util::TryStreamExt;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};

use crate::db::SqlDatabase;

const READ_KEYWORDS: &[&str] = &["select", "with", "explain", "values", "show"];

#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl QueryOutput {
    /// `Columns: a, b` followed by one `v1 | v2` line per row.
    pub fn render(&self) -> String {
        let mut out = if self.columns.is_empty() {
            "Columns: (none)".to_string()
        } else {
            format!("Columns: {}", self.columns.join(", "))
        };
        if self.rows.is_empty() {
            out.push_str("\n(no rows)");
        }
        for row in &self.rows {
            out.push('\n');
            out.push_str(&row.join(" | "));
        }
        out
    }
}

/// Reject anything that is not a single read statement.
pub fn check_read_only(sql: &str) -> Result<&str> {
    let stmt = sql.trim().trim_end_matches(';').trim();
    if stmt.is_empty() {
        bail!("empty query");
    }
    if has_statement_separator(stmt) {
        bail!("only a single statement is allowed");
    }
    let first = stmt
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    if !READ_KEYWORDS.contains(&first.as_str()) {
        bail!("only read-only queries (SELECT, WITH, EXPLAIN, VALUES, SHOW) are allowed");
    }
    Ok(stmt)
}

/// Run `sql` against the database at `url`, returning up to `max_rows` rows.
/// `;` outside quoted literals and identifiers. A doubled quote (`''`)
/// closes and reopens the literal, so it needs no special case.
fn has_statement_separator(stmt: &str) -> bool {
    let mut quote: Option<char> = None;
    for c in stmt.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == ';' => return true,
            None => {}
        }
    }
    false
}

pub async fn run_read_only(url: &str, sql: &str, max_rows: usize) -> Result<QueryOutput> {
    let stmt = check_read_only(sql)?;
    let db = SqlDatabase::connect(url, true).await?;
    let result = match &db {
        SqlDatabase::Sqlite(pool) => {
            let prepared = pool.prepare(stmt).await?;
            let columns = column_names(prepared.columns());
            let mut rows = Vec::new();
            let mut cursor = prepared.query().fetch(pool);
            while rows.len() < max_rows {
                match cursor.try_next().await? {
                    Some(row) => rows.push(sqlite_cells(&row)),
                    None => break,
                }
            }
            QueryOutput { columns, rows }
        }
        SqlDatabase::Postgres(pool) => {
            let mut tx = pool.begin().await?;
            sqlx::query("SET TRANSACTION READ ONLY")
                .execute(&mut *tx)
                .await?;

            let prepared = (&mut *tx).prepare(stmt).await?;
            let columns = column_names(prepared.columns());
            let mut rows = Vec::new();
            {
                let mut cursor = prepared.query().fetch(&mut *tx);
                while rows.len() < max_rows {
                    match cursor.try_next().await? {
                        Some(row) => rows.push(pg_cells(&row)),
                        None => break,
                    }
                }
            }
            tx.rollback().await?;
            QueryOutput { columns, rows }
        }
    };
    db.close().await;
    Ok(result)
}

fn column_names<C: Column>(columns: &[C]) -> Vec<String> {
    columns.iter().map(|c| c.name().to_string()).collect()
}

fn sqlite_cells(row: &SqliteRow) -> Vec<String> {
    (0..row.len())
        .map(|i| {
            if row.try_get_raw(i).map(|v| v.is_null()).unwrap_or(false) {
                return "NULL".to_string();
            }
            if let Ok(v) = row.try_get::<i64, _>(i) {
                return v.to_string();
            }
            if let Ok(v) = row.try_get::<f64, _>(i) {
                return v.to_string();
            }
            if let Ok(v) = row.try_get::<String, _>(i) {
                return v;
            }
            if let Ok(v) = row.try_get::<Vec<u8>, _>(i) {
                return format!("<{} bytes>", v.len());
            }
            "?".to_string()
        })
        .collect()
}

fn pg_cells(row: &PgRow) -> Vec<String> {
    (0..row.len())
        .map(|i| {
            let type_name = match row.try_get_raw(i) {
                Ok(v) if v.is_null() => return "NULL".to_string(),
                Ok(v) => v.type_info().name().to_string(),
                Err(_) => return "?".to_string(),
            };
            if let Ok(v) = row.try_get::<String, _>(i) {
                return v;
            }
            if let Ok(v) = row.try_get::<i64, _>(i) {
                return v.to_string();
            }
            if let Ok(v) = row.try_get::<i32, _>(i) {
                return v.to_string();
            }
            if let Ok(v) = row.try_get::<i16, _>(i) {
                return v.to_string();
            }
            if let Ok(v) = row.try_get::<f64, _>(i) {
                return v.to_string();
            }
            if let Ok(v) = row.try_get::<f32, _>(i) {
                return v.to_string();
            }
            if let Ok(v) = row.try_get::<bool, _>(i) {
                return v.to_string();
            }
            if let Ok(v) = row.try_get::<chrono::DateTime<chrono::Utc>, _>(i) {
                return v.to_rfc3339();
            }
            if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(i) {
                return v.to_string();
            }
            if let Ok(v) = row.try_get::<chrono::NaiveDate, _>(i) {
                return v.to_string();
            }
            if let Ok(v) = row.try_get::<serde_json::Value, _>(i) {
                return v.to_string();
            }
            format!("<{}>", type_name)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_guard() {
        assert!(check_read_only("SELECT 1").is_ok());
        assert!(check_read_only("  select * from t;  ").is_ok());
        assert!(check_read_only("WITH x AS (SELECT 1) SELECT * FROM x").is_ok());
        assert!(check_read_only("(select 1)").is_err());
        assert!(check_read_only("DELETE FROM sensor_history").is_err());
        assert!(check_read_only("drop table t").is_err());
        assert!(check_read_only("SELECT 1; DELETE FROM t").is_err());
        assert!(check_read_only("   ").is_err());
    }

    #[test]
    fn semicolons_inside_literals_are_allowed() {
        assert!(check_read_only("SELECT * FROM notes WHERE body = 'a;b'").is_ok());
        assert!(check_read_only("SELECT 'it''s; fine', \"odd;col\" FROM t;").is_ok());
        assert!(check_read_only("SELECT 'a;b'; DELETE FROM t").is_err());
    }

    #[test]
    fn render_format() {
        let out = QueryOutput {
            columns: vec!["equipment_id".to_string(), "temperature".to_string()],
            rows: vec![
                vec!["HVAC-01".to_string(), "72".to_string()],
                vec!["CHILLER-02".to_string(), "45".to_string()],
            ],
        };
        assert_eq!(
            out.render(),
            "Columns: equipment_id, temperature\nHVAC-01 | 72\nCHILLER-02 | 45"
        );
    }

    async fn seeded_db(dir: &std::path::Path) -> String {
        let url = format!("sqlite:{}", dir.join("ops.sqlite").display());
        let db = SqlDatabase::connect(&url, false).await.unwrap();
        if let SqlDatabase::Sqlite(pool) = &db {
            sqlx::query("CREATE TABLE readings (id INTEGER, name TEXT, value REAL, note TEXT)")
                .execute(pool)
                .await
                .unwrap();
            for i in 0..30 {
                sqlx::query("INSERT INTO readings VALUES (?, ?, ?, NULL)")
                    .bind(i)
                    .bind(format!("unit-{}", i))
                    .bind(i as f64 + 0.5)
                    .execute(pool)
                    .await
                    .unwrap();
            }
        }
        db.close().await;
        url
    }

    #[tokio::test]
    async fn rows_are_capped_and_rendered() {
        let tmp = tempfile::tempdir().unwrap();
        let url = seeded_db(tmp.path()).await;

        let out = run_read_only(&url, "SELECT id, name, value, note FROM readings ORDER BY id", 20)
            .await
            .unwrap();
        assert_eq!(out.columns, vec!["id", "name", "value", "note"]);
        assert_eq!(out.rows.len(), 20);
        assert_eq!(out.rows[1], vec!["1", "unit-1", "1.5", "NULL"]);
    }

    #[tokio::test]
    async fn empty_result_keeps_columns() {
        let tmp = tempfile::tempdir().unwrap();
        let url = seeded_db(tmp.path()).await;
        let out = run_read_only(&url, "SELECT name FROM readings WHERE id < 0", 20)
            .await
            .unwrap();
        assert_eq!(out.render(), "Columns: name\n(no rows)");
    }

    #[tokio::test]
    async fn writes_are_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let url = seeded_db(tmp.path()).await;
        assert!(run_read_only(&url, "DELETE FROM readings", 20).await.is_err());
        // Even a write disguised behind WITH fails on the read-only connection
        assert!(run_read_only(
            &url,
            "WITH x AS (SELECT 1) INSERT INTO readings SELECT 1, 'x', 1.0, NULL FROM x",
            20
        )
        .await
        .is_err());
    }

    #[tokio::test]
    async fn literal_with_semicolon_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let url = seeded_db(tmp.path()).await;
        let out = run_read_only(&url, "SELECT 'a;b' AS v", 20).await.unwrap();
        assert_eq!(out.rows, vec![vec!["a;b".to_string()]]);
    }

    #[tokio::test]
    async fn bad_sql_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let url = seeded_db(tmp.path()).await;
        assert!(run_read_only(&url, "SELECT nope FROM missing_table", 20)
            .await
            .is_err());
    }
}
