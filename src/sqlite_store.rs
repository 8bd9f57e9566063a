//! SQLite-backed [`DictionaryStore`].
//!
//! Each dictionary is one row of the `dictionaries` table: the summary
//! fields as columns for listing, and the full dictionary as JSON in `body`.
//! Rows are inserted once and never updated.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Row, SqlitePool};

use schemadoc_core::models::{Dictionary, DictionarySummary};
use schemadoc_core::store::DictionaryStore;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid generated_at: {}", raw))?
        .with_timezone(&Utc))
}

#[async_trait]
impl DictionaryStore for SqliteStore {
    async fn save(&self, dictionary: &Dictionary) -> Result<String> {
        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM dictionaries WHERE id = ?")
            .bind(&dictionary.id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_some() {
            bail!("dictionary {} already exists", dictionary.id);
        }

        let body = serde_json::to_string(dictionary)?;
        sqlx::query(
            r#"
            INSERT INTO dictionaries (id, connection_id, database_name, dialect, generated_at,
                                      total_tables, total_columns, partial, fingerprint, body)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&dictionary.id)
        .bind(&dictionary.connection_id)
        .bind(&dictionary.database_name)
        .bind(dictionary.dialect.to_string())
        .bind(format_ts(&dictionary.generated_at))
        .bind(dictionary.total_tables as i64)
        .bind(dictionary.total_columns as i64)
        .bind(dictionary.report.partial)
        .bind(&dictionary.fingerprint)
        .bind(&body)
        .execute(&self.pool)
        .await?;

        Ok(dictionary.id.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<Dictionary>> {
        let body: Option<String> = sqlx::query_scalar("SELECT body FROM dictionaries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match body {
            Some(b) => Ok(Some(
                serde_json::from_str(&b).with_context(|| format!("corrupt dictionary {}", id))?,
            )),
            None => Ok(None),
        }
    }

    async fn list(&self, connection_id: Option<&str>) -> Result<Vec<DictionarySummary>> {
        let rows = sqlx::query(
            r#"
            SELECT id, connection_id, database_name, dialect, generated_at,
                   total_tables, total_columns, partial
            FROM dictionaries
            WHERE ? IS NULL OR connection_id = ?
            ORDER BY generated_at DESC, id ASC
            "#,
        )
        .bind(connection_id)
        .bind(connection_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let dialect: String = row.get("dialect");
            let generated_at: String = row.get("generated_at");
            let total_tables: i64 = row.get("total_tables");
            let total_columns: i64 = row.get("total_columns");
            out.push(DictionarySummary {
                id: row.get("id"),
                connection_id: row.get("connection_id"),
                database_name: row.get("database_name"),
                dialect: dialect.parse().map_err(|e: String| anyhow::anyhow!(e))?,
                total_tables: total_tables.max(0) as usize,
                total_columns: total_columns.max(0) as usize,
                generated_at: parse_ts(&generated_at)?,
                partial: row.get("partial"),
            });
        }
        Ok(out)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM dictionaries WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dictionaries")
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as usize)
    }
}
