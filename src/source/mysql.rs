//! MySQL / MariaDB source adapter.
//!
//! Structure comes from `information_schema`. MySQL reports many catalog
//! columns with binary collations, so text columns are wrapped in
//! `CAST(... AS CHAR)` to decode as `String`. Row counts use the
//! `TABLE_ROWS` estimate, falling back to a bounded `COUNT(*)`.

use async_trait::async_trait;
use schemadoc_core::models::{ColumnMeta, ForeignKey, TableMeta};
use schemadoc_core::quality::ColumnStats;
use schemadoc_core::types::{DataType, Dialect};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::{Executor, Row};
use std::time::Duration;

use super::{
    column_meta, introspection_error, quote_backtick, required, sample_percent, stats_projection,
    to_u64, with_timeout, AdapterSettings, ConnectionParams, SourceAdapter,
};
use crate::error::SourceError;

const DEFAULT_PORT: u16 = 3306;

pub struct MySqlAdapter {
    pool: MySqlPool,
    database: String,
    settings: AdapterSettings,
}

impl MySqlAdapter {
    pub async fn connect(
        params: &ConnectionParams,
        settings: AdapterSettings,
    ) -> Result<Self, SourceError> {
        let host = required(&params.host, "host", params)?;
        // `schema` overrides `database` for the introspected catalog
        let database = params
            .schema
            .clone()
            .or_else(|| params.database.clone())
            .unwrap_or_default();
        let connect_db = required(&params.database, "database", params)?;

        let mut options = MySqlConnectOptions::new()
            .host(host)
            .port(params.port.unwrap_or(DEFAULT_PORT))
            .database(connect_db);
        if let Some(user) = &params.username {
            options = options.username(user);
        }
        if let Some(password) = &params.password {
            options = options.password(password);
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    conn.execute("SET SESSION TRANSACTION READ ONLY").await?;
                    Ok(())
                })
            })
            .connect_with(options)
            .await
            .map_err(SourceError::from_connect)?;

        Ok(Self {
            pool,
            database,
            settings,
        })
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote_backtick(&self.database), quote_backtick(table))
    }

    async fn count_rows(&self, table: &str) -> Option<u64> {
        let estimate: Option<i64> = sqlx::query_scalar(
            "SELECT CAST(TABLE_ROWS AS SIGNED) FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?",
        )
        .bind(&self.database)
        .bind(table)
        .fetch_optional(&self.pool)
        .await
        .ok()
        .flatten();

        if let Some(n) = estimate.filter(|n| *n > 0) {
            return Some(to_u64(n));
        }

        let sql = format!("SELECT COUNT(*) FROM {}", self.qualified(table));
        let fut = sqlx::query_scalar::<_, i64>(&sql).fetch_one(&self.pool);
        match with_timeout(self.settings.count_timeout, fut).await {
            Some(Ok(n)) => Some(to_u64(n)),
            Some(Err(e)) => {
                tracing::warn!(table, error = %e, "row count failed");
                None
            }
            None => {
                tracing::warn!(table, "row count timed out");
                None
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for MySqlAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn server_version(&self) -> Result<String, SourceError> {
        Ok(sqlx::query_scalar("SELECT CAST(VERSION() AS CHAR)")
            .fetch_one(&self.pool)
            .await?)
    }

    async fn list_tables(&self) -> Result<Vec<String>, SourceError> {
        Ok(sqlx::query_scalar(
            "SELECT CAST(TABLE_NAME AS CHAR) FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE' \
             ORDER BY TABLE_NAME",
        )
        .bind(&self.database)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn describe_table(&self, name: &str) -> Result<TableMeta, SourceError> {
        let rows = sqlx::query(
            "SELECT CAST(COLUMN_NAME AS CHAR) AS name, CAST(COLUMN_TYPE AS CHAR) AS column_type, \
                    CAST(IS_NULLABLE AS CHAR) AS is_nullable, \
                    CAST(COLUMN_DEFAULT AS CHAR) AS column_default \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
             ORDER BY ORDINAL_POSITION",
        )
        .bind(&self.database)
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| introspection_error(name, e))?;

        if rows.is_empty() {
            return Err(introspection_error(name, "table has no columns or does not exist"));
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let col: String = row.try_get("name").map_err(|e| introspection_error(name, e))?;
            let declared: String = row
                .try_get("column_type")
                .map_err(|e| introspection_error(name, e))?;
            let nullable: String = row
                .try_get("is_nullable")
                .map_err(|e| introspection_error(name, e))?;
            let default: Option<String> = row
                .try_get("column_default")
                .map_err(|e| introspection_error(name, e))?;
            columns.push(column_meta(col, declared, nullable == "YES", default));
        }

        let primary_key: Vec<String> = sqlx::query_scalar(
            "SELECT CAST(COLUMN_NAME AS CHAR) FROM information_schema.KEY_COLUMN_USAGE \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY' \
             ORDER BY ORDINAL_POSITION",
        )
        .bind(&self.database)
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| introspection_error(name, e))?;

        let fk_rows = sqlx::query(
            "SELECT CAST(COLUMN_NAME AS CHAR) AS column_name, \
                    CAST(REFERENCED_TABLE_NAME AS CHAR) AS ref_table, \
                    CAST(REFERENCED_COLUMN_NAME AS CHAR) AS ref_column \
             FROM information_schema.KEY_COLUMN_USAGE \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND REFERENCED_TABLE_NAME IS NOT NULL \
             ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION",
        )
        .bind(&self.database)
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| introspection_error(name, e))?;

        let mut foreign_keys = Vec::with_capacity(fk_rows.len());
        for row in &fk_rows {
            foreign_keys.push(ForeignKey {
                column: row
                    .try_get("column_name")
                    .map_err(|e| introspection_error(name, e))?,
                referenced_table: row
                    .try_get("ref_table")
                    .map_err(|e| introspection_error(name, e))?,
                referenced_column: row
                    .try_get("ref_column")
                    .map_err(|e| introspection_error(name, e))?,
                dangling: false,
            });
        }

        let indexes = if self.settings.include_indexes {
            sqlx::query_scalar::<_, String>(
                "SELECT DISTINCT CAST(INDEX_NAME AS CHAR) FROM information_schema.STATISTICS \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? ORDER BY 1",
            )
            .bind(&self.database)
            .bind(name)
            .fetch_all(&self.pool)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(table = name, error = %e, "index discovery failed");
                Vec::new()
            })
        } else {
            Vec::new()
        };

        Ok(TableMeta {
            name: name.to_string(),
            columns,
            primary_key,
            foreign_keys,
            indexes,
            row_count: self.count_rows(name).await,
        })
    }

    async fn sample_column_stats(
        &self,
        table: &TableMeta,
        column: &ColumnMeta,
        limit: Option<u64>,
    ) -> Result<ColumnStats, SourceError> {
        let (distinct, min, max) = stats_projection(column, |e| format!("CAST({} AS CHAR)", e));
        let from = self.qualified(&table.name);
        let col = quote_backtick(&column.name);
        let source = match limit {
            Some(n) => match sample_percent(n, table.row_count) {
                Some(pct) => format!(
                    "SELECT {} AS c FROM {} WHERE RAND() < {:.6} LIMIT {}",
                    col,
                    from,
                    pct / 100.0,
                    n
                ),
                None => format!("SELECT {} AS c FROM {} LIMIT {}", col, from, n),
            },
            None => format!("SELECT {} AS c FROM {}", col, from),
        };
        let sql = format!(
            "SELECT CAST(COUNT(*) AS SIGNED) AS sampled, \
                    CAST(COUNT(*) - COUNT(c) AS SIGNED) AS nulls, \
                    CAST({} AS SIGNED) AS distinct_count, {} AS min_value, {} AS max_value \
             FROM ({}) AS s",
            distinct,
            if min == "NULL" { "CAST(NULL AS CHAR)".to_string() } else { min },
            if max == "NULL" { "CAST(NULL AS CHAR)".to_string() } else { max },
            source
        );

        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        Ok(ColumnStats {
            sampled_rows: to_u64(row.try_get("sampled")?),
            null_count: to_u64(row.try_get("nulls")?),
            distinct_count: row
                .try_get::<Option<i64>, _>("distinct_count")?
                .map(to_u64),
            min_value: row.try_get("min_value")?,
            max_value: row.try_get("max_value")?,
        })
    }

    async fn latest_value(
        &self,
        table: &TableMeta,
        column: &ColumnMeta,
    ) -> Result<Option<String>, SourceError> {
        let sql = format!(
            "SELECT CAST(MAX({}) AS CHAR) FROM {}",
            quote_backtick(&column.name),
            self.qualified(&table.name)
        );
        Ok(sqlx::query_scalar(&sql).fetch_one(&self.pool).await?)
    }

    async fn sample_rows(
        &self,
        table: &TableMeta,
        limit: u32,
    ) -> Result<Vec<serde_json::Value>, SourceError> {
        let pairs: Vec<String> = table
            .columns
            .iter()
            .filter(|c| c.data_type != DataType::Binary)
            .map(|c| format!("'{}', {}", c.name.replace('\'', "''"), quote_backtick(&c.name)))
            .collect();
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT CAST(JSON_OBJECT({}) AS CHAR) FROM {} LIMIT {}",
            pairs.join(", "),
            self.qualified(&table.name),
            limit
        );
        let rows: Vec<String> = sqlx::query_scalar(&sql).fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .filter_map(|r| serde_json::from_str(r).ok())
            .collect())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
