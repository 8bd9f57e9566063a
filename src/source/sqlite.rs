//! SQLite source adapter.
//!
//! Structure comes from the table-valued pragma functions
//! (`pragma_table_info`, `pragma_foreign_key_list`, `pragma_index_list`).
//! SQLite keeps no row statistics, so row counts are a bounded `COUNT(*)`.

use async_trait::async_trait;
use schemadoc_core::models::{ColumnMeta, ForeignKey, TableMeta};
use schemadoc_core::quality::ColumnStats;
use schemadoc_core::types::{DataType, Dialect};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::time::Duration;

use super::{
    column_meta, introspection_error, quote_double, stats_projection, to_u64, with_timeout,
    AdapterSettings, ConnectionParams, SourceAdapter,
};
use crate::error::{ConnectionFailure, SourceError};

pub struct SqliteAdapter {
    pool: SqlitePool,
    database: String,
    settings: AdapterSettings,
}

impl SqliteAdapter {
    pub async fn connect(
        params: &ConnectionParams,
        settings: AdapterSettings,
    ) -> Result<Self, SourceError> {
        let path = params.path.as_ref().ok_or_else(|| {
            SourceError::connection(
                ConnectionFailure::Unsupported,
                format!("connection '{}' has no path", params.id),
            )
        })?;
        if !path.exists() {
            return Err(SourceError::connection(
                ConnectionFailure::Network,
                format!("database file not found: {}", path.display()),
            ));
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .create_if_missing(false);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(SourceError::from_connect)?;

        let database = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| params.id.clone());

        Ok(Self {
            pool,
            database,
            settings,
        })
    }

    async fn primary_key_of(&self, table: &str) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query("SELECT name, pk FROM pragma_table_info(?) WHERE pk > 0 ORDER BY pk")
            .bind(table)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| r.try_get::<String, _>("name")).collect()
    }

    async fn count_rows(&self, table: &str) -> Option<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_double(table));
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
impl SourceAdapter for SqliteAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn server_version(&self) -> Result<String, SourceError> {
        let v: String = sqlx::query_scalar("SELECT sqlite_version()")
            .fetch_one(&self.pool)
            .await?;
        Ok(format!("SQLite {}", v))
    }

    async fn list_tables(&self) -> Result<Vec<String>, SourceError> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn describe_table(&self, name: &str) -> Result<TableMeta, SourceError> {
        let rows = sqlx::query(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| introspection_error(name, e))?;

        if rows.is_empty() {
            return Err(introspection_error(name, "table has no columns or does not exist"));
        }

        let mut columns = Vec::with_capacity(rows.len());
        let mut pk: Vec<(i64, String)> = Vec::new();
        for row in &rows {
            let col_name: String = row.try_get("name").map_err(|e| introspection_error(name, e))?;
            let declared: String = row
                .try_get::<Option<String>, _>("type")
                .map_err(|e| introspection_error(name, e))?
                .unwrap_or_default();
            let notnull: i64 = row.try_get("notnull").map_err(|e| introspection_error(name, e))?;
            let default: Option<String> = row
                .try_get("dflt_value")
                .map_err(|e| introspection_error(name, e))?;
            let pk_pos: i64 = row.try_get("pk").map_err(|e| introspection_error(name, e))?;
            if pk_pos > 0 {
                pk.push((pk_pos, col_name.clone()));
            }
            columns.push(column_meta(col_name, declared, notnull == 0, default));
        }
        pk.sort();
        let primary_key: Vec<String> = pk.into_iter().map(|(_, c)| c).collect();

        let fk_rows = sqlx::query(
            "SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?) ORDER BY id, seq",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| introspection_error(name, e))?;

        let mut foreign_keys = Vec::with_capacity(fk_rows.len());
        for row in &fk_rows {
            let column: String = row.try_get("from").map_err(|e| introspection_error(name, e))?;
            let referenced_table: String =
                row.try_get("table").map_err(|e| introspection_error(name, e))?;
            let to: Option<String> = row.try_get("to").map_err(|e| introspection_error(name, e))?;
            // A bare REFERENCES t targets t's primary key.
            let referenced_column = match to {
                Some(c) => c,
                None => self
                    .primary_key_of(&referenced_table)
                    .await
                    .ok()
                    .and_then(|pk| pk.into_iter().next())
                    .unwrap_or_else(|| "rowid".to_string()),
            };
            foreign_keys.push(ForeignKey {
                column,
                referenced_table,
                referenced_column,
                dangling: false,
            });
        }

        let indexes = if self.settings.include_indexes {
            sqlx::query_scalar::<_, String>("SELECT name FROM pragma_index_list(?) ORDER BY name")
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
        let (distinct, min, max) = stats_projection(column, |e| format!("CAST({} AS TEXT)", e));
        let source = match limit {
            Some(n) => format!(
                "SELECT {} AS c FROM {} ORDER BY random() LIMIT {}",
                quote_double(&column.name),
                quote_double(&table.name),
                n
            ),
            None => format!(
                "SELECT {} AS c FROM {}",
                quote_double(&column.name),
                quote_double(&table.name)
            ),
        };
        let sql = format!(
            "SELECT COUNT(*) AS sampled, COUNT(*) - COUNT(c) AS nulls, {} AS distinct_count, \
             {} AS min_value, {} AS max_value FROM ({}) AS s",
            distinct, min, max, source
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
            "SELECT CAST(MAX({}) AS TEXT) FROM {}",
            quote_double(&column.name),
            quote_double(&table.name)
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
            .map(|c| format!("'{}', {}", c.name.replace('\'', "''"), quote_double(&c.name)))
            .collect();
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT json_object({}) FROM {} LIMIT {}",
            pairs.join(", "),
            quote_double(&table.name),
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
