//! PostgreSQL source adapter.
//!
//! Columns and primary keys come from `information_schema`; foreign keys and
//! row estimates come from `pg_catalog` (`pg_constraint`, `pg_class.reltuples`)
//! because the standard views cannot pair composite key columns reliably.
//! Catalog text columns are cast to `text` so they decode as `String`
//! regardless of the `name`/`sql_identifier` domain.

use async_trait::async_trait;
use schemadoc_core::models::{ColumnMeta, ForeignKey, TableMeta};
use schemadoc_core::quality::ColumnStats;
use schemadoc_core::types::{DataType, Dialect};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Executor, Row};
use std::time::Duration;

use super::{
    column_meta, introspection_error, quote_double, required, sample_percent, stats_projection,
    to_u64, with_timeout, AdapterSettings, ConnectionParams, SourceAdapter,
};
use crate::error::SourceError;

const DEFAULT_PORT: u16 = 5432;

pub struct PostgresAdapter {
    pool: PgPool,
    database: String,
    schema: String,
    settings: AdapterSettings,
}

impl PostgresAdapter {
    pub async fn connect(
        params: &ConnectionParams,
        settings: AdapterSettings,
    ) -> Result<Self, SourceError> {
        let host = required(&params.host, "host", params)?;
        let database = required(&params.database, "database", params)?.to_string();

        let mut options = PgConnectOptions::new()
            .host(host)
            .port(params.port.unwrap_or(DEFAULT_PORT))
            .database(&database)
            .application_name("schemadoc");
        if let Some(user) = &params.username {
            options = options.username(user);
        }
        if let Some(password) = &params.password {
            options = options.password(password);
        }

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    conn.execute("SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY")
                        .await?;
                    Ok(())
                })
            })
            .connect_with(options)
            .await
            .map_err(SourceError::from_connect)?;

        Ok(Self {
            pool,
            database,
            schema: params.schema.clone().unwrap_or_else(|| "public".to_string()),
            settings,
        })
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote_double(&self.schema), quote_double(table))
    }

    async fn count_rows(&self, table: &str) -> Option<u64> {
        let estimate: Option<f32> = sqlx::query_scalar(
            "SELECT c.reltuples FROM pg_class c \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE n.nspname = $1 AND c.relname = $2",
        )
        .bind(&self.schema)
        .bind(table)
        .fetch_optional(&self.pool)
        .await
        .ok()
        .flatten();

        // reltuples is -1 (never analyzed) or 0 (possibly stale) without stats
        if let Some(n) = estimate.filter(|n| *n > 0.0) {
            return Some(n.round() as u64);
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
impl SourceAdapter for PostgresAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn server_version(&self) -> Result<String, SourceError> {
        Ok(sqlx::query_scalar("SELECT version()")
            .fetch_one(&self.pool)
            .await?)
    }

    async fn list_tables(&self) -> Result<Vec<String>, SourceError> {
        Ok(sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = $1 AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
        )
        .bind(&self.schema)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn describe_table(&self, name: &str) -> Result<TableMeta, SourceError> {
        let rows = sqlx::query(
            "SELECT column_name::text AS name, data_type::text AS data_type, \
                    udt_name::text AS udt_name, is_nullable::text AS is_nullable, \
                    column_default::text AS column_default \
             FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 \
             ORDER BY ordinal_position",
        )
        .bind(&self.schema)
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
            let data_type: String = row
                .try_get("data_type")
                .map_err(|e| introspection_error(name, e))?;
            let udt: String = row
                .try_get("udt_name")
                .map_err(|e| introspection_error(name, e))?;
            let nullable: String = row
                .try_get("is_nullable")
                .map_err(|e| introspection_error(name, e))?;
            let default: Option<String> = row
                .try_get("column_default")
                .map_err(|e| introspection_error(name, e))?;
            let declared = if data_type == "USER-DEFINED" { udt } else { data_type };
            columns.push(column_meta(col, declared, nullable == "YES", default));
        }

        let primary_key: Vec<String> = sqlx::query_scalar(
            "SELECT kcu.column_name::text \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name \
              AND tc.table_schema = kcu.table_schema \
              AND tc.table_name = kcu.table_name \
             WHERE tc.constraint_type = 'PRIMARY KEY' \
               AND tc.table_schema = $1 AND tc.table_name = $2 \
             ORDER BY kcu.ordinal_position",
        )
        .bind(&self.schema)
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| introspection_error(name, e))?;

        let fk_rows = sqlx::query(
            "SELECT a.attname::text AS column_name, cf.relname::text AS ref_table, \
                    af.attname::text AS ref_column \
             FROM pg_constraint con \
             JOIN pg_class c ON c.oid = con.conrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             JOIN pg_class cf ON cf.oid = con.confrelid \
             CROSS JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(attnum, fattnum, ord) \
             JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum \
             JOIN pg_attribute af ON af.attrelid = con.confrelid AND af.attnum = k.fattnum \
             WHERE con.contype = 'f' AND n.nspname = $1 AND c.relname = $2 \
             ORDER BY con.conname, k.ord",
        )
        .bind(&self.schema)
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
                "SELECT indexname::text FROM pg_indexes \
                 WHERE schemaname = $1 AND tablename = $2 ORDER BY indexname",
            )
            .bind(&self.schema)
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
        let (distinct, min, max) = stats_projection(column, |e| format!("({})::text", e));
        let from = self.qualified(&table.name);
        let source = match limit {
            Some(n) => match sample_percent(n, table.row_count) {
                Some(pct) => format!(
                    "SELECT {} AS c FROM {} TABLESAMPLE BERNOULLI ({:.4}) LIMIT {}",
                    quote_double(&column.name),
                    from,
                    pct,
                    n
                ),
                None => format!(
                    "SELECT {} AS c FROM {} LIMIT {}",
                    quote_double(&column.name),
                    from,
                    n
                ),
            },
            None => format!("SELECT {} AS c FROM {}", quote_double(&column.name), from),
        };
        let sql = format!(
            "SELECT COUNT(*) AS sampled, COUNT(*) - COUNT(c) AS nulls, \
             ({})::bigint AS distinct_count, {} AS min_value, {} AS max_value FROM ({}) AS s",
            distinct,
            if min == "NULL" { "NULL::text".to_string() } else { min },
            if max == "NULL" { "NULL::text".to_string() } else { max },
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
            "SELECT (MAX({}))::text FROM {}",
            quote_double(&column.name),
            self.qualified(&table.name)
        );
        Ok(sqlx::query_scalar(&sql).fetch_one(&self.pool).await?)
    }

    async fn sample_rows(
        &self,
        table: &TableMeta,
        limit: u32,
    ) -> Result<Vec<serde_json::Value>, SourceError> {
        let sql = format!(
            "SELECT row_to_json(t)::text FROM (SELECT * FROM {} LIMIT {}) t",
            self.qualified(&table.name),
            limit
        );
        let rows: Vec<String> = sqlx::query_scalar(&sql).fetch_all(&self.pool).await?;
        let binary: Vec<&str> = table
            .columns
            .iter()
            .filter(|c| c.data_type == DataType::Binary)
            .map(|c| c.name.as_str())
            .collect();
        Ok(rows
            .iter()
            .filter_map(|r| serde_json::from_str::<serde_json::Value>(r).ok())
            .map(|mut v| {
                if let Some(obj) = v.as_object_mut() {
                    for col in &binary {
                        obj.remove(*col);
                    }
                }
                v
            })
            .collect())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
