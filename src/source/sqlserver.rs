//! Microsoft SQL Server source adapter.
//!
//! Talks TDS through `tiberius` over a tokio socket. Columns and primary keys
//! come from `INFORMATION_SCHEMA`; foreign keys, indexes and row counts come
//! from the `sys` catalog views (`sys.foreign_key_columns`, `sys.indexes`,
//! `sys.partitions`). The session is opened with `ApplicationIntent=ReadOnly`.
//!
//! One TDS session serves every call. A call abandoned mid-response (the
//! analyzer's per-column timeout drops the future) leaves the session in an
//! unknown state, so the next call reopens it first.

use async_trait::async_trait;
use schemadoc_core::models::{ColumnMeta, ForeignKey, TableMeta};
use schemadoc_core::quality::ColumnStats;
use schemadoc_core::types::{DataType, Dialect};
use std::sync::atomic::{AtomicBool, Ordering};
use tiberius::{AuthMethod, Client, Config, Row, ToSql};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use super::{
    column_meta, introspection_error, quote_bracket, required, sample_percent, stats_projection,
    to_u64, AdapterSettings, ConnectionParams, SourceAdapter,
};
use crate::error::{ConnectionFailure, SourceError};

const DEFAULT_PORT: u16 = 1433;
const DEFAULT_SCHEMA: &str = "dbo";

type Session = Client<Compat<TcpStream>>;

pub struct SqlServerAdapter {
    config: Config,
    session: Mutex<Option<Session>>,
    /// Set while a response is being read. Still set at the start of a call
    /// when the previous reader never finished.
    reading: AtomicBool,
    database: String,
    schema: String,
    settings: AdapterSettings,
}

async fn open(config: &Config) -> Result<Session, SourceError> {
    let tcp = TcpStream::connect(config.get_addr())
        .await
        .map_err(|e| SourceError::connection(ConnectionFailure::Network, e.to_string()))?;
    tcp.set_nodelay(true)
        .map_err(|e| SourceError::connection(ConnectionFailure::Network, e.to_string()))?;
    Client::connect(config.clone(), tcp.compat_write())
        .await
        .map_err(SourceError::from_tds_connect)
}

impl SqlServerAdapter {
    pub async fn connect(
        params: &ConnectionParams,
        settings: AdapterSettings,
    ) -> Result<Self, SourceError> {
        let host = required(&params.host, "host", params)?;
        let database = required(&params.database, "database", params)?.to_string();
        let username = required(&params.username, "username", params)?;

        let mut config = Config::new();
        config.host(host);
        config.port(params.port.unwrap_or(DEFAULT_PORT));
        config.database(&database);
        config.application_name("schemadoc");
        config.readonly(true);
        config.authentication(AuthMethod::sql_server(
            username,
            params.password.as_deref().unwrap_or_default(),
        ));
        if params.trust_server_certificate {
            config.trust_cert();
        }

        let session = open(&config).await?;
        Ok(Self {
            config,
            session: Mutex::new(Some(session)),
            reading: AtomicBool::new(false),
            database,
            schema: params
                .schema
                .clone()
                .unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
            settings,
        })
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote_bracket(&self.schema), quote_bracket(table))
    }

    /// Run one statement and collect its first result set.
    async fn fetch(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, SourceError> {
        let mut session = self.session.lock().await;
        if session.is_none() {
            return Err(SourceError::Query("session is closed".to_string()));
        }
        if self.reading.swap(true, Ordering::SeqCst) {
            tracing::debug!(database = %self.database, "reopening SQL Server session");
            *session = Some(open(&self.config).await?);
        }
        let client = session
            .as_mut()
            .ok_or_else(|| SourceError::Query("session is closed".to_string()))?;
        let rows = client.query(sql, params).await?.into_first_result().await?;
        self.reading.store(false, Ordering::SeqCst);
        Ok(rows)
    }

    async fn fetch_strings(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> Result<Vec<String>, SourceError> {
        let rows = self.fetch(sql, params).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(v) = first_text(row)? {
                out.push(v);
            }
        }
        Ok(out)
    }

    async fn count_rows(&self, table: &str) -> Option<u64> {
        let estimate = self
            .fetch(
                "SELECT CAST(SUM(p.rows) AS BIGINT) FROM sys.partitions p \
                 JOIN sys.tables t ON t.object_id = p.object_id \
                 JOIN sys.schemas s ON s.schema_id = t.schema_id \
                 WHERE s.name = @P1 AND t.name = @P2 AND p.index_id IN (0, 1)",
                &[&self.schema.as_str(), &table],
            )
            .await
            .ok()
            .and_then(|rows| rows.first().and_then(|r| r.try_get::<i64, _>(0usize).ok().flatten()));
        if let Some(n) = estimate {
            return Some(to_u64(n));
        }

        let sql = format!("SELECT COUNT_BIG(*) FROM {}", self.qualified(table));
        match tokio::time::timeout(self.settings.count_timeout, self.fetch(&sql, &[])).await {
            Ok(Ok(rows)) => rows
                .first()
                .and_then(|r| r.try_get::<i64, _>(0usize).ok().flatten())
                .map(to_u64),
            Ok(Err(e)) => {
                tracing::warn!(table, error = %e, "row count failed");
                None
            }
            Err(_) => {
                tracing::warn!(table, "row count timed out");
                None
            }
        }
    }
}

fn text(row: &Row, column: &str) -> Result<Option<String>, SourceError> {
    Ok(row.try_get::<&str, _>(column)?.map(str::to_string))
}

fn first_text(row: &Row) -> Result<Option<String>, SourceError> {
    Ok(row.try_get::<&str, _>(0usize)?.map(str::to_string))
}

/// `timestamp` in SQL Server is the row-version binary, not a point in time.
fn declared_type(data_type: &str) -> String {
    if data_type.eq_ignore_ascii_case("timestamp") {
        "rowversion".to_string()
    } else {
        data_type.to_string()
    }
}

/// Legacy LOB types reject `COUNT(DISTINCT)`, `MIN` and `MAX`.
fn is_legacy_lob(column: &ColumnMeta) -> bool {
    matches!(
        column.declared_type.to_ascii_lowercase().as_str(),
        "text" | "ntext" | "image"
    )
}

fn nvarchar(expr: &str) -> String {
    format!("CAST({} AS NVARCHAR(4000))", expr)
}

fn sample_source(column: &str, from: &str, limit: Option<u64>, row_count: Option<u64>) -> String {
    match limit {
        Some(n) => match sample_percent(n, row_count) {
            Some(pct) => format!(
                "SELECT TOP ({}) {} AS c FROM {} TABLESAMPLE ({:.4} PERCENT)",
                n, column, from, pct
            ),
            None => format!("SELECT TOP ({}) {} AS c FROM {}", n, column, from),
        },
        None => format!("SELECT {} AS c FROM {}", column, from),
    }
}

fn stats_sql(column: &ColumnMeta, source: &str) -> String {
    let (distinct, min, max) = if is_legacy_lob(column) {
        ("NULL".to_string(), "NULL".to_string(), "NULL".to_string())
    } else {
        stats_projection(column, nvarchar)
    };
    let null_text = || nvarchar("NULL");
    format!(
        "SELECT COUNT_BIG(*) AS sampled, COUNT_BIG(*) - COUNT_BIG(c) AS nulls, \
         CAST({} AS BIGINT) AS distinct_count, {} AS min_value, {} AS max_value FROM ({}) AS s",
        distinct,
        if min == "NULL" { null_text() } else { min },
        if max == "NULL" { null_text() } else { max },
        source
    )
}

/// `@@VERSION` spans several lines; the first names the product and build.
fn version_line(version: &str) -> String {
    version.lines().next().unwrap_or_default().trim().to_string()
}

#[async_trait]
impl SourceAdapter for SqlServerAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::SqlServer
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn server_version(&self) -> Result<String, SourceError> {
        let rows = self.fetch_strings("SELECT @@VERSION", &[]).await?;
        Ok(rows.first().map(|v| version_line(v)).unwrap_or_default())
    }

    async fn list_tables(&self) -> Result<Vec<String>, SourceError> {
        self.fetch_strings(
            "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_SCHEMA = @P1 AND TABLE_TYPE = 'BASE TABLE' \
             ORDER BY TABLE_NAME",
            &[&self.schema.as_str()],
        )
        .await
    }

    async fn describe_table(&self, name: &str) -> Result<TableMeta, SourceError> {
        let rows = self
            .fetch(
                "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE, COLUMN_DEFAULT \
                 FROM INFORMATION_SCHEMA.COLUMNS \
                 WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2 \
                 ORDER BY ORDINAL_POSITION",
                &[&self.schema.as_str(), &name],
            )
            .await
            .map_err(|e| introspection_error(name, e))?;

        if rows.is_empty() {
            return Err(introspection_error(name, "table has no columns or does not exist"));
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let col = text(row, "COLUMN_NAME")
                .map_err(|e| introspection_error(name, e))?
                .unwrap_or_default();
            let data_type = text(row, "DATA_TYPE")
                .map_err(|e| introspection_error(name, e))?
                .unwrap_or_default();
            let nullable = text(row, "IS_NULLABLE").map_err(|e| introspection_error(name, e))?;
            let default = text(row, "COLUMN_DEFAULT").map_err(|e| introspection_error(name, e))?;
            columns.push(column_meta(
                col,
                declared_type(&data_type),
                nullable.as_deref() == Some("YES"),
                default,
            ));
        }

        let primary_key = self
            .fetch_strings(
                "SELECT kcu.COLUMN_NAME \
                 FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
                 JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
                   ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME \
                  AND tc.TABLE_SCHEMA = kcu.TABLE_SCHEMA \
                  AND tc.TABLE_NAME = kcu.TABLE_NAME \
                 WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY' \
                   AND tc.TABLE_SCHEMA = @P1 AND tc.TABLE_NAME = @P2 \
                 ORDER BY kcu.ORDINAL_POSITION",
                &[&self.schema.as_str(), &name],
            )
            .await
            .map_err(|e| introspection_error(name, e))?;

        let fk_rows = self
            .fetch(
                "SELECT pc.name AS column_name, rt.name AS ref_table, rc.name AS ref_column \
                 FROM sys.foreign_key_columns fkc \
                 JOIN sys.foreign_keys fk ON fk.object_id = fkc.constraint_object_id \
                 JOIN sys.tables t ON t.object_id = fkc.parent_object_id \
                 JOIN sys.schemas s ON s.schema_id = t.schema_id \
                 JOIN sys.columns pc \
                   ON pc.object_id = fkc.parent_object_id AND pc.column_id = fkc.parent_column_id \
                 JOIN sys.tables rt ON rt.object_id = fkc.referenced_object_id \
                 JOIN sys.columns rc \
                   ON rc.object_id = fkc.referenced_object_id \
                  AND rc.column_id = fkc.referenced_column_id \
                 WHERE s.name = @P1 AND t.name = @P2 \
                 ORDER BY fk.name, fkc.constraint_column_id",
                &[&self.schema.as_str(), &name],
            )
            .await
            .map_err(|e| introspection_error(name, e))?;

        let mut foreign_keys = Vec::with_capacity(fk_rows.len());
        for row in &fk_rows {
            let field = |idx: &str| -> Result<String, SourceError> {
                Ok(text(row, idx)
                    .map_err(|e| introspection_error(name, e))?
                    .unwrap_or_default())
            };
            foreign_keys.push(ForeignKey {
                column: field("column_name")?,
                referenced_table: field("ref_table")?,
                referenced_column: field("ref_column")?,
                dangling: false,
            });
        }

        let indexes = if self.settings.include_indexes {
            self.fetch_strings(
                "SELECT i.name FROM sys.indexes i \
                 JOIN sys.tables t ON t.object_id = i.object_id \
                 JOIN sys.schemas s ON s.schema_id = t.schema_id \
                 WHERE s.name = @P1 AND t.name = @P2 AND i.name IS NOT NULL \
                 ORDER BY i.name",
                &[&self.schema.as_str(), &name],
            )
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
        let source = sample_source(
            &quote_bracket(&column.name),
            &self.qualified(&table.name),
            limit,
            table.row_count,
        );
        let rows = self.fetch(&stats_sql(column, &source), &[]).await?;
        let row = rows
            .first()
            .ok_or_else(|| SourceError::Query("aggregate returned no row".to_string()))?;
        Ok(ColumnStats {
            sampled_rows: to_u64(row.try_get::<i64, _>("sampled")?.unwrap_or(0)),
            null_count: to_u64(row.try_get::<i64, _>("nulls")?.unwrap_or(0)),
            distinct_count: row.try_get::<i64, _>("distinct_count")?.map(to_u64),
            min_value: text(row, "min_value")?,
            max_value: text(row, "max_value")?,
        })
    }

    async fn latest_value(
        &self,
        table: &TableMeta,
        column: &ColumnMeta,
    ) -> Result<Option<String>, SourceError> {
        let sql = format!(
            "SELECT {} FROM {}",
            nvarchar(&format!("MAX({})", quote_bracket(&column.name))),
            self.qualified(&table.name)
        );
        let rows = self.fetch(&sql, &[]).await?;
        match rows.first() {
            Some(row) => first_text(row),
            None => Ok(None),
        }
    }

    async fn sample_rows(
        &self,
        table: &TableMeta,
        limit: u32,
    ) -> Result<Vec<serde_json::Value>, SourceError> {
        let columns: Vec<String> = table
            .columns
            .iter()
            .filter(|c| c.data_type != DataType::Binary)
            .map(|c| quote_bracket(&c.name))
            .collect();
        if columns.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT TOP ({}) {} FROM {} FOR JSON PATH, INCLUDE_NULL_VALUES",
            limit,
            columns.join(", "),
            self.qualified(&table.name)
        );
        // FOR JSON splits long documents across rows
        let json = self.fetch_strings(&sql, &[]).await?.concat();
        if json.is_empty() {
            return Ok(Vec::new());
        }
        let parsed: serde_json::Value =
            serde_json::from_str(&json).map_err(|e| SourceError::Query(e.to_string()))?;
        match parsed {
            serde_json::Value::Array(rows) => Ok(rows),
            other => Ok(vec![other]),
        }
    }

    async fn close(&self) {
        if let Some(client) = self.session.lock().await.take() {
            if let Err(e) = client.close().await {
                tracing::debug!(error = %e, "SQL Server session close failed");
            }
        }
    }
}
