//! Source adapters.
//!
//! A [`SourceAdapter`] is a read-only view of one source database. Each
//! dialect has its own implementation ([`postgres`], [`mysql`], [`sqlite`],
//! [`sqlserver`]);
//! [`connect`] picks one from the connection's declared dialect and everything
//! downstream depends only on the trait.
//!
//! Every adapter opens its session read-only (`SET SESSION ... READ ONLY` for
//! PostgreSQL and MySQL, `ApplicationIntent=ReadOnly` for SQL Server,
//! `mode=ro` for SQLite) and only ever issues `SELECT` statements and catalog
//! reads.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`list_tables`](SourceAdapter::list_tables) | Base tables in catalog order |
//! | [`describe_table`](SourceAdapter::describe_table) | Columns, keys, indexes, row count |
//! | [`sample_column_stats`](SourceAdapter::sample_column_stats) | Null/distinct/min/max over a bounded sample |
//! | [`latest_value`](SourceAdapter::latest_value) | Full-table `MAX()` of one column, for freshness |
//! | [`sample_rows`](SourceAdapter::sample_rows) | A few rows as JSON, for prompts |
//! | [`server_version`](SourceAdapter::server_version) | Version string for connection checks |

pub mod mysql;
pub mod postgres;
pub mod sqlite;
pub mod sqlserver;

use async_trait::async_trait;
use schemadoc_core::models::{ColumnMeta, TableMeta};
use schemadoc_core::quality::ColumnStats;
use schemadoc_core::types::{DataType, Dialect};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{Config, ConnectionConfig, ExtractionConfig};
use crate::error::{ConnectionFailure, SourceError};

/// Resolved connection parameters, password included.
#[derive(Clone)]
pub struct ConnectionParams {
    pub id: String,
    pub dialect: Dialect,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub schema: Option<String>,
    pub path: Option<PathBuf>,
    pub trust_server_certificate: bool,
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("id", &self.id)
            .field("dialect", &self.dialect)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("schema", &self.schema)
            .field("path", &self.path)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .finish()
    }
}

/// Looks up connections by id. Stands in for the connection management layer.
pub trait ConnectionResolver: Send + Sync {
    fn resolve(&self, id: &str) -> Option<ConnectionParams>;
    fn ids(&self) -> Vec<String>;
}

/// Resolves `[connections.<id>]` tables from the config file, reading
/// passwords from the environment variable each one names.
pub struct ConfigResolver {
    connections: BTreeMap<String, ConnectionConfig>,
}

impl ConfigResolver {
    pub fn new(config: &Config) -> Self {
        Self {
            connections: config.connections.clone(),
        }
    }
}

impl ConnectionResolver for ConfigResolver {
    fn resolve(&self, id: &str) -> Option<ConnectionParams> {
        let conn = self.connections.get(id)?;
        let dialect = conn.dialect.parse().ok()?;
        let password = conn
            .password_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok());
        Some(ConnectionParams {
            id: id.to_string(),
            dialect,
            host: conn.host.clone(),
            port: conn.port,
            database: conn.database.clone(),
            username: conn.username.clone(),
            password,
            schema: conn.schema.clone(),
            path: conn.path.clone(),
            trust_server_certificate: conn.trust_server_certificate,
        })
    }

    fn ids(&self) -> Vec<String> {
        self.connections.keys().cloned().collect()
    }
}

/// Introspection tuning shared by all adapters.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    /// Ceiling for a `COUNT(*)` fallback.
    pub count_timeout: Duration,
    pub include_indexes: bool,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self::from(&ExtractionConfig::default())
    }
}

impl From<&ExtractionConfig> for AdapterSettings {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            count_timeout: Duration::from_secs(config.count_timeout_secs),
            include_indexes: config.include_indexes,
        }
    }
}

/// Read-only capability set over one source database.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Logical database name (Postgres/MySQL database, SQLite file stem).
    fn database_name(&self) -> &str;

    async fn server_version(&self) -> Result<String, SourceError>;

    async fn list_tables(&self) -> Result<Vec<String>, SourceError>;

    /// Full structure of one table. The row count comes from catalog
    /// statistics when available, else a bounded `COUNT(*)`, else `None`.
    async fn describe_table(&self, name: &str) -> Result<TableMeta, SourceError>;

    /// Aggregate stats for one column. `limit` bounds the rows read; `None`
    /// scans the whole table.
    async fn sample_column_stats(
        &self,
        table: &TableMeta,
        column: &ColumnMeta,
        limit: Option<u64>,
    ) -> Result<ColumnStats, SourceError>;

    /// `MAX(column)` over the whole table, as text. `None` when every value
    /// is null.
    async fn latest_value(
        &self,
        table: &TableMeta,
        column: &ColumnMeta,
    ) -> Result<Option<String>, SourceError>;

    /// Up to `limit` rows as JSON objects. Binary columns are omitted.
    async fn sample_rows(
        &self,
        table: &TableMeta,
        limit: u32,
    ) -> Result<Vec<serde_json::Value>, SourceError>;

    async fn close(&self);
}

/// Open a read-only session for `params`.
pub async fn connect(
    params: &ConnectionParams,
    settings: &AdapterSettings,
) -> Result<Box<dyn SourceAdapter>, SourceError> {
    match params.dialect {
        Dialect::Postgres => Ok(Box::new(
            postgres::PostgresAdapter::connect(params, settings.clone()).await?,
        )),
        Dialect::Mysql => Ok(Box::new(
            mysql::MySqlAdapter::connect(params, settings.clone()).await?,
        )),
        Dialect::Sqlite => Ok(Box::new(
            sqlite::SqliteAdapter::connect(params, settings.clone()).await?,
        )),
        Dialect::SqlServer => Ok(Box::new(
            sqlserver::SqlServerAdapter::connect(params, settings.clone()).await?,
        )),
    }
}

/// Result of a connection check.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionCheck {
    pub success: bool,
    pub message: String,
    pub server_version: Option<String>,
    pub table_count: Option<usize>,
}

/// Connect, read the server version, count tables. Never fails: errors
/// become `success = false`.
pub async fn test_connection(params: &ConnectionParams, settings: &AdapterSettings) -> ConnectionCheck {
    let adapter = match connect(params, settings).await {
        Ok(a) => a,
        Err(e) => {
            return ConnectionCheck {
                success: false,
                message: e.to_string(),
                server_version: None,
                table_count: None,
            }
        }
    };

    let version = adapter.server_version().await;
    let tables = adapter.list_tables().await;
    adapter.close().await;

    match (version, tables) {
        (Ok(v), Ok(t)) => ConnectionCheck {
            success: true,
            message: format!("Connected to {} ({} tables)", params.id, t.len()),
            server_version: Some(v),
            table_count: Some(t.len()),
        },
        (Err(e), _) | (_, Err(e)) => ConnectionCheck {
            success: false,
            message: e.to_string(),
            server_version: None,
            table_count: None,
        },
    }
}

pub(crate) fn required<'a>(
    value: &'a Option<String>,
    what: &str,
    params: &ConnectionParams,
) -> Result<&'a str, SourceError> {
    value.as_deref().ok_or_else(|| {
        SourceError::connection(
            ConnectionFailure::Unsupported,
            format!("connection '{}' has no {}", params.id, what),
        )
    })
}

/// Double-quote an identifier (Postgres, SQLite).
pub(crate) fn quote_double(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Backtick-quote an identifier (MySQL).
pub(crate) fn quote_backtick(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Bracket-quote an identifier (SQL Server).
pub(crate) fn quote_bracket(ident: &str) -> String {
    format!("[{}]", ident.replace(']', "]]"))
}

pub(crate) fn column_meta(
    name: String,
    declared: String,
    nullable: bool,
    default: Option<String>,
) -> ColumnMeta {
    ColumnMeta {
        data_type: DataType::normalize(&declared),
        name,
        declared_type: declared,
        nullable,
        default,
    }
}

/// Expressions for the aggregate probe over an aliased sample column `c`.
///
/// Returns `(distinct_expr, min_expr, max_expr)`; each is `NULL` when the
/// type does not support it portably. `text_cast` wraps a value in the
/// dialect's cast-to-text.
pub(crate) fn stats_projection(
    column: &ColumnMeta,
    text_cast: impl Fn(&str) -> String,
) -> (String, String, String) {
    let distinct = if column.data_type.is_distinct_countable() {
        "COUNT(DISTINCT c)".to_string()
    } else {
        "NULL".to_string()
    };
    let (min, max) = if column.data_type.is_orderable() {
        (text_cast("MIN(c)"), text_cast("MAX(c)"))
    } else {
        ("NULL".to_string(), "NULL".to_string())
    };
    (distinct, min, max)
}

/// Sampling fraction (percent) that should yield roughly `limit` rows.
///
/// Over-samples by 2x so the `LIMIT` rather than the fraction usually
/// decides the sample size.
pub(crate) fn sample_percent(limit: u64, row_count: Option<u64>) -> Option<f64> {
    let rows = row_count.filter(|n| *n > 0)?;
    let pct = (limit as f64 / rows as f64) * 200.0;
    if pct >= 100.0 {
        None
    } else {
        Some(pct.max(0.01))
    }
}

pub(crate) async fn with_timeout<T, F>(budget: Duration, fut: F) -> Option<Result<T, sqlx::Error>>
where
    F: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    tokio::time::timeout(budget, fut).await.ok()
}

pub(crate) fn introspection_error(table: &str, err: impl std::fmt::Display) -> SourceError {
    SourceError::Introspection {
        table: table.to_string(),
        message: err.to_string(),
    }
}

pub(crate) fn to_u64(n: i64) -> u64 {
    n.max(0) as u64
}
