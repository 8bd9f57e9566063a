//! Error taxonomy.
//!
//! Internal plumbing uses `anyhow`. The enums here sit at the seams where a
//! caller has to branch on what went wrong: adapters ([`SourceError`]),
//! provider calls ([`GenerationError`]), whole runs ([`PipelineError`]) and
//! single chat queries ([`ChatError`]).
//!
//! Every variant has a machine category (`category()`) and a human message
//! (`Display`). The HTTP layer and the CLI surface both.

use thiserror::Error;

/// Why a source connection could not be established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionFailure {
    Authentication,
    Network,
    Unsupported,
}

impl ConnectionFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionFailure::Authentication => "authentication",
            ConnectionFailure::Network => "network",
            ConnectionFailure::Unsupported => "unsupported",
        }
    }
}

/// Failures raised by a source adapter.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Fatal to the run.
    #[error("connection failed ({}): {message}", .kind.as_str())]
    Connection {
        kind: ConnectionFailure,
        message: String,
    },

    /// One table could not be described; the table is skipped.
    #[error("could not describe table {table}: {message}")]
    Introspection { table: String, message: String },

    /// One column probe exceeded its budget; the metric becomes unknown.
    #[error("sampling {table}.{column} timed out")]
    SamplingTimeout { table: String, column: String },

    #[error("query failed: {0}")]
    Query(String),
}

impl SourceError {
    pub fn category(&self) -> &'static str {
        match self {
            SourceError::Connection { .. } => "connection_error",
            SourceError::Introspection { .. } => "introspection_error",
            SourceError::SamplingTimeout { .. } => "sampling_timeout",
            SourceError::Query(_) => "query_error",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::Connection { .. })
    }

    pub fn connection(kind: ConnectionFailure, message: impl Into<String>) -> Self {
        SourceError::Connection {
            kind,
            message: message.into(),
        }
    }

    /// Map a driver error raised while connecting.
    ///
    /// SQLSTATE class 28 (and MySQL 1045) are credential failures; anything
    /// else is treated as a network problem.
    pub fn from_connect(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.to_string()).unwrap_or_default();
                if code.starts_with("28") || code == "1045" {
                    ConnectionFailure::Authentication
                } else {
                    ConnectionFailure::Network
                }
            }
            _ => ConnectionFailure::Network,
        };
        SourceError::Connection {
            kind,
            message: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for SourceError {
    fn from(err: sqlx::Error) -> Self {
        SourceError::Query(err.to_string())
    }
}

/// SQL Server login failures arrive as server error 18456.
const MSSQL_LOGIN_FAILED: u32 = 18456;

impl SourceError {
    /// Map a SQL Server driver error raised while connecting.
    pub fn from_tds_connect(err: tiberius::error::Error) -> Self {
        let kind = match &err {
            tiberius::error::Error::Server(token) if token.code() == MSSQL_LOGIN_FAILED => {
                ConnectionFailure::Authentication
            }
            _ => ConnectionFailure::Network,
        };
        SourceError::Connection {
            kind,
            message: err.to_string(),
        }
    }
}

impl From<tiberius::error::Error> for SourceError {
    fn from(err: tiberius::error::Error) -> Self {
        SourceError::Query(err.to_string())
    }
}

/// Failures from the generative-text provider.
#[derive(Error, Debug, Clone)]
pub enum GenerationError {
    /// Rate limit, 5xx or network failure. Retried.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Bad credentials or a malformed request. Not retried.
    #[error("provider rejected the request: {0}")]
    Fatal(String),

    #[error("generative provider is disabled")]
    Disabled,

    #[error("provider returned an unusable response: {0}")]
    InvalidResponse(String),

    #[error("provider still failing after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl GenerationError {
    pub fn category(&self) -> &'static str {
        match self {
            GenerationError::Transient(_) => "provider_transient",
            GenerationError::Fatal(_) => "provider_fatal",
            GenerationError::Disabled => "provider_disabled",
            GenerationError::InvalidResponse(_) => "invalid_response",
            GenerationError::Exhausted { .. } => "provider_exhausted",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Transient(_))
    }
}

/// Fatal outcomes of a generation run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("connection '{0}' is not configured")]
    ConnectionNotFound(String),

    #[error(transparent)]
    Connection(SourceError),

    #[error("no tables could be extracted ({skipped} skipped)")]
    NoTablesExtracted { skipped: usize },

    #[error("a generation is already running for connection '{0}'")]
    AlreadyRunning(String),

    #[error("generation for connection '{0}' was cancelled")]
    Cancelled(String),

    #[error("failed to store dictionary: {0}")]
    Storage(String),
}

impl PipelineError {
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::ConnectionNotFound(_) => "connection_not_found",
            PipelineError::Connection(_) => "connection_error",
            PipelineError::NoTablesExtracted { .. } => "no_tables_extracted",
            PipelineError::AlreadyRunning(_) => "already_running",
            PipelineError::Cancelled(_) => "cancelled",
            PipelineError::Storage(_) => "storage_error",
        }
    }
}

/// Failures of a single chat query.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("No dictionary selected. Choose a dictionary before asking questions.")]
    NoDictionarySelected,

    #[error("No dictionaries exist yet. Generate one from a connection first.")]
    NoDictionaries,

    #[error("Dictionary {0} was not found.")]
    DictionaryNotFound(String),

    #[error("The AI provider failed to answer: {0}")]
    Provider(#[source] GenerationError),

    #[error("The AI provider did not answer within {0} seconds.")]
    Timeout(u64),

    #[error("failed to read dictionary: {0}")]
    Storage(String),
}

impl ChatError {
    pub fn category(&self) -> &'static str {
        match self {
            ChatError::NoDictionarySelected => "no_dictionary_selected",
            ChatError::NoDictionaries => "no_dictionaries",
            ChatError::DictionaryNotFound(_) => "dictionary_not_found",
            ChatError::Provider(_) => "grounding_provider_error",
            ChatError::Timeout(_) => "grounding_timeout",
            ChatError::Storage(_) => "storage_error",
        }
    }
}
