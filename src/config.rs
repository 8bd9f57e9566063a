//! TOML configuration.
//!
//! One file holds everything the runtime needs: where generated dictionaries
//! are stored, quality and extraction tuning, the generative provider, the
//! grounding budget, the HTTP bind address, and the source connections.
//!
//! ```toml
//! [store]
//! path = "./data/schemadoc.sqlite"
//!
//! [llm]
//! provider = "anthropic"
//! model = "claude-sonnet-4-5"
//! api_key_env = "ANTHROPIC_API_KEY"
//!
//! [connections.shop]
//! dialect = "postgres"
//! host = "localhost"
//! database = "shop"
//! username = "reader"
//! password_env = "SHOP_DB_PASSWORD"
//! ```
//!
//! Passwords never live in the file; `password_env` names the environment
//! variable that holds one.

use anyhow::{Context, Result};
use schemadoc_core::quality::QualitySettings;
use schemadoc_core::types::Dialect;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub quality: QualitySettings,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub grounding: GroundingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Ceiling for a `COUNT(*)` fallback when catalog statistics are missing.
    #[serde(default = "default_count_timeout")]
    pub count_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub include_indexes: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            count_timeout_secs: default_count_timeout(),
            include_indexes: true,
        }
    }
}

fn default_count_timeout() -> u64 {
    10
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// Rows quoted into the prompt when sample data is enabled.
    #[serde(default = "default_prompt_sample_rows")]
    pub sample_rows: u32,
    /// Tables described in parallel.
    #[serde(default = "default_describe_concurrency")]
    pub describe_concurrency: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            sample_rows: default_prompt_sample_rows(),
            describe_concurrency: default_describe_concurrency(),
        }
    }
}

fn default_prompt_sample_rows() -> u32 {
    3
}
fn default_describe_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            api_key_env: None,
            base_url: None,
            timeout_secs: default_llm_timeout(),
            max_attempts: default_max_attempts(),
            retry_base_ms: default_retry_base_ms(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    1000
}
fn default_max_tokens() -> u32 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct GroundingConfig {
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    #[serde(default = "default_chat_timeout")]
    pub timeout_secs: u64,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            max_context_chars: default_max_context_chars(),
            history_turns: default_history_turns(),
            timeout_secs: default_chat_timeout(),
        }
    }
}

fn default_max_context_chars() -> usize {
    24_000
}
fn default_history_turns() -> usize {
    10
}
fn default_chat_timeout() -> u64 {
    45
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7410".to_string()
}

/// One source database. `dialect` selects the adapter.
#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionConfig {
    pub dialect: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password_env: Option<String>,
    /// Postgres schema (default `public`), SQL Server schema (default
    /// `dbo`) or MySQL database override.
    #[serde(default)]
    pub schema: Option<String>,
    /// SQL Server only: accept the server's certificate without validation.
    #[serde(default)]
    pub trust_server_certificate: bool,
    /// SQLite database file.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Quality
    let q = &config.quality;
    if q.max_columns_per_table == 0 {
        anyhow::bail!("quality.max_columns_per_table must be > 0");
    }
    if q.sample_rows == 0 {
        anyhow::bail!("quality.sample_rows must be > 0");
    }
    if q.query_timeout_secs == 0 {
        anyhow::bail!("quality.query_timeout_secs must be > 0");
    }
    if !(0.0..=100.0).contains(&q.null_issue_threshold) {
        anyhow::bail!("quality.null_issue_threshold must be in [0.0, 100.0]");
    }
    q.weights.validate()?;

    // Generation
    if config.generation.describe_concurrency == 0 {
        anyhow::bail!("generation.describe_concurrency must be >= 1");
    }

    // LLM
    match config.llm.provider.as_str() {
        "disabled" | "anthropic" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, anthropic, or openai.",
            other
        ),
    }
    if config.llm.is_enabled() && config.llm.model.is_none() {
        anyhow::bail!(
            "llm.model must be specified when provider is '{}'",
            config.llm.provider
        );
    }
    if config.llm.max_attempts == 0 {
        anyhow::bail!("llm.max_attempts must be >= 1");
    }

    // Grounding
    if config.grounding.max_context_chars < 512 {
        anyhow::bail!("grounding.max_context_chars must be >= 512");
    }
    if config.grounding.timeout_secs == 0 {
        anyhow::bail!("grounding.timeout_secs must be > 0");
    }

    // Connections
    for (id, conn) in &config.connections {
        let dialect: Dialect = conn
            .dialect
            .parse()
            .map_err(|e: String| anyhow::anyhow!("connections.{}: {}", id, e))?;
        match dialect {
            Dialect::Sqlite => {
                if conn.path.is_none() {
                    anyhow::bail!("connections.{}.path is required for sqlite", id);
                }
            }
            Dialect::Postgres | Dialect::Mysql | Dialect::SqlServer => {
                if conn.host.is_none() || conn.database.is_none() {
                    anyhow::bail!(
                        "connections.{}: host and database are required for {}",
                        id,
                        dialect
                    );
                }
            }
        }
    }

    Ok(())
}
