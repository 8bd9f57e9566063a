//! Wiring from a [`Config`] to the running components.

use anyhow::Result;
use schemadoc_core::store::DictionaryStore;
use std::sync::Arc;

use crate::chat::GroundingEngine;
use crate::config::Config;
use crate::db;
use crate::llm::{create_provider, TextProvider};
use crate::migrate::migrate_pool;
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::source::{ConfigResolver, ConnectionResolver};
use crate::sqlite_store::SqliteStore;

/// Everything a command or request handler needs, cheap to clone.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn DictionaryStore>,
    pub pipeline: Arc<Pipeline>,
    pub engine: Arc<GroundingEngine>,
}

impl Services {
    /// Open (and migrate) the store and build the configured provider.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate_pool(&pool).await?;
        let store: Arc<dyn DictionaryStore> = Arc::new(SqliteStore::new(pool));
        let provider = create_provider(&config.llm)?;
        let resolver: Arc<dyn ConnectionResolver> = Arc::new(ConfigResolver::new(config));
        Ok(Self::assemble(config, store, provider, resolver))
    }

    pub fn assemble(
        config: &Config,
        store: Arc<dyn DictionaryStore>,
        provider: Arc<dyn TextProvider>,
        resolver: Arc<dyn ConnectionResolver>,
    ) -> Self {
        let pipeline = Pipeline::new(
            resolver,
            store.clone(),
            provider.clone(),
            PipelineSettings::from_config(config),
        );
        let engine = GroundingEngine::new(
            store.clone(),
            provider,
            config.grounding.clone(),
            config.llm.max_tokens,
        );
        Self {
            store,
            pipeline: Arc::new(pipeline),
            engine: Arc::new(engine),
        }
    }
}
