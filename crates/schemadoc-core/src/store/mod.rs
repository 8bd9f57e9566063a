//! Storage abstraction for generated dictionaries.
//!
//! The [`DictionaryStore`] trait is the single persistence seam used by the
//! generation pipeline and the grounding engine, enabling pluggable backends
//! (SQLite in the application crate, in-memory here).
//!
//! Dictionaries are immutable: the trait has no update operation, and saving
//! an id that already exists is an error.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Dictionary, DictionarySummary};

/// Abstract storage backend for dictionaries.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`save`](DictionaryStore::save) | Persist a new dictionary, returning its id |
/// | [`get`](DictionaryStore::get) | Load one dictionary by id |
/// | [`list`](DictionaryStore::list) | Summaries, newest first, optionally per connection |
/// | [`delete`](DictionaryStore::delete) | Remove one dictionary |
/// | [`count`](DictionaryStore::count) | Number of stored dictionaries |
#[async_trait]
pub trait DictionaryStore: Send + Sync {
    async fn save(&self, dictionary: &Dictionary) -> Result<String>;

    async fn get(&self, id: &str) -> Result<Option<Dictionary>>;

    async fn list(&self, connection_id: Option<&str>) -> Result<Vec<DictionarySummary>>;

    /// Returns `false` when no dictionary had that id.
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn count(&self) -> Result<usize>;
}
