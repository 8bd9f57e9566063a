//! In-memory [`DictionaryStore`] for tests and embedded use.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{Dictionary, DictionarySummary};

use super::DictionaryStore;

pub struct InMemoryStore {
    dictionaries: RwLock<HashMap<String, Dictionary>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            dictionaries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("dictionary store lock poisoned")
}

#[async_trait]
impl DictionaryStore for InMemoryStore {
    async fn save(&self, dictionary: &Dictionary) -> Result<String> {
        let mut map = self.dictionaries.write().map_err(poisoned)?;
        if map.contains_key(&dictionary.id) {
            bail!("dictionary {} already exists", dictionary.id);
        }
        map.insert(dictionary.id.clone(), dictionary.clone());
        Ok(dictionary.id.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<Dictionary>> {
        let map = self.dictionaries.read().map_err(poisoned)?;
        Ok(map.get(id).cloned())
    }

    async fn list(&self, connection_id: Option<&str>) -> Result<Vec<DictionarySummary>> {
        let map = self.dictionaries.read().map_err(poisoned)?;
        let mut rows: Vec<DictionarySummary> = map
            .values()
            .filter(|d| connection_id.map_or(true, |c| d.connection_id == c))
            .map(Dictionary::summary)
            .collect();
        rows.sort_by(|a, b| b.generated_at.cmp(&a.generated_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut map = self.dictionaries.write().map_err(poisoned)?;
        Ok(map.remove(id).is_some())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.dictionaries.read().map_err(poisoned)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::{assemble, DictionaryParts};
    use crate::models::{GenerationReport, SchemaSnapshot};
    use crate::types::Dialect;
    use chrono::{Duration, Utc};

    fn dict(id: &str, connection: &str, age_secs: i64) -> Dictionary {
        assemble(
            DictionaryParts {
                connection_id: connection.to_string(),
                database_name: "db".to_string(),
                dialect: Dialect::Sqlite,
                snapshot: SchemaSnapshot::from_tables(vec![]),
                quality: None,
                descriptions: None,
                report: GenerationReport::default(),
            },
            id.to_string(),
            Utc::now() - Duration::seconds(age_secs),
        )
    }

    #[tokio::test]
    async fn save_get_list_delete() {
        let store = InMemoryStore::new();
        store.save(&dict("old", "a", 60)).await.unwrap();
        store.save(&dict("new", "a", 0)).await.unwrap();
        store.save(&dict("other", "b", 30)).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 3);
        assert!(store.get("old").await.unwrap().is_some());

        let ids: Vec<String> = store
            .list(Some("a"))
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);

        assert!(store.delete("old").await.unwrap());
        assert!(!store.delete("old").await.unwrap());
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn saving_an_existing_id_fails() {
        let store = InMemoryStore::new();
        store.save(&dict("x", "a", 0)).await.unwrap();
        assert!(store.save(&dict("x", "a", 0)).await.is_err());
    }
}
