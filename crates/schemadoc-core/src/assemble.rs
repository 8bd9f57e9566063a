//! Dictionary assembly.
//!
//! The last pipeline stage before persistence. Assembly is a pure function of
//! its inputs plus an id and timestamp, so it is trivially testable and the
//! derived totals can never drift from the snapshot.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::models::{
    Dictionary, GenerationReport, SchemaSnapshot, TableDescription, TableQuality,
};
use crate::types::Dialect;

/// Everything a generation run produced, before it becomes a [`Dictionary`].
#[derive(Debug, Clone)]
pub struct DictionaryParts {
    pub connection_id: String,
    pub database_name: String,
    pub dialect: Dialect,
    pub snapshot: SchemaSnapshot,
    pub quality: Option<BTreeMap<String, TableQuality>>,
    pub descriptions: Option<BTreeMap<String, TableDescription>>,
    pub report: GenerationReport,
}

/// SHA-256 (hex) of the canonical snapshot JSON.
///
/// Two runs against an unchanged schema produce the same fingerprint even
/// though their ids and timestamps differ.
pub fn snapshot_fingerprint(snapshot: &SchemaSnapshot) -> String {
    let canonical = serde_json::to_vec(snapshot).unwrap_or_default();
    let digest = Sha256::digest(&canonical);
    format!("{:x}", digest)
}

/// Combine run outputs into a dictionary.
///
/// Totals are recomputed from the snapshot. Quality and description entries
/// for tables that are not in the snapshot are dropped.
pub fn assemble(parts: DictionaryParts, id: String, generated_at: DateTime<Utc>) -> Dictionary {
    let DictionaryParts {
        connection_id,
        database_name,
        dialect,
        mut snapshot,
        quality,
        descriptions,
        report,
    } = parts;

    snapshot.total_tables = snapshot.tables.len();
    let total_tables = snapshot.total_tables;
    let total_columns = snapshot.total_columns();

    let quality_metrics = quality.map(|m| retain_known(m, &snapshot));
    let ai_descriptions = descriptions.map(|m| retain_known(m, &snapshot));
    let fingerprint = snapshot_fingerprint(&snapshot);

    Dictionary {
        id,
        connection_id,
        database_name,
        dialect,
        generated_at,
        total_tables,
        total_columns,
        fingerprint,
        metadata: snapshot,
        quality_metrics,
        ai_descriptions,
        report,
    }
}

/// [`assemble`] with a fresh v4 id and the current time.
pub fn assemble_now(parts: DictionaryParts) -> Dictionary {
    assemble(parts, uuid::Uuid::new_v4().to_string(), Utc::now())
}

fn retain_known<V>(map: BTreeMap<String, V>, snapshot: &SchemaSnapshot) -> BTreeMap<String, V> {
    map.into_iter()
        .filter(|(name, _)| snapshot.table(name).is_some())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnMeta, TableMeta};
    use crate::types::DataType;

    fn snapshot() -> SchemaSnapshot {
        let col = |name: &str| ColumnMeta {
            name: name.to_string(),
            data_type: DataType::Integer,
            declared_type: "integer".to_string(),
            nullable: false,
            default: None,
        };
        SchemaSnapshot::from_tables(vec![
            TableMeta {
                name: "customers".to_string(),
                columns: vec![col("id"), col("age")],
                primary_key: vec!["id".to_string()],
                foreign_keys: vec![],
                indexes: vec![],
                row_count: Some(3),
            },
            TableMeta {
                name: "orders".to_string(),
                columns: vec![col("id")],
                primary_key: vec!["id".to_string()],
                foreign_keys: vec![],
                indexes: vec![],
                row_count: Some(5),
            },
        ])
    }

    fn parts() -> DictionaryParts {
        DictionaryParts {
            connection_id: "local".to_string(),
            database_name: "shop".to_string(),
            dialect: Dialect::Sqlite,
            snapshot: snapshot(),
            quality: None,
            descriptions: None,
            report: GenerationReport::default(),
        }
    }

    #[test]
    fn totals_are_derived_from_snapshot() {
        let mut p = parts();
        p.snapshot.total_tables = 42;
        let dict = assemble(p, "a".to_string(), Utc::now());
        assert_eq!(dict.total_tables, 2);
        assert_eq!(dict.metadata.total_tables, 2);
        assert_eq!(dict.total_columns, 3);
    }

    #[test]
    fn descriptions_for_unknown_tables_are_dropped() {
        let mut p = parts();
        let mut descriptions = BTreeMap::new();
        descriptions.insert("customers".to_string(), TableDescription::default());
        descriptions.insert("ghosts".to_string(), TableDescription::default());
        p.descriptions = Some(descriptions);

        let dict = assemble(p, "a".to_string(), Utc::now());
        let kept = dict.ai_descriptions.unwrap();
        assert_eq!(kept.len(), 1);
        assert!(kept.contains_key("customers"));
    }

    #[test]
    fn fingerprint_ignores_id_and_time() {
        let a = assemble_now(parts());
        let b = assemble_now(parts());
        assert_ne!(a.id, b.id);
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.fingerprint.len(), 64);
    }
}
