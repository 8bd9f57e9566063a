//! Checks generated text against the snapshot.
//!
//! Provider output is untrusted. Descriptions are filtered down to columns
//! that exist, and any identifier the text claims (backticked names and
//! `table.column` references) that the snapshot does not contain is reported.

use std::collections::{BTreeMap, BTreeSet};

use crate::models::{SchemaSnapshot, TableDescription, TableMeta};

/// A description as parsed from the provider, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDescription {
    pub table_description: String,
    pub business_context: Option<String>,
    pub usage_notes: Option<String>,
    pub columns: BTreeMap<String, String>,
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn known_name(snapshot: &SchemaSnapshot, name: &str) -> bool {
    snapshot.find_table(name).is_some()
        || snapshot
            .tables
            .iter()
            .any(|t| t.columns.iter().any(|c| c.name.eq_ignore_ascii_case(name)))
}

fn known_qualified(snapshot: &SchemaSnapshot, table: &str, column: &str) -> bool {
    snapshot
        .find_table(table)
        .map(|t| t.columns.iter().any(|c| c.name.eq_ignore_ascii_case(column)))
        .unwrap_or(false)
}

/// Identifiers in `text` that claim to be schema names but are not in
/// `snapshot`, deduplicated and sorted.
///
/// Two shapes count as a claim:
/// - a backticked identifier or `table.column` pair
/// - a bare `table.column` whose table part is a known table
pub fn unknown_references(text: &str, snapshot: &SchemaSnapshot) -> Vec<String> {
    let mut unknown = BTreeSet::new();

    for (i, span) in text.split('`').enumerate() {
        if i % 2 == 0 {
            continue;
        }
        let span = span.trim();
        match span.split_once('.') {
            Some((t, c)) if is_identifier(t) && is_identifier(c) => {
                if !known_qualified(snapshot, t, c) {
                    unknown.insert(span.to_string());
                }
            }
            None if is_identifier(span) => {
                if !known_name(snapshot, span) {
                    unknown.insert(span.to_string());
                }
            }
            _ => {}
        }
    }

    for token in text.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.')) {
        let token = token.trim_matches('.');
        let Some((t, c)) = token.split_once('.') else {
            continue;
        };
        if !is_identifier(t) || !is_identifier(c) {
            continue;
        }
        if snapshot.find_table(t).is_some() && !known_qualified(snapshot, t, c) {
            unknown.insert(token.to_string());
        }
    }

    unknown.into_iter().collect()
}

/// Keep only columns of `table`; flag dropped keys and unknown names in prose.
pub fn validate_description(
    table: &TableMeta,
    snapshot: &SchemaSnapshot,
    raw: RawDescription,
) -> TableDescription {
    let mut flagged = BTreeSet::new();
    let mut columns = BTreeMap::new();

    for (name, text) in raw.columns {
        match table.columns.iter().find(|c| c.name.eq_ignore_ascii_case(&name)) {
            Some(col) => {
                columns.insert(col.name.clone(), text);
            }
            None => {
                flagged.insert(name);
            }
        }
    }

    let prose = [
        Some(raw.table_description.as_str()),
        raw.business_context.as_deref(),
        raw.usage_notes.as_deref(),
    ];
    for text in prose.into_iter().flatten().chain(columns.values().map(String::as_str)) {
        flagged.extend(unknown_references(text, snapshot));
    }

    TableDescription {
        table_description: raw.table_description,
        business_context: raw.business_context.filter(|s| !s.trim().is_empty()),
        usage_notes: raw.usage_notes.filter(|s| !s.trim().is_empty()),
        columns,
        flagged_references: flagged.into_iter().collect(),
    }
}
