//! Grounding context construction.
//!
//! Turns a [`Dictionary`] plus a question into the bounded block of text the
//! generative provider sees. Tables are the unit of inclusion: a table's
//! block is either emitted whole or not at all.
//!
//! # Layout
//!
//! ```text
//! Database: shop (postgres)
//! Tables: 3, columns: 14
//!
//! ## Table: orders                       ← full block, one per focus table
//! ...
//!
//! ## Other tables                        ← compact line per remaining table
//! - customers (rows: 120, quality: 97.5) columns: id, email
//! ```
//!
//! # Priority
//!
//! When the blocks exceed the budget, tables are kept in this order:
//! tables named in the question, tables referenced most recently in the
//! conversation history, higher quality score, then catalog order. The
//! first non-focus table that does not fit ends inclusion; everything after
//! it is dropped.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use crate::models::{ChatTurn, Dictionary, SchemaSnapshot, TableMeta};

const OMITTED_NOTE_RESERVE: usize = 96;

/// The context block sent to the provider, plus what went into it.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundingContext {
    pub text: String,
    /// Tables named in the question, in catalog order.
    pub focus_tables: Vec<String>,
    /// Tables whose block (full or compact) made it into `text`.
    pub included_tables: Vec<String>,
    pub dropped_tables: Vec<String>,
    /// True when any table was dropped or a focus table was shortened.
    pub truncated: bool,
}

impl GroundingContext {
    pub fn includes(&self, table: &str) -> bool {
        self.included_tables.iter().any(|t| t == table)
    }
}

/// Lowercase identifier-ish words in `text`. Dots split words, so
/// `orders.customer_id` yields `orders` and `customer_id`.
pub fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn word_names_table(word: &str, table: &str) -> bool {
    let table = table.to_lowercase();
    if word == table {
        return true;
    }
    // customer ↔ customers, category ↔ categories
    if format!("{}s", word) == table || format!("{}s", table) == word {
        return true;
    }
    if let Some(stem) = word.strip_suffix('y') {
        if format!("{}ies", stem) == table {
            return true;
        }
    }
    if let Some(stem) = table.strip_suffix('y') {
        if format!("{}ies", stem) == word {
            return true;
        }
    }
    false
}

/// Tables named in `text`, in snapshot order.
pub fn mentioned_tables(text: &str, snapshot: &SchemaSnapshot) -> Vec<String> {
    let tokens = words(text);
    snapshot
        .tables
        .iter()
        .filter(|t| tokens.iter().any(|w| word_names_table(w, &t.name)))
        .map(|t| t.name.clone())
        .collect()
}

/// The last `turns` entries of `history`.
pub fn recent_history(history: &[ChatTurn], turns: usize) -> &[ChatTurn] {
    let start = history.len().saturating_sub(turns);
    &history[start..]
}

/// For each table mentioned in history, how many turns ago it was last named
/// (0 = most recent turn).
fn history_recency(history: &[ChatTurn], snapshot: &SchemaSnapshot) -> HashMap<String, usize> {
    let mut recency = HashMap::new();
    for (age, turn) in history.iter().rev().enumerate() {
        for table in mentioned_tables(&turn.content, snapshot) {
            recency.entry(table).or_insert(age);
        }
    }
    recency
}

fn fmt_rows(row_count: Option<u64>) -> String {
    match row_count {
        Some(n) => n.to_string(),
        None => "unknown".to_string(),
    }
}

/// Everything known about one table.
pub fn full_table_block(dictionary: &Dictionary, table: &TableMeta) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## Table: {}", table.name);
    let _ = writeln!(out, "Rows: {}", fmt_rows(table.row_count));

    let description = dictionary.description_for(&table.name);
    if let Some(d) = description {
        if !d.table_description.is_empty() {
            let _ = writeln!(out, "Description: {}", d.table_description);
        }
        if let Some(ctx) = &d.business_context {
            let _ = writeln!(out, "Business context: {}", ctx);
        }
    }

    let _ = writeln!(out, "Columns:");
    for col in &table.columns {
        let mut flags = Vec::new();
        if table.is_primary_key(&col.name) {
            flags.push("PK".to_string());
        }
        if let Some(fk) = table.foreign_keys.iter().find(|fk| fk.column == col.name) {
            flags.push(format!("FK -> {}.{}", fk.referenced_table, fk.referenced_column));
        }
        if !col.nullable {
            flags.push("NOT NULL".to_string());
        }
        let _ = write!(out, "- {} {}", col.name, col.data_type);
        if !flags.is_empty() {
            let _ = write!(out, " [{}]", flags.join(", "));
        }
        if let Some(text) = description.and_then(|d| d.columns.get(&col.name)) {
            let _ = write!(out, ": {}", text);
        }
        out.push('\n');
    }

    let edges: Vec<String> = dictionary
        .metadata
        .relationships()
        .into_iter()
        .filter(|r| r.touches(&table.name))
        .map(|r| {
            if r.dangling {
                format!("{} (outside this database snapshot)", r.edge_label())
            } else {
                r.edge_label()
            }
        })
        .collect();
    if !edges.is_empty() {
        let _ = writeln!(out, "Relationships:");
        for edge in edges {
            let _ = writeln!(out, "- {}", edge);
        }
    }

    if let Some(q) = dictionary.quality_for(&table.name) {
        if q.scored {
            let _ = writeln!(
                out,
                "Quality: overall {}, completeness {}, uniqueness {}{}",
                q.overall_quality_score,
                q.completeness,
                q.uniqueness,
                if q.empty { " (table is empty)" } else { "" }
            );
        } else {
            let _ = writeln!(out, "Quality: not measured");
        }
        if let Some(f) = &q.freshness {
            let _ = writeln!(
                out,
                "Latest {}: {}",
                f.column,
                f.latest.as_deref().unwrap_or("none (all null)")
            );
        }
        for issue in q.top_issues().into_iter().take(5) {
            let _ = writeln!(out, "- [{}] {}", issue.severity.as_str(), issue.message);
        }
    }
    out
}

/// One line: name, row count, score, columns, outgoing edges.
pub fn compact_table_line(dictionary: &Dictionary, table: &TableMeta) -> String {
    let mut out = format!("- {} (rows: {}", table.name, fmt_rows(table.row_count));
    if let Some(q) = dictionary.quality_for(&table.name) {
        if q.scored {
            let _ = write!(out, ", quality: {}", q.overall_quality_score);
        } else {
            out.push_str(", quality: not measured");
        }
    }
    out.push(')');
    let cols: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
    let _ = write!(out, " columns: {}", cols.join(", "));
    let refs: Vec<String> = table
        .foreign_keys
        .iter()
        .map(|fk| {
            format!(
                "{}.{} -> {}.{}",
                table.name, fk.column, fk.referenced_table, fk.referenced_column
            )
        })
        .collect();
    if !refs.is_empty() {
        let _ = write!(out, "; references: {}", refs.join(", "));
    }
    out.push('\n');
    out
}

enum Block {
    Full(String),
    Compact(String),
}

/// Build the provider context for `question`.
///
/// `max_chars` bounds the returned text (measured in characters). The header
/// is always emitted; table blocks are added whole in priority order.
pub fn build_context(
    dictionary: &Dictionary,
    question: &str,
    history: &[ChatTurn],
    max_chars: usize,
) -> GroundingContext {
    let snapshot = &dictionary.metadata;
    let focus = mentioned_tables(question, snapshot);
    let focus_set: HashSet<&str> = focus.iter().map(String::as_str).collect();
    let recency = history_recency(history, snapshot);

    let header = format!(
        "Database: {} ({})\nTables: {}, columns: {}\n",
        dictionary.database_name,
        dictionary.dialect,
        dictionary.total_tables,
        dictionary.total_columns
    );

    let mut order: Vec<(usize, &TableMeta)> = snapshot.tables.iter().enumerate().collect();
    order.sort_by(|(ia, a), (ib, b)| {
        let fa = focus_set.contains(a.name.as_str());
        let fb = focus_set.contains(b.name.as_str());
        let ra = recency.get(&a.name).copied().unwrap_or(usize::MAX);
        let rb = recency.get(&b.name).copied().unwrap_or(usize::MAX);
        let qa = dictionary
            .quality_for(&a.name)
            .map(|q| q.overall_quality_score)
            .unwrap_or(0.0);
        let qb = dictionary
            .quality_for(&b.name)
            .map(|q| q.overall_quality_score)
            .unwrap_or(0.0);
        fb.cmp(&fa)
            .then(ra.cmp(&rb))
            .then(qb.partial_cmp(&qa).unwrap_or(std::cmp::Ordering::Equal))
            .then(ia.cmp(ib))
    });

    let budget = max_chars.saturating_sub(header.chars().count() + OMITTED_NOTE_RESERVE);
    let mut used = 0usize;
    let mut kept: HashMap<String, Block> = HashMap::new();
    let mut dropped = Vec::new();
    let mut truncated = false;
    let mut closed = false;

    for (_, table) in order {
        if closed {
            dropped.push(table.name.clone());
            continue;
        }
        let is_focus = focus_set.contains(table.name.as_str());
        let compact = compact_table_line(dictionary, table);

        if is_focus {
            let full = full_table_block(dictionary, table);
            let len = full.chars().count() + 1;
            if used + len <= budget {
                used += len;
                kept.insert(table.name.clone(), Block::Full(full));
                continue;
            }
            truncated = true;
        }

        let len = compact.chars().count();
        if used + len <= budget {
            used += len;
            kept.insert(table.name.clone(), Block::Compact(compact));
        } else {
            truncated = true;
            dropped.push(table.name.clone());
            if !is_focus {
                closed = true;
            }
        }
    }

    let mut text = header;
    let mut included = Vec::new();
    for table in &snapshot.tables {
        if let Some(Block::Full(block)) = kept.get(&table.name) {
            text.push('\n');
            text.push_str(block);
            included.push(table.name.clone());
        }
    }
    let compact_tables: Vec<&TableMeta> = snapshot
        .tables
        .iter()
        .filter(|t| matches!(kept.get(&t.name), Some(Block::Compact(_))))
        .collect();
    if !compact_tables.is_empty() {
        text.push_str(if included.is_empty() {
            "\n## Tables\n"
        } else {
            "\n## Other tables\n"
        });
        for table in compact_tables {
            if let Some(Block::Compact(line)) = kept.get(&table.name) {
                text.push_str(line);
                included.push(table.name.clone());
            }
        }
    }
    if !dropped.is_empty() {
        let _ = writeln!(
            text,
            "\n({} more tables omitted to fit the context budget)",
            dropped.len()
        );
    }

    GroundingContext {
        text,
        focus_tables: focus,
        included_tables: included,
        dropped_tables: dropped,
        truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::{assemble, DictionaryParts};
    use crate::models::{ChatRole, ColumnMeta, ForeignKey, GenerationReport};
    use crate::types::{DataType, Dialect};
    use chrono::Utc;

    fn col(name: &str) -> ColumnMeta {
        ColumnMeta {
            name: name.to_string(),
            data_type: DataType::Integer,
            declared_type: "integer".to_string(),
            nullable: name != "id",
            default: None,
        }
    }

    fn table(name: &str, cols: &[&str], fks: &[(&str, &str)]) -> TableMeta {
        TableMeta {
            name: name.to_string(),
            columns: cols.iter().map(|c| col(c)).collect(),
            primary_key: vec!["id".to_string()],
            foreign_keys: fks
                .iter()
                .map(|(c, t)| ForeignKey {
                    column: c.to_string(),
                    referenced_table: t.to_string(),
                    referenced_column: "id".to_string(),
                    dangling: false,
                })
                .collect(),
            indexes: vec![],
            row_count: Some(10),
        }
    }

    fn shop(extra: usize) -> Dictionary {
        let mut tables = vec![
            table("customers", &["id", "email"], &[]),
            table("orders", &["id", "customer_id"], &[("customer_id", "customers")]),
            table("categories", &["id", "label"], &[]),
        ];
        for i in 0..extra {
            tables.push(table(
                &format!("audit_log_{:03}", i),
                &["id", "payload", "created_at"],
                &[],
            ));
        }
        assemble(
            DictionaryParts {
                connection_id: "c".to_string(),
                database_name: "shop".to_string(),
                dialect: Dialect::Postgres,
                snapshot: SchemaSnapshot::from_tables(tables),
                quality: None,
                descriptions: None,
                report: GenerationReport::default(),
            },
            "d".to_string(),
            Utc::now(),
        )
    }

    fn turn(content: &str) -> ChatTurn {
        ChatTurn {
            role: ChatRole::User,
            content: content.to_string(),
            timestamp: None,
        }
    }

    #[test]
    fn matches_singular_and_plural_names() {
        let dict = shop(0);
        assert_eq!(
            mentioned_tables("how are orders and customers related", &dict.metadata),
            vec!["customers", "orders"]
        );
        assert_eq!(
            mentioned_tables("what is a category?", &dict.metadata),
            vec!["categories"]
        );
        assert!(mentioned_tables("hello there", &dict.metadata).is_empty());
    }

    #[test]
    fn named_tables_get_full_metadata_and_edges() {
        let dict = shop(0);
        let ctx = build_context(&dict, "how are orders and customers related", &[], 10_000);
        assert_eq!(ctx.focus_tables, vec!["customers", "orders"]);
        assert!(ctx.text.contains("## Table: orders"));
        assert!(ctx.text.contains("orders.customer_id -> customers.id"));
        assert!(ctx.text.contains("- categories (rows: 10)"));
        assert!(!ctx.truncated);
    }

    #[test]
    fn unnamed_question_gets_compact_summary_of_everything() {
        let dict = shop(0);
        let ctx = build_context(&dict, "what is in here?", &[], 10_000);
        assert!(ctx.focus_tables.is_empty());
        assert_eq!(ctx.included_tables.len(), 3);
        assert!(ctx.text.contains("## Tables"));
        assert!(ctx
            .text
            .contains("references: orders.customer_id -> customers.id"));
    }

    #[test]
    fn truncation_keeps_tables_whole() {
        let dict = shop(40);
        let ctx = build_context(&dict, "tell me about orders", &[], 1_200);
        assert!(ctx.truncated);
        assert!(ctx.text.chars().count() <= 1_200);
        assert!(ctx.includes("orders"));

        for name in dict.metadata.table_names() {
            let kept = ctx.includes(name);
            let dropped = ctx.dropped_tables.iter().any(|t| t == name);
            assert!(kept ^ dropped, "{} must be kept or dropped, not both", name);
            if dropped {
                // a dropped table's compact line never appears
                assert!(!ctx.text.contains(&format!("- {} (", name)));
            }
        }
    }

    #[test]
    fn recently_discussed_tables_survive_truncation() {
        let dict = shop(40);
        let history = vec![turn("what does audit_log_039 hold?")];
        let ctx = build_context(&dict, "anything else?", &history, 700);
        assert!(ctx.truncated);
        assert!(ctx.includes("audit_log_039"));
        assert!(ctx.dropped_tables.iter().any(|t| t == "audit_log_038"));
    }

    #[test]
    fn recent_history_keeps_the_tail() {
        let history: Vec<ChatTurn> = (0..12).map(|i| turn(&i.to_string())).collect();
        let tail = recent_history(&history, 10);
        assert_eq!(tail.len(), 10);
        assert_eq!(tail[0].content, "2");
        assert_eq!(recent_history(&history[..3], 10).len(), 3);
    }
}
