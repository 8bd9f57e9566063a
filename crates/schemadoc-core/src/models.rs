//! Core data models used throughout schemadoc.
//!
//! These types describe what flows through the generation pipeline: the
//! structural snapshot produced by introspection, the quality metrics and
//! descriptions layered on top of it, the assembled [`Dictionary`], and the
//! chat types consumed by the grounding engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::types::{DataType, Dialect};

// ═══════════════════════════════════════════════════════════════════════
// Structure
// ═══════════════════════════════════════════════════════════════════════

/// A single column as reported by the source catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    /// Normalized type.
    pub data_type: DataType,
    /// Type exactly as the catalog declared it.
    pub declared_type: String,
    pub nullable: bool,
    pub default: Option<String>,
}

/// A directed foreign-key edge from one of this table's columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
    /// Set when the referenced table is not part of the snapshot.
    #[serde(default)]
    pub dangling: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    /// Columns in catalog order.
    pub columns: Vec<ColumnMeta>,
    /// Primary-key column names, in key order.
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    #[serde(default)]
    pub indexes: Vec<String>,
    /// `None` when counting was infeasible or timed out.
    pub row_count: Option<u64>,
}

impl TableMeta {
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|c| c == column)
    }

    pub fn is_foreign_key(&self, column: &str) -> bool {
        self.foreign_keys.iter().any(|fk| fk.column == column)
    }
}

/// One flattened foreign-key edge, as listed in exports and grounding context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    pub dangling: bool,
}

impl Relationship {
    /// `orders.customer_id -> customers.id`
    pub fn edge_label(&self) -> String {
        format!(
            "{}.{} -> {}.{}",
            self.from_table, self.from_column, self.to_table, self.to_column
        )
    }

    pub fn touches(&self, table: &str) -> bool {
        self.from_table == table || self.to_table == table
    }
}

/// Point-in-time structure of one database.
///
/// Tables keep the order in which the adapter listed them. Names are unique;
/// [`SchemaSnapshot::from_tables`] keeps the first occurrence of a duplicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub tables: Vec<TableMeta>,
    pub total_tables: usize,
}

impl SchemaSnapshot {
    /// Build a snapshot and flag every foreign key whose referenced table is
    /// outside the introspected set. Dangling edges are kept.
    ///
    /// Catalogs report the referenced name as the DDL spelled it, so a
    /// reference that only differs in ASCII case is resolved to the
    /// snapshot's spelling of the table and column.
    pub fn from_tables(tables: Vec<TableMeta>) -> Self {
        let mut seen = HashSet::new();
        let mut tables: Vec<TableMeta> = tables
            .into_iter()
            .filter(|t| seen.insert(t.name.clone()))
            .collect();

        let targets: Vec<(String, Vec<String>)> = tables
            .iter()
            .map(|t| {
                let columns = t.columns.iter().map(|c| c.name.clone()).collect();
                (t.name.clone(), columns)
            })
            .collect();
        for table in &mut tables {
            for fk in &mut table.foreign_keys {
                let target = targets
                    .iter()
                    .find(|(name, _)| *name == fk.referenced_table)
                    .or_else(|| {
                        targets
                            .iter()
                            .find(|(name, _)| name.eq_ignore_ascii_case(&fk.referenced_table))
                    });
                match target {
                    Some((name, columns)) => {
                        fk.referenced_table = name.clone();
                        if !columns.contains(&fk.referenced_column) {
                            if let Some(column) = columns
                                .iter()
                                .find(|c| c.eq_ignore_ascii_case(&fk.referenced_column))
                            {
                                fk.referenced_column = column.clone();
                            }
                        }
                        fk.dangling = false;
                    }
                    None => fk.dangling = true,
                }
            }
        }

        let total_tables = tables.len();
        Self {
            tables,
            total_tables,
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableMeta> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Case-insensitive lookup, used when matching free text against names.
    pub fn find_table(&self, name: &str) -> Option<&TableMeta> {
        self.table(name).or_else(|| {
            self.tables
                .iter()
                .find(|t| t.name.eq_ignore_ascii_case(name))
        })
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn total_columns(&self) -> usize {
        self.tables.iter().map(|t| t.columns.len()).sum()
    }

    pub fn relationships(&self) -> Vec<Relationship> {
        self.tables
            .iter()
            .flat_map(|t| {
                t.foreign_keys.iter().map(move |fk| Relationship {
                    from_table: t.name.clone(),
                    from_column: fk.column.clone(),
                    to_table: fk.referenced_table.clone(),
                    to_column: fk.referenced_column.clone(),
                    dangling: fk.dangling,
                })
            })
            .collect()
    }

    pub fn dangling_references(&self) -> Vec<Relationship> {
        self.relationships()
            .into_iter()
            .filter(|r| r.dangling)
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Quality
// ═══════════════════════════════════════════════════════════════════════

/// Measured metrics for one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnQuality {
    pub null_count: u64,
    /// `null_count / sampled_rows × 100`, one decimal.
    pub null_percentage: f64,
    pub distinct_count: Option<u64>,
    /// True when the counts come from a sample rather than the full table.
    pub estimated: bool,
    pub sampled_rows: u64,
    pub min_value: Option<String>,
    pub max_value: Option<String>,
}

/// Either measured metrics or an explicit "unknown" after a failed probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ColumnMetric {
    Measured(ColumnQuality),
    Unknown { reason: String },
}

impl ColumnMetric {
    pub fn measured(&self) -> Option<&ColumnQuality> {
        match self {
            ColumnMetric::Measured(q) => Some(q),
            ColumnMetric::Unknown { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Completeness,
    Duplicates,
    NullValues,
    NoPrimaryKey,
    /// The table has rows but no column could be measured.
    Unmeasured,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub severity: Severity,
    pub kind: IssueKind,
    pub column: Option<String>,
    pub null_count: Option<u64>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableQuality {
    /// Weighted score in `[0, 100]`; see [`crate::quality`].
    pub overall_quality_score: f64,
    pub completeness: f64,
    pub uniqueness: f64,
    /// Inverted share of columns that are more than half null, in `[0, 100]`.
    pub null_penalty_score: f64,
    pub total_rows: u64,
    pub sampled: bool,
    /// No rows at all. Completeness is 100 but the table is not "clean".
    pub empty: bool,
    /// False when the table has rows but no column could be measured. The
    /// scores are then 0 and say nothing about the data.
    #[serde(default = "default_scored")]
    pub scored: bool,
    pub analyzed_columns: usize,
    pub columns: BTreeMap<String, ColumnMetric>,
    pub issues: Vec<QualityIssue>,
    /// Informational only; never weighted into the scores.
    #[serde(default)]
    pub freshness: Option<Freshness>,
}

fn default_scored() -> bool {
    true
}

/// Most recent value of a table's first temporal column, read with a full
/// `MAX()` rather than from the sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Freshness {
    pub column: String,
    /// `None` when the column holds only nulls.
    pub latest: Option<String>,
}

impl TableQuality {
    /// Issues ranked by absolute null count (descending), then severity.
    pub fn top_issues(&self) -> Vec<&QualityIssue> {
        let mut ranked: Vec<&QualityIssue> = self.issues.iter().collect();
        ranked.sort_by(|a, b| {
            b.null_count
                .unwrap_or(0)
                .cmp(&a.null_count.unwrap_or(0))
                .then(b.severity.cmp(&a.severity))
        });
        ranked
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Descriptions
// ═══════════════════════════════════════════════════════════════════════

/// Generated prose for one table, validated against the snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableDescription {
    pub table_description: String,
    pub business_context: Option<String>,
    pub usage_notes: Option<String>,
    /// Column name → description. Only columns that exist in the table.
    pub columns: BTreeMap<String, String>,
    /// Names the provider produced that do not exist in the snapshot.
    #[serde(default)]
    pub flagged_references: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════
// Dictionary
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Introspection,
    Sampling,
    Generation,
}

/// A failure local to one table or column, recorded instead of aborting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunIssue {
    pub stage: RunStage,
    pub table: String,
    pub column: Option<String>,
    /// Machine category, e.g. `introspection_error`, `sampling_timeout`.
    pub category: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    pub include_ai_descriptions: bool,
    pub include_quality_analysis: bool,
    pub include_sample_data: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            include_ai_descriptions: true,
            include_quality_analysis: true,
            include_sample_data: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenerationReport {
    pub options: GenerationOptions,
    /// True when any table or column was degraded or omitted.
    pub partial: bool,
    pub issues: Vec<RunIssue>,
}

/// The immutable artifact produced by one generation run.
///
/// Built only by [`crate::assemble::assemble`]; stores never update one in
/// place, so a regeneration always yields a new id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dictionary {
    pub id: String,
    pub connection_id: String,
    pub database_name: String,
    pub dialect: Dialect,
    pub generated_at: DateTime<Utc>,
    pub total_tables: usize,
    pub total_columns: usize,
    /// SHA-256 of the canonical snapshot JSON.
    pub fingerprint: String,
    pub metadata: SchemaSnapshot,
    pub quality_metrics: Option<BTreeMap<String, TableQuality>>,
    pub ai_descriptions: Option<BTreeMap<String, TableDescription>>,
    pub report: GenerationReport,
}

/// A quality issue tagged with the table it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedIssue<'a> {
    pub table: &'a str,
    pub issue: &'a QualityIssue,
}

impl Dictionary {
    pub fn quality_for(&self, table: &str) -> Option<&TableQuality> {
        self.quality_metrics.as_ref().and_then(|m| m.get(table))
    }

    pub fn description_for(&self, table: &str) -> Option<&TableDescription> {
        self.ai_descriptions.as_ref().and_then(|m| m.get(table))
    }

    /// Issues across all tables, ranked by absolute null count descending.
    pub fn top_issues(&self, limit: usize) -> Vec<RankedIssue<'_>> {
        let mut ranked: Vec<RankedIssue<'_>> = self
            .quality_metrics
            .iter()
            .flat_map(|m| m.iter())
            .flat_map(|(table, q)| {
                q.issues.iter().map(move |issue| RankedIssue {
                    table: table.as_str(),
                    issue,
                })
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.issue
                .null_count
                .unwrap_or(0)
                .cmp(&a.issue.null_count.unwrap_or(0))
                .then(b.issue.severity.cmp(&a.issue.severity))
        });
        ranked.truncate(limit);
        ranked
    }

    pub fn summary(&self) -> DictionarySummary {
        DictionarySummary {
            id: self.id.clone(),
            connection_id: self.connection_id.clone(),
            database_name: self.database_name.clone(),
            dialect: self.dialect,
            total_tables: self.total_tables,
            total_columns: self.total_columns,
            generated_at: self.generated_at,
            partial: self.report.partial,
        }
    }
}

/// Lightweight listing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionarySummary {
    pub id: String,
    pub connection_id: String,
    pub database_name: String,
    pub dialect: Dialect,
    pub total_tables: usize,
    pub total_columns: usize,
    pub generated_at: DateTime<Utc>,
    pub partial: bool,
}

// ═══════════════════════════════════════════════════════════════════════
// Chat
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// One turn of caller-owned conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionCategory {
    Schema,
    Relationships,
    Quality,
    Analysis,
    General,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedQuestion {
    pub question: String,
    pub category: QuestionCategory,
}

impl SuggestedQuestion {
    pub fn new(question: impl Into<String>, category: QuestionCategory) -> Self {
        Self {
            question: question.into(),
            category,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, fks: Vec<(&str, &str, &str)>) -> TableMeta {
        TableMeta {
            name: name.to_string(),
            columns: vec![ColumnMeta {
                name: "id".to_string(),
                data_type: DataType::Integer,
                declared_type: "integer".to_string(),
                nullable: false,
                default: None,
            }],
            primary_key: vec!["id".to_string()],
            foreign_keys: fks
                .into_iter()
                .map(|(c, t, rc)| ForeignKey {
                    column: c.to_string(),
                    referenced_table: t.to_string(),
                    referenced_column: rc.to_string(),
                    dangling: false,
                })
                .collect(),
            indexes: vec![],
            row_count: Some(1),
        }
    }

    #[test]
    fn dangling_references_are_flagged_not_dropped() {
        let snapshot = SchemaSnapshot::from_tables(vec![
            table("customers", vec![]),
            table(
                "orders",
                vec![
                    ("customer_id", "customers", "id"),
                    ("region_id", "regions", "id"),
                ],
            ),
        ]);

        let rels = snapshot.relationships();
        assert_eq!(rels.len(), 2);
        assert!(!rels[0].dangling);
        assert!(rels[1].dangling);
        assert_eq!(snapshot.dangling_references().len(), 1);
        assert_eq!(rels[0].edge_label(), "orders.customer_id -> customers.id");
    }

    #[test]
    fn duplicate_table_names_keep_first() {
        let mut second = table("customers", vec![]);
        second.row_count = Some(99);
        let snapshot = SchemaSnapshot::from_tables(vec![table("customers", vec![]), second]);
        assert_eq!(snapshot.total_tables, 1);
        assert_eq!(snapshot.tables[0].row_count, Some(1));
    }

    #[test]
    fn reference_differing_only_in_case_resolves_to_snapshot_spelling() {
        let snapshot = SchemaSnapshot::from_tables(vec![
            table("customers", vec![]),
            table("orders", vec![("customer_id", "Customers", "ID")]),
        ]);

        let fk = &snapshot.tables[1].foreign_keys[0];
        assert!(!fk.dangling);
        assert_eq!(fk.referenced_table, "customers");
        assert_eq!(fk.referenced_column, "id");
        assert!(snapshot.dangling_references().is_empty());
        assert!(snapshot.relationships()[0].touches("customers"));
    }

    #[test]
    fn exact_spelling_wins_over_case_insensitive_match() {
        let snapshot = SchemaSnapshot::from_tables(vec![
            table("Users", vec![]),
            table("users", vec![]),
            table("audit", vec![("user_id", "users", "id")]),
        ]);
        assert_eq!(snapshot.tables[2].foreign_keys[0].referenced_table, "users");
    }

    #[test]
    fn self_reference_is_not_dangling() {
        let snapshot = SchemaSnapshot::from_tables(vec![table(
            "employees",
            vec![("manager_id", "employees", "id")],
        )]);
        assert!(!snapshot.tables[0].foreign_keys[0].dangling);
    }
}
