//! Export transforms.
//!
//! Stateless renderers over a finished [`Dictionary`]. JSON output has stable
//! key order (struct field order, sorted maps); Markdown output has one
//! section per table with a column table, followed by the relationship list.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;

use crate::models::{Dictionary, GenerationReport, SchemaSnapshot, TableDescription, TableQuality};
use crate::types::Dialect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "md",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Markdown => "text/markdown; charset=utf-8",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            other => Err(format!(
                "unknown export format '{}': expected json or markdown",
                other
            )),
        }
    }
}

#[derive(Serialize)]
struct ExportDatabase<'a> {
    id: &'a str,
    name: &'a str,
    dialect: Dialect,
    connection_id: &'a str,
    generated_at: DateTime<Utc>,
    fingerprint: &'a str,
}

#[derive(Serialize)]
struct ExportSummary {
    total_tables: usize,
    total_columns: usize,
    total_relationships: usize,
    partial: bool,
}

#[derive(Serialize)]
struct ExportDocument<'a> {
    database: ExportDatabase<'a>,
    summary: ExportSummary,
    metadata: &'a SchemaSnapshot,
    ai_descriptions: Option<&'a BTreeMap<String, TableDescription>>,
    quality_metrics: Option<&'a BTreeMap<String, TableQuality>>,
    report: &'a GenerationReport,
}

/// Render `dictionary` in `format`.
pub fn render(dictionary: &Dictionary, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => to_json(dictionary),
        ExportFormat::Markdown => Ok(to_markdown(dictionary)),
    }
}

pub fn to_json(dictionary: &Dictionary) -> Result<String> {
    let doc = ExportDocument {
        database: ExportDatabase {
            id: &dictionary.id,
            name: &dictionary.database_name,
            dialect: dictionary.dialect,
            connection_id: &dictionary.connection_id,
            generated_at: dictionary.generated_at,
            fingerprint: &dictionary.fingerprint,
        },
        summary: ExportSummary {
            total_tables: dictionary.total_tables,
            total_columns: dictionary.total_columns,
            total_relationships: dictionary.metadata.relationships().len(),
            partial: dictionary.report.partial,
        },
        metadata: &dictionary.metadata,
        ai_descriptions: dictionary.ai_descriptions.as_ref(),
        quality_metrics: dictionary.quality_metrics.as_ref(),
        report: &dictionary.report,
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

pub fn to_markdown(dictionary: &Dictionary) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Data Dictionary: {}\n", dictionary.database_name);
    let _ = writeln!(md, "- **Dialect:** {}", dictionary.dialect);
    let _ = writeln!(md, "- **Tables:** {}", dictionary.total_tables);
    let _ = writeln!(md, "- **Columns:** {}", dictionary.total_columns);
    let _ = writeln!(
        md,
        "- **Generated:** {}",
        dictionary.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if dictionary.report.partial {
        let _ = writeln!(
            md,
            "- **Partial:** {} item(s) skipped, see the run report below",
            dictionary.report.issues.len()
        );
    }
    md.push_str("\n---\n\n");

    for table in &dictionary.metadata.tables {
        let description = dictionary.description_for(&table.name);
        let _ = writeln!(md, "## Table: `{}`\n", table.name);
        match description {
            Some(d) if !d.table_description.is_empty() => {
                let _ = writeln!(md, "{}\n", d.table_description);
                if let Some(ctx) = &d.business_context {
                    let _ = writeln!(md, "**Business context:** {}\n", ctx);
                }
                if let Some(notes) = &d.usage_notes {
                    let _ = writeln!(md, "**Usage notes:** {}\n", notes);
                }
            }
            _ => md.push_str("_No description available._\n\n"),
        }
        let _ = writeln!(
            md,
            "**Row count:** {}\n",
            table
                .row_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "N/A".to_string())
        );

        md.push_str("| Column | Type | Nullable | Default | Key | Description |\n");
        md.push_str("|--------|------|----------|---------|-----|-------------|\n");
        for col in &table.columns {
            let key = if table.is_primary_key(&col.name) {
                "PK"
            } else if table.is_foreign_key(&col.name) {
                "FK"
            } else {
                ""
            };
            let text = description
                .and_then(|d| d.columns.get(&col.name))
                .map(|s| cell(s))
                .unwrap_or_default();
            let _ = writeln!(
                md,
                "| {} | {} | {} | {} | {} | {} |",
                col.name,
                cell(&col.declared_type),
                if col.nullable { "yes" } else { "no" },
                col.default.as_deref().map(cell).unwrap_or_default(),
                key,
                text
            );
        }
        md.push('\n');

        if !table.foreign_keys.is_empty() {
            md.push_str("### Foreign keys\n\n");
            for fk in &table.foreign_keys {
                let _ = writeln!(
                    md,
                    "- `{}` -> `{}.{}`{}",
                    fk.column,
                    fk.referenced_table,
                    fk.referenced_column,
                    if fk.dangling { " (outside snapshot)" } else { "" }
                );
            }
            md.push('\n');
        }

        if !table.indexes.is_empty() {
            md.push_str("### Indexes\n\n");
            for idx in &table.indexes {
                let _ = writeln!(md, "- `{}`", idx);
            }
            md.push('\n');
        }

        if let Some(q) = dictionary.quality_for(&table.name) {
            md.push_str("### Data quality\n\n");
            if q.scored {
                let _ = writeln!(md, "- **Overall score:** {}%", q.overall_quality_score);
                let _ = writeln!(md, "- **Completeness:** {}%", q.completeness);
                let _ = writeln!(md, "- **Uniqueness:** {}%", q.uniqueness);
            } else {
                md.push_str("- **Overall score:** not measured\n");
            }
            if let Some(f) = &q.freshness {
                let _ = writeln!(
                    md,
                    "- **Latest `{}`:** {}",
                    f.column,
                    f.latest.as_deref().unwrap_or("none")
                );
            }
            if q.empty {
                md.push_str("- **Empty table**\n");
            } else if q.sampled {
                let _ = writeln!(md, "- **Sampled:** yes ({} rows counted)", q.total_rows);
            }
            md.push('\n');
            if !q.issues.is_empty() {
                md.push_str("#### Issues\n\n");
                for issue in q.top_issues() {
                    let _ = writeln!(
                        md,
                        "- **{}**: {}",
                        issue.severity.as_str().to_uppercase(),
                        issue.message
                    );
                }
                md.push('\n');
            }
        }
        md.push_str("---\n\n");
    }

    let relationships = dictionary.metadata.relationships();
    if !relationships.is_empty() {
        md.push_str("## Relationships\n\n");
        md.push_str("| From Table | From Column | To Table | To Column |\n");
        md.push_str("|------------|-------------|----------|-----------|\n");
        for rel in relationships {
            let _ = writeln!(
                md,
                "| {} | {} | {} | {} |",
                rel.from_table, rel.from_column, rel.to_table, rel.to_column
            );
        }
        md.push('\n');
    }

    if !dictionary.report.issues.is_empty() {
        md.push_str("## Run report\n\n");
        for issue in &dictionary.report.issues {
            let target = match &issue.column {
                Some(c) => format!("{}.{}", issue.table, c),
                None => issue.table.clone(),
            };
            let _ = writeln!(md, "- `{}` ({}): {}", target, issue.category, issue.message);
        }
        md.push('\n');
    }

    md
}
