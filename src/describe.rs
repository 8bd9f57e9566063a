//! Description generation.
//!
//! One provider call per table asks for the table description, business
//! context, usage notes and every column description at once. The prompt is
//! built only from the extracted [`TableMeta`] (plus a few quoted rows when
//! sample data is enabled), and the reply is checked against the snapshot by
//! [`validate_description`] before it is kept.
//!
//! Tables are described concurrently, bounded by a semaphore of
//! `describe_concurrency` permits. A table whose call fails is left without a
//! description and recorded as a [`RunIssue`]; the run carries on.

use schemadoc_core::models::{
    RunIssue, RunStage, SchemaSnapshot, TableDescription, TableMeta,
};
use schemadoc_core::validate::{validate_description, RawDescription};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cancel::CancelToken;
use crate::error::{GenerationError, PipelineError};
use crate::llm::{CompletionRequest, PromptMessage, TextProvider};
use crate::progress::{GenerationProgressEvent, GenerationProgressReporter};
use crate::source::SourceAdapter;

const SYSTEM_PROMPT: &str = "You are a data analyst writing documentation for a database data dictionary. \
Describe only the table and columns given to you. Never mention a table or column that is not listed. \
Keep each description to one to three sentences. \
Reply with a single JSON object of the form \
{\"description\": string, \"business_context\": string, \"usage_notes\": string, \
\"columns\": {\"<column name>\": string}}.";

#[derive(Debug, Clone)]
pub struct DescribeSettings {
    pub concurrency: usize,
    pub max_tokens: u32,
}

#[derive(Debug, Default)]
pub struct Descriptions {
    pub descriptions: BTreeMap<String, TableDescription>,
    pub issues: Vec<RunIssue>,
}

/// Read up to `limit` rows per table for prompt grounding.
///
/// Runs sequentially on the run's source session. Failures only lose the
/// samples for that table.
pub async fn collect_samples(
    adapter: &dyn SourceAdapter,
    snapshot: &SchemaSnapshot,
    limit: u32,
    cancel: &CancelToken,
) -> HashMap<String, Vec<serde_json::Value>> {
    let mut out = HashMap::new();
    for table in &snapshot.tables {
        if cancel.is_cancelled() {
            break;
        }
        match adapter.sample_rows(table, limit).await {
            Ok(rows) => {
                out.insert(table.name.clone(), rows);
            }
            Err(e) => {
                tracing::warn!(table = %table.name, error = %e, "sample rows unavailable");
            }
        }
    }
    out
}

/// Build the prompt for one table.
pub fn build_request(
    table: &TableMeta,
    snapshot: &SchemaSnapshot,
    samples: &[serde_json::Value],
    max_tokens: u32,
) -> CompletionRequest {
    let columns: Vec<serde_json::Value> = table
        .columns
        .iter()
        .map(|c| {
            serde_json::json!({
                "name": c.name,
                "type": c.declared_type,
                "nullable": c.nullable,
                "primary_key": table.is_primary_key(&c.name),
                "default": c.default,
            })
        })
        .collect();
    let references: Vec<String> = table
        .foreign_keys
        .iter()
        .map(|fk| format!("{} -> {}.{}", fk.column, fk.referenced_table, fk.referenced_column))
        .collect();
    let referenced_by: Vec<String> = snapshot
        .relationships()
        .into_iter()
        .filter(|r| r.to_table == table.name && r.from_table != table.name)
        .map(|r| r.edge_label())
        .collect();

    let mut facts = serde_json::json!({
        "table": table.name,
        "row_count": table.row_count,
        "columns": columns,
        "foreign_keys": references,
        "referenced_by": referenced_by,
    });
    if !samples.is_empty() {
        facts["sample_rows"] = serde_json::Value::Array(samples.to_vec());
    }

    let body = serde_json::to_string_pretty(&facts).unwrap_or_else(|_| facts.to_string());
    CompletionRequest {
        system: SYSTEM_PROMPT.to_string(),
        messages: vec![PromptMessage::user(format!(
            "Document this table:\n\n{}\n",
            body
        ))],
        max_tokens,
    }
}

#[derive(Deserialize)]
struct JsonReply {
    #[serde(default, alias = "table_description")]
    description: String,
    #[serde(default)]
    business_context: Option<String>,
    #[serde(default)]
    usage_notes: Option<String>,
    #[serde(default)]
    columns: BTreeMap<String, String>,
}

/// Parse a provider reply.
///
/// Accepts the requested JSON object (optionally inside a code fence or
/// surrounded by prose) and falls back to `DESCRIPTION:` /
/// `BUSINESS_CONTEXT:` / `USAGE_NOTES:` headings.
pub fn parse_reply(text: &str) -> Result<RawDescription, GenerationError> {
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(reply) = serde_json::from_str::<JsonReply>(&text[start..=end]) {
                if !reply.description.trim().is_empty() {
                    return Ok(RawDescription {
                        table_description: reply.description.trim().to_string(),
                        business_context: reply.business_context,
                        usage_notes: reply.usage_notes,
                        columns: reply.columns,
                    });
                }
            }
        }
    }
    parse_headings(text)
}

fn parse_headings(text: &str) -> Result<RawDescription, GenerationError> {
    let mut sections: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut current: Option<&str> = None;
    for line in text.lines() {
        let trimmed = line.trim();
        let heading = ["DESCRIPTION:", "BUSINESS_CONTEXT:", "USAGE_NOTES:"]
            .into_iter()
            .find(|h| trimmed.starts_with(h));
        match heading {
            Some(h) => {
                current = Some(h);
                sections.entry(h).or_default().push(trimmed[h.len()..].trim());
            }
            None => {
                if let Some(h) = current {
                    sections.entry(h).or_default().push(trimmed);
                }
            }
        }
    }
    let take = |h: &str| {
        sections
            .get(h)
            .map(|lines| lines.join(" ").trim().to_string())
            .filter(|s| !s.is_empty())
    };
    let description = take("DESCRIPTION:")
        .ok_or_else(|| GenerationError::InvalidResponse("no description in reply".into()))?;
    Ok(RawDescription {
        table_description: description,
        business_context: take("BUSINESS_CONTEXT:"),
        usage_notes: take("USAGE_NOTES:"),
        columns: BTreeMap::new(),
    })
}

/// Describe one table and validate the result against the snapshot.
pub async fn describe_table(
    provider: &dyn TextProvider,
    table: &TableMeta,
    snapshot: &SchemaSnapshot,
    samples: &[serde_json::Value],
    max_tokens: u32,
) -> Result<TableDescription, GenerationError> {
    let request = build_request(table, snapshot, samples, max_tokens);
    let reply = provider.complete(&request).await?;
    let raw = parse_reply(&reply)?;
    let described = validate_description(table, snapshot, raw);
    if !described.flagged_references.is_empty() {
        tracing::warn!(
            table = %table.name,
            flagged = ?described.flagged_references,
            "description referenced names outside the schema"
        );
    }
    Ok(described)
}

enum Outcome {
    Described(String, TableDescription),
    Failed(String, GenerationError),
    Skipped,
}

/// Describe every table in `snapshot` with bounded concurrency.
pub async fn describe_all(
    provider: Arc<dyn TextProvider>,
    snapshot: Arc<SchemaSnapshot>,
    samples: HashMap<String, Vec<serde_json::Value>>,
    settings: &DescribeSettings,
    connection_id: &str,
    cancel: &CancelToken,
    progress: &dyn GenerationProgressReporter,
) -> Result<Descriptions, PipelineError> {
    let permits = Arc::new(Semaphore::new(settings.concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for table in snapshot.tables.iter().cloned() {
        let provider = provider.clone();
        let snapshot = snapshot.clone();
        let permits = permits.clone();
        let cancel = cancel.clone();
        let rows = samples.get(&table.name).cloned().unwrap_or_default();
        let max_tokens = settings.max_tokens;

        tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return Outcome::Skipped;
            };
            if cancel.is_cancelled() {
                return Outcome::Skipped;
            }
            match describe_table(provider.as_ref(), &table, &snapshot, &rows, max_tokens).await {
                Ok(d) => Outcome::Described(table.name, d),
                Err(e) => Outcome::Failed(table.name, e),
            }
        });
    }

    let total = snapshot.tables.len() as u64;
    let mut done = 0u64;
    let mut out = Descriptions::default();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Outcome::Described(name, description)) => {
                out.descriptions.insert(name, description);
            }
            Ok(Outcome::Failed(name, e)) => {
                tracing::warn!(table = %name, error = %e, "no description for table");
                out.issues.push(RunIssue {
                    stage: RunStage::Generation,
                    table: name,
                    column: None,
                    category: e.category().to_string(),
                    message: e.to_string(),
                });
            }
            Ok(Outcome::Skipped) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "description task failed");
                continue;
            }
        }
        done += 1;
        progress.report(GenerationProgressEvent::Describing {
            connection: connection_id.to_string(),
            n: done,
            total,
        });
    }

    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled(connection_id.to_string()));
    }

    // A task that died without reporting still leaves its table undescribed.
    for table in &snapshot.tables {
        let reported = out.descriptions.contains_key(&table.name)
            || out.issues.iter().any(|i| i.table == table.name);
        if !reported {
            out.issues.push(RunIssue {
                stage: RunStage::Generation,
                table: table.name.clone(),
                column: None,
                category: "generation_error".to_string(),
                message: "description task did not complete".to_string(),
            });
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use async_trait::async_trait;
    use schemadoc_core::models::{ColumnMeta, ForeignKey};
    use schemadoc_core::types::DataType;

    fn col(name: &str) -> ColumnMeta {
        ColumnMeta {
            name: name.into(),
            data_type: DataType::Integer,
            declared_type: "integer".into(),
            nullable: false,
            default: None,
        }
    }

    fn snapshot() -> SchemaSnapshot {
        SchemaSnapshot::from_tables(vec![
            TableMeta {
                name: "customers".into(),
                columns: vec![col("id"), col("email")],
                primary_key: vec!["id".into()],
                foreign_keys: vec![],
                indexes: vec![],
                row_count: Some(10),
            },
            TableMeta {
                name: "orders".into(),
                columns: vec![col("id"), col("customer_id")],
                primary_key: vec!["id".into()],
                foreign_keys: vec![ForeignKey {
                    column: "customer_id".into(),
                    referenced_table: "customers".into(),
                    referenced_column: "id".into(),
                    dangling: false,
                }],
                indexes: vec![],
                row_count: Some(20),
            },
            TableMeta {
                name: "products".into(),
                columns: vec![col("id")],
                primary_key: vec!["id".into()],
                foreign_keys: vec![],
                indexes: vec![],
                row_count: Some(5),
            },
        ])
    }

    /// Answers with JSON naming the table, except for `products`.
    struct PerTable;

    #[async_trait]
    impl TextProvider for PerTable {
        fn name(&self) -> &str {
            "per-table"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
            let prompt = &request.messages[0].content;
            if prompt.contains("\"table\": \"products\"") {
                return Err(GenerationError::Exhausted {
                    attempts: 3,
                    last: "timed out".into(),
                });
            }
            Ok(r#"Here you go:
```json
{"description": "Rows of the table.", "columns": {"id": "Identifier.", "ghost": "Not real."}}
```"#
                .to_string())
        }
    }

    #[test]
    fn prompt_is_limited_to_extracted_facts() {
        let snap = snapshot();
        let orders = snap.table("orders").unwrap();
        let req = build_request(orders, &snap, &[], 500);
        let text = &req.messages[0].content;
        assert!(text.contains("customer_id -> customers.id"));
        assert!(!text.contains("sample_rows"));
        assert!(!text.contains("products"));

        let customers = snap.table("customers").unwrap();
        let req = build_request(customers, &snap, &[serde_json::json!({"id": 1})], 500);
        assert!(req.messages[0].content.contains("orders.customer_id -> customers.id"));
        assert!(req.messages[0].content.contains("sample_rows"));
    }

    #[test]
    fn parses_fenced_json_and_heading_fallback() {
        let raw = parse_reply("```json\n{\"description\": \"Customer accounts.\", \"columns\": {\"email\": \"Login.\"}}\n```").unwrap();
        assert_eq!(raw.table_description, "Customer accounts.");
        assert_eq!(raw.columns["email"], "Login.");

        let raw = parse_reply(
            "DESCRIPTION: Customer accounts.\nOne row per signup.\nBUSINESS_CONTEXT: CRM.\nUSAGE_NOTES: Join on id.",
        )
        .unwrap();
        assert_eq!(raw.table_description, "Customer accounts. One row per signup.");
        assert_eq!(raw.business_context.as_deref(), Some("CRM."));
        assert_eq!(raw.usage_notes.as_deref(), Some("Join on id."));

        assert!(parse_reply("I cannot help with that").is_err());
    }

    #[tokio::test]
    async fn failed_table_is_left_out_and_reported() {
        let out = describe_all(
            Arc::new(PerTable),
            Arc::new(snapshot()),
            HashMap::new(),
            &DescribeSettings {
                concurrency: 2,
                max_tokens: 500,
            },
            "shop",
            &CancelToken::new(),
            &NoProgress,
        )
        .await
        .unwrap();

        assert_eq!(
            out.descriptions.keys().collect::<Vec<_>>(),
            vec!["customers", "orders"]
        );
        let customers = &out.descriptions["customers"];
        assert!(customers.columns.contains_key("id"));
        assert!(!customers.columns.contains_key("ghost"));
        assert_eq!(customers.flagged_references, vec!["ghost".to_string()]);

        assert_eq!(out.issues.len(), 1);
        assert_eq!(out.issues[0].table, "products");
        assert_eq!(out.issues[0].category, "provider_exhausted");
    }

    #[tokio::test]
    async fn cancellation_discards_the_stage() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = describe_all(
            Arc::new(PerTable),
            Arc::new(snapshot()),
            HashMap::new(),
            &DescribeSettings {
                concurrency: 1,
                max_tokens: 500,
            },
            "shop",
            &cancel,
            &NoProgress,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled(_)));
    }
}
