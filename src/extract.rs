//! Metadata extraction.
//!
//! Drives one [`SourceAdapter`] over every table it lists and accumulates a
//! [`SchemaSnapshot`]. Tables are described one at a time against the same
//! session. A table that cannot be described is skipped and recorded as a
//! [`RunIssue`]; the run only fails if listing fails or nothing survives.

use schemadoc_core::models::{RunIssue, RunStage, SchemaSnapshot, TableMeta};

use crate::cancel::CancelToken;
use crate::error::{ConnectionFailure, PipelineError, SourceError};
use crate::progress::{GenerationProgressEvent, GenerationProgressReporter};
use crate::source::SourceAdapter;

/// Snapshot plus the per-table failures met along the way.
#[derive(Debug)]
pub struct Extraction {
    pub snapshot: SchemaSnapshot,
    pub issues: Vec<RunIssue>,
}

pub async fn extract_schema(
    adapter: &dyn SourceAdapter,
    connection_id: &str,
    cancel: &CancelToken,
    progress: &dyn GenerationProgressReporter,
) -> Result<Extraction, PipelineError> {
    let names = adapter.list_tables().await.map_err(|e| match e {
        SourceError::Connection { .. } => PipelineError::Connection(e),
        other => PipelineError::Connection(SourceError::connection(
            ConnectionFailure::Network,
            format!("could not list tables: {}", other),
        )),
    })?;

    let total = names.len() as u64;
    let mut tables: Vec<TableMeta> = Vec::with_capacity(names.len());
    let mut issues = Vec::new();

    for (i, name) in names.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled(connection_id.to_string()));
        }
        progress.report(GenerationProgressEvent::Extracting {
            connection: connection_id.to_string(),
            table: name.clone(),
            n: i as u64 + 1,
            total,
        });

        match adapter.describe_table(name).await {
            Ok(meta) => tables.push(meta),
            Err(e) if e.is_fatal() => return Err(PipelineError::Connection(e)),
            Err(e) => {
                tracing::warn!(table = %name, error = %e, "skipping table");
                issues.push(RunIssue {
                    stage: RunStage::Introspection,
                    table: name.clone(),
                    column: None,
                    category: "introspection_error".to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    if tables.is_empty() {
        return Err(PipelineError::NoTablesExtracted {
            skipped: issues.len(),
        });
    }

    let snapshot = SchemaSnapshot::from_tables(tables);
    for edge in snapshot.dangling_references() {
        tracing::info!(edge = %edge.edge_label(), "foreign key points outside the snapshot");
    }
    tracing::info!(
        connection = connection_id,
        tables = snapshot.total_tables,
        skipped = issues.len(),
        "extraction finished"
    );

    Ok(Extraction { snapshot, issues })
}


#[cfg(test)]
mod tests {
    use super::fake::{table, FakeAdapter};
    use super::*;
    use crate::progress::NoProgress;

    #[tokio::test]
    async fn broken_table_is_skipped_and_recorded() {
        let adapter = FakeAdapter {
            tables: vec![table("customers", &[("id", "integer")], &["id"], 3)],
            broken_tables: vec!["audit_log".into()],
            ..Default::default()
        };
        let out = extract_schema(&adapter, "shop", &CancelToken::new(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(out.snapshot.table_names(), vec!["customers"]);
        assert_eq!(out.issues.len(), 1);
        assert_eq!(out.issues[0].table, "audit_log");
        assert_eq!(out.issues[0].category, "introspection_error");
    }

    #[tokio::test]
    async fn zero_surviving_tables_fails_the_run() {
        let adapter = FakeAdapter {
            broken_tables: vec!["a".into(), "b".into()],
            ..Default::default()
        };
        let err = extract_schema(&adapter, "shop", &CancelToken::new(), &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoTablesExtracted { skipped: 2 }));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_describing() {
        let adapter = FakeAdapter {
            tables: vec![table("customers", &[("id", "integer")], &["id"], 3)],
            ..Default::default()
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = extract_schema(&adapter, "shop", &cancel, &NoProgress)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "cancelled");
    }
}
