//! Quality analysis driver.
//!
//! For each table in the snapshot, probes up to `max_columns_per_table`
//! columns through the adapter and hands the results to
//! [`schemadoc_core::quality::score_table`]. Tables are analyzed one after
//! another on the run's single source session.
//!
//! A column probe that errors or exceeds `query_timeout_secs` becomes
//! [`ColumnMetric::Unknown`] and a [`RunIssue`]; the rest of the table is
//! still scored.
//!
//! Non-empty tables with a temporal column also get a [`Freshness`] reading
//! from one full-table `MAX()`, under the same timeout.

use schemadoc_core::models::{
    ColumnMeta, ColumnMetric, Freshness, RunIssue, RunStage, SchemaSnapshot, TableMeta,
    TableQuality,
};
use schemadoc_core::quality::{column_quality, freshness_column, score_table, QualitySettings};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{PipelineError, SourceError};
use crate::progress::{GenerationProgressEvent, GenerationProgressReporter};
use crate::source::SourceAdapter;

#[derive(Debug, Default)]
pub struct Analysis {
    pub quality: BTreeMap<String, TableQuality>,
    pub issues: Vec<RunIssue>,
}

pub async fn analyze_snapshot(
    adapter: &dyn SourceAdapter,
    snapshot: &SchemaSnapshot,
    settings: &QualitySettings,
    connection_id: &str,
    cancel: &CancelToken,
    progress: &dyn GenerationProgressReporter,
) -> Result<Analysis, PipelineError> {
    let mut out = Analysis::default();
    let total = snapshot.tables.len() as u64;

    for (i, table) in snapshot.tables.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled(connection_id.to_string()));
        }
        progress.report(GenerationProgressEvent::Analyzing {
            connection: connection_id.to_string(),
            table: table.name.clone(),
            n: i as u64 + 1,
            total,
        });

        let quality = analyze_table(adapter, table, settings, cancel, &mut out.issues).await;
        tracing::debug!(
            table = %table.name,
            score = quality.overall_quality_score,
            empty = quality.empty,
            "table scored"
        );
        out.quality.insert(table.name.clone(), quality);
    }

    Ok(out)
}

async fn analyze_table(
    adapter: &dyn SourceAdapter,
    table: &TableMeta,
    settings: &QualitySettings,
    cancel: &CancelToken,
    issues: &mut Vec<RunIssue>,
) -> TableQuality {
    let limit = settings.sample_limit(table.row_count);
    let sampled = limit.is_some();
    let budget = Duration::from_secs(settings.query_timeout_secs);
    let mut columns = BTreeMap::new();

    for column in table.columns.iter().take(settings.max_columns_per_table) {
        if cancel.is_cancelled() {
            break;
        }
        let probe = adapter.sample_column_stats(table, column, limit);
        let result = match tokio::time::timeout(budget, probe).await {
            Ok(r) => r,
            Err(_) => Err(SourceError::SamplingTimeout {
                table: table.name.clone(),
                column: column.name.clone(),
            }),
        };

        let metric = match result {
            Ok(stats) => ColumnMetric::Measured(column_quality(&stats, sampled)),
            Err(e) => {
                tracing::warn!(table = %table.name, column = %column.name, error = %e, "column metrics unknown");
                issues.push(RunIssue {
                    stage: RunStage::Sampling,
                    table: table.name.clone(),
                    column: Some(column.name.clone()),
                    category: e.category().to_string(),
                    message: e.to_string(),
                });
                ColumnMetric::Unknown {
                    reason: e.to_string(),
                }
            }
        };
        columns.insert(column.name.clone(), metric);
    }

    let mut quality = score_table(table, table.row_count, sampled, columns, settings);
    if !quality.empty && !cancel.is_cancelled() {
        if let Some(column) = freshness_column(table) {
            quality.freshness = read_freshness(adapter, table, column, budget, issues).await;
        }
    }
    quality
}

async fn read_freshness(
    adapter: &dyn SourceAdapter,
    table: &TableMeta,
    column: &ColumnMeta,
    budget: Duration,
    issues: &mut Vec<RunIssue>,
) -> Option<Freshness> {
    let result = match tokio::time::timeout(budget, adapter.latest_value(table, column)).await {
        Ok(r) => r,
        Err(_) => Err(SourceError::SamplingTimeout {
            table: table.name.clone(),
            column: column.name.clone(),
        }),
    };
    match result {
        Ok(latest) => Some(Freshness {
            column: column.name.clone(),
            latest,
        }),
        Err(e) => {
            tracing::warn!(table = %table.name, column = %column.name, error = %e, "freshness unknown");
            issues.push(RunIssue {
                stage: RunStage::Sampling,
                table: table.name.clone(),
                column: Some(column.name.clone()),
                category: e.category().to_string(),
                message: e.to_string(),
            });
            None
        }
    }
}
