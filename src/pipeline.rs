//! Generation pipeline orchestration.
//!
//! Coordinates one full run for a connection: connect → extract → analyze →
//! describe → assemble → save. Local failures collected by each stage end up
//! in the dictionary's [`GenerationReport`]; only the fatal categories of
//! [`PipelineError`] abort a run.
//!
//! At most one run per connection is in flight. A second request for the
//! same connection is rejected with [`PipelineError::AlreadyRunning`]; runs
//! for different connections proceed independently. [`Pipeline::cancel`]
//! flips the run's [`CancelToken`]; a cancelled run saves nothing.
//!
//! The outcome of the latest run per connection is kept in memory as a
//! [`GenerationStatus`], so callers that started a run in the background
//! can learn whether it succeeded and why it did not.

use schemadoc_core::assemble::{assemble_now, DictionaryParts};
use schemadoc_core::models::{Dictionary, GenerationOptions, GenerationReport};
use schemadoc_core::quality::QualitySettings;
use schemadoc_core::store::DictionaryStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::analyze::analyze_snapshot;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::describe::{collect_samples, describe_all, DescribeSettings};
use crate::error::PipelineError;
use crate::extract::extract_schema;
use crate::llm::TextProvider;
use crate::progress::{GenerationProgressEvent, GenerationProgressReporter};
use crate::source::{self, AdapterSettings, ConnectionResolver, SourceAdapter};

/// Trigger for one run.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    pub connection_id: String,
    #[serde(flatten, default)]
    pub options: GenerationOptions,
}

/// Lifecycle of the latest run for one connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationStatus {
    /// No run since the process started.
    Idle,
    Running {
        started_at: DateTime<Utc>,
    },
    Succeeded {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        dictionary_id: String,
        partial: bool,
    },
    Failed {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        /// [`PipelineError::category`] of the failure.
        code: String,
        message: String,
    },
}

/// Stage tuning, taken from [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub quality: QualitySettings,
    pub adapter: AdapterSettings,
    pub describe: DescribeSettings,
    /// Rows quoted per table when sample data is enabled.
    pub prompt_sample_rows: u32,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            quality: config.quality.clone(),
            adapter: AdapterSettings::from(&config.extraction),
            describe: DescribeSettings {
                concurrency: config.generation.describe_concurrency,
                max_tokens: config.llm.max_tokens,
            },
            prompt_sample_rows: config.generation.sample_rows,
        }
    }
}

pub struct Pipeline {
    resolver: Arc<dyn ConnectionResolver>,
    store: Arc<dyn DictionaryStore>,
    provider: Arc<dyn TextProvider>,
    settings: PipelineSettings,
    inflight: Mutex<HashMap<String, CancelToken>>,
    last_runs: Mutex<HashMap<String, GenerationStatus>>,
}

/// Removes the connection's in-flight entry when the run ends, however it ends.
struct InFlight<'a> {
    pipeline: &'a Pipeline,
    connection_id: String,
    cancel: CancelToken,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut map = self
            .pipeline
            .inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        map.remove(&self.connection_id);
    }
}

impl Pipeline {
    pub fn new(
        resolver: Arc<dyn ConnectionResolver>,
        store: Arc<dyn DictionaryStore>,
        provider: Arc<dyn TextProvider>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            resolver,
            store,
            provider,
            settings,
            inflight: Mutex::new(HashMap::new()),
            last_runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn DictionaryStore> {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<dyn ConnectionResolver> {
        &self.resolver
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn is_running(&self, connection_id: &str) -> bool {
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(connection_id)
    }

    /// Status of the latest run for `connection_id`.
    pub fn status(&self, connection_id: &str) -> GenerationStatus {
        self.last_runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(connection_id)
            .cloned()
            .unwrap_or(GenerationStatus::Idle)
    }

    fn record(&self, connection_id: &str, status: GenerationStatus) {
        self.last_runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(connection_id.to_string(), status);
    }

    /// Request cooperative cancellation. Returns `false` when nothing is
    /// running for `connection_id`.
    pub fn cancel(&self, connection_id: &str) -> bool {
        let map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        match map.get(connection_id) {
            Some(token) => {
                tracing::info!(connection = connection_id, "cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn begin(&self, connection_id: &str) -> Result<InFlight<'_>, PipelineError> {
        let mut map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        if map.contains_key(connection_id) {
            return Err(PipelineError::AlreadyRunning(connection_id.to_string()));
        }
        let cancel = CancelToken::new();
        map.insert(connection_id.to_string(), cancel.clone());
        Ok(InFlight {
            pipeline: self,
            connection_id: connection_id.to_string(),
            cancel,
        })
    }

    /// Run a full generation and store the resulting dictionary.
    ///
    /// Once the run is admitted its outcome is recorded for
    /// [`Pipeline::status`]; lookups and in-flight rejections are not.
    pub async fn generate(
        &self,
        request: &GenerateRequest,
        progress: &dyn GenerationProgressReporter,
    ) -> Result<Dictionary, PipelineError> {
        let connection_id = request.connection_id.as_str();
        let params = self
            .resolver
            .resolve(connection_id)
            .ok_or_else(|| PipelineError::ConnectionNotFound(connection_id.to_string()))?;
        let guard = self.begin(connection_id)?;
        let started_at = Utc::now();
        self.record(connection_id, GenerationStatus::Running { started_at });

        let outcome = self.run(&params, request.options, &guard.cancel, progress).await;
        let status = match &outcome {
            Ok(dictionary) => GenerationStatus::Succeeded {
                started_at,
                finished_at: Utc::now(),
                dictionary_id: dictionary.id.clone(),
                partial: dictionary.report.partial,
            },
            Err(e) => {
                tracing::warn!(connection = connection_id, error = %e, "generation failed");
                GenerationStatus::Failed {
                    started_at,
                    finished_at: Utc::now(),
                    code: e.category().to_string(),
                    message: e.to_string(),
                }
            }
        };
        // recorded before the in-flight entry goes away
        self.record(connection_id, status);
        drop(guard);
        outcome
    }

    async fn run(
        &self,
        params: &source::ConnectionParams,
        options: GenerationOptions,
        cancel: &CancelToken,
        progress: &dyn GenerationProgressReporter,
    ) -> Result<Dictionary, PipelineError> {
        let connection_id = params.id.as_str();
        tracing::info!(connection = connection_id, dialect = %params.dialect, "generation started");
        let adapter = source::connect(params, &self.settings.adapter)
            .await
            .map_err(PipelineError::Connection)?;

        let result = self
            .run_stages(adapter.as_ref(), connection_id, options, cancel, progress)
            .await;
        adapter.close().await;
        let parts = result?;

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled(connection_id.to_string()));
        }

        let dictionary = assemble_now(parts);
        self.store
            .save(&dictionary)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;

        tracing::info!(
            connection = connection_id,
            dictionary = %dictionary.id,
            tables = dictionary.total_tables,
            partial = dictionary.report.partial,
            "dictionary saved"
        );
        progress.report(GenerationProgressEvent::Saved {
            connection: connection_id.to_string(),
            dictionary_id: dictionary.id.clone(),
            partial: dictionary.report.partial,
        });
        Ok(dictionary)
    }

    async fn run_stages(
        &self,
        adapter: &dyn SourceAdapter,
        connection_id: &str,
        options: GenerationOptions,
        cancel: &CancelToken,
        progress: &dyn GenerationProgressReporter,
    ) -> Result<DictionaryParts, PipelineError> {
        let mut options = options;
        let extraction = extract_schema(adapter, connection_id, cancel, progress).await?;
        let snapshot = extraction.snapshot;
        let mut issues = extraction.issues;

        let quality = if options.include_quality_analysis {
            let analysis = analyze_snapshot(
                adapter,
                &snapshot,
                &self.settings.quality,
                connection_id,
                cancel,
                progress,
            )
            .await?;
            issues.extend(analysis.issues);
            Some(analysis.quality)
        } else {
            None
        };

        if options.include_ai_descriptions && self.provider.name() == "disabled" {
            tracing::warn!(
                connection = connection_id,
                "AI descriptions requested but no provider is configured; skipping"
            );
            options.include_ai_descriptions = false;
        }

        let descriptions = if options.include_ai_descriptions {
            let samples = if options.include_sample_data {
                collect_samples(adapter, &snapshot, self.settings.prompt_sample_rows, cancel).await
            } else {
                HashMap::new()
            };
            let shared = Arc::new(snapshot.clone());
            let described = describe_all(
                self.provider.clone(),
                shared,
                samples,
                &self.settings.describe,
                connection_id,
                cancel,
                progress,
            )
            .await?;
            issues.extend(described.issues);
            Some(described.descriptions)
        } else {
            None
        };

        Ok(DictionaryParts {
            connection_id: connection_id.to_string(),
            database_name: adapter.database_name().to_string(),
            dialect: adapter.dialect(),
            snapshot,
            quality,
            descriptions,
            report: GenerationReport {
                options,
                partial: !issues.is_empty(),
                issues,
            },
        })
    }
}
