//! CLI command bodies.
//!
//! Each `run_*` function backs one `schemadoc` subcommand: it wires
//! [`Services`] from the config, calls into the library and prints a plain
//! text rendering to stdout. The HTTP server calls the same library
//! functions and returns JSON instead.

use anyhow::{bail, Context, Result};
use schemadoc_core::export::{render, ExportFormat};
use schemadoc_core::models::{Dictionary, GenerationOptions};
use std::path::Path;

use crate::chat::ChatQuery;
use crate::config::Config;
use crate::pipeline::GenerateRequest;
use crate::progress::ProgressMode;
use crate::services::Services;
use crate::source::{self, AdapterSettings, ConfigResolver, ConnectionResolver};

/// `schemadoc connections`: configured connections without credentials.
pub fn list_connections(config: &Config) {
    if config.connections.is_empty() {
        println!("No connections configured.");
        return;
    }
    println!("{:<20} {:<10} TARGET", "CONNECTION", "DIALECT");
    for (id, conn) in &config.connections {
        let target = match (&conn.path, &conn.host) {
            (Some(path), _) => path.display().to_string(),
            (None, Some(host)) => format!(
                "{}:{}/{}",
                host,
                conn.port.map(|p| p.to_string()).unwrap_or_default(),
                conn.database.as_deref().unwrap_or("")
            ),
            (None, None) => "-".to_string(),
        };
        println!("{:<20} {:<10} {}", id, conn.dialect, target);
    }
}

/// `schemadoc test-connection <id>`.
pub async fn run_test_connection(config: &Config, id: &str) -> Result<()> {
    let resolver = ConfigResolver::new(config);
    let Some(params) = resolver.resolve(id) else {
        bail!("connection not found: {}", id);
    };
    let check = source::test_connection(&params, &AdapterSettings::from(&config.extraction)).await;
    if !check.success {
        bail!("connection test failed: {}", check.message);
    }
    println!("{}", check.message);
    if let Some(version) = &check.server_version {
        println!("server version: {}", version);
    }
    Ok(())
}

/// `schemadoc generate <id>`. Ctrl-C cancels the run; nothing is saved.
pub async fn run_generate(
    config: &Config,
    id: &str,
    options: GenerationOptions,
    mode: ProgressMode,
) -> Result<()> {
    let services = Services::from_config(config).await?;
    let request = GenerateRequest {
        connection_id: id.to_string(),
        options,
    };
    let reporter = mode.reporter();

    let run = services.pipeline.generate(&request, reporter.as_ref());
    tokio::pin!(run);
    let dictionary = tokio::select! {
        result = &mut run => result?,
        _ = tokio::signal::ctrl_c() => {
            services.pipeline.cancel(id);
            run.await?
        }
    };

    println!(
        "Generated dictionary {} for {} ({} tables, {} columns)",
        dictionary.id, dictionary.database_name, dictionary.total_tables, dictionary.total_columns
    );
    if dictionary.report.partial {
        println!(
            "Partial result: {} issue(s) recorded. Run `schemadoc show {}` for details.",
            dictionary.report.issues.len(),
            dictionary.id
        );
    }
    Ok(())
}

/// `schemadoc list [--connection <id>]`.
pub async fn run_list(config: &Config, connection: Option<&str>) -> Result<()> {
    let services = Services::from_config(config).await?;
    let rows = services.store.list(connection).await?;
    if rows.is_empty() {
        println!("No dictionaries.");
        return Ok(());
    }
    println!(
        "{:<38} {:<16} {:<8} {:>6} {:>8}  GENERATED",
        "ID", "CONNECTION", "DIALECT", "TABLES", "COLUMNS"
    );
    for row in rows {
        println!(
            "{:<38} {:<16} {:<8} {:>6} {:>8}  {}{}",
            row.id,
            row.connection_id,
            row.dialect,
            row.total_tables,
            row.total_columns,
            row.generated_at.format("%Y-%m-%d %H:%M:%S"),
            if row.partial { " (partial)" } else { "" }
        );
    }
    Ok(())
}

async fn load(services: &Services, id: &str) -> Result<Dictionary> {
    services
        .store
        .get(id)
        .await?
        .with_context(|| format!("dictionary not found: {}", id))
}

/// `schemadoc show <id>`: tables, scores, descriptions and run issues.
pub async fn run_show(config: &Config, id: &str) -> Result<()> {
    let services = Services::from_config(config).await?;
    let d = load(&services, id).await?;

    println!("Dictionary:  {}", d.id);
    println!("Connection:  {} ({})", d.connection_id, d.dialect);
    println!("Database:    {}", d.database_name);
    println!("Generated:   {}", d.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Tables:      {} ({} columns)", d.total_tables, d.total_columns);
    println!("Fingerprint: {}", d.fingerprint);
    println!();

    for table in &d.metadata.tables {
        let rows = table
            .row_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "?".to_string());
        let score = d
            .quality_for(&table.name)
            .map(|q| {
                if q.scored {
                    format!("  quality {:.1}", q.overall_quality_score)
                } else {
                    "  quality not measured".to_string()
                }
            })
            .unwrap_or_default();
        println!(
            "{} ({} rows, {} columns){}",
            table.name,
            rows,
            table.columns.len(),
            score
        );
        if let Some(desc) = d.description_for(&table.name) {
            println!("  {}", desc.table_description);
        }
    }

    let top = d.top_issues(10);
    if !top.is_empty() {
        println!();
        println!("Top quality issues:");
        for ranked in top {
            println!(
                "  [{}] {}: {}",
                ranked.issue.severity.as_str(),
                ranked.table,
                ranked.issue.message
            );
        }
    }

    if !d.report.issues.is_empty() {
        println!();
        println!("Run issues:");
        for issue in &d.report.issues {
            let target = match &issue.column {
                Some(c) => format!("{}.{}", issue.table, c),
                None => issue.table.clone(),
            };
            println!("  {:<20} {:<24} {}", issue.category, target, issue.message);
        }
    }
    Ok(())
}

/// `schemadoc export <id> --format <fmt> [--output <file>]`.
pub async fn run_export(
    config: &Config,
    id: &str,
    format: ExportFormat,
    output: Option<&Path>,
) -> Result<()> {
    let services = Services::from_config(config).await?;
    let d = load(&services, id).await?;
    let body = render(&d, format)?;
    match output {
        Some(path) => {
            std::fs::write(path, body)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        None => println!("{}", body),
    }
    Ok(())
}

/// `schemadoc delete <id>`.
pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let services = Services::from_config(config).await?;
    if !services.store.delete(id).await? {
        bail!("dictionary not found: {}", id);
    }
    println!("Deleted dictionary {}", id);
    Ok(())
}

/// `schemadoc chat <id> "<question>"`: one question, no history.
pub async fn run_chat(config: &Config, id: &str, question: &str) -> Result<()> {
    if question.trim().is_empty() {
        bail!("question must not be empty");
    }
    let services = Services::from_config(config).await?;
    let response = services
        .engine
        .answer(&ChatQuery {
            dictionary_id: Some(id.to_string()),
            question: question.to_string(),
            conversation_history: Vec::new(),
        })
        .await?;

    println!("{}", response.answer);
    if !response.unverified_references.is_empty() {
        println!();
        println!(
            "Not found in the dictionary: {}",
            response.unverified_references.join(", ")
        );
    }
    if !response.suggested_questions.is_empty() {
        println!();
        println!("You could also ask:");
        for s in &response.suggested_questions {
            println!("  - {}", s.question);
        }
    }
    Ok(())
}

/// `schemadoc suggest <id>`.
pub async fn run_suggest(config: &Config, id: &str) -> Result<()> {
    let services = Services::from_config(config).await?;
    for s in services.engine.suggestions(id).await? {
        println!("{:<14} {}", format!("[{:?}]", s.category).to_lowercase(), s.question);
    }
    Ok(())
}
