//! # schemadoc CLI
//!
//! The `schemadoc` binary generates data dictionaries for configured
//! database connections, manages the stored dictionaries, and answers
//! questions grounded in them.
//!
//! ## Usage
//!
//! ```bash
//! schemadoc --config ./config/schemadoc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `schemadoc init` | Create the dictionary store |
//! | `schemadoc connections` | List configured connections |
//! | `schemadoc test-connection <id>` | Connect and count tables |
//! | `schemadoc generate <id>` | Run a generation for a connection |
//! | `schemadoc list` | List stored dictionaries, newest first |
//! | `schemadoc show <id>` | Print one dictionary |
//! | `schemadoc export <id> --format json\|markdown` | Export a dictionary |
//! | `schemadoc delete <id>` | Delete a dictionary |
//! | `schemadoc chat <id> "<question>"` | Ask a question about a dictionary |
//! | `schemadoc suggest <id>` | Starter questions for a dictionary |
//! | `schemadoc serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! # Describe the `shop` connection with quality analysis and sample rows
//! schemadoc generate shop --sample-data
//!
//! # Markdown export to a file
//! schemadoc export 3f0c... --format markdown --output shop.md
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use schemadoc::progress::ProgressMode;
use schemadoc::{commands, config, migrate, server};
use schemadoc_core::export::ExportFormat;
use schemadoc_core::models::GenerationOptions;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// schemadoc: data dictionaries for relational databases, with
/// quality metrics, generated descriptions and grounded chat.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/schemadoc.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "schemadoc",
    about = "Data dictionary generation and grounded schema chat",
    version,
    long_about = "schemadoc extracts the schema of a PostgreSQL, MySQL or SQLite database, \
    measures per-table data quality, asks a generative provider to describe each table, \
    stores the combined data dictionary, and answers questions about it using only \
    facts from the dictionary."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/schemadoc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the dictionary store. Safe to run more than once.
    Init,

    /// List configured connections.
    Connections,

    /// Connect to a configured database, read its version and count tables.
    TestConnection {
        /// Connection id (`[connections.<id>]`).
        id: String,
    },

    /// Generate a data dictionary for a connection.
    ///
    /// Extracts the schema, analyzes quality, describes every table with the
    /// configured provider and stores the result. Tables that fail are
    /// recorded in the dictionary's report instead of aborting the run.
    Generate {
        /// Connection id (`[connections.<id>]`).
        id: String,

        /// Skip generated descriptions.
        #[arg(long)]
        no_ai: bool,

        /// Skip quality analysis.
        #[arg(long)]
        no_quality: bool,

        /// Quote a few sample rows per table in the description prompts.
        #[arg(long)]
        sample_data: bool,

        /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// List stored dictionaries, newest first.
    List {
        /// Only dictionaries of this connection.
        #[arg(long)]
        connection: Option<String>,
    },

    /// Print a stored dictionary.
    Show {
        /// Dictionary id.
        id: String,
    },

    /// Export a stored dictionary.
    Export {
        /// Dictionary id.
        id: String,

        /// `json` or `markdown`.
        #[arg(long, default_value = "json")]
        format: String,

        /// Write to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Delete a stored dictionary.
    Delete {
        /// Dictionary id.
        id: String,
    },

    /// Ask one question about a stored dictionary.
    Chat {
        /// Dictionary id.
        id: String,

        /// The question.
        question: String,
    },

    /// Print starter questions for a stored dictionary.
    Suggest {
        /// Dictionary id.
        id: String,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Human,
    Json,
    Off,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
            ProgressArg::Off => ProgressMode::Off,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Dictionary store initialized at {}", cfg.store.path.display());
        }
        Commands::Connections => {
            commands::list_connections(&cfg);
        }
        Commands::TestConnection { id } => {
            commands::run_test_connection(&cfg, &id).await?;
        }
        Commands::Generate {
            id,
            no_ai,
            no_quality,
            sample_data,
            progress,
        } => {
            let options = GenerationOptions {
                include_ai_descriptions: !no_ai,
                include_quality_analysis: !no_quality,
                include_sample_data: sample_data,
            };
            let mode = progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty);
            commands::run_generate(&cfg, &id, options, mode).await?;
        }
        Commands::List { connection } => {
            commands::run_list(&cfg, connection.as_deref()).await?;
        }
        Commands::Show { id } => {
            commands::run_show(&cfg, &id).await?;
        }
        Commands::Export { id, format, output } => {
            let format: ExportFormat = format.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            commands::run_export(&cfg, &id, format, output.as_deref()).await?;
        }
        Commands::Delete { id } => {
            commands::run_delete(&cfg, &id).await?;
        }
        Commands::Chat { id, question } => {
            commands::run_chat(&cfg, &id, &question).await?;
        }
        Commands::Suggest { id } => {
            commands::run_suggest(&cfg, &id).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
