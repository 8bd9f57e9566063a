//! Generation progress reporting.
//!
//! Reports observable progress during `schemadoc generate` so users see which
//! stage is running and how many tables are left. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for a generation run.
#[derive(Clone, Debug, PartialEq)]
pub enum GenerationProgressEvent {
    /// Introspecting table `n` of `total`.
    Extracting {
        connection: String,
        table: String,
        n: u64,
        total: u64,
    },
    /// Sampling quality metrics for table `n` of `total`.
    Analyzing {
        connection: String,
        table: String,
        n: u64,
        total: u64,
    },
    /// `n` of `total` table descriptions finished.
    Describing {
        connection: String,
        n: u64,
        total: u64,
    },
    /// The dictionary was stored.
    Saved {
        connection: String,
        dictionary_id: String,
        partial: bool,
    },
}

/// Reports generation progress. Implementations write to stderr (human or JSON).
pub trait GenerationProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the generation pipeline.
    fn report(&self, event: GenerationProgressEvent);
}

/// Human-friendly progress on stderr: "generate shop  analyzing  3 / 12 tables (orders)".
pub struct StderrProgress;

impl GenerationProgressReporter for StderrProgress {
    fn report(&self, event: GenerationProgressEvent) {
        let line = match &event {
            GenerationProgressEvent::Extracting {
                connection,
                table,
                n,
                total,
            } => format!(
                "generate {}  extracting  {} / {} tables ({})\n",
                connection,
                format_number(*n),
                format_number(*total),
                table
            ),
            GenerationProgressEvent::Analyzing {
                connection,
                table,
                n,
                total,
            } => format!(
                "generate {}  analyzing  {} / {} tables ({})\n",
                connection,
                format_number(*n),
                format_number(*total),
                table
            ),
            GenerationProgressEvent::Describing {
                connection,
                n,
                total,
            } => format!(
                "generate {}  describing  {} / {} tables\n",
                connection,
                format_number(*n),
                format_number(*total)
            ),
            GenerationProgressEvent::Saved {
                connection,
                dictionary_id,
                partial,
            } => format!(
                "generate {}  saved {}{}\n",
                connection,
                dictionary_id,
                if *partial { " (partial)" } else { "" }
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &GenerationProgressEvent) -> serde_json::Value {
        match event {
            GenerationProgressEvent::Extracting {
                connection,
                table,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "connection": connection,
                "phase": "extracting",
                "table": table,
                "n": n,
                "total": total
            }),
            GenerationProgressEvent::Analyzing {
                connection,
                table,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "connection": connection,
                "phase": "analyzing",
                "table": table,
                "n": n,
                "total": total
            }),
            GenerationProgressEvent::Describing {
                connection,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "connection": connection,
                "phase": "describing",
                "n": n,
                "total": total
            }),
            GenerationProgressEvent::Saved {
                connection,
                dictionary_id,
                partial,
            } => serde_json::json!({
                "event": "saved",
                "connection": connection,
                "dictionary_id": dictionary_id,
                "partial": partial
            }),
        }
    }
}

impl GenerationProgressReporter for JsonProgress {
    fn report(&self, event: GenerationProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl GenerationProgressReporter for NoProgress {
    fn report(&self, _event: GenerationProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn GenerationProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
