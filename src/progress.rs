//! Sync progress reporting.
//!
//! Reports which pipeline phase a `plansync sync` run is in and how many
//! leaf files it is working through. Progress is emitted on **stderr** so
//! stdout stays parseable for the report.

use serde::Serialize;
use std::fmt;
use std::io::Write;

/// Phase of the sync pipeline.
///
/// `Idle → Discovering? → Scanning → Filtering? → Detecting → Resolving →
/// Applying → Committed | RolledBack`. Dry runs stop after `Resolving`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Discovering,
    Scanning,
    Filtering,
    Detecting,
    Resolving,
    Applying,
    Committed,
    RolledBack,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Discovering => "discovering",
            SyncPhase::Scanning => "scanning",
            SyncPhase::Filtering => "filtering",
            SyncPhase::Detecting => "detecting",
            SyncPhase::Resolving => "resolving",
            SyncPhase::Applying => "applying",
            SyncPhase::Committed => "committed",
            SyncPhase::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// A single progress event for sync.
#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    /// The pipeline entered a new phase.
    Phase(SyncPhase),
    /// Leaf files found on disk and how many survive the incremental filter.
    Files { scanned: u64, processed: u64 },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the sync engine.
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync  scanning...".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Phase(phase) => format!("sync  {}...\n", phase),
            SyncProgressEvent::Files { scanned, processed } => format!(
                "sync  {} / {} files to process\n",
                format_number(*processed),
                format_number(*scanned)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Phase(phase) => serde_json::json!({
                "event": "progress",
                "phase": phase,
            }),
            SyncProgressEvent::Files { scanned, processed } => serde_json::json!({
                "event": "progress",
                "phase": "files",
                "scanned": scanned,
                "processed": processed
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
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

    /// Build a reporter for this mode. Caller passes it to the engine.
    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn phase_serializes_snake_case() {
        let v = serde_json::to_value(SyncPhase::RolledBack).unwrap();
        assert_eq!(v, serde_json::json!("rolled_back"));
        assert_eq!(SyncPhase::Discovering.to_string(), "discovering");
    }
}
