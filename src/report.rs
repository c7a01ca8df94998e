//! Sync report: the only artifact that outlives a run.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::models::{Conflict, DiscoveryConflict, FileError};
use crate::progress::SyncPhase;
use crate::resolve::Side;

/// A detected conflict and the side that supplied the applied value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictReport {
    #[serde(flatten)]
    pub conflict: Conflict,
    pub resolution: Side,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub dry_run: bool,
    pub conflict_strategy: String,
    pub discovery_strategy: Option<String>,

    pub files_scanned: usize,
    pub files_processed: usize,
    /// Left out by the incremental filter.
    pub files_skipped: usize,

    pub created: usize,
    pub updated: usize,
    /// Only non-zero when cleanup was requested.
    pub deleted: usize,
    /// Matched items whose resolved values equal the stored row.
    pub skipped: usize,
    pub conflicts_resolved: usize,
    pub units_created: usize,
    pub sub_units_created: usize,

    /// Item keys in the store with no leaf file on disk.
    pub orphaned: Vec<String>,
    pub conflicts: Vec<ConflictReport>,
    pub discovery_conflicts: Vec<DiscoveryConflict>,
    /// Hits per item pattern, keyed by pattern label.
    pub pattern_matches: BTreeMap<String, usize>,
    pub errors: Vec<FileError>,
    pub warnings: Vec<String>,
    pub phases: Vec<SyncPhase>,
}

impl SyncReport {
    /// Whether the run wrote, or in a dry run would write, anything.
    pub fn has_changes(&self) -> bool {
        self.created + self.updated + self.deleted + self.units_created + self.sub_units_created
            > 0
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Multi-line human summary.
    pub fn render_text(&self) -> String {
        let mut out = String::new();

        if self.dry_run {
            out.push_str("DRY-RUN MODE: No changes will be made\n\n");
        }

        out.push_str("Sync Summary:\n");
        let _ = writeln!(out, "  Files scanned:      {}", self.files_scanned);
        if self.files_skipped > 0 {
            let _ = writeln!(out, "  Files unchanged:    {}", self.files_skipped);
        }
        let _ = writeln!(out, "  Items created:      {}", self.created);
        let _ = writeln!(out, "  Items updated:      {}", self.updated);
        let _ = writeln!(out, "  Items skipped:      {}", self.skipped);
        let _ = writeln!(out, "  Conflicts resolved: {}", self.conflicts_resolved);
        if self.deleted > 0 {
            let _ = writeln!(out, "  Items deleted:      {}", self.deleted);
        }
        if self.units_created + self.sub_units_created > 0 {
            let _ = writeln!(
                out,
                "  Parents created:    {} units, {} sub-units",
                self.units_created, self.sub_units_created
            );
        }
        let _ = writeln!(out, "  Warnings:           {}", self.warnings.len());
        let _ = writeln!(out, "  Errors:             {}", self.errors.len());

        if !self.conflicts.is_empty() {
            out.push_str("\nConflicts:\n");
            for c in &self.conflicts {
                let _ = writeln!(out, "  {}:", c.conflict.entity_key);
                let _ = writeln!(out, "    Field:    {}", c.conflict.field);
                let _ = writeln!(out, "    Database: {:?}", c.conflict.store_value);
                let _ = writeln!(out, "    File:     {:?}", c.conflict.file_value);
                let _ = writeln!(
                    out,
                    "    Kept:     {}",
                    match c.resolution {
                        Side::File => "file",
                        Side::Store => "database",
                    }
                );
            }
        }

        if !self.discovery_conflicts.is_empty() {
            out.push_str("\nDiscovery conflicts:\n");
            for c in &self.discovery_conflicts {
                let _ = writeln!(
                    out,
                    "  {} ({}): folder={} index={}",
                    c.key,
                    c.reason,
                    c.folder_parent.as_deref().unwrap_or("-"),
                    c.index_parent.as_deref().unwrap_or("-")
                );
            }
        }

        if !self.orphaned.is_empty() {
            out.push_str("\nOrphaned items (no file on disk):\n");
            for key in &self.orphaned {
                let _ = writeln!(out, "  - {}", key);
            }
        }

        if !self.warnings.is_empty() {
            out.push_str("\nWarnings:\n");
            for w in &self.warnings {
                let _ = writeln!(out, "  - {}", w);
            }
        }

        if !self.errors.is_empty() {
            out.push_str("\nErrors:\n");
            for e in &self.errors {
                let _ = writeln!(out, "  - {}", e);
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConflictField, ConflictType};
    use chrono::Utc;

    #[test]
    fn test_text_summary_layout() {
        let report = SyncReport {
            files_scanned: 3,
            created: 1,
            updated: 1,
            conflicts_resolved: 1,
            conflicts: vec![ConflictReport {
                conflict: Conflict {
                    entity_key: "U04-S01-item".to_string(),
                    field: ConflictField::Title,
                    file_value: "Add retry logic".to_string(),
                    store_value: "Add retries".to_string(),
                    conflict_type: ConflictType::Metadata,
                    detected_at: Utc::now(),
                },
                resolution: Side::File,
            }],
            ..Default::default()
        };
        let text = report.render_text();
        assert!(text.starts_with("Sync Summary:\n"));
        assert!(text.contains("  Items updated:      1\n"));
        assert!(text.contains("    Database: \"Add retries\"\n"));
        assert!(!text.contains("Items deleted"));
    }

    #[test]
    fn test_dry_run_banner_and_json() {
        let report = SyncReport {
            dry_run: true,
            ..Default::default()
        };
        assert!(report.render_text().starts_with("DRY-RUN MODE"));
        let v: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(v["dry_run"], serde_json::json!(true));
        assert_eq!(v["created"], serde_json::json!(0));
    }
}
