//! Incremental candidate filtering.
//!
//! With a last-sync timestamp, keeps only leaf candidates modified after
//! `last_sync - skew`. A candidate whose path the store has never seen is
//! always kept, so new files are not lost to coarse mtimes. The filter is an
//! optimization: skipping a file only means it is not re-read this run.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

use crate::leaf_scan::LeafCandidate;

#[derive(Debug, Clone, Copy)]
pub struct FilterOptions {
    pub last_sync: Option<DateTime<Utc>>,
    pub force_full: bool,
    pub skew: Duration,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FilterStats {
    pub total: usize,
    pub kept: usize,
    pub skipped: usize,
    pub new_files: usize,
    pub warnings: Vec<String>,
}

/// Whether the filter narrows anything for these options.
pub fn is_active(opts: &FilterOptions) -> bool {
    !opts.force_full && opts.last_sync.is_some()
}

/// Filter `candidates`; `known_paths` are the file paths recorded in the store.
pub fn filter_candidates(
    candidates: &[LeafCandidate],
    known_paths: &HashSet<String>,
    opts: &FilterOptions,
) -> (Vec<LeafCandidate>, FilterStats) {
    let mut stats = FilterStats {
        total: candidates.len(),
        ..Default::default()
    };

    let cutoff = match opts.last_sync {
        Some(ts) if !opts.force_full => ts - opts.skew,
        _ => {
            stats.kept = candidates.len();
            return (candidates.to_vec(), stats);
        }
    };

    let mut kept = Vec::new();
    for c in candidates {
        if c.modified_at > opts.now + opts.skew {
            stats.warnings.push(format!(
                "{} has a modification time in the future ({}); possible clock skew",
                c.rel_path,
                c.modified_at.to_rfc3339()
            ));
        }

        if !known_paths.contains(&c.rel_path) {
            stats.new_files += 1;
            kept.push(c.clone());
        } else if c.modified_at > cutoff {
            kept.push(c.clone());
        } else {
            stats.skipped += 1;
        }
    }
    stats.kept = kept.len();

    tracing::info!(
        total = stats.total,
        changed = stats.kept,
        skipped = stats.skipped,
        new = stats.new_files,
        "incremental filter"
    );
    (kept, stats)
}
