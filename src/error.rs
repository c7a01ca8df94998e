//! Fatal error taxonomy for a sync run.
//!
//! Per-file parse problems are not errors at this level; they are recorded in
//! the [`SyncReport`](crate::report::SyncReport) and the file is skipped.
//! Everything here aborts the run before anything is committed, so the store
//! and the persisted last-sync timestamp are left untouched.

use crate::patterns::PatternError;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that abort a sync run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Pattern configuration was rejected at load time.
    #[error(transparent)]
    Pattern(#[from] PatternError),

    /// Invalid run configuration (missing project root, bad globs, ...).
    #[error("configuration error: {0}")]
    Config(String),

    /// Discovery could not produce a hierarchy.
    #[error("discovery failed: {0}")]
    Discovery(String),

    /// Leaf files were found but every one of them failed to parse.
    #[error("no leaf files could be parsed ({failures} failed)")]
    NothingParsed { failures: usize },

    /// Manual resolution was requested but no operator can answer.
    #[error("manual resolution of {entity_key}.{field} needs an interactive operator")]
    DecisionUnavailable { entity_key: String, field: String },

    /// Applying one entity failed; the whole transaction was rolled back.
    #[error("apply aborted at {entity_key}: {reason}")]
    ApplyAborted { entity_key: String, reason: String },

    /// Reading from the relational store failed.
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl From<crate::store::ApplyError> for SyncError {
    fn from(err: crate::store::ApplyError) -> Self {
        SyncError::ApplyAborted {
            entity_key: err.entity_key,
            reason: err.reason,
        }
    }
}
