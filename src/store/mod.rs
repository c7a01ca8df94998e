//! Relational store abstraction.
//!
//! The [`Store`] trait is everything the sync engine needs from the
//! relational side: read the current rows, apply a resolved plan atomically,
//! and keep the last-sync checkpoint.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`list_units`](Store::list_units) | All Unit rows |
//! | [`list_sub_units`](Store::list_sub_units) | All SubUnit rows with their Unit key |
//! | [`list_items`](Store::list_items) | All Item rows with their SubUnit key |
//! | [`apply`](Store::apply) | Commit an [`ApplyPlan`] all-or-nothing |
//! | [`last_sync`](Store::last_sync) | Read the persisted checkpoint |
//! | [`set_last_sync`](Store::set_last_sync) | Write the checkpoint |
//! | [`list_history`](Store::list_history) | Audit entries of one item, oldest first |
//!
//! Parent references in a plan are keys. The store resolves them to row ids
//! and rejects the whole plan when one does not resolve. Every item create
//! and update writes one history entry inside the same transaction.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{ItemRow, SubUnitRow, UnitRow};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Name of the checkpoint row in `sync_state`.
pub const LAST_SYNC_KEY: &str = "last_sync";

/// Agent recorded on history entries written by a sync.
pub const HISTORY_AGENT: &str = "plansync";

#[derive(Debug, Clone, PartialEq)]
pub struct UnitUpsert {
    pub unit_key: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubUnitUpsert {
    pub sub_unit_key: String,
    pub unit_key: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemCreate {
    pub item_key: String,
    pub title: String,
    pub description: Option<String>,
    pub sub_unit_key: String,
    pub file_path: String,
}

impl ItemCreate {
    pub fn history_note(&self) -> String {
        "Imported from file".to_string()
    }
}

/// Full replacement of an item's file-owned fields. Status and timestamps
/// are not part of it.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemUpdate {
    pub item_key: String,
    pub title: String,
    pub description: Option<String>,
    pub sub_unit_key: String,
    pub file_path: Option<String>,
    /// Conflicts decided for this item in the run.
    pub conflicts_resolved: usize,
}

impl ItemUpdate {
    pub fn history_note(&self) -> String {
        format!(
            "Updated from file ({} conflicts resolved)",
            self.conflicts_resolved
        )
    }
}

/// One audit row of an item.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub item_key: String,
    pub agent: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

/// Every write decided for one run, applied in field order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyPlan {
    pub units: Vec<UnitUpsert>,
    pub sub_units: Vec<SubUnitUpsert>,
    pub creates: Vec<ItemCreate>,
    pub updates: Vec<ItemUpdate>,
    /// Item keys.
    pub deletes: Vec<String>,
}

impl ApplyPlan {
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
            && self.sub_units.is_empty()
            && self.creates.is_empty()
            && self.updates.is_empty()
            && self.deletes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedCounts {
    pub units_created: usize,
    pub sub_units_created: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// A plan was rejected; nothing from it was committed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{entity_key}: {reason}")]
pub struct ApplyError {
    pub entity_key: String,
    pub reason: String,
}

impl ApplyError {
    pub fn new(entity_key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self {
            entity_key: entity_key.into(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn list_units(&self) -> Result<Vec<UnitRow>>;

    async fn list_sub_units(&self) -> Result<Vec<SubUnitRow>>;

    async fn list_items(&self) -> Result<Vec<ItemRow>>;

    /// Apply the plan in one transaction. On error the store is unchanged
    /// and the error names the entity that failed.
    async fn apply(&self, plan: &ApplyPlan) -> std::result::Result<AppliedCounts, ApplyError>;

    async fn last_sync(&self) -> Result<Option<DateTime<Utc>>>;

    async fn set_last_sync(&self, at: DateTime<Utc>) -> Result<()>;

    async fn list_history(&self, item_key: &str) -> Result<Vec<HistoryEntry>>;
}
