//! Core data models used throughout plansync.
//!
//! File-side views ([`LeafRecord`], [`DiscoveredNode`]) are rebuilt from disk
//! on every run. Store-side rows ([`UnitRow`], [`SubUnitRow`], [`ItemRow`])
//! mirror the relational schema. Conflicts are transient and never persisted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Hierarchy level of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Unit,
    SubUnit,
    Item,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Unit => write!(f, "unit"),
            EntityKind::SubUnit => write!(f, "sub-unit"),
            EntityKind::Item => write!(f, "item"),
        }
    }
}

/// Where a discovered node came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeSource {
    Folder,
    Index,
    Both,
}

impl fmt::Display for NodeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeSource::Folder => write!(f, "folder"),
            NodeSource::Index => write!(f, "index"),
            NodeSource::Both => write!(f, "both"),
        }
    }
}

/// A Unit, SubUnit or Item found by folder scanning or declared in the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredNode {
    pub key: String,
    pub kind: EntityKind,
    pub title: String,
    pub file_path: Option<String>,
    pub parent_key: Option<String>,
    pub source: NodeSource,
}

/// Item as parsed from its markdown file for one sync pass.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafRecord {
    pub item_key: String,
    pub title: String,
    pub description: Option<String>,
    pub parent_unit_key: String,
    pub parent_sub_unit_key: String,
    /// Project-relative path with `/` separators.
    pub file_path: String,
    pub modified_at: DateTime<Utc>,
    pub body_hash: String,
    /// Remaining metadata keys, carried for reporting only.
    pub declared_fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitRow {
    pub id: i64,
    pub unit_key: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubUnitRow {
    pub id: i64,
    pub sub_unit_key: String,
    pub unit_key: String,
    pub title: String,
}

/// Persisted item. `status` and `updated_at` are owned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRow {
    pub id: i64,
    pub item_key: String,
    pub title: String,
    pub description: Option<String>,
    pub sub_unit_id: i64,
    pub sub_unit_key: String,
    pub file_path: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Item fields compared between file and store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictField {
    Title,
    Description,
    FilePath,
    Parent,
}

impl fmt::Display for ConflictField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictField::Title => "title",
            ConflictField::Description => "description",
            ConflictField::FilePath => "file_path",
            ConflictField::Parent => "parent",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictType {
    /// Descriptive metadata differs.
    Metadata,
    /// The item sits under a different parent.
    Placement,
}

/// Field-level disagreement between the file view and the store row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conflict {
    pub entity_key: String,
    pub field: ConflictField,
    pub file_value: String,
    pub store_value: String,
    pub conflict_type: ConflictType,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryConflictReason {
    ParentMismatch,
    MissingInIndex,
    MissingInFolder,
}

impl fmt::Display for DiscoveryConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiscoveryConflictReason::ParentMismatch => "parent-mismatch",
            DiscoveryConflictReason::MissingInIndex => "missing-in-index",
            DiscoveryConflictReason::MissingInFolder => "missing-in-folder",
        };
        f.write_str(name)
    }
}

/// Disagreement between folder layout and the index document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryConflict {
    pub key: String,
    pub reason: DiscoveryConflictReason,
    pub folder_parent: Option<String>,
    pub index_parent: Option<String>,
}

/// Per-file failure recorded in the report; the file is skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileError {
    pub path: String,
    pub message: String,
}

impl FileError {
    /// A file declaring a key another file already owns.
    pub fn duplicate_key(path: &str, item_key: &str, owner: &str) -> Self {
        Self {
            path: path.to_string(),
            message: format!(
                "duplicate item key '{}' (already declared by {})",
                item_key, owner
            ),
        }
    }
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Title-case a hyphenated slug: `add-retry-logic` -> `Add Retry Logic`.
pub fn title_from_slug(slug: &str) -> String {
    slug.split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
