//! Conflict detection between the file view and store rows.
//!
//! Fields compared per item: title, description, file path and parent
//! SubUnit. A field conflicts only when both sides carry a non-empty value
//! and the values differ. A value present only in the file fills the empty
//! store field without a conflict; a value present only in the store is left
//! alone. Status is never compared.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use crate::models::{Conflict, ConflictField, ConflictType, FileError, ItemRow, LeafRecord};

/// A parsed leaf and the store row carrying the same key.
#[derive(Debug, Clone)]
pub struct MatchedItem {
    pub record: LeafRecord,
    pub row: ItemRow,
    pub conflicts: Vec<Conflict>,
    /// Fields empty in the store that the file supplies.
    pub fills: Vec<ConflictField>,
}

impl MatchedItem {
    pub fn is_unchanged(&self) -> bool {
        self.conflicts.is_empty() && self.fills.is_empty()
    }
}

#[derive(Debug, Default, Clone)]
pub struct Detection {
    pub new: Vec<LeafRecord>,
    pub matched: Vec<MatchedItem>,
    pub orphaned: Vec<ItemRow>,
    /// Records whose key is still owned by another file on disk.
    pub duplicates: Vec<FileError>,
}

impl Detection {
    pub fn conflict_count(&self) -> usize {
        self.matched.iter().map(|m| m.conflicts.len()).sum()
    }
}

/// Classify every parsed record as new or matched, and every unreferenced
/// store row as orphaned.
///
/// `present_paths` lists every leaf path on disk, parsed or not. A row whose
/// file is present but produced no record (filtered out by the incremental
/// pass, or failed to parse) is held: it is never orphaned, and a record
/// from another path claiming its key is a duplicate, not a move. A row
/// whose file now parses to a different key is not held.
pub fn detect(
    records: &[LeafRecord],
    rows: &[ItemRow],
    present_paths: &HashSet<String>,
    now: DateTime<Utc>,
) -> Detection {
    let by_key: HashMap<&str, &ItemRow> = rows.iter().map(|r| (r.item_key.as_str(), r)).collect();
    let parsed_paths: HashSet<&str> = records.iter().map(|r| r.file_path.as_str()).collect();
    let held = |row: &ItemRow| {
        row.file_path
            .as_deref()
            .is_some_and(|p| present_paths.contains(p) && !parsed_paths.contains(p))
    };

    let mut detection = Detection::default();
    let mut accepted: HashSet<&str> = HashSet::new();

    for record in records {
        match by_key.get(record.item_key.as_str()) {
            None => {
                accepted.insert(record.item_key.as_str());
                detection.new.push(record.clone());
            }
            Some(row) if held(*row) => {
                let owner = row.file_path.as_deref().unwrap_or_default();
                detection.duplicates.push(FileError::duplicate_key(
                    &record.file_path,
                    &record.item_key,
                    owner,
                ));
            }
            Some(row) => {
                accepted.insert(record.item_key.as_str());
                let (conflicts, fills) = compare(record, row, now);
                detection.matched.push(MatchedItem {
                    record: record.clone(),
                    row: (*row).clone(),
                    conflicts,
                    fills,
                });
            }
        }
    }

    for row in rows {
        if !accepted.contains(row.item_key.as_str()) && !held(row) {
            detection.orphaned.push(row.clone());
        }
    }

    detection
}

/// Field-level comparison of one record against its row.
pub fn compare(
    record: &LeafRecord,
    row: &ItemRow,
    now: DateTime<Utc>,
) -> (Vec<Conflict>, Vec<ConflictField>) {
    let pairs = [
        (ConflictField::Title, Some(record.title.as_str()), Some(row.title.as_str())),
        (
            ConflictField::Description,
            record.description.as_deref(),
            row.description.as_deref(),
        ),
        (
            ConflictField::FilePath,
            Some(record.file_path.as_str()),
            row.file_path.as_deref(),
        ),
        (
            ConflictField::Parent,
            Some(record.parent_sub_unit_key.as_str()),
            Some(row.sub_unit_key.as_str()),
        ),
    ];

    let mut conflicts = Vec::new();
    let mut fills = Vec::new();
    for (field, file_value, store_value) in pairs {
        let file_value = non_empty(file_value);
        let store_value = non_empty(store_value);
        match (file_value, store_value) {
            (Some(f), Some(s)) if f != s => conflicts.push(Conflict {
                entity_key: record.item_key.clone(),
                field,
                file_value: f.to_string(),
                store_value: s.to_string(),
                conflict_type: if field == ConflictField::Parent {
                    ConflictType::Placement
                } else {
                    ConflictType::Metadata
                },
                detected_at: now,
            }),
            (Some(_), None) => fills.push(field),
            _ => {}
        }
    }
    (conflicts, fills)
}

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}
