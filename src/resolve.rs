//! Conflict resolution.
//!
//! One strategy applies to every conflict of a run:
//!
//! | Strategy | Conflicting fields take |
//! |----------|-------------------------|
//! | `file-wins` (default) | the file value |
//! | `database-wins` | the store value (files are never rewritten) |
//! | `newer-wins` | one side per item, chosen by timestamp, for all its fields |
//! | `manual` | an operator choice per field, before anything is applied |
//!
//! Fields the store lacks and the file supplies are filled under every
//! strategy. Status is not a resolvable field.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};

use crate::detect::MatchedItem;
use crate::error::{Result, SyncError};
use crate::models::{Conflict, ConflictField};
use crate::store::ItemUpdate;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    #[default]
    FileWins,
    DatabaseWins,
    NewerWins,
    Manual,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::FileWins => "file-wins",
            ConflictStrategy::DatabaseWins => "database-wins",
            ConflictStrategy::NewerWins => "newer-wins",
            ConflictStrategy::Manual => "manual",
        }
    }

    fn chooser(self) -> Chooser {
        CHOOSERS[self as usize]
    }
}

/// Which side supplies a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    File,
    Store,
}

/// Source of per-field decisions for the manual strategy.
pub trait ConflictDecider {
    /// `None` means no decision can be obtained.
    fn decide(&self, conflict: &Conflict) -> Option<Side>;
}

/// Decider for contexts without an operator.
pub struct NonInteractive;

impl ConflictDecider for NonInteractive {
    fn decide(&self, _conflict: &Conflict) -> Option<Side> {
        None
    }
}

/// Asks on stderr and reads `file` or `db` from stdin.
pub struct PromptDecider;

const PROMPT_ATTEMPTS: usize = 3;

impl ConflictDecider for PromptDecider {
    fn decide(&self, conflict: &Conflict) -> Option<Side> {
        prompt(
            conflict,
            &mut std::io::stdin().lock(),
            &mut std::io::stderr().lock(),
        )
    }
}

/// One operator exchange. An unreadable answer or an unwritable prompt
/// yields no decision.
fn prompt(conflict: &Conflict, input: &mut impl BufRead, out: &mut impl Write) -> Option<Side> {
    writeln!(
        out,
        "\nConflict in {} ({}):\n  file:     {}\n  database: {}",
        conflict.entity_key, conflict.field, conflict.file_value, conflict.store_value
    )
    .ok()?;

    for _ in 0..PROMPT_ATTEMPTS {
        write!(out, "Keep which value? [file/db]: ").ok()?;
        out.flush().ok()?;

        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) | Err(_) => return None,
            Ok(_) => {}
        }
        if let Some(side) = parse_choice(&line) {
            return Some(side);
        }
        writeln!(out, "Please answer 'file' or 'db'.").ok()?;
    }
    None
}

fn parse_choice(input: &str) -> Option<Side> {
    match input.trim().to_lowercase().as_str() {
        "file" | "f" => Some(Side::File),
        "db" | "d" | "database" => Some(Side::Store),
        _ => None,
    }
}

pub struct ResolveContext<'a> {
    pub skew: Duration,
    pub decider: &'a dyn ConflictDecider,
}

/// Picks a side for each conflict of one item, in conflict order.
type Chooser = fn(&MatchedItem, &ResolveContext<'_>) -> Result<Vec<Side>>;

/// Indexed by `ConflictStrategy as usize`.
const CHOOSERS: [Chooser; 4] = [file_wins, database_wins, newer_wins, manual];

fn file_wins(item: &MatchedItem, _ctx: &ResolveContext<'_>) -> Result<Vec<Side>> {
    Ok(vec![Side::File; item.conflicts.len()])
}

fn database_wins(item: &MatchedItem, _ctx: &ResolveContext<'_>) -> Result<Vec<Side>> {
    Ok(vec![Side::Store; item.conflicts.len()])
}

fn newer_wins(item: &MatchedItem, ctx: &ResolveContext<'_>) -> Result<Vec<Side>> {
    let side = newer_side(item, ctx.skew);
    Ok(vec![side; item.conflicts.len()])
}

/// The file wins unless the row is newer by more than the skew window.
pub fn newer_side(item: &MatchedItem, skew: Duration) -> Side {
    if item.record.modified_at + skew >= item.row.updated_at {
        Side::File
    } else {
        Side::Store
    }
}

fn manual(item: &MatchedItem, ctx: &ResolveContext<'_>) -> Result<Vec<Side>> {
    item.conflicts
        .iter()
        .map(|c| {
            ctx.decider
                .decide(c)
                .ok_or_else(|| SyncError::DecisionUnavailable {
                    entity_key: c.entity_key.clone(),
                    field: c.field.to_string(),
                })
        })
        .collect()
}

/// Result of resolving one matched item.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// `None` when the resolved values equal the stored row.
    pub update: Option<ItemUpdate>,
    /// Side chosen per conflict, aligned with `MatchedItem::conflicts`.
    pub choices: Vec<Side>,
}

impl Resolution {
    pub fn conflicts_resolved(&self) -> usize {
        self.choices.len()
    }
}

pub fn resolve_item(
    item: &MatchedItem,
    strategy: ConflictStrategy,
    ctx: &ResolveContext<'_>,
) -> Result<Resolution> {
    let choices = (strategy.chooser())(item, ctx)?;

    let row = &item.row;
    let record = &item.record;
    let mut update = ItemUpdate {
        item_key: row.item_key.clone(),
        title: row.title.clone(),
        description: row.description.clone(),
        sub_unit_key: row.sub_unit_key.clone(),
        file_path: row.file_path.clone(),
        conflicts_resolved: choices.len(),
    };
    let original = update.clone();

    let from_file = item.fills.iter().copied().chain(
        item.conflicts
            .iter()
            .zip(&choices)
            .filter(|(_, side)| **side == Side::File)
            .map(|(c, _)| c.field),
    );
    for field in from_file {
        match field {
            ConflictField::Title => update.title = record.title.clone(),
            ConflictField::Description => update.description = record.description.clone(),
            ConflictField::FilePath => update.file_path = Some(record.file_path.clone()),
            ConflictField::Parent => update.sub_unit_key = record.parent_sub_unit_key.clone(),
        }
    }

    Ok(Resolution {
        update: (update != original).then_some(update),
        choices,
    })
}
