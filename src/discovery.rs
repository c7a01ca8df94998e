//! Discovery engine.
//!
//! Builds the accepted Unit / SubUnit / Item hierarchy from two independent
//! sources, the folder layout ([`folder_scan`](crate::folder_scan)) and the
//! optional index document ([`index_parser`](crate::index_parser)), under one
//! of three strategies:
//!
//! | Strategy | Accepted nodes | Titles | Parents | Conflicts |
//! |----------|----------------|--------|---------|-----------|
//! | `index-authoritative` | index | index | index | mismatch, missing-in-index, missing-in-folder |
//! | `folder-authoritative` | folder | index if present, else folder | folder | none |
//! | `merge` (default) | union | index if present | folder if present | parent mismatch |
//!
//! Each strategy is a row in a table of pure per-key rules; the engine walks
//! the union of keys once and applies the selected rule to each pair.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::folder_scan;
use crate::index_parser;
use crate::models::{
    DiscoveredNode, DiscoveryConflict, DiscoveryConflictReason, EntityKind, NodeSource,
};
use crate::patterns::PatternMatcher;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryStrategy {
    IndexAuthoritative,
    FolderAuthoritative,
    #[default]
    Merge,
}

impl DiscoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryStrategy::IndexAuthoritative => "index-authoritative",
            DiscoveryStrategy::FolderAuthoritative => "folder-authoritative",
            DiscoveryStrategy::Merge => "merge",
        }
    }

    fn rule(self) -> PairRule {
        RULES[self as usize]
    }
}

/// Outcome of applying a strategy to one key.
#[derive(Debug, Default)]
struct PairOutcome {
    node: Option<DiscoveredNode>,
    conflict: Option<DiscoveryConflict>,
}

type PairRule = fn(Option<&DiscoveredNode>, Option<&DiscoveredNode>) -> PairOutcome;

/// Indexed by `DiscoveryStrategy as usize`.
const RULES: [PairRule; 3] = [index_authoritative, folder_authoritative, merge];

fn index_authoritative(folder: Option<&DiscoveredNode>, index: Option<&DiscoveredNode>) -> PairOutcome {
    match (folder, index) {
        (Some(f), Some(i)) => PairOutcome {
            node: Some(DiscoveredNode {
                source: NodeSource::Both,
                ..i.clone()
            }),
            conflict: parent_mismatch(f, i),
        },
        (None, Some(i)) => PairOutcome {
            node: Some(i.clone()),
            conflict: Some(DiscoveryConflict {
                key: i.key.clone(),
                reason: DiscoveryConflictReason::MissingInFolder,
                folder_parent: None,
                index_parent: i.parent_key.clone(),
            }),
        },
        (Some(f), None) => PairOutcome {
            node: None,
            conflict: Some(DiscoveryConflict {
                key: f.key.clone(),
                reason: DiscoveryConflictReason::MissingInIndex,
                folder_parent: f.parent_key.clone(),
                index_parent: None,
            }),
        },
        (None, None) => PairOutcome::default(),
    }
}

fn folder_authoritative(folder: Option<&DiscoveredNode>, index: Option<&DiscoveredNode>) -> PairOutcome {
    let node = folder.map(|f| match index {
        Some(i) => DiscoveredNode {
            title: i.title.clone(),
            source: NodeSource::Both,
            ..f.clone()
        },
        None => f.clone(),
    });
    PairOutcome {
        node,
        conflict: None,
    }
}

fn merge(folder: Option<&DiscoveredNode>, index: Option<&DiscoveredNode>) -> PairOutcome {
    match (folder, index) {
        (Some(f), Some(i)) => PairOutcome {
            node: Some(DiscoveredNode {
                key: f.key.clone(),
                kind: f.kind,
                title: i.title.clone(),
                file_path: f.file_path.clone().or_else(|| i.file_path.clone()),
                parent_key: f.parent_key.clone().or_else(|| i.parent_key.clone()),
                source: NodeSource::Both,
            }),
            conflict: parent_mismatch(f, i),
        },
        (Some(only), None) | (None, Some(only)) => PairOutcome {
            node: Some(only.clone()),
            conflict: None,
        },
        (None, None) => PairOutcome::default(),
    }
}

fn parent_mismatch(folder: &DiscoveredNode, index: &DiscoveredNode) -> Option<DiscoveryConflict> {
    match (&folder.parent_key, &index.parent_key) {
        (Some(fp), Some(ip)) if fp != ip => Some(DiscoveryConflict {
            key: folder.key.clone(),
            reason: DiscoveryConflictReason::ParentMismatch,
            folder_parent: Some(fp.clone()),
            index_parent: Some(ip.clone()),
        }),
        _ => None,
    }
}

/// Reconcile folder and index nodes under `strategy`.
///
/// Output is ordered by kind, then key, regardless of input order.
pub fn reconcile(
    strategy: DiscoveryStrategy,
    folder_nodes: &[DiscoveredNode],
    index_nodes: &[DiscoveredNode],
) -> (Vec<DiscoveredNode>, Vec<DiscoveryConflict>) {
    type Pair<'a> = (Option<&'a DiscoveredNode>, Option<&'a DiscoveredNode>);
    let mut pairs: BTreeMap<(EntityKind, &str), Pair<'_>> = BTreeMap::new();
    for n in folder_nodes {
        let pair = pairs.entry((n.kind, n.key.as_str())).or_default();
        if pair.0.is_none() {
            pair.0 = Some(n);
        }
    }
    for n in index_nodes {
        let pair = pairs.entry((n.kind, n.key.as_str())).or_default();
        if pair.1.is_none() {
            pair.1 = Some(n);
        }
    }

    let rule = strategy.rule();
    let mut nodes = Vec::new();
    let mut conflicts = Vec::new();
    for (folder, index) in pairs.into_values() {
        let outcome = rule(folder, index);
        nodes.extend(outcome.node);
        conflicts.extend(outcome.conflict);
    }
    (nodes, conflicts)
}

/// Accepted hierarchy for one run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Discovery {
    pub strategy: Option<DiscoveryStrategy>,
    pub nodes: Vec<DiscoveredNode>,
    pub conflicts: Vec<DiscoveryConflict>,
    pub warnings: Vec<String>,
    pub folders_scanned: usize,
    pub index_found: bool,
}

impl Discovery {
    pub fn of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &DiscoveredNode> {
        self.nodes.iter().filter(move |n| n.kind == kind)
    }

    pub fn find(&self, kind: EntityKind, key: &str) -> Option<&DiscoveredNode> {
        self.nodes.iter().find(|n| n.kind == kind && n.key == key)
    }

    /// Accepted parent SubUnit key for an Item.
    pub fn item_parent(&self, item_key: &str) -> Option<&str> {
        self.find(EntityKind::Item, item_key)
            .and_then(|n| n.parent_key.as_deref())
    }
}

/// Scan folders, parse the index and reconcile them.
pub fn discover(
    config: &Config,
    matcher: &PatternMatcher,
    strategy: DiscoveryStrategy,
) -> Result<Discovery> {
    let root = &config.project.root;
    if !root.is_dir() {
        return Err(SyncError::Discovery(format!(
            "project root does not exist: {}",
            root.display()
        )));
    }

    let scan = folder_scan::scan_folders(config, matcher)
        .map_err(|e| SyncError::Discovery(format!("{:#}", e)))?;
    let mut warnings = scan.warnings;

    let index_path = config.index_path();
    let index_nodes = if index_path.is_file() {
        match index_parser::parse_index_file(&index_path, config, matcher) {
            Ok(nodes) => Some(nodes),
            Err(e) if strategy == DiscoveryStrategy::IndexAuthoritative => {
                return Err(SyncError::Discovery(format!("{:#}", e)));
            }
            Err(e) => {
                warnings.push(format!("index document ignored: {:#}", e));
                None
            }
        }
    } else {
        if strategy == DiscoveryStrategy::IndexAuthoritative {
            return Err(SyncError::Discovery(format!(
                "index-authoritative discovery needs an index document at {}",
                index_path.display()
            )));
        }
        warnings.push(format!(
            "no index document at {}; using folder structure only",
            index_path.display()
        ));
        None
    };

    let index_found = index_nodes.is_some();
    let (nodes, conflicts) = reconcile(
        strategy,
        &scan.nodes,
        index_nodes.as_deref().unwrap_or_default(),
    );

    for c in &conflicts {
        tracing::info!(
            key = %c.key,
            reason = %c.reason,
            "discovery conflict"
        );
    }

    Ok(Discovery {
        strategy: Some(strategy),
        nodes,
        conflicts,
        warnings,
        folders_scanned: scan.folders_scanned,
        index_found,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(kind: EntityKind, key: &str, title: &str, parent: Option<&str>, source: NodeSource) -> DiscoveredNode {
        DiscoveredNode {
            key: key.to_string(),
            kind,
            title: title.to_string(),
            file_path: None,
            parent_key: parent.map(str::to_string),
            source,
        }
    }

    fn folder_item(key: &str, parent: &str) -> DiscoveredNode {
        node(EntityKind::Item, key, "Folder Title", Some(parent), NodeSource::Folder)
    }

    fn index_item(key: &str, parent: &str) -> DiscoveredNode {
        node(EntityKind::Item, key, "Index Title", Some(parent), NodeSource::Index)
    }

    #[test]
    fn test_rule_table_order_matches_variants() {
        let f = [folder_item("K", "A")];
        let (nodes, _) = reconcile(DiscoveryStrategy::IndexAuthoritative, &f, &[]);
        assert!(nodes.is_empty());
        let (nodes, _) = reconcile(DiscoveryStrategy::FolderAuthoritative, &f, &[]);
        assert_eq!(nodes.len(), 1);
        let (nodes, conflicts) = reconcile(DiscoveryStrategy::Merge, &f, &[]);
        assert_eq!(nodes.len(), 1);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_merge_folder_wins_placement_index_wins_title() {
        let f = [folder_item("U04-S02-001", "U04-S02")];
        let i = [index_item("U04-S02-001", "U05-S01")];
        let (nodes, conflicts) = reconcile(DiscoveryStrategy::Merge, &f, &i);

        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].parent_key.as_deref(), Some("U04-S02"));
        assert_eq!(nodes[0].title, "Index Title");
        assert_eq!(nodes[0].source, NodeSource::Both);

        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].reason, DiscoveryConflictReason::ParentMismatch);
        assert_eq!(conflicts[0].folder_parent.as_deref(), Some("U04-S02"));
        assert_eq!(conflicts[0].index_parent.as_deref(), Some("U05-S01"));
    }

    #[test]
    fn test_merge_single_source_tagged_without_conflict() {
        let f = [folder_item("A", "P")];
        let i = [index_item("B", "P")];
        let (nodes, conflicts) = reconcile(DiscoveryStrategy::Merge, &f, &i);
        assert!(conflicts.is_empty());
        assert_eq!(nodes[0].source, NodeSource::Folder);
        assert_eq!(nodes[1].source, NodeSource::Index);
    }

    #[test]
    fn test_index_authoritative_keeps_index_hierarchy() {
        let f = [folder_item("X", "FOLDER"), folder_item("ONLY-F", "P")];
        let i = [index_item("X", "INDEX"), index_item("ONLY-I", "P")];
        let (nodes, conflicts) = reconcile(DiscoveryStrategy::IndexAuthoritative, &f, &i);

        let keys: Vec<&str> = nodes.iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys, vec!["ONLY-I", "X"]);
        assert_eq!(nodes[1].parent_key.as_deref(), Some("INDEX"));

        let reasons: Vec<_> = conflicts.iter().map(|c| (c.key.as_str(), c.reason)).collect();
        assert!(reasons.contains(&("X", DiscoveryConflictReason::ParentMismatch)));
        assert!(reasons.contains(&("ONLY-F", DiscoveryConflictReason::MissingInIndex)));
        assert!(reasons.contains(&("ONLY-I", DiscoveryConflictReason::MissingInFolder)));
    }

    #[test]
    fn test_folder_authoritative_ignores_index_structure() {
        let f = [folder_item("X", "FOLDER")];
        let i = [index_item("X", "INDEX"), index_item("GHOST", "P")];
        let (nodes, conflicts) = reconcile(DiscoveryStrategy::FolderAuthoritative, &f, &i);
        assert!(conflicts.is_empty());
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].parent_key.as_deref(), Some("FOLDER"));
        assert_eq!(nodes[0].title, "Index Title");
    }

    #[test]
    fn test_output_order_is_input_independent() {
        let a = [folder_item("B", "P"), folder_item("A", "P")];
        let b = [folder_item("A", "P"), folder_item("B", "P")];
        let (x, _) = reconcile(DiscoveryStrategy::Merge, &a, &[]);
        let (y, _) = reconcile(DiscoveryStrategy::Merge, &b, &[]);
        assert_eq!(x, y);
    }

    #[test]
    fn test_same_key_different_kinds_kept_apart() {
        let f = [
            node(EntityKind::Unit, "bugs", "Bugs", None, NodeSource::Folder),
            folder_item("bugs", "bugs-S01"),
        ];
        let (nodes, _) = reconcile(DiscoveryStrategy::Merge, &f, &[]);
        assert_eq!(nodes.len(), 2);
    }
}
