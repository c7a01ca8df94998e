//! Authored index document parsing.
//!
//! The index is a markdown file at the project root whose links declare the
//! hierarchy explicitly. Link text becomes the title and the link target is
//! classified with the same pattern set as the folder scan:
//!
//! - `[Platform](./U04-platform/)`: a Unit
//! - `[Retries](U04-platform/U04-S01-retry/)`: a SubUnit whose declared
//!   parent is the Unit named by the enclosing segment
//! - `[Add retries](U04-platform/U04-S01-retry/T-U04-S01-001.md)`: an Item
//!   whose declared parent is the nearest SubUnit segment
//!
//! External links and links that match no pattern are ignored. Links to a
//! descriptor file (`unit.md`, `subunit.md`) declare the folder holding it.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

use crate::config::Config;
use crate::models::{DiscoveredNode, EntityKind, NodeSource};
use crate::patterns::PatternMatcher;

/// Parse the index file at `path`.
pub fn parse_index_file(
    path: &Path,
    config: &Config,
    matcher: &PatternMatcher,
) -> Result<Vec<DiscoveredNode>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read index file: {}", path.display()))?;
    parse_index(&content, config, matcher)
}

pub fn parse_index(
    content: &str,
    config: &Config,
    matcher: &PatternMatcher,
) -> Result<Vec<DiscoveredNode>> {
    let link = Regex::new(r"\[([^\]]+)\]\(([^)\s]+)(?:\s+[^)]*)?\)")?;

    let mut nodes = Vec::new();
    let mut seen: HashSet<(EntityKind, String)> = HashSet::new();

    for caps in link.captures_iter(content) {
        let title = caps[1].trim().to_string();
        let target = &caps[2];
        if target.contains("://") || target.starts_with('#') || target.starts_with("mailto:") {
            continue;
        }

        let clean = normalize_link(target);
        let mut segments: Vec<&str> = clean.split('/').filter(|s| !s.is_empty()).collect();
        if let Some(last) = segments.last() {
            if *last == config.project.unit_descriptor || *last == config.project.sub_unit_descriptor
            {
                segments.pop();
            }
        }
        if segments.is_empty() {
            continue;
        }

        let node = match classify(&segments, title, matcher) {
            Some(node) => node,
            None => {
                tracing::debug!("index link '{}' matches no pattern", target);
                continue;
            }
        };
        if !seen.insert((node.kind, node.key.clone())) {
            tracing::warn!("index declares {} '{}' more than once", node.kind, node.key);
            continue;
        }
        nodes.push(node);
    }

    Ok(nodes)
}

fn classify(segments: &[&str], title: String, matcher: &PatternMatcher) -> Option<DiscoveredNode> {
    let (last, dirs) = segments.split_last()?;
    let joined = segments.join("/");

    if last.ends_with(".md") {
        let m = matcher.match_item(&joined)?;
        let parent = dirs
            .iter()
            .rev()
            .find_map(|d| matcher.match_sub_unit(d))
            .map(|s| s.key)
            .unwrap_or(m.sub_unit_key);
        return Some(DiscoveredNode {
            key: m.key,
            kind: EntityKind::Item,
            title,
            file_path: Some(joined),
            parent_key: Some(parent),
            source: NodeSource::Index,
        });
    }

    if !dirs.is_empty() {
        if let Some(m) = matcher.match_sub_unit(last) {
            let parent = dirs
                .iter()
                .rev()
                .find_map(|d| matcher.match_unit(d))
                .map(|u| u.key)
                .unwrap_or(m.unit_key);
            return Some(DiscoveredNode {
                key: m.key,
                kind: EntityKind::SubUnit,
                title,
                file_path: Some(joined),
                parent_key: Some(parent),
                source: NodeSource::Index,
            });
        }
    }

    let m = matcher.match_unit(last)?;
    Some(DiscoveredNode {
        key: m.key,
        kind: EntityKind::Unit,
        title,
        file_path: Some(joined),
        parent_key: None,
        source: NodeSource::Index,
    })
}

/// Strip `./`, leading and trailing `/`, and any `#fragment`.
fn normalize_link(target: &str) -> String {
    let target = target.split('#').next().unwrap_or(target);
    let mut clean = target;
    while let Some(rest) = clean.strip_prefix("./") {
        clean = rest;
    }
    clean.trim_matches('/').to_string()
}
