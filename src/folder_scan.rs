//! Folder-inferred hierarchy.
//!
//! Walks the project root and classifies directories as Units or SubUnits
//! by their folder names, and leaf files as Items by their relative paths.
//! Structural placement comes from physical location: a SubUnit's parent is
//! the nearest enclosing Unit folder and an Item's parent is the nearest
//! enclosing SubUnit folder. Names captured by the pattern are the fallback
//! when no such folder exists.
//!
//! Hidden directories are never entered. Titles for Units and SubUnits are
//! read from the descriptor file inside the folder when one exists.

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::frontmatter;
use crate::leaf_scan::{relative_path, PathFilter};
use crate::models::{title_from_slug, DiscoveredNode, EntityKind, NodeSource};
use crate::patterns::PatternMatcher;

#[derive(Debug, Default)]
pub struct FolderScan {
    pub nodes: Vec<DiscoveredNode>,
    pub folders_scanned: usize,
    pub warnings: Vec<String>,
}

pub fn scan_folders(config: &Config, matcher: &PatternMatcher) -> Result<FolderScan> {
    let root = &config.project.root;
    let filter = PathFilter::from_config(config)?;

    let mut scan = FolderScan::default();
    let mut seen: HashSet<(EntityKind, String)> = HashSet::new();
    // Directory path -> (kind, key) for classified folders
    let mut folders: HashMap<PathBuf, (EntityKind, String)> = HashMap::new();

    let walker = WalkDir::new(root)
        .follow_links(config.scan.follow_symlinks)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                scan.warnings.push(format!("walk error: {}", e));
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }

        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        if entry.file_type().is_dir() {
            scan.folders_scanned += 1;
            let node = classify_folder(config, matcher, &folders, path, &name);
            if let Some(node) = node {
                folders.insert(path.to_path_buf(), (node.kind, node.key.clone()));
                push_unique(&mut scan, &mut seen, node, path);
            }
            continue;
        }

        if !entry.file_type().is_file() {
            continue;
        }

        let rel = relative_path(root, path);
        if !filter.accepts(&rel) {
            continue;
        }
        if let Some(m) = matcher.match_item(&rel) {
            let parent = nearest(&folders, path, EntityKind::SubUnit).unwrap_or(m.sub_unit_key);
            let title = m
                .slug
                .as_deref()
                .map(title_from_slug)
                .unwrap_or_else(|| m.key.clone());
            let node = DiscoveredNode {
                key: m.key,
                kind: EntityKind::Item,
                title,
                file_path: Some(rel),
                parent_key: Some(parent),
                source: NodeSource::Folder,
            };
            push_unique(&mut scan, &mut seen, node, path);
        }
    }

    tracing::debug!(
        folders = scan.folders_scanned,
        nodes = scan.nodes.len(),
        "folder scan complete"
    );
    Ok(scan)
}

fn classify_folder(
    config: &Config,
    matcher: &PatternMatcher,
    folders: &HashMap<PathBuf, (EntityKind, String)>,
    path: &Path,
    name: &str,
) -> Option<DiscoveredNode> {
    let rel = relative_path(&config.project.root, path);

    // Sub-unit names are usually the more specific form, so try them first.
    if let Some(m) = matcher.match_sub_unit(name) {
        let parent = nearest(folders, path, EntityKind::Unit).unwrap_or(m.unit_key);
        let title = descriptor_title(&path.join(&config.project.sub_unit_descriptor))
            .or_else(|| m.slug.as_deref().map(title_from_slug))
            .unwrap_or_else(|| m.key.clone());
        return Some(DiscoveredNode {
            key: m.key,
            kind: EntityKind::SubUnit,
            title,
            file_path: Some(rel),
            parent_key: Some(parent),
            source: NodeSource::Folder,
        });
    }

    if let Some(m) = matcher.match_unit(name) {
        let title = descriptor_title(&path.join(&config.project.unit_descriptor))
            .or_else(|| m.slug.as_deref().map(title_from_slug))
            .unwrap_or_else(|| title_from_slug(&m.key));
        return Some(DiscoveredNode {
            key: m.key,
            kind: EntityKind::Unit,
            title,
            file_path: Some(rel),
            parent_key: None,
            source: NodeSource::Folder,
        });
    }

    None
}

fn push_unique(
    scan: &mut FolderScan,
    seen: &mut HashSet<(EntityKind, String)>,
    node: DiscoveredNode,
    path: &Path,
) {
    if seen.insert((node.kind, node.key.clone())) {
        scan.nodes.push(node);
    } else {
        scan.warnings.push(format!(
            "duplicate {} key '{}' at {} ignored",
            node.kind,
            node.key,
            path.display()
        ));
    }
}

/// Key of the closest ancestor folder of the given kind.
fn nearest(
    folders: &HashMap<PathBuf, (EntityKind, String)>,
    path: &Path,
    kind: EntityKind,
) -> Option<String> {
    path.ancestors()
        .skip(1)
        .find_map(|dir| match folders.get(dir) {
            Some((k, key)) if *k == kind => Some(key.clone()),
            _ => None,
        })
}

/// Title from a descriptor's metadata block, else its first heading.
fn descriptor_title(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    match frontmatter::parse(&content) {
        Ok(fm) => fm
            .get("title")
            .map(str::to_string)
            .or_else(|| frontmatter::first_heading(&fm.body)),
        Err(e) => {
            tracing::warn!("ignoring descriptor {}: {:#}", path.display(), e);
            None
        }
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}
