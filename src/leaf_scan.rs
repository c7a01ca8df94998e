//! Leaf file scanning and parsing.
//!
//! [`walk_leaf_files`] lists candidate leaf files under the project root:
//! regular files accepted by the include/exclude globs whose relative path
//! matches an Item pattern. The index document and folder descriptor files
//! are never leaves. [`parse_leaves`] turns candidates into
//! [`LeafRecord`]s; failures are collected per file and never abort.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::frontmatter;
use crate::models::{title_from_slug, FileError, LeafRecord};
use crate::patterns::{ItemMatch, PatternMatcher};

/// Metadata keys consumed by the parser; everything else is carried as
/// declared fields.
const CONSUMED_FIELDS: &[&str] = &["key", "title", "description"];

const TITLE_PREFIXES: &[&str] = &["Task:", "TODO:", "WIP:"];

/// A leaf file found on disk, not yet read.
#[derive(Debug, Clone)]
pub struct LeafCandidate {
    pub path: PathBuf,
    pub rel_path: String,
    pub modified_at: DateTime<Utc>,
    pub size: u64,
    pub item: ItemMatch,
}

#[derive(Debug, Default)]
pub struct LeafWalk {
    /// Sorted by relative path.
    pub candidates: Vec<LeafCandidate>,
    /// Accepted by the globs but matching no Item pattern.
    pub unmatched: usize,
    pub warnings: Vec<String>,
}

/// Include/exclude filtering on project-relative paths.
pub struct PathFilter {
    include: GlobSet,
    exclude: GlobSet,
    index_file: String,
    descriptors: [String; 2],
}

impl PathFilter {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            include: build_globset(&config.scan.include_globs)?,
            exclude: build_globset(&config.scan.exclude_globs)?,
            index_file: config.project.index_file.clone(),
            descriptors: [
                config.project.unit_descriptor.clone(),
                config.project.sub_unit_descriptor.clone(),
            ],
        })
    }

    pub fn accepts(&self, rel_path: &str) -> bool {
        if rel_path == self.index_file {
            return false;
        }
        let file_name = rel_path.rsplit('/').next().unwrap_or(rel_path);
        if self.descriptors.iter().any(|d| d == file_name) {
            return false;
        }
        !self.exclude.is_match(rel_path) && self.include.is_match(rel_path)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob '{}'", pattern))?);
    }
    Ok(builder.build()?)
}

/// `path` relative to `root`, `/`-separated.
pub fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn walk_leaf_files(config: &Config, matcher: &PatternMatcher) -> Result<LeafWalk> {
    let root = &config.project.root;
    if !root.is_dir() {
        bail!("project root does not exist: {}", root.display());
    }
    let filter = PathFilter::from_config(config)?;

    let mut walk = LeafWalk::default();
    let walker = WalkDir::new(root)
        .follow_links(config.scan.follow_symlinks)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                walk.warnings.push(format!("walk error: {}", e));
                continue;
            }
        };

        if entry.path_is_symlink() && !config.scan.follow_symlinks {
            walk.warnings.push(format!(
                "skipping symlink {} (scan.follow_symlinks is off)",
                entry.path().display()
            ));
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = relative_path(root, entry.path());
        if !filter.accepts(&rel) {
            continue;
        }

        let item = match matcher.match_item(&rel) {
            Some(m) => m,
            None => {
                tracing::debug!("{} matches no item pattern", rel);
                walk.unmatched += 1;
                continue;
            }
        };

        let metadata = entry
            .metadata()
            .with_context(|| format!("Failed to stat {}", entry.path().display()))?;
        let modified = metadata
            .modified()
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);

        walk.candidates.push(LeafCandidate {
            path: entry.path().to_path_buf(),
            rel_path: rel,
            modified_at: DateTime::<Utc>::from(modified),
            size: metadata.len(),
            item,
        });
    }

    walk.candidates.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(walk)
}

/// Read and parse one leaf file.
pub fn parse_leaf(candidate: &LeafCandidate, max_file_bytes: u64) -> Result<LeafRecord> {
    if candidate.size > max_file_bytes {
        bail!(
            "file is {} bytes, exceeds the {} byte limit",
            candidate.size,
            max_file_bytes
        );
    }

    let content = std::fs::read_to_string(&candidate.path)
        .with_context(|| format!("Failed to read {}", candidate.path.display()))?;
    let fm = frontmatter::parse(&content)?;

    let item_key = fm
        .get("key")
        .map(str::to_string)
        .unwrap_or_else(|| candidate.item.key.clone());

    let title = fm
        .get("title")
        .map(str::to_string)
        .or_else(|| frontmatter::first_heading(&fm.body).map(|h| strip_title_prefix(&h)))
        .filter(|t| !t.is_empty())
        .or_else(|| candidate.item.slug.as_deref().map(title_from_slug))
        .unwrap_or_else(|| item_key.clone());

    let declared_fields = fm
        .fields
        .iter()
        .filter(|(k, _)| !CONSUMED_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(LeafRecord {
        item_key,
        title,
        description: fm.get("description").map(str::to_string),
        parent_unit_key: candidate.item.unit_key.clone(),
        parent_sub_unit_key: candidate.item.sub_unit_key.clone(),
        file_path: candidate.rel_path.clone(),
        modified_at: candidate.modified_at,
        body_hash: body_hash(&fm.body),
        declared_fields,
    })
}

/// Parse every candidate.
///
/// `owners` maps stored item keys to their recorded file path. A file at the
/// recorded path keeps its key; otherwise the first file in path order
/// claims it. Later files declaring a claimed key are reported as errors.
pub fn parse_leaves(
    candidates: &[LeafCandidate],
    max_file_bytes: u64,
    owners: &HashMap<String, String>,
) -> (Vec<LeafRecord>, Vec<FileError>) {
    let mut parsed = Vec::with_capacity(candidates.len());
    let mut errors = Vec::new();
    for candidate in candidates {
        match parse_leaf(candidate, max_file_bytes) {
            Ok(record) => parsed.push(record),
            Err(e) => {
                tracing::warn!("skipping {}: {:#}", candidate.rel_path, e);
                errors.push(FileError {
                    path: candidate.rel_path.clone(),
                    message: format!("{:#}", e),
                });
            }
        }
    }

    let mut claimed: HashMap<String, String> = parsed
        .iter()
        .filter(|r| owners.get(&r.item_key) == Some(&r.file_path))
        .map(|r| (r.item_key.clone(), r.file_path.clone()))
        .collect();

    let mut records = Vec::with_capacity(parsed.len());
    for record in parsed {
        match claimed.get(&record.item_key) {
            Some(owner) if *owner != record.file_path => {
                errors.push(FileError::duplicate_key(
                    &record.file_path,
                    &record.item_key,
                    owner,
                ));
            }
            Some(_) => records.push(record),
            None => {
                claimed.insert(record.item_key.clone(), record.file_path.clone());
                records.push(record);
            }
        }
    }

    (records, errors)
}

fn strip_title_prefix(heading: &str) -> String {
    TITLE_PREFIXES
        .iter()
        .find_map(|p| heading.strip_prefix(p))
        .unwrap_or(heading)
        .trim()
        .to_string()
}

pub fn body_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}
