use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::discovery::DiscoveryStrategy;
use crate::patterns::PatternConfig;
use crate::resolve::ConflictStrategy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub project: ProjectConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub patterns: PatternConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProjectConfig {
    pub root: PathBuf,
    #[serde(default = "default_index_file")]
    pub index_file: String,
    #[serde(default = "default_unit_descriptor")]
    pub unit_descriptor: String,
    #[serde(default = "default_sub_unit_descriptor")]
    pub sub_unit_descriptor: String,
}

fn default_index_file() -> String {
    "index.md".to_string()
}
fn default_unit_descriptor() -> String {
    "unit.md".to_string()
}
fn default_sub_unit_descriptor() -> String {
    "subunit.md".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            max_file_bytes: default_max_file_bytes(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}
fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,
    #[serde(default)]
    pub discovery_strategy: DiscoveryStrategy,
    #[serde(default = "default_skew_window_secs")]
    pub skew_window_secs: i64,
    #[serde(default)]
    pub create_missing: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            conflict_strategy: ConflictStrategy::default(),
            discovery_strategy: DiscoveryStrategy::default(),
            skew_window_secs: default_skew_window_secs(),
            create_missing: false,
        }
    }
}

fn default_skew_window_secs() -> i64 {
    60
}

impl SyncConfig {
    pub fn skew_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.skew_window_secs)
    }
}

impl Config {
    /// Configuration for a project rooted at `root` with every other
    /// setting at its default.
    pub fn for_project(root: impl Into<PathBuf>, db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            project: ProjectConfig {
                root: root.into(),
                index_file: default_index_file(),
                unit_descriptor: default_unit_descriptor(),
                sub_unit_descriptor: default_sub_unit_descriptor(),
            },
            scan: ScanConfig::default(),
            sync: SyncConfig::default(),
            patterns: PatternConfig::default(),
        }
    }

    /// Absolute-or-as-given path of the optional index document.
    pub fn index_path(&self) -> PathBuf {
        self.project.root.join(&self.project.index_file)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Relative paths are anchored at the config file's directory
    if let Some(base) = path.parent() {
        config.db.path = anchor(base, &config.db.path);
        config.project.root = anchor(base, &config.project.root);
    }

    validate(&config)?;
    Ok(config)
}

fn anchor(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.scan.max_file_bytes == 0 {
        bail!("scan.max_file_bytes must be > 0");
    }

    if config.scan.include_globs.is_empty() {
        bail!("scan.include_globs must list at least one pattern");
    }

    if config.sync.skew_window_secs < 0 {
        bail!("sync.skew_window_secs must be >= 0");
    }

    for name in [
        &config.project.index_file,
        &config.project.unit_descriptor,
        &config.project.sub_unit_descriptor,
    ] {
        if name.is_empty() || name.contains('/') {
            bail!(
                "project file names must be plain file names, got '{}'",
                name
            );
        }
    }

    Ok(())
}
