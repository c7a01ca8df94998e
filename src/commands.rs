//! Command implementations behind the `plansync` binary.
//!
//! Each function takes the loaded [`Config`] plus the parsed flags, prints
//! its result to stdout and returns `anyhow::Result`. Progress and logs go
//! to stderr.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::db;
use crate::discovery::{self, Discovery, DiscoveryStrategy};
use crate::engine::{SyncEngine, SyncOptions};
use crate::leaf_scan;
use crate::migrate;
use crate::models::EntityKind;
use crate::patterns::PatternMatcher;
use crate::progress::ProgressMode;
use crate::resolve::{ConflictDecider, ConflictStrategy, NonInteractive, PromptDecider};
use crate::store::{SqliteStore, Store};

/// Flags of `plansync sync`. `None` falls back to the config file.
#[derive(Debug, Clone, Default)]
pub struct SyncArgs {
    pub strategy: Option<ConflictStrategy>,
    pub discovery: bool,
    pub discovery_strategy: Option<DiscoveryStrategy>,
    pub full: bool,
    pub cleanup: bool,
    pub dry_run: bool,
    pub create_missing: bool,
    pub json: bool,
    pub progress: Option<ProgressMode>,
}

impl SyncArgs {
    pub fn options(&self, config: &Config) -> SyncOptions {
        let mut opts = SyncOptions::from_config(config);
        if let Some(strategy) = self.strategy {
            opts.conflict_strategy = strategy;
        }
        // Naming a discovery strategy implies --discovery.
        if self.discovery || self.discovery_strategy.is_some() {
            opts.discovery = Some(
                self.discovery_strategy
                    .unwrap_or(config.sync.discovery_strategy),
            );
        }
        opts.force_full = self.full;
        opts.cleanup = self.cleanup;
        opts.dry_run = self.dry_run;
        opts.create_missing |= self.create_missing;
        opts
    }
}

pub async fn run_init(config: &Config) -> Result<()> {
    migrate::run_migrations(config).await?;
    println!("Database initialized successfully.");
    Ok(())
}

/// Run one sync against the configured SQLite database.
///
/// The stored last-sync timestamp is read before the run and replaced only
/// when the run committed.
pub async fn run_sync(config: &Config, args: &SyncArgs) -> Result<()> {
    migrate::run_migrations(config).await?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);

    let opts = args.options(config);
    let last_sync = store
        .last_sync()
        .await
        .context("Failed to read last sync timestamp")?;

    let decider: Box<dyn ConflictDecider> = if opts.conflict_strategy
        == ConflictStrategy::Manual
        && atty::is(atty::Stream::Stdin)
    {
        Box::new(PromptDecider)
    } else {
        Box::new(NonInteractive)
    };
    let progress = args.progress.unwrap_or_else(ProgressMode::default_for_tty);

    let engine = SyncEngine::new(config, &store)?
        .with_decider(decider)
        .with_progress(progress.reporter());
    let outcome = engine.run(&opts, last_sync).await?;

    if let Some(at) = outcome.last_sync {
        store
            .set_last_sync(at)
            .await
            .context("Failed to persist last sync timestamp")?;
    }

    if args.json {
        println!("{}", outcome.report.to_json()?);
    } else {
        print!("{}", outcome.report.render_text());
    }
    Ok(())
}

/// Run discovery only and print the accepted hierarchy. Never writes.
pub fn run_discover(
    config: &Config,
    strategy: Option<DiscoveryStrategy>,
    json: bool,
) -> Result<()> {
    let matcher = PatternMatcher::from_config(&config.patterns)?;
    let strategy = strategy.unwrap_or(config.sync.discovery_strategy);
    let found = discovery::discover(config, &matcher, strategy)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&found)?);
    } else {
        print!("{}", render_hierarchy(&found));
    }
    Ok(())
}

fn render_hierarchy(found: &Discovery) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Discovery ({}): {} folders scanned, index {}\n\n",
        found.strategy.map(|s| s.as_str()).unwrap_or("-"),
        found.folders_scanned,
        if found.index_found { "found" } else { "not found" }
    ));

    for unit in found.of_kind(EntityKind::Unit) {
        out.push_str(&format!("{}  {} [{}]\n", unit.key, unit.title, unit.source));
        for sub in found
            .of_kind(EntityKind::SubUnit)
            .filter(|s| s.parent_key.as_deref() == Some(unit.key.as_str()))
        {
            out.push_str(&format!("  {}  {} [{}]\n", sub.key, sub.title, sub.source));
            for item in found
                .of_kind(EntityKind::Item)
                .filter(|i| i.parent_key.as_deref() == Some(sub.key.as_str()))
            {
                out.push_str(&format!("    {}  {}\n", item.key, item.title));
            }
        }
    }

    if !found.conflicts.is_empty() {
        out.push_str("\nConflicts:\n");
        for c in &found.conflicts {
            out.push_str(&format!(
                "  {} ({}): folder={} index={}\n",
                c.key,
                c.reason,
                c.folder_parent.as_deref().unwrap_or("-"),
                c.index_parent.as_deref().unwrap_or("-")
            ));
        }
    }

    if !found.warnings.is_empty() {
        out.push_str("\nWarnings:\n");
        for w in &found.warnings {
            out.push_str(&format!("  - {}\n", w));
        }
    }
    out
}

pub fn run_patterns_validate(config: &Config) -> Result<()> {
    let matcher = PatternMatcher::from_config(&config.patterns)?;
    for kind in [EntityKind::Unit, EntityKind::SubUnit, EntityKind::Item] {
        for p in matcher.patterns(kind) {
            println!("  ok  {:<10} {}", p.label(), p.source);
        }
    }
    for w in matcher.warnings() {
        println!("  warn  {}", w);
    }
    println!("All patterns valid.");
    Ok(())
}

/// Show which pattern matches `path`.
///
/// The full project-relative path is tried against the item patterns and
/// its last segment against the unit and sub-unit patterns.
pub fn run_patterns_match(config: &Config, path: &Path) -> Result<()> {
    let matcher = PatternMatcher::from_config(&config.patterns)?;
    let rel = if path.is_absolute() {
        leaf_scan::relative_path(&config.project.root, path)
    } else {
        path.to_string_lossy().replace('\\', "/")
    };
    let segment = rel
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();

    let mut matched = false;
    if let Some(m) = matcher.match_item(&rel) {
        matched = true;
        println!(
            "item#{}  key={} sub_unit={} unit={}",
            m.pattern_index, m.key, m.sub_unit_key, m.unit_key
        );
    }
    if let Some(m) = matcher.match_sub_unit(&segment) {
        matched = true;
        println!(
            "sub_unit#{}  key={} unit={}",
            m.pattern_index, m.key, m.unit_key
        );
    }
    if let Some(m) = matcher.match_unit(&segment) {
        matched = true;
        println!("unit#{}  key={}", m.pattern_index, m.key);
    }

    if !matched {
        bail!("no pattern matches '{}'", rel);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_args_override_config() {
        let config = Config::for_project("/tmp/p", "/tmp/p.db");
        let args = SyncArgs {
            strategy: Some(ConflictStrategy::NewerWins),
            discovery_strategy: Some(DiscoveryStrategy::FolderAuthoritative),
            cleanup: true,
            ..Default::default()
        };
        let opts = args.options(&config);
        assert_eq!(opts.conflict_strategy, ConflictStrategy::NewerWins);
        assert_eq!(opts.discovery, Some(DiscoveryStrategy::FolderAuthoritative));
        assert!(opts.cleanup);
        assert!(!opts.dry_run);
    }

    #[test]
    fn test_sync_args_default_to_config() {
        let config = Config::for_project("/tmp/p", "/tmp/p.db");
        let opts = SyncArgs::default().options(&config);
        assert_eq!(opts.conflict_strategy, ConflictStrategy::FileWins);
        assert_eq!(opts.discovery, None);

        let opts = SyncArgs {
            discovery: true,
            ..Default::default()
        }
        .options(&config);
        assert_eq!(opts.discovery, Some(DiscoveryStrategy::Merge));
    }
}
