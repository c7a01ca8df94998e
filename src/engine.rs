//! Sync engine.
//!
//! Runs the fixed pipeline
//!
//! ```text
//! Idle → Discovering? → Scanning → Filtering? → Detecting → Resolving
//!      → Applying → Committed | RolledBack
//! ```
//!
//! `Discovering` runs only when a discovery strategy is requested and
//! `Filtering` only when a last-sync timestamp is supplied without
//! `force_full`. Every write decided in `Resolving` goes to the store as one
//! [`ApplyPlan`], so a run commits completely or not at all. A dry run stops
//! after `Resolving` and reports what the plan would do.
//!
//! The last-sync checkpoint is an explicit input of [`SyncEngine::run`]; the
//! new value comes back in [`SyncOutcome`] only when the run committed.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::Config;
use crate::detect;
use crate::discovery::{self, Discovery, DiscoveryStrategy};
use crate::error::{Result, SyncError};
use crate::incremental::{self, FilterOptions};
use crate::leaf_scan;
use crate::models::{EntityKind, ItemRow, LeafRecord, SubUnitRow, UnitRow};
use crate::patterns::PatternMatcher;
use crate::progress::{NoProgress, SyncPhase, SyncProgressEvent, SyncProgressReporter};
use crate::report::{ConflictReport, SyncReport};
use crate::resolve::{self, ConflictDecider, ConflictStrategy, NonInteractive, ResolveContext};
use crate::store::{ApplyPlan, ItemCreate, Store, SubUnitUpsert, UnitUpsert};

/// Per-run switches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncOptions {
    pub conflict_strategy: ConflictStrategy,
    /// `None` skips discovery entirely.
    pub discovery: Option<DiscoveryStrategy>,
    pub force_full: bool,
    pub cleanup: bool,
    pub dry_run: bool,
    pub create_missing: bool,
    pub skew: Duration,
}

impl SyncOptions {
    /// Options from the `[sync]` config section, discovery off.
    pub fn from_config(config: &Config) -> Self {
        Self {
            conflict_strategy: config.sync.conflict_strategy,
            discovery: None,
            force_full: false,
            cleanup: false,
            dry_run: false,
            create_missing: config.sync.create_missing,
            skew: config.sync.skew_window(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub report: SyncReport,
    /// New checkpoint to persist. `None` unless the run committed.
    pub last_sync: Option<DateTime<Utc>>,
}

/// Current store rows, loaded once per run.
struct Snapshot {
    units: Vec<UnitRow>,
    sub_units: Vec<SubUnitRow>,
    items: Vec<ItemRow>,
}

pub struct SyncEngine<'a> {
    config: &'a Config,
    store: &'a dyn Store,
    matcher: PatternMatcher,
    decider: Box<dyn ConflictDecider + 'a>,
    progress: Box<dyn SyncProgressReporter + 'a>,
}

impl<'a> SyncEngine<'a> {
    /// Validates the configured patterns; an invalid one fails here,
    /// before any file is touched.
    pub fn new(config: &'a Config, store: &'a dyn Store) -> Result<Self> {
        let matcher = PatternMatcher::from_config(&config.patterns)?;
        Ok(Self {
            config,
            store,
            matcher,
            decider: Box::new(NonInteractive),
            progress: Box::new(NoProgress),
        })
    }

    pub fn with_decider(mut self, decider: Box<dyn ConflictDecider + 'a>) -> Self {
        self.decider = decider;
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn SyncProgressReporter + 'a>) -> Self {
        self.progress = progress;
        self
    }

    pub fn matcher(&self) -> &PatternMatcher {
        &self.matcher
    }

    fn enter(&self, report: &mut SyncReport, phase: SyncPhase) {
        tracing::debug!(%phase, "sync phase");
        report.phases.push(phase);
        self.progress.report(SyncProgressEvent::Phase(phase));
    }

    pub async fn run(
        &self,
        opts: &SyncOptions,
        last_sync: Option<DateTime<Utc>>,
    ) -> Result<SyncOutcome> {
        let started = Utc::now();
        let mut report = SyncReport {
            dry_run: opts.dry_run,
            conflict_strategy: opts.conflict_strategy.as_str().to_string(),
            discovery_strategy: opts.discovery.map(|d| d.as_str().to_string()),
            ..Default::default()
        };
        report.warnings.extend(self.matcher.warnings().iter().cloned());
        self.enter(&mut report, SyncPhase::Idle);

        let discovery = match opts.discovery {
            Some(strategy) => {
                self.enter(&mut report, SyncPhase::Discovering);
                let d = discovery::discover(self.config, &self.matcher, strategy)?;
                report.discovery_conflicts = d.conflicts.clone();
                report.warnings.extend(d.warnings.iter().cloned());
                Some(d)
            }
            None => None,
        };

        self.enter(&mut report, SyncPhase::Scanning);
        let walk = leaf_scan::walk_leaf_files(self.config, &self.matcher)
            .map_err(|e| SyncError::Config(format!("{:#}", e)))?;
        report.files_scanned = walk.candidates.len();
        report.warnings.extend(walk.warnings.iter().cloned());
        let item_patterns = self.matcher.patterns(EntityKind::Item);
        for c in &walk.candidates {
            if let Some(p) = item_patterns.get(c.item.pattern_index) {
                *report.pattern_matches.entry(p.label()).or_default() += 1;
            }
        }

        let snapshot = Snapshot {
            units: self.store.list_units().await?,
            sub_units: self.store.list_sub_units().await?,
            items: self.store.list_items().await?,
        };

        let filter = FilterOptions {
            last_sync,
            force_full: opts.force_full,
            skew: opts.skew,
            now: started,
        };
        let candidates = if incremental::is_active(&filter) {
            self.enter(&mut report, SyncPhase::Filtering);
            let known: HashSet<String> = snapshot
                .items
                .iter()
                .filter_map(|i| i.file_path.clone())
                .collect();
            let (kept, stats) = incremental::filter_candidates(&walk.candidates, &known, &filter);
            report.files_skipped = stats.skipped;
            report.warnings.extend(stats.warnings);
            kept
        } else {
            walk.candidates.clone()
        };
        report.files_processed = candidates.len();
        self.progress.report(SyncProgressEvent::Files {
            scanned: report.files_scanned as u64,
            processed: report.files_processed as u64,
        });

        let owners: HashMap<String, String> = snapshot
            .items
            .iter()
            .filter_map(|i| Some((i.item_key.clone(), i.file_path.clone()?)))
            .collect();
        let (mut records, errors) =
            leaf_scan::parse_leaves(&candidates, self.config.scan.max_file_bytes, &owners);
        report.errors = errors;
        if records.is_empty() && !report.errors.is_empty() {
            return Err(SyncError::NothingParsed {
                failures: report.errors.len(),
            });
        }
        if let Some(d) = &discovery {
            apply_accepted_parents(&mut records, d, &snapshot.sub_units);
        }

        self.enter(&mut report, SyncPhase::Detecting);
        let present: HashSet<String> = walk
            .candidates
            .iter()
            .map(|c| c.rel_path.clone())
            .collect();
        let mut detection = detect::detect(&records, &snapshot.items, &present, started);
        report.errors.append(&mut detection.duplicates);
        report.orphaned = detection
            .orphaned
            .iter()
            .map(|r| r.item_key.clone())
            .collect();

        self.enter(&mut report, SyncPhase::Resolving);
        let ctx = ResolveContext {
            skew: opts.skew,
            decider: self.decider.as_ref(),
        };
        let mut plan = ApplyPlan::default();
        for matched in &detection.matched {
            let resolution = resolve::resolve_item(matched, opts.conflict_strategy, &ctx)?;
            report.conflicts_resolved += resolution.conflicts_resolved();
            report.conflicts.extend(
                matched
                    .conflicts
                    .iter()
                    .zip(&resolution.choices)
                    .map(|(c, side)| ConflictReport {
                        conflict: c.clone(),
                        resolution: *side,
                    }),
            );
            match resolution.update {
                Some(update) => plan.updates.push(update),
                None => report.skipped += 1,
            }
        }
        plan.creates = detection
            .new
            .iter()
            .map(|r| ItemCreate {
                item_key: r.item_key.clone(),
                title: r.title.clone(),
                description: r.description.clone(),
                sub_unit_key: r.parent_sub_unit_key.clone(),
                file_path: r.file_path.clone(),
            })
            .collect();
        if opts.cleanup {
            plan.deletes = report.orphaned.clone();
        } else if !report.orphaned.is_empty() {
            report.warnings.push(format!(
                "{} orphaned item(s) kept; run with --cleanup to delete them",
                report.orphaned.len()
            ));
        }
        plan_parents(
            &mut plan,
            discovery.as_ref(),
            &records,
            &snapshot,
            opts.create_missing,
        );

        if opts.dry_run {
            report.created = plan.creates.len();
            report.updated = plan.updates.len();
            report.deleted = plan.deletes.len();
            let units: HashSet<&str> = snapshot.units.iter().map(|u| u.unit_key.as_str()).collect();
            let subs: HashSet<&str> = snapshot
                .sub_units
                .iter()
                .map(|s| s.sub_unit_key.as_str())
                .collect();
            report.units_created = plan
                .units
                .iter()
                .filter(|u| !units.contains(u.unit_key.as_str()))
                .count();
            report.sub_units_created = plan
                .sub_units
                .iter()
                .filter(|s| !subs.contains(s.sub_unit_key.as_str()))
                .count();
            return Ok(SyncOutcome {
                report,
                last_sync: None,
            });
        }

        self.enter(&mut report, SyncPhase::Applying);
        match self.store.apply(&plan).await {
            Ok(counts) => {
                report.created = counts.created;
                report.updated = counts.updated;
                report.deleted = counts.deleted;
                report.units_created = counts.units_created;
                report.sub_units_created = counts.sub_units_created;
                self.enter(&mut report, SyncPhase::Committed);
                tracing::info!(
                    created = report.created,
                    updated = report.updated,
                    deleted = report.deleted,
                    "sync committed"
                );
                Ok(SyncOutcome {
                    report,
                    last_sync: Some(started),
                })
            }
            Err(e) => {
                self.enter(&mut report, SyncPhase::RolledBack);
                tracing::warn!(entity = %e.entity_key, "sync rolled back: {}", e.reason);
                Err(e.into())
            }
        }
    }
}

/// Items in the accepted hierarchy take its parent SubUnit, and that
/// SubUnit's Unit, over the folder-inferred one.
fn apply_accepted_parents(records: &mut [LeafRecord], discovery: &Discovery, sub_units: &[SubUnitRow]) {
    for record in records.iter_mut() {
        let Some(parent) = discovery.item_parent(&record.item_key) else {
            continue;
        };
        if parent == record.parent_sub_unit_key {
            continue;
        }
        let unit = discovery
            .find(EntityKind::SubUnit, parent)
            .and_then(|n| n.parent_key.clone())
            .or_else(|| {
                sub_units
                    .iter()
                    .find(|s| s.sub_unit_key == parent)
                    .map(|s| s.unit_key.clone())
            });
        record.parent_sub_unit_key = parent.to_string();
        if let Some(unit) = unit {
            record.parent_unit_key = unit;
        }
    }
}

/// Fill the plan's Unit and SubUnit upserts.
///
/// With discovery, every accepted Unit and SubUnit is upserted. With
/// `create_missing`, parents referenced by planned items that exist neither
/// in the store nor in the plan are created with placeholder titles.
/// Otherwise missing parents are left for the store to reject.
fn plan_parents(
    plan: &mut ApplyPlan,
    discovery: Option<&Discovery>,
    records: &[LeafRecord],
    snapshot: &Snapshot,
    create_missing: bool,
) {
    let mut units: BTreeMap<String, UnitUpsert> = BTreeMap::new();
    let mut sub_units: BTreeMap<String, SubUnitUpsert> = BTreeMap::new();

    if let Some(d) = discovery {
        for node in d.of_kind(EntityKind::Unit) {
            units.insert(
                node.key.clone(),
                UnitUpsert {
                    unit_key: node.key.clone(),
                    title: node.title.clone(),
                },
            );
        }
        for node in d.of_kind(EntityKind::SubUnit) {
            let Some(unit_key) = node.parent_key.clone() else {
                continue;
            };
            sub_units.insert(
                node.key.clone(),
                SubUnitUpsert {
                    sub_unit_key: node.key.clone(),
                    unit_key,
                    title: node.title.clone(),
                },
            );
        }
    }

    if create_missing {
        let known_units: HashSet<&str> = snapshot.units.iter().map(|u| u.unit_key.as_str()).collect();
        let known_subs: HashSet<&str> = snapshot
            .sub_units
            .iter()
            .map(|s| s.sub_unit_key.as_str())
            .collect();

        let unit_of: BTreeMap<&str, &str> = records
            .iter()
            .map(|r| (r.parent_sub_unit_key.as_str(), r.parent_unit_key.as_str()))
            .collect();
        let referenced = plan
            .creates
            .iter()
            .map(|c| c.sub_unit_key.as_str())
            .chain(plan.updates.iter().map(|u| u.sub_unit_key.as_str()));

        for sub_key in referenced {
            if known_subs.contains(sub_key) || sub_units.contains_key(sub_key) {
                continue;
            }
            let Some(unit_key) = unit_of.get(sub_key) else {
                continue;
            };
            sub_units.insert(
                sub_key.to_string(),
                SubUnitUpsert {
                    sub_unit_key: sub_key.to_string(),
                    unit_key: unit_key.to_string(),
                    title: format!("Auto-created sub-unit {}", sub_key),
                },
            );
        }

        let missing_units: Vec<String> = sub_units
            .values()
            .map(|s| s.unit_key.clone())
            .filter(|u| !known_units.contains(u.as_str()) && !units.contains_key(u))
            .collect();
        for unit_key in missing_units {
            units.insert(
                unit_key.clone(),
                UnitUpsert {
                    title: format!("Auto-created unit {}", unit_key),
                    unit_key,
                },
            );
        }
    }

    plan.units = units.into_values().collect();
    plan.sub_units = sub_units.into_values().collect();
}
