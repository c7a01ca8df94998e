use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::TempDir;

use plansync::config::Config;
use plansync::db;
use plansync::discovery::DiscoveryStrategy;
use plansync::engine::{SyncEngine, SyncOptions, SyncOutcome};
use plansync::error::{Result, SyncError};
use plansync::migrate;
use plansync::models::{ConflictField, DiscoveryConflictReason};
use plansync::progress::SyncPhase;
use plansync::resolve::{ConflictStrategy, Side};
use plansync::store::{MemoryStore, SqliteStore, Store};

const RETRY: &str = "U04-core/U04-S01-retries/001-add-retry.md";
const BACKOFF: &str = "U04-core/U04-S01-retries/002-backoff.md";

struct Project {
    _tmp: TempDir,
    root: PathBuf,
    config: Config,
}

impl Project {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("plan");
        fs::create_dir_all(&root).unwrap();
        let config = Config::for_project(&root, tmp.path().join("data/plansync.sqlite"));
        Self {
            _tmp: tmp,
            root,
            config,
        }
    }

    /// Two items under U04-S01, mtimes two days in the past.
    fn seeded() -> Self {
        let p = Self::new();
        p.write(RETRY, "---\ntitle: Add retries\n---\n\nBody.\n");
        p.write(BACKOFF, "# Task: Exponential backoff\n\nBody.\n");
        let old = Utc::now() - Duration::days(2);
        p.touch(RETRY, old);
        p.touch(BACKOFF, old);
        p
    }

    fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn touch(&self, rel: &str, at: DateTime<Utc>) {
        let file = fs::File::options()
            .write(true)
            .open(self.root.join(rel))
            .unwrap();
        file.set_modified(SystemTime::from(at)).unwrap();
    }

    fn options(&self) -> SyncOptions {
        SyncOptions {
            create_missing: true,
            ..SyncOptions::from_config(&self.config)
        }
    }
}

/// One run the way the CLI does it: read the checkpoint, run, persist the
/// checkpoint only on commit.
async fn sync(config: &Config, store: &dyn Store, opts: SyncOptions) -> Result<SyncOutcome> {
    let engine = SyncEngine::new(config, store)?;
    let last_sync = store.last_sync().await?;
    let outcome = engine.run(&opts, last_sync).await?;
    if let Some(at) = outcome.last_sync {
        store.set_last_sync(at).await?;
    }
    Ok(outcome)
}

async fn sqlite_store(config: &Config) -> SqliteStore {
    migrate::run_migrations(config).await.unwrap();
    SqliteStore::new(db::connect(config).await.unwrap())
}

fn path_of(root: &Path, rel: &str) -> PathBuf {
    root.join(rel)
}

#[tokio::test]
async fn test_first_sync_creates_items_and_parents() {
    let p = Project::seeded();
    let store = MemoryStore::new();

    let outcome = sync(&p.config, &store, p.options()).await.unwrap();
    let report = &outcome.report;
    assert_eq!(report.created, 2);
    assert_eq!(report.units_created, 1);
    assert_eq!(report.sub_units_created, 1);
    assert!(report.errors.is_empty());
    assert_eq!(report.phases.last(), Some(&SyncPhase::Committed));
    assert!(outcome.last_sync.is_some());

    let items = store.list_items().await.unwrap();
    let keys: Vec<&str> = items.iter().map(|i| i.item_key.as_str()).collect();
    assert_eq!(keys, vec!["U04-S01-001", "U04-S01-002"]);
    assert_eq!(items[1].title, "Exponential backoff");
    assert!(items.iter().all(|i| i.status == "todo"));

    let sub_units = store.list_sub_units().await.unwrap();
    assert_eq!(sub_units[0].title, "Auto-created sub-unit U04-S01");
}

#[tokio::test]
async fn test_second_sync_is_idempotent() {
    let p = Project::seeded();
    let store = MemoryStore::new();
    sync(&p.config, &store, p.options()).await.unwrap();
    let before = store.list_items().await.unwrap();

    let opts = SyncOptions {
        force_full: true,
        ..p.options()
    };
    let report = sync(&p.config, &store, opts).await.unwrap().report;
    assert_eq!(report.created, 0);
    assert_eq!(report.updated, 0);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.conflicts_resolved, 0);
    assert!(!report.has_changes());
    assert_eq!(store.list_items().await.unwrap(), before);
}

#[tokio::test]
async fn test_incremental_run_skips_unmodified_files() {
    let p = Project::seeded();
    let store = MemoryStore::new();
    sync(&p.config, &store, p.options()).await.unwrap();

    let report = sync(&p.config, &store, p.options()).await.unwrap().report;
    assert!(report.phases.contains(&SyncPhase::Filtering));
    assert_eq!(report.files_scanned, 2);
    assert_eq!(report.files_skipped, 2);
    assert_eq!(report.files_processed, 0);
    assert!(report.orphaned.is_empty());

    // A new file is picked up even with an old mtime.
    p.write(
        "U04-core/U04-S01-retries/003-jitter.md",
        "---\ntitle: Jitter\n---\n",
    );
    p.touch("U04-core/U04-S01-retries/003-jitter.md", Utc::now() - Duration::days(3));
    let report = sync(&p.config, &store, p.options()).await.unwrap().report;
    assert_eq!(report.files_processed, 1);
    assert_eq!(report.created, 1);
}

#[tokio::test]
async fn test_status_is_never_written() {
    let p = Project::seeded();
    let store = MemoryStore::new();
    sync(&p.config, &store, p.options()).await.unwrap();
    store.set_status("U04-S01-001", "done").unwrap();

    p.write(RETRY, "---\ntitle: Add retry logic\nstatus: todo\n---\n");
    let report = sync(&p.config, &store, p.options()).await.unwrap().report;
    assert_eq!(report.updated, 1);

    let items = store.list_items().await.unwrap();
    let row = items.iter().find(|i| i.item_key == "U04-S01-001").unwrap();
    assert_eq!(row.title, "Add retry logic");
    assert_eq!(row.status, "done");
}

#[tokio::test]
async fn test_deleted_file_is_reported_not_removed() {
    let p = Project::seeded();
    let store = MemoryStore::new();
    sync(&p.config, &store, p.options()).await.unwrap();

    fs::remove_file(path_of(&p.root, BACKOFF)).unwrap();
    let report = sync(&p.config, &store, p.options()).await.unwrap().report;
    assert_eq!(report.orphaned, vec!["U04-S01-002".to_string()]);
    assert_eq!(report.deleted, 0);
    assert!(report.warnings.iter().any(|w| w.contains("--cleanup")));
    assert_eq!(store.list_items().await.unwrap().len(), 2);

    let opts = SyncOptions {
        cleanup: true,
        ..p.options()
    };
    let report = sync(&p.config, &store, opts).await.unwrap().report;
    assert_eq!(report.deleted, 1);
    assert_eq!(store.list_items().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_rekeyed_file_orphans_old_row() {
    let p = Project::seeded();
    let store = MemoryStore::new();
    sync(&p.config, &store, p.options()).await.unwrap();

    p.write(RETRY, "---\nkey: U04-S01-900\ntitle: Add retries\n---\n");
    let opts = SyncOptions {
        force_full: true,
        cleanup: true,
        ..p.options()
    };
    let report = sync(&p.config, &store, opts).await.unwrap().report;
    assert_eq!(report.orphaned, vec!["U04-S01-001".to_string()]);
    assert_eq!(report.created, 1);
    assert_eq!(report.deleted, 1);

    let items = store.list_items().await.unwrap();
    let at_path: Vec<&str> = items
        .iter()
        .filter(|i| i.file_path.as_deref() == Some(RETRY))
        .map(|i| i.item_key.as_str())
        .collect();
    assert_eq!(at_path, vec!["U04-S01-900"]);
}

#[tokio::test]
async fn test_duplicate_key_rejected_in_incremental_and_full_runs() {
    let p = Project::seeded();
    let store = MemoryStore::new();
    sync(&p.config, &store, p.options()).await.unwrap();

    let copy = "U04-core/U04-S01-retries/zzz-copy.md";
    p.write(copy, "---\nkey: U04-S01-001\ntitle: Copied\n---\n");

    let incremental = p.options();
    let full = SyncOptions {
        force_full: true,
        ..p.options()
    };
    for opts in [incremental, full] {
        let report = sync(&p.config, &store, opts).await.unwrap().report;
        assert_eq!(report.errors.len(), 1, "errors: {:?}", report.errors);
        assert_eq!(report.errors[0].path, copy);
        assert!(report.errors[0].message.contains("duplicate item key 'U04-S01-001'"));
        assert!(report.orphaned.is_empty());
        assert_eq!(report.updated, 0);

        let items = store.list_items().await.unwrap();
        assert_eq!(items.len(), 2);
        let row = items.iter().find(|i| i.item_key == "U04-S01-001").unwrap();
        assert_eq!(row.file_path.as_deref(), Some(RETRY));
        assert_eq!(row.title, "Add retries");
    }
}

#[tokio::test]
async fn test_newer_wins_file_side() {
    let p = Project::seeded();
    let store = MemoryStore::new();
    sync(&p.config, &store, p.options()).await.unwrap();
    store
        .set_updated_at("U04-S01-001", Utc::now() - Duration::hours(2))
        .unwrap();

    p.write(RETRY, "---\ntitle: Add retry logic\n---\n\nBody.\n");
    let opts = SyncOptions {
        conflict_strategy: ConflictStrategy::NewerWins,
        ..p.options()
    };
    let report = sync(&p.config, &store, opts).await.unwrap().report;
    assert_eq!(report.updated, 1);
    assert_eq!(report.conflicts_resolved, 1);
    assert_eq!(report.conflicts[0].conflict.field, ConflictField::Title);
    assert_eq!(report.conflicts[0].conflict.store_value, "Add retries");
    assert_eq!(report.conflicts[0].resolution, Side::File);

    let items = store.list_items().await.unwrap();
    assert_eq!(items[0].title, "Add retry logic");
}

#[tokio::test]
async fn test_newer_wins_store_side_keeps_row() {
    let p = Project::seeded();
    let store = MemoryStore::new();
    sync(&p.config, &store, p.options()).await.unwrap();

    p.write(
        RETRY,
        "---\ntitle: Add retry logic\ndescription: Retry failed calls\n---\n",
    );
    p.touch(RETRY, Utc::now() - Duration::hours(3));
    let opts = SyncOptions {
        conflict_strategy: ConflictStrategy::NewerWins,
        force_full: true,
        ..p.options()
    };
    let report = sync(&p.config, &store, opts).await.unwrap().report;
    assert_eq!(report.conflicts_resolved, 1);
    assert_eq!(report.conflicts[0].resolution, Side::Store);
    // The empty description is still filled from the file.
    assert_eq!(report.updated, 1);

    let items = store.list_items().await.unwrap();
    assert_eq!(items[0].title, "Add retries");
    assert_eq!(items[0].description.as_deref(), Some("Retry failed calls"));
}

#[tokio::test]
async fn test_manual_without_operator_fails_fast() {
    let p = Project::seeded();
    let store = MemoryStore::new();
    sync(&p.config, &store, p.options()).await.unwrap();
    let checkpoint = store.last_sync().await.unwrap();

    p.write(RETRY, "---\ntitle: Add retry logic\n---\n");
    let opts = SyncOptions {
        conflict_strategy: ConflictStrategy::Manual,
        ..p.options()
    };
    let err = sync(&p.config, &store, opts).await.unwrap_err();
    match err {
        SyncError::DecisionUnavailable { entity_key, field } => {
            assert_eq!(entity_key, "U04-S01-001");
            assert_eq!(field, "title");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.list_items().await.unwrap()[0].title, "Add retries");
    assert_eq!(store.last_sync().await.unwrap(), checkpoint);
}

#[tokio::test]
async fn test_missing_parent_rolls_back_whole_run() {
    let p = Project::seeded();
    let store = MemoryStore::new();
    sync(&p.config, &store, p.options()).await.unwrap();
    let checkpoint = store.last_sync().await.unwrap();

    p.write(RETRY, "---\ntitle: Add retry logic\n---\n");
    p.write("U05-ops/U05-S01-alerts/001-pager.md", "# Pager rotation\n");
    let opts = SyncOptions {
        create_missing: false,
        ..p.options()
    };
    let err = sync(&p.config, &store, opts).await.unwrap_err();
    match err {
        SyncError::ApplyAborted { entity_key, .. } => assert_eq!(entity_key, "U05-S01-001"),
        other => panic!("unexpected error: {other}"),
    }

    let items = store.list_items().await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].title, "Add retries");
    assert_eq!(store.last_sync().await.unwrap(), checkpoint);
}

#[tokio::test]
async fn test_dry_run_never_applies() {
    let p = Project::seeded();
    let store = MemoryStore::new();

    let opts = SyncOptions {
        dry_run: true,
        ..p.options()
    };
    let outcome = sync(&p.config, &store, opts).await.unwrap();
    assert!(outcome.report.dry_run);
    assert_eq!(outcome.report.created, 2);
    assert_eq!(outcome.report.units_created, 1);
    assert!(outcome.last_sync.is_none());
    assert!(!outcome.report.phases.contains(&SyncPhase::Applying));
    assert!(store.list_items().await.unwrap().is_empty());
    assert!(store.last_sync().await.unwrap().is_none());
}

#[tokio::test]
async fn test_nothing_parsed_is_fatal() {
    let p = Project::new();
    p.write(RETRY, "---\ntitle: never closed\n");

    let store = MemoryStore::new();
    let err = sync(&p.config, &store, p.options()).await.unwrap_err();
    assert!(matches!(err, SyncError::NothingParsed { failures: 1 }));
}

#[tokio::test]
async fn test_bad_file_is_skipped_and_reported() {
    let p = Project::seeded();
    p.write("U04-core/U04-S01-retries/003-broken.md", "---\ntitle: [\n---\n");

    let store = MemoryStore::new();
    let report = sync(&p.config, &store, p.options()).await.unwrap().report;
    assert_eq!(report.created, 2);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].path, "U04-core/U04-S01-retries/003-broken.md");
}

#[tokio::test]
async fn test_merge_discovery_keeps_folder_placement() {
    let p = Project::new();
    p.write(
        "U04-platform/U04-S02-backoff/T-U04-S01-001-add-retries.md",
        "---\ntitle: Add retry logic\n---\n",
    );
    p.write(
        "index.md",
        "# Plan\n\
         - [Platform](U04-platform/)\n\
         - [Retry policy](U04-platform/U04-S01-retry/)\n\
         - [Add retry logic](U04-platform/U04-S01-retry/T-U04-S01-001-add-retries.md)\n",
    );

    let store = MemoryStore::new();
    let opts = SyncOptions {
        discovery: Some(DiscoveryStrategy::Merge),
        create_missing: false,
        ..SyncOptions::from_config(&p.config)
    };
    let report = sync(&p.config, &store, opts).await.unwrap().report;

    assert_eq!(report.discovery_conflicts.len(), 1);
    let c = &report.discovery_conflicts[0];
    assert_eq!(c.key, "U04-S01-001");
    assert_eq!(c.reason, DiscoveryConflictReason::ParentMismatch);
    assert_eq!(c.folder_parent.as_deref(), Some("U04-S02"));
    assert_eq!(c.index_parent.as_deref(), Some("U04-S01"));

    let items = store.list_items().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].sub_unit_key, "U04-S02");
    let units = store.list_units().await.unwrap();
    assert_eq!(units[0].title, "Platform");
}

#[tokio::test]
async fn test_index_authoritative_requires_index() {
    let p = Project::seeded();
    let store = MemoryStore::new();
    let opts = SyncOptions {
        discovery: Some(DiscoveryStrategy::IndexAuthoritative),
        ..p.options()
    };
    let err = sync(&p.config, &store, opts).await.unwrap_err();
    assert!(matches!(err, SyncError::Discovery(_)));
    assert!(store.list_items().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sqlite_sync_round_trip() {
    let p = Project::seeded();
    let store = sqlite_store(&p.config).await;

    let report = sync(&p.config, &store, p.options()).await.unwrap().report;
    assert_eq!(report.created, 2);
    assert!(store.last_sync().await.unwrap().is_some());

    sqlx::query("UPDATE items SET status = 'in-progress' WHERE item_key = ?")
        .bind("U04-S01-001")
        .execute(store.pool())
        .await
        .unwrap();

    p.write(RETRY, "---\ntitle: Add retry logic\n---\n");
    let report = sync(&p.config, &store, p.options()).await.unwrap().report;
    assert_eq!(report.updated, 1);
    assert_eq!(report.skipped, 0);

    let items = store.list_items().await.unwrap();
    let row = items.iter().find(|i| i.item_key == "U04-S01-001").unwrap();
    assert_eq!(row.title, "Add retry logic");
    assert_eq!(row.status, "in-progress");

    let notes: Vec<String> = store
        .list_history("U04-S01-001")
        .await
        .unwrap()
        .into_iter()
        .map(|h| h.notes)
        .collect();
    assert_eq!(
        notes,
        vec!["Imported from file", "Updated from file (1 conflicts resolved)"]
    );

    let opts = SyncOptions {
        force_full: true,
        ..p.options()
    };
    let report = sync(&p.config, &store, opts).await.unwrap().report;
    assert!(!report.has_changes());
    assert_eq!(report.skipped, 2);
}

#[tokio::test]
async fn test_sqlite_failed_apply_leaves_store_untouched() {
    let p = Project::seeded();
    let store = sqlite_store(&p.config).await;
    sync(&p.config, &store, p.options()).await.unwrap();
    let checkpoint = store.last_sync().await.unwrap();

    p.write(RETRY, "---\ntitle: Add retry logic\n---\n");
    p.write("U05-ops/U05-S01-alerts/001-pager.md", "# Pager rotation\n");
    let opts = SyncOptions {
        create_missing: false,
        ..p.options()
    };
    let err = sync(&p.config, &store, opts).await.unwrap_err();
    assert!(matches!(err, SyncError::ApplyAborted { .. }));

    let items = store.list_items().await.unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().any(|i| i.title == "Add retries"));
    assert_eq!(store.last_sync().await.unwrap(), checkpoint);
}
