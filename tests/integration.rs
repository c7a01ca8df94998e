use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn plansync_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_plansync"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let sub_unit = root.join("plan/U04-core/U04-S01-retries");
    fs::create_dir_all(&sub_unit).unwrap();
    fs::write(
        root.join("plan/U04-core/unit.md"),
        "---\ntitle: Core Platform\n---\n",
    )
    .unwrap();
    fs::write(
        sub_unit.join("001-add-retry.md"),
        "---\ntitle: Add retries\ndescription: Retry failed requests\n---\n\nDetails.\n",
    )
    .unwrap();
    fs::write(
        sub_unit.join("002-backoff.md"),
        "# Task: Exponential backoff\n\nDetails.\n",
    )
    .unwrap();

    // Relative paths resolve against the config directory.
    let config_content = r#"[db]
path = "../data/plansync.sqlite"

[project]
root = "../plan"

[sync]
conflict_strategy = "file-wins"
create_missing = true
"#;

    let config_path = config_dir.join("plansync.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_plansync(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = plansync_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run plansync binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn sync_json(config_path: &Path, extra: &[&str]) -> serde_json::Value {
    let mut args = vec!["sync", "--json"];
    args.extend_from_slice(extra);
    let (stdout, stderr, success) = run_plansync(config_path, &args);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    serde_json::from_str(&stdout)
        .unwrap_or_else(|e| panic!("sync --json printed invalid JSON ({}): {}", e, stdout))
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_plansync(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/plansync.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_plansync(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_plansync(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_sync_text_summary() {
    let (_tmp, config_path) = setup_test_env();

    run_plansync(&config_path, &["init"]);
    let (stdout, stderr, success) = run_plansync(&config_path, &["sync"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Sync Summary:"));
    assert!(stdout.contains("Items created:      2"));
    assert!(stdout.contains("Parents created:    1 units, 1 sub-units"));
}

#[test]
fn test_sync_idempotent_no_duplicates() {
    let (_tmp, config_path) = setup_test_env();

    run_plansync(&config_path, &["init"]);
    let first = sync_json(&config_path, &["--full"]);
    assert_eq!(first["created"], 2);

    let second = sync_json(&config_path, &["--full"]);
    assert_eq!(second["created"], 0);
    assert_eq!(second["updated"], 0);
    assert_eq!(second["skipped"], 2);
    assert_eq!(second["conflicts_resolved"], 0);
}

#[test]
fn test_sync_edit_resolves_conflict_file_wins() {
    let (tmp, config_path) = setup_test_env();

    run_plansync(&config_path, &["init"]);
    sync_json(&config_path, &[]);

    fs::write(
        tmp.path()
            .join("plan/U04-core/U04-S01-retries/001-add-retry.md"),
        "---\ntitle: Add retry logic\ndescription: Retry failed requests\n---\n",
    )
    .unwrap();

    let report = sync_json(&config_path, &[]);
    assert_eq!(report["updated"], 1);
    assert_eq!(report["conflicts_resolved"], 1);
    let conflict = &report["conflicts"][0];
    assert_eq!(conflict["entity_key"], "U04-S01-001");
    assert_eq!(conflict["field"], "title");
    assert_eq!(conflict["store_value"], "Add retries");
    assert_eq!(conflict["resolution"], "file");
}

#[test]
fn test_sync_dry_run_writes_nothing() {
    let (_tmp, config_path) = setup_test_env();

    run_plansync(&config_path, &["init"]);
    let (stdout, _, success) = run_plansync(&config_path, &["sync", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("DRY-RUN MODE"));
    assert!(stdout.contains("Items created:      2"));

    // Nothing was committed, so a real run still creates both items.
    let report = sync_json(&config_path, &[]);
    assert_eq!(report["created"], 2);
}

#[test]
fn test_sync_cleanup_removes_orphans() {
    let (tmp, config_path) = setup_test_env();

    run_plansync(&config_path, &["init"]);
    sync_json(&config_path, &[]);

    fs::remove_file(
        tmp.path()
            .join("plan/U04-core/U04-S01-retries/002-backoff.md"),
    )
    .unwrap();

    let report = sync_json(&config_path, &[]);
    assert_eq!(report["orphaned"], serde_json::json!(["U04-S01-002"]));
    assert_eq!(report["deleted"], 0);

    let report = sync_json(&config_path, &["--cleanup"]);
    assert_eq!(report["deleted"], 1);

    let report = sync_json(&config_path, &["--full"]);
    assert_eq!(report["orphaned"], serde_json::json!([]));
}

#[test]
fn test_sync_manual_without_terminal_fails() {
    let (tmp, config_path) = setup_test_env();

    run_plansync(&config_path, &["init"]);
    sync_json(&config_path, &[]);

    fs::write(
        tmp.path()
            .join("plan/U04-core/U04-S01-retries/001-add-retry.md"),
        "---\ntitle: Add retry logic\n---\n",
    )
    .unwrap();

    let (_, stderr, success) = run_plansync(&config_path, &["sync", "--strategy", "manual"]);
    assert!(!success, "manual sync should fail without an operator");
    assert!(stderr.contains("interactive operator"), "stderr: {}", stderr);
}

#[test]
fn test_sync_json_progress_on_stderr() {
    let (_tmp, config_path) = setup_test_env();

    run_plansync(&config_path, &["init"]);
    let (stdout, stderr, success) =
        run_plansync(&config_path, &["sync", "--json", "--progress", "json"]);
    assert!(success);
    assert!(stderr.contains(r#""phase":"committed""#), "stderr: {}", stderr);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(
        report["phases"],
        serde_json::json!(["idle", "scanning", "detecting", "resolving", "applying", "committed"])
    );
}

#[test]
fn test_discover_prints_hierarchy() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_plansync(&config_path, &["discover"]);
    assert!(success, "discover failed: {}", stderr);
    assert!(stdout.contains("U04  Core Platform [folder]"));
    assert!(stdout.contains("  U04-S01  Retries [folder]"));
    assert!(stdout.contains("    U04-S01-001"));

    let (stdout, _, success) = run_plansync(&config_path, &["discover", "--json"]);
    assert!(success);
    let found: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(found["strategy"], "merge");
    assert_eq!(found["index_found"], false);
}

#[test]
fn test_discover_index_authoritative_without_index_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_plansync(
        &config_path,
        &["discover", "--discovery-strategy", "index-authoritative"],
    );
    assert!(!success);
    assert!(stderr.contains("discovery failed"), "stderr: {}", stderr);
}

#[test]
fn test_patterns_validate_and_match() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_plansync(&config_path, &["patterns", "validate"]);
    assert!(success);
    assert!(stdout.contains("All patterns valid."));

    let (stdout, _, success) = run_plansync(
        &config_path,
        &["patterns", "match", "U04-core/U04-S01-retries/001-add-retry.md"],
    );
    assert!(success);
    assert!(stdout.contains("item#1  key=U04-S01-001"), "stdout: {}", stdout);

    let (_, _, success) = run_plansync(&config_path, &["patterns", "match", "notes/readme.md"]);
    assert!(!success);
}

#[test]
fn test_invalid_pattern_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    let mut content = fs::read_to_string(&config_path).unwrap();
    content.push_str("\n[patterns]\nitem = [\"(?P<number>\\\\d+\"]\n");
    fs::write(&config_path, content).unwrap();

    let (_, stderr, success) = run_plansync(&config_path, &["sync"]);
    assert!(!success);
    assert!(stderr.contains("item pattern #1"), "stderr: {}", stderr);
}
