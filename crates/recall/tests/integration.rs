use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn rcl_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_rcl"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let chats = root.join("exports/chats");
    fs::create_dir_all(chats.join("2024")).unwrap();
    fs::write(
        chats.join("2024/standup.txt"),
        "Alice: morning all.\nAlice said we decided to ship Friday. TODO: notify Bob about the release.",
    )
    .unwrap();
    fs::write(
        chats.join("2024/budget.txt"),
        "Carol: the quarterly budget review moved to Thursday.\nDave: thanks, I will update the spreadsheet.",
    )
    .unwrap();
    fs::write(
        chats.join("travel.md"),
        "Flights to Lisbon are booked for the offsite in May.",
    )
    .unwrap();
    fs::write(chats.join("ignored.log"), "not included by the globs").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/recall.sqlite"

[chunking]
target_chars = 400
overlap_chars = 40

[retrieval]
final_limit = 5

[embedding]
provider = "hash"
dims = 128

[connectors.dir.chats]
root = "{root}/exports/chats"
include_globs = ["**/*.txt", "**/*.md"]
kind = "chat"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("recall.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_rcl(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = rcl_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run rcl binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn init_and_sync(config_path: &Path) -> String {
    let (_, stderr, success) = run_rcl(config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    let (stdout, stderr, success) = run_rcl(config_path, &["sync", "all"]);
    assert!(success, "sync failed: {}", stderr);
    stdout
}

fn search_json(config_path: &Path, args: &[&str]) -> Vec<serde_json::Value> {
    let mut full = vec!["search"];
    full.extend_from_slice(args);
    full.push("--json");
    let (stdout, stderr, success) = run_rcl(config_path, &full);
    assert!(success, "search failed: {}", stderr);
    serde_json::from_str::<Vec<serde_json::Value>>(&stdout).unwrap()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_rcl(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/recall.sqlite").exists());

    let (_, _, again) = run_rcl(&config_path, &["init"]);
    assert!(again, "init should be idempotent");
}

#[test]
fn test_sync_reports_counts_and_then_goes_incremental() {
    let (_tmp, config_path) = setup_test_env();

    let stdout = init_and_sync(&config_path);
    assert!(stdout.contains("sync dir:chats (full)"), "{}", stdout);
    assert!(stdout.contains("processed: 3"), "{}", stdout);
    assert!(stdout.contains("cursor: committed"), "{}", stdout);

    let (stdout, stderr, success) = run_rcl(&config_path, &["sync", "chats"]);
    assert!(success, "second sync failed: {}", stderr);
    assert!(stdout.contains("sync dir:chats (incremental)"), "{}", stdout);
}

#[test]
fn test_sources_shows_cursor_state() {
    let (_tmp, config_path) = setup_test_env();
    run_rcl(&config_path, &["init"]);

    let (stdout, _, success) = run_rcl(&config_path, &["sources"]);
    assert!(success);
    assert!(stdout.contains("dir:chats"));
    assert!(stdout.contains("none"));

    init_and_sync(&config_path);
    let (stdout, _, _) = run_rcl(&config_path, &["sources"]);
    assert!(stdout.contains("incremental"), "{}", stdout);
}

#[test]
fn test_search_returns_tagged_chunks() {
    let (_tmp, config_path) = setup_test_env();
    init_and_sync(&config_path);

    let hits = search_json(&config_path, &["quarterly budget review"]);
    assert!(!hits.is_empty());
    assert_eq!(hits[0]["chunk"]["parent_external_id"], "2024/budget.txt");
    assert_eq!(hits[0]["chunk"]["source_id"], "dir:chats");

    let hits = search_json(&config_path, &["release", "--person", "Alice"]);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["chunk"]["parent_external_id"], "2024/standup.txt");

    let hits = search_json(&config_path, &["offsite", "--since", "2999-01-01"]);
    assert!(hits.is_empty());

    let (stdout, _, success) = run_rcl(&config_path, &["search", "Lisbon offsite"]);
    assert!(success);
    assert!(stdout.contains("travel.md"), "{}", stdout);
}

#[test]
fn test_deleted_file_disappears_after_sync() {
    let (tmp, config_path) = setup_test_env();
    init_and_sync(&config_path);
    let mentions_travel = |hits: &[serde_json::Value]| {
        hits.iter()
            .any(|h| h["chunk"]["parent_external_id"] == "travel.md")
    };
    assert!(mentions_travel(&search_json(&config_path, &["Lisbon"])));

    fs::remove_file(tmp.path().join("exports/chats/travel.md")).unwrap();
    let (stdout, stderr, success) = run_rcl(&config_path, &["sync", "all"]);
    assert!(success, "sync failed: {}", stderr);
    assert!(stdout.contains("deleted: 1"), "{}", stdout);
    assert!(!mentions_travel(&search_json(&config_path, &["Lisbon"])));
}

#[test]
fn test_unknown_source_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_rcl(&config_path, &["init"]);
    let (_, stderr, success) = run_rcl(&config_path, &["sync", "slack"]);
    assert!(!success);
    assert!(stderr.contains("Unknown source"), "{}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_rcl(&tmp.path().join("nope.toml"), &["sources"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "{}", stderr);
}
