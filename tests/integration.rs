use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn rembed_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("rembed");
    path
}

const ANNUAL_REPORT: &str = r#"{
  "source_id": "20240315000123",
  "title": "Annual report 2023",
  "blocks": [
    { "kind": "text",  "section_path": "II > 1", "content": "Revenue figures below are in KRW million." },
    { "kind": "table", "section_path": "II > 1", "content": "| year | revenue |\n| 2023 | 1,200 |" },
    { "kind": "text",  "section_path": "II > 2", "content": "Main products and services." },
    { "kind": "table", "section_path": "II > 3", "content": "| product | share |\n| A | 60% |" },
    { "kind": "text",  "section_path": "II > 3", "content": "Closing remarks." }
  ]
}"#;

fn setup_test_env(provider: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let reports_dir = root.join("reports");
    fs::create_dir_all(reports_dir.join("2024")).unwrap();
    fs::write(reports_dir.join("2024/annual.json"), ANNUAL_REPORT).unwrap();
    fs::write(
        reports_dir.join("empty.json"),
        r#"{ "source_id": "empty-1", "blocks": [] }"#,
    )
    .unwrap();
    fs::write(reports_dir.join("README.txt"), "not a report").unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/rembed.sqlite"

[embedding]
provider = "{}"
dims = 64

[materializer]
batch_size = 2
batch_pause_ms = 0

[runner]
item_delay_ms = 0
batch_delay_ms = 0
retry_delay_ms = 0
"#,
        root.display(),
        provider
    );

    let config_path = config_dir.join("rembed.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_rembed(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = rembed_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run rembed binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn reports_dir(config_path: &Path) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("reports")
        .to_string_lossy()
        .to_string()
}

fn init_and_ingest(config_path: &Path) {
    let (_, stderr, success) = run_rembed(config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    let (stdout, stderr, success) = run_rembed(config_path, &["ingest", &reports_dir(config_path)]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env("hash");

    let (stdout, stderr, success) = run_rembed(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env("hash");

    let (_, _, success1) = run_rembed(&config_path, &["init"]);
    assert!(success1, "First init failed");
    let (_, _, success2) = run_rembed(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_classifies_files() {
    let (_tmp, config_path) = setup_test_env("hash");
    run_rembed(&config_path, &["init"]);

    let (stdout, stderr, success) =
        run_rembed(&config_path, &["ingest", &reports_dir(&config_path)]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.contains("files: 2"), "got: {}", stdout);
    assert!(stdout.contains("ingested: 1"));
    assert!(stdout.contains("skipped: 1"));
    assert!(stdout.contains("no blocks in report"));
    assert!(stdout.contains("failed: 0"));

    // Second pass skips the already-stored report
    let (stdout, _, _) = run_rembed(&config_path, &["ingest", &reports_dir(&config_path)]);
    assert!(stdout.contains("ingested: 0"));
    assert!(stdout.contains("already ingested"));
}

#[test]
fn test_ingest_reports_broken_files_as_failed() {
    let (tmp, config_path) = setup_test_env("hash");
    fs::write(tmp.path().join("reports/broken.json"), "{ not json").unwrap();
    run_rembed(&config_path, &["init"]);

    let (stdout, stderr, success) =
        run_rembed(&config_path, &["ingest", &reports_dir(&config_path)]);
    assert!(success);
    assert!(stdout.contains("failed: 1"), "got: {}", stdout);
    assert!(stderr.contains("broken.json"));
}

#[test]
fn test_embed_json_summary() {
    let (_tmp, config_path) = setup_test_env("hash");
    init_and_ingest(&config_path);

    let (stdout, stderr, success) =
        run_rembed(&config_path, &["embed", "--json", "--progress", "off"]);
    assert!(success, "embed failed: stdout={}, stderr={}", stdout, stderr);

    let summary: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(summary["total"], 5);
    assert_eq!(summary["processed"], 5);
    assert_eq!(summary["failed"], 0);
    assert_eq!(summary["text_count"], 3);
    assert_eq!(summary["table_count"], 2);
    assert_eq!(summary["table_with_context"], 1);
    assert_eq!(summary["batches"], 3);
}

#[test]
fn test_embed_is_idempotent() {
    let (_tmp, config_path) = setup_test_env("hash");
    init_and_ingest(&config_path);

    run_rembed(&config_path, &["embed", "--progress", "off"]);
    let (stdout, _, success) = run_rembed(&config_path, &["embed", "--progress", "off"]);
    assert!(success);
    assert!(stdout.contains("nothing to embed"), "got: {}", stdout);
}

#[test]
fn test_embed_force_and_no_cache_reembed_everything() {
    let (_tmp, config_path) = setup_test_env("hash");
    init_and_ingest(&config_path);
    run_rembed(&config_path, &["embed", "--progress", "off"]);

    let (stdout, _, success) = run_rembed(
        &config_path,
        &["embed", "--force", "--no-cache", "--json", "--progress", "off"],
    );
    assert!(success);
    let summary: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(summary["processed"], 5);
    assert_eq!(summary["cache_hits"], 0);
    assert_eq!(summary["store_lookups"], 5);
    assert_eq!(summary["table_with_context"], 1);
}

#[test]
fn test_embed_dry_run_counts_without_writing() {
    let (_tmp, config_path) = setup_test_env("hash");
    init_and_ingest(&config_path);

    let (stdout, _, success) = run_rembed(&config_path, &["embed", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("blocks needing embeddings: 5"));
    assert!(stdout.contains("tables with context: 1"));

    let (stdout, _, _) = run_rembed(&config_path, &["stats"]);
    assert!(stdout.contains("Embedded:    0 / 5"), "got: {}", stdout);
}

#[test]
fn test_embed_limit_and_document_scope() {
    let (_tmp, config_path) = setup_test_env("hash");
    init_and_ingest(&config_path);

    let (stdout, _, _) = run_rembed(
        &config_path,
        &["embed", "--limit", "2", "--json", "--progress", "off"],
    );
    let summary: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(summary["total"], 2);

    let (stdout, _, _) = run_rembed(
        &config_path,
        &["embed", "--document", "999", "--json", "--progress", "off"],
    );
    let summary: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(summary["total"], 0);
}

#[test]
fn test_embed_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env("disabled");
    init_and_ingest(&config_path);

    let (_, stderr, success) = run_rembed(&config_path, &["embed", "--progress", "off"]);
    assert!(!success, "embed should fail with the disabled provider");
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_stats_after_embed() {
    let (_tmp, config_path) = setup_test_env("hash");
    init_and_ingest(&config_path);
    run_rembed(&config_path, &["embed", "--progress", "off"]);

    let (stdout, stderr, success) = run_rembed(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Reports:     1"));
    assert!(stdout.contains("Embedded:    5 / 5 (100%)"));
    assert!(stdout.contains("With context: 1 / 2 tables"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, _) = setup_test_env("hash");
    let bad = tmp.path().join("config/bad.toml");
    fs::write(
        &bad,
        "[db]\npath = \"x.sqlite\"\n[materializer]\nbatch_size = 0\n",
    )
    .unwrap();

    let (_, stderr, success) = run_rembed(&bad, &["init"]);
    assert!(!success);
    assert!(stderr.contains("batch_size"));
}
