use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn reel_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_reel"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[storage]
backend = "sqlite"
path = "{}/data/reel.sqlite"
collection = "video_knowledge_hybrid"

[workdir]
path = "{}/data/tmp"

[embedding]
provider = "disabled"
dims = 384
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("reel.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_reel(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = reel_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run reel binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_collection() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_reel(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("created collection 'video_knowledge_hybrid'"));
    assert!(stdout.contains("384 dims"));
    assert!(tmp.path().join("data/reel.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_reel(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (stdout, stderr, success2) = run_reel(&config_path, &["init"]);
    assert!(success2, "Second init failed: {}", stderr);
    assert!(stdout.contains("already exists"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_stats_on_empty_index() {
    let (_tmp, config_path) = setup_test_env();

    run_reel(&config_path, &["init"]);
    let (stdout, stderr, success) = run_reel(&config_path, &["stats", "--video", "abc"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Records:     0"));
    assert!(stdout.contains("Video abc: 0"));
}

#[test]
fn test_blank_search_has_no_results() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_reel(&config_path, &["search", "   "]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_requires_embeddings() {
    let (_tmp, config_path) = setup_test_env();

    run_reel(&config_path, &["init"]);
    let (_, stderr, success) = run_reel(&config_path, &["search", "tokio"]);
    assert!(!success);
    assert!(stderr.contains("requires embeddings"), "got: {}", stderr);
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("config/bad.toml");
    fs::write(
        &bad,
        "[storage]\nbackend = \"sqlite\"\n\n[workers]\nbranch_threads = 1\n",
    )
    .unwrap();

    let (_, stderr, success) = run_reel(&bad, &["init"]);
    assert!(!success);
    assert!(stderr.contains("branch_threads"), "got: {}", stderr);
}

#[test]
fn test_missing_config_file() {
    let (tmp, _) = setup_test_env();
    let (_, stderr, success) = run_reel(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
