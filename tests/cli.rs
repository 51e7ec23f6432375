use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ramen_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ramen"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/ramen.sqlite"

[storage]
root = "{root}/uploads"

[rating]
prior_count = 5
prior_mean = 3.5
min_reviews_for_ranking = 1
"#,
        root = root.display()
    );

    let config_path = config_dir.join("ramen.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ramen(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ramen_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ramen binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config) = setup_test_env();

    let (stdout, stderr, ok) = run_ramen(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully."));

    let (_, stderr, ok) = run_ramen(&config, &["init"]);
    assert!(ok, "second init failed: {}", stderr);
}

#[test]
fn test_seed_shop_and_recompute() {
    let (_tmp, config) = setup_test_env();
    run_ramen(&config, &["init"]);

    let (stdout, stderr, ok) = run_ramen(&config, &["user", "add", "taisho", "--role", "shop_owner"]);
    assert!(ok, "user add failed: {}", stderr);
    assert!(stdout.contains("with id 1"));

    let (stdout, stderr, ok) = run_ramen(
        &config,
        &["shop", "add", "Menya Kaijin", "--address", "Shinjuku", "--owner", "1"],
    );
    assert!(ok, "shop add failed: {}", stderr);
    assert!(stdout.contains("Created shop Menya Kaijin with id 1"));

    let (stdout, _, ok) = run_ramen(&config, &["shop", "show", "1"]);
    assert!(ok);
    assert!(stdout.contains("\"weightedRating\": \"3.5000000\""));

    let (stdout, _, ok) = run_ramen(&config, &["shop", "recompute", "1"]);
    assert!(ok);
    assert!(stdout.contains("reviews=0"));

    let (stdout, _, ok) = run_ramen(&config, &["shop", "recompute-all"]);
    assert!(ok);
    assert!(stdout.contains("Recomputed 1 shops."));

    let (stdout, _, ok) = run_ramen(&config, &["shop", "top"]);
    assert!(ok);
    assert!(stdout.contains("No shops with enough reviews yet."));
}

#[test]
fn test_shop_list_filters() {
    let (_tmp, config) = setup_test_env();
    run_ramen(&config, &["init"]);
    run_ramen(&config, &["shop", "add", "Menya Kaijin", "--address", "Shinjuku"]);
    run_ramen(&config, &["shop", "add", "Fuunji", "--address", "Yoyogi"]);

    let (stdout, stderr, ok) = run_ramen(&config, &["shop", "list"]);
    assert!(ok, "shop list failed: {}", stderr);
    assert!(stdout.contains("Menya Kaijin"));
    assert!(stdout.contains("Fuunji"));
    assert!(stdout.contains("(2 shops)"));

    let (stdout, _, ok) = run_ramen(&config, &["shop", "list", "--address", "yoyogi"]);
    assert!(ok);
    assert!(stdout.contains("Fuunji"));
    assert!(!stdout.contains("Menya Kaijin"));

    let (_, stderr, ok) = run_ramen(&config, &["shop", "list", "--size", "1000"]);
    assert!(!ok);
    assert!(stderr.contains("size must be between 1 and 100"));
}

#[test]
fn test_unknown_shop_fails() {
    let (_tmp, config) = setup_test_env();
    run_ramen(&config, &["init"]);

    let (_, stderr, ok) = run_ramen(&config, &["shop", "recompute", "42"]);
    assert!(!ok);
    assert!(stderr.contains("shop not found: 42"));
}

#[test]
fn test_bad_role_rejected() {
    let (_tmp, config) = setup_test_env();
    run_ramen(&config, &["init"]);

    let (_, stderr, ok) = run_ramen(&config, &["user", "add", "x", "--role", "emperor"]);
    assert!(!ok);
    assert!(stderr.contains("unknown role"));
}
