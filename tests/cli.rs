use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn schemadoc_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("schemadoc");
    path
}

fn seed_source(path: &Path) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        for sql in [
            "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER REFERENCES customers(id), discount REAL)",
            "INSERT INTO customers (id, name) VALUES (1, 'Ada'), (2, 'Grace')",
            "INSERT INTO orders (id, customer_id, discount) VALUES (1, 1, NULL), (2, 1, NULL), (3, 2, 0.1)",
        ] {
            sqlx::query(sql).execute(&pool).await.unwrap();
        }
        pool.close().await;
    });
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    seed_source(&root.join("shop.db"));

    let config_content = format!(
        r#"[store]
path = "{root}/data/schemadoc.sqlite"

[server]
bind = "127.0.0.1:7411"

[connections.shop]
dialect = "sqlite"
path = "{root}/shop.db"

[connections.gone]
dialect = "sqlite"
path = "{root}/missing.db"
"#,
        root = root.display()
    );
    let config_path = root.join("schemadoc.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_schemadoc(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = schemadoc_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run schemadoc binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

/// Run `generate shop` and return the new dictionary id.
fn generate(config: &Path) -> String {
    let (stdout, stderr, success) =
        run_schemadoc(config, &["generate", "shop", "--progress", "off"]);
    assert!(success, "generate failed: {}", stderr);
    stdout
        .lines()
        .find(|l| l.starts_with("Generated dictionary"))
        .and_then(|l| l.split_whitespace().nth(2))
        .unwrap_or_else(|| panic!("no dictionary id in: {}", stdout))
        .to_string()
}

#[test]
fn test_init_idempotent() {
    let (tmp, config) = setup_test_env();
    let (_, _, first) = run_schemadoc(&config, &["init"]);
    let (_, _, second) = run_schemadoc(&config, &["init"]);
    assert!(first && second);
    assert!(tmp.path().join("data/schemadoc.sqlite").exists());
}

#[test]
fn test_connections_lists_targets() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, success) = run_schemadoc(&config, &["connections"]);
    assert!(success);
    assert!(stdout.contains("shop"));
    assert!(stdout.contains("sqlite"));
}

#[test]
fn test_connection_check() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, success) = run_schemadoc(&config, &["test-connection", "shop"]);
    assert!(success);
    assert!(stdout.contains("2 tables"));
    assert!(stdout.contains("SQLite"));

    let (_, stderr, success) = run_schemadoc(&config, &["test-connection", "gone"]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_generate_without_provider_skips_descriptions() {
    let (_tmp, config) = setup_test_env();
    let id = generate(&config);

    let (stdout, _, success) = run_schemadoc(&config, &["show", &id]);
    assert!(success);
    assert!(stdout.contains("orders (3 rows, 3 columns)"));
    assert!(stdout.contains("discount"));
    assert!(!stdout.contains("Run issues"));

    let (stdout, _, success) = run_schemadoc(&config, &["list", "--connection", "shop"]);
    assert!(success);
    assert!(stdout.contains(&id));
}

#[test]
fn test_generate_unknown_connection_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_schemadoc(&config, &["generate", "nope", "--progress", "off"]);
    assert!(!success);
    assert!(stderr.contains("nope"));
}

#[test]
fn test_export_markdown_to_file() {
    let (tmp, config) = setup_test_env();
    let id = generate(&config);
    let out = tmp.path().join("shop.md");

    let (_, stderr, success) = run_schemadoc(
        &config,
        &["export", &id, "--format", "markdown", "--output", out.to_str().unwrap()],
    );
    assert!(success, "export failed: {}", stderr);
    let markdown = fs::read_to_string(&out).unwrap();
    assert!(markdown.contains("orders"));
    assert!(markdown.contains("customers"));

    let (stdout, _, success) = run_schemadoc(&config, &["export", &id, "--format", "json"]);
    assert!(success);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(json.is_object());

    let (_, _, success) = run_schemadoc(&config, &["export", &id, "--format", "pdf"]);
    assert!(!success);
}

#[test]
fn test_suggest_and_chat_without_provider() {
    let (_tmp, config) = setup_test_env();
    let id = generate(&config);

    let (stdout, _, success) = run_schemadoc(&config, &["suggest", &id]);
    assert!(success);
    assert!(!stdout.trim().is_empty());

    let (_, _, success) = run_schemadoc(&config, &["chat", &id, "What is in orders?"]);
    assert!(!success);
}

#[test]
fn test_delete_dictionary() {
    let (_tmp, config) = setup_test_env();
    let id = generate(&config);

    let (_, _, success) = run_schemadoc(&config, &["delete", &id]);
    assert!(success);
    let (_, stderr, success) = run_schemadoc(&config, &["show", &id]);
    assert!(!success);
    assert!(stderr.contains("not found"));
    let (_, _, success) = run_schemadoc(&config, &["delete", &id]);
    assert!(!success);
}
