//! HTTP API tests: the real router bound on an ephemeral port, driven with
//! reqwest.

use async_trait::async_trait;
use schemadoc::config::{load_config, Config};
use schemadoc::error::GenerationError;
use schemadoc::llm::{CompletionRequest, TextProvider};
use schemadoc::server::router;
use schemadoc::services::Services;
use schemadoc::source::{ConfigResolver, ConnectionResolver};
use schemadoc_core::store::memory::InMemoryStore;
use schemadoc_core::store::DictionaryStore;
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

// ─── Helpers ────────────────────────────────────────────────────────

async fn seed_shop(path: &Path) {
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
}

async fn test_config(tmp: &TempDir) -> Config {
    let root = tmp.path();
    seed_shop(&root.join("shop.db")).await;
    let config_path = root.join("schemadoc.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"[store]
path = "{root}/data/schemadoc.sqlite"

[llm]
max_attempts = 1

[connections.shop]
dialect = "sqlite"
path = "{root}/shop.db"

[connections.gone]
dialect = "sqlite"
path = "{root}/missing.db"
"#,
            root = root.display()
        ),
    )
    .unwrap();
    load_config(&config_path).unwrap()
}

/// Bind the router on a free port and return its base URL.
async fn start_server(config: &Config, provider: Arc<dyn TextProvider>) -> String {
    let resolver: Arc<dyn ConnectionResolver> = Arc::new(ConfigResolver::new(config));
    let store: Arc<dyn DictionaryStore> = Arc::new(InMemoryStore::new());
    let app = router(Services::assemble(config, store, provider, resolver));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    wait_for_server(port).await;
    format!("http://127.0.0.1:{}", port)
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Server did not become ready within 5 seconds");
}

/// Poll the generation status until the run has succeeded or failed.
async fn wait_for_finished_run(client: &reqwest::Client, base: &str, connection: &str) -> Value {
    let url = format!("{}/connections/{}/generation", base, connection);
    for _ in 0..100 {
        let body: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
        let finished = body["status"] == json!("succeeded") || body["status"] == json!("failed");
        if finished && body["running"] == json!(false) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("generation for {} did not finish", connection);
}

fn no_ai(connection: &str) -> Value {
    json!({
        "connection_id": connection,
        "include_ai_descriptions": false,
        "wait": true
    })
}

// ─── Providers ──────────────────────────────────────────────────────

/// Answers every chat question with the same sentence.
struct FixedAnswer;

#[async_trait]
impl TextProvider for FixedAnswer {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, GenerationError> {
        Ok("Orders reference customers through `orders.customer_id`.".to_string())
    }
}

/// Holds every call until released.
struct GatedProvider {
    entered: Notify,
    release: Semaphore,
}

#[async_trait]
impl TextProvider for GatedProvider {
    fn name(&self) -> &str {
        "gated"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, GenerationError> {
        self.entered.notify_one();
        let permit = self
            .release
            .acquire()
            .await
            .map_err(|e| GenerationError::Transient(e.to_string()))?;
        permit.forget();
        Ok(r#"{"table_description": "Held."}"#.to_string())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_reports_version() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp).await;
    let base = start_server(&config, Arc::new(FixedAnswer)).await;

    let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_generate_read_export_and_delete() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp).await;
    let base = start_server(&config, Arc::new(FixedAnswer)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/dictionaries/generate", base))
        .json(&no_ai("shop"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let summary: Value = resp.json().await.unwrap();
    let id = summary["id"].as_str().unwrap().to_string();
    assert_eq!(summary["connection_id"], "shop");
    assert_eq!(summary["total_tables"], 2);

    let status = wait_for_finished_run(&client, &base, "shop").await;
    assert_eq!(status["status"], "succeeded");
    assert_eq!(status["dictionary_id"], id.as_str());

    let listed: Value = client
        .get(format!("{}/dictionaries?connection_id=shop", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["dictionaries"][0]["id"], id.as_str());

    let full: Value = client
        .get(format!("{}/dictionaries/{}", base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(full["metadata"]["tables"].as_array().unwrap().len(), 2);
    assert!(full["ai_descriptions"].is_null());

    let resp = client
        .get(format!("{}/dictionaries/{}/export/markdown", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let content_type = resp.headers()["content-type"].to_str().unwrap().to_string();
    let disposition = resp.headers()["content-disposition"]
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/markdown"));
    assert_eq!(disposition, "attachment; filename=\"shop_dictionary.md\"");
    let markdown = resp.text().await.unwrap();
    assert!(markdown.contains("orders"));

    let resp = client
        .get(format!("{}/dictionaries/{}/export/pdf", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .delete(format!("{}/dictionaries/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let resp = client
        .get(format!("{}/dictionaries/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "dictionary_not_found");
    assert!(body["error"]["message"].as_str().unwrap().contains(&id));
}

#[tokio::test]
async fn test_chat_answers_and_rejects_bad_queries() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp).await;
    let base = start_server(&config, Arc::new(FixedAnswer)).await;
    let client = reqwest::Client::new();

    let summary: Value = client
        .post(format!("{}/dictionaries/generate", base))
        .json(&no_ai("shop"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = summary["id"].as_str().unwrap();

    let resp = client
        .post(format!("{}/chat/query", base))
        .json(&json!({ "dictionary_id": id, "question": "How do orders link to customers?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body["answer"].as_str().unwrap().contains("customer_id"));
    assert_eq!(body["context_used"], true);

    let resp = client
        .post(format!("{}/chat/query", base))
        .json(&json!({ "dictionary_id": id, "question": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/chat/query", base))
        .json(&json!({ "dictionary_id": "nope", "question": "Anything?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "dictionary_not_found");

    let resp = client
        .get(format!("{}/chat/suggestions/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(!body["suggestions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_connection_uses_error_envelope() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp).await;
    let base = start_server(&config, Arc::new(FixedAnswer)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/dictionaries/generate", base))
        .json(&no_ai("warehouse"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "connection_not_found");
    assert!(body["error"]["message"].as_str().unwrap().contains("warehouse"));

    let resp = client
        .get(format!("{}/connections/warehouse/generation", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let body: Value = client
        .get(format!("{}/connections/shop/generation", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "idle");
    assert_eq!(body["running"], false);

    let body: Value = client
        .post(format!("{}/connections/shop/cancel", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["cancelled"], false);
}

#[tokio::test]
async fn test_background_failure_is_reported_by_status() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp).await;
    let base = start_server(&config, Arc::new(FixedAnswer)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/dictionaries/generate", base))
        .json(&json!({ "connection_id": "gone" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let started: Value = resp.json().await.unwrap();
    assert_eq!(started["status"], "started");
    assert_eq!(started["status_url"], "/connections/gone/generation");

    let status = wait_for_finished_run(&client, &base, "gone").await;
    assert_eq!(status["status"], "failed");
    assert_eq!(status["code"], "connection_error");
    assert!(status["message"].as_str().unwrap().contains("missing.db"));
}

#[tokio::test]
async fn test_second_generate_conflicts_until_cancelled() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp).await;
    let provider = Arc::new(GatedProvider {
        entered: Notify::new(),
        release: Semaphore::new(0),
    });
    let base = start_server(&config, provider.clone()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/dictionaries/generate", base))
        .json(&json!({ "connection_id": "shop" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    provider.entered.notified().await;

    let resp = client
        .post(format!("{}/dictionaries/generate", base))
        .json(&json!({ "connection_id": "shop", "wait": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "already_running");

    let body: Value = client
        .get(format!("{}/connections/shop/generation", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "running");
    assert_eq!(body["running"], true);

    let body: Value = client
        .post(format!("{}/connections/shop/cancel", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["cancelled"], true);
    provider.release.add_permits(16);

    let status = wait_for_finished_run(&client, &base, "shop").await;
    assert_eq!(status["status"], "failed");
    assert_eq!(status["code"], "cancelled");

    let listed: Value = client
        .get(format!("{}/dictionaries", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listed["dictionaries"].as_array().unwrap().is_empty());
}
