//! Generative-text provider abstraction and implementations.
//!
//! Defines the [`TextProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: fails every call with [`GenerationError::Disabled`].
//! - **[`AnthropicProvider`]**: calls the Anthropic Messages API.
//! - **[`OpenAiProvider`]**: calls the OpenAI Chat Completions API.
//! - **[`RetryingProvider`]**: wraps another provider with backoff.
//!
//! Both the description generator and the grounding engine talk to the model
//! only through this trait.
//!
//! # Retry Strategy
//!
//! HTTP providers classify every failure as they see it:
//! - HTTP 429 (rate limited) and 5xx (server error) → [`GenerationError::Transient`]
//! - HTTP 4xx (client error, not 429) or a missing API key → [`GenerationError::Fatal`]
//! - Network errors, including the client timeout → [`GenerationError::Transient`]
//! - Unparseable bodies → [`GenerationError::InvalidResponse`]
//!
//! [`RetryingProvider`] retries only transient errors, sleeping
//! `retry_base_ms × 2^(attempt−1)` between attempts, and gives up with
//! [`GenerationError::Exhausted`] after `max_attempts`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use schemadoc_core::models::ChatRole;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::GenerationError;

const ANTHROPIC_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_URL: &str = "https://api.openai.com";

#[derive(Debug, Clone, PartialEq)]
pub struct PromptMessage {
    pub role: ChatRole,
    pub content: String,
}

impl PromptMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// One completion call: a system prompt, alternating messages ending with
/// the user turn to answer, and an output budget.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<PromptMessage>,
    pub max_tokens: u32,
}

/// Trait for generative-text providers.
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// Provider identifier for logs (`"anthropic"`, `"disabled"`, ...).
    fn name(&self) -> &str;

    /// Return the model's text for `request`.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError>;
}

/// Placeholder used when `llm.provider = "disabled"`.
pub struct DisabledProvider;

#[async_trait]
impl TextProvider for DisabledProvider {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, GenerationError> {
        Err(GenerationError::Disabled)
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn api_key(var: &Option<String>, default_var: &str) -> Result<String, GenerationError> {
    let var = var.as_deref().unwrap_or(default_var);
    std::env::var(var).map_err(|_| GenerationError::Fatal(format!("{} not set", var)))
}

/// Send a prepared request and classify the outcome.
async fn send_json(request: reqwest::RequestBuilder) -> Result<serde_json::Value, GenerationError> {
    let response = request
        .send()
        .await
        .map_err(|e| GenerationError::Transient(e.to_string()))?;
    let status = response.status();

    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()));
    }

    let body_text = response.text().await.unwrap_or_default();
    let message = format!("API error {}: {}", status, body_text);
    if status.as_u16() == 429 || status.is_server_error() {
        Err(GenerationError::Transient(message))
    } else {
        Err(GenerationError::Fatal(message))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Anthropic
// ═══════════════════════════════════════════════════════════════════════

pub struct AnthropicProvider {
    client: reqwest::Client,
    model: String,
    base_url: String,
    api_key_env: Option<String>,
}

impl AnthropicProvider {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for anthropic"))?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_URL.to_string()),
            api_key_env: config.api_key_env.clone(),
        })
    }
}

#[async_trait]
impl TextProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        let key = api_key(&self.api_key_env, "ANTHROPIC_API_KEY")?;
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "system": request.system,
            "messages": messages,
        });

        let json = send_json(
            self.client
                .post(format!("{}/v1/messages", self.base_url.trim_end_matches('/')))
                .header("x-api-key", key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body),
        )
        .await?;
        parse_anthropic_response(&json)
    }
}

/// Concatenate the `text` blocks of a Messages API response.
fn parse_anthropic_response(json: &serde_json::Value) -> Result<String, GenerationError> {
    let blocks = json
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| GenerationError::InvalidResponse("missing content array".into()))?;
    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.trim().is_empty() {
        return Err(GenerationError::InvalidResponse("empty completion".into()));
    }
    Ok(text)
}

// ═══════════════════════════════════════════════════════════════════════
// OpenAI
// ═══════════════════════════════════════════════════════════════════════

pub struct OpenAiProvider {
    client: reqwest::Client,
    model: String,
    base_url: String,
    api_key_env: Option<String>,
}

impl OpenAiProvider {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for openai"))?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_URL.to_string()),
            api_key_env: config.api_key_env.clone(),
        })
    }
}

#[async_trait]
impl TextProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        let key = api_key(&self.api_key_env, "OPENAI_API_KEY")?;
        let mut messages = vec![serde_json::json!({ "role": "system", "content": request.system })];
        messages.extend(
            request
                .messages
                .iter()
                .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content })),
        );
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "messages": messages,
        });

        let json = send_json(
            self.client
                .post(format!(
                    "{}/v1/chat/completions",
                    self.base_url.trim_end_matches('/')
                ))
                .header("Authorization", format!("Bearer {}", key))
                .json(&body),
        )
        .await?;
        parse_openai_response(&json)
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<String, GenerationError> {
    let text = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .ok_or_else(|| GenerationError::InvalidResponse("missing choices[0].message.content".into()))?;
    if text.trim().is_empty() {
        return Err(GenerationError::InvalidResponse("empty completion".into()));
    }
    Ok(text.to_string())
}

// ═══════════════════════════════════════════════════════════════════════
// Retry
// ═══════════════════════════════════════════════════════════════════════

pub struct RetryingProvider {
    inner: Arc<dyn TextProvider>,
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn TextProvider>, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        // 1×, 2×, 4×, ... capped at 32×
        self.base_delay * (1u32 << (attempt - 1).min(5))
    }
}

#[async_trait]
impl TextProvider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        let mut last = String::new();
        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.delay_for(attempt)).await;
            }
            match self.inner.complete(request).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() => {
                    tracing::debug!(provider = self.inner.name(), attempt = attempt + 1, error = %e, "transient provider error");
                    last = e.to_string();
                }
                Err(e) => return Err(e),
            }
        }
        Err(GenerationError::Exhausted {
            attempts: self.max_attempts,
            last,
        })
    }
}

/// Create the configured [`TextProvider`], wrapped in retries.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"anthropic"` | [`AnthropicProvider`] |
/// | `"openai"` | [`OpenAiProvider`] |
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn TextProvider>> {
    let inner: Arc<dyn TextProvider> = match config.provider.as_str() {
        "disabled" => return Ok(Arc::new(DisabledProvider)),
        "anthropic" => Arc::new(AnthropicProvider::new(config)?),
        "openai" => Arc::new(OpenAiProvider::new(config)?),
        other => bail!("Unknown llm provider: {}", other),
    };
    Ok(Arc::new(RetryingProvider::new(
        inner,
        config.max_attempts,
        Duration::from_millis(config.retry_base_ms),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<Result<String, GenerationError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(mut replies: Vec<Result<String, GenerationError>>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl TextProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _r: &CompletionRequest) -> Result<String, GenerationError> {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(GenerationError::Transient("no more replies".into())))
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "s".into(),
            messages: vec![PromptMessage::user("q")],
            max_tokens: 10,
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let inner = Arc::new(Scripted::new(vec![
            Err(GenerationError::Transient("429".into())),
            Err(GenerationError::Transient("503".into())),
            Ok("done".into()),
        ]));
        let provider = RetryingProvider::new(inner.clone(), 3, Duration::from_millis(1));
        assert_eq!(provider.complete(&request()).await.unwrap(), "done");
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let inner = Arc::new(Scripted::new(vec![
            Err(GenerationError::Fatal("401".into())),
            Ok("never".into()),
        ]));
        let provider = RetryingProvider::new(inner.clone(), 3, Duration::from_millis(1));
        let err = provider.complete(&request()).await.unwrap_err();
        assert_eq!(err.category(), "provider_fatal");
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn retries_stop_at_the_attempt_bound() {
        let inner = Arc::new(Scripted::new(Vec::new()));
        let provider = RetryingProvider::new(inner.clone(), 3, Duration::from_millis(1));
        let err = provider.complete(&request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Exhausted { attempts: 3, .. }));
        assert_eq!(inner.calls(), 3);
    }

    #[test]
    fn backoff_doubles() {
        let provider = RetryingProvider::new(Arc::new(DisabledProvider), 5, Duration::from_millis(100));
        assert_eq!(provider.delay_for(1), Duration::from_millis(100));
        assert_eq!(provider.delay_for(2), Duration::from_millis(200));
        assert_eq!(provider.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn parses_both_response_shapes() {
        let anthropic = serde_json::json!({
            "content": [{ "type": "text", "text": "Orders placed by customers." }]
        });
        assert_eq!(
            parse_anthropic_response(&anthropic).unwrap(),
            "Orders placed by customers."
        );

        let openai = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "hi" } }]
        });
        assert_eq!(parse_openai_response(&openai).unwrap(), "hi");

        let broken = serde_json::json!({ "error": "nope" });
        assert!(matches!(
            parse_openai_response(&broken),
            Err(GenerationError::InvalidResponse(_))
        ));
    }

    #[test]
    fn disabled_config_yields_disabled_provider() {
        let provider = create_provider(&LlmConfig::default()).unwrap();
        assert_eq!(provider.name(), "disabled");
    }
}
