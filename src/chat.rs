//! Grounding engine.
//!
//! Answers one question about one dictionary. Each query moves through
//! `Received → ContextBuilt → ProviderCalled → Answered | Failed`; the engine
//! keeps no state between queries and never stores conversation history, so
//! any number of queries may run at once.
//!
//! The provider sees only the context built by
//! [`schemadoc_core::context::build_context`] plus the last
//! `history_turns` turns. Follow-up suggestions are derived from the
//! dictionary, not from the answer text, so they always name real tables.

use schemadoc_core::context::{build_context, recent_history};
use schemadoc_core::models::{ChatRole, ChatTurn, Dictionary, SuggestedQuestion};
use schemadoc_core::store::DictionaryStore;
use schemadoc_core::suggest::{follow_up_questions, starter_questions};
use schemadoc_core::validate::unknown_references;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::GroundingConfig;
use crate::error::ChatError;
use crate::llm::{CompletionRequest, PromptMessage, TextProvider};

const SYSTEM_PREAMBLE: &str = "You are a database assistant. Answer questions about the database \
described below using only the facts it contains. Refer to tables and columns by their exact names. \
If the answer is not in the schema, say so instead of guessing. Suggest SQL when it helps.";

#[derive(Debug, Clone, Deserialize)]
pub struct ChatQuery {
    #[serde(default)]
    pub dictionary_id: Option<String>,
    pub question: String,
    #[serde(default)]
    pub conversation_history: Vec<ChatTurn>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub suggested_questions: Vec<SuggestedQuestion>,
    /// True when at least one table from the dictionary was in the context.
    pub context_used: bool,
    /// Names in the answer that the dictionary does not contain.
    pub unverified_references: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryState {
    Received,
    ContextBuilt,
    ProviderCalled,
    Answered,
    Failed,
}

fn enter(state: QueryState, dictionary_id: &str) {
    tracing::debug!(dictionary = dictionary_id, state = ?state, "chat query");
}

pub struct GroundingEngine {
    store: Arc<dyn DictionaryStore>,
    provider: Arc<dyn TextProvider>,
    config: GroundingConfig,
    max_tokens: u32,
}

impl GroundingEngine {
    pub fn new(
        store: Arc<dyn DictionaryStore>,
        provider: Arc<dyn TextProvider>,
        config: GroundingConfig,
        max_tokens: u32,
    ) -> Self {
        Self {
            store,
            provider,
            config,
            max_tokens,
        }
    }

    /// Load the addressed dictionary, telling "none selected", "none exist"
    /// and "not found" apart.
    async fn load(&self, dictionary_id: Option<&str>) -> Result<Dictionary, ChatError> {
        let count = || async {
            self.store
                .count()
                .await
                .map_err(|e| ChatError::Storage(e.to_string()))
        };

        let Some(id) = dictionary_id.map(str::trim).filter(|s| !s.is_empty()) else {
            return Err(if count().await? == 0 {
                ChatError::NoDictionaries
            } else {
                ChatError::NoDictionarySelected
            });
        };

        match self.store.get(id).await {
            Ok(Some(d)) => Ok(d),
            Ok(None) if count().await? == 0 => Err(ChatError::NoDictionaries),
            Ok(None) => Err(ChatError::DictionaryNotFound(id.to_string())),
            Err(e) => Err(ChatError::Storage(e.to_string())),
        }
    }

    pub async fn answer(&self, query: &ChatQuery) -> Result<ChatResponse, ChatError> {
        let label = query.dictionary_id.as_deref().unwrap_or("-");
        enter(QueryState::Received, label);

        let result = self.answer_inner(query).await;
        match &result {
            Ok(_) => enter(QueryState::Answered, label),
            Err(e) => {
                enter(QueryState::Failed, label);
                tracing::warn!(dictionary = label, category = e.category(), error = %e, "chat query failed");
            }
        }
        result
    }

    async fn answer_inner(&self, query: &ChatQuery) -> Result<ChatResponse, ChatError> {
        let dictionary = self.load(query.dictionary_id.as_deref()).await?;
        let history = recent_history(&query.conversation_history, self.config.history_turns);

        let context = build_context(
            &dictionary,
            &query.question,
            history,
            self.config.max_context_chars,
        );
        if context.truncated {
            tracing::debug!(
                dictionary = %dictionary.id,
                dropped = context.dropped_tables.len(),
                "context truncated to fit budget"
            );
        }
        enter(QueryState::ContextBuilt, &dictionary.id);

        let request = CompletionRequest {
            system: format!("{}\n\n{}", SYSTEM_PREAMBLE, context.text),
            messages: prompt_messages(history, &query.question),
            max_tokens: self.max_tokens,
        };

        let budget = Duration::from_secs(self.config.timeout_secs);
        let answer = tokio::time::timeout(budget, self.provider.complete(&request))
            .await
            .map_err(|_| ChatError::Timeout(self.config.timeout_secs))?
            .map_err(ChatError::Provider)?;
        enter(QueryState::ProviderCalled, &dictionary.id);

        let unverified_references = unknown_references(&answer, &dictionary.metadata);
        Ok(ChatResponse {
            suggested_questions: follow_up_questions(
                &dictionary,
                &query.question,
                &query.conversation_history,
            ),
            context_used: !context.included_tables.is_empty(),
            unverified_references,
            answer,
        })
    }

    /// Starter questions for a dictionary, before any chat.
    pub async fn suggestions(&self, dictionary_id: &str) -> Result<Vec<SuggestedQuestion>, ChatError> {
        let dictionary = self.load(Some(dictionary_id)).await?;
        Ok(starter_questions(&dictionary))
    }
}

/// History as alternating provider messages, ending with the new question.
///
/// Leading assistant turns are dropped and consecutive turns from the same
/// role are merged, since providers expect a user turn first and strict
/// alternation.
fn prompt_messages(history: &[ChatTurn], question: &str) -> Vec<PromptMessage> {
    let mut messages: Vec<PromptMessage> = Vec::new();
    let turns = history
        .iter()
        .skip_while(|t| t.role == ChatRole::Assistant)
        .map(|t| (t.role, t.content.as_str()))
        .chain(std::iter::once((ChatRole::User, question)));

    for (role, content) in turns {
        if content.trim().is_empty() {
            continue;
        }
        match messages.last_mut() {
            Some(last) if last.role == role => {
                last.content.push_str("\n\n");
                last.content.push_str(content);
            }
            _ => messages.push(PromptMessage {
                role,
                content: content.to_string(),
            }),
        }
    }
    messages
}
