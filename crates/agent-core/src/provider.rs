//! Reasoning Service Strategy Pattern
//!
//! Defines a common interface for all reasoning backends (Ollama, OpenAI-compatible
//! endpoints, scripted test doubles) and the [`Reasoner`] that every loop talks to.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::provider::{Reasoner, LlmProvider};
//!
//! let reasoner = Reasoner::new(Arc::new(provider), ReasonerConfig::default());
//! let text = reasoner.think(&messages, &cancel).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::{ReasonerConfig, RetryPolicy};
use crate::error::{AgentError, Result};
use crate::message::Message;

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "llama3.2", "gpt-4o", "deepseek-ai/DeepSeek-V3")
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Stop sequences
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

const fn default_temperature() -> f32 {
    0.7
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "llama3.2".into(),
            temperature: default_temperature(),
            max_tokens: None,
            stop_sequences: Vec::new(),
        }
    }
}

/// Response from an LLM completion
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text
    pub content: String,

    /// Model that generated this response
    pub model: String,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,

    /// Finish reason
    pub finish_reason: Option<FinishReason>,
}

impl Completion {
    /// A plain text completion with no usage data
    pub fn text(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            usage: None,
            finish_reason: Some(FinishReason::Stop),
        }
    }
}

/// Token usage statistics
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Reason for completion finishing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
}

/// Strategy trait for reasoning backends
///
/// Implement this trait to add support for new LLM backends.
/// The loops work exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider name for logs (e.g., "ollama")
    fn name(&self) -> &str;

    /// Check if the provider is available and configured correctly
    async fn health_check(&self) -> Result<bool>;

    /// Generate a completion from messages
    async fn complete(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<Completion>;

    /// Estimate token count for text (provider-specific tokenization)
    fn estimate_tokens(&self, text: &str) -> u32 {
        // Default: rough estimate of ~4 chars per token
        u32::try_from(text.len() / 4).unwrap_or(u32::MAX)
    }
}

/// The single entry point loops use to reach the reasoning service.
///
/// Adds a per-call timeout and cooperative cancellation on top of an
/// [`LlmProvider`]. Cheap to clone; clones share the provider.
#[derive(Clone)]
pub struct Reasoner {
    provider: Arc<dyn LlmProvider>,
    config: ReasonerConfig,
}

impl Reasoner {
    pub fn new(provider: Arc<dyn LlmProvider>, config: ReasonerConfig) -> Self {
        Self { provider, config }
    }

    /// Create with default timeout and generation options
    pub fn with_defaults(provider: Arc<dyn LlmProvider>) -> Self {
        Self::new(provider, ReasonerConfig::default())
    }

    pub fn provider(&self) -> &dyn LlmProvider {
        self.provider.as_ref()
    }

    pub const fn config(&self) -> &ReasonerConfig {
        &self.config
    }

    /// One round-trip to the reasoning service.
    ///
    /// Fails with [`AgentError::Timeout`] when the provider does not answer
    /// within the configured timeout and with [`AgentError::Cancelled`] as soon
    /// as `cancel` fires; the in-flight request future is dropped in both cases.
    pub async fn think(&self, messages: &[Message], cancel: &CancellationToken) -> Result<String> {
        let timeout_secs = self.config.timeout_secs;
        tracing::debug!(
            provider = self.provider.name(),
            model = %self.config.generation.model,
            prompt_tokens = messages
                .iter()
                .map(|m| m.estimate_tokens(self.provider.as_ref()))
                .sum::<u32>(),
            "Calling reasoning service"
        );

        let call = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.provider.complete(messages, &self.config.generation),
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(AgentError::Cancelled),
            result = call => match result {
                Ok(completion) => completion.map(|c| c.content),
                Err(_) => Err(AgentError::Timeout(timeout_secs)),
            },
        }
    }

    /// [`Reasoner::think`] with bounded retry of transport-level failures.
    ///
    /// Only retryable errors are retried; the last error is returned once
    /// `policy.max_retries` extra attempts are spent.
    pub async fn think_with_retry(
        &self,
        messages: &[Message],
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.think(messages, cancel).await {
                Ok(text) => return Ok(text),
                Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        provider = self.provider.name(),
                        attempt,
                        max_retries = policy.max_retries,
                        error = %err,
                        "Reasoning call failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(AgentError::Cancelled),
                        () = tokio::time::sleep(policy.backoff(attempt)) => {}
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedProvider;

    #[test]
    fn test_generation_options_defaults() {
        let opts = GenerationOptions::default();
        assert!((opts.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(opts.model, "llama3.2");
        assert!(opts.max_tokens.is_none());
    }

    #[tokio::test]
    async fn test_think_returns_completion_text() {
        let provider = Arc::new(ScriptedProvider::new(["Thought: done\nAction: Finish[4]"]));
        let reasoner = Reasoner::with_defaults(provider.clone());

        let text = reasoner
            .think(&[Message::user("2+2?")], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(text, "Thought: done\nAction: Finish[4]");
        assert_eq!(provider.call_count(), 1);
        assert_eq!(provider.prompts()[0], "2+2?");
    }

    #[tokio::test(start_paused = true)]
    async fn test_think_times_out() {
        let provider = Arc::new(
            ScriptedProvider::new(["too late"]).with_delay(Duration::from_secs(120)),
        );
        let config = ReasonerConfig {
            timeout_secs: 5,
            ..ReasonerConfig::default()
        };
        let reasoner = Reasoner::new(provider, config);

        let err = reasoner
            .think(&[Message::user("hi")], &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Timeout(5)));
    }

    #[tokio::test]
    async fn test_think_honours_cancellation() {
        let provider = Arc::new(ScriptedProvider::new(["unused"]));
        let reasoner = Reasoner::with_defaults(provider.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = reasoner.think(&[Message::user("hi")], &cancel).await.unwrap_err();

        assert!(matches!(err, AgentError::Cancelled));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transport_errors() {
        let provider = Arc::new(
            ScriptedProvider::empty()
                .then_error(AgentError::Transport("connection reset".into()))
                .then_text("recovered"),
        );
        let reasoner = Reasoner::with_defaults(provider.clone());

        let text = reasoner
            .think_with_retry(
                &[Message::user("hi")],
                &RetryPolicy::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(text, "recovered");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_budget() {
        let provider = Arc::new(
            ScriptedProvider::empty()
                .then_error(AgentError::Transport("down".into()))
                .then_error(AgentError::Transport("down".into()))
                .then_error(AgentError::Transport("still down".into())),
        );
        let reasoner = Reasoner::with_defaults(provider.clone());
        let policy = RetryPolicy {
            max_retries: 2,
            backoff_ms: 10,
        };

        let err = reasoner
            .think_with_retry(&[Message::user("hi")], &policy, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Transport(msg) if msg == "still down"));
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_retry_skips_non_retryable_errors() {
        let provider = Arc::new(
            ScriptedProvider::empty().then_error(AgentError::Auth("invalid key".into())),
        );
        let reasoner = Reasoner::with_defaults(provider.clone());

        let err = reasoner
            .think_with_retry(
                &[Message::user("hi")],
                &RetryPolicy::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Auth(_)));
        assert_eq!(provider.call_count(), 1);
    }
}
