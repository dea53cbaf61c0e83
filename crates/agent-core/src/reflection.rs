//! Reflection Loop
//!
//! Draft, critique, refine, repeat:
//!
//! ```text
//! Draft ──► Critique ──sentinel──► Converged (latest draft)
//!              │
//!              └──feedback──► Refine ──► Critique ...
//! ```
//!
//! The critique prompt tells the reviewer to emit a sentinel when nothing
//! worth fixing remains. `max_rounds` bounds the loop even if the sentinel
//! never appears; hitting it still returns the latest draft.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{ReflectionConfig, RetryPolicy};
use crate::error::{AgentError, Result};
use crate::ledger::{Ledger, LedgerEntry, ReflectionVerdict};
use crate::message::prompt_messages;
use crate::outcome::{AbortReason, RunOutcome, RunStatus};
use crate::prompt::{DRAFT_TEMPLATE, Placeholder, PromptTemplate, ReflectionPrompts, draft_template};
use crate::provider::Reasoner;

/// Source of the initial draft
///
/// Implemented by [`SingleShot`], [`crate::ReactAgent`] and
/// [`crate::PlanAndSolveAgent`].
#[async_trait]
pub trait DraftProducer: Send + Sync {
    async fn produce(&self, task: &str, cancel: &CancellationToken) -> Result<String>;
}

/// One reasoning call rendered from a draft template
pub struct SingleShot {
    reasoner: Reasoner,
    template: PromptTemplate,
    retry: RetryPolicy,
    system_prompt: Option<String>,
}

impl SingleShot {
    pub const fn new(reasoner: Reasoner, template: PromptTemplate, retry: RetryPolicy) -> Self {
        Self {
            reasoner,
            template,
            retry,
            system_prompt: None,
        }
    }

    pub fn with_defaults(reasoner: Reasoner) -> Result<Self> {
        Ok(Self::new(reasoner, draft_template(DRAFT_TEMPLATE)?, RetryPolicy::default()))
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

#[async_trait]
impl DraftProducer for SingleShot {
    async fn produce(&self, task: &str, cancel: &CancellationToken) -> Result<String> {
        let prompt = self.template.render(&[(Placeholder::Question, task)]);
        let messages = prompt_messages(self.system_prompt.as_deref(), prompt);
        let draft = self.reasoner.think_with_retry(&messages, &self.retry, cancel).await?;
        Ok(draft.trim().to_string())
    }
}

/// Classify a critique.
///
/// The critique converges when `sentinel` appears as a whole token: the
/// characters on either side, if any, are not alphanumeric. Matching is
/// case-sensitive, so `FINISH` does not match `finish` or `FINISHED`.
pub fn parse_verdict(critique: &str, sentinel: &str) -> ReflectionVerdict {
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');

    let converged = !sentinel.is_empty()
        && critique.match_indices(sentinel).any(|(start, matched)| {
            let before = critique[..start].chars().next_back();
            let after = critique[start + matched.len()..].chars().next();
            !is_word(before) && !is_word(after)
        });

    if converged {
        ReflectionVerdict::Converged
    } else {
        ReflectionVerdict::Continue {
            feedback: critique.trim().to_string(),
        }
    }
}

/// The Reflection agent, wrapping any [`DraftProducer`]
pub struct ReflectionAgent {
    producer: Arc<dyn DraftProducer>,
    reasoner: Reasoner,
    prompts: ReflectionPrompts,
    config: ReflectionConfig,
}

impl ReflectionAgent {
    /// Create a new agent; fails if the configuration is invalid
    pub fn new(
        producer: Arc<dyn DraftProducer>,
        reasoner: Reasoner,
        prompts: ReflectionPrompts,
        config: ReflectionConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            producer,
            reasoner,
            prompts,
            config,
        })
    }

    /// Draft with a single call, default templates, and `max_rounds`
    pub fn single_shot(reasoner: Reasoner, max_rounds: usize) -> Result<Self> {
        let producer = Arc::new(SingleShot::with_defaults(reasoner.clone())?);
        Self::new(
            producer,
            reasoner,
            ReflectionPrompts::defaults()?,
            ReflectionConfig::new(max_rounds),
        )
    }

    /// Fails only when the inner producer cannot supply a first draft;
    /// every later problem is reported through the outcome with the latest
    /// draft as its answer.
    pub async fn run(&self, task: &str) -> Result<RunOutcome> {
        self.run_with_cancel(task, CancellationToken::new()).await
    }

    pub async fn run_with_cancel(&self, task: &str, cancel: CancellationToken) -> Result<RunOutcome> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("reflection_run", %run_id);
        self.drive(run_id, task, &cancel).instrument(span).await
    }

    async fn drive(&self, run_id: Uuid, task: &str, cancel: &CancellationToken) -> Result<RunOutcome> {
        tracing::info!(max_rounds = self.config.max_rounds, "Starting Reflection run");

        let cancelled = |answer, ledger, calls| {
            RunOutcome::new(run_id, RunStatus::Aborted(AbortReason::Cancelled), answer, ledger).with_calls(calls)
        };

        if cancel.is_cancelled() {
            return Ok(cancelled(None, Ledger::new(), 0));
        }
        let mut draft = match self.producer.produce(task, cancel).await {
            Ok(draft) => draft,
            Err(AgentError::Cancelled | AgentError::Aborted(AbortReason::Cancelled)) => {
                return Ok(cancelled(None, Ledger::new(), 0));
            }
            Err(err) => return Err(err),
        };

        let mut ledger = Ledger::new();
        let mut rounds = 0;
        let mut calls = 0;

        let status = loop {
            if cancel.is_cancelled() {
                break RunStatus::Aborted(AbortReason::Cancelled);
            }
            if rounds >= self.config.max_rounds {
                break RunStatus::Aborted(AbortReason::RoundLimitExceeded);
            }
            rounds += 1;

            calls += 1;
            let critique = self.prompts.critique.render(&[
                (Placeholder::Question, task),
                (Placeholder::Draft, &draft),
            ]);
            let critique = match self.call(critique, cancel).await {
                Ok(text) => text,
                Err(err) => break Self::failed(&err),
            };

            let feedback = match parse_verdict(&critique, &self.config.sentinel) {
                ReflectionVerdict::Converged => {
                    tracing::info!(round = rounds, "Critique converged");
                    ledger.append(LedgerEntry::ReflectionRound {
                        draft: draft.clone(),
                        feedback: critique.trim().to_string(),
                        verdict: ReflectionVerdict::Converged,
                    });
                    return Ok(RunOutcome::new(run_id, RunStatus::Finished, Some(draft), ledger).with_calls(calls));
                }
                ReflectionVerdict::Continue { feedback } => feedback,
            };
            tracing::debug!(round = rounds, "Refining draft");

            calls += 1;
            let refine = self.prompts.refine.render(&[
                (Placeholder::Question, task),
                (Placeholder::Draft, &draft),
                (Placeholder::Feedback, &feedback),
            ]);
            let refined = match self.call(refine, cancel).await {
                Ok(text) => text.trim().to_string(),
                Err(err) => {
                    ledger.append(LedgerEntry::ReflectionRound {
                        draft: draft.clone(),
                        feedback: feedback.clone(),
                        verdict: ReflectionVerdict::Continue { feedback },
                    });
                    break Self::failed(&err);
                }
            };

            let previous = std::mem::replace(&mut draft, refined);
            ledger.append(LedgerEntry::ReflectionRound {
                draft: previous,
                feedback: feedback.clone(),
                verdict: ReflectionVerdict::Continue { feedback },
            });
        };

        tracing::warn!(rounds, %status, "Reflection run stopped with latest draft");
        Ok(RunOutcome::new(run_id, status, Some(draft), ledger).with_calls(calls))
    }

    async fn call(&self, prompt: String, cancel: &CancellationToken) -> Result<String> {
        let messages = prompt_messages(self.config.system_prompt.as_deref(), prompt);
        self.reasoner
            .think_with_retry(&messages, &self.config.retry, cancel)
            .await
    }

    fn failed(err: &AgentError) -> RunStatus {
        match err {
            AgentError::Cancelled => RunStatus::Aborted(AbortReason::Cancelled),
            other => {
                tracing::error!(error = %other, "Reflection call failed");
                RunStatus::Aborted(AbortReason::ServiceUnavailable(other.to_string()))
            }
        }
    }

    /// Get configuration
    pub const fn config(&self) -> &ReflectionConfig {
        &self.config
    }
}
