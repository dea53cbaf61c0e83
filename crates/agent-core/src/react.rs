//! ReAct Loop
//!
//! Interleaved Thought → Action → Observation cycle:
//!
//! ```text
//! Running(0) ──think──► parse ──ToolCall──► invoke tool ──► Running(n+1)
//!                          ├──Finish──────────────────────► Finished(answer)
//!                          └──ParseFailure (over limit)───► Aborted(ParseExhausted)
//! Running(max_steps) ─────────────────────────────────────► Aborted(StepLimitExceeded)
//! ```
//!
//! Each step rebuilds the whole prompt from the tool catalog, the question and
//! the run's ledger. A transport failure or timeout is handled like a parse
//! failure: it costs a step and counts toward the consecutive-failure limit.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{ReactConfig, ReasonerConfig};
use crate::error::{AgentError, Result};
use crate::ledger::{Ledger, LedgerEntry};
use crate::message::{Message, prompt_messages};
use crate::outcome::{AbortReason, RunOutcome, RunStatus};
use crate::parser::{self, ParsedAction};
use crate::prompt::{Placeholder, ReactPrompts};
use crate::provider::{LlmProvider, Reasoner};
use crate::reflection::DraftProducer;
use crate::tool::{ERROR_PREFIX, Tool, ToolRegistry};

const MISSING_ACTION: &str = "(none)";

/// The ReAct agent
///
/// Holds only shared, read-only state; any number of runs may execute
/// concurrently on one instance.
pub struct ReactAgent {
    reasoner: Reasoner,
    tools: Arc<ToolRegistry>,
    prompts: ReactPrompts,
    config: ReactConfig,
}

impl ReactAgent {
    /// Create a new agent; fails if the configuration is invalid
    pub fn new(
        reasoner: Reasoner,
        tools: Arc<ToolRegistry>,
        prompts: ReactPrompts,
        config: ReactConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            reasoner,
            tools,
            prompts,
            config,
        })
    }

    pub fn builder() -> ReactAgentBuilder {
        ReactAgentBuilder::new()
    }

    /// Answer a question
    pub async fn run(&self, question: &str) -> RunOutcome {
        self.run_with_cancel(question, CancellationToken::new()).await
    }

    /// Answer a question, stopping at the next step boundary once `cancel` fires
    pub async fn run_with_cancel(&self, question: &str, cancel: CancellationToken) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("react_run", %run_id);
        self.drive(run_id, question, &cancel).instrument(span).await
    }

    async fn drive(&self, run_id: Uuid, question: &str, cancel: &CancellationToken) -> RunOutcome {
        tracing::info!(max_steps = self.config.max_steps, tools = self.tools.len(), "Starting ReAct run");

        let catalog = self.tools.catalog();
        let limit = self.config.max_consecutive_failures;
        let mut ledger = Ledger::new();
        let mut steps = 0;
        let mut consecutive_failures = 0;

        let status = loop {
            if cancel.is_cancelled() {
                break RunStatus::Aborted(AbortReason::Cancelled);
            }
            if steps >= self.config.max_steps {
                break RunStatus::Aborted(AbortReason::StepLimitExceeded);
            }
            steps += 1;

            let messages = self.render_prompt(&catalog, question, &ledger);
            let response = match self.reasoner.think(&messages, cancel).await {
                Ok(text) => text,
                Err(AgentError::Cancelled) => break RunStatus::Aborted(AbortReason::Cancelled),
                Err(err) if err.is_retryable() => {
                    consecutive_failures += 1;
                    tracing::warn!(step = steps, consecutive_failures, error = %err, "Reasoning call failed");
                    ledger.append(LedgerEntry::ReActStep {
                        thought: None,
                        action: MISSING_ACTION.into(),
                        observation: format!("{ERROR_PREFIX} reasoning service unavailable ({err}). Continue from the last step."),
                    });
                    if consecutive_failures > limit {
                        break RunStatus::Aborted(AbortReason::ServiceUnavailable(err.to_string()));
                    }
                    continue;
                }
                Err(err) => {
                    tracing::error!(step = steps, error = %err, "Reasoning service refused the request");
                    break RunStatus::Aborted(AbortReason::ServiceUnavailable(err.to_string()));
                }
            };

            let parsed = parser::parse(&response);
            match parsed.action {
                ParsedAction::Finish { answer } => {
                    tracing::info!(step = steps, "ReAct run finished");
                    return RunOutcome::new(run_id, RunStatus::Finished, Some(answer), ledger)
                        .with_calls(steps);
                }
                ref call @ ParsedAction::ToolCall { ref name, ref input } => {
                    consecutive_failures = 0;
                    tracing::debug!(step = steps, tool = %name, input = %input, "Invoking tool");

                    let result = tokio::select! {
                        biased;
                        () = cancel.cancelled() => break RunStatus::Aborted(AbortReason::Cancelled),
                        result = self.tools.invoke(name, input) => result,
                    };

                    tracing::debug!(step = steps, tool = %name, status = ?result.status, "Observation recorded");
                    ledger.append(LedgerEntry::ReActStep {
                        thought: parsed.thought,
                        action: call.render(),
                        observation: result.output,
                    });
                }
                ParsedAction::ParseFailure { .. } => {
                    consecutive_failures += 1;
                    tracing::warn!(step = steps, consecutive_failures, "Unparseable response");

                    let observation = format_error(parsed.action_text.is_some());
                    ledger.append(LedgerEntry::ReActStep {
                        thought: parsed.thought,
                        action: parsed.action_text.unwrap_or_else(|| MISSING_ACTION.into()),
                        observation,
                    });
                    if consecutive_failures > limit {
                        break RunStatus::Aborted(AbortReason::ParseExhausted);
                    }
                }
            }
        };

        tracing::warn!(step = steps, %status, "ReAct run stopped");
        RunOutcome::new(run_id, status, None, ledger).with_calls(steps)
    }

    fn render_prompt(&self, catalog: &str, question: &str, ledger: &Ledger) -> Vec<Message> {
        let history = ledger.render();
        let prompt = self.prompts.react.render(&[
            (Placeholder::Tools, catalog),
            (Placeholder::Question, question),
            (Placeholder::History, &history),
        ]);
        prompt_messages(self.config.system_prompt.as_deref(), prompt)
    }

    /// Get the tool registry
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Get configuration
    pub const fn config(&self) -> &ReactConfig {
        &self.config
    }
}

fn format_error(had_action_line: bool) -> String {
    if had_action_line {
        format!("{ERROR_PREFIX} invalid action format. Use `tool_name[tool_input]` or `Finish[final answer]`.")
    } else {
        format!(
            "{ERROR_PREFIX} no `Action:` line found. Reply with `Thought: ...` followed by `Action: tool_name[tool_input]` or `Action: Finish[final answer]`."
        )
    }
}

#[async_trait]
impl DraftProducer for ReactAgent {
    async fn produce(&self, task: &str, cancel: &CancellationToken) -> Result<String> {
        let outcome = self.run_with_cancel(task, cancel.clone()).await;
        match (outcome.status, outcome.answer) {
            (RunStatus::Finished, Some(answer)) => Ok(answer),
            (RunStatus::Aborted(reason), _) => Err(AgentError::Aborted(reason)),
            (RunStatus::Finished, None) => Err(AgentError::Other("ReAct run finished without an answer".into())),
        }
    }
}

/// Builder for [`ReactAgent`]
pub struct ReactAgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    reasoner: ReasonerConfig,
    tools: ToolRegistry,
    shared_tools: Option<Arc<ToolRegistry>>,
    prompts: Option<ReactPrompts>,
    max_steps: Option<usize>,
    max_consecutive_failures: Option<usize>,
    system_prompt: Option<String>,
}

impl Default for ReactAgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactAgentBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            reasoner: ReasonerConfig::default(),
            tools: ToolRegistry::new(),
            shared_tools: None,
            prompts: None,
            max_steps: None,
            max_consecutive_failures: None,
            system_prompt: None,
        }
    }

    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn reasoner_config(mut self, config: ReasonerConfig) -> Self {
        self.reasoner = config;
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.reasoner.generation.model = model.into();
        self
    }

    #[must_use]
    pub const fn temperature(mut self, temp: f32) -> Self {
        self.reasoner.generation.temperature = temp;
        self
    }

    /// Register a tool; fails on a duplicate name
    pub fn tool<T: Tool + 'static>(mut self, tool: T) -> Result<Self> {
        self.tools.register(tool)?;
        Ok(self)
    }

    /// Use an already-built, shared registry instead of [`Self::tool`] calls
    #[must_use]
    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.shared_tools = Some(tools);
        self
    }

    #[must_use]
    pub fn prompts(mut self, prompts: ReactPrompts) -> Self {
        self.prompts = Some(prompts);
        self
    }

    #[must_use]
    pub const fn max_steps(mut self, max: usize) -> Self {
        self.max_steps = Some(max);
        self
    }

    #[must_use]
    pub const fn max_consecutive_failures(mut self, max: usize) -> Self {
        self.max_consecutive_failures = Some(max);
        self
    }

    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn build(self) -> Result<ReactAgent> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;
        let max_steps = self
            .max_steps
            .ok_or_else(|| AgentError::Config("max_steps is required".into()))?;

        let mut config = ReactConfig::new(max_steps);
        if let Some(limit) = self.max_consecutive_failures {
            config.max_consecutive_failures = limit;
        }
        config.system_prompt = self.system_prompt;

        let prompts = match self.prompts {
            Some(prompts) => prompts,
            None => ReactPrompts::defaults()?,
        };
        let tools = self.shared_tools.unwrap_or_else(|| Arc::new(self.tools));

        ReactAgent::new(Reasoner::new(provider, self.reasoner), tools, prompts, config)
    }
}
