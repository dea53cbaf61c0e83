//! Plan-and-Solve Loop
//!
//! Two phases: a [`Planner`] turns the question into an ordered list of
//! steps with one reasoning call, then an [`Executor`] answers the steps
//! strictly in order. Every step prompt carries the question, the whole plan
//! and all earlier step results. Plans are immutable once produced, and
//! steps answer directly without calling tools.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{PlanConfig, RetryPolicy};
use crate::error::{AgentError, Result};
use crate::ledger::{Ledger, LedgerEntry};
use crate::message::prompt_messages;
use crate::outcome::{AbortReason, RunOutcome, RunStatus};
use crate::prompt::{PlanPrompts, Placeholder, PromptTemplate};
use crate::provider::Reasoner;
use crate::reflection::DraftProducer;

/// Ordered, immutable list of step descriptions
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    steps: Vec<String>,
}

impl Plan {
    /// Build a plan; fails on an empty list or a blank step
    pub fn new<I, S>(steps: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let steps: Vec<String> = steps
            .into_iter()
            .map(|s| s.into().trim().to_string())
            .collect();

        if steps.is_empty() {
            return Err(AgentError::PlanParse("plan has no steps".into()));
        }
        if let Some(blank) = steps.iter().position(String::is_empty) {
            return Err(AgentError::PlanParse(format!("step {} is blank", blank + 1)));
        }
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Numbered list, one step per line
    pub fn render(&self) -> String {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{}. {step}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Parse planner output into a [`Plan`].
///
/// Accepts a JSON array of strings or a list literal with single- or
/// double-quoted strings, either inside a fenced code block or bare within
/// surrounding prose.
pub fn parse_plan(text: &str) -> Result<Plan> {
    let body = fenced_block(text).unwrap_or(text);
    let list = list_literal(body)
        .or_else(|| list_literal(text))
        .ok_or_else(|| AgentError::PlanParse("no list found in planner output".into()))?;

    let steps = match serde_json::from_str::<Vec<serde_json::Value>>(list) {
        Ok(values) => values
            .into_iter()
            .map(|value| match value {
                serde_json::Value::String(step) => Ok(step),
                other => Err(AgentError::PlanParse(format!("plan step is not a string: {other}"))),
            })
            .collect::<Result<Vec<_>>>()?,
        Err(_) => parse_quoted_list(list)?,
    };

    Plan::new(steps)
}

/// Content of the first ``` fence, language tag dropped
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")? + 3;
    let after = &text[start..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// Slice from the first `[` to the last `]`
fn list_literal(text: &str) -> Option<&str> {
    let open = text.find('[')?;
    let close = text.rfind(']')?;
    (close > open).then(|| &text[open..=close])
}

/// Tokenize `['a', "b", ...]` with backslash escapes and an optional trailing comma
fn parse_quoted_list(list: &str) -> Result<Vec<String>> {
    let malformed = |what: &str| AgentError::PlanParse(format!("malformed plan list: {what}"));

    let inner = list
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| malformed("missing brackets"))?;

    let mut steps = Vec::new();
    let mut chars = inner.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(quote) = chars.next() else { break };
        if quote != '\'' && quote != '"' {
            return Err(malformed("plan steps must be quoted strings"));
        }

        let mut step = String::new();
        loop {
            match chars.next() {
                None => return Err(malformed("unterminated string")),
                Some(c) if c == quote => break,
                Some('\\') => match chars.next() {
                    Some('n') => step.push('\n'),
                    Some('t') => step.push('\t'),
                    Some(other) => step.push(other),
                    None => return Err(malformed("dangling escape")),
                },
                Some(c) => step.push(c),
            }
        }
        steps.push(step);

        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        match chars.next() {
            None => break,
            Some(',') => {}
            Some(_) => return Err(malformed("expected ',' between steps")),
        }
    }

    Ok(steps)
}

/// Produces a [`Plan`] with one reasoning call
#[derive(Clone)]
pub struct Planner {
    reasoner: Reasoner,
    template: PromptTemplate,
    retry: RetryPolicy,
    system_prompt: Option<String>,
}

impl Planner {
    pub fn new(reasoner: Reasoner, prompts: &PlanPrompts, config: &PlanConfig) -> Self {
        Self {
            reasoner,
            template: prompts.planner.clone(),
            retry: config.retry.clone(),
            system_prompt: config.system_prompt.clone(),
        }
    }

    /// Ask for a plan; malformed output fails with [`AgentError::PlanParse`]
    pub async fn plan(&self, question: &str, cancel: &CancellationToken) -> Result<Plan> {
        let prompt = self.template.render(&[(Placeholder::Question, question)]);
        let messages = prompt_messages(self.system_prompt.as_deref(), prompt);

        let response = self.reasoner.think_with_retry(&messages, &self.retry, cancel).await?;
        let plan = parse_plan(&response).inspect_err(|err| {
            tracing::warn!(error = %err, response = %response, "Planner output rejected");
        })?;

        tracing::info!(steps = plan.len(), "Plan created");
        Ok(plan)
    }
}

/// What the executor produced for one plan
#[derive(Clone, Debug)]
pub struct Execution {
    pub status: RunStatus,
    pub answer: Option<String>,
    pub ledger: Ledger,
    /// Reasoning calls made (steps plus synthesis)
    pub calls: usize,
}

/// Answers the steps of a plan in order
#[derive(Clone)]
pub struct Executor {
    reasoner: Reasoner,
    step_template: PromptTemplate,
    synthesis_template: PromptTemplate,
    config: PlanConfig,
}

impl Executor {
    pub fn new(reasoner: Reasoner, prompts: &PlanPrompts, config: PlanConfig) -> Self {
        Self {
            reasoner,
            step_template: prompts.executor.clone(),
            synthesis_template: prompts.synthesis.clone(),
            config,
        }
    }

    /// Run every step; a failed step fails the whole execution with
    /// [`AgentError::StepExecution`]. Cancellation is reported as a status.
    pub async fn execute(&self, question: &str, plan: &Plan, cancel: &CancellationToken) -> Result<Execution> {
        let rendered_plan = plan.render();
        let mut ledger = Ledger::new();
        let mut last_result = None;
        let mut calls = 0;

        for (index, step) in plan.steps().iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(Self::cancelled(ledger, calls));
            }
            tracing::debug!(step = index + 1, total = plan.len(), "Executing plan step");

            let history = ledger.render();
            let prompt = self.step_template.render(&[
                (Placeholder::Question, question),
                (Placeholder::Plan, &rendered_plan),
                (Placeholder::History, &history),
                (Placeholder::CurrentStep, step),
            ]);

            calls += 1;
            let result = match self.call(prompt, cancel).await {
                Ok(text) => text.trim().to_string(),
                Err(AgentError::Cancelled) => return Ok(Self::cancelled(ledger, calls)),
                Err(err) => {
                    tracing::error!(step = index + 1, error = %err, "Plan step failed");
                    return Err(AgentError::StepExecution {
                        index,
                        message: err.to_string(),
                    });
                }
            };

            ledger.append(LedgerEntry::PlanStep {
                index,
                description: step.clone(),
                result: result.clone(),
            });
            last_result = Some(result);
        }

        let answer = if self.config.synthesize {
            if cancel.is_cancelled() {
                return Ok(Self::cancelled(ledger, calls));
            }
            let history = ledger.render();
            let prompt = self.synthesis_template.render(&[
                (Placeholder::Question, question),
                (Placeholder::Plan, &rendered_plan),
                (Placeholder::History, &history),
            ]);

            calls += 1;
            match self.call(prompt, cancel).await {
                Ok(text) => Some(text.trim().to_string()),
                Err(AgentError::Cancelled) => return Ok(Self::cancelled(ledger, calls)),
                Err(err) => {
                    return Err(AgentError::StepExecution {
                        index: plan.len(),
                        message: format!("synthesis failed: {err}"),
                    });
                }
            }
        } else {
            last_result
        };

        Ok(Execution {
            status: RunStatus::Finished,
            answer,
            ledger,
            calls,
        })
    }

    async fn call(&self, prompt: String, cancel: &CancellationToken) -> Result<String> {
        let messages = prompt_messages(self.config.system_prompt.as_deref(), prompt);
        self.reasoner
            .think_with_retry(&messages, &self.config.retry, cancel)
            .await
    }

    fn cancelled(ledger: Ledger, calls: usize) -> Execution {
        Execution {
            status: RunStatus::Aborted(AbortReason::Cancelled),
            answer: None,
            ledger,
            calls,
        }
    }
}

/// Planner followed by Executor
///
/// Holds no per-run state; concurrent runs on one instance are independent.
#[derive(Clone)]
pub struct PlanAndSolveAgent {
    planner: Planner,
    executor: Executor,
}

impl PlanAndSolveAgent {
    pub fn new(reasoner: Reasoner, prompts: &PlanPrompts, config: PlanConfig) -> Self {
        Self {
            planner: Planner::new(reasoner.clone(), prompts, &config),
            executor: Executor::new(reasoner, prompts, config),
        }
    }

    /// Default templates and settings
    pub fn with_defaults(reasoner: Reasoner) -> Result<Self> {
        Ok(Self::new(reasoner, &PlanPrompts::defaults()?, PlanConfig::default()))
    }

    /// Plan, then execute.
    ///
    /// Fails with [`AgentError::PlanParse`] or [`AgentError::StepExecution`];
    /// everything else is reported through the outcome's status.
    pub async fn run(&self, question: &str) -> Result<RunOutcome> {
        self.run_with_cancel(question, CancellationToken::new()).await
    }

    pub async fn run_with_cancel(&self, question: &str, cancel: CancellationToken) -> Result<RunOutcome> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("plan_and_solve_run", %run_id);
        self.drive(run_id, question, &cancel).instrument(span).await
    }

    async fn drive(&self, run_id: Uuid, question: &str, cancel: &CancellationToken) -> Result<RunOutcome> {
        tracing::info!("Starting Plan-and-Solve run");

        if cancel.is_cancelled() {
            return Ok(Self::cancelled_before_plan(run_id, 0));
        }
        let plan = match self.planner.plan(question, cancel).await {
            Ok(plan) => plan,
            Err(AgentError::Cancelled) => return Ok(Self::cancelled_before_plan(run_id, 1)),
            Err(err) => return Err(err),
        };

        let execution = self.executor.execute(question, &plan, cancel).await?;
        tracing::info!(status = %execution.status, steps = execution.ledger.len(), "Plan-and-Solve run stopped");

        Ok(
            RunOutcome::new(run_id, execution.status, execution.answer, execution.ledger)
                .with_plan(plan)
                .with_calls(execution.calls + 1),
        )
    }

    fn cancelled_before_plan(run_id: Uuid, calls: usize) -> RunOutcome {
        RunOutcome::new(
            run_id,
            RunStatus::Aborted(AbortReason::Cancelled),
            None,
            Ledger::new(),
        )
        .with_calls(calls)
    }
}

#[async_trait]
impl DraftProducer for PlanAndSolveAgent {
    async fn produce(&self, task: &str, cancel: &CancellationToken) -> Result<String> {
        let outcome = self.run_with_cancel(task, cancel.clone()).await?;
        match (outcome.status, outcome.answer) {
            (RunStatus::Finished, Some(answer)) => Ok(answer),
            (RunStatus::Aborted(reason), _) => Err(AgentError::Aborted(reason)),
            (RunStatus::Finished, None) => Err(AgentError::Other("plan finished without an answer".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_helpers::ScriptedProvider;

    const FRUIT_QUESTION: &str = "A fruit shop sold 15 apples on Monday. On Tuesday it sold twice as many \
        as Monday. On Wednesday it sold 5 fewer than Tuesday. How many apples were sold in total?";

    const FRUIT_PLAN: &str = "Here is the plan:\n```python\n[\n  'Compute Monday sales: 15',\n  \
        'Compute Tuesday sales: 15 * 2',\n  'Compute Wednesday sales: Tuesday - 5',\n  'Add the three days'\n]\n```";

    fn fast_config() -> PlanConfig {
        PlanConfig {
            retry: RetryPolicy {
                max_retries: 2,
                backoff_ms: 0,
            },
            ..PlanConfig::default()
        }
    }

    fn agent(provider: Arc<ScriptedProvider>, config: PlanConfig) -> PlanAndSolveAgent {
        PlanAndSolveAgent::new(
            Reasoner::with_defaults(provider),
            &PlanPrompts::defaults().unwrap(),
            config,
        )
    }

    #[test]
    fn test_parse_python_style_fenced_list() {
        let plan = parse_plan(FRUIT_PLAN).unwrap();
        assert_eq!(plan.len(), 4);
        assert_eq!(plan.steps()[1], "Compute Tuesday sales: 15 * 2");
    }

    #[test]
    fn test_parse_json_list() {
        let plan = parse_plan("```json\n[\"first\", \"second\"]\n```").unwrap();
        assert_eq!(plan.steps(), ["first", "second"]);

        let plan = parse_plan("Plan: [\"look up\", \"summarize\"] done").unwrap();
        assert_eq!(plan.steps(), ["look up", "summarize"]);
    }

    #[test]
    fn test_parse_handles_escapes_and_trailing_comma() {
        let plan = parse_plan(r#"['Find the "best" option', 'Check O\'Brien\'s notes',]"#).unwrap();
        assert_eq!(plan.steps(), ["Find the \"best\" option", "Check O'Brien's notes"]);
    }

    #[test]
    fn test_parse_rejects_malformed_lists() {
        for text in [
            "I would start by looking things up.",
            "[]",
            "```json\n[1, 2, 3]\n```",
            "['unterminated]",
            "['a' 'b']",
            "['ok', '   ']",
        ] {
            assert!(
                matches!(parse_plan(text), Err(AgentError::PlanParse(_))),
                "expected PlanParse for {text:?}"
            );
        }
    }

    #[test]
    fn test_plan_render_is_numbered() {
        let plan = Plan::new(["a", "b"]).unwrap();
        assert_eq!(plan.render(), "1. a\n2. b");
    }

    #[tokio::test]
    async fn test_steps_see_all_prior_results() {
        let provider = Arc::new(ScriptedProvider::new([FRUIT_PLAN, "15", "30", "25", "70"]));
        let outcome = agent(provider.clone(), fast_config()).run(FRUIT_QUESTION).await.unwrap();

        assert!(outcome.is_finished());
        assert_eq!(outcome.answer.as_deref(), Some("70"));
        assert_eq!(outcome.reasoning_calls, 5);
        assert_eq!(outcome.plan.as_ref().map(Plan::len), Some(4));

        let indices: Vec<usize> = outcome
            .ledger
            .entries()
            .iter()
            .map(|entry| match entry {
                LedgerEntry::PlanStep { index, .. } => *index,
                other => panic!("unexpected entry {other:?}"),
            })
            .collect();
        assert_eq!(indices, [0, 1, 2, 3]);

        let prompts = provider.prompts();
        assert!(prompts[0].contains(FRUIT_QUESTION));
        assert!(prompts[1].contains("# Completed steps and results:\nNone"));
        assert!(prompts[1].contains("# Current step:\nCompute Monday sales: 15"));
        assert!(prompts[3].contains(
            "Step 1: Compute Monday sales: 15\nResult: 15\n\nStep 2: Compute Tuesday sales: 15 * 2\nResult: 30"
        ));
        assert!(prompts[4].contains("4. Add the three days"));
    }

    #[tokio::test]
    async fn test_synthesis_replaces_last_result() {
        let provider = Arc::new(ScriptedProvider::new([
            "[\"step one\", \"step two\"]",
            "one",
            "two",
            "The answer combines one and two.",
        ]));
        let config = PlanConfig {
            synthesize: true,
            ..fast_config()
        };
        let outcome = agent(provider.clone(), config).run("q").await.unwrap();

        assert_eq!(outcome.answer.as_deref(), Some("The answer combines one and two."));
        assert_eq!(outcome.reasoning_calls, 4);
        assert!(provider.prompts()[3].contains("Step 2: step two\nResult: two"));
    }

    #[tokio::test]
    async fn test_unparseable_plan_fails_run() {
        let provider = Arc::new(ScriptedProvider::new(["First I would think about it."]));
        let err = agent(provider.clone(), fast_config()).run("q").await.unwrap_err();

        assert!(matches!(err, AgentError::PlanParse(_)));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_step_failure_reports_index() {
        let provider = Arc::new(
            ScriptedProvider::new(["['a', 'b', 'c']", "A"])
                .then_error(AgentError::Auth("revoked".into())),
        );
        let err = agent(provider.clone(), fast_config()).run("q").await.unwrap_err();

        assert!(matches!(err, AgentError::StepExecution { index: 1, .. }));
        assert_eq!(err.to_string(), "Plan step 2 failed: Authentication failed: revoked");
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_step_retries_transport_errors() {
        let provider = Arc::new(
            ScriptedProvider::new(["['only step']"])
                .then_error(AgentError::Transport("reset".into()))
                .then_text("done"),
        );
        let outcome = agent(provider.clone(), fast_config()).run("q").await.unwrap();

        assert_eq!(outcome.answer.as_deref(), Some("done"));
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_status() {
        let provider = Arc::new(ScriptedProvider::repeating("['x']"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = agent(provider.clone(), fast_config())
            .run_with_cancel("q", cancel)
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Aborted(AbortReason::Cancelled));
        assert!(outcome.plan.is_none());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_produces_draft_for_reflection() {
        let provider = Arc::new(ScriptedProvider::new(["['write it']", "draft text"]));
        let draft = agent(provider, fast_config())
            .produce("task", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(draft, "draft text");
    }
}
