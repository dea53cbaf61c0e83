//! paradigm-agent CLI
//!
//! Commands:
//! - `react`: answer a question with the ReAct loop and the built-in tools
//! - `plan`: answer a question with Plan-and-Solve
//! - `reflect`: draft, critique and refine an answer
//!
//! Logs go to stderr; stdout carries only the answer (or the JSON outcome).

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;

use agent_core::{
    AgentError, CalculatorTool, DateTimeTool, DraftProducer, PlanAndSolveAgent, PlanConfig,
    PromptOverrides, ReactAgent, ReactConfig, Reasoner, ReasonerConfig, ReflectionAgent,
    ReflectionConfig, RetryPolicy, RunOutcome, SingleShot, ToolRegistry,
};
use agent_runtime::provider_from_env;

#[derive(Parser)]
#[command(
    name = "agent",
    about = "Run ReAct, Plan-and-Solve or Reflection against a reasoning service",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Print the full run outcome (status, ledger, plan) as JSON
    #[arg(long, global = true)]
    json: bool,

    /// TOML file overriding prompt templates
    #[arg(long, global = true, env = "AGENT_PROMPTS")]
    prompts: Option<PathBuf>,

    /// Model identifier passed to the provider
    #[arg(long, global = true, env = "LLM_MODEL_ID")]
    model: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Interleave reasoning with tool calls
    React {
        question: String,

        /// Hard cap on reasoning calls
        #[arg(long, env = "AGENT_MAX_STEPS")]
        max_steps: usize,

        /// Consecutive unparseable responses tolerated
        #[arg(long, env = "AGENT_MAX_PARSE_FAILURES")]
        max_parse_failures: Option<usize>,
    },

    /// Plan the steps first, then execute them in order
    Plan {
        question: String,

        /// Combine all step results with a final synthesis call
        #[arg(long, env = "AGENT_PLAN_SYNTHESIZE")]
        synthesize: bool,
    },

    /// Critique and refine a draft until the reviewer is satisfied
    Reflect {
        question: String,

        /// Hard cap on critique rounds
        #[arg(long, env = "AGENT_MAX_ROUNDS")]
        max_rounds: usize,

        /// Convergence sentinel the reviewer emits
        #[arg(long, env = "AGENT_SENTINEL")]
        sentinel: Option<String>,

        /// How the first draft is produced
        #[arg(long, value_enum, default_value_t = Inner::Single)]
        inner: Inner,

        /// Step cap for `--inner react`
        #[arg(long, env = "AGENT_MAX_STEPS")]
        max_steps: Option<usize>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Inner {
    Single,
    React,
    Plan,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load environment before clap reads env fallbacks
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let provider = provider_from_env().context("failed to configure the reasoning provider")?;
    if !provider.health_check().await.unwrap_or(false) {
        tracing::warn!(provider = provider.name(), "Reasoning provider is not reachable - runs will fail");
    }

    let mut reasoner_config = ReasonerConfig::from_env()?;
    if let Some(model) = &cli.model {
        reasoner_config.generation.model.clone_from(model);
    }
    let reasoner = Reasoner::new(provider, reasoner_config);

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current step");
            signal.cancel();
        }
    });

    let overrides = load_prompts(cli.prompts.as_deref())?;
    let outcome = match execute(&cli.command, reasoner, &overrides, cancel).await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!(error = %err, "Run failed");
            anyhow::bail!(err.user_message());
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        match &outcome.answer {
            Some(answer) => println!("{answer}"),
            None => println!("(no answer)"),
        }
        if let Some(reason) = outcome.status.abort_reason() {
            eprintln!("Run aborted: {reason}");
        }
    }

    Ok(if outcome.is_finished() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

async fn execute(
    command: &Command,
    reasoner: Reasoner,
    overrides: &PromptOverrides,
    cancel: CancellationToken,
) -> Result<RunOutcome, AgentError> {
    match command {
        Command::React {
            question,
            max_steps,
            max_parse_failures,
        } => {
            let agent = react_agent(reasoner, overrides, *max_steps, *max_parse_failures)?;
            Ok(agent.run_with_cancel(question, cancel).await)
        }
        Command::Plan { question, synthesize } => {
            let agent = plan_agent(reasoner, overrides, *synthesize)?;
            agent.run_with_cancel(question, cancel).await
        }
        Command::Reflect {
            question,
            max_rounds,
            sentinel,
            inner,
            max_steps,
        } => {
            let retry = RetryPolicy::from_env()?;
            let producer: Arc<dyn DraftProducer> = match inner {
                Inner::Single => Arc::new(SingleShot::new(
                    reasoner.clone(),
                    overrides.draft_template()?,
                    retry.clone(),
                )),
                Inner::React => {
                    let max_steps = max_steps.ok_or_else(|| {
                        AgentError::Config("--max-steps is required with --inner react".into())
                    })?;
                    Arc::new(react_agent(reasoner.clone(), overrides, max_steps, None)?)
                }
                Inner::Plan => Arc::new(plan_agent(reasoner.clone(), overrides, false)?),
            };

            let mut config = ReflectionConfig::new(*max_rounds);
            if let Some(sentinel) = sentinel {
                config.sentinel.clone_from(sentinel);
            }
            config.retry = retry;

            let agent = ReflectionAgent::new(producer, reasoner, overrides.reflection_prompts()?, config)?;
            agent.run_with_cancel(question, cancel).await
        }
    }
}

fn react_agent(
    reasoner: Reasoner,
    overrides: &PromptOverrides,
    max_steps: usize,
    max_parse_failures: Option<usize>,
) -> Result<ReactAgent, AgentError> {
    let mut tools = ToolRegistry::from_env()?;
    tools.register(CalculatorTool)?;
    tools.register(DateTimeTool)?;

    let mut config = ReactConfig::new(max_steps);
    if let Some(limit) = max_parse_failures {
        config.max_consecutive_failures = limit;
    }

    ReactAgent::new(reasoner, Arc::new(tools), overrides.react_prompts()?, config)
}

fn plan_agent(
    reasoner: Reasoner,
    overrides: &PromptOverrides,
    synthesize: bool,
) -> Result<PlanAndSolveAgent, AgentError> {
    let config = PlanConfig {
        synthesize,
        ..PlanConfig::from_env()?
    };
    Ok(PlanAndSolveAgent::new(reasoner, &overrides.plan_prompts()?, config))
}

/// Read prompt overrides from a TOML file, or use the built-in templates
fn load_prompts(path: Option<&Path>) -> anyhow::Result<PromptOverrides> {
    let Some(path) = path else {
        return Ok(PromptOverrides::default());
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read prompt file {}", path.display()))?;
    let overrides: PromptOverrides =
        toml::from_str(&raw).with_context(|| format!("invalid prompt file {}", path.display()))?;

    // Fail at startup on a template that lacks a required placeholder
    overrides.react_prompts()?;
    overrides.plan_prompts()?;
    overrides.reflection_prompts()?;
    overrides.draft_template()?;

    Ok(overrides)
}
