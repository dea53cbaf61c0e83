//! # agent-core
//!
//! Provider-agnostic agent loops: ReAct, Plan-and-Solve and Reflection,
//! built on a shared tool registry, output parser and run ledger.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                              Loops                               │
//! │  ┌─────────────┐   ┌─────────────────┐   ┌────────────────────┐  │
//! │  │ ReactAgent  │   │ PlanAndSolve    │   │ ReflectionAgent    │  │
//! │  │             │   │ Planner/Executor│   │ (any DraftProducer)│  │
//! │  └──────┬──────┘   └────────┬────────┘   └─────────┬──────────┘  │
//! │         │                   │                      │             │
//! │  ┌──────┴──────┐   ┌────────┴────────┐   ┌─────────┴──────────┐  │
//! │  │ Output      │   │ Ledger +        │   │ Reasoner           │  │
//! │  │ Parser      │   │ PromptTemplates │   │ (LlmProvider)      │  │
//! │  └──────┬──────┘   └─────────────────┘   └────────────────────┘  │
//! │  ┌──────┴──────┐                                                 │
//! │  │ToolRegistry │                                                 │
//! │  └─────────────┘                                                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` trait enables swapping between Ollama, OpenAI-compatible
//! services, or a scripted test double without changing loop logic. Each run
//! owns its ledger; the tool registry is the only state shared between runs.

pub mod builtin;
pub mod config;
pub mod error;
pub mod ledger;
pub mod message;
pub mod outcome;
pub mod parser;
pub mod plan;
pub mod prompt;
pub mod provider;
pub mod react;
pub mod reflection;
pub mod tool;

#[cfg(test)]
mod test_helpers;

pub use builtin::{CalculatorTool, DateTimeTool};
pub use config::{PlanConfig, ReactConfig, ReasonerConfig, ReflectionConfig, RetryPolicy};
pub use error::{AgentError, Result};
pub use ledger::{Ledger, LedgerEntry, ReflectionVerdict};
pub use message::{Message, Role};
pub use outcome::{AbortReason, RunOutcome, RunStatus};
pub use parser::{ParsedAction, ParsedOutput};
pub use plan::{Executor, Plan, PlanAndSolveAgent, Planner};
pub use prompt::{PlanPrompts, PromptOverrides, PromptTemplate, ReactPrompts, ReflectionPrompts};
pub use provider::{Completion, GenerationOptions, LlmProvider, Reasoner};
pub use react::{ReactAgent, ReactAgentBuilder};
pub use reflection::{DraftProducer, ReflectionAgent, SingleShot};
pub use tool::{FnTool, Tool, ToolRegistry, ToolResult, ToolSchema, ToolStatus};

/// Re-exported so callers can cancel runs without a direct dependency
pub use tokio_util::sync::CancellationToken;
