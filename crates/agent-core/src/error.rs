//! Error Types

use thiserror::Error;

use crate::outcome::AbortReason;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// A tool with this name is already registered
    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),

    /// Tool not found in registry
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Reasoning service failed to deliver a response
    #[error("Transport error: {0}")]
    Transport(String),

    /// Reasoning service or tool did not answer in time
    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// Rate limited by the reasoning service
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The run was cancelled by its caller
    #[error("Run cancelled")]
    Cancelled,

    /// Planner output was not an ordered list of steps
    #[error("Plan parse error: {0}")]
    PlanParse(String),

    /// A plan step could not be executed (index is zero-based)
    #[error("Plan step {} failed: {message}", .index + 1)]
    StepExecution { index: usize, message: String },

    /// Prompt template is missing a placeholder or is otherwise invalid
    #[error("Template error: {0}")]
    Template(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// An inner loop stopped before producing an answer
    #[error("Run aborted: {0}")]
    Aborted(AbortReason),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout(_) | Self::RateLimited(_)
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport(_) | Self::Timeout(_) => {
                "The reasoning service is currently unavailable. Please try again.".into()
            }
            Self::RateLimited(_) => "Too many requests to the reasoning service. Please wait a moment.".into(),
            Self::Auth(_) => "Authentication with the reasoning service failed. Please check your API key.".into(),
            Self::Cancelled => "The run was cancelled.".into(),
            Self::PlanParse(_) => "Could not build a plan for this question.".into(),
            Self::StepExecution { index, .. } => {
                format!("Step {} of the plan could not be completed.", index + 1)
            }
            Self::Template(msg) | Self::Config(msg) => format!("Invalid configuration: {msg}"),
            Self::Aborted(reason) => format!("The run stopped early: {reason}."),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
