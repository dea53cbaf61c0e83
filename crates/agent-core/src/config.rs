//! Loop Configuration
//!
//! Limits and timeouts for the three loops. Every struct deserializes from
//! TOML/JSON and has a `from_env()` constructor. The two hard bounds against
//! runaway reasoning (`max_steps`, `max_rounds`) have no default: callers
//! must choose them.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::provider::GenerationOptions;

/// Default convergence sentinel emitted by the critique call
pub const DEFAULT_SENTINEL: &str = "FINISH";

/// Bounded retry for transport-level failures
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between attempts; attempt `n` waits `n * backoff_ms`
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    2
}

const fn default_backoff_ms() -> u64 {
    500
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_ms: 0,
        }
    }

    /// Delay before the given (1-based) retry attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }

    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            max_retries: env_parse("AGENT_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
            backoff_ms: env_parse("AGENT_RETRY_BACKOFF_MS")?.unwrap_or(defaults.backoff_ms),
        })
    }
}

/// Timeout and generation settings for reasoning-service calls
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReasonerConfig {
    /// Per-call timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Generation options forwarded to the provider
    #[serde(default)]
    pub generation: GenerationOptions,
}

const fn default_llm_timeout() -> u64 {
    60
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_llm_timeout(),
            generation: GenerationOptions::default(),
        }
    }
}

impl ReasonerConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(timeout) = env_parse("LLM_TIMEOUT")? {
            config.timeout_secs = timeout;
        }
        if let Ok(model) = std::env::var("LLM_MODEL_ID") {
            config.generation.model = model;
        }
        if let Some(temperature) = env_parse("LLM_TEMPERATURE")? {
            config.generation.temperature = temperature;
        }
        config.generation.max_tokens = env_parse("LLM_MAX_TOKENS")?;
        Ok(config)
    }
}

/// Limits for the ReAct loop
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReactConfig {
    /// Hard cap on reasoning-service invocations per run (required)
    pub max_steps: usize,

    /// Consecutive unparseable or failed responses tolerated before aborting
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: usize,

    /// Optional system message sent ahead of every prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
}

const fn default_max_consecutive_failures() -> usize {
    2
}

impl ReactConfig {
    pub const fn new(max_steps: usize) -> Self {
        Self {
            max_steps,
            max_consecutive_failures: default_max_consecutive_failures(),
            system_prompt: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(AgentError::Config("max_steps must be at least 1".into()));
        }
        Ok(())
    }

    /// Reads `AGENT_MAX_STEPS` (required) and `AGENT_MAX_PARSE_FAILURES`
    pub fn from_env() -> Result<Self> {
        let max_steps = env_parse("AGENT_MAX_STEPS")?
            .ok_or_else(|| AgentError::Config("AGENT_MAX_STEPS is required".into()))?;
        let mut config = Self::new(max_steps);
        if let Some(limit) = env_parse("AGENT_MAX_PARSE_FAILURES")? {
            config.max_consecutive_failures = limit;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Settings for the Plan-and-Solve loop
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Retry policy for the planner and for each step call
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Run a final synthesis call over all step results instead of
    /// returning the last step's result
    #[serde(default)]
    pub synthesize: bool,

    /// Optional system message sent ahead of every prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl PlanConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            retry: RetryPolicy::from_env()?,
            synthesize: env_parse("AGENT_PLAN_SYNTHESIZE")?.unwrap_or(false),
            system_prompt: None,
        })
    }
}

/// Limits for the Reflection loop
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReflectionConfig {
    /// Hard cap on critique rounds per run (required)
    pub max_rounds: usize,

    /// Token in the critique that signals convergence
    #[serde(default = "default_sentinel")]
    pub sentinel: String,

    /// Retry policy for critique and refine calls
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Optional system message sent ahead of every prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_sentinel() -> String {
    DEFAULT_SENTINEL.into()
}

impl ReflectionConfig {
    pub fn new(max_rounds: usize) -> Self {
        Self {
            max_rounds,
            sentinel: default_sentinel(),
            retry: RetryPolicy::default(),
            system_prompt: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_rounds == 0 {
            return Err(AgentError::Config("max_rounds must be at least 1".into()));
        }
        if self.sentinel.trim().is_empty() {
            return Err(AgentError::Config("convergence sentinel must not be empty".into()));
        }
        Ok(())
    }

    /// Reads `AGENT_MAX_ROUNDS` (required) and `AGENT_SENTINEL`
    pub fn from_env() -> Result<Self> {
        let max_rounds = env_parse("AGENT_MAX_ROUNDS")?
            .ok_or_else(|| AgentError::Config("AGENT_MAX_ROUNDS is required".into()))?;
        let mut config = Self::new(max_rounds);
        if let Ok(sentinel) = std::env::var("AGENT_SENTINEL") {
            config.sentinel = sentinel;
        }
        config.retry = RetryPolicy::from_env()?;
        config.validate()?;
        Ok(config)
    }
}

/// Parse an optional environment variable, rejecting malformed values
fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AgentError::Config(format!("{key} has an invalid value: '{raw}'"))),
        Err(_) => Ok(None),
    }
}
