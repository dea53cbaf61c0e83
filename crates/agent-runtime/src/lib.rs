//! # agent-runtime
//!
//! Reasoning-service providers for agent-core.
//!
//! ## Providers
//!
//! - **Ollama** (default feature): local inference through the native chat API
//! - **OpenAI-compatible**: OpenAI, SiliconFlow, ModelScope, vLLM, or any
//!   `/chat/completions` endpoint
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::provider_from_env;
//!
//! let provider = provider_from_env()?;
//! let agent = ReactAgent::builder()
//!     .provider(provider)
//!     .max_steps(8)
//!     .build()?;
//! ```

pub mod detect;
#[cfg(feature = "ollama")]
pub mod ollama;
pub mod openai_compat;

pub use detect::{ProviderKind, build_provider, provider_from_env};
#[cfg(feature = "ollama")]
pub use ollama::{OllamaConfig, OllamaProvider};
pub use openai_compat::{OpenAiCompatConfig, OpenAiCompatProvider};

// Re-export core types for convenience
pub use agent_core::{AgentError, LlmProvider, Message, Result, Role};
