//! Provider Selection
//!
//! Picks a reasoning backend from the environment, in this order:
//!
//! 1. `LLM_PROVIDER`, when set
//! 2. a vendor key: `SILICONFLOW_API_KEY`, `MODELSCOPE_API_KEY`, `OPENAI_API_KEY`
//! 3. the host in `LLM_BASE_URL` (`localhost:11434` is Ollama, `:8000` is vLLM)
//! 4. the prefix of `LLM_API_KEY` (`ms-` ModelScope, `sk-` SiliconFlow)
//! 5. otherwise a custom endpoint from `LLM_BASE_URL`/`LLM_API_KEY`

use std::str::FromStr;
use std::sync::Arc;

use agent_core::{AgentError, LlmProvider, Result};

use crate::openai_compat::{OpenAiCompatConfig, OpenAiCompatProvider};

/// Known reasoning-service vendors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    SiliconFlow,
    ModelScope,
    Ollama,
    Vllm,
    Local,
    Custom,
}

impl ProviderKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::SiliconFlow => "siliconflow",
            Self::ModelScope => "modelscope",
            Self::Ollama => "ollama",
            Self::Vllm => "vllm",
            Self::Local => "local",
            Self::Custom => "custom",
        }
    }

    /// Base URL used when none is configured
    pub const fn default_base_url(self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("https://api.openai.com/v1"),
            Self::SiliconFlow => Some("https://api.siliconflow.cn/v1"),
            Self::ModelScope => Some("https://api-inference.modelscope.cn/v1"),
            Self::Ollama => Some("http://localhost:11434/v1"),
            Self::Vllm => Some("http://localhost:8000/v1"),
            Self::Local | Self::Custom => None,
        }
    }

    /// Vendor-specific key and base-URL variables
    const fn env_keys(self) -> (Option<&'static str>, Option<&'static str>) {
        match self {
            Self::OpenAi => (Some("OPENAI_API_KEY"), Some("OPENAI_BASE_URL")),
            Self::SiliconFlow => (Some("SILICONFLOW_API_KEY"), Some("SILICONFLOW_BASE_URL")),
            Self::ModelScope => (Some("MODELSCOPE_API_KEY"), Some("MODELSCOPE_BASE_URL")),
            Self::Ollama => (None, Some("OLLAMA_BASE_URL")),
            Self::Vllm | Self::Local | Self::Custom => (None, None),
        }
    }

    const fn requires_key(self) -> bool {
        matches!(self, Self::OpenAi | Self::SiliconFlow | Self::ModelScope)
    }

    /// Detect the provider from process environment variables
    pub fn detect() -> Result<Self> {
        Self::detect_with(|key| std::env::var(key).ok())
    }

    /// Detect the provider using `lookup` for variable values
    pub fn detect_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(explicit) = get("LLM_PROVIDER") {
            return explicit.parse();
        }

        for (key, kind) in [
            ("SILICONFLOW_API_KEY", Self::SiliconFlow),
            ("MODELSCOPE_API_KEY", Self::ModelScope),
            ("OPENAI_API_KEY", Self::OpenAi),
        ] {
            if get(key).is_some() {
                return Ok(kind);
            }
        }

        if let Some(kind) = get("LLM_BASE_URL").and_then(|url| Self::from_base_url(&url)) {
            return Ok(kind);
        }

        if let Some(key) = get("LLM_API_KEY") {
            if key.starts_with("ms-") {
                return Ok(Self::ModelScope);
            }
            if key.starts_with("sk-") {
                return Ok(Self::SiliconFlow);
            }
        }

        Ok(Self::Custom)
    }

    fn from_base_url(url: &str) -> Option<Self> {
        let url = url.to_lowercase();
        if url.contains("api-inference.modelscope.cn") {
            Some(Self::ModelScope)
        } else if url.contains("api.openai.com") {
            Some(Self::OpenAi)
        } else if url.contains("api.siliconflow.cn") {
            Some(Self::SiliconFlow)
        } else if url.contains("localhost") || url.contains("127.0.0.1") {
            if url.contains(":11434") {
                Some(Self::Ollama)
            } else if url.contains(":8000") {
                Some(Self::Vllm)
            } else {
                Some(Self::Local)
            }
        } else {
            None
        }
    }

    /// Resolve `(api_key, base_url)`: vendor variables, then the general
    /// `LLM_API_KEY`/`LLM_BASE_URL`, then the vendor default URL
    fn credentials(self, lookup: &impl Fn(&str) -> Option<String>) -> Result<(Option<String>, String)> {
        let get = |key: Option<&str>| key.and_then(lookup).filter(|v| !v.trim().is_empty());
        let (key_var, url_var) = self.env_keys();

        let api_key = get(key_var).or_else(|| get(Some("LLM_API_KEY")));
        let base_url = get(url_var)
            .or_else(|| get(Some("LLM_BASE_URL")))
            .or_else(|| self.default_base_url().map(String::from))
            .ok_or_else(|| AgentError::Config(format!("LLM_BASE_URL is required for provider '{}'", self.name())))?;

        if self.requires_key() && api_key.is_none() {
            return Err(AgentError::Config(format!("an API key is required for provider '{}'", self.name())));
        }
        Ok((api_key, base_url))
    }
}

impl FromStr for ProviderKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "siliconflow" => Ok(Self::SiliconFlow),
            "modelscope" => Ok(Self::ModelScope),
            "ollama" => Ok(Self::Ollama),
            "vllm" => Ok(Self::Vllm),
            "local" => Ok(Self::Local),
            "custom" | "auto" => Ok(Self::Custom),
            other => Err(AgentError::Config(format!("unknown LLM_PROVIDER '{other}'"))),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Build the provider selected by the environment
pub fn provider_from_env() -> Result<Arc<dyn LlmProvider>> {
    let lookup = |key: &str| std::env::var(key).ok();
    let kind = ProviderKind::detect_with(lookup)?;
    build_provider(kind, &lookup)
}

/// Build a provider of `kind`, reading settings through `lookup`
pub fn build_provider(kind: ProviderKind, lookup: &impl Fn(&str) -> Option<String>) -> Result<Arc<dyn LlmProvider>> {
    let (api_key, base_url) = kind.credentials(lookup)?;
    tracing::info!(provider = %kind, base_url = %base_url, "Selected reasoning provider");

    #[cfg(feature = "ollama")]
    if kind == ProviderKind::Ollama {
        let config = crate::ollama::OllamaConfig::from_base_url(&base_url);
        return Ok(Arc::new(crate::ollama::OllamaProvider::from_config(config)));
    }

    let config = OpenAiCompatConfig::new(kind.name(), base_url, api_key);
    Ok(Arc::new(OpenAiCompatProvider::new(config)?))
}
