//! OpenAI-compatible LLM Provider
//!
//! Works with any endpoint exposing `POST {base_url}/chat/completions`:
//! OpenAI, SiliconFlow, ModelScope, vLLM, Ollama's `/v1`, and most hosted
//! gateways. Non-streaming only; the loops consume whole responses.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{Completion, FinishReason, GenerationOptions, LlmProvider, TokenUsage},
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Connection settings for an OpenAI-compatible endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenAiCompatConfig {
    /// Name used in logs (e.g. "siliconflow")
    pub name: String,

    /// Base URL up to, not including, `/chat/completions`
    pub base_url: String,

    /// Bearer token; local servers usually need none
    pub api_key: Option<String>,

    /// HTTP request timeout in seconds
    pub timeout_secs: u64,
}

impl OpenAiCompatConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            timeout_secs: 120,
        }
    }

    /// Reads `LLM_BASE_URL` (required) and `LLM_API_KEY`
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("LLM_BASE_URL")
            .map_err(|_| AgentError::Config("LLM_BASE_URL is required".into()))?;
        Ok(Self::new("custom", base_url, std::env::var("LLM_API_KEY").ok()))
    }
}

/// Provider for OpenAI-compatible chat completion endpoints
pub struct OpenAiCompatProvider {
    config: OpenAiCompatConfig,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(config: OpenAiCompatConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(OpenAiCompatConfig::from_env()?)
    }

    pub const fn config(&self) -> &OpenAiCompatConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn send_error(&self, err: &reqwest::Error) -> AgentError {
        if err.is_timeout() {
            AgentError::Timeout(self.config.timeout_secs)
        } else {
            AgentError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .authorized(self.client.get(self.endpoint("models")))
            .send()
            .await;

        match response {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                tracing::warn!(provider = %self.config.name, "Health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        let body = ChatRequest::new(messages, options);

        tracing::debug!(provider = %self.config.name, model = %options.model, "Sending completion request");
        let response = self
            .authorized(self.client.post(self.endpoint("chat/completions")))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.send_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            tracing::warn!(provider = %self.config.name, status = status.as_u16(), body = %error_body, "Provider returned error");
            return Err(status_error(status, error_body));
        }

        let decoded: ChatResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Transport(format!("failed to decode response: {e}")))?;

        decoded.into_completion(&options.model)
    }
}

/// Map a non-success HTTP status onto the error taxonomy
fn status_error(status: StatusCode, body: String) -> AgentError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => AgentError::RateLimited(body),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AgentError::Auth(format!("{status}: invalid API key or insufficient permissions"))
        }
        _ => AgentError::Transport(format!("{status}: {body}")),
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
    stream: bool,
}

impl<'a> ChatRequest<'a> {
    fn new(messages: &'a [Message], options: &'a GenerationOptions) -> Self {
        Self {
            model: &options.model,
            messages: messages
                .iter()
                .map(|m| ApiMessage {
                    role: match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    content: &m.content,
                })
                .collect(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stop: &options.stop_sequences,
            stream: false,
        }
    }
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl ChatResponse {
    fn into_completion(self, requested_model: &str) -> Result<Completion> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Transport("no choices in response".into()))?;

        let finish_reason = choice.finish_reason.as_deref().and_then(|reason| match reason {
            "stop" => Some(FinishReason::Stop),
            "length" => Some(FinishReason::Length),
            "content_filter" => Some(FinishReason::ContentFilter),
            _ => None,
        });

        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            model: self.model.unwrap_or_else(|| requested_model.to_string()),
            usage: self.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_trims_base_url_and_blank_key() {
        let config = OpenAiCompatConfig::new("local", "http://localhost:8000/v1/", Some("  ".into()));
        assert_eq!(config.base_url, "http://localhost:8000/v1");
        assert!(config.api_key.is_none());

        let provider = OpenAiCompatProvider::new(config).unwrap();
        assert_eq!(provider.endpoint("chat/completions"), "http://localhost:8000/v1/chat/completions");
    }

    #[test]
    fn test_request_body() {
        let messages = vec![Message::system("Be brief."), Message::user("2+2?")];
        let options = GenerationOptions {
            model: "deepseek-ai/DeepSeek-V3".into(),
            temperature: 0.0,
            max_tokens: Some(256),
            stop_sequences: Vec::new(),
        };

        let body = serde_json::to_value(ChatRequest::new(&messages, &options)).unwrap();

        assert_eq!(body["model"], "deepseek-ai/DeepSeek-V3");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "2+2?");
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["stream"], false);
        assert!(body.get("stop").is_none());
    }

    #[test]
    fn test_response_decoding() {
        let raw = r#"{
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Action: Finish[4]"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 5, "total_tokens": 17}
        }"#;
        let decoded: ChatResponse = serde_json::from_str(raw).unwrap();
        let completion = decoded.into_completion("requested").unwrap();

        assert_eq!(completion.content, "Action: Finish[4]");
        assert_eq!(completion.model, "gpt-4o-mini");
        assert_eq!(completion.finish_reason, Some(FinishReason::Stop));
        assert_eq!(completion.usage.map(|u| u.total_tokens), Some(17));
    }

    #[test]
    fn test_response_without_choices_is_transport_error() {
        let decoded: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(
            decoded.into_completion("m"),
            Err(AgentError::Transport(_))
        ));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "slow down".into()),
            AgentError::RateLimited(_)
        ));
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, String::new()),
            AgentError::Auth(_)
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, String::new()),
            AgentError::Auth(_)
        ));

        let err = status_error(StatusCode::BAD_GATEWAY, "upstream".into());
        assert!(err.is_retryable());
        assert!(err.to_string().contains("502"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let config = OpenAiCompatConfig::new("local", "http://127.0.0.1:9/v1", None);
        let provider = OpenAiCompatProvider::new(config).unwrap();

        assert!(!provider.health_check().await.unwrap());

        let err = provider
            .complete(&[Message::user("hi")], &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
