//! Scripted providers and tools for deterministic loop tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::provider::{Completion, GenerationOptions, LlmProvider};
use crate::tool::{Tool, ToolSchema};

enum Reply {
    Text(String),
    Error(AgentError),
}

type Responder = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Provider that replays queued replies, then falls back to a responder.
///
/// Panics when the queue is empty and no responder is set, so a test that
/// makes more calls than it scripted fails loudly.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Reply>>,
    responder: Option<Responder>,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Reply::Text(r.into())).collect()),
            responder: None,
            delay: None,
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::<String>::new())
    }

    /// Same reply for every call
    pub fn repeating(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::responding(move |_| text.clone())
    }

    /// Reply computed from the last message of each call
    pub fn responding<F>(responder: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::empty()
        }
    }

    #[must_use]
    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.replies.lock().unwrap().push_back(Reply::Text(text.into()));
        self
    }

    #[must_use]
    pub fn then_error(self, error: AgentError) -> Self {
        self.replies.lock().unwrap().push_back(Reply::Error(error));
        self
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Content of the last message of every call, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete(&self, messages: &[Message], options: &GenerationOptions) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.prompts.lock().unwrap().push(prompt.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Text(text)) => Ok(Completion::text(text, &options.model)),
            Some(Reply::Error(err)) => Err(err),
            None => {
                let responder = self
                    .responder
                    .as_ref()
                    .unwrap_or_else(|| panic!("ScriptedProvider exhausted on prompt:\n{prompt}"));
                Ok(Completion::text(responder(&prompt), &options.model))
            }
        }
    }
}

/// Returns its input unchanged
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("echo", "Repeats its input back.")
    }

    async fn invoke(&self, input: &str) -> anyhow::Result<String> {
        Ok(input.to_string())
    }
}

/// Sleeps for the given duration before answering
pub struct SlowTool(pub Duration);

#[async_trait]
impl Tool for SlowTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("slow", "Takes its time.")
    }

    async fn invoke(&self, _input: &str) -> anyhow::Result<String> {
        tokio::time::sleep(self.0).await;
        Ok("finally".into())
    }
}
