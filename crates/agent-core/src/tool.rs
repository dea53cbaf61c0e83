//! Tool System
//!
//! Tools are named, described capabilities that take a single string input and
//! return a string. They are registered once at startup and invoked by the
//! ReAct loop through the [`ToolRegistry`], which never lets a tool failure
//! escape: every outcome becomes observation text.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Prefix that marks an observation as a failure
pub const ERROR_PREFIX: &str = "Error:";

const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

/// Tool definition shown to the reasoning service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier, matched case-sensitively
    pub name: String,

    /// Human-readable description (shown to the LLM)
    pub description: String,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// How a tool invocation ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    UnknownTool,
    Failed,
    TimedOut,
}

/// Result from tool execution, always carrying observation text
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool that was called
    pub name: String,

    /// Outcome classification
    pub status: ToolStatus,

    /// Observation text (tool output, or an `Error: ...` line)
    pub output: String,
}

impl ToolResult {
    pub fn success(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ToolStatus::Success,
            output: output.into(),
        }
    }

    pub fn failure(name: impl Into<String>, status: ToolStatus, message: impl AsRef<str>) -> Self {
        Self {
            name: name.into(),
            status,
            output: format!("{ERROR_PREFIX} {}", message.as_ref()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}

/// Tool trait - implement to add new capabilities
///
/// Implementations are responsible for their own internal concurrency
/// safety; the registry may invoke the same tool from several runs at once.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name and description for the prompt catalog
    fn schema(&self) -> ToolSchema;

    /// Run the tool on the raw bracketed input from the action line
    async fn invoke(&self, input: &str) -> anyhow::Result<String>;
}

/// A tool backed by a plain closure
///
/// The closure may block; it runs on tokio's blocking pool so the registry
/// timeout still fires. A timed-out call keeps its blocking thread until
/// the closure returns.
pub struct FnTool<F> {
    schema: ToolSchema,
    func: Arc<F>,
}

impl<F> FnTool<F>
where
    F: Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, description: impl Into<String>, func: F) -> Self {
        Self {
            schema: ToolSchema::new(name, description),
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl<F> Tool for FnTool<F>
where
    F: Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
{
    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn invoke(&self, input: &str) -> anyhow::Result<String> {
        let func = Arc::clone(&self.func);
        let input = input.to_string();

        match tokio::task::spawn_blocking(move || func(&input)).await {
            Ok(output) => output,
            // Re-raise so the registry reports it like any other tool panic
            Err(err) => match err.try_into_panic() {
                Ok(payload) => std::panic::resume_unwind(payload),
                Err(err) => Err(anyhow::anyhow!("tool task did not complete: {err}")),
            },
        }
    }
}

struct RegisteredTool {
    schema: ToolSchema,
    tool: Arc<dyn Tool>,
}

/// Registry for available tools
///
/// Built mutably at startup, then shared read-only (`Arc<ToolRegistry>`)
/// between concurrent runs. Catalog order is registration order.
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
    timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
            timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
        }
    }

    /// Set the per-invocation timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read `AGENT_TOOL_TIMEOUT` (seconds) if set
    pub fn from_env() -> Result<Self> {
        let registry = Self::new();
        match std::env::var("AGENT_TOOL_TIMEOUT") {
            Ok(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    AgentError::Config(format!("AGENT_TOOL_TIMEOUT has an invalid value: '{raw}'"))
                })?;
                Ok(registry.with_timeout(Duration::from_secs(secs)))
            }
            Err(_) => Ok(registry),
        }
    }

    /// Register a new tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    /// Register a shared tool
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let schema = tool.schema();
        if self.index.contains_key(&schema.name) {
            return Err(AgentError::DuplicateTool(schema.name));
        }

        tracing::debug!(tool = %schema.name, "Registered tool");
        self.index.insert(schema.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool { schema, tool });
        Ok(())
    }

    /// Register a closure as a tool
    pub fn register_fn<F>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        func: F,
    ) -> Result<()>
    where
        F: Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.register(FnTool::new(name, description, func))
    }

    /// Get a tool by exact name
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.index
            .get(name)
            .map(|&i| Arc::clone(&self.tools[i].tool))
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))
    }

    /// `(name, description)` pairs in registration order
    pub fn describe_all(&self) -> Vec<(&str, &str)> {
        self.tools
            .iter()
            .map(|t| (t.schema.name.as_str(), t.schema.description.as_str()))
            .collect()
    }

    /// Tool catalog for the `{tools}` placeholder
    pub fn catalog(&self) -> String {
        if self.tools.is_empty() {
            return "No tools available".into();
        }

        self.describe_all()
            .into_iter()
            .map(|(name, description)| format!("- `{name}`: {description}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Resolve and run a tool, converting every failure into observation text.
    ///
    /// Unknown names, tool errors, panics and timeouts all come back as a
    /// [`ToolResult`] whose output starts with `Error:`.
    pub async fn invoke(&self, name: &str, input: &str) -> ToolResult {
        let tool = match self.resolve(name) {
            Ok(tool) => tool,
            Err(err) => {
                tracing::warn!(tool = name, "{err}");
                return ToolResult::failure(
                    name,
                    ToolStatus::UnknownTool,
                    format!(
                        "`{name}` is not a valid tool. Available tools: {}",
                        self.names().join(", ")
                    ),
                );
            }
        };

        let call = AssertUnwindSafe(tool.invoke(input)).catch_unwind();
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(Ok(output))) => ToolResult::success(name, output),
            Ok(Ok(Err(err))) => {
                tracing::warn!(tool = name, error = %err, "Tool failed");
                ToolResult::failure(name, ToolStatus::Failed, format!("{err:#}"))
            }
            Ok(Err(_panic)) => {
                tracing::warn!(tool = name, "Tool panicked");
                ToolResult::failure(name, ToolStatus::Failed, format!("tool `{name}` panicked"))
            }
            Err(_) => {
                tracing::warn!(tool = name, timeout_secs = self.timeout.as_secs(), "Tool timed out");
                ToolResult::failure(
                    name,
                    ToolStatus::TimedOut,
                    format!("tool `{name}` timed out after {}s", self.timeout.as_secs()),
                )
            }
        }
    }

    /// Get tool names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.schema.name.as_str()).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{EchoTool, SlowTool};

    fn search_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn("Search", "A web search engine.", |q| Ok(format!("results for {q}")))
            .unwrap();
        registry.register(EchoTool).unwrap();
        registry
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut registry = search_registry();
        let err = registry
            .register_fn("Search", "another search", |_| Ok(String::new()))
            .unwrap_err();

        assert!(matches!(err, AgentError::DuplicateTool(name) if name == "Search"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_resolve_is_case_sensitive() {
        let registry = search_registry();
        assert!(registry.resolve("Search").is_ok());
        assert!(matches!(
            registry.resolve("search"),
            Err(AgentError::UnknownTool(name)) if name == "search"
        ));
    }

    #[test]
    fn test_catalog_keeps_registration_order() {
        let registry = search_registry();
        assert_eq!(
            registry.describe_all(),
            vec![
                ("Search", "A web search engine."),
                ("echo", "Repeats its input back."),
            ]
        );
        assert_eq!(
            registry.catalog(),
            "- `Search`: A web search engine.\n- `echo`: Repeats its input back."
        );
        assert_eq!(ToolRegistry::new().catalog(), "No tools available");
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let registry = search_registry();
        let result = registry.invoke("Search", "rust").await;
        assert!(result.is_success());
        assert_eq!(result.output, "results for rust");
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool_becomes_observation() {
        let registry = search_registry();
        let result = registry.invoke("Weather", "Paris").await;
        assert_eq!(result.status, ToolStatus::UnknownTool);
        assert!(result.output.starts_with("Error:"));
        assert!(result.output.contains("Search, echo"));
    }

    #[tokio::test]
    async fn test_invoke_tool_error_becomes_observation() {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn("flaky", "Always fails", |_| anyhow::bail!("upstream returned 503"))
            .unwrap();

        let result = registry.invoke("flaky", "x").await;
        assert_eq!(result.status, ToolStatus::Failed);
        assert_eq!(result.output, "Error: upstream returned 503");
    }

    #[tokio::test]
    async fn test_invoke_catches_panics() {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn("boom", "Panics", |_| panic!("tool bug"))
            .unwrap();

        let result = registry.invoke("boom", "x").await;
        assert_eq!(result.status, ToolStatus::Failed);
        assert!(result.output.contains("panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_times_out() {
        let mut registry = ToolRegistry::new().with_timeout(Duration::from_secs(2));
        registry.register(SlowTool(Duration::from_secs(60))).unwrap();

        let result = registry.invoke("slow", "x").await;
        assert_eq!(result.status, ToolStatus::TimedOut);
        assert!(result.output.starts_with("Error:"));
    }

    #[tokio::test]
    async fn test_blocking_closure_times_out() {
        let mut registry = ToolRegistry::new().with_timeout(Duration::from_millis(100));
        registry
            .register_fn("shell", "Runs a slow command", |_| {
                std::thread::sleep(Duration::from_millis(800));
                Ok("done".into())
            })
            .unwrap();

        let started = std::time::Instant::now();
        let result = registry.invoke("shell", "x").await;

        assert_eq!(result.status, ToolStatus::TimedOut);
        assert!(result.output.starts_with("Error:"));
        assert!(started.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_blocking_closure_does_not_stall_other_calls() {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn("shell", "Runs a slow command", |_| {
                std::thread::sleep(Duration::from_millis(300));
                Ok("done".into())
            })
            .unwrap();
        registry.register(EchoTool).unwrap();
        let registry = Arc::new(registry);

        let slow = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.invoke("shell", "x").await }
        });
        let started = std::time::Instant::now();
        let echo = registry.invoke("echo", "hi").await;

        assert_eq!(echo.output, "hi");
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(slow.await.unwrap().output, "done");
    }

    #[tokio::test]
    async fn test_shared_registry_concurrent_invoke() {
        let registry = Arc::new(search_registry());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.invoke("echo", &format!("msg-{i}")).await })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            let result = handle.await.unwrap();
            assert_eq!(result.output, format!("msg-{i}"));
        }
    }
}
