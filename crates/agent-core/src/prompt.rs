//! Prompt Templates
//!
//! Templates are configuration: format strings with named placeholders such as
//! `{question}`. A template is checked for its required placeholders when it is
//! built, so a broken template fails at startup instead of mid-run.

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Named slots a template can contain
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Placeholder {
    Tools,
    Question,
    History,
    Plan,
    CurrentStep,
    Draft,
    Feedback,
}

impl Placeholder {
    pub const ALL: [Self; 7] = [
        Self::Tools,
        Self::Question,
        Self::History,
        Self::Plan,
        Self::CurrentStep,
        Self::Draft,
        Self::Feedback,
    ];

    pub const fn key(self) -> &'static str {
        match self {
            Self::Tools => "tools",
            Self::Question => "question",
            Self::History => "history",
            Self::Plan => "plan",
            Self::CurrentStep => "current_step",
            Self::Draft => "draft",
            Self::Feedback => "feedback",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.key() == key)
    }
}

impl std::fmt::Display for Placeholder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}}}", self.key())
    }
}

/// A validated format string
#[derive(Clone, Debug)]
pub struct PromptTemplate {
    name: String,
    text: String,
}

impl PromptTemplate {
    /// Build a template, failing if any `required` placeholder is absent
    pub fn new(name: impl Into<String>, text: impl Into<String>, required: &[Placeholder]) -> Result<Self> {
        let name = name.into();
        let text = text.into();

        let missing: Vec<String> = required
            .iter()
            .filter(|p| !text.contains(&p.to_string()))
            .map(ToString::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(AgentError::Template(format!(
                "template '{name}' is missing {}",
                missing.join(", ")
            )));
        }

        Ok(Self { name, text })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Substitute placeholders in one left-to-right pass.
    ///
    /// Substituted values are never re-scanned. Braces that do not name a
    /// known placeholder, or name one without a value, are kept literally.
    pub fn render(&self, values: &[(Placeholder, &str)]) -> String {
        let mut out = String::with_capacity(self.text.len() + values.iter().map(|(_, v)| v.len()).sum::<usize>());
        let mut rest = self.text.as_str();

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];

            let value = after.find('}').and_then(|close| {
                let placeholder = Placeholder::from_key(&after[..close])?;
                let value = values.iter().find(|(p, _)| *p == placeholder)?.1;
                Some((close, value))
            });

            match value {
                Some((close, value)) => {
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Template for the ReAct loop
pub const REACT_TEMPLATE: &str = r"You are an assistant that can call external tools.

Available tools:
{tools}

Reply strictly in this format:

Thought: your reasoning about the problem and what to do next.
Action: exactly one of
- `tool_name[tool_input]` to call one of the available tools
- `Finish[final answer]` once you have enough information to answer the question

Example:
Thought: I need current information about DeepSeek, so I will search for it.
Action: Search[latest DeepSeek model]

Example:
Thought: The search told me the latest model is DeepSeek-V3.2, which answers the question.
Action: Finish[The latest DeepSeek model is DeepSeek-V3.2]

---
Now solve the following question.
Question: {question}
History:
{history}";

/// Template for the planner
pub const PLANNER_TEMPLATE: &str = r#"You are an expert planner. Break the user's question into a short plan of simple, independent steps in logical order.

Question: {question}

Output the plan as a JSON list of strings inside a fenced block, and nothing else:
```json
["step 1", "step 2", "step 3"]
```"#;

/// Template for one executor step
pub const EXECUTOR_TEMPLATE: &str = r"You are an expert executor. Solve the problem by following the plan strictly, one step at a time.
You are given the original question, the full plan, and the steps completed so far with their results.
Focus only on the current step and output only its answer, with no extra explanation.

# Original question:
{question}

# Full plan:
{plan}

# Completed steps and results:
{history}

# Current step:
{current_step}

Answer for the current step only:";

/// Template for the optional synthesis call
pub const SYNTHESIS_TEMPLATE: &str = r"You have executed every step of a plan. Combine the step results into one final answer to the original question.

# Original question:
{question}

# Full plan:
{plan}

# Steps and results:
{history}

Final answer:";

/// Template for a single-shot first draft
pub const DRAFT_TEMPLATE: &str = r"Complete the following task.

Task: {question}

Give a complete and accurate answer.";

/// Template for the critique call; must mention the sentinel
pub const CRITIQUE_TEMPLATE: &str = r"You are a careful reviewer. Review the answer below against the original task.

# Original task:
{question}

# Current answer:
{draft}

Review rules:
1. Check functional correctness first.
2. Only point out genuine defects: wrong results, missing requirements, or clearly poor quality. Do not ask for changes that are matters of taste or theoretical perfection.
3. If the answer is correct and acceptable, reply with exactly FINISH and nothing else.

Otherwise, list the defects and how to fix them.";

/// Template for the refine call
pub const REFINE_TEMPLATE: &str = r"Improve your answer using the reviewer's feedback.

# Original task:
{question}

# Your previous answer:
{draft}

# Reviewer feedback:
{feedback}

Output only the improved answer.";

/// Templates for the ReAct loop
#[derive(Clone, Debug)]
pub struct ReactPrompts {
    pub react: PromptTemplate,
}

impl ReactPrompts {
    pub fn new(react: &str) -> Result<Self> {
        Ok(Self {
            react: PromptTemplate::new(
                "react",
                react,
                &[Placeholder::Tools, Placeholder::Question, Placeholder::History],
            )?,
        })
    }

    pub fn defaults() -> Result<Self> {
        Self::new(REACT_TEMPLATE)
    }
}

/// Templates for Plan-and-Solve
#[derive(Clone, Debug)]
pub struct PlanPrompts {
    pub planner: PromptTemplate,
    pub executor: PromptTemplate,
    pub synthesis: PromptTemplate,
}

impl PlanPrompts {
    pub fn new(planner: &str, executor: &str, synthesis: &str) -> Result<Self> {
        Ok(Self {
            planner: PromptTemplate::new("planner", planner, &[Placeholder::Question])?,
            executor: PromptTemplate::new(
                "executor",
                executor,
                &[
                    Placeholder::Question,
                    Placeholder::Plan,
                    Placeholder::History,
                    Placeholder::CurrentStep,
                ],
            )?,
            synthesis: PromptTemplate::new(
                "synthesis",
                synthesis,
                &[Placeholder::Question, Placeholder::Plan, Placeholder::History],
            )?,
        })
    }

    pub fn defaults() -> Result<Self> {
        Self::new(PLANNER_TEMPLATE, EXECUTOR_TEMPLATE, SYNTHESIS_TEMPLATE)
    }
}

/// Templates for the Reflection loop
#[derive(Clone, Debug)]
pub struct ReflectionPrompts {
    pub critique: PromptTemplate,
    pub refine: PromptTemplate,
}

impl ReflectionPrompts {
    pub fn new(critique: &str, refine: &str) -> Result<Self> {
        Ok(Self {
            critique: PromptTemplate::new(
                "critique",
                critique,
                &[Placeholder::Question, Placeholder::Draft],
            )?,
            refine: PromptTemplate::new(
                "refine",
                refine,
                &[Placeholder::Question, Placeholder::Draft, Placeholder::Feedback],
            )?,
        })
    }

    pub fn defaults() -> Result<Self> {
        Self::new(CRITIQUE_TEMPLATE, REFINE_TEMPLATE)
    }
}

/// Template for a single-shot draft
pub fn draft_template(text: &str) -> Result<PromptTemplate> {
    PromptTemplate::new("draft", text, &[Placeholder::Question])
}

/// Optional overrides for any default template, e.g. loaded from a TOML file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptOverrides {
    pub react: Option<String>,
    pub planner: Option<String>,
    pub executor: Option<String>,
    pub synthesis: Option<String>,
    pub draft: Option<String>,
    pub critique: Option<String>,
    pub refine: Option<String>,
}

impl PromptOverrides {
    pub fn react_prompts(&self) -> Result<ReactPrompts> {
        ReactPrompts::new(self.react.as_deref().unwrap_or(REACT_TEMPLATE))
    }

    pub fn plan_prompts(&self) -> Result<PlanPrompts> {
        PlanPrompts::new(
            self.planner.as_deref().unwrap_or(PLANNER_TEMPLATE),
            self.executor.as_deref().unwrap_or(EXECUTOR_TEMPLATE),
            self.synthesis.as_deref().unwrap_or(SYNTHESIS_TEMPLATE),
        )
    }

    pub fn reflection_prompts(&self) -> Result<ReflectionPrompts> {
        ReflectionPrompts::new(
            self.critique.as_deref().unwrap_or(CRITIQUE_TEMPLATE),
            self.refine.as_deref().unwrap_or(REFINE_TEMPLATE),
        )
    }

    pub fn draft_template(&self) -> Result<PromptTemplate> {
        draft_template(self.draft.as_deref().unwrap_or(DRAFT_TEMPLATE))
    }
}
