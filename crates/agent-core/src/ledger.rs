//! Run Ledger
//!
//! Ordered, append-only record of a single run. The reasoning service is
//! stateless, so the ledger is rendered back into every prompt; rendering is
//! deterministic (no timestamps, no ids).

use serde::{Deserialize, Serialize};

/// Rendered in place of an empty history
pub const EMPTY_HISTORY: &str = "None";

/// Outcome of one critique
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ReflectionVerdict {
    /// Refine again using this feedback
    Continue { feedback: String },
    /// The critique emitted the convergence sentinel
    Converged,
}

/// One recorded step or round
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEntry {
    /// A ReAct iteration (parse failures are recorded with an error observation)
    ReActStep {
        thought: Option<String>,
        action: String,
        observation: String,
    },
    /// A Plan-and-Solve step; `index` is zero-based
    PlanStep {
        index: usize,
        description: String,
        result: String,
    },
    /// A reflection round: the draft that was critiqued and the critique
    ReflectionRound {
        draft: String,
        feedback: String,
        verdict: ReflectionVerdict,
    },
}

impl LedgerEntry {
    /// Prompt text for this entry
    pub fn render(&self) -> String {
        match self {
            Self::ReActStep {
                thought,
                action,
                observation,
            } => {
                let mut text = String::new();
                if let Some(thought) = thought {
                    text.push_str("Thought: ");
                    text.push_str(thought);
                    text.push('\n');
                }
                text.push_str(&format!("Action: {action}\nObservation: {observation}"));
                text
            }
            Self::PlanStep {
                index,
                description,
                result,
            } => format!("Step {}: {description}\nResult: {result}", index + 1),
            Self::ReflectionRound { draft, feedback, .. } => {
                format!("--- Previous attempt ---\n{draft}\n--- Reviewer feedback ---\n{feedback}")
            }
        }
    }
}

/// Append-only sequence of [`LedgerEntry`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry at the end
    pub fn append(&mut self, entry: LedgerEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in order, separated by blank lines; [`EMPTY_HISTORY`] when empty
    pub fn render(&self) -> String {
        if self.entries.is_empty() {
            return EMPTY_HISTORY.into();
        }

        self.entries
            .iter()
            .map(LedgerEntry::render)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl<'a> IntoIterator for &'a Ledger {
    type Item = &'a LedgerEntry;
    type IntoIter = std::slice::Iter<'a, LedgerEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ledger_renders_placeholder() {
        assert_eq!(Ledger::new().render(), EMPTY_HISTORY);
    }

    #[test]
    fn test_react_steps_render_in_order() {
        let mut ledger = Ledger::new();
        ledger.append(LedgerEntry::ReActStep {
            thought: Some("look it up".into()),
            action: "Search[rust]".into(),
            observation: "Rust is a language".into(),
        });
        ledger.append(LedgerEntry::ReActStep {
            thought: None,
            action: "calculator[1+1]".into(),
            observation: "2".into(),
        });

        assert_eq!(
            ledger.render(),
            "Thought: look it up\nAction: Search[rust]\nObservation: Rust is a language\n\n\
             Action: calculator[1+1]\nObservation: 2"
        );
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_plan_step_numbering_is_one_based() {
        let entry = LedgerEntry::PlanStep {
            index: 0,
            description: "Count Monday sales".into(),
            result: "15".into(),
        };
        assert_eq!(entry.render(), "Step 1: Count Monday sales\nResult: 15");
    }

    #[test]
    fn test_render_is_deterministic() {
        let mut ledger = Ledger::new();
        ledger.append(LedgerEntry::ReflectionRound {
            draft: "v1".into(),
            feedback: "add tests".into(),
            verdict: ReflectionVerdict::Continue {
                feedback: "add tests".into(),
            },
        });
        let copy = ledger.clone();
        assert_eq!(ledger.render(), copy.render());
        assert!(ledger.render().contains("--- Reviewer feedback ---\nadd tests"));
    }

    #[test]
    fn test_entries_serialize_with_kind_tag() {
        let entry = LedgerEntry::ReflectionRound {
            draft: "v1".into(),
            feedback: "FINISH".into(),
            verdict: ReflectionVerdict::Converged,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kind"], "reflection_round");
        assert_eq!(json["verdict"]["verdict"], "converged");
    }
}
