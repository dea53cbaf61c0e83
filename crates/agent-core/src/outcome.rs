//! Run Outcomes
//!
//! Every loop returns a status plus whatever answer text is available.
//! Limit exhaustion is a status, not an error.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ledger::Ledger;
use crate::plan::Plan;

/// Why a run stopped without finishing normally
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum AbortReason {
    /// ReAct used all of `max_steps`
    StepLimitExceeded,
    /// ReAct got too many consecutive unparseable responses
    ParseExhausted,
    /// Reflection used all of `max_rounds` without convergence
    RoundLimitExceeded,
    /// The caller cancelled the run
    Cancelled,
    /// The reasoning service kept failing or refused the request
    ServiceUnavailable(String),
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StepLimitExceeded => write!(f, "step limit exceeded"),
            Self::ParseExhausted => write!(f, "too many unparseable responses"),
            Self::RoundLimitExceeded => write!(f, "round limit exceeded"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::ServiceUnavailable(msg) => write!(f, "reasoning service unavailable ({msg})"),
        }
    }
}

/// Terminal status of a run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "abort", rename_all = "snake_case")]
pub enum RunStatus {
    Finished,
    Aborted(AbortReason),
}

impl RunStatus {
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Finished)
    }

    pub const fn abort_reason(&self) -> Option<&AbortReason> {
        match self {
            Self::Finished => None,
            Self::Aborted(reason) => Some(reason),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Finished => write!(f, "finished"),
            Self::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

/// Everything a run produced
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Id attached to this run's tracing span
    pub run_id: Uuid,

    pub status: RunStatus,

    /// Final or best-effort answer
    pub answer: Option<String>,

    /// Every step or round, in order
    pub ledger: Ledger,

    /// Plan, for Plan-and-Solve runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,

    /// Reasoning calls made by the loop itself; a retried call counts once
    /// and calls made inside an inner draft producer are not included
    pub reasoning_calls: usize,
}

impl RunOutcome {
    pub(crate) const fn new(run_id: Uuid, status: RunStatus, answer: Option<String>, ledger: Ledger) -> Self {
        Self {
            run_id,
            status,
            answer,
            ledger,
            plan: None,
            reasoning_calls: 0,
        }
    }

    #[must_use]
    pub(crate) fn with_plan(mut self, plan: Plan) -> Self {
        self.plan = Some(plan);
        self
    }

    #[must_use]
    pub(crate) const fn with_calls(mut self, calls: usize) -> Self {
        self.reasoning_calls = calls;
        self
    }

    pub const fn is_finished(&self) -> bool {
        self.status.is_finished()
    }
}
