//! Workflow state
//!
//! The single mutable record threaded through one invocation of the state
//! machine, plus the wire shapes reported back to the caller.

use crate::schema::QueryTarget;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A generated query: opaque text tagged with its target dialect.
/// Immutable once produced by a generation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub target: QueryTarget,
}

impl Query {
    pub fn new(text: impl Into<String>, target: QueryTarget) -> Self {
        Self {
            text: text.into(),
            target,
        }
    }
}

/// The grader's accept/reject decision. Produced fresh by every grading
/// call; replaced, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub ok: bool,
    pub reason: Option<String>,
}

impl Verdict {
    pub fn accept() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }

    /// Rejection reason, or the empty string when the grader omitted one.
    /// Absence of a reason never counts as validity.
    pub fn reason_or_empty(&self) -> &str {
        self.reason.as_deref().unwrap_or("")
    }
}

/// One result row: column/property name to value.
pub type Row = BTreeMap<String, serde_json::Value>;

/// Ordered rows returned by an executor.
pub type ResultSet = Vec<Row>;

/// Stage labels for the per-target state machine, reported in failure
/// descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStage {
    Generating,
    Validating,
    Regenerating,
    Executing,
}

/// Why a pipeline ended in `FAILED`, and at which stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDescriptor {
    pub stage: PipelineStage,
    pub reason: String,
}

/// Terminal outcome of one target pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetOutcome {
    Done {
        query: Query,
        rows: ResultSet,
        attempts: u8,
    },
    Failed {
        failure: FailureDescriptor,
        attempts: u8,
        /// Last candidate when one was produced before the failure.
        last_query: Option<Query>,
    },
}

impl TargetOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, TargetOutcome::Done { .. })
    }

    pub fn attempts(&self) -> u8 {
        match self {
            TargetOutcome::Done { attempts, .. } => *attempts,
            TargetOutcome::Failed { attempts, .. } => *attempts,
        }
    }
}

/// Mutable per-target slice of the workflow state. The two targets never
/// read or write each other's slice.
#[derive(Debug, Clone)]
pub struct TargetState {
    pub target: QueryTarget,
    pub question: String,
    pub candidate: Option<Query>,
    pub verdict: Option<Verdict>,
    pub attempts: u8,
}

impl TargetState {
    pub fn new(target: QueryTarget, question: impl Into<String>) -> Self {
        Self {
            target,
            question: question.into(),
            candidate: None,
            verdict: None,
            attempts: 0,
        }
    }

    /// Install a new candidate. The previous verdict is cleared so a stale
    /// verdict can never authorize execution of a superseded candidate.
    pub fn set_candidate(&mut self, query: Query) {
        self.candidate = Some(query);
        self.verdict = None;
    }

    pub fn set_verdict(&mut self, verdict: Verdict) {
        self.verdict = Some(verdict);
    }
}

/// State for one whole invocation: both target slices plus bookkeeping.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub invocation_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub relational: TargetState,
    pub graph: TargetState,
}

impl WorkflowState {
    pub fn new(question_relational: impl Into<String>, question_graph: impl Into<String>) -> Self {
        Self {
            invocation_id: Uuid::new_v4(),
            started_at: Utc::now(),
            relational: TargetState::new(QueryTarget::Relational, question_relational),
            graph: TargetState::new(QueryTarget::Graph, question_graph),
        }
    }
}

/// Input boundary: one question per target. An empty string is accepted and
/// simply yields a query with no natural-language grounding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub question_relational: String,
    pub question_graph: String,
}

impl WorkflowRequest {
    /// Same question for both targets, the common case.
    pub fn same(question: impl Into<String>) -> Self {
        let question = question.into();
        Self {
            question_relational: question.clone(),
            question_graph: question,
        }
    }
}

/// Output boundary: one independent outcome per target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResponse {
    pub invocation_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub result_relational: TargetOutcome,
    pub result_graph: TargetOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_candidate_clears_previous_verdict() {
        let mut state = TargetState::new(QueryTarget::Relational, "q");
        state.set_candidate(Query::new("SELECT 1", QueryTarget::Relational));
        state.set_verdict(Verdict::accept());
        assert!(state.verdict.is_some());

        state.set_candidate(Query::new("SELECT 2", QueryTarget::Relational));
        assert!(state.verdict.is_none());
    }

    #[test]
    fn missing_reason_reads_as_empty_not_valid() {
        let verdict = Verdict {
            ok: false,
            reason: None,
        };
        assert!(!verdict.ok);
        assert_eq!(verdict.reason_or_empty(), "");
    }

    #[test]
    fn stage_serializes_screaming_snake() {
        let descriptor = FailureDescriptor {
            stage: PipelineStage::Regenerating,
            reason: "unknown column x".to_string(),
        };
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["stage"], "REGENERATING");
    }
}
