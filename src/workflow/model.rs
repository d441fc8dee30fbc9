//! Data model threaded through the workflow.
//!
//! Everything here is plain data: the controller owns one [`WorkflowRun`]
//! per invocation and moves it through each stage by value.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::finalizer::Artifact;

/// A unit of requirements fetched from the tracker (e.g. a user story).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Formatted identifier (e.g., "US12345")
    pub id: String,
    /// Display name
    pub name: String,
    /// Free-text description (may contain tracker markup)
    pub description: String,
    /// Lifecycle state as reported by the tracker
    pub state: String,
    /// Unique reference handle (the tracker's `_ref` URL)
    pub reference: String,
    /// Remaining raw fields, kept as model context
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

/// A directed dependency between two work items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Reference of the blocking item
    pub predecessor_ref: String,
    /// Reference of the blocked item
    pub successor_ref: String,
    /// Free-text description of the relation
    pub description: String,
    /// Resolved item at the far end; `None` when resolution failed
    pub item: Option<WorkItem>,
}

impl DependencyEdge {
    /// Whether the far end could only be kept as a bare reference.
    pub fn is_reference_only(&self) -> bool {
        self.item.is_none()
    }
}

/// A work item plus its resolved predecessors and successors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraph {
    /// The item being worked on
    pub item: WorkItem,
    /// Inbound edges: items this one waits on
    pub blocked_by: Vec<DependencyEdge>,
    /// Outbound edges: items waiting on this one
    pub blocking: Vec<DependencyEdge>,
}

impl DependencyGraph {
    /// Create a graph with no edges.
    pub fn new(item: WorkItem) -> Self {
        Self { item, blocked_by: Vec::new(), blocking: Vec::new() }
    }

    /// Number of edges whose far end was not resolved.
    pub fn unresolved_count(&self) -> usize {
        self.blocked_by.iter().chain(&self.blocking).filter(|e| e.is_reference_only()).count()
    }
}

/// One generated code artifact for one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationAttempt {
    /// Iteration number, starting at 1
    pub iteration: u32,
    /// Generated source text
    pub code: String,
    /// When the generator returned
    pub produced_at: DateTime<Utc>,
}

/// Importance level shared by issues and suggestions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    High,
    Medium,
    Low,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// A problem found by the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Level,
    pub description: String,
}

/// An improvement proposed by the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub priority: Level,
    pub description: String,
}

/// Structured result of scoring an attempt against its work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationVerdict {
    /// Score in `[0, 100]`
    pub score: f64,
    pub issues: Vec<Issue>,
    pub suggestions: Vec<Suggestion>,
    pub assessment: String,
    /// Asserted by the evaluator; authoritative for the decision rule
    pub meets_threshold: bool,
    pub compliance: bool,
    /// Set when the verdict was synthesized from an evaluation fault
    #[serde(default)]
    pub degraded: bool,
}

impl EvaluationVerdict {
    /// Synthesize the verdict used when evaluation itself failed.
    pub fn degraded(cause: impl fmt::Display) -> Self {
        Self {
            score: 0.0,
            issues: vec![Issue {
                severity: Level::High,
                description: format!("Evaluation error: {}", cause),
            }],
            suggestions: Vec::new(),
            assessment: "Failed to evaluate".to_string(),
            meets_threshold: false,
            compliance: false,
            degraded: true,
        }
    }
}

/// Lifecycle of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Initializing,
    Fetching,
    Generating,
    Evaluating,
    Finalizing,
    Completed,
    Failed,
}

impl Status {
    /// Whether the run has stopped.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `next` is an edge of the state machine.
    pub fn can_transition_to(self, next: Self) -> bool {
        use Status::{Completed, Evaluating, Failed, Fetching, Finalizing, Generating, Initializing};

        matches!(
            (self, next),
            (Initializing, Fetching | Failed)
                | (Fetching, Generating | Failed)
                | (Generating, Evaluating | Failed)
                | (Evaluating, Generating | Finalizing)
                | (Finalizing, Completed | Failed)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "INITIALIZING",
            Self::Fetching => "FETCHING",
            Self::Generating => "GENERATING",
            Self::Evaluating => "EVALUATING",
            Self::Finalizing => "FINALIZING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Where and what was persisted at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalArtifact {
    pub location: String,
    pub artifact: Artifact,
}

/// The aggregate owned by the controller for the duration of one run.
///
/// Transitions consume the run and hand back the updated value, so a stage
/// can never observe a half-applied step.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowRun {
    pub run_id: String,
    pub item_id: String,
    pub dependency_graph: Option<DependencyGraph>,
    pub current_attempt: Option<GenerationAttempt>,
    pub current_verdict: Option<EvaluationVerdict>,
    /// Number of generation calls made so far
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub status: Status,
    pub final_artifact: Option<FinalArtifact>,
    /// Human-readable cause when the run failed
    pub failure: Option<String>,
    /// Every status the run has been in, in order
    pub history: Vec<Status>,
}

impl WorkflowRun {
    /// Create a run in `INITIALIZING`.
    pub fn new(item_id: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            item_id: item_id.into(),
            dependency_graph: None,
            current_attempt: None,
            current_verdict: None,
            iteration_count: 0,
            max_iterations,
            status: Status::Initializing,
            final_artifact: None,
            failure: None,
            history: vec![Status::Initializing],
        }
    }

    /// Move to `next`, refusing edges the state machine does not have.
    pub fn transition(mut self, next: Status) -> Self {
        if !self.status.can_transition_to(next) {
            tracing::error!(from = %self.status, to = %next, "Illegal workflow transition");
            let cause = format!("illegal transition {} -> {}", self.status, next);
            return self.force_failed(cause);
        }

        tracing::debug!(from = %self.status, to = %next, "Workflow transition");
        self.status = next;
        self.history.push(next);
        self
    }

    /// Terminate the run with a cause.
    pub fn fail(self, cause: impl fmt::Display) -> Self {
        let cause = cause.to_string();
        if self.status.can_transition_to(Status::Failed) {
            let mut run = self.transition(Status::Failed);
            run.failure = Some(cause);
            run
        } else {
            self.force_failed(cause)
        }
    }

    fn force_failed(mut self, cause: String) -> Self {
        if self.status != Status::Failed {
            self.status = Status::Failed;
            self.history.push(Status::Failed);
        }
        self.failure.get_or_insert(cause);
        self
    }

    /// Record the fetched dependency graph.
    pub fn with_graph(mut self, graph: DependencyGraph) -> Self {
        self.dependency_graph = Some(graph);
        self
    }

    /// Count a generation call; returns the iteration it belongs to.
    pub fn begin_generation(mut self) -> (Self, u32) {
        self.iteration_count += 1;
        let iteration = self.iteration_count;
        (self, iteration)
    }

    /// Replace the latest attempt.
    pub fn with_attempt(mut self, attempt: GenerationAttempt) -> Self {
        self.current_attempt = Some(attempt);
        self
    }

    /// Replace the latest verdict.
    pub fn with_verdict(mut self, verdict: EvaluationVerdict) -> Self {
        self.current_verdict = Some(verdict);
        self
    }

    /// Record the persisted artifact and complete the run.
    pub fn complete(mut self, location: String, artifact: Artifact) -> Self {
        self.final_artifact = Some(FinalArtifact { location, artifact });
        self.transition(Status::Completed)
    }

    /// The work item, once fetched.
    pub fn item(&self) -> Option<&WorkItem> {
        self.dependency_graph.as_ref().map(|g| &g.item)
    }
}
