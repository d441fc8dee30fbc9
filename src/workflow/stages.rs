//! Seams between the controller and its collaborators.

use async_trait::async_trait;

use super::error::WorkflowResult;
use super::finalizer::Artifact;
use super::model::{DependencyGraph, EvaluationVerdict, GenerationAttempt, WorkItem};

/// Resolves a work item id into the item and its dependency graph.
#[async_trait]
pub trait DependencyClient: Send + Sync {
    /// Fetch the item and resolve every predecessor and successor.
    ///
    /// Fails with `NotFound` when the id matches nothing and `Transport`
    /// on network or authentication faults.
    async fn fetch(&self, item_id: &str) -> WorkflowResult<DependencyGraph>;
}

/// Produces source code for a work item.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Generate code, addressing `prior` when it is present.
    async fn generate(
        &self,
        item: &WorkItem,
        graph: &DependencyGraph,
        prior: Option<&EvaluationVerdict>,
    ) -> WorkflowResult<String>;

    /// Get the generator name.
    fn name(&self) -> &str;
}

/// Scores generated code against its work item.
#[async_trait]
pub trait CodeEvaluator: Send + Sync {
    /// Evaluate an attempt. Never fails: faults become a degraded verdict.
    async fn evaluate(&self, item: &WorkItem, attempt: &GenerationAttempt) -> EvaluationVerdict;

    /// Get the evaluator name.
    fn name(&self) -> &str;
}

/// Stores a finished artifact.
#[async_trait]
pub trait ArtifactPersister: Send + Sync {
    /// Save the artifact and return where it was written.
    async fn save(&self, artifact: &Artifact) -> WorkflowResult<String>;
}
