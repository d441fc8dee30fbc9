//! Code generation workflow.
//!
//! A fixed four-stage pipeline with one conditional back-edge:
//!
//! ```text
//! INITIALIZING -> FETCHING -> GENERATING -> EVALUATING -> FINALIZING -> COMPLETED
//!                                  ^             |
//!                                  +-- retry ----+
//! ```
//!
//! Stage faults before the decision rule end the run in `FAILED`; evaluation
//! faults are folded into a degraded verdict and never abort a run.

mod controller;
mod decision;
mod error;
mod finalizer;
mod model;
mod stages;

pub use controller::{RunReport, WorkflowController};
pub use decision::{decide, Decision};
pub use error::{WorkflowError, WorkflowResult};
pub use finalizer::{Artifact, ArtifactFinalizer, FilePersister};
pub use model::{
    DependencyEdge, DependencyGraph, EvaluationVerdict, FinalArtifact, GenerationAttempt, Issue,
    Level, Status, Suggestion, WorkItem, WorkflowRun,
};
pub use stages::{ArtifactPersister, CodeEvaluator, CodeGenerator, DependencyClient};
