//! Error taxonomy for workflow stages.

/// Result type for workflow stages.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Faults that end a run in `FAILED`.
///
/// Evaluation faults are deliberately absent: they are folded into a
/// degraded verdict before they reach the controller.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Work item not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Code generation failed: {0}")]
    Generation(String),

    #[error("Failed to persist artifact: {0}")]
    Persistence(String),

    #[error("{stage} stage timed out after {seconds}s")]
    Timeout { stage: &'static str, seconds: u64 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid workflow state: {0}")]
    InvalidState(String),
}

impl WorkflowError {
    /// Whether the fault happened while talking to a remote service.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }
}

impl From<std::io::Error> for WorkflowError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}
