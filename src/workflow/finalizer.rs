//! Final artifact rendering and persistence.
//!
//! The finalizer turns the last attempt and verdict of a run into a single
//! annotated source file. Degraded verdicts are rendered like any other; the
//! only way to fail here is a persistence fault.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{WorkflowError, WorkflowResult};
use super::model::{Issue, Suggestion, WorkflowRun};
use super::stages::ArtifactPersister;

/// A rendered, ready-to-persist result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub item_id: String,
    pub item_name: String,
    pub item_description: String,
    pub generated_at: DateTime<Utc>,
    pub iteration_count: u32,
    pub score: f64,
    pub meets_threshold: bool,
    pub compliance: bool,
    pub degraded: bool,
    pub assessment: String,
    pub code: String,
    pub issues: Vec<Issue>,
    pub suggestions: Vec<Suggestion>,
    /// Suggested file name for the artifact
    pub file_name: String,
    /// Full annotated file content
    pub content: String,
}

/// Renders a finished run into an [`Artifact`].
#[derive(Debug, Clone)]
pub struct ArtifactFinalizer {
    comment_prefix: String,
    extension: String,
}

impl Default for ArtifactFinalizer {
    fn default() -> Self {
        Self { comment_prefix: "#".to_string(), extension: "py".to_string() }
    }
}

impl ArtifactFinalizer {
    /// Create a finalizer for the given comment syntax and file extension.
    pub fn new(comment_prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self { comment_prefix: comment_prefix.into(), extension: extension.into() }
    }

    /// Build the artifact from the run's latest attempt and verdict.
    pub fn finalize(&self, run: &WorkflowRun) -> WorkflowResult<Artifact> {
        self.finalize_at(run, Utc::now())
    }

    /// Like [`finalize`](Self::finalize) with an explicit timestamp.
    pub fn finalize_at(
        &self,
        run: &WorkflowRun,
        generated_at: DateTime<Utc>,
    ) -> WorkflowResult<Artifact> {
        let item = run
            .item()
            .ok_or_else(|| WorkflowError::InvalidState("no work item to finalize".to_string()))?;
        let attempt = run
            .current_attempt
            .as_ref()
            .ok_or_else(|| WorkflowError::InvalidState("no generated code to finalize".to_string()))?;
        let verdict = run
            .current_verdict
            .as_ref()
            .ok_or_else(|| WorkflowError::InvalidState("no evaluation to finalize".to_string()))?;

        let file_name = format!(
            "generated_code_{}_{}.{}",
            sanitize_file_component(&run.item_id),
            generated_at.format("%Y%m%d_%H%M%S"),
            self.extension
        );

        let mut artifact = Artifact {
            item_id: item.id.clone(),
            item_name: item.name.clone(),
            item_description: item.description.clone(),
            generated_at,
            iteration_count: run.iteration_count,
            score: verdict.score,
            meets_threshold: verdict.meets_threshold,
            compliance: verdict.compliance,
            degraded: verdict.degraded,
            assessment: verdict.assessment.clone(),
            code: attempt.code.clone(),
            issues: verdict.issues.clone(),
            suggestions: verdict.suggestions.clone(),
            file_name,
            content: String::new(),
        };
        artifact.content = self.render(&artifact)?;

        Ok(artifact)
    }

    fn render(&self, artifact: &Artifact) -> WorkflowResult<String> {
        let issues = serde_json::to_string_pretty(&artifact.issues)
            .map_err(|e| WorkflowError::Persistence(format!("serialize issues: {}", e)))?;
        let suggestions = serde_json::to_string_pretty(&artifact.suggestions)
            .map_err(|e| WorkflowError::Persistence(format!("serialize suggestions: {}", e)))?;

        let header = format!(
            "Generated Code for Work Item: {}\n\
             Item Name: {}\n\
             Generated on: {}\n\
             Evaluation Score: {}%\n\
             Compliant: {}\n\
             \n\
             Work Item Description:\n\
             {}\n\
             \n\
             Evaluation Summary:\n\
             Match Score: {}%\n\
             Meets Threshold: {}\n\
             Compliant: {}\n\
             Iterations: {}\n\
             Degraded Evaluation: {}\n\
             Assessment: {}",
            artifact.item_id,
            artifact.item_name,
            artifact.generated_at.format("%Y-%m-%d %H:%M:%S"),
            artifact.score,
            artifact.compliance,
            artifact.item_description,
            artifact.score,
            artifact.meets_threshold,
            artifact.compliance,
            artifact.iteration_count,
            artifact.degraded,
            artifact.assessment,
        );
        let footer = format!(
            "Detailed Evaluation Results:\nIssues Found: {}\nSuggestions: {}",
            issues, suggestions
        );

        Ok(format!(
            "{}\n\n{}\n\n{}\n",
            comment_block(&self.comment_prefix, &header),
            artifact.code.trim_end(),
            comment_block(&self.comment_prefix, &footer)
        ))
    }
}

/// Prefix every line of `text` with a comment marker.
fn comment_block(prefix: &str, text: &str) -> String {
    text.lines()
        .map(|line| if line.is_empty() { prefix.to_string() } else { format!("{} {}", prefix, line) })
        .collect::<Vec<_>>()
        .join("\n")
}

fn sanitize_file_component(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Writes artifacts into a directory on the local file system.
#[derive(Debug, Clone)]
pub struct FilePersister {
    directory: PathBuf,
}

impl FilePersister {
    /// Create a persister rooted at `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into() }
    }

    /// Directory artifacts are written into.
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

#[async_trait]
impl ArtifactPersister for FilePersister {
    async fn save(&self, artifact: &Artifact) -> WorkflowResult<String> {
        tokio::fs::create_dir_all(&self.directory).await?;

        let path = self.directory.join(&artifact.file_name);
        tokio::fs::write(&path, artifact.content.as_bytes()).await?;

        tracing::info!(path = %path.display(), bytes = artifact.content.len(), "Artifact written");
        Ok(path.display().to_string())
    }
}
