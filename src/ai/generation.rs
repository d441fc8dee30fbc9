//! Model-backed code generation stage.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use super::{LlmProvider, Prompt};
use crate::workflow::{
    CodeGenerator, DependencyEdge, DependencyGraph, EvaluationVerdict, WorkItem, WorkflowError,
    WorkflowResult,
};

static FENCED_REPLY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z0-9_+.-]*[ \t]*\r?\n(.*?)\r?\n?\s*```\s*$")
        .expect("fence pattern is valid")
});

/// Generates code for a work item through a language model.
pub struct LlmGenerator {
    provider: Arc<dyn LlmProvider>,
    target_language: String,
}

impl LlmGenerator {
    /// Create a generator targeting `target_language` (e.g. "Python 3.12+").
    pub fn new(provider: Arc<dyn LlmProvider>, target_language: impl Into<String>) -> Self {
        Self { provider, target_language: target_language.into() }
    }

    /// Build the prompt for one generation call.
    pub fn build_prompt(
        &self,
        item: &WorkItem,
        graph: &DependencyGraph,
        prior: Option<&EvaluationVerdict>,
    ) -> Prompt {
        let lang = &self.target_language;
        let system = format!(
            "You are an expert software developer writing {lang}. Generate production-ready \
             code that implements the work item below.\n\n\
             Requirements:\n\
             1. Use modern {lang} features and idioms\n\
             2. Document every public item\n\
             3. Handle errors with specific error types\n\
             4. Follow the language's standard style guide\n\
             5. Use precise types throughout\n\
             6. Include unit tests where appropriate\n\
             7. Keep the code modular and maintainable\n\
             8. Add structured logging\n\
             9. Account for the listed dependencies\n\n\
             When evaluation feedback is included, the new version must address every issue \
             and suggestion it lists. Reply with code only."
        );

        let details = serde_json::to_string_pretty(&item_context(item)).unwrap_or_default();
        let dependencies = serde_json::to_string_pretty(&json!({
            "blocked_by": graph.blocked_by.iter().map(edge_context).collect::<Vec<_>>(),
            "blocking": graph.blocking.iter().map(edge_context).collect::<Vec<_>>(),
        }))
        .unwrap_or_default();

        let mut user = format!(
            "Work Item: {}\nName: {}\nDescription: {}\nDetails: {}\nDependencies: {}\n",
            item.id,
            or_na(&item.name),
            or_na(&item.description),
            details,
            dependencies
        );

        if let Some(verdict) = prior {
            user.push_str(&feedback_block(verdict));
        }

        user.push_str(&format!(
            "\nGenerate complete, runnable {lang} code for this work item. Include all \
             imports, types, functions and documentation.\n"
        ));

        Prompt::new(system, user)
    }
}

#[async_trait]
impl CodeGenerator for LlmGenerator {
    async fn generate(
        &self,
        item: &WorkItem,
        graph: &DependencyGraph,
        prior: Option<&EvaluationVerdict>,
    ) -> WorkflowResult<String> {
        let prompt = self.build_prompt(item, graph, prior);

        let reply = self.provider.complete(&prompt).await.map_err(|e| {
            WorkflowError::Generation(format!("{} request failed: {:#}", self.provider.name(), e))
        })?;

        let code = strip_code_fences(&reply);
        if code.trim().is_empty() {
            return Err(WorkflowError::Generation(format!(
                "{} returned no code",
                self.provider.name()
            )));
        }

        tracing::debug!(item = %item.id, chars = code.len(), "Code generated");
        Ok(code)
    }

    fn name(&self) -> &str {
        self.provider.name()
    }
}

/// Remove a markdown fence that wraps the whole reply.
///
/// Replies that merely contain fenced blocks among prose are returned as is.
pub fn strip_code_fences(reply: &str) -> String {
    FENCED_REPLY
        .captures(reply)
        .and_then(|c| c.get(1))
        .map_or_else(|| reply.trim().to_string(), |m| m.as_str().to_string())
}

fn feedback_block(verdict: &EvaluationVerdict) -> String {
    let issues = serde_json::to_string(&verdict.issues).unwrap_or_default();
    let suggestions = serde_json::to_string(&verdict.suggestions).unwrap_or_default();

    format!(
        "\nPrevious Evaluation Feedback:\n\
         - Match Score: {}%\n\
         - Issues Found: {}\n\
         - Suggestions: {}\n\n\
         Please address these issues in the regenerated code.\n",
        verdict.score, issues, suggestions
    )
}

fn item_context(item: &WorkItem) -> serde_json::Value {
    if item.details.is_null() {
        json!({
            "FormattedID": item.id,
            "Name": item.name,
            "Description": item.description,
            "State": item.state,
        })
    } else {
        item.details.clone()
    }
}

fn edge_context(edge: &DependencyEdge) -> serde_json::Value {
    match &edge.item {
        Some(item) => json!({
            "FormattedID": item.id,
            "Name": item.name,
            "State": item.state,
            "Description": edge.description,
        }),
        None => json!({
            "predecessor": edge.predecessor_ref,
            "successor": edge.successor_ref,
            "Description": edge.description,
        }),
    }
}

fn or_na(s: &str) -> &str {
    if s.trim().is_empty() {
        "N/A"
    } else {
        s
    }
}
