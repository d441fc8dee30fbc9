//! Model-backed code evaluation stage.
//!
//! The evaluator asks the model for a JSON verdict and never fails outward:
//! provider errors and unusable replies are [`EvaluationFault`]s, which are
//! folded into [`EvaluationVerdict::degraded`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{LlmProvider, Prompt};
use crate::workflow::{
    CodeEvaluator, EvaluationVerdict, GenerationAttempt, Issue, Level, Suggestion, WorkItem,
};

/// Why an evaluation could not produce a real verdict.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationFault {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("no JSON object in evaluator reply")]
    NoJson,

    #[error("malformed evaluation JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid score: {0}")]
    InvalidScore(String),
}

/// Scores generated code through a language model.
pub struct LlmEvaluator {
    provider: Arc<dyn LlmProvider>,
    threshold: f64,
    target_language: String,
}

impl LlmEvaluator {
    /// Create an evaluator. `threshold` is only used when the model omits
    /// `meets_threshold`.
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        threshold: f64,
        target_language: impl Into<String>,
    ) -> Self {
        Self { provider, threshold, target_language: target_language.into() }
    }

    /// Build the prompt for one evaluation call.
    pub fn build_prompt(&self, item: &WorkItem, attempt: &GenerationAttempt) -> Prompt {
        let lang = &self.target_language;
        let threshold = self.threshold;
        let system = format!(
            "You are a senior code reviewer and requirements analyst for {lang}. Evaluate the \
             generated code against the work item requirements.\n\n\
             Evaluation criteria:\n\
             1. Requirement Coverage (30%): how well the code meets the requirements\n\
             2. Code Quality (25%): modern {lang} features, types, documentation, structure\n\
             3. Best Practices (20%): style, error handling, logging, testing\n\
             4. Functionality (15%): logical correctness and expected behavior\n\
             5. Maintainability (10%): modularity, readability, scalability\n\n\
             The score is the weighted average of all criteria, from 0 to 100.\n\n\
             Return your evaluation as a JSON object with this structure:\n\
             {{\n\
             \x20   \"score\": <number>,\n\
             \x20   \"issues\": [{{\"severity\": \"high|medium|low\", \"description\": \"<issue>\"}}],\n\
             \x20   \"suggestions\": [{{\"priority\": \"high|medium|low\", \"description\": \"<suggestion>\"}}],\n\
             \x20   \"assessment\": \"<overall assessment>\",\n\
             \x20   \"meets_threshold\": <true if score >= {threshold}>,\n\
             \x20   \"compliance\": <true if the code uses modern {lang} features>\n\
             }}"
        );

        let details = if item.details.is_null() {
            String::from("{}")
        } else {
            serde_json::to_string_pretty(&item.details).unwrap_or_default()
        };

        let user = format!(
            "Work Item: {}\nName: {}\nDescription: {}\nRequirements: {}\n\n\
             Generated Code (iteration {}):\n{}\n\n\
             Evaluate this code against the work item requirements and modern {lang} standards.\n",
            item.id, item.name, item.description, details, attempt.iteration, attempt.code
        );

        Prompt::new(system, user).json()
    }

    async fn try_evaluate(
        &self,
        item: &WorkItem,
        attempt: &GenerationAttempt,
    ) -> Result<EvaluationVerdict, EvaluationFault> {
        let prompt = self.build_prompt(item, attempt);
        let reply = self
            .provider
            .complete(&prompt)
            .await
            .map_err(|e| EvaluationFault::Provider(format!("{:#}", e)))?;

        parse_verdict(&reply, self.threshold)
    }
}

#[async_trait]
impl CodeEvaluator for LlmEvaluator {
    async fn evaluate(&self, item: &WorkItem, attempt: &GenerationAttempt) -> EvaluationVerdict {
        match self.try_evaluate(item, attempt).await {
            Ok(verdict) => verdict,
            Err(fault) => {
                tracing::warn!(item = %item.id, iteration = attempt.iteration, error = %fault, "Evaluation failed");
                EvaluationVerdict::degraded(fault)
            }
        }
    }

    fn name(&self) -> &str {
        self.provider.name()
    }
}

/// Parse a model reply into a verdict.
///
/// Accepts `match_score` for `score` and `python_3_12_compliance` for
/// `compliance`. A missing `meets_threshold` is derived from the score.
pub fn parse_verdict(reply: &str, threshold: f64) -> Result<EvaluationVerdict, EvaluationFault> {
    let json = extract_json_object(reply).ok_or(EvaluationFault::NoJson)?;
    let object: Map<String, Value> = serde_json::from_str(json)?;

    let raw_score = object
        .get("score")
        .or_else(|| object.get("match_score"))
        .ok_or_else(|| EvaluationFault::InvalidScore("missing".to_string()))?;
    let score = score_from(raw_score)?;

    let issues = list(&object, "issues")
        .map(|v| {
            let (severity, description) = graded(v, "severity");
            Issue { severity, description }
        })
        .collect();
    let suggestions = list(&object, "suggestions")
        .map(|v| {
            let (priority, description) = graded(v, "priority");
            Suggestion { priority, description }
        })
        .collect();

    let assessment = object
        .get("assessment")
        .and_then(Value::as_str)
        .unwrap_or("No assessment provided")
        .to_string();
    let meets_threshold =
        object.get("meets_threshold").and_then(Value::as_bool).unwrap_or(score >= threshold);
    let compliance = object
        .get("compliance")
        .or_else(|| object.get("python_3_12_compliance"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(EvaluationVerdict {
        score,
        issues,
        suggestions,
        assessment,
        meets_threshold,
        compliance,
        degraded: false,
    })
}

/// Return the first balanced `{...}` object in `text`.
///
/// Braces inside JSON strings are ignored, so fenced replies and replies
/// with leading prose both work.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }

    None
}

fn score_from(value: &Value) -> Result<f64, EvaluationFault> {
    let score = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|s| s.is_finite())
    .ok_or_else(|| EvaluationFault::InvalidScore(value.to_string()))?;

    if !(0.0..=100.0).contains(&score) {
        let clamped = score.clamp(0.0, 100.0);
        tracing::warn!(score, clamped, "Evaluator score out of range");
        return Ok(clamped);
    }
    Ok(score)
}

fn list<'a>(object: &'a Map<String, Value>, key: &str) -> impl Iterator<Item = &'a Value> {
    object.get(key).and_then(Value::as_array).into_iter().flatten()
}

/// Read an issue or suggestion; plain strings get medium importance.
fn graded(value: &Value, level_key: &str) -> (Level, String) {
    match value {
        Value::Object(fields) => {
            let level = fields.get(level_key).and_then(Value::as_str).map_or(Level::Medium, level_from);
            let description = match fields.get("description") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => value.to_string(),
            };
            (level, description)
        }
        Value::String(s) => (Level::Medium, s.clone()),
        other => (Level::Medium, other.to_string()),
    }
}

fn level_from(s: &str) -> Level {
    match s.trim().to_ascii_lowercase().as_str() {
        "high" | "critical" => Level::High,
        "low" => Level::Low,
        _ => Level::Medium,
    }
}
