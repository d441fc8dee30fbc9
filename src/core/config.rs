//! Configuration management for Storyforge.
//!
//! Handles loading configuration from TOML files and applying environment
//! overrides. Secrets are only ever read from the environment or the file;
//! they are never written back out.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Name of the per-project config file.
pub const LOCAL_CONFIG_FILE: &str = ".storyforge.toml";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rally connection settings
    pub rally: RallyConfig,

    /// Language model settings
    pub llm: LlmConfig,

    /// Workflow loop settings
    pub workflow: WorkflowConfig,

    /// Artifact output settings
    pub output: OutputConfig,
}

/// Rally connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RallyConfig {
    /// Rally server URL
    pub server: String,

    /// Rally API key (`RALLY_API_KEY`)
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Workspace reference, e.g. "/workspace/12345"
    pub workspace_ref: Option<String>,

    /// Page size for query endpoints
    pub page_size: u32,
}

/// Language model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider (openai, ollama)
    pub provider: String,

    /// Model to use
    pub model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Maximum tokens per completion
    pub max_tokens: u32,

    /// Override the provider's API base URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Provider API key (`OPENAI_API_KEY`)
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

/// Workflow loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Maximum number of generation attempts per run
    pub max_iterations: u32,

    /// Minimum score (0-100) an attempt needs to be accepted
    pub threshold: f64,

    /// Per-stage timeout in seconds (0 disables)
    pub stage_timeout_secs: u64,

    /// Language and version the generated code targets
    pub target_language: String,

    /// Number of work items processed at once in batch runs
    pub concurrency: usize,
}

/// Artifact output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory artifacts are written to (defaults to the system temp dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,

    /// File extension of generated artifacts
    pub extension: String,

    /// Line comment marker used for the artifact header
    pub comment_prefix: String,
}

/// Result of checking that all required settings are present and in range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigStatus {
    /// Names of the missing settings, as environment variable names
    pub missing: Vec<&'static str>,

    /// Settings that are present but out of range, with the reason
    pub invalid: Vec<(&'static str, String)>,
}

impl ConfigStatus {
    /// Whether nothing required is missing and every value is usable.
    pub fn is_valid(&self) -> bool {
        self.missing.is_empty() && self.invalid.is_empty()
    }
}

impl Config {
    /// Load configuration from the default locations.
    ///
    /// Looks for config in:
    /// 1. `explicit`, when given
    /// 2. `.storyforge.toml` in current directory
    /// 3. `~/.config/storyforge/config.toml`
    /// 4. Falls back to defaults
    ///
    /// Environment overrides are applied on top.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match Self::locate(explicit) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading config");
                Self::load_from_file(&path)?
            }
            None => Self::default(),
        };

        config.apply_env()?;
        Ok(config)
    }

    fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }

        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Some(local_config);
        }

        Self::config_dir().map(|d| d.join("config.toml")).filter(|p| p.exists())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("parse config {}", path.display()))?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("RALLY_SERVER") {
            self.rally.server = v;
        }
        if let Some(v) = get("RALLY_API_KEY") {
            self.rally.api_key = Some(v);
        }
        if let Some(v) = get("RALLY_WORKSPACE_REF") {
            self.rally.workspace_ref = Some(v);
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("OPENAI_TEMPERATURE") {
            self.llm.temperature =
                v.trim().parse().with_context(|| format!("OPENAI_TEMPERATURE={}", v))?;
        }
        if let Some(v) = get("MAX_ITERATIONS") {
            self.workflow.max_iterations =
                v.trim().parse().with_context(|| format!("MAX_ITERATIONS={}", v))?;
        }
        if let Some(v) = get("EVALUATION_THRESHOLD") {
            self.workflow.threshold =
                v.trim().parse().with_context(|| format!("EVALUATION_THRESHOLD={}", v))?;
        }
        if let Some(v) = get("OUTPUT_DIRECTORY") {
            self.output.directory = Some(v);
        }

        Ok(())
    }

    /// Check that every setting a run needs is present.
    pub fn status(&self) -> ConfigStatus {
        let mut missing = Vec::new();

        if self.rally.api_key.is_none() {
            missing.push("RALLY_API_KEY");
        }
        if self.rally.workspace_ref.is_none() {
            missing.push("RALLY_WORKSPACE_REF");
        }
        if self.llm.provider == "openai" && self.llm.api_key.is_none() {
            missing.push("OPENAI_API_KEY");
        }

        let mut invalid = Vec::new();

        // NaN and infinities fall outside the range as well
        if !(0.0..=100.0).contains(&self.workflow.threshold) {
            invalid.push((
                "EVALUATION_THRESHOLD",
                format!("{} is not between 0 and 100", self.workflow.threshold),
            ));
        }

        ConfigStatus { missing, invalid }
    }

    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("storyforge"))
    }
}

impl WorkflowConfig {
    /// Per-stage timeout, `None` when disabled.
    pub fn stage_timeout(&self) -> Option<Duration> {
        (self.stage_timeout_secs > 0).then(|| Duration::from_secs(self.stage_timeout_secs))
    }
}

impl OutputConfig {
    /// Output directory with `~` expanded.
    pub fn resolved_directory(&self) -> PathBuf {
        match &self.directory {
            Some(dir) => PathBuf::from(shellexpand::tilde(dir).as_ref()),
            None => std::env::temp_dir(),
        }
    }
}

impl Default for RallyConfig {
    fn default() -> Self {
        Self {
            server: "https://rally1.rallydev.com".to_string(),
            api_key: None,
            workspace_ref: None,
            page_size: 200,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4-turbo-preview".to_string(),
            temperature: 0.1,
            max_tokens: 4096,
            base_url: None,
            api_key: None,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            threshold: 70.0,
            stage_timeout_secs: 300,
            target_language: "Python 3.12+".to_string(),
            concurrency: 1,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { directory: None, extension: "py".to_string(), comment_prefix: "#".to_string() }
    }
}

/// Format the configuration status for display.
pub fn format_config_status(config: &Config) -> String {
    let set = |present: bool| if present { "set" } else { "MISSING" };
    let status = config.status();

    let mut out = format!(
        "Configuration Status:\n\
         Rally Server: {}\n\
         Rally API Key: {}\n\
         Rally Workspace: {}\n\
         LLM Provider: {}\n\
         LLM Model: {}\n\
         OpenAI API Key: {}\n\
         Max Iterations: {}\n\
         Evaluation Threshold: {}%\n\
         Output Directory: {}\n",
        config.rally.server,
        set(config.rally.api_key.is_some()),
        set(config.rally.workspace_ref.is_some()),
        config.llm.provider,
        config.llm.model,
        set(config.llm.api_key.is_some()),
        config.workflow.max_iterations,
        config.workflow.threshold,
        config.output.resolved_directory().display(),
    );

    if status.is_valid() {
        out.push_str("\nAll required settings are present.\n");
    }
    if !status.missing.is_empty() {
        out.push_str(&format!("\nMissing configuration: {}\n", status.missing.join(", ")));
        out.push_str("\nPlease set the following environment variables:\n");
        for key in &status.missing {
            out.push_str(&format!("  export {}=your_value_here\n", key));
        }
    }
    if !status.invalid.is_empty() {
        out.push_str("\nInvalid configuration:\n");
        for (key, reason) in &status.invalid {
            out.push_str(&format!("  {}: {}\n", key, reason));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.rally.server, "https://rally1.rallydev.com");
        assert_eq!(config.llm.model, "gpt-4-turbo-preview");
        assert_eq!(config.workflow.max_iterations, 3);
        assert!((config.workflow.threshold - 70.0).abs() < f64::EPSILON);
        assert_eq!(config.output.extension, "py");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_with(lookup(&[
                ("RALLY_API_KEY", "rk"),
                ("RALLY_WORKSPACE_REF", "/workspace/9"),
                ("OPENAI_API_KEY", "ok"),
                ("MAX_ITERATIONS", "5"),
                ("EVALUATION_THRESHOLD", "82.5"),
                ("OUTPUT_DIRECTORY", "/tmp/out"),
            ]))
            .unwrap();

        assert_eq!(config.rally.api_key.as_deref(), Some("rk"));
        assert_eq!(config.workflow.max_iterations, 5);
        assert!((config.workflow.threshold - 82.5).abs() < f64::EPSILON);
        assert_eq!(config.output.resolved_directory(), PathBuf::from("/tmp/out"));
        assert!(config.status().is_valid());
    }

    #[test]
    fn test_invalid_env_number_is_error() {
        let mut config = Config::default();
        let result = config.apply_env_with(lookup(&[("MAX_ITERATIONS", "many")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_blank_env_ignored() {
        let mut config = Config::default();
        config.apply_env_with(lookup(&[("RALLY_API_KEY", "  ")])).unwrap();
        assert!(config.rally.api_key.is_none());
    }

    #[test]
    fn test_status_reports_missing() {
        let status = Config::default().status();
        assert_eq!(status.missing, vec!["RALLY_API_KEY", "RALLY_WORKSPACE_REF", "OPENAI_API_KEY"]);

        let mut config = Config::default();
        config.llm.provider = "ollama".to_string();
        assert!(!config.status().missing.contains(&"OPENAI_API_KEY"));
    }

    #[test]
    fn test_status_rejects_threshold_out_of_range() {
        let mut config = Config::default();
        config.rally.api_key = Some("rk".to_string());
        config.rally.workspace_ref = Some("/workspace/1".to_string());
        config.llm.api_key = Some("sk".to_string());

        for ok in [0.0, 70.0, 100.0] {
            config.workflow.threshold = ok;
            assert!(config.status().is_valid(), "{ok} should be accepted");
        }

        for bad in [f64::NAN, f64::INFINITY, -1.0, 100.5, 150.0] {
            config.workflow.threshold = bad;
            let status = config.status();
            assert!(!status.is_valid(), "{bad} should be rejected");
            assert!(status.missing.is_empty());
            assert_eq!(status.invalid[0].0, "EVALUATION_THRESHOLD");
        }

        let report = format_config_status(&config);
        assert!(report.contains("Invalid configuration:"));
        assert!(report.contains("EVALUATION_THRESHOLD: 150 is not between 0 and 100"));
        assert!(!report.contains("All required settings are present."));
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [workflow]
            max_iterations = 4

            [output]
            extension = "rs"
            comment_prefix = "//"
            "#,
        )
        .unwrap();

        assert_eq!(config.workflow.max_iterations, 4);
        assert!((config.workflow.threshold - 70.0).abs() < f64::EPSILON);
        assert_eq!(config.output.comment_prefix, "//");
        assert_eq!(config.llm.provider, "openai");
    }

    #[test]
    fn test_secrets_not_serialized() {
        let mut config = Config::default();
        config.rally.api_key = Some("super-secret".to_string());
        config.llm.api_key = Some("also-secret".to_string());

        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(!toml.contains("secret"));
    }

    #[test]
    fn test_stage_timeout() {
        let mut workflow = WorkflowConfig::default();
        assert_eq!(workflow.stage_timeout(), Some(Duration::from_secs(300)));
        workflow.stage_timeout_secs = 0;
        assert_eq!(workflow.stage_timeout(), None);
    }

    #[test]
    fn test_format_config_status() {
        let output = format_config_status(&Config::default());
        assert!(output.contains("Rally API Key: MISSING"));
        assert!(output.contains("export RALLY_API_KEY=your_value_here"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[rally]\nworkspace_ref = \"/workspace/7\"\n").unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.rally.workspace_ref.as_deref(), Some("/workspace/7"));
    }
}
