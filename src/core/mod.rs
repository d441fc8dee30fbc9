//! Core types and functionality for Storyforge.
//!
//! Currently this is the configuration layer shared by the CLI and the
//! workflow collaborators.

mod config;

pub use config::{
    format_config_status, Config, ConfigStatus, LlmConfig, OutputConfig, RallyConfig,
    WorkflowConfig, LOCAL_CONFIG_FILE,
};
