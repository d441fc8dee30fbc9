#![allow(clippy::format_push_string)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

//! # Storyforge
//!
//! Generate code from tracker work items, scored and refined in a loop.
//!
//! Storyforge fetches a user story and its dependency graph from Rally, asks a
//! language model to implement it, has a second prompt grade the result, and
//! feeds the grade back into the next attempt until the score clears a
//! threshold or the iteration budget runs out. The accepted attempt is
//! written to disk with its evaluation embedded as a comment header.
//!
//! ## Quick Start
//!
//! ```bash
//! export RALLY_API_KEY=... RALLY_WORKSPACE_REF=/workspace/123 OPENAI_API_KEY=...
//!
//! # Check configuration
//! storyforge config --check
//!
//! # Generate code for a story
//! storyforge run US12345
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::map_unwrap_or)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::use_self)]

pub mod ai;
pub mod core;
pub mod integrations;
pub mod workflow;

// Re-export commonly used types
pub use ai::{LlmEvaluator, LlmGenerator, LlmProvider};
pub use core::Config;
pub use integrations::RallyClient;
pub use workflow::{RunReport, Status, WorkflowController, WorkflowRun};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "storyforge";
