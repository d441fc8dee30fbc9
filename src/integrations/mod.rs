//! External integrations module.
//!
//! Provides the project-tracker clients the workflow fetches work items from.

pub mod rally;

pub use rally::{format_dependency_graph, object_id_from_ref, RallyClient, RallyError, RallyResult};
