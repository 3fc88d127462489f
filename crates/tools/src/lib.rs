//! Built-in tool implementations for Atlas.
//!
//! These tools let the model hand long-running work to the background job
//! coordinator and check on it later, instead of blocking the conversation.

pub mod jobs;

use std::sync::Arc;

use atlas_core::tool::ToolRegistry;
use atlas_jobs::JobCoordinator;

pub use jobs::{JobStatusTool, StartJobTool};

/// Create a tool registry with all built-in tools.
///
/// Generic over the tool context so callers can add their own
/// context-dependent tools to the same registry.
pub fn default_registry<C: Send + Sync + 'static>(coordinator: Arc<JobCoordinator>) -> ToolRegistry<C> {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(StartJobTool::new(Arc::clone(&coordinator))));
    registry.register(Box::new(JobStatusTool::new(coordinator)));
    registry
}
