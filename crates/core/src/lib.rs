//! # Atlas Core
//!
//! Domain types, traits, and error definitions for the Atlas conversational
//! agent. This crate has **no transport dependencies**: it defines the model
//! that the provider, agent, jobs and tools crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam is a trait here. Implementations live in their respective
//! crates. This enables:
//! - Swapping the model endpoint without touching the agent loop
//! - Testing the loop with scripted providers and in-process tools
//! - A clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{AgentError, Error, ProviderError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Conversation, ConversationId, Message, Role};
pub use provider::{ChunkStream, Provider, ProviderRequest, ProviderResponse, StreamChunk};
pub use tool::{FnTool, Tool, ToolCall, ToolRegistry, ToolResult, ToolSpec};
