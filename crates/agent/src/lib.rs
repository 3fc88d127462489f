//! The conversation loop for Atlas.
//!
//! Each user message is answered by a bounded **stream → extract → call**
//! cycle:
//!
//! 1. **Stream** a model turn, showing text live unless it turns into a
//!    fenced `atlas_tool` block
//! 2. **Extract** tool calls from the complete turn
//! 3. **Call** each tool through the registry and append the results
//! 4. Repeat until the model answers without a tool call, or abort once the
//!    round budget is spent

pub mod display;
pub mod extract;
pub mod loop_runner;
pub mod prompt;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use display::{DisplayGate, Phase};
pub use extract::{TOOL_BLOCK_MARKER, TOOL_BLOCK_TAG, extract_calls, strip_calls, visible_remainder};
pub use loop_runner::{AgentLoop, DEFAULT_MAX_ROUNDS};
pub use prompt::build_system_prompt;
pub use stream_event::AgentStreamEvent;
