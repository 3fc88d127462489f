//! Fenced tool-call blocks embedded in assistant text.
//!
//! The model requests a tool by writing
//!
//! ````text
//! ```atlas_tool
//! {"tool": "quote", "args": {"symbol": "AAPL"}}
//! ```
//! ````
//!
//! anywhere in its reply, possibly surrounded by narration.

use atlas_core::tool::ToolCall;
use regex_lite::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::debug;

/// Tag that opens a tool-call fence.
pub const TOOL_BLOCK_TAG: &str = "atlas_tool";

/// The literal start of a tool-call block.
pub const TOOL_BLOCK_MARKER: &str = "```atlas_tool";

static TOOL_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```atlas_tool\s*(\{.*?\})\s*```").expect("tool block pattern compiles")
});

/// Every well-formed tool call in `text`, in order of appearance.
///
/// Blocks whose body is not a JSON object with a `tool` key are skipped.
/// A non-object `args` value becomes an empty argument map.
pub fn extract_calls(text: &str) -> Vec<ToolCall> {
    TOOL_BLOCK
        .captures_iter(text)
        .filter_map(|caps| parse_block(caps.get(1)?.as_str()))
        .collect()
}

fn parse_block(body: &str) -> Option<ToolCall> {
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "Ignoring malformed tool block");
            return None;
        }
    };

    let Value::Object(mut object) = value else {
        debug!("Ignoring tool block that is not a JSON object");
        return None;
    };

    let name = match object.remove("tool")? {
        Value::String(name) => name,
        other => other.to_string(),
    };
    let arguments = match object.remove("args") {
        Some(Value::Object(args)) => args,
        _ => Map::new(),
    };

    Some(ToolCall { name, arguments })
}

/// `text` with every recognized block removed, trimmed.
pub fn strip_calls(text: &str) -> String {
    TOOL_BLOCK.replace_all(text, "").trim().to_string()
}

/// The part of `text` fit for display: recognized blocks removed and
/// anything from an unterminated marker onward cut off.
pub fn visible_remainder(text: &str) -> String {
    let stripped = strip_calls(text);
    match stripped.find(TOOL_BLOCK_MARKER) {
        Some(idx) => stripped[..idx].trim_end().to_string(),
        None => stripped,
    }
}
