//! System prompt assembly.

use atlas_core::tool::ToolSpec;

use crate::extract::TOOL_BLOCK_TAG;

/// Build the leading system message: base prompt, tool-call convention,
/// then one `- name: description` line per tool in registry order.
pub fn build_system_prompt(base: &str, tools: &[ToolSpec]) -> String {
    let mut prompt = String::from(base.trim_end());

    if tools.is_empty() {
        return prompt;
    }

    prompt.push_str("\n\n");
    prompt.push_str(&tool_guidance());
    prompt.push_str("\nTools:\n");
    for tool in tools {
        prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
    }
    prompt.truncate(prompt.trim_end().len());
    prompt
}

fn tool_guidance() -> String {
    let fence = "```";
    format!(
        "Use tools only when account data or actions are explicitly needed.\n\
         If the user is just chatting, answer directly without calling a tool.\n\
         To invoke a tool, reply with a JSON object inside a fenced block tagged `{TOOL_BLOCK_TAG}`.\n\
         Example:\n\
         {fence}{TOOL_BLOCK_TAG}\n\
         {{\"tool\": \"quote\", \"args\": {{\"symbol\": \"AAPL\"}}}}\n\
         {fence}\n\
         Once the tool result arrives, explain it in plain language.\n\
         Ask the user to confirm before running anything that places, changes or cancels an order."
    )
}
