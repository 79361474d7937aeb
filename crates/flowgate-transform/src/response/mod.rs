//! Upstream response → caller dialect.

mod claude;
mod openai;

pub use claude::to_claude_message;
pub use openai::{normalize_openai_response, parse_upstream_response};

use flowgate_protocol::claude::messages::StopReason;

pub const NO_CHOICES_TEXT: &str = "[error: API returned no valid content]";
pub const EMPTY_CONTENT_TEXT: &str = "[error: API returned empty content]";

/// Upstream finish reasons in Anthropic terms. Unknown reasons end the turn.
pub fn map_finish_reason(reason: &str) -> StopReason {
    match reason {
        "length" => StopReason::MaxTokens,
        "tool_calls" | "function_call" => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}
