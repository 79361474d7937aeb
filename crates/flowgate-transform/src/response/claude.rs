use flowgate_common::ReasoningPolicy;
use flowgate_protocol::claude::messages::{ContentBlock, Message, StopReason, Usage};
use flowgate_protocol::openai::chat::CreateChatCompletionResponse;
use serde_json::{Map, Value, json};

use super::{EMPTY_CONTENT_TEXT, NO_CHOICES_TEXT, map_finish_reason};
use crate::ids;
use crate::reasoning::normalize_message;

/// Maps a complete upstream response onto an Anthropic message.
///
/// The result always carries at least one content block: a response with no
/// choices, or a choice with nothing in it, gets a diagnostic text block.
pub fn to_claude_message(
    response: &CreateChatCompletionResponse,
    model: &str,
    policy: ReasoningPolicy,
) -> Message {
    let mut message = Message::assistant(ids::message_id(), model.to_string(), Vec::new());
    if let Some(usage) = response.usage {
        message.usage = Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        };
    }

    let Some(choice) = response.choices.first() else {
        message.content.push(ContentBlock::Text {
            text: NO_CHOICES_TEXT.to_string(),
        });
        message.stop_reason = Some(StopReason::EndTurn);
        return message;
    };

    let mut upstream = choice.message.clone();
    let original_reasoning = upstream.reasoning_content.clone();
    normalize_message(&mut upstream, policy);

    let text = upstream.content.unwrap_or_default();
    if policy == ReasoningPolicy::Preserve
        && let Some(reasoning) = original_reasoning.filter(|r| !r.is_empty() && *r != text)
    {
        message.content.push(ContentBlock::Thinking {
            thinking: reasoning,
            signature: None,
        });
    }
    if !text.is_empty() {
        message.content.push(ContentBlock::Text { text });
    }
    for call in upstream.tool_calls.unwrap_or_default() {
        message.content.push(ContentBlock::ToolUse {
            id: call
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(ids::tool_use_id),
            name: call.function.name,
            input: tool_input(&call.function.arguments),
        });
    }
    if message.content.is_empty() {
        message.content.push(ContentBlock::Text {
            text: EMPTY_CONTENT_TEXT.to_string(),
        });
    }

    message.stop_reason = Some(
        choice
            .finish_reason
            .as_deref()
            .map(map_finish_reason)
            .unwrap_or(StopReason::EndTurn),
    );
    message
}

/// Anthropic tool input must be an object; unparsable argument text is
/// wrapped rather than dropped.
fn tool_input(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(arguments).unwrap_or_else(|_| json!({ "_raw": arguments }))
}
