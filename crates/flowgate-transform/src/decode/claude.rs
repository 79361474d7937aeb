use flowgate_protocol::claude::messages::{
    ContentBlockParam, CreateMessageRequestBody, ImageSource as ClaudeImageSource, MessageContent,
    MessageParam, MessageRole, ToolChoice as ClaudeToolChoice,
};
use serde_json::Value;
use tracing::debug;

use super::parse_body;
use crate::canonical::{
    CanonicalMessage, ChatRequest, ContentPart, Dialect, ImageSource, JsonObject, Role, Sampling,
    ToolChoice, ToolDef,
};
use crate::error::ClientError;
use crate::ids;

pub fn decode_claude(bytes: &[u8]) -> Result<ChatRequest, ClientError> {
    let body: CreateMessageRequestBody = parse_body(bytes)?;
    Ok(from_claude_body(body))
}

/// Anthropic-only fields (`metadata`, `thinking`, `top_k`, ...) are not
/// forwarded; the upstream body is rebuilt from the canonical fields.
pub fn from_claude_body(body: CreateMessageRequestBody) -> ChatRequest {
    let mut messages = Vec::new();
    if let Some(system) = &body.system {
        let text = system.flatten();
        if !text.is_empty() {
            messages.push(CanonicalMessage::text(Role::System, text));
        }
    }
    for message in body.messages {
        map_message(message, &mut messages);
    }

    let tools = body
        .tools
        .unwrap_or_default()
        .into_iter()
        .map(|tool| ToolDef {
            name: tool.name,
            description: tool.description,
            parameters: Some(tool.input_schema).filter(|schema| !schema.is_null()),
            strict: None,
        })
        .collect();

    ChatRequest {
        dialect: Dialect::Claude,
        model: body.model,
        messages,
        sampling: Sampling {
            temperature: body.temperature,
            top_p: body.top_p,
            max_tokens: body.max_tokens,
            stop: body.stop_sequences.unwrap_or_default(),
        },
        tools,
        tool_choice: body.tool_choice.map(|choice| match choice {
            ClaudeToolChoice::Auto => ToolChoice::Auto,
            ClaudeToolChoice::Any => ToolChoice::Any,
            ClaudeToolChoice::None => ToolChoice::None,
            ClaudeToolChoice::Tool { name } => ToolChoice::Named(name),
        }),
        stream: body.stream.unwrap_or(false),
        extra: JsonObject::new(),
    }
}

fn map_message(message: MessageParam, out: &mut Vec<CanonicalMessage>) {
    let blocks = match message.content {
        MessageContent::Text(text) => {
            let role = match message.role {
                MessageRole::User => Role::User,
                MessageRole::Assistant => Role::Assistant,
            };
            out.push(CanonicalMessage::text(role, text));
            return;
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    match message.role {
        MessageRole::User => map_user_blocks(blocks, out),
        MessageRole::Assistant => {
            let parts = blocks
                .into_iter()
                .filter_map(|block| match block {
                    ContentBlockParam::Text { text } => Some(ContentPart::Text(text)),
                    ContentBlockParam::Thinking {
                        thinking,
                        signature,
                    } => Some(ContentPart::Thinking {
                        text: thinking,
                        signature,
                    }),
                    ContentBlockParam::ToolUse { id, name, input } => Some(ContentPart::ToolUse {
                        id: if id.is_empty() { ids::tool_call_id() } else { id },
                        name,
                        input: if input.is_null() {
                            Value::Object(JsonObject::new())
                        } else {
                            input
                        },
                    }),
                    other => {
                        debug!(block = ?other, "dropping assistant block with no upstream form");
                        None
                    }
                })
                .collect();
            out.push(CanonicalMessage::new(Role::Assistant, parts));
        }
    }
}

/// Tool results become tool-role messages ahead of whatever else the turn
/// carried, since the upstream has no inline tool-result block.
fn map_user_blocks(blocks: Vec<ContentBlockParam>, out: &mut Vec<CanonicalMessage>) {
    let mut remainder = Vec::new();
    let mut saw_tool_result = false;

    for block in blocks {
        match block {
            ContentBlockParam::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                saw_tool_result = true;
                out.push(CanonicalMessage::new(
                    Role::Tool,
                    vec![ContentPart::ToolResult {
                        tool_use_id,
                        output: content.map(|content| content.to_text()).unwrap_or_default(),
                        is_error: is_error.unwrap_or(false),
                    }],
                ));
            }
            ContentBlockParam::Text { text } => remainder.push(ContentPart::Text(text)),
            ContentBlockParam::Image { source } => remainder.push(ContentPart::Image {
                source: match source {
                    ClaudeImageSource::Base64 { media_type, data } => {
                        ImageSource::Base64 { media_type, data }
                    }
                    ClaudeImageSource::Url { url } => ImageSource::Url(url),
                },
                detail: None,
            }),
            other => debug!(block = ?other, "dropping user block with no upstream form"),
        }
    }

    let message = CanonicalMessage::new(Role::User, remainder);
    if message.has_image() {
        out.push(message);
    } else if !saw_tool_result || !message.joined_text("").trim().is_empty() {
        if message.parts.is_empty() {
            out.push(CanonicalMessage::text(Role::User, ""));
        } else {
            out.push(message);
        }
    }
}
