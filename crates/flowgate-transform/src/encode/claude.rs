use flowgate_protocol::claude::messages::{
    ContentBlockParam, CreateMessageRequestBody, ImageSource as ClaudeImageSource, MessageContent,
    MessageParam, MessageRole, SystemPrompt, Tool, ToolChoice as ClaudeToolChoice,
    ToolResultContent,
};
use serde_json::{Value, json};

use crate::canonical::{ChatRequest, ContentPart, ImageSource, JsonObject, Role, ToolChoice};

/// Renders a canonical request in the Anthropic messages dialect.
///
/// Consecutive tool-role messages and the user turn that follows them merge
/// back into one user message, mirroring how the decoder split them.
pub fn encode_claude_request(request: &ChatRequest) -> CreateMessageRequestBody {
    let system = request
        .messages
        .iter()
        .filter(|message| message.role == Role::System)
        .map(|message| message.joined_text(" "))
        .collect::<Vec<_>>();

    let mut messages = Vec::new();
    let mut pending_results: Vec<ContentBlockParam> = Vec::new();

    for message in &request.messages {
        match message.role {
            Role::System => {}
            Role::Tool => pending_results.extend(message.parts.iter().map(block_for)),
            Role::User => {
                let mut blocks = std::mem::take(&mut pending_results);
                blocks.extend(message.parts.iter().map(block_for));
                messages.push(MessageParam {
                    role: MessageRole::User,
                    content: collapse(blocks),
                });
            }
            Role::Assistant => {
                flush_results(&mut pending_results, &mut messages);
                messages.push(MessageParam {
                    role: MessageRole::Assistant,
                    content: collapse(message.parts.iter().map(block_for).collect()),
                });
            }
        }
    }
    flush_results(&mut pending_results, &mut messages);

    CreateMessageRequestBody {
        model: request.model.clone(),
        messages,
        system: (!system.is_empty()).then(|| SystemPrompt::Text(system.join(" "))),
        max_tokens: request.sampling.max_tokens,
        temperature: request.sampling.temperature,
        top_p: request.sampling.top_p,
        stop_sequences: (!request.sampling.stop.is_empty()).then(|| request.sampling.stop.clone()),
        stream: Some(request.stream),
        tools: (!request.tools.is_empty()).then(|| {
            request
                .tools
                .iter()
                .map(|tool| Tool {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    input_schema: tool
                        .parameters
                        .clone()
                        .unwrap_or_else(|| json!({"type": "object"})),
                })
                .collect()
        }),
        tool_choice: request.tool_choice.as_ref().map(|choice| match choice {
            ToolChoice::Auto => ClaudeToolChoice::Auto,
            ToolChoice::None => ClaudeToolChoice::None,
            ToolChoice::Any => ClaudeToolChoice::Any,
            ToolChoice::Named(name) => ClaudeToolChoice::Tool { name: name.clone() },
        }),
        extra: JsonObject::new(),
    }
}

fn flush_results(pending: &mut Vec<ContentBlockParam>, messages: &mut Vec<MessageParam>) {
    if pending.is_empty() {
        return;
    }
    messages.push(MessageParam {
        role: MessageRole::User,
        content: MessageContent::Blocks(std::mem::take(pending)),
    });
}

fn collapse(blocks: Vec<ContentBlockParam>) -> MessageContent {
    match blocks.as_slice() {
        [ContentBlockParam::Text { text }] => MessageContent::Text(text.clone()),
        _ => MessageContent::Blocks(blocks),
    }
}

fn block_for(part: &ContentPart) -> ContentBlockParam {
    match part {
        ContentPart::Text(text) => ContentBlockParam::Text { text: text.clone() },
        ContentPart::Thinking { text, signature } => ContentBlockParam::Thinking {
            thinking: text.clone(),
            signature: signature.clone(),
        },
        ContentPart::Image { source, .. } => ContentBlockParam::Image {
            source: match source {
                ImageSource::Base64 { media_type, data } => ClaudeImageSource::Base64 {
                    media_type: media_type.clone(),
                    data: data.clone(),
                },
                ImageSource::Url(url) => ClaudeImageSource::Url { url: url.clone() },
            },
        },
        ContentPart::ToolUse { id, name, input } => ContentBlockParam::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: match input {
                Value::String(raw) => json!({ "_raw": raw }),
                other => other.clone(),
            },
        },
        ContentPart::ToolResult {
            tool_use_id,
            output,
            is_error,
        } => ContentBlockParam::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: Some(ToolResultContent::Text(output.clone())),
            is_error: is_error.then_some(true),
        },
    }
}
