use std::collections::HashSet;

use flowgate_protocol::openai::chat::{
    ChatCompletionImageUrl, ChatCompletionMessageToolCall, ChatCompletionMessageToolCallFunction,
    ChatCompletionNamedToolChoice, ChatCompletionNamedToolChoiceFunction,
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestToolMessage,
    ChatCompletionRequestUserMessage, ChatCompletionTextContent, ChatCompletionTool,
    ChatCompletionToolChoiceMode, ChatCompletionToolChoiceOption, ChatCompletionUserContent,
    ChatCompletionUserContentPart, CreateChatCompletionRequestBody, FunctionObject,
    StopConfiguration,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::canonical::{
    CanonicalMessage, ChatRequest, ContentPart, Dialect, Role, ToolChoice, ToolDef,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpstreamOptions {
    /// Send earlier assistant reasoning back as `reasoning_content`.
    pub keep_reasoning: bool,
}

impl UpstreamOptions {
    /// OpenAI callers get their history forwarded as sent. Anthropic thinking
    /// blocks stay local.
    pub fn for_dialect(dialect: Dialect) -> Self {
        Self {
            keep_reasoning: dialect == Dialect::OpenAi,
        }
    }
}

/// The upstream speaks the chat-completions shape, so the upstream body is an
/// OpenAI request body. `stream` is left unset; body shaping owns it.
pub fn encode_upstream(
    request: &ChatRequest,
    options: UpstreamOptions,
) -> CreateChatCompletionRequestBody {
    CreateChatCompletionRequestBody {
        model: request.model.clone(),
        messages: encode_upstream_messages(&request.messages, options),
        temperature: request.sampling.temperature,
        top_p: request.sampling.top_p,
        max_tokens: request.sampling.max_tokens,
        stop: (!request.sampling.stop.is_empty())
            .then(|| StopConfiguration::Many(request.sampling.stop.clone())),
        stream: None,
        tools: (!request.tools.is_empty())
            .then(|| request.tools.iter().map(encode_tool).collect()),
        tool_choice: request.tool_choice.as_ref().map(encode_tool_choice),
        extra: request.extra.clone(),
    }
}

pub fn encode_upstream_messages(
    messages: &[CanonicalMessage],
    options: UpstreamOptions,
) -> Vec<ChatCompletionRequestMessage> {
    let mut known_tool_ids = HashSet::new();
    let mut out = Vec::with_capacity(messages.len());

    for message in messages {
        match message.role {
            Role::System => out.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage {
                    content: ChatCompletionTextContent::Text(message.joined_text("\n")),
                    name: None,
                },
            )),
            Role::Assistant => {
                out.push(encode_assistant(message, options, &mut known_tool_ids));
            }
            Role::User | Role::Tool => encode_user_turn(message, &known_tool_ids, &mut out),
        }
    }
    out
}

fn encode_assistant(
    message: &CanonicalMessage,
    options: UpstreamOptions,
    known_tool_ids: &mut HashSet<String>,
) -> ChatCompletionRequestMessage {
    let text = message.joined_text("\n");
    let reasoning = message
        .parts
        .iter()
        .filter_map(|part| match part {
            ContentPart::Thinking { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    let tool_calls: Vec<_> = message
        .parts
        .iter()
        .filter_map(|part| match part {
            ContentPart::ToolUse { id, name, input } => {
                known_tool_ids.insert(id.clone());
                Some(ChatCompletionMessageToolCall::Function {
                    id: id.clone(),
                    function: ChatCompletionMessageToolCallFunction {
                        name: name.clone(),
                        arguments: arguments_text(input),
                    },
                })
            }
            _ => None,
        })
        .collect();

    ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
        content: (!text.is_empty()).then(|| ChatCompletionTextContent::Text(text)),
        reasoning_content: (options.keep_reasoning && !reasoning.is_empty()).then_some(reasoning),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        name: None,
    })
}

/// Tool results go out first as tool-role messages, then the rest of the turn
/// as one user message. A result whose call never appeared is folded into the
/// user text instead, since the upstream rejects unpaired tool messages.
fn encode_user_turn(
    message: &CanonicalMessage,
    known_tool_ids: &HashSet<String>,
    out: &mut Vec<ChatCompletionRequestMessage>,
) {
    let mut rest = Vec::new();
    let mut saw_tool_result = false;

    for part in &message.parts {
        match part {
            ContentPart::ToolResult {
                tool_use_id,
                output,
                is_error,
            } => {
                saw_tool_result = true;
                if known_tool_ids.contains(tool_use_id) {
                    out.push(ChatCompletionRequestMessage::Tool(
                        ChatCompletionRequestToolMessage {
                            content: ChatCompletionTextContent::Text(output.clone()),
                            tool_call_id: tool_use_id.clone(),
                        },
                    ));
                } else {
                    warn!(tool_use_id = %tool_use_id, "tool result without a matching tool call; sending as text");
                    let marker = if *is_error { " [error]" } else { "" };
                    rest.push(ContentPart::Text(format!(
                        "[Tool Result ({tool_use_id}): {output}{marker}]"
                    )));
                }
            }
            ContentPart::Text(_) | ContentPart::Image { .. } => rest.push(part.clone()),
            ContentPart::Thinking { .. } | ContentPart::ToolUse { .. } => {
                debug!("dropping assistant-only part from a user turn");
            }
        }
    }

    if rest.is_empty() && (saw_tool_result || message.role == Role::Tool) {
        return;
    }
    let turn = CanonicalMessage::new(Role::User, rest);
    let content = if turn.has_image() {
        ChatCompletionUserContent::Parts(
            turn.parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text(text) if !text.trim().is_empty() => {
                        Some(ChatCompletionUserContentPart::Text { text: text.clone() })
                    }
                    ContentPart::Image { source, detail } => {
                        Some(ChatCompletionUserContentPart::ImageUrl {
                            image_url: ChatCompletionImageUrl {
                                url: source.to_url(),
                                detail: Some(detail.clone().unwrap_or_else(|| "auto".to_string())),
                            },
                        })
                    }
                    _ => None,
                })
                .collect(),
        )
    } else {
        ChatCompletionUserContent::Text(turn.joined_text("\n"))
    };
    out.push(ChatCompletionRequestMessage::User(
        ChatCompletionRequestUserMessage {
            content,
            name: None,
        },
    ));
}

fn arguments_text(input: &Value) -> String {
    match input {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

fn encode_tool(tool: &ToolDef) -> ChatCompletionTool {
    ChatCompletionTool::Function {
        function: FunctionObject {
            name: tool.name.clone(),
            description: Some(tool.description.clone().unwrap_or_default()),
            parameters: tool.parameters.clone(),
            strict: tool.strict,
        },
    }
}

fn encode_tool_choice(choice: &ToolChoice) -> ChatCompletionToolChoiceOption {
    match choice {
        ToolChoice::Auto => ChatCompletionToolChoiceOption::Mode(ChatCompletionToolChoiceMode::Auto),
        ToolChoice::None => ChatCompletionToolChoiceOption::Mode(ChatCompletionToolChoiceMode::None),
        ToolChoice::Any => {
            ChatCompletionToolChoiceOption::Mode(ChatCompletionToolChoiceMode::Required)
        }
        ToolChoice::Named(name) => {
            ChatCompletionToolChoiceOption::Named(ChatCompletionNamedToolChoice::Function {
                function: ChatCompletionNamedToolChoiceFunction { name: name.clone() },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::ImageSource;
    use serde_json::json;

    fn encode(messages: Vec<CanonicalMessage>) -> Value {
        serde_json::to_value(encode_upstream_messages(
            &messages,
            UpstreamOptions::default(),
        ))
        .unwrap()
    }

    #[test]
    fn paired_tool_result_becomes_tool_message() {
        let messages = vec![
            CanonicalMessage::new(
                Role::Assistant,
                vec![
                    ContentPart::Thinking {
                        text: "hidden".into(),
                        signature: None,
                    },
                    ContentPart::ToolUse {
                        id: "t1".into(),
                        name: "ls".into(),
                        input: json!({"path": "."}),
                    },
                ],
            ),
            CanonicalMessage::new(
                Role::Tool,
                vec![ContentPart::ToolResult {
                    tool_use_id: "t1".into(),
                    output: "a.txt".into(),
                    is_error: false,
                }],
            ),
        ];
        assert_eq!(
            encode(messages),
            json!([
                {"role": "assistant", "content": null, "tool_calls": [
                    {"type": "function", "id": "t1",
                     "function": {"name": "ls", "arguments": "{\"path\":\".\"}"}}
                ]},
                {"role": "tool", "content": "a.txt", "tool_call_id": "t1"}
            ])
        );
    }

    #[test]
    fn orphan_tool_result_is_folded_into_user_text() {
        let messages = vec![CanonicalMessage::new(
            Role::User,
            vec![
                ContentPart::ToolResult {
                    tool_use_id: "ghost".into(),
                    output: "boom".into(),
                    is_error: true,
                },
                ContentPart::Text("go on".into()),
            ],
        )];
        assert_eq!(
            encode(messages),
            json!([{"role": "user", "content": "[Tool Result (ghost): boom [error]]\ngo on"}])
        );
    }

    #[test]
    fn images_force_multipart_content() {
        let messages = vec![CanonicalMessage::new(
            Role::User,
            vec![
                ContentPart::Text("look".into()),
                ContentPart::Image {
                    source: ImageSource::Base64 {
                        media_type: "image/png".into(),
                        data: "AAA".into(),
                    },
                    detail: None,
                },
            ],
        )];
        assert_eq!(
            encode(messages),
            json!([{"role": "user", "content": [
                {"type": "text", "text": "look"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAA", "detail": "auto"}}
            ]}])
        );
    }

    #[test]
    fn reasoning_history_follows_options() {
        let messages = vec![CanonicalMessage::new(
            Role::Assistant,
            vec![
                ContentPart::Thinking {
                    text: "t".into(),
                    signature: None,
                },
                ContentPart::Text("a".into()),
            ],
        )];
        let kept = serde_json::to_value(encode_upstream_messages(
            &messages,
            UpstreamOptions::for_dialect(Dialect::OpenAi),
        ))
        .unwrap();
        assert_eq!(kept[0]["reasoning_content"], "t");
        let dropped = serde_json::to_value(encode_upstream_messages(
            &messages,
            UpstreamOptions::for_dialect(Dialect::Claude),
        ))
        .unwrap();
        assert!(dropped[0].get("reasoning_content").is_none());
    }
}
