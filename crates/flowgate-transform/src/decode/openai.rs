use flowgate_protocol::openai::chat::{
    ChatCompletionMessageToolCall, ChatCompletionNamedToolChoice, ChatCompletionRequestMessage,
    ChatCompletionTextContent, ChatCompletionTextContentPart, ChatCompletionTool,
    ChatCompletionToolChoiceMode, ChatCompletionToolChoiceOption, ChatCompletionUserContent,
    ChatCompletionUserContentPart, CreateChatCompletionRequestBody,
};
use serde_json::{Map, Value};

use super::parse_body;
use crate::canonical::{
    CanonicalMessage, ChatRequest, ContentPart, Dialect, ImageSource, Role, Sampling, ToolChoice,
    ToolDef,
};
use crate::error::ClientError;

pub fn decode_openai(bytes: &[u8]) -> Result<ChatRequest, ClientError> {
    let body: CreateChatCompletionRequestBody = parse_body(bytes)?;
    Ok(from_openai_body(body))
}

pub fn from_openai_body(body: CreateChatCompletionRequestBody) -> ChatRequest {
    let messages = body.messages.into_iter().map(map_message).collect();
    let tools = body
        .tools
        .unwrap_or_default()
        .into_iter()
        .map(|ChatCompletionTool::Function { function }| ToolDef {
            name: function.name,
            description: function.description,
            parameters: function.parameters,
            strict: function.strict,
        })
        .collect();

    ChatRequest {
        dialect: Dialect::OpenAi,
        model: body.model,
        messages,
        sampling: Sampling {
            temperature: body.temperature,
            top_p: body.top_p,
            max_tokens: body.max_tokens,
            stop: body.stop.map(|stop| stop.into_vec()).unwrap_or_default(),
        },
        tools,
        tool_choice: body.tool_choice.map(map_tool_choice),
        stream: body.stream.unwrap_or(false),
        extra: body.extra,
    }
}

/// Tool-call arguments as JSON. Text that does not parse is kept raw.
pub fn parse_tool_arguments(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(arguments).unwrap_or_else(|_| Value::String(arguments.to_string()))
}

fn map_message(message: ChatCompletionRequestMessage) -> CanonicalMessage {
    match message {
        ChatCompletionRequestMessage::Developer(system)
        | ChatCompletionRequestMessage::System(system) => {
            CanonicalMessage::new(Role::System, text_parts(system.content))
        }
        ChatCompletionRequestMessage::User(user) => {
            let parts = match user.content {
                ChatCompletionUserContent::Text(text) => vec![ContentPart::Text(text)],
                ChatCompletionUserContent::Parts(parts) => parts
                    .into_iter()
                    .filter_map(|part| match part {
                        ChatCompletionUserContentPart::Text { text } => {
                            Some(ContentPart::Text(text))
                        }
                        ChatCompletionUserContentPart::ImageUrl { image_url } => {
                            Some(ContentPart::Image {
                                source: ImageSource::from_url(&image_url.url),
                                // "auto" is the default; keep only explicit choices.
                                detail: image_url.detail.filter(|detail| detail != "auto"),
                            })
                        }
                        ChatCompletionUserContentPart::Unsupported => None,
                    })
                    .collect(),
            };
            CanonicalMessage::new(Role::User, parts)
        }
        ChatCompletionRequestMessage::Assistant(assistant) => {
            let mut parts = Vec::new();
            if let Some(reasoning) = assistant.reasoning_content.filter(|r| !r.is_empty()) {
                parts.push(ContentPart::Thinking {
                    text: reasoning,
                    signature: None,
                });
            }
            if let Some(content) = assistant.content {
                parts.extend(
                    text_parts(content)
                        .into_iter()
                        .filter(|part| !matches!(part, ContentPart::Text(text) if text.is_empty())),
                );
            }
            for call in assistant.tool_calls.unwrap_or_default() {
                let ChatCompletionMessageToolCall::Function { id, function } = call;
                parts.push(ContentPart::ToolUse {
                    id,
                    name: function.name,
                    input: parse_tool_arguments(&function.arguments),
                });
            }
            CanonicalMessage::new(Role::Assistant, parts)
        }
        ChatCompletionRequestMessage::Tool(tool) => CanonicalMessage::new(
            Role::Tool,
            vec![ContentPart::ToolResult {
                tool_use_id: tool.tool_call_id,
                output: tool.content.joined("\n"),
                is_error: false,
            }],
        ),
    }
}

fn text_parts(content: ChatCompletionTextContent) -> Vec<ContentPart> {
    match content {
        ChatCompletionTextContent::Text(text) => vec![ContentPart::Text(text)],
        ChatCompletionTextContent::Parts(parts) => parts
            .into_iter()
            .filter_map(|part| match part {
                ChatCompletionTextContentPart::Text { text } => Some(ContentPart::Text(text)),
                ChatCompletionTextContentPart::Unsupported => None,
            })
            .collect(),
    }
}

fn map_tool_choice(choice: ChatCompletionToolChoiceOption) -> ToolChoice {
    match choice {
        ChatCompletionToolChoiceOption::Mode(ChatCompletionToolChoiceMode::None) => ToolChoice::None,
        ChatCompletionToolChoiceOption::Mode(ChatCompletionToolChoiceMode::Auto) => ToolChoice::Auto,
        ChatCompletionToolChoiceOption::Mode(ChatCompletionToolChoiceMode::Required) => {
            ToolChoice::Any
        }
        ChatCompletionToolChoiceOption::Named(ChatCompletionNamedToolChoice::Function {
            function,
        }) => ToolChoice::Named(function.name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> ChatRequest {
        decode_openai(value.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn assistant_turn_with_reasoning_and_tool_calls() {
        let request = decode(json!({
            "model": "glm-5",
            "messages": [
                {"role": "user", "content": "weather?"},
                {
                    "role": "assistant",
                    "content": null,
                    "reasoning_content": "need a tool",
                    "tool_calls": [
                        {"id": "call_1", "type": "function",
                         "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}},
                        {"id": "call_2", "type": "function",
                         "function": {"name": "broken", "arguments": "{oops"}}
                    ]
                },
                {"role": "tool", "tool_call_id": "call_1", "content": "sunny"}
            ],
            "stream": true
        }));
        assert!(request.stream);
        assert_eq!(
            request.messages[1].parts,
            vec![
                ContentPart::Thinking {
                    text: "need a tool".into(),
                    signature: None
                },
                ContentPart::ToolUse {
                    id: "call_1".into(),
                    name: "get_weather".into(),
                    input: json!({"city": "Paris"})
                },
                ContentPart::ToolUse {
                    id: "call_2".into(),
                    name: "broken".into(),
                    input: json!("{oops")
                },
            ]
        );
        assert_eq!(request.messages[2].role, Role::Tool);
    }

    #[test]
    fn images_tools_and_extras() {
        let request = decode(json!({
            "model": "qwen-vl-max",
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "what is this"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAA", "detail": "high"}}
                ]
            }],
            "tools": [{"type": "function", "function": {"name": "f", "parameters": {"type": "object"}}}],
            "tool_choice": {"type": "function", "function": {"name": "f"}},
            "stop": "END",
            "frequency_penalty": 0.1
        }));
        assert!(request.messages[0].has_image());
        assert_eq!(request.tools[0].name, "f");
        assert_eq!(request.tool_choice, Some(ToolChoice::Named("f".into())));
        assert_eq!(request.sampling.stop, vec!["END".to_string()]);
        assert_eq!(request.extra.get("frequency_penalty"), Some(&json!(0.1)));
    }
}
