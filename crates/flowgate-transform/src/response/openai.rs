use flowgate_common::ReasoningPolicy;
use flowgate_protocol::openai::chat::{CompletionUsage, CreateChatCompletionResponse};

use crate::reasoning::normalize_message;

pub fn parse_upstream_response(bytes: &[u8]) -> Result<CreateChatCompletionResponse, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Fills in zero usage when the upstream left it out and applies the
/// reasoning policy to every choice.
pub fn normalize_openai_response(response: &mut CreateChatCompletionResponse, policy: ReasoningPolicy) {
    if response.usage.is_none() {
        response.usage = Some(CompletionUsage::default());
    }
    for choice in &mut response.choices {
        normalize_message(&mut choice.message, policy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn usage_defaults_and_reasoning_moves_to_content() {
        let mut response = parse_upstream_response(
            json!({
                "id": "x",
                "model": "glm-5",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": null, "reasoning_content": "42"},
                    "finish_reason": "stop"
                }]
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap();
        normalize_openai_response(&mut response, ReasoningPolicy::Merge);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value["usage"],
            json!({"prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0})
        );
        assert_eq!(value["choices"][0]["message"]["content"], "42");
        assert!(value["choices"][0]["message"].get("reasoning_content").is_none());
    }

    #[test]
    fn empty_message_gets_placeholder() {
        let mut response = parse_upstream_response(
            br#"{"choices":[{"message":{"role":"assistant","content":""}}]}"#,
        )
        .unwrap();
        normalize_openai_response(&mut response, ReasoningPolicy::Preserve);
        assert_eq!(
            response.choices[0].message.content.as_deref(),
            Some(crate::response::EMPTY_CONTENT_TEXT)
        );
    }

    #[test]
    fn tool_call_only_message_is_left_alone() {
        let mut response = parse_upstream_response(
            json!({"choices": [{"message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{"id": "call_1", "type": "function",
                                "function": {"name": "ls", "arguments": "{}"}}]
            }}]})
            .to_string()
            .as_bytes(),
        )
        .unwrap();
        normalize_openai_response(&mut response, ReasoningPolicy::Merge);
        assert_eq!(response.choices[0].message.content, None);
    }
}
