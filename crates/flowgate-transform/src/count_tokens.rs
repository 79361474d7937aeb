//! Character-based token estimate for `count_tokens`.

use serde_json::Value;
use tracing::warn;

/// Returned when the request body cannot be read.
pub const FALLBACK_TOKENS: u64 = 100;

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

/// CJK characters at 1.5 per token, everything else at 4, never below 1.
pub fn estimate_tokens(text: &str) -> u64 {
    let (cjk, other) = text.chars().fold((0usize, 0usize), |(cjk, other), c| {
        if is_cjk(c) {
            (cjk + 1, other)
        } else {
            (cjk, other + 1)
        }
    });
    let estimate = cjk as f64 / 1.5 + other as f64 / 4.0;
    (estimate as u64).max(1)
}

/// Estimates the input tokens of an Anthropic messages body.
pub fn count_request_tokens(bytes: &[u8]) -> u64 {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(body) => estimate_tokens(&request_text(&body)),
        Err(err) => {
            warn!(error = %err, "count_tokens body unreadable");
            FALLBACK_TOKENS
        }
    }
}

fn request_text(body: &Value) -> String {
    let mut text = String::new();
    match body.get("system") {
        Some(Value::String(system)) => text.push_str(system),
        Some(Value::Array(blocks)) => push_text_blocks(&mut text, blocks),
        _ => {}
    }
    for message in body
        .get("messages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        match message.get("content") {
            Some(Value::String(content)) => text.push_str(content),
            Some(Value::Array(blocks)) => push_text_blocks(&mut text, blocks),
            Some(other) if !other.is_null() => text.push_str(&other.to_string()),
            _ => {}
        }
    }
    text
}

fn push_text_blocks(text: &mut String, blocks: &[Value]) {
    for block in blocks {
        if block.get("type").and_then(Value::as_str) == Some("text")
            && let Some(value) = block.get("text").and_then(Value::as_str)
        {
            text.push_str(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_scripts() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        // 3 CJK chars → 2 tokens, 4 ASCII → 1 token.
        assert_eq!(estimate_tokens("你好吗abcd"), 3);
    }

    #[test]
    fn request_body_and_fallback() {
        let body = br#"{
            "system": [{"type": "text", "text": "aaaa"}],
            "messages": [
                {"role": "user", "content": "bbbb"},
                {"role": "user", "content": [{"type": "text", "text": "cccc"}, {"type": "image"}]}
            ]
        }"#;
        assert_eq!(count_request_tokens(body), 3);
        assert_eq!(count_request_tokens(b"nope"), FALLBACK_TOKENS);
    }
}
