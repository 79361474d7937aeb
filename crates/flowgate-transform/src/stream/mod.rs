//! Upstream event stream → caller dialect event stream.

pub mod claude;
pub mod openai;

pub use claude::{BlockKind, ClaudeStreamState, ClaudeStreamTranscoder, StreamPhase};
pub use openai::OpenAiStreamReencoder;

use flowgate_protocol::openai::chat::{
    ChatCompletionStreamChoice, ChatCompletionStreamResponseDelta,
    CreateChatCompletionStreamResponse, JsonObject,
};

/// Text of the block synthesised for a stream that produced no content.
pub const EMPTY_STREAM_TEXT: &str =
    "upstream returned an empty response; the context may have been exceeded";

pub(crate) fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// A single-choice chunk carrying `content`.
pub fn text_chunk(
    id: impl Into<String>,
    model: impl Into<String>,
    created: i64,
    content: impl Into<String>,
    finish_reason: Option<&str>,
) -> CreateChatCompletionStreamResponse {
    CreateChatCompletionStreamResponse {
        id: id.into(),
        object: "chat.completion.chunk".to_string(),
        created,
        model: model.into(),
        choices: vec![ChatCompletionStreamChoice {
            index: 0,
            delta: ChatCompletionStreamResponseDelta {
                content: Some(content.into()),
                ..Default::default()
            },
            finish_reason: finish_reason.map(str::to_string),
            extra: JsonObject::new(),
        }],
        usage: None,
        extra: JsonObject::new(),
    }
}

/// The chunk sent in place of a stream when the upstream answered a
/// streaming call with a plain error body.
pub fn api_error_chunk(model: &str, message: &str) -> CreateChatCompletionStreamResponse {
    let created = unix_now();
    text_chunk(
        format!("error-{created}"),
        model,
        created,
        format!("[API Error] {message}"),
        Some("stop"),
    )
}

/// The chunk sent when the upstream stream carried no content at all.
pub fn fallback_chunk(model: &str) -> CreateChatCompletionStreamResponse {
    let created = unix_now();
    let mut chunk = text_chunk(
        format!("fallback-{created}"),
        model,
        created,
        EMPTY_STREAM_TEXT,
        Some("stop"),
    );
    chunk.choices[0].delta.role = Some("assistant".to_string());
    chunk
}
