//! Reasoning/answer channel policy.
//!
//! Some upstream models answer in `reasoning_content` and leave `content`
//! empty. Under [`ReasoningPolicy::Merge`] the reasoning channel is folded
//! into the answer and dropped; under [`ReasoningPolicy::Preserve`] both are
//! kept as distinct channels.

use flowgate_common::ReasoningPolicy;
use flowgate_protocol::openai::chat::{
    ChatCompletionResponseMessage, ChatCompletionStreamResponseDelta,
};
use tracing::warn;

use crate::response::EMPTY_CONTENT_TEXT;

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|value| !value.is_empty())
}

/// Normalises a complete (non-streamed) assistant message. A message with
/// no content, reasoning or tool calls gets the empty-content placeholder.
pub fn normalize_message(message: &mut ChatCompletionResponseMessage, policy: ReasoningPolicy) {
    let has_content = non_empty(&message.content);
    let has_reasoning = non_empty(&message.reasoning_content);
    match (has_content, has_reasoning) {
        (false, true) => {
            message.content = message.reasoning_content.clone();
            if policy == ReasoningPolicy::Merge {
                message.reasoning_content = None;
            }
        }
        (true, true) if policy == ReasoningPolicy::Merge => message.reasoning_content = None,
        (false, false) if message.tool_calls.as_ref().is_none_or(Vec::is_empty) => {
            warn!("upstream message has neither content nor reasoning");
            message.content = Some(EMPTY_CONTENT_TEXT.to_string());
        }
        _ => {}
    }
}

/// A delta that repeats its answer text in the reasoning channel keeps only
/// the answer.
pub fn dedupe_delta(delta: &mut ChatCompletionStreamResponseDelta) {
    if non_empty(&delta.content) && delta.content == delta.reasoning_content {
        delta.reasoning_content = None;
    }
}

/// Streaming side of the merge policy.
///
/// Reasoning is held back until the first answer delta arrives, then
/// discarded. A stream that never produces answer text gets its reasoning
/// released as the answer at the end.
#[derive(Debug, Default)]
pub struct ReasoningMerger {
    buffered: String,
    saw_answer: bool,
}

impl ReasoningMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer text to emit for this delta, if any.
    pub fn push(&mut self, content: Option<&str>, reasoning: Option<&str>) -> Option<String> {
        match (content, reasoning) {
            (Some(content), _) if !content.is_empty() => {
                self.saw_answer = true;
                self.buffered.clear();
                Some(content.to_string())
            }
            (_, Some(reasoning)) if !reasoning.is_empty() && !self.saw_answer => {
                self.buffered.push_str(reasoning);
                None
            }
            _ => None,
        }
    }

    pub fn saw_answer(&self) -> bool {
        self.saw_answer
    }

    /// Buffered reasoning when no answer ever arrived.
    pub fn finish(&mut self) -> Option<String> {
        if self.saw_answer || self.buffered.is_empty() {
            return None;
        }
        self.saw_answer = true;
        Some(std::mem::take(&mut self.buffered))
    }
}
