use bytes::Bytes;
use flowgate_common::ReasoningPolicy;
use flowgate_protocol::openai::chat::CreateChatCompletionStreamResponse;
use flowgate_protocol::sse::{SseLine, SseLineDecoder, encode_done, encode_json};
use tracing::debug;

use super::{fallback_chunk, text_chunk, unix_now};
use crate::reasoning::{ReasoningMerger, dedupe_delta};

/// Re-frames the upstream stream for OpenAI-dialect callers.
///
/// Chunks are normalised under the reasoning policy and re-emitted as
/// `data: <json>\n\n`. Lines that are not chunks pass through verbatim. The
/// output always ends with `data: [DONE]` and always carries some content.
#[derive(Debug)]
pub struct OpenAiStreamReencoder {
    policy: ReasoningPolicy,
    model: String,
    decoder: SseLineDecoder,
    merger: ReasoningMerger,
    lines_seen: usize,
    saw_content: bool,
    done_sent: bool,
    last_id: Option<String>,
    last_created: Option<i64>,
}

impl OpenAiStreamReencoder {
    pub fn new(policy: ReasoningPolicy, model: impl Into<String>) -> Self {
        Self {
            policy,
            model: model.into(),
            decoder: SseLineDecoder::new(),
            merger: ReasoningMerger::new(),
            lines_seen: 0,
            saw_content: false,
            done_sent: false,
            last_id: None,
            last_created: None,
        }
    }

    /// Non-blank upstream lines processed so far.
    pub fn lines_seen(&self) -> usize {
        self.lines_seen
    }

    pub fn push_bytes(&mut self, bytes: &Bytes) -> Vec<Bytes> {
        let lines = self.decoder.push_bytes(bytes);
        lines
            .into_iter()
            .flat_map(|line| self.push_line(line))
            .collect()
    }

    pub fn push_line(&mut self, line: SseLine) -> Vec<Bytes> {
        if self.done_sent {
            return Vec::new();
        }
        if line != SseLine::Blank {
            self.lines_seen += 1;
        }
        match line {
            SseLine::Blank => vec![Bytes::from_static(b"\n")],
            SseLine::Done => self.close(),
            SseLine::Data(payload) => {
                match serde_json::from_str::<CreateChatCompletionStreamResponse>(&payload) {
                    Ok(chunk) => self.push_chunk(chunk),
                    Err(err) => {
                        debug!(error = %err, "unparsable stream line passed through");
                        vec![Bytes::from(format!("data: {payload}\n"))]
                    }
                }
            }
            SseLine::Comment(text) => vec![Bytes::from(format!(": {text}\n"))],
            SseLine::Event(name) => vec![Bytes::from(format!("event: {name}\n"))],
            SseLine::Other(raw) => vec![Bytes::from(format!("{raw}\n"))],
        }
    }

    /// Normalises and frames one parsed chunk.
    pub fn push_chunk(&mut self, mut chunk: CreateChatCompletionStreamResponse) -> Vec<Bytes> {
        if self.done_sent {
            return Vec::new();
        }
        if !chunk.id.is_empty() {
            self.last_id = Some(chunk.id.clone());
        }
        if chunk.created != 0 {
            self.last_created = Some(chunk.created);
        }

        let mut emptied = false;
        for choice in &mut chunk.choices {
            let delta = &mut choice.delta;
            dedupe_delta(delta);
            if self.policy == ReasoningPolicy::Merge {
                let answer = self
                    .merger
                    .push(delta.content.as_deref(), delta.reasoning_content.as_deref());
                emptied |= delta.reasoning_content.take().is_some() && answer.is_none();
                delta.content = answer;
            }
            let has_tool_calls = delta.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty());
            let has_text = delta.content.as_deref().is_some_and(|text| !text.is_empty())
                || delta
                    .reasoning_content
                    .as_deref()
                    .is_some_and(|text| !text.is_empty());
            self.saw_content |= has_text || has_tool_calls;
        }

        // A reasoning-only chunk swallowed by the merge policy leaves nothing
        // worth sending.
        if emptied && chunk.usage.is_none() && chunk.choices.iter().all(|choice| {
            choice.finish_reason.is_none()
                && choice.delta.role.is_none()
                && choice.delta.content.is_none()
                && choice.delta.tool_calls.is_none()
        }) {
            return Vec::new();
        }

        match encode_json(&chunk) {
            Ok(bytes) => vec![bytes],
            Err(err) => {
                debug!(error = %err, "failed to re-encode stream chunk");
                Vec::new()
            }
        }
    }

    /// Flushes buffered state and terminates the stream. Safe to call more
    /// than once.
    pub fn finish(&mut self) -> Vec<Bytes> {
        let mut out = Vec::new();
        if let Some(line) = self.decoder.finish() {
            out.extend(self.push_line(line));
        }
        out.extend(self.close());
        out
    }

    fn close(&mut self) -> Vec<Bytes> {
        if self.done_sent {
            return Vec::new();
        }
        let mut out = Vec::new();
        if let Some(answer) = self.merger.finish() {
            let chunk = text_chunk(
                self.last_id.clone().unwrap_or_default(),
                self.model.clone(),
                self.last_created.unwrap_or_else(unix_now),
                answer,
                None,
            );
            self.saw_content = true;
            if let Ok(bytes) = encode_json(&chunk) {
                out.push(bytes);
            }
        }
        if !self.saw_content {
            debug!(lines = self.lines_seen, "stream carried no content; sending fallback chunk");
            if let Ok(bytes) = encode_json(&fallback_chunk(&self.model)) {
                out.push(bytes);
            }
        }
        out.push(encode_done());
        self.done_sent = true;
        out
    }
}
