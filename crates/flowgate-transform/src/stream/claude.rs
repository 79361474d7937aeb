use bytes::Bytes;
use flowgate_common::ReasoningPolicy;
use flowgate_protocol::claude::messages::{MessageRole, StopReason};
use flowgate_protocol::claude::stream::{
    StreamContentBlock, StreamContentBlockDelta, StreamEvent, StreamMessage, StreamMessageDelta,
    StreamUsage,
};
use flowgate_protocol::openai::chat::{
    ChatCompletionMessageToolCallChunk, CreateChatCompletionStreamResponse,
};
use flowgate_protocol::sse::{SseLine, SseLineDecoder, encode_event};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::EMPTY_STREAM_TEXT;
use crate::ids;
use crate::reasoning::{ReasoningMerger, dedupe_delta};
use crate::response::map_finish_reason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Thinking,
    /// Keyed by the upstream tool-call index.
    Tool(i64),
}

/// Where the encoder is in the Anthropic event grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    NotStarted,
    /// `message_start` sent, no block open.
    Idle,
    Open { kind: BlockKind, index: u32 },
    Closed,
}

/// A tool call collected across chunks, keyed by its upstream index.
#[derive(Debug, Clone)]
struct PendingTool {
    upstream_index: i64,
    id: String,
    name: String,
    fragments: Vec<String>,
}

/// Per-stream state for re-encoding upstream chunks as Anthropic events.
///
/// Block indices are handed out from a monotonic counter and never reused.
/// Every `content_block_start` is matched by exactly one
/// `content_block_stop` before `message_delta`. Tool calls are buffered per
/// upstream index and written out whole when the stream ends, because
/// parallel calls interleave their argument fragments.
#[derive(Debug)]
pub struct ClaudeStreamState {
    policy: ReasoningPolicy,
    message_id: String,
    model: String,
    phase: StreamPhase,
    next_block_index: u32,
    pending_tools: Vec<PendingTool>,
    merger: ReasoningMerger,
    emitted_chars: usize,
    upstream_output_tokens: Option<i64>,
    pending_finish: Option<StopReason>,
}

impl ClaudeStreamState {
    pub fn new(policy: ReasoningPolicy, model: impl Into<String>) -> Self {
        Self {
            policy,
            message_id: ids::message_id(),
            model: model.into(),
            phase: StreamPhase::NotStarted,
            next_block_index: 0,
            pending_tools: Vec::new(),
            merger: ReasoningMerger::new(),
            emitted_chars: 0,
            upstream_output_tokens: None,
            pending_finish: None,
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// `message_start`, once.
    pub fn start(&mut self) -> Vec<StreamEvent> {
        if self.phase != StreamPhase::NotStarted {
            return Vec::new();
        }
        self.phase = StreamPhase::Idle;
        vec![StreamEvent::MessageStart {
            message: StreamMessage {
                id: self.message_id.clone(),
                r#type: "message".to_string(),
                role: MessageRole::Assistant,
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: StreamUsage {
                    input_tokens: Some(0),
                    output_tokens: 0,
                },
            },
        }]
    }

    pub fn transform_chunk(&mut self, chunk: CreateChatCompletionStreamResponse) -> Vec<StreamEvent> {
        let mut events = self.start();
        if self.phase == StreamPhase::Closed {
            return events;
        }
        if let Some(usage) = chunk.usage
            && usage.completion_tokens > 0
        {
            self.upstream_output_tokens = Some(usage.completion_tokens);
        }
        let Some(choice) = chunk.choices.into_iter().next() else {
            return events;
        };

        let mut delta = choice.delta;
        dedupe_delta(&mut delta);
        match self.policy {
            ReasoningPolicy::Preserve => {
                if let Some(reasoning) = delta.reasoning_content.filter(|r| !r.is_empty()) {
                    events.extend(self.emit(BlockKind::Thinking, &reasoning));
                }
                if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                    events.extend(self.emit(BlockKind::Text, &content));
                }
            }
            ReasoningPolicy::Merge => {
                let answer = self
                    .merger
                    .push(delta.content.as_deref(), delta.reasoning_content.as_deref());
                if let Some(answer) = answer {
                    events.extend(self.emit(BlockKind::Text, &answer));
                }
            }
        }

        for call in delta.tool_calls.unwrap_or_default() {
            self.buffer_tool_call(&call);
        }

        if let Some(reason) = choice.finish_reason.as_deref() {
            self.pending_finish = Some(map_finish_reason(reason));
        }
        events
    }

    /// Closes the stream: flushes held-back reasoning, guarantees at least one
    /// content block, closes the open block and sends the terminal events.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = self.start();
        if self.phase == StreamPhase::Closed {
            return events;
        }
        if let Some(answer) = self.merger.finish() {
            events.extend(self.emit(BlockKind::Text, &answer));
        }
        let saw_tools = !self.pending_tools.is_empty();
        if self.next_block_index == 0 && !saw_tools {
            debug!("stream carried no content; synthesising a text block");
            events.extend(self.emit(BlockKind::Text, EMPTY_STREAM_TEXT));
        }
        events.extend(self.close_open_block());
        events.extend(self.flush_tools());

        let mut stop_reason = self.pending_finish.unwrap_or(StopReason::EndTurn);
        if stop_reason == StopReason::EndTurn && saw_tools {
            stop_reason = StopReason::ToolUse;
        }
        events.push(StreamEvent::MessageDelta {
            delta: StreamMessageDelta {
                stop_reason: Some(stop_reason),
                stop_sequence: None,
            },
            usage: StreamUsage {
                input_tokens: None,
                output_tokens: self
                    .upstream_output_tokens
                    .unwrap_or((self.emitted_chars / 4) as i64),
            },
        });
        events.push(StreamEvent::MessageStop);
        self.phase = StreamPhase::Closed;
        events
    }

    fn emit(&mut self, kind: BlockKind, text: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let index = match self.phase {
            StreamPhase::Open { kind: open, index } if open == kind => index,
            _ => {
                events.extend(self.close_open_block());
                let index = self.open_block(kind);
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: match kind {
                        BlockKind::Thinking => StreamContentBlock::Thinking {
                            thinking: String::new(),
                        },
                        _ => StreamContentBlock::Text {
                            text: String::new(),
                        },
                    },
                });
                index
            }
        };
        self.emitted_chars += text.chars().count();
        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: match kind {
                BlockKind::Thinking => StreamContentBlockDelta::ThinkingDelta {
                    thinking: text.to_string(),
                },
                _ => StreamContentBlockDelta::TextDelta {
                    text: text.to_string(),
                },
            },
        });
        events
    }

    fn buffer_tool_call(&mut self, call: &ChatCompletionMessageToolCallChunk) {
        let function = call.function.as_ref();
        let name = function
            .and_then(|function| function.name.clone())
            .filter(|name| !name.is_empty());
        let arguments = function
            .and_then(|function| function.arguments.clone())
            .filter(|arguments| !arguments.is_empty());

        let position = match self
            .pending_tools
            .iter()
            .position(|tool| tool.upstream_index == call.index)
        {
            Some(position) => position,
            None => {
                let id = call
                    .id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(ids::tool_use_id);
                self.pending_tools.push(PendingTool {
                    upstream_index: call.index,
                    id,
                    name: String::new(),
                    fragments: Vec::new(),
                });
                self.pending_tools.len() - 1
            }
        };
        let tool = &mut self.pending_tools[position];
        if tool.name.is_empty()
            && let Some(name) = name
        {
            tool.name = name;
        }
        if let Some(arguments) = arguments {
            tool.fragments.push(arguments);
        }
    }

    /// One `tool_use` block per buffered call, in first-seen order.
    fn flush_tools(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for tool in std::mem::take(&mut self.pending_tools) {
            events.extend(self.close_open_block());
            let index = self.open_block(BlockKind::Tool(tool.upstream_index));
            events.push(StreamEvent::ContentBlockStart {
                index,
                content_block: StreamContentBlock::ToolUse {
                    id: tool.id,
                    name: tool.name,
                    input: Value::Object(Map::new()),
                },
            });
            for partial_json in tool.fragments {
                self.emitted_chars += partial_json.chars().count();
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: StreamContentBlockDelta::InputJsonDelta { partial_json },
                });
            }
            events.extend(self.close_open_block());
        }
        events
    }

    fn open_block(&mut self, kind: BlockKind) -> u32 {
        let index = self.next_block_index;
        self.next_block_index += 1;
        self.phase = StreamPhase::Open { kind, index };
        index
    }

    fn close_open_block(&mut self) -> Vec<StreamEvent> {
        match self.phase {
            StreamPhase::Open { index, .. } => {
                self.phase = StreamPhase::Idle;
                vec![StreamEvent::ContentBlockStop { index }]
            }
            _ => Vec::new(),
        }
    }
}

/// Byte-level wrapper: upstream SSE lines in, Anthropic SSE events out.
#[derive(Debug)]
pub struct ClaudeStreamTranscoder {
    decoder: SseLineDecoder,
    state: ClaudeStreamState,
}

impl ClaudeStreamTranscoder {
    pub fn new(policy: ReasoningPolicy, model: impl Into<String>) -> Self {
        Self {
            decoder: SseLineDecoder::new(),
            state: ClaudeStreamState::new(policy, model),
        }
    }

    pub fn state(&self) -> &ClaudeStreamState {
        &self.state
    }

    pub fn push_bytes(&mut self, bytes: &Bytes) -> Vec<Bytes> {
        let lines = self.decoder.push_bytes(bytes);
        lines
            .into_iter()
            .flat_map(|line| self.push_line(line))
            .collect()
    }

    /// Feeds a chunk that did not come off the wire, such as a synthesised
    /// error chunk.
    pub fn push_chunk(&mut self, chunk: CreateChatCompletionStreamResponse) -> Vec<Bytes> {
        let events = self.state.transform_chunk(chunk);
        encode_events(&events)
    }

    pub fn finish(&mut self) -> Vec<Bytes> {
        let mut out = Vec::new();
        if let Some(line) = self.decoder.finish() {
            out.extend(self.push_line(line));
        }
        out.extend(encode_events(&self.state.finish()));
        out
    }

    fn push_line(&mut self, line: SseLine) -> Vec<Bytes> {
        match line {
            SseLine::Data(payload) => {
                match serde_json::from_str::<CreateChatCompletionStreamResponse>(&payload) {
                    Ok(chunk) => self.push_chunk(chunk),
                    Err(err) => {
                        warn!(error = %err, "unparsable upstream chunk skipped");
                        Vec::new()
                    }
                }
            }
            SseLine::Done => encode_events(&self.state.finish()),
            // SSE parsers ignore unknown field lines, so these are safe to keep.
            SseLine::Other(raw) => vec![Bytes::from(format!("{raw}\n"))],
            SseLine::Blank | SseLine::Comment(_) | SseLine::Event(_) => Vec::new(),
        }
    }
}

fn encode_events(events: &[StreamEvent]) -> Vec<Bytes> {
    events
        .iter()
        .filter_map(|event| match encode_event(event.event_name(), event) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!(error = %err, event = event.event_name(), "failed to encode stream event");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(value: Value) -> CreateChatCompletionStreamResponse {
        serde_json::from_value(value).unwrap()
    }

    fn delta_chunk(delta: Value, finish: Option<&str>) -> CreateChatCompletionStreamResponse {
        chunk(json!({"choices": [{"index": 0, "delta": delta, "finish_reason": finish}]}))
    }

    fn run(policy: ReasoningPolicy, chunks: Vec<CreateChatCompletionStreamResponse>) -> Vec<StreamEvent> {
        let mut state = ClaudeStreamState::new(policy, "glm-5");
        let mut events: Vec<StreamEvent> = chunks
            .into_iter()
            .flat_map(|chunk| state.transform_chunk(chunk))
            .collect();
        events.extend(state.finish());
        events.extend(state.finish());
        events
    }

    fn names(events: &[StreamEvent]) -> Vec<&'static str> {
        events.iter().map(StreamEvent::event_name).collect()
    }

    #[test]
    fn reasoning_then_content_under_both_policies() {
        let chunks = || {
            vec![
                delta_chunk(json!({"reasoning_content": "hmm"}), None),
                delta_chunk(json!({"content": "Hi"}), Some("stop")),
            ]
        };

        let merged = run(ReasoningPolicy::Merge, chunks());
        assert_eq!(
            names(&merged),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop"
            ]
        );
        assert_eq!(
            merged[2],
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: StreamContentBlockDelta::TextDelta { text: "Hi".into() }
            }
        );

        let preserved = run(ReasoningPolicy::Preserve, chunks());
        let starts: Vec<_> = preserved
            .iter()
            .filter_map(|event| match event {
                StreamEvent::ContentBlockStart {
                    index,
                    content_block,
                } => Some((*index, content_block.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            starts,
            vec![
                (
                    0,
                    StreamContentBlock::Thinking {
                        thinking: String::new()
                    }
                ),
                (1, StreamContentBlock::Text { text: String::new() }),
            ]
        );
    }

    #[test]
    fn tool_call_fragments_stay_on_their_block() {
        let events = run(
            ReasoningPolicy::Preserve,
            vec![
                delta_chunk(json!({"content": "let me check"}), None),
                delta_chunk(
                    json!({"tool_calls": [{"index": 0, "function": {"name": "ls", "arguments": "{\"pa"}}]}),
                    None,
                ),
                delta_chunk(
                    json!({"tool_calls": [{"index": 0, "function": {"arguments": "th\":1}"}}]}),
                    None,
                ),
                delta_chunk(
                    json!({"tool_calls": [{"index": 1, "id": "call_b", "function": {"name": "cat", "arguments": "{}"}}]}),
                    Some("tool_calls"),
                ),
            ],
        );

        let mut tool_ids = Vec::new();
        for event in &events {
            if let StreamEvent::ContentBlockStart {
                index,
                content_block: StreamContentBlock::ToolUse { id, .. },
            } = event
            {
                tool_ids.push((*index, id.clone()));
            }
        }
        assert_eq!(tool_ids.len(), 2);
        assert_eq!(tool_ids[0].0, 1);
        assert!(tool_ids[0].1.starts_with("toolu_"));
        assert_eq!(tool_ids[1], (2, "call_b".to_string()));

        let fragments: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::ContentBlockDelta {
                    index,
                    delta: StreamContentBlockDelta::InputJsonDelta { partial_json },
                } => Some((*index, partial_json.as_str())),
                _ => None,
            })
            .collect();
        assert_eq!(fragments, vec![(1, "{\"pa"), (1, "th\":1}"), (2, "{}")]);

        assert!(events.iter().any(|event| matches!(
            event,
            StreamEvent::MessageDelta { delta, .. } if delta.stop_reason == Some(StopReason::ToolUse)
        )));
    }

    #[test]
    fn empty_stream_still_has_a_block() {
        let events = run(ReasoningPolicy::Preserve, Vec::new());
        assert_eq!(
            names(&events),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop"
            ]
        );
    }

    #[test]
    fn output_tokens_estimated_from_characters() {
        let events = run(
            ReasoningPolicy::Preserve,
            vec![delta_chunk(json!({"content": "12345678"}), Some("length"))],
        );
        let Some(StreamEvent::MessageDelta { delta, usage }) = events
            .iter()
            .find(|event| matches!(event, StreamEvent::MessageDelta { .. }))
        else {
            panic!("message_delta expected");
        };
        assert_eq!(usage.output_tokens, 2);
        assert_eq!(delta.stop_reason, Some(StopReason::MaxTokens));
    }

    #[test]
    fn transcoder_frames_events() {
        let mut transcoder = ClaudeStreamTranscoder::new(ReasoningPolicy::Preserve, "glm-5");
        let mut out = transcoder.push_bytes(&Bytes::from_static(
            b"data:{\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\ndata: [DONE]\n",
        ));
        out.extend(transcoder.finish());
        let text: String = out
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .collect();
        assert!(text.starts_with("event: message_start\ndata: {"));
        assert!(text.ends_with("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n"));
        assert_eq!(text.matches("event: message_stop").count(), 1);
        assert_eq!(transcoder.state().phase(), StreamPhase::Closed);
    }
}
