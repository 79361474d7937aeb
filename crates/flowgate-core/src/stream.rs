use std::collections::VecDeque;
use std::io;

use bytes::Bytes;
use flowgate_provider_core::{ByteStream, GatePermit, StreamBody};
use flowgate_provider_impl::CallContext;
use flowgate_transform::stream::{
    ClaudeStreamTranscoder, OpenAiStreamReencoder, api_error_chunk,
};
use futures_util::stream::{self, unfold};
use tracing::{debug, warn};

/// A per-call re-encoder from upstream bytes to caller frames.
pub(crate) trait Reencode: Send + 'static {
    fn push(&mut self, bytes: &Bytes) -> Vec<Bytes>;
    fn finish(&mut self) -> Vec<Bytes>;
    /// Frames for a streaming call the upstream answered with a plain body.
    fn api_error(&mut self, model: &str, message: &str) -> Vec<Bytes>;
}

impl Reencode for OpenAiStreamReencoder {
    fn push(&mut self, bytes: &Bytes) -> Vec<Bytes> {
        self.push_bytes(bytes)
    }

    fn finish(&mut self) -> Vec<Bytes> {
        OpenAiStreamReencoder::finish(self)
    }

    fn api_error(&mut self, model: &str, message: &str) -> Vec<Bytes> {
        let mut out = self.push_chunk(api_error_chunk(model, message));
        out.extend(OpenAiStreamReencoder::finish(self));
        out
    }
}

impl Reencode for ClaudeStreamTranscoder {
    fn push(&mut self, bytes: &Bytes) -> Vec<Bytes> {
        self.push_bytes(bytes)
    }

    fn finish(&mut self) -> Vec<Bytes> {
        ClaudeStreamTranscoder::finish(self)
    }

    fn api_error(&mut self, model: &str, message: &str) -> Vec<Bytes> {
        let mut out = self.push_chunk(api_error_chunk(model, message));
        out.extend(ClaudeStreamTranscoder::finish(self));
        out
    }
}

/// Everything one streamed call owns. The gate permit lives here, so it is
/// released when the stream completes or the caller goes away.
struct ReencodeState<R: Reencode> {
    upstream: Option<ByteStream>,
    reencoder: R,
    pending: VecDeque<Bytes>,
    call: CallContext,
    _permit: GatePermit,
    /// The outcome is known: the stream ended or its failure was reported.
    settled: bool,
}

impl<R: Reencode> Drop for ReencodeState<R> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(trace_id = %self.call.trace().trace_id, "caller left mid-stream");
            self.call.report_error("client disconnected");
        }
    }
}

pub(crate) fn reencode_stream<R: Reencode>(
    upstream: ByteStream,
    reencoder: R,
    call: CallContext,
    permit: GatePermit,
) -> StreamBody {
    let state = ReencodeState {
        upstream: Some(upstream),
        reencoder,
        pending: VecDeque::new(),
        call,
        _permit: permit,
        settled: false,
    };
    let stream = unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((Ok::<_, io::Error>(item), state));
            }
            let Some(upstream) = state.upstream.as_mut() else {
                state.settled = true;
                return None;
            };
            match upstream.recv().await {
                Some(Ok(bytes)) => {
                    let frames = state.reencoder.push(&bytes);
                    state.pending.extend(frames);
                }
                Some(Err(failure)) => {
                    state.upstream = None;
                    let message = failure.message();
                    warn!(
                        trace_id = %state.call.trace().trace_id,
                        error = %message,
                        "upstream stream broke off"
                    );
                    state.call.report_error(&message);
                    state.settled = true;
                    let frames = state.reencoder.api_error(state.call.model(), &message);
                    state.pending.extend(frames);
                }
                None => {
                    state.upstream = None;
                    let frames = state.reencoder.finish();
                    state.pending.extend(frames);
                }
            }
        }
    });
    StreamBody::event_stream(stream)
}

pub(crate) fn api_error_stream<R: Reencode>(
    mut reencoder: R,
    model: &str,
    message: &str,
) -> StreamBody {
    let frames = reencoder.api_error(model, message);
    StreamBody::event_stream(stream::iter(frames.into_iter().map(Ok::<_, io::Error>)))
}
