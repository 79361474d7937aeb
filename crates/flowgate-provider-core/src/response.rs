use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;
use http::StatusCode;

/// What the gateway hands back to the HTTP layer for one chat call.
#[derive(Debug)]
pub enum ProxyResponse {
    Json { status: StatusCode, body: Bytes },
    Stream { status: StatusCode, body: StreamBody },
}

impl ProxyResponse {
    pub fn json(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self::Json {
            status,
            body: body.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Json { status, .. } | Self::Stream { status, .. } => *status,
        }
    }
}

pub struct StreamBody {
    pub content_type: &'static str,
    pub stream: Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>,
}

impl std::fmt::Debug for StreamBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBody")
            .field("content_type", &self.content_type)
            .field("stream", &"<opaque>")
            .finish()
    }
}

impl StreamBody {
    pub fn new<S>(content_type: &'static str, stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, io::Error>> + Send + 'static,
    {
        Self {
            content_type,
            stream: Box::pin(stream),
        }
    }

    pub fn event_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, io::Error>> + Send + 'static,
    {
        Self::new("text/event-stream", stream)
    }
}
