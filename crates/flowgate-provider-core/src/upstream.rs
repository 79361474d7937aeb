use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::failure::UpstreamFailure;
use crate::headers::{Headers, header_get};

/// Streamed body chunks. A failure mid-body arrives as the last item.
pub type ByteStream = tokio::sync::mpsc::Receiver<Result<Bytes, UpstreamFailure>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(ByteStream),
}

#[derive(Debug)]
pub struct UpstreamHttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

impl UpstreamHttpResponse {
    pub fn content_type(&self) -> Option<&str> {
        header_get(&self.headers, "content-type")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drains a streamed body into memory, keeping what arrived before a
    /// read failure. Buffered bodies are returned as is.
    pub async fn into_bytes(self) -> Bytes {
        match self.body {
            UpstreamBody::Bytes(bytes) => bytes,
            UpstreamBody::Stream(mut rx) => {
                let mut buf = BytesMut::new();
                while let Some(Ok(chunk)) = rx.recv().await {
                    buf.extend_from_slice(&chunk);
                }
                buf.freeze()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamHttpRequest {
    pub method: HttpMethod,
    pub url: String,
    /// Sent in this order. `host`, `connection` and `content-length` are
    /// listed for fidelity but the transport owns their wire values.
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub is_stream: bool,
    /// Per-request timeout overriding the client default.
    pub timeout: Option<Duration>,
}

impl UpstreamHttpRequest {
    pub fn get(url: impl Into<String>, headers: Headers) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers,
            body: None,
            is_stream: false,
            timeout: None,
        }
    }

    pub fn post(url: impl Into<String>, headers: Headers, body: impl Into<Bytes>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers,
            body: Some(body.into()),
            is_stream: false,
            timeout: None,
        }
    }

    pub fn streaming(mut self, is_stream: bool) -> Self {
        self.is_stream = is_stream;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// One HTTP backend. Non-2xx responses are returned as `Ok`; only transport
/// problems are `Err`.
pub trait UpstreamClient: Send + Sync {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn into_bytes_drains_stream() {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        tx.send(Ok(Bytes::from_static(b"ab"))).await.unwrap();
        tx.send(Ok(Bytes::from_static(b"cd"))).await.unwrap();
        drop(tx);
        let response = UpstreamHttpResponse {
            status: 200,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: UpstreamBody::Stream(rx),
        };
        assert_eq!(response.content_type(), Some("application/json"));
        assert_eq!(response.into_bytes().await, Bytes::from_static(b"abcd"));
    }
}
