use bytes::Bytes;

use crate::headers::Headers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamTransportErrorKind {
    Timeout,
    ReadTimeout,
    Connect,
    Dns,
    Tls,
    Other,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamFailure {
    /// Transport-level failures (no HTTP response).
    #[error("upstream transport error ({kind:?}): {message}")]
    Transport {
        kind: UpstreamTransportErrorKind,
        message: String,
    },
    /// HTTP error response captured as bytes (usually non-2xx).
    #[error("upstream returned HTTP {status}: {}", display_http(.status, .body))]
    Http {
        status: u16,
        headers: Headers,
        body: Bytes,
    },
}

impl UpstreamFailure {
    pub fn transport(kind: UpstreamTransportErrorKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport { .. } => None,
        }
    }

    /// Caller-facing message: the vendor's own text when there is one.
    pub fn message(&self) -> String {
        match self {
            Self::Transport { message, .. } => message.clone(),
            Self::Http { status, body, .. } => upstream_error_message(*status, body),
        }
    }
}

fn display_http(status: &u16, body: &Bytes) -> String {
    upstream_error_message(*status, body)
}

/// Best-effort message from an upstream error body: `msg`, then
/// `error.message`, then the first 200 characters, then `HTTP <status>`.
pub fn upstream_error_message(status: u16, body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
        if let Some(msg) = value.get("msg").and_then(|v| v.as_str()).filter(|s| !s.is_empty()) {
            return msg.to_string();
        }
        if let Some(msg) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
        {
            return msg.to_string();
        }
    }
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return format!("HTTP {status}");
    }
    trimmed.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_extraction_order() {
        assert_eq!(upstream_error_message(400, br#"{"msg":"bad model"}"#), "bad model");
        assert_eq!(
            upstream_error_message(401, br#"{"error":{"message":"expired"}}"#),
            "expired"
        );
        let long = "x".repeat(300);
        assert_eq!(upstream_error_message(502, long.as_bytes()).len(), 200);
        assert_eq!(upstream_error_message(503, b""), "HTTP 503");
    }

    #[test]
    fn http_failure_displays_extracted_message() {
        let failure = UpstreamFailure::Http {
            status: 429,
            headers: Vec::new(),
            body: Bytes::from_static(br#"{"msg":"too many requests"}"#),
        };
        assert_eq!(failure.status(), Some(429));
        assert_eq!(failure.message(), "too many requests");
        assert_eq!(failure.to_string(), "upstream returned HTTP 429: too many requests");
    }
}
