//! Header order, request signing and trace identifiers of the official
//! client.

use flowgate_provider_core::Headers;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use uuid::Uuid;

use crate::constants::{
    ACCEPT_ENCODING, AONE_HOST_MARKER, IFLOW_CLI_USER_AGENT, IFLOW_CLI_VERSION, NODE_USER_AGENT,
};

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill_bytes(&mut buf);
    to_hex(&buf)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Hex HMAC-SHA256 of `iFlow-Cli:{session}:{timestamp}` keyed by the API key.
/// `None` for an empty key.
pub fn sign(api_key: &str, session_id: &str, timestamp_ms: i64) -> Option<String> {
    if api_key.is_empty() {
        return None;
    }
    let mut mac = Hmac::<Sha256>::new_from_slice(api_key.as_bytes()).ok()?;
    mac.update(format!("{IFLOW_CLI_USER_AGENT}:{session_id}:{timestamp_ms}").as_bytes());
    Some(to_hex(&mac.finalize().into_bytes()))
}

/// Identity of this gateway instance as the upstream sees it. Created once;
/// the ids stay fixed for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationContext {
    pub session_id: String,
    pub conversation_id: String,
    /// Telemetry user id, derived from the API key at startup. It stays
    /// fixed with the other ids, so a refreshed key keeps the same telemetry
    /// identity for the life of the process.
    pub user_id: String,
}

impl ConversationContext {
    pub fn new(api_key: &str) -> Self {
        let session_id = format!("session-{}", Uuid::new_v4());
        let seed = if api_key.is_empty() {
            session_id.as_str()
        } else {
            api_key
        };
        Self {
            user_id: Uuid::new_v5(&Uuid::NAMESPACE_DNS, seed.as_bytes()).to_string(),
            conversation_id: Uuid::new_v4().to_string(),
            session_id,
        }
    }
}

/// W3C trace context for one logical chat call, shared with its telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub parent_id: String,
}

impl TraceContext {
    pub fn generate() -> Self {
        Self {
            trace_id: random_hex(16),
            parent_id: random_hex(8),
        }
    }

    pub fn traceparent(&self) -> String {
        format!("00-{}-{}-01", self.trace_id, self.parent_id)
    }
}

/// 16 hex chars.
pub fn observation_id() -> String {
    random_hex(8)
}

/// Authority part of a URL, used for the `host` entry.
pub fn host_of(url: &str) -> String {
    url.parse::<http::Uri>()
        .ok()
        .and_then(|uri| uri.authority().map(|authority| authority.as_str().to_string()))
        .unwrap_or_default()
}

fn is_aone(base_url: &str) -> bool {
    base_url.to_ascii_lowercase().contains(AONE_HOST_MARKER)
}

/// Inputs for one chat request's headers.
#[derive(Debug, Clone, Copy)]
pub struct ChatHeaderInput<'a> {
    pub base_url: &'a str,
    pub api_key: &'a str,
    pub context: &'a ConversationContext,
    pub trace: &'a TraceContext,
    pub timestamp_ms: i64,
    pub content_length: usize,
}

pub fn chat_headers(input: ChatHeaderInput<'_>) -> Headers {
    let mut headers: Headers = vec![
        ("host".into(), host_of(input.base_url)),
        ("connection".into(), "keep-alive".into()),
        ("Content-Type".into(), "application/json".into()),
        ("Authorization".into(), format!("Bearer {}", input.api_key)),
        ("user-agent".into(), IFLOW_CLI_USER_AGENT.into()),
        ("session-id".into(), input.context.session_id.clone()),
        ("conversation-id".into(), input.context.conversation_id.clone()),
    ];
    if let Some(signature) = sign(
        input.api_key,
        &input.context.session_id,
        input.timestamp_ms,
    ) {
        headers.push(("x-iflow-signature".into(), signature));
        headers.push(("x-iflow-timestamp".into(), input.timestamp_ms.to_string()));
    }
    headers.extend([
        ("traceparent".into(), input.trace.traceparent()),
        ("accept".into(), "*/*".into()),
        ("accept-language".into(), "*".into()),
        ("sec-fetch-mode".into(), "cors".into()),
        ("accept-encoding".into(), ACCEPT_ENCODING.into()),
        ("content-length".into(), input.content_length.to_string()),
    ]);
    if is_aone(input.base_url) {
        headers.push(("X-Client-Type".into(), "iflow-cli".into()));
        headers.push(("X-Client-Version".into(), IFLOW_CLI_VERSION.into()));
    }
    headers
}

/// `aitrack.lifecycle.*` events.
pub fn telemetry_headers(url: &str, content_length: usize) -> Headers {
    vec![
        ("host".into(), host_of(url)),
        ("connection".into(), "keep-alive".into()),
        ("Content-Type".into(), "application/json".into()),
        ("accept".into(), "*/*".into()),
        ("accept-language".into(), "*".into()),
        ("sec-fetch-mode".into(), "cors".into()),
        ("user-agent".into(), NODE_USER_AGENT.into()),
        ("accept-encoding".into(), ACCEPT_ENCODING.into()),
        ("content-length".into(), content_length.to_string()),
    ]
}

pub fn vgif_headers(url: &str, content_length: usize) -> Headers {
    vec![
        ("host".into(), host_of(url)),
        ("connection".into(), "keep-alive".into()),
        ("content-type".into(), "text/plain;charset=UTF-8".into()),
        ("cache-control".into(), "no-cache".into()),
        ("accept".into(), "*/*".into()),
        ("accept-language".into(), "*".into()),
        ("sec-fetch-mode".into(), "cors".into()),
        ("user-agent".into(), NODE_USER_AGENT.into()),
        ("accept-encoding".into(), ACCEPT_ENCODING.into()),
        ("content-length".into(), content_length.to_string()),
    ]
}

/// OAuth `getUserInfo`.
pub fn user_info_headers(url: &str) -> Headers {
    vec![
        ("host".into(), host_of(url)),
        ("connection".into(), "keep-alive".into()),
        ("accept".into(), "*/*".into()),
        ("accept-language".into(), "*".into()),
        ("sec-fetch-mode".into(), "cors".into()),
        ("user-agent".into(), NODE_USER_AGENT.into()),
        ("accept-encoding".into(), ACCEPT_ENCODING.into()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(headers: &Headers) -> Vec<&str> {
        headers.iter().map(|(name, _)| name.as_str()).collect()
    }

    #[test]
    fn signature_matches_known_vector() {
        // HMAC-SHA256(key="key", "iFlow-Cli:session-1:1700000000000")
        assert_eq!(
            sign("key", "session-1", 1_700_000_000_000).as_deref(),
            Some("5968520f04e7cf2e52ef2b9cf74f7bcf9c20008ad22c09f4ff2e5e10abc31025")
        );
        assert_ne!(sign("key", "session-1", 1), sign("key", "session-2", 1));
        assert_eq!(sign("", "session-1", 1), None);
    }

    #[test]
    fn chat_header_order() {
        let context = ConversationContext::new("sk-test");
        let trace = TraceContext::generate();
        let headers = chat_headers(ChatHeaderInput {
            base_url: "https://apis.iflow.cn/v1",
            api_key: "sk-test",
            context: &context,
            trace: &trace,
            timestamp_ms: 42,
            content_length: 10,
        });
        assert_eq!(
            names(&headers),
            vec![
                "host",
                "connection",
                "Content-Type",
                "Authorization",
                "user-agent",
                "session-id",
                "conversation-id",
                "x-iflow-signature",
                "x-iflow-timestamp",
                "traceparent",
                "accept",
                "accept-language",
                "sec-fetch-mode",
                "accept-encoding",
                "content-length",
            ]
        );
        assert_eq!(headers[0].1, "apis.iflow.cn");
        assert_eq!(headers[8].1, "42");
        assert_eq!(headers[14].1, "10");
    }

    #[test]
    fn unsigned_and_aone_variants() {
        let context = ConversationContext::new("");
        let trace = TraceContext::generate();
        let headers = chat_headers(ChatHeaderInput {
            base_url: "https://ducky.code.alibaba-inc.com/v1",
            api_key: "",
            context: &context,
            trace: &trace,
            timestamp_ms: 42,
            content_length: 0,
        });
        let names = names(&headers);
        assert!(!names.contains(&"x-iflow-signature"));
        assert_eq!(&names[names.len() - 2..], ["X-Client-Type", "X-Client-Version"]);
    }

    #[test]
    fn identifiers_have_official_shapes() {
        let context = ConversationContext::new("sk-test");
        assert!(context.session_id.starts_with("session-"));
        assert_eq!(context.conversation_id.len(), 36);
        assert_eq!(context.user_id, "2278cee4-dbcd-52c1-862c-b64f393a4691");

        let trace = TraceContext::generate();
        let traceparent = trace.traceparent();
        let parts: Vec<&str> = traceparent.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!((parts[0], parts[3]), ("00", "01"));
        assert_eq!(parts[1].len(), 32);
        assert_eq!(parts[2].len(), 16);
        assert_eq!(observation_id().len(), 16);
    }

    #[test]
    fn side_channel_orders() {
        assert_eq!(
            names(&vgif_headers("https://log.mmstat.com/v.gif", 3))[..4],
            ["host", "connection", "content-type", "cache-control"]
        );
        let telemetry = telemetry_headers("https://gm.mmstat.com//x", 3);
        assert_eq!(telemetry[0].1, "gm.mmstat.com");
        assert_eq!(telemetry[6], ("user-agent".to_string(), "node".to_string()));
        assert_eq!(user_info_headers("https://iflow.cn/api").len(), 7);
    }
}
