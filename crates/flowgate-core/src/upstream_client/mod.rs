//! UpstreamTransport: one request/response/streaming interface over two
//! HTTP stacks.
//!
//! [`ReqwestUpstreamClient`] is the conventional rustls client.
//! [`WreqUpstreamClient`] negotiates TLS and HTTP/2 the way a named browser
//! does. Both hand streamed bodies back as a channel of byte chunks.

mod impersonate;
mod standard;

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use flowgate_common::{GatewayConfig, UpstreamBackend};
use flowgate_provider_core::{
    ByteStream, Headers, UpstreamClient, UpstreamFailure, UpstreamTransportErrorKind,
};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use impersonate::{WreqUpstreamClient, parse_emulation};
pub use standard::ReqwestUpstreamClient;

/// Header names the HTTP stack writes itself. Request header lists still
/// carry them so the ordered fingerprint can be inspected.
const TRANSPORT_OWNED: &[&str] = &["host", "connection", "content-length"];

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    /// Longest silence tolerated between two body chunks.
    pub read_timeout: Duration,
    pub impersonate: String,
}

impl UpstreamClientConfig {
    pub fn from_gateway(config: &GatewayConfig) -> Self {
        Self {
            proxy: normalize_proxy(config.effective_proxy().map(str::to_string)),
            impersonate: config.tls_impersonate.clone(),
            ..Self::default()
        }
    }
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(300),
            impersonate: "chrome124".to_string(),
        }
    }
}

/// Builds the configured backend. An impersonating backend that cannot be
/// built falls back to the standard one.
pub fn build_upstream_client(
    backend: UpstreamBackend,
    config: UpstreamClientConfig,
) -> Result<Arc<dyn UpstreamClient>, UpstreamClientBuildError> {
    if backend == UpstreamBackend::Impersonate {
        match WreqUpstreamClient::new(config.clone()) {
            Ok(client) => {
                info!(profile = %config.impersonate, "upstream backend: impersonate");
                return Ok(Arc::new(client));
            }
            Err(err) => {
                warn!(error = %err, "impersonating backend unavailable, using standard backend");
            }
        }
    }
    let client = ReqwestUpstreamClient::new(config)?;
    info!("upstream backend: standard");
    Ok(Arc::new(client))
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamClientBuildError {
    #[error("invalid upstream proxy {proxy}: {message}")]
    Proxy { proxy: String, message: String },
    #[error("unknown impersonation profile: {0}")]
    UnknownProfile(String),
    #[error("failed to build upstream client: {0}")]
    Build(String),
}

fn normalize_proxy(value: Option<String>) -> Option<String> {
    value
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
}

fn wire_headers(headers: &Headers) -> impl Iterator<Item = (&str, &str)> {
    headers
        .iter()
        .filter(|(name, _)| {
            !TRANSPORT_OWNED
                .iter()
                .any(|owned| name.eq_ignore_ascii_case(owned))
        })
        .map(|(name, value)| (name.as_str(), value.as_str()))
}

fn headers_from_map(map: &http::HeaderMap) -> Headers {
    let mut out = Vec::new();
    for (k, v) in map {
        if let Ok(s) = v.to_str() {
            out.push((k.as_str().to_string(), s.to_string()));
        }
    }
    out
}

/// Pumps a response body into a bounded channel. An idle timeout or a body
/// error is sent as a final `Err` item. The body is dropped, which aborts the
/// upstream exchange, as soon as the receiver goes away, even while the
/// upstream is silent.
fn forward_body<S, E>(mut stream: S, idle_timeout: Duration) -> ByteStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                _ = tx.closed() => {
                    debug!("stream receiver dropped; aborting upstream body");
                    break;
                }
                next = tokio::time::timeout(idle_timeout, stream.next()) => next,
            };
            let failure = match next {
                Ok(Some(Ok(chunk))) => {
                    if tx.send(Ok(chunk)).await.is_err() {
                        break;
                    }
                    continue;
                }
                Ok(None) => break,
                Ok(Some(Err(err))) => {
                    warn!(error = %err, "upstream stream read failed");
                    UpstreamFailure::transport(
                        UpstreamTransportErrorKind::Other,
                        format!("upstream stream read failed: {err}"),
                    )
                }
                Err(_) => {
                    warn!(timeout_secs = idle_timeout.as_secs(), "upstream stream idle timeout");
                    UpstreamFailure::transport(
                        UpstreamTransportErrorKind::ReadTimeout,
                        format!("upstream stream idle for {}s", idle_timeout.as_secs()),
                    )
                }
            };
            let _ = tx.send(Err(failure)).await;
            break;
        }
    });
    rx
}
