use std::future::Future;
use std::pin::Pin;

use flowgate_provider_core::{
    HttpMethod, UpstreamBody, UpstreamClient, UpstreamFailure, UpstreamHttpRequest,
    UpstreamHttpResponse, UpstreamTransportErrorKind,
};
use wreq::{Client, Method, Proxy};
use wreq_util::Emulation;

use super::{
    UpstreamClientBuildError, UpstreamClientConfig, forward_body, headers_from_map, wire_headers,
};

/// Maps a profile name such as `chrome124` to a browser emulation.
pub fn parse_emulation(profile: &str) -> Option<Emulation> {
    let emulation = match profile.trim().to_ascii_lowercase().replace(['_', '-'], "").as_str() {
        "chrome" | "chrome124" => Emulation::Chrome124,
        "chrome131" => Emulation::Chrome131,
        "edge" | "edge131" => Emulation::Edge131,
        "firefox" | "firefox133" => Emulation::Firefox133,
        "safari" | "safari18" => Emulation::Safari18,
        _ => return None,
    };
    Some(emulation)
}

#[derive(Clone)]
pub struct WreqUpstreamClient {
    config: UpstreamClientConfig,
    client: Client,
}

impl WreqUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, UpstreamClientBuildError> {
        let emulation = parse_emulation(&config.impersonate)
            .ok_or_else(|| UpstreamClientBuildError::UnknownProfile(config.impersonate.clone()))?;
        let mut builder = Client::builder()
            .emulation(emulation)
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout);

        if let Some(proxy) = config.proxy.as_deref() {
            let proxy = Proxy::all(proxy).map_err(|err| UpstreamClientBuildError::Proxy {
                proxy: proxy.to_string(),
                message: err.to_string(),
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|err| UpstreamClientBuildError::Build(err.to_string()))?;
        Ok(Self { config, client })
    }
}

impl UpstreamClient for WreqUpstreamClient {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut builder = self.client.request(http_method_to_wreq(req.method), &req.url);
            for (k, v) in wire_headers(&req.headers) {
                builder = builder.header(k, v);
            }
            if let Some(timeout) = req.timeout.filter(|_| !req.is_stream) {
                builder = builder.timeout(timeout);
            }
            if let Some(body) = req.body {
                builder = builder.body(body);
            }

            let resp = builder.send().await.map_err(map_wreq_error)?;
            convert_response(resp, req.is_stream, &self.config).await
        })
    }
}

fn http_method_to_wreq(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
    }
}

async fn convert_response(
    resp: wreq::Response,
    want_stream: bool,
    config: &UpstreamClientConfig,
) -> Result<UpstreamHttpResponse, UpstreamFailure> {
    let status = resp.status().as_u16();
    let headers = headers_from_map(resp.headers());

    let is_success = (200..300).contains(&status);
    if !is_success || !want_stream {
        let body = resp.bytes().await.map_err(map_wreq_error)?;
        return Ok(UpstreamHttpResponse {
            status,
            headers,
            body: UpstreamBody::Bytes(body),
        });
    }

    let rx = forward_body(Box::pin(resp.bytes_stream()), config.read_timeout);
    Ok(UpstreamHttpResponse {
        status,
        headers,
        body: UpstreamBody::Stream(rx),
    })
}

fn map_wreq_error(err: wreq::Error) -> UpstreamFailure {
    let kind = classify_wreq_error(&err);
    UpstreamFailure::Transport {
        kind,
        message: err.to_string(),
    }
}

fn classify_wreq_error(err: &wreq::Error) -> UpstreamTransportErrorKind {
    let message = err.to_string().to_ascii_lowercase();
    if err.is_timeout() {
        if message.contains("read") || message.contains("idle") {
            return UpstreamTransportErrorKind::ReadTimeout;
        }
        return UpstreamTransportErrorKind::Timeout;
    }
    if err.is_connect() {
        if message.contains("dns") || message.contains("resolve") {
            return UpstreamTransportErrorKind::Dns;
        }
        if message.contains("tls") || message.contains("ssl") {
            return UpstreamTransportErrorKind::Tls;
        }
        return UpstreamTransportErrorKind::Connect;
    }
    if err.is_connection_reset() {
        return UpstreamTransportErrorKind::Connect;
    }
    if message.contains("tls") || message.contains("ssl") {
        return UpstreamTransportErrorKind::Tls;
    }
    UpstreamTransportErrorKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_names_are_forgiving() {
        assert!(matches!(parse_emulation("chrome124"), Some(Emulation::Chrome124)));
        assert!(matches!(parse_emulation("Chrome_124"), Some(Emulation::Chrome124)));
        assert!(matches!(parse_emulation("safari"), Some(Emulation::Safari18)));
        assert!(parse_emulation("lynx").is_none());
    }
}
