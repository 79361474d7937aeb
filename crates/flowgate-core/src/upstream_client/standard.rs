use std::future::Future;
use std::pin::Pin;

use flowgate_provider_core::{
    HttpMethod, UpstreamBody, UpstreamClient, UpstreamFailure, UpstreamHttpRequest,
    UpstreamHttpResponse, UpstreamTransportErrorKind,
};
use reqwest::{Client, Method, Proxy};

use super::{
    UpstreamClientBuildError, UpstreamClientConfig, forward_body, headers_from_map, wire_headers,
};

#[derive(Clone)]
pub struct ReqwestUpstreamClient {
    config: UpstreamClientConfig,
    client: Client,
}

impl ReqwestUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, UpstreamClientBuildError> {
        let mut builder = Client::builder()
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

impl UpstreamClient for ReqwestUpstreamClient {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut builder = self.client.request(http_method(req.method), &req.url);
            for (k, v) in wire_headers(&req.headers) {
                builder = builder.header(k, v);
            }
            // Streams are bounded by the per-chunk read timeout only.
            if let Some(timeout) = req.timeout.filter(|_| !req.is_stream) {
                builder = builder.timeout(timeout);
            }
            if let Some(body) = req.body {
                builder = builder.body(body);
            }

            let resp = builder.send().await.map_err(map_reqwest_error)?;
            convert_response(resp, req.is_stream, &self.config).await
        })
    }
}

fn http_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
    }
}

async fn convert_response(
    resp: reqwest::Response,
    want_stream: bool,
    config: &UpstreamClientConfig,
) -> Result<UpstreamHttpResponse, UpstreamFailure> {
    let status = resp.status().as_u16();
    let headers = headers_from_map(resp.headers());

    let is_success = (200..300).contains(&status);
    if !is_success || !want_stream {
        let body = resp.bytes().await.map_err(map_reqwest_error)?;
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

fn map_reqwest_error(err: reqwest::Error) -> UpstreamFailure {
    let kind = classify_reqwest_error(&err);
    UpstreamFailure::Transport {
        kind,
        message: err.to_string(),
    }
}

fn classify_reqwest_error(err: &reqwest::Error) -> UpstreamTransportErrorKind {
    // reqwest keeps the useful detail in the source chain.
    let mut message = err.to_string().to_ascii_lowercase();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        message.push(' ');
        message.push_str(&inner.to_string().to_ascii_lowercase());
        source = inner.source();
    }
    if err.is_timeout() {
        if err.is_body() || message.contains("read") {
            return UpstreamTransportErrorKind::ReadTimeout;
        }
        return UpstreamTransportErrorKind::Timeout;
    }
    if err.is_connect() {
        if message.contains("dns") || message.contains("resolve") {
            return UpstreamTransportErrorKind::Dns;
        }
        if message.contains("tls") || message.contains("certificate") {
            return UpstreamTransportErrorKind::Tls;
        }
        return UpstreamTransportErrorKind::Connect;
    }
    if message.contains("tls") || message.contains("certificate") {
        return UpstreamTransportErrorKind::Tls;
    }
    UpstreamTransportErrorKind::Other
}
