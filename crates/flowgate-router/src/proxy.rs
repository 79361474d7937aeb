use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::Json;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use flowgate_core::{CustomKeyAuth, GatewayService};
use flowgate_provider_core::ProxyResponse;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{Dialect, auth_error, body_too_large, gateway_error, openai_error};

#[derive(Clone)]
pub struct ProxyState {
    pub service: Arc<GatewayService>,
}

/// Rejects callers without the configured key. `/health` stays open.
pub async fn custom_key_auth(
    State(auth): State<Option<Arc<CustomKeyAuth>>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(auth) = auth else {
        return next.run(req).await;
    };
    if req.uri().path() == "/health" {
        return next.run(req).await;
    }
    match auth.authenticate(req.headers()) {
        Ok(()) => next.run(req).await,
        Err(err) => {
            debug!(path = %req.uri().path(), error = %err, "caller rejected");
            auth_error(&err)
        }
    }
}

fn read_body(body: Result<Bytes, BytesRejection>) -> Result<Bytes, Response> {
    body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            body_too_large()
        } else {
            openai_error(rejection.status().as_u16(), rejection.body_text())
        }
    })
}

pub(crate) async fn chat_completions(
    State(state): State<ProxyState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match read_body(body) {
        Ok(body) => body,
        Err(response) => return response,
    };
    match state.service.chat_completions(&body).await {
        Ok(response) => to_axum_response(response),
        Err(err) => {
            warn!(status = err.status(), error = %err, "chat completion failed");
            gateway_error(Dialect::OpenAi, &err)
        }
    }
}

pub(crate) async fn messages(
    State(state): State<ProxyState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match read_body(body) {
        Ok(body) => body,
        Err(response) => return response,
    };
    match state.service.messages(&body).await {
        Ok(response) => to_axum_response(response),
        Err(err) => {
            warn!(status = err.status(), error = %err, "messages call failed");
            gateway_error(Dialect::Claude, &err)
        }
    }
}

pub(crate) async fn count_tokens(
    State(state): State<ProxyState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match read_body(body) {
        Ok(body) => body,
        Err(response) => return response,
    };
    Json(json!({"input_tokens": state.service.count_tokens(&body)})).into_response()
}

pub(crate) async fn event_logging() -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "logged": true}))
}

fn to_axum_response(resp: ProxyResponse) -> Response {
    match resp {
        ProxyResponse::Json { status, body } => {
            (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
        }
        ProxyResponse::Stream { status, body } => {
            let content_type = body.content_type;
            let mut response = Response::new(Body::from_stream(body.stream));
            *response.status_mut() = status;
            let headers = response.headers_mut();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
            // Keeps reverse proxies from buffering the event stream.
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            headers.insert(
                HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            );
            response
        }
    }
}
