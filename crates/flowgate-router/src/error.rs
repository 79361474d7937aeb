use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use flowgate_core::{AuthError, GatewayError};
use flowgate_protocol::claude::error::{ErrorResponse as ClaudeError, ErrorType};
use flowgate_protocol::openai::error::ErrorResponse as OpenAiError;

/// Which caller dialect an error envelope is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAi,
    Claude,
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn openai_type(status: u16) -> &'static str {
    match status {
        401 => "authentication_error",
        403 => "permission_error",
        404 => "not_found_error",
        429 => "rate_limit_error",
        400..=499 => "invalid_request_error",
        _ => "api_error",
    }
}

pub fn openai_error(status: u16, message: impl Into<String>) -> Response {
    let body = OpenAiError::for_status(status, openai_type(status), message);
    (status_code(status), Json(body)).into_response()
}

pub fn gateway_error(dialect: Dialect, err: &GatewayError) -> Response {
    match dialect {
        Dialect::OpenAi => openai_error(err.status(), err.message()),
        Dialect::Claude => claude_gateway_error(err),
    }
}

fn claude_gateway_error(err: &GatewayError) -> Response {
    let (status, kind) = match err {
        GatewayError::Client(client) => (client.status(), ErrorType::InvalidRequestError),
        GatewayError::Upstream(failure) => match failure.status() {
            Some(status) if status < 500 => (status, ErrorType::for_upstream_status(status)),
            _ => (500, ErrorType::ApiError),
        },
        GatewayError::InvalidUpstream(_) | GatewayError::GateClosed | GatewayError::Internal(_) => {
            (500, ErrorType::ApiError)
        }
    };
    (
        status_code(status),
        Json(ClaudeError::new(kind, err.message())),
    )
        .into_response()
}

pub fn auth_error(err: &AuthError) -> Response {
    let body = OpenAiError::with_code("authentication_error", err.to_string(), Some(err.code().into()));
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

pub fn body_too_large() -> Response {
    let body = OpenAiError::with_code("invalid_request_error", "Request body too large", None);
    (StatusCode::PAYLOAD_TOO_LARGE, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use flowgate_provider_core::{UpstreamFailure, UpstreamTransportErrorKind};

    fn upstream(status: u16) -> GatewayError {
        GatewayError::Upstream(UpstreamFailure::Http {
            status,
            headers: Vec::new(),
            body: Bytes::from_static(br#"{"msg":"vendor says no"}"#),
        })
    }

    #[test]
    fn claude_envelope_follows_upstream_status_class() {
        assert_eq!(claude_gateway_error(&upstream(429)).status(), 429);
        assert_eq!(claude_gateway_error(&upstream(401)).status(), 401);
        assert_eq!(claude_gateway_error(&upstream(503)).status(), 500);
        let transport = GatewayError::Upstream(UpstreamFailure::transport(
            UpstreamTransportErrorKind::Timeout,
            "timed out",
        ));
        assert_eq!(claude_gateway_error(&transport).status(), 500);
    }

    #[test]
    fn openai_envelope_keeps_upstream_status() {
        assert_eq!(gateway_error(Dialect::OpenAi, &upstream(429)).status(), 429);
        assert_eq!(openai_type(429), "rate_limit_error");
        assert_eq!(openai_type(422), "invalid_request_error");
        assert_eq!(openai_type(502), "api_error");
    }
}
