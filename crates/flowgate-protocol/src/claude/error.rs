use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorType {
    /// 400
    #[serde(rename = "invalid_request_error")]
    InvalidRequestError,
    /// 401
    #[serde(rename = "authentication_error")]
    AuthenticationError,
    /// 403
    #[serde(rename = "permission_error")]
    PermissionError,
    /// 404
    #[serde(rename = "not_found_error")]
    NotFoundError,
    /// 413
    #[serde(rename = "request_too_large")]
    RequestTooLarge,
    /// 429
    #[serde(rename = "rate_limit_error")]
    RateLimitError,
    /// 500
    #[serde(rename = "api_error")]
    ApiError,
    /// 529
    #[serde(rename = "overloaded_error")]
    OverloadedError,
}

impl ErrorType {
    /// Error type for an upstream status the gateway relays.
    pub fn for_upstream_status(status: u16) -> Self {
        match status {
            401 => ErrorType::AuthenticationError,
            403 => ErrorType::PermissionError,
            404 => ErrorType::NotFoundError,
            413 => ErrorType::RequestTooLarge,
            429 => ErrorType::RateLimitError,
            400..=499 => ErrorType::InvalidRequestError,
            _ => ErrorType::ApiError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub r#type: ErrorType,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always `"error"`.
    #[serde(rename = "type")]
    pub r#type: String,
    pub error: ErrorDetail,
}

impl ErrorResponse {
    pub fn new(r#type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            r#type: "error".to_string(),
            error: ErrorDetail {
                r#type,
                message: message.into(),
            },
        }
    }
}
