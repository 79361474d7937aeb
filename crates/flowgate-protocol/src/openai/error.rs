use serde::{Deserialize, Serialize};

/// Error envelope returned on the chat-completions surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub r#type: String,
    /// Always serialised, `null` when unset.
    pub param: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    /// Envelope whose `code` is the HTTP status rendered as a string.
    pub fn for_status(status: u16, r#type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_code(r#type, message, Some(status.to_string()))
    }

    pub fn with_code(
        r#type: impl Into<String>,
        message: impl Into<String>,
        code: Option<String>,
    ) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                r#type: r#type.into(),
                param: None,
                code,
            },
        }
    }
}
