//! Caller dialect → canonical request.

mod claude;
mod openai;

pub use claude::{decode_claude, from_claude_body};
pub use openai::{decode_openai, from_openai_body, parse_tool_arguments};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ClientError;

/// Parses a caller body, telling apart broken JSON, a missing `messages`
/// field and a field of the wrong shape.
pub(crate) fn parse_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ClientError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|err| ClientError::Malformed(err.to_string()))?;
    let Value::Object(map) = &value else {
        return Err(ClientError::Malformed("expected a JSON object".to_string()));
    };
    if map.get("messages").is_none_or(Value::is_null) {
        return Err(ClientError::MissingMessages);
    }
    serde_json::from_value(value).map_err(|err| ClientError::InvalidField(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_errors_are_classified() {
        let err = decode_openai(b"{not json").unwrap_err();
        assert!(matches!(err, ClientError::Malformed(_)));
        assert_eq!(err.status(), 400);

        let err = decode_claude(br#"{"model":"x"}"#).unwrap_err();
        assert!(matches!(err, ClientError::MissingMessages));
        assert_eq!(err.status(), 422);

        let err = decode_openai(br#"{"model":"x","messages":"hi"}"#).unwrap_err();
        assert!(matches!(err, ClientError::InvalidField(_)));

        assert!(matches!(
            decode_openai(b"[1,2]").unwrap_err(),
            ClientError::Malformed(_)
        ));
    }
}
