use flowgate_common::GatewayConfig;
use http::HeaderMap;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing {header} header")]
    Missing { header: String },
    #[error("Invalid API key")]
    Invalid,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Missing { .. } => "missing_api_key",
            AuthError::Invalid => "invalid_api_key",
        }
    }
}

/// The optional shared key callers must present.
#[derive(Clone)]
pub struct CustomKeyAuth {
    header: String,
    digest: [u8; 32],
}

impl std::fmt::Debug for CustomKeyAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomKeyAuth")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl CustomKeyAuth {
    pub fn new(header: impl Into<String>, key: &str) -> Self {
        Self {
            header: header.into(),
            digest: digest(key),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Option<Self> {
        config
            .custom_api_key
            .as_deref()
            .map(|key| Self::new(config.custom_auth_header.clone(), key))
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    /// Accepts `Bearer <key>` or the bare key.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        let value = headers
            .get(self.header.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AuthError::Missing {
                header: self.header.clone(),
            })?;
        let presented = strip_bearer(value);
        if constant_time_eq(&digest(presented), &self.digest) {
            Ok(())
        } else {
            Err(AuthError::Invalid)
        }
    }
}

fn strip_bearer(value: &str) -> &str {
    match value.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => value[7..].trim(),
        _ => value,
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

// Digests are fixed-length, so the comparison never depends on key length.
fn constant_time_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
