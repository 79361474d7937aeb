use flowgate_provider_core::UpstreamFailure;
use flowgate_provider_impl::ProviderError;
use flowgate_transform::ClientError;

/// Everything a chat call can fail with once it reaches the gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Upstream(#[from] UpstreamFailure),
    /// A 2xx answer that is not a chat completion.
    #[error("{0}")]
    InvalidUpstream(String),
    #[error("concurrency gate closed")]
    GateClosed,
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status for the caller-facing envelope.
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::Client(err) => err.status(),
            GatewayError::Upstream(failure) => failure.status().unwrap_or(500),
            GatewayError::InvalidUpstream(_)
            | GatewayError::GateClosed
            | GatewayError::Internal(_) => 500,
        }
    }

    /// Caller-facing message; upstream failures carry the vendor's text.
    pub fn message(&self) -> String {
        match self {
            GatewayError::Upstream(failure) => failure.message(),
            other => other.to_string(),
        }
    }
}

impl From<ProviderError> for GatewayError {
    fn from(value: ProviderError) -> Self {
        match value {
            ProviderError::Encode(err) => GatewayError::Internal(err.to_string()),
            ProviderError::Upstream(failure) => GatewayError::Upstream(failure),
        }
    }
}
