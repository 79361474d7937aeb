/// A caller request that cannot be translated.
///
/// The router maps each variant into the caller's own error envelope.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid JSON: {0}")]
    Malformed(String),
    #[error("Field required: messages")]
    MissingMessages,
    #[error("Invalid request: {0}")]
    InvalidField(String),
}

impl ClientError {
    pub fn status(&self) -> u16 {
        match self {
            ClientError::Malformed(_) | ClientError::InvalidField(_) => 400,
            ClientError::MissingMessages => 422,
        }
    }
}
