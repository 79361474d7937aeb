//! Dialect translation between the OpenAI chat-completions dialect, the
//! Anthropic messages dialect and the upstream's native chat body.
//!
//! Everything here is pure: bytes and typed values in, bytes and typed values
//! out. Transport, signing and admission control live in other crates.

pub mod body;
pub mod canonical;
pub mod count_tokens;
pub mod decode;
pub mod encode;
pub mod error;
pub mod ids;
pub mod model_rules;
pub mod reasoning;
pub mod response;
pub mod stream;

pub use canonical::{
    CanonicalMessage, ChatRequest, ContentPart, Dialect, ImageSource, Role, Sampling, ToolChoice,
    ToolDef,
};
pub use error::ClientError;
pub use model_rules::{ModelCatalogue, ModelRules};
