//! Canonical request → upstream body or caller dialect.

mod claude;
mod upstream;

pub use claude::encode_claude_request;
pub use upstream::{UpstreamOptions, encode_upstream, encode_upstream_messages};
