//! Wire types for the two caller dialects and the upstream chat API.
//!
//! The upstream speaks the OpenAI chat-completions shape, so the `openai`
//! module doubles as the upstream wire format.

pub mod claude;
pub mod openai;
pub mod sse;
