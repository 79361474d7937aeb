//! Upstream-facing abstractions shared by the provider and the gateway.
//!
//! This crate does **not** depend on axum or any concrete HTTP client. The
//! provider builds `UpstreamHttpRequest` values and an `UpstreamClient`
//! implementation in a higher layer performs the IO.

pub mod credential;
pub mod failure;
pub mod gate;
pub mod headers;
pub mod response;
pub mod upstream;

pub use credential::{Credential, CredentialStore};
pub use failure::{UpstreamFailure, UpstreamTransportErrorKind, upstream_error_message};
pub use gate::{ConcurrencyGate, GateClosed, GatePermit};
pub use headers::{Headers, header_get, header_remove, header_set};
pub use response::{ProxyResponse, StreamBody};
pub use upstream::{
    ByteStream, HttpMethod, UpstreamBody, UpstreamClient, UpstreamHttpRequest,
    UpstreamHttpResponse,
};
