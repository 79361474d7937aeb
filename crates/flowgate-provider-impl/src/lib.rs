//! The iFlow provider: the official client's wire fingerprint, telemetry,
//! OAuth, background credential refresh and the chat call itself.
//!
//! All IO goes through [`flowgate_provider_core::UpstreamClient`], so the
//! whole crate runs against an in-process fake in tests.

pub mod constants;
pub mod fingerprint;
pub mod oauth;
pub mod provider;
pub mod refresher;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use fingerprint::{ConversationContext, TraceContext, sign};
pub use oauth::{
    IflowOAuth, OAuthError, TokenSet, UserInfo, authorize_url, new_state, parse_callback,
};
pub use provider::{CallContext, ChatDispatch, IflowProvider, ProviderError};
pub use refresher::{
    CredentialRefresher, RefreshError, RefreshOutcome, RefreshSettings, RefreshStatus,
};
pub use store::SettingsFileStore;
pub use telemetry::Telemetry;
