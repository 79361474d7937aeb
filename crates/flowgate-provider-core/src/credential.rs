use std::time::Duration;

use flowgate_common::{AuthType, ConfigError, IflowSettings};
use time::OffsetDateTime;

/// The upstream credential as one immutable value.
///
/// Readers hold an `Arc<Credential>`; a refresh builds a new value and swaps
/// it in whole.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    /// Key used for `Authorization` and request signing.
    pub api_key: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub auth_type: Option<AuthType>,
    pub expires_at: Option<OffsetDateTime>,
}

impl Credential {
    pub fn from_settings(settings: &IflowSettings) -> Self {
        Self {
            api_key: settings.api_key.clone(),
            access_token: settings.oauth_access_token.clone(),
            refresh_token: settings.oauth_refresh_token.clone(),
            auth_type: settings.auth_type.clone(),
            expires_at: settings.oauth_expires_at,
        }
    }

    /// Writes the credential fields into a settings document.
    pub fn apply_to(&self, settings: &mut IflowSettings) {
        settings.api_key = self.api_key.clone();
        settings.oauth_access_token = self.access_token.clone();
        settings.oauth_refresh_token = self.refresh_token.clone();
        settings.auth_type = self.auth_type.clone();
        settings.oauth_expires_at = self.expires_at;
    }

    pub fn is_usable(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// OAuth credential with both a refresh token and an expiry.
    pub fn can_refresh(&self) -> bool {
        matches!(self.auth_type, Some(AuthType::OauthIflow))
            && self
                .refresh_token
                .as_deref()
                .is_some_and(|token| !token.is_empty())
            && self.expires_at.is_some()
    }

    /// Seconds until expiry, negative once expired.
    pub fn seconds_until_expiry(&self, now: OffsetDateTime) -> Option<i64> {
        self.expires_at
            .map(|expires_at| (expires_at - now).whole_seconds())
    }

    /// Expired, or expiring within `buffer`.
    pub fn needs_refresh(&self, now: OffsetDateTime, buffer: Duration) -> bool {
        if !self.can_refresh() {
            return false;
        }
        match self.seconds_until_expiry(now) {
            Some(remaining) => remaining <= buffer.as_secs() as i64,
            None => false,
        }
    }
}

/// The settings collaborator the gateway reads from and writes refreshed
/// credentials to.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<(Credential, IflowSettings), ConfigError>;

    fn save(&self, credential: &Credential) -> Result<(), ConfigError>;
}
