//! Background refresh of the OAuth-derived credential.
//!
//! The refresher owns no shared credential. It reads the current one from
//! the settings store, and on success persists a new [`Credential`] and
//! sends it down a single update channel that the gateway observes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flowgate_common::AuthType;
use flowgate_provider_core::{Credential, CredentialStore};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::oauth::{IflowOAuth, OAuthError, UserInfo};

pub const CHECK_INTERVAL: Duration = Duration::from_secs(6 * 3600);
pub const REFRESH_BUFFER: Duration = Duration::from_secs(24 * 3600);
pub const RETRY_COUNT: u32 = 5;
pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(30);
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(300);

const TRANSIENT_MARKERS: [&str; 8] = [
    "overload",
    "timeout",
    "timed out",
    "connect",
    "502",
    "503",
    "429",
    "too many",
];
const TERMINAL_MARKERS: [&str; 3] = ["invalid_grant", "invalid_token", "expired"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    pub check_interval: Duration,
    /// Refresh once the remaining lifetime drops below this.
    pub buffer: Duration,
    pub retry_count: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            check_interval: CHECK_INTERVAL,
            buffer: REFRESH_BUFFER,
            retry_count: RETRY_COUNT,
            base_delay: RETRY_BASE_DELAY,
            max_delay: RETRY_MAX_DELAY,
        }
    }
}

impl RefreshSettings {
    /// Delay after failed attempt `attempt` (1-based): doubling, capped.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    /// Worth retrying; the current credential is still good.
    #[error("refresh temporarily unavailable: {0}")]
    Transient(String),
    /// The user has to log in again.
    #[error("re-authentication required: {0}")]
    Terminal(String),
}

impl RefreshError {
    /// Transport failures, 5xx, 429 and overload answers are transient.
    /// Rejections carrying only a message go through [`Self::classify`];
    /// everything else needs a new login.
    pub fn from_oauth(err: &OAuthError) -> Self {
        let message = err.to_string();
        match err {
            OAuthError::Transport(_) | OAuthError::Overloaded(_) => Self::Transient(message),
            OAuthError::Http { status, .. } if *status >= 500 || *status == 429 => {
                Self::Transient(message)
            }
            OAuthError::Rejected(_) => Self::classify(&message),
            _ => Self::Terminal(message),
        }
    }

    /// Transient markers win over terminal ones; anything unrecognised is
    /// terminal.
    pub fn classify(message: &str) -> Self {
        let lowered = message.to_lowercase();
        if lowered.contains("太多")
            || TRANSIENT_MARKERS.iter().any(|marker| lowered.contains(marker))
        {
            return Self::Transient(message.to_string());
        }
        if TERMINAL_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            debug!("refresh failure names an invalid grant");
        }
        Self::Terminal(message.to_string())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Refreshed {
        expires_at: Option<String>,
    },
    Failed {
        transient: bool,
        message: String,
        attempts: u32,
    },
}

/// Snapshot for the admin stats accessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshStatus {
    pub running: bool,
    pub has_refresh_token: bool,
    pub expires_at: Option<String>,
    pub seconds_until_expiry: Option<i64>,
    pub needs_refresh: bool,
    pub failure_count: u32,
    pub last_failure_time: Option<String>,
    pub last_outcome: Option<RefreshOutcome>,
}

#[derive(Debug, Default)]
struct RefreshState {
    last_seen: Option<Credential>,
    failure_count: u32,
    last_failure_time: Option<OffsetDateTime>,
    last_outcome: Option<RefreshOutcome>,
}

fn rfc3339(value: OffsetDateTime) -> Option<String> {
    value.format(&Rfc3339).ok()
}

pub struct CredentialRefresher {
    oauth: IflowOAuth,
    store: Arc<dyn CredentialStore>,
    settings: RefreshSettings,
    updates: mpsc::Sender<Arc<Credential>>,
    in_progress: tokio::sync::Mutex<()>,
    running: AtomicBool,
    state: Mutex<RefreshState>,
}

impl CredentialRefresher {
    /// Returns the refresher and the receiving end of its update channel.
    pub fn new(
        oauth: IflowOAuth,
        store: Arc<dyn CredentialStore>,
        settings: RefreshSettings,
    ) -> (Self, mpsc::Receiver<Arc<Credential>>) {
        let (updates, rx) = mpsc::channel(4);
        let refresher = Self {
            oauth,
            store,
            settings,
            updates,
            in_progress: tokio::sync::Mutex::new(()),
            running: AtomicBool::new(false),
            state: Mutex::new(RefreshState::default()),
        };
        (refresher, rx)
    }

    pub fn settings(&self) -> &RefreshSettings {
        &self.settings
    }

    /// Runs the periodic check on the current runtime, or on a dedicated
    /// thread with its own runtime when called outside one.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(self.run(shutdown));
            }
            Err(_) => {
                let spawned = std::thread::Builder::new()
                    .name("credential-refresher".to_string())
                    .spawn(move || {
                        match tokio::runtime::Builder::new_current_thread()
                            .enable_all()
                            .build()
                        {
                            Ok(runtime) => runtime.block_on(self.run(shutdown)),
                            Err(err) => error!(error = %err, "refresher runtime failed to start"),
                        }
                    });
                if let Err(err) = spawned {
                    error!(error = %err, "refresher thread failed to start");
                }
            }
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        self.running.store(true, Ordering::SeqCst);
        info!(
            interval_hours = self.settings.check_interval.as_secs() / 3600,
            "credential refresher started"
        );
        loop {
            self.check_once().await;
            tokio::select! {
                _ = tokio::time::sleep(self.settings.check_interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        self.running.store(false, Ordering::SeqCst);
        info!("credential refresher stopped");
    }

    /// One scheduled check. `None` when nothing needed doing.
    pub async fn check_once(&self) -> Option<RefreshOutcome> {
        let credential = match self.store.load() {
            Ok((credential, _)) => credential,
            Err(err) => {
                warn!(error = %err, "credential check skipped; settings unreadable");
                return None;
            }
        };
        self.remember(&credential);
        let now = OffsetDateTime::now_utc();
        if !credential.needs_refresh(now, self.settings.buffer) {
            debug!(
                seconds_until_expiry = credential.seconds_until_expiry(now),
                "credential still fresh"
            );
            return None;
        }
        info!(
            seconds_until_expiry = credential.seconds_until_expiry(now),
            "credential near expiry; refreshing"
        );
        self.refresh(&credential).await
    }

    /// Refreshes with retries. Returns `None` if another refresh is already
    /// running or there is no refresh token.
    pub async fn refresh(&self, credential: &Credential) -> Option<RefreshOutcome> {
        let Ok(_guard) = self.in_progress.try_lock() else {
            debug!("refresh already in progress");
            return None;
        };
        let refresh_token = credential
            .refresh_token
            .clone()
            .filter(|token| !token.is_empty())?;

        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            info!(attempt, max = self.settings.retry_count, "refreshing credential");
            match self.refresh_once(credential, &refresh_token).await {
                Ok(fresh) => break self.on_success(fresh).await,
                Err(RefreshError::Transient(message)) if attempt < self.settings.retry_count => {
                    let delay = self.settings.retry_delay(attempt);
                    warn!(
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %message,
                        "transient refresh failure; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => break self.on_failure(err, attempt),
            }
        };
        Some(outcome)
    }

    async fn refresh_once(
        &self,
        credential: &Credential,
        refresh_token: &str,
    ) -> Result<Credential, RefreshError> {
        let tokens = self
            .oauth
            .refresh(refresh_token)
            .await
            .map_err(|err| RefreshError::from_oauth(&err))?;
        let api_key = match self.oauth.user_info(&tokens.access_token).await {
            Ok(UserInfo {
                api_key: Some(key), ..
            }) => key,
            Ok(_) => tokens.access_token.clone(),
            Err(err) => {
                warn!(error = %err, "user info lookup failed; using the access token as key");
                tokens.access_token.clone()
            }
        };
        Ok(Credential {
            api_key,
            access_token: Some(tokens.access_token),
            refresh_token: tokens.refresh_token.or_else(|| credential.refresh_token.clone()),
            auth_type: Some(AuthType::OauthIflow),
            expires_at: tokens.expires_at.or(credential.expires_at),
        })
    }

    async fn on_success(&self, fresh: Credential) -> RefreshOutcome {
        if let Err(err) = self.store.save(&fresh) {
            warn!(error = %err, "refreshed credential could not be persisted");
        }
        let outcome = RefreshOutcome::Refreshed {
            expires_at: fresh.expires_at.and_then(rfc3339),
        };
        {
            let mut state = self.lock_state();
            state.last_seen = Some(fresh.clone());
            state.failure_count = 0;
            state.last_failure_time = None;
            state.last_outcome = Some(outcome.clone());
        }
        if self.updates.send(Arc::new(fresh)).await.is_err() {
            debug!("no listener for refreshed credential");
        }
        info!("credential refreshed");
        outcome
    }

    fn on_failure(&self, err: RefreshError, attempts: u32) -> RefreshOutcome {
        let transient = err.is_transient();
        if transient {
            warn!(attempts, error = %err, "refresh gave up; current credential kept until the next check");
        } else {
            error!(attempts, error = %err, "refresh failed; log in again");
        }
        let outcome = RefreshOutcome::Failed {
            transient,
            message: err.to_string(),
            attempts,
        };
        let mut state = self.lock_state();
        state.failure_count += 1;
        state.last_failure_time = Some(OffsetDateTime::now_utc());
        state.last_outcome = Some(outcome.clone());
        outcome
    }

    fn remember(&self, credential: &Credential) {
        self.lock_state().last_seen = Some(credential.clone());
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RefreshState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> RefreshStatus {
        let now = OffsetDateTime::now_utc();
        let state = self.lock_state();
        let credential = state.last_seen.as_ref();
        RefreshStatus {
            running: self.is_running(),
            has_refresh_token: credential
                .and_then(|c| c.refresh_token.as_deref())
                .is_some_and(|token| !token.is_empty()),
            expires_at: credential.and_then(|c| c.expires_at).and_then(rfc3339),
            seconds_until_expiry: credential.and_then(|c| c.seconds_until_expiry(now)),
            needs_refresh: credential.is_some_and(|c| c.needs_refresh(now, self.settings.buffer)),
            failure_count: state.failure_count,
            last_failure_time: state.last_failure_time.and_then(rfc3339),
            last_outcome: state.last_outcome.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{OAUTH_TOKEN_URL, OAUTH_USER_INFO_URL};
    use crate::testing::{FakeUpstream, MemoryStore, json_response};

    fn expiring_in(seconds: i64) -> Credential {
        Credential {
            api_key: "sk-old".into(),
            access_token: Some("at-old".into()),
            refresh_token: Some("rt-old".into()),
            auth_type: Some(AuthType::OauthIflow),
            expires_at: Some(OffsetDateTime::now_utc() + time::Duration::seconds(seconds)),
        }
    }

    fn token_endpoint(status: u16, body: &'static str) -> Arc<FakeUpstream> {
        FakeUpstream::new(move |req| {
            if req.url == OAUTH_TOKEN_URL {
                Ok(json_response(status, body))
            } else if req.url.starts_with(OAUTH_USER_INFO_URL) {
                Ok(json_response(200, r#"{"success":true,"data":{"apiKey":"sk-new"}}"#))
            } else {
                Ok(json_response(404, "{}"))
            }
        })
    }

    fn refresher(
        fake: &Arc<FakeUpstream>,
        store: &Arc<MemoryStore>,
    ) -> (CredentialRefresher, mpsc::Receiver<Arc<Credential>>) {
        CredentialRefresher::new(
            IflowOAuth::new(fake.clone()),
            store.clone(),
            RefreshSettings::default(),
        )
    }

    fn token_calls(fake: &FakeUpstream) -> Vec<tokio::time::Instant> {
        let requests = fake.requests.lock().unwrap();
        let sent_at = fake.sent_at.lock().unwrap();
        requests
            .iter()
            .zip(sent_at.iter())
            .filter(|(req, _)| req.url == OAUTH_TOKEN_URL)
            .map(|(_, at)| *at)
            .collect()
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let settings = RefreshSettings::default();
        let delays: Vec<u64> = (1..=5).map(|n| settings.retry_delay(n).as_secs()).collect();
        assert_eq!(delays, vec![30, 60, 120, 240, 300]);
    }

    #[test]
    fn classification() {
        assert!(RefreshError::classify("server overloaded: busy").is_transient());
        assert!(RefreshError::classify("upstream transport error (Timeout): x").is_transient());
        assert!(RefreshError::classify("HTTP 503").is_transient());
        assert!(!RefreshError::classify("invalid_grant: refresh token expired").is_transient());
        assert!(!RefreshError::classify("something else").is_transient());
    }

    #[test]
    fn typed_oauth_errors_classify_by_kind() {
        use flowgate_provider_core::{UpstreamFailure, UpstreamTransportErrorKind};

        let http = |status: u16, message: &str| OAuthError::Http {
            status,
            message: message.to_string(),
        };
        for transient in [
            http(500, "HTTP 500"),
            http(504, "gateway"),
            http(429, "slow down"),
            OAuthError::Overloaded("busy".into()),
            OAuthError::Transport(UpstreamFailure::transport(
                UpstreamTransportErrorKind::Dns,
                "error sending request for url (https://iflow.cn/oauth/token)",
            )),
            OAuthError::Transport(UpstreamFailure::transport(
                UpstreamTransportErrorKind::Tls,
                "handshake failure",
            )),
            OAuthError::Rejected("too many requests".into()),
        ] {
            assert!(RefreshError::from_oauth(&transient).is_transient(), "{transient}");
        }
        for terminal in [
            OAuthError::InvalidGrant,
            OAuthError::InvalidToken,
            http(401, "unauthorized"),
            OAuthError::Rejected("account disabled".into()),
            OAuthError::MissingAccessToken,
        ] {
            assert!(!RefreshError::from_oauth(&terminal).is_transient(), "{terminal}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn server_error_is_retried() {
        let fake = token_endpoint(500, "");
        let store = MemoryStore::new(expiring_in(60));
        let (refresher, _rx) = refresher(&fake, &store);

        let outcome = refresher.check_once().await.unwrap();
        assert!(matches!(
            outcome,
            RefreshOutcome::Failed { transient: true, attempts: RETRY_COUNT, .. }
        ));
        assert_eq!(token_calls(&fake).len(), RETRY_COUNT as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn near_expiry_refreshes_once_and_publishes() {
        let fake = token_endpoint(
            200,
            r#"{"access_token":"at-new","refresh_token":"rt-new","expires_in":172800}"#,
        );
        let store = MemoryStore::new(expiring_in(3600));
        let (refresher, mut updates) = refresher(&fake, &store);

        let outcome = refresher.check_once().await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Refreshed { expires_at: Some(_) }));
        assert_eq!(token_calls(&fake).len(), 1);

        let published = updates.try_recv().unwrap();
        assert_eq!(published.api_key, "sk-new");
        assert_eq!(published.refresh_token.as_deref(), Some("rt-new"));
        assert_eq!(store.saves.lock().unwrap().len(), 1);

        // The saved credential is now two days out: the next check is a no-op.
        assert_eq!(refresher.check_once().await, None);
        assert_eq!(token_calls(&fake).len(), 1);
        let status = refresher.status();
        assert!(!status.needs_refresh);
        assert_eq!(status.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_or_api_key_credentials_are_left_alone() {
        let fake = token_endpoint(200, "{}");
        let store = MemoryStore::new(expiring_in(3 * 24 * 3600));
        let (fresh, _rx) = refresher(&fake, &store);
        assert_eq!(fresh.check_once().await, None);

        let mut api_key = expiring_in(-10);
        api_key.auth_type = Some(AuthType::ApiKey);
        let store = MemoryStore::new(api_key);
        let (keyed, _rx) = refresher(&fake, &store);
        assert_eq!(keyed.check_once().await, None);
        assert!(fake.requests.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_then_stop() {
        let fake = token_endpoint(503, "service unavailable");
        let store = MemoryStore::new(expiring_in(60));
        let (refresher, mut updates) = refresher(&fake, &store);

        let outcome = refresher.check_once().await.unwrap();
        assert_eq!(
            outcome,
            RefreshOutcome::Failed {
                transient: true,
                message: "refresh temporarily unavailable: oauth endpoint returned HTTP 503: service unavailable"
                    .to_string(),
                attempts: RETRY_COUNT,
            }
        );

        let calls = token_calls(&fake);
        assert_eq!(calls.len(), RETRY_COUNT as usize);
        let gaps: Vec<Duration> = calls.windows(2).map(|pair| pair[1] - pair[0]).collect();
        assert!(gaps.windows(2).all(|pair| pair[1] > pair[0]), "{gaps:?}");
        assert_eq!(gaps[0], RETRY_BASE_DELAY);

        assert!(updates.try_recv().is_err());
        let status = refresher.status();
        assert_eq!(status.failure_count, 1);
        assert!(status.last_failure_time.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_grant_stops_immediately() {
        let fake = token_endpoint(400, r#"{"error":"invalid_grant"}"#);
        let store = MemoryStore::new(expiring_in(-5));
        let (refresher, _rx) = refresher(&fake, &store);

        let outcome = refresher.check_once().await.unwrap();
        assert!(matches!(
            outcome,
            RefreshOutcome::Failed { transient: false, attempts: 1, .. }
        ));
        assert_eq!(token_calls(&fake).len(), 1);
        assert!(store.saves.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_checks_on_interval_until_shutdown() {
        let fake = token_endpoint(200, "{}");
        let store = MemoryStore::new(expiring_in(3 * 24 * 3600));
        let (refresher, _rx) = refresher(&fake, &store);
        let refresher = Arc::new(refresher);
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(refresher.clone().run(stop_rx));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(refresher.is_running());
        stop_tx.send(true).unwrap();
        task.await.unwrap();
        assert!(!refresher.is_running());
        assert!(refresher.status().expires_at.is_some());
    }
}
