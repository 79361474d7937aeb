use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use bytes::Bytes;
use flowgate_provider_core::{
    Headers, UpstreamClient, UpstreamFailure, UpstreamHttpRequest, upstream_error_message,
};
use rand::RngCore;
use serde::Deserialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::debug;

use crate::constants::{
    IFLOW_CLI_USER_AGENT, OAUTH_AUTHORIZE_URL, OAUTH_CLIENT_ID, OAUTH_CLIENT_SECRET,
    OAUTH_TOKEN_URL, OAUTH_USER_INFO_URL,
};
use crate::fingerprint::user_info_headers;

const OAUTH_TIMEOUT: Duration = Duration::from_secs(30);
const KEY_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error(transparent)]
    Transport(#[from] UpstreamFailure),
    #[error("invalid_grant: refresh token invalid or expired")]
    InvalidGrant,
    #[error("invalid_token: access token invalid or expired")]
    InvalidToken,
    #[error("server overloaded: {0}")]
    Overloaded(String),
    #[error("oauth refresh rejected: {0}")]
    Rejected(String),
    #[error("oauth endpoint returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("oauth response missing access_token")]
    MissingAccessToken,
    #[error("user info unavailable: {0}")]
    UserInfo(String),
    #[error("malformed oauth response: {0}")]
    Decode(String),
}

/// Tokens from a successful grant.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserInfo {
    pub api_key: Option<String>,
    pub data: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<Value>,
}

/// Client for the vendor's OAuth endpoints.
#[derive(Clone)]
pub struct IflowOAuth {
    client: Arc<dyn UpstreamClient>,
}

impl IflowOAuth {
    pub fn new(client: Arc<dyn UpstreamClient>) -> Self {
        Self { client }
    }

    /// Browser URL that starts the phone-login flow.
    pub fn auth_url(&self, redirect_uri: &str, state: &str) -> String {
        authorize_url(redirect_uri, state)
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, OAuthError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", OAUTH_CLIENT_ID),
            ("client_secret", OAUTH_CLIENT_SECRET),
        ])
        .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, OAuthError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("client_id", OAUTH_CLIENT_ID),
            ("client_secret", OAUTH_CLIENT_SECRET),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet, OAuthError> {
        let body = serde_urlencoded::to_string(form)
            .map_err(|err| OAuthError::Decode(err.to_string()))?;
        let basic = base64::engine::general_purpose::STANDARD
            .encode(format!("{OAUTH_CLIENT_ID}:{OAUTH_CLIENT_SECRET}"));
        let headers: Headers = vec![
            (
                "Content-Type".into(),
                "application/x-www-form-urlencoded".into(),
            ),
            ("Accept".into(), "application/json".into()),
            ("Authorization".into(), format!("Basic {basic}")),
            ("User-Agent".into(), IFLOW_CLI_USER_AGENT.into()),
        ];
        let request =
            UpstreamHttpRequest::post(OAUTH_TOKEN_URL, headers, body).with_timeout(OAUTH_TIMEOUT);
        let response = self.client.send(request).await?;
        let status = response.status;
        let bytes = response.into_bytes().await;
        if status == 400 && is_invalid_grant(&bytes) {
            return Err(OAuthError::InvalidGrant);
        }
        if !(200..300).contains(&status) {
            return Err(OAuthError::Http {
                status,
                message: upstream_error_message(status, &bytes),
            });
        }
        parse_token_response(&bytes)
    }

    /// Looks up the account behind an access token; `apiKey` is the chat key.
    pub async fn user_info(&self, access_token: &str) -> Result<UserInfo, OAuthError> {
        let url = format!(
            "{OAUTH_USER_INFO_URL}?accessToken={}",
            urlencoding::encode(access_token)
        );
        let request =
            UpstreamHttpRequest::get(url, user_info_headers(OAUTH_USER_INFO_URL))
                .with_timeout(OAUTH_TIMEOUT);
        let response = self.client.send(request).await?;
        let status = response.status;
        let bytes = response.into_bytes().await;
        if status == 401 {
            return Err(OAuthError::InvalidToken);
        }
        if !(200..300).contains(&status) {
            return Err(OAuthError::Http {
                status,
                message: upstream_error_message(status, &bytes),
            });
        }
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|err| OAuthError::Decode(err.to_string()))?;
        let success = value.get("success").and_then(Value::as_bool) == Some(true);
        match value.get("data") {
            Some(Value::Object(data)) if success => Ok(UserInfo {
                api_key: data
                    .get("apiKey")
                    .and_then(Value::as_str)
                    .filter(|key| !key.is_empty())
                    .map(str::to_string),
                data: data.clone(),
            }),
            _ => Err(OAuthError::UserInfo(
                value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("no data in response")
                    .to_string(),
            )),
        }
    }

    /// `GET {base}/models` with the key. `Ok(false)` means the upstream
    /// rejected the key.
    pub async fn check_api_key(&self, base_url: &str, api_key: &str) -> Result<bool, OAuthError> {
        let url = format!("{}/models", base_url.trim_end_matches('/'));
        let headers: Headers = vec![
            ("Authorization".into(), format!("Bearer {api_key}")),
            ("User-Agent".into(), IFLOW_CLI_USER_AGENT.into()),
        ];
        let request = UpstreamHttpRequest::get(url, headers).with_timeout(KEY_CHECK_TIMEOUT);
        let response = self.client.send(request).await?;
        match response.status {
            200 => Ok(true),
            401 | 403 => Ok(false),
            status => {
                let bytes = response.into_bytes().await;
                Err(OAuthError::Http {
                    status,
                    message: upstream_error_message(status, &bytes),
                })
            }
        }
    }
}

fn is_invalid_grant(body: &Bytes) -> bool {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| value.get("error").and_then(Value::as_str).map(str::to_string))
        .is_some_and(|error| error.contains("invalid_grant"))
}

fn parse_token_response(bytes: &[u8]) -> Result<TokenSet, OAuthError> {
    let parsed: TokenResponse =
        serde_json::from_slice(bytes).map_err(|err| OAuthError::Decode(err.to_string()))?;
    if parsed.success == Some(false) {
        let message = parsed.message.unwrap_or_else(|| "unknown error".to_string());
        let code = match &parsed.code {
            Some(Value::String(code)) => code.clone(),
            Some(Value::Number(code)) => code.to_string(),
            _ => String::new(),
        };
        let lowered = message.to_lowercase();
        if message.contains("太多") || lowered.contains("too many") || code == "500" {
            return Err(OAuthError::Overloaded(message));
        }
        return Err(OAuthError::Rejected(message));
    }
    let access_token = parsed
        .access_token
        .filter(|token| !token.is_empty())
        .ok_or(OAuthError::MissingAccessToken)?;
    let expires_at = parsed
        .expires_in
        .map(|seconds| OffsetDateTime::now_utc() + time::Duration::seconds(seconds));
    debug!(has_refresh_token = parsed.refresh_token.is_some(), "oauth grant accepted");
    Ok(TokenSet {
        access_token,
        refresh_token: parsed.refresh_token.filter(|token| !token.is_empty()),
        expires_at,
    })
}

/// Login URL without a client; see [`IflowOAuth::auth_url`].
pub fn authorize_url(redirect_uri: &str, state: &str) -> String {
    format!(
        "{OAUTH_AUTHORIZE_URL}?client_id={OAUTH_CLIENT_ID}&loginMethod=phone&type=phone\
         &redirect={redirect_uri}&state={state}"
    )
}

/// Random `state` value for [`IflowOAuth::auth_url`].
pub fn new_state() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn query_value(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        if name != key {
            return None;
        }
        let decoded = urlencoding::decode(value).ok()?;
        let value = decoded.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Accepts a full callback URL, a bare query string or a bare code, and
/// returns `(code, state)`.
pub fn parse_callback(input: &str) -> (Option<String>, Option<String>) {
    let raw = input.trim();
    if raw.is_empty() {
        return (None, None);
    }
    let query = match raw.find('?') {
        Some(idx) => &raw[idx + 1..],
        None if raw.contains('=') => raw,
        None => return (Some(raw.to_string()), None),
    };
    let query = query.split('#').next().unwrap_or(query);
    (query_value(query, "code"), query_value(query, "state"))
}
