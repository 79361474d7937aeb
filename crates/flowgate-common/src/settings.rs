use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::warn;

use crate::error::ConfigError;

pub const DEFAULT_BASE_URL: &str = "https://apis.iflow.cn/v1";

/// `~/.iflow/settings.json`, shared with the vendor CLI.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".iflow").join("settings.json"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthType {
    OauthIflow,
    ApiKey,
    OpenaiCompatible,
    Other(String),
}

impl AuthType {
    pub fn parse(value: &str) -> Self {
        match value {
            "oauth-iflow" => Self::OauthIflow,
            "api-key" => Self::ApiKey,
            "openai-compatible" => Self::OpenaiCompatible,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::OauthIflow => "oauth-iflow",
            Self::ApiKey => "api-key",
            Self::OpenaiCompatible => "openai-compatible",
            Self::Other(value) => value,
        }
    }
}

/// The vendor CLI's settings file.
///
/// Only the keys below are interpreted; everything else in the file is kept
/// and written back untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IflowSettings {
    pub api_key: String,
    pub base_url: String,
    pub model_name: Option<String>,
    pub cna: Option<String>,
    pub auth_type: Option<AuthType>,
    pub oauth_access_token: Option<String>,
    pub oauth_refresh_token: Option<String>,
    pub oauth_expires_at: Option<OffsetDateTime>,
    raw: Map<String, Value>,
}

impl IflowSettings {
    /// Reads the file for a running gateway. A missing file or key is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::SettingsNotFound(path.to_path_buf()));
        }
        let settings = Self::read(path)?;
        if settings.api_key.is_empty() {
            return Err(ConfigError::MissingApiKey(path.to_path_buf()));
        }
        match &settings.auth_type {
            Some(AuthType::OpenaiCompatible) => {
                warn!("settings use openai-compatible auth; some models may be unavailable");
            }
            Some(AuthType::Other(other)) if !other.is_empty() => {
                warn!(auth_type = %other, "unknown auth type in settings");
            }
            _ => {}
        }
        Ok(settings)
    }

    /// Reads whatever is there. A missing file yields empty settings.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::from_map(Map::new()));
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let map: Map<String, Value> =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_map(map))
    }

    pub fn from_map(raw: Map<String, Value>) -> Self {
        let text = |key: &str| {
            raw.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .filter(|value| !value.is_empty())
        };
        let api_key = text("apiKey")
            .or_else(|| text("searchApiKey"))
            .unwrap_or_default();
        let base_url = text("baseUrl").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let oauth_expires_at = text("oauth_expires_at").and_then(|value| parse_expiry(&value));

        Self {
            api_key,
            base_url,
            model_name: text("modelName"),
            cna: text("cna"),
            auth_type: text("selectedAuthType").map(|value| AuthType::parse(&value)),
            oauth_access_token: text("oauth_access_token"),
            oauth_refresh_token: text("oauth_refresh_token"),
            oauth_expires_at,
            raw,
        }
    }

    /// Writes known keys over the original document and saves it.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(&Value::Object(self.to_map()))
            .map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        std::fs::write(path, json).map_err(io_err)
    }

    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = self.raw.clone();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                map.insert(key.to_string(), Value::String(value));
            }
        };
        put("apiKey", Some(self.api_key.clone()).filter(|v| !v.is_empty()));
        put("baseUrl", Some(self.base_url.clone()).filter(|v| !v.is_empty()));
        put("modelName", self.model_name.clone());
        put("cna", self.cna.clone());
        put(
            "selectedAuthType",
            self.auth_type.as_ref().map(|value| value.as_str().to_string()),
        );
        put("oauth_access_token", self.oauth_access_token.clone());
        put("oauth_refresh_token", self.oauth_refresh_token.clone());
        put(
            "oauth_expires_at",
            self.oauth_expires_at
                .and_then(|value| value.format(&Rfc3339).ok()),
        );
        map
    }
}

/// Parses an ISO-8601 instant. Values without an offset are taken as UTC.
pub fn parse_expiry(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();
    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(parsed);
    }
    let normalized = if value.len() > 10 && value.as_bytes()[10] == b' ' {
        format!("{}T{}", &value[..10], &value[11..])
    } else {
        value.to_string()
    };
    let naive = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    PrimitiveDateTime::parse(&normalized, naive)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}
