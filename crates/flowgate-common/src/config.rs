use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::settings::default_settings_path;

/// Models advertised by the models endpoint.
pub const CATALOGUE_MODELS: &[&str] = &[
    "glm-4.6",
    "glm-4.7",
    "glm-5",
    "iFlow-ROME-30BA3B",
    "deepseek-v3.2-chat",
    "qwen3-coder-plus",
    "kimi-k2",
    "kimi-k2-thinking",
    "kimi-k2.5",
    "kimi-k2-0905",
    "minimax-m2.5",
    "qwen-vl-max",
];

/// Vision models the upstream accepts but the catalogue does not list.
pub const VISION_MODELS: &[&str] = &[
    "glm-4v",
    "glm-4v-plus",
    "glm-4v-flash",
    "glm-4.5v",
    "glm-4.6v",
    "moonshot-v1-8k-vision",
    "moonshot-v1-32k-vision",
    "moonshot-v1-128k-vision",
    "qwen-vl-plus",
    "qwen2.5-vl",
    "qwen3-vl",
];

/// A model that accepts image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisionModelInfo {
    pub id: &'static str,
    pub provider: &'static str,
    /// Images accepted in one request.
    pub max_images: u32,
}

/// Models listed by the vision-models endpoint.
pub const VISION_CATALOGUE: &[VisionModelInfo] = &[VisionModelInfo {
    id: "qwen-vl-max",
    provider: "alibaba",
    max_images: 10,
}];

pub fn default_known_models() -> Vec<String> {
    CATALOGUE_MODELS
        .iter()
        .chain(VISION_MODELS.iter())
        .map(|name| name.to_string())
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamBackend {
    #[default]
    Standard,
    Impersonate,
}

impl FromStr for UpstreamBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "standard" | "httpx" | "reqwest" => Ok(Self::Standard),
            "impersonate" | "curl_cffi" | "wreq" => Ok(Self::Impersonate),
            other => Err(ConfigError::InvalidValue {
                field: "upstream_backend",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for UpstreamBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => f.write_str("standard"),
            Self::Impersonate => f.write_str("impersonate"),
        }
    }
}

/// What to do with the upstream's separate reasoning channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningPolicy {
    /// Keep reasoning as its own channel or block.
    #[default]
    Preserve,
    /// Fold reasoning into the answer only when there is no answer.
    Merge,
}

impl FromStr for ReasoningPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "preserve" => Ok(Self::Preserve),
            "merge" => Ok(Self::Merge),
            other => Err(ConfigError::InvalidValue {
                field: "reasoning_policy",
                value: other.to_string(),
            }),
        }
    }
}

/// Final, merged configuration used by the running process.
///
/// Merge order: CLI > ENV > config file > defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Capacity of the upstream concurrency gate.
    pub api_concurrency: usize,
    pub upstream_backend: UpstreamBackend,
    /// Browser profile used by the impersonating backend.
    pub tls_impersonate: String,
    pub upstream_proxy: Option<String>,
    pub upstream_proxy_enabled: bool,
    pub reasoning_policy: ReasoningPolicy,
    /// When set, callers must present this key.
    pub custom_api_key: Option<String>,
    pub custom_auth_header: String,
    /// Target of the unknown-model fallback.
    pub default_model: String,
    /// Names passed through unchanged; everything else maps to `default_model`.
    pub known_models: Vec<String>,
    pub settings_path: PathBuf,
}

impl GatewayConfig {
    /// The proxy actually used for upstream egress, if any.
    pub fn effective_proxy(&self) -> Option<&str> {
        if !self.upstream_proxy_enabled {
            return None;
        }
        self.upstream_proxy
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Optional layer used for merging config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub api_concurrency: Option<usize>,
    pub upstream_backend: Option<UpstreamBackend>,
    pub tls_impersonate: Option<String>,
    pub upstream_proxy: Option<String>,
    pub upstream_proxy_enabled: Option<bool>,
    pub reasoning_policy: Option<ReasoningPolicy>,
    pub custom_api_key: Option<String>,
    pub custom_auth_header: Option<String>,
    pub default_model: Option<String>,
    pub known_models: Option<Vec<String>>,
    pub settings_path: Option<PathBuf>,
}

impl GatewayConfigPatch {
    /// Reads a JSON config file. Unknown keys are ignored.
    pub fn from_json_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn overlay(&mut self, other: GatewayConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.api_concurrency.is_some() {
            self.api_concurrency = other.api_concurrency;
        }
        if other.upstream_backend.is_some() {
            self.upstream_backend = other.upstream_backend;
        }
        if other.tls_impersonate.is_some() {
            self.tls_impersonate = other.tls_impersonate;
        }
        if other.upstream_proxy.is_some() {
            self.upstream_proxy = other.upstream_proxy;
        }
        if other.upstream_proxy_enabled.is_some() {
            self.upstream_proxy_enabled = other.upstream_proxy_enabled;
        }
        if other.reasoning_policy.is_some() {
            self.reasoning_policy = other.reasoning_policy;
        }
        if other.custom_api_key.is_some() {
            self.custom_api_key = other.custom_api_key;
        }
        if other.custom_auth_header.is_some() {
            self.custom_auth_header = other.custom_auth_header;
        }
        if other.default_model.is_some() {
            self.default_model = other.default_model;
        }
        if other.known_models.is_some() {
            self.known_models = other.known_models;
        }
        if other.settings_path.is_some() {
            self.settings_path = other.settings_path;
        }
    }

    pub fn into_config(self) -> Result<GatewayConfig, ConfigError> {
        let api_concurrency = self.api_concurrency.unwrap_or(1);
        if api_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "api_concurrency",
                value: "0".to_string(),
            });
        }
        let settings_path = match self.settings_path {
            Some(path) => path,
            None => default_settings_path().ok_or(ConfigError::MissingField("settings_path"))?,
        };
        let custom_api_key = self
            .custom_api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        Ok(GatewayConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(28000),
            api_concurrency,
            upstream_backend: self.upstream_backend.unwrap_or_default(),
            tls_impersonate: self
                .tls_impersonate
                .unwrap_or_else(|| "chrome124".to_string()),
            upstream_proxy: self.upstream_proxy,
            upstream_proxy_enabled: self.upstream_proxy_enabled.unwrap_or(false),
            reasoning_policy: self.reasoning_policy.unwrap_or_default(),
            custom_api_key,
            custom_auth_header: self
                .custom_auth_header
                .unwrap_or_else(|| "Authorization".to_string()),
            default_model: self.default_model.unwrap_or_else(|| "glm-5".to_string()),
            known_models: self.known_models.unwrap_or_else(default_known_models),
            settings_path,
        })
    }
}

impl From<GatewayConfig> for GatewayConfigPatch {
    fn from(value: GatewayConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            api_concurrency: Some(value.api_concurrency),
            upstream_backend: Some(value.upstream_backend),
            tls_impersonate: Some(value.tls_impersonate),
            upstream_proxy: value.upstream_proxy,
            upstream_proxy_enabled: Some(value.upstream_proxy_enabled),
            reasoning_policy: Some(value.reasoning_policy),
            custom_api_key: value.custom_api_key,
            custom_auth_header: Some(value.custom_auth_header),
            default_model: Some(value.default_model),
            known_models: Some(value.known_models),
            settings_path: Some(value.settings_path),
        }
    }
}
