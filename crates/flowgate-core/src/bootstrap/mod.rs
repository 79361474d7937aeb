use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use tracing::info;

use flowgate_common::{
    GatewayConfig, GatewayConfigPatch, ReasoningPolicy, UpstreamBackend, mask_secret,
};
use flowgate_provider_core::CredentialStore;
use flowgate_provider_impl::{
    ConversationContext, CredentialRefresher, IflowOAuth, IflowProvider, RefreshSettings,
    SettingsFileStore,
};

use crate::service::GatewayService;
use crate::upstream_client::{UpstreamClientConfig, build_upstream_client};

/// Gateway settings accepted on the command line or as `FLOWGATE_*`
/// environment variables.
#[derive(Debug, Clone, Default, Args)]
pub struct CliArgs {
    /// JSON config file; CLI and ENV values override it.
    #[arg(long, env = "FLOWGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bind host.
    #[arg(long, env = "FLOWGATE_HOST")]
    pub host: Option<String>,

    /// Bind port.
    #[arg(long, env = "FLOWGATE_PORT")]
    pub port: Option<String>,

    /// Upstream calls allowed in flight at once.
    #[arg(long, env = "FLOWGATE_API_CONCURRENCY")]
    pub api_concurrency: Option<String>,

    /// `standard` or `impersonate`.
    #[arg(long, env = "FLOWGATE_UPSTREAM_BACKEND")]
    pub upstream_backend: Option<String>,

    /// Browser profile for the impersonating backend.
    #[arg(long, env = "FLOWGATE_TLS_IMPERSONATE")]
    pub tls_impersonate: Option<String>,

    /// Outbound proxy for upstream requests.
    #[arg(long, env = "FLOWGATE_PROXY")]
    pub proxy: Option<String>,

    /// Whether the outbound proxy is used.
    #[arg(long, env = "FLOWGATE_PROXY_ENABLED")]
    pub proxy_enabled: Option<String>,

    /// `preserve` or `merge`.
    #[arg(long, env = "FLOWGATE_REASONING_POLICY")]
    pub reasoning_policy: Option<String>,

    /// Key callers must present. Unset disables the check.
    #[arg(long, env = "FLOWGATE_CUSTOM_API_KEY")]
    pub custom_api_key: Option<String>,

    /// Header carrying the caller key.
    #[arg(long, env = "FLOWGATE_CUSTOM_AUTH_HEADER")]
    pub custom_auth_header: Option<String>,

    /// Model used for names outside the allow-list.
    #[arg(long, env = "FLOWGATE_DEFAULT_MODEL")]
    pub default_model: Option<String>,

    /// Vendor CLI settings file.
    #[arg(long, env = "FLOWGATE_SETTINGS_PATH")]
    pub settings: Option<PathBuf>,
}

impl CliArgs {
    pub fn into_patch(self) -> anyhow::Result<GatewayConfigPatch> {
        Ok(GatewayConfigPatch {
            host: sanitize_optional_env_value(self.host),
            port: parse_u16_env_value(self.port, "FLOWGATE_PORT")?,
            api_concurrency: parse_usize_env_value(
                self.api_concurrency,
                "FLOWGATE_API_CONCURRENCY",
            )?,
            upstream_backend: sanitize_optional_env_value(self.upstream_backend)
                .map(|raw| raw.parse::<UpstreamBackend>())
                .transpose()?,
            tls_impersonate: sanitize_optional_env_value(self.tls_impersonate),
            upstream_proxy: sanitize_optional_env_value(self.proxy),
            upstream_proxy_enabled: parse_bool_env_value(
                self.proxy_enabled,
                "FLOWGATE_PROXY_ENABLED",
            )?,
            reasoning_policy: sanitize_optional_env_value(self.reasoning_policy)
                .map(|raw| raw.parse::<ReasoningPolicy>())
                .transpose()?,
            custom_api_key: sanitize_optional_env_value(self.custom_api_key),
            custom_auth_header: sanitize_optional_env_value(self.custom_auth_header),
            default_model: sanitize_optional_env_value(self.default_model),
            known_models: None,
            settings_path: self.settings,
        })
    }
}

/// Merges CLI/ENV over the optional config file over defaults.
pub fn load_config(args: CliArgs) -> anyhow::Result<GatewayConfig> {
    let mut merged = match args.config.as_deref() {
        Some(path) => GatewayConfigPatch::from_json_file(path)
            .with_context(|| format!("load config file {}", path.display()))?,
        None => GatewayConfigPatch::default(),
    };
    merged.overlay(args.into_patch()?);
    merged.into_config().context("finalize merged config")
}

pub struct Bootstrap {
    pub config: GatewayConfig,
    pub service: Arc<GatewayService>,
    pub refresher: Arc<CredentialRefresher>,
}

/// Builds the running gateway. Refuses to start without a usable credential.
pub async fn bootstrap(config: GatewayConfig) -> anyhow::Result<Bootstrap> {
    let store = Arc::new(SettingsFileStore::new(&config.settings_path));
    let (credential, settings) = store.load().context("load vendor settings")?;
    info!(
        settings = %config.settings_path.display(),
        base_url = %settings.base_url,
        api_key = %mask_secret(&credential.api_key),
        auth_type = ?credential.auth_type,
        "credential loaded"
    );

    let client = build_upstream_client(
        config.upstream_backend,
        UpstreamClientConfig::from_gateway(&config),
    )
    .context("build upstream client")?;

    let context = Arc::new(ConversationContext::new(&credential.api_key));
    let provider = IflowProvider::new(client.clone(), settings.base_url.clone(), context);
    let (refresher, updates) = CredentialRefresher::new(
        IflowOAuth::new(client),
        store,
        RefreshSettings::default(),
    );
    let refresher = Arc::new(refresher);
    let service = Arc::new(
        GatewayService::new(config.clone(), provider, credential).with_refresher(refresher.clone()),
    );
    service.watch_credentials(updates);

    Ok(Bootstrap {
        config,
        service,
        refresher,
    })
}

fn sanitize_optional_env_value(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() {
        return None;
    }
    // Unresolved `${VAR}` placeholders count as unset.
    if trimmed.starts_with("${") && trimmed.ends_with('}') {
        return None;
    }
    Some(trimmed)
}

fn parse_u16_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<u16>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw
        .parse::<u16>()
        .with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}

fn parse_usize_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<usize>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw
        .parse::<usize>()
        .with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}

fn parse_bool_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<bool>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => return Err(anyhow::anyhow!("invalid {env_name} value: {raw}")),
    };
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args() -> CliArgs {
        CliArgs {
            settings: Some(PathBuf::from("/tmp/flowgate-settings.json")),
            ..Default::default()
        }
    }

    #[test]
    fn placeholders_and_blanks_are_unset() {
        assert_eq!(sanitize_optional_env_value(Some("${PORT}".into())), None);
        assert_eq!(sanitize_optional_env_value(Some("  ".into())), None);
        assert_eq!(
            sanitize_optional_env_value(Some(" 0.0.0.0 ".into())).as_deref(),
            Some("0.0.0.0")
        );
    }

    #[test]
    fn cli_values_are_parsed_and_validated() {
        let mut cli = args();
        cli.port = Some("9000".into());
        cli.proxy_enabled = Some("yes".into());
        cli.upstream_backend = Some("impersonate".into());
        cli.reasoning_policy = Some("merge".into());
        let config = load_config(cli).unwrap();
        assert_eq!(config.port, 9000);
        assert!(config.upstream_proxy_enabled);
        assert_eq!(config.upstream_backend, UpstreamBackend::Impersonate);
        assert_eq!(config.reasoning_policy, ReasoningPolicy::Merge);

        let mut bad = args();
        bad.port = Some("http".into());
        assert!(load_config(bad).is_err());
        let mut bad = args();
        bad.proxy_enabled = Some("maybe".into());
        assert!(load_config(bad).is_err());
    }

    #[test]
    fn cli_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{"port": 1234, "host": "127.0.0.1", "api_concurrency": 2}}"#).unwrap();

        let mut cli = args();
        cli.config = Some(path.clone());
        cli.port = Some("4321".into());
        let config = load_config(cli).unwrap();
        assert_eq!(config.port, 4321);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.api_concurrency, 2);
    }
}
