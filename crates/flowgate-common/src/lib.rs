mod config;
mod error;
mod settings;

pub use config::{
    CATALOGUE_MODELS, GatewayConfig, GatewayConfigPatch, ReasoningPolicy, UpstreamBackend,
    VISION_CATALOGUE, VISION_MODELS, VisionModelInfo, default_known_models,
};
pub use error::ConfigError;
pub use settings::{AuthType, DEFAULT_BASE_URL, IflowSettings, default_settings_path, parse_expiry};

/// Masks a secret down to its last four characters for logging.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}

#[cfg(test)]
mod tests {
    use super::mask_secret;

    #[test]
    fn masks_all_but_last_four() {
        assert_eq!(mask_secret("sk-abcdef1234"), "****1234");
        assert_eq!(mask_secret("abc"), "****");
    }
}
