use std::path::{Path, PathBuf};

use flowgate_common::{ConfigError, IflowSettings};
use flowgate_provider_core::{Credential, CredentialStore};
use tracing::debug;

/// The vendor CLI's `settings.json` as the credential store.
#[derive(Debug, Clone)]
pub struct SettingsFileStore {
    path: PathBuf,
}

impl SettingsFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for SettingsFileStore {
    fn load(&self) -> Result<(Credential, IflowSettings), ConfigError> {
        let settings = IflowSettings::load(&self.path)?;
        Ok((Credential::from_settings(&settings), settings))
    }

    /// Re-reads the file so keys written by other tools survive.
    fn save(&self, credential: &Credential) -> Result<(), ConfigError> {
        let mut settings = IflowSettings::read(&self.path)?;
        credential.apply_to(&mut settings);
        settings.save(&self.path)?;
        debug!(path = %self.path.display(), "credential saved");
        Ok(())
    }
}
