use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use eyre::WrapErr;
use serde::{Deserialize, Serialize};

use crate::capture::engine::DEFAULT_BAUD_RATE;

/// Saved preferences for the capture backend. Everything here has a usable
/// default; a missing file is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial port to use instead of the first enumerated one.
    pub capture_device: Option<String>,
    pub baud_rate: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture_device: None,
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl Config {
    fn path() -> eyre::Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "camscan")
            .ok_or_else(|| eyre::eyre!("could not determine config directory"))?;

        Ok(dirs.config_dir().join("config.json"))
    }

    /// Load the saved preferences, writing defaults on first run so the
    /// file is there to edit.
    pub async fn load_or_init() -> eyre::Result<Self> {
        let path = Self::path()?;

        match Self::load_from(&path).await? {
            Some(config) => Ok(config),
            None => {
                let config = Self::default();
                config.save_to(&path).await?;
                tracing::info!(path = %path.display(), "wrote default config");
                Ok(config)
            }
        }
    }

    async fn load_from(path: &Path) -> eyre::Result<Option<Self>> {
        let data = match tokio::fs::read_to_string(path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no saved config");
                return Ok(None);
            }
            Err(err) => return Err(err).wrap_err("could not read config"),
        };

        serde_json::from_str(&data)
            .map(Some)
            .wrap_err("could not parse config")
    }

    async fn save_to(&self, path: &Path) -> eyre::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .wrap_err("could not create config directory")?;
        }

        let data = serde_json::to_vec_pretty(self)?;

        tokio::fs::write(path, data)
            .await
            .wrap_err("could not write config")?;

        Ok(())
    }
}
