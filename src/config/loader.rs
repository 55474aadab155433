//! Configuration loader
//! Layers built-in defaults, an optional config file and the environment

use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::AppConfig;
use crate::error::LedgerError;

pub const CONFIG_PATH_ENV: &str = "EDU_AUDIT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/edu-audit.toml";
pub const ENV_PREFIX: &str = "EDU_AUDIT";

impl AppConfig {
    /// Load from `EDU_AUDIT_CONFIG` (or the default path, if present) and
    /// `EDU_AUDIT__SECTION__KEY` environment overrides.
    pub fn load() -> Result<Self, LedgerError> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, LedgerError> {
        info!("Loading configuration from: {:?}", path);

        let settings = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| {
                LedgerError::ConfigError(format!("Failed to read {:?}: {}", path, e))
            })?;

        let config: AppConfig = settings.try_deserialize().map_err(|e| {
            LedgerError::ConfigError(format!("Failed to parse {:?}: {}", path, e))
        })?;

        config.validate()?;
        Ok(config)
    }
}
