pub mod loader;

use serde::{Deserialize, Serialize};

use crate::audit::anomaly::AnomalyConfig;
use crate::audit::export::ExportConfig;
use crate::audit::monitor::MonitorConfig;
use crate::audit::verify::DEFAULT_PAGE_SIZE;
use crate::error::LedgerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: String,
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
    pub monitor: MonitorConfig,
    pub anomaly: AnomalyConfig,
    pub export: ExportConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://edu-audit.db".to_string(),
            server: ServerConfig::default(),
            ledger: LedgerConfig::default(),
            monitor: MonitorConfig::default(),
            anomaly: AnomalyConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token for the audit routes; they answer 403 while unset
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            admin_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub max_append_attempts: u32,
    pub retry_backoff_ms: u64,
    pub verify_page_size: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_append_attempts: 5,
            retry_backoff_ms: 10,
            verify_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl AppConfig {
    /// Validate everything that can be checked before connecting.
    /// Monitor settings are validated again by `IntegrityMonitor::start`.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.database_url.trim().is_empty() {
            return Err(LedgerError::ConfigError("database_url is empty".to_string()));
        }
        if self.ledger.max_append_attempts == 0 {
            return Err(LedgerError::ConfigError(
                "ledger.max_append_attempts must be at least 1".to_string(),
            ));
        }
        if self.ledger.verify_page_size == 0 {
            return Err(LedgerError::ConfigError(
                "ledger.verify_page_size must be at least 1".to_string(),
            ));
        }
        if self.anomaly.recent_window_secs < 0 {
            return Err(LedgerError::ConfigError(format!(
                "anomaly.recent_window_secs ({}) cannot be negative",
                self.anomaly.recent_window_secs
            )));
        }
        self.monitor.validate()?;
        Ok(())
    }
}
