//! Tamper Alerting
//!
//! Where integrity findings go once the monitor detects a broken chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;

use crate::audit::verify::TamperReason;
use crate::error::LedgerError;

/// A tampering finding raised to operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TamperAlert {
    pub at_index: u64,
    pub reason: Option<TamperReason>,
    pub detected_at: DateTime<Utc>,
    pub manual: bool,
}

impl TamperAlert {
    pub fn summary(&self) -> String {
        format!(
            "Audit ledger integrity violation at block {} (detected {}{})",
            self.at_index,
            self.detected_at.to_rfc3339(),
            if self.manual { ", manual check" } else { "" }
        )
    }
}

/// Destination for tamper alerts
pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: &TamperAlert) -> Result<(), LedgerError>;
}

/// Reports alerts through the process log
#[derive(Debug, Default, Clone)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn raise(&self, alert: &TamperAlert) -> Result<(), LedgerError> {
        error!(
            at_index = alert.at_index,
            reason = ?alert.reason,
            "[INTEGRITY] {}",
            alert.summary()
        );
        Ok(())
    }
}

/// Appends alerts as JSON lines to a file, and logs them
#[derive(Debug, Clone)]
pub struct FileAlertSink {
    path: PathBuf,
}

impl FileAlertSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AlertSink for FileAlertSink {
    fn raise(&self, alert: &TamperAlert) -> Result<(), LedgerError> {
        TracingAlertSink.raise(alert)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    LedgerError::Io(format!("Failed to create alert log directory: {}", e))
                })?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| LedgerError::Io(format!("Failed to open alert log: {}", e)))?;

        let line = serde_json::to_string(alert)?;
        writeln!(file, "{}", line)
            .map_err(|e| LedgerError::Io(format!("Failed to write alert log: {}", e)))?;

        Ok(())
    }
}

/// Alert sink selection in monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertSinkConfig {
    #[default]
    Log,
    File {
        path: PathBuf,
    },
}

impl AlertSinkConfig {
    pub fn build(&self) -> Arc<dyn AlertSink> {
        match self {
            AlertSinkConfig::Log => Arc::new(TracingAlertSink),
            AlertSinkConfig::File { path } => Arc::new(FileAlertSink::new(path.clone())),
        }
    }
}
