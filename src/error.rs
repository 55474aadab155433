use thiserror::Error;

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON serialization error: {}", err))
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageUnavailable(format!("Database error: {}", err))
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    /// Another writer claimed the same ledger index; safe to retry.
    #[error("Write conflict: index {index} was claimed by a concurrent append")]
    WriteConflict { index: u64 },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Local file I/O outside the ledger store (alert logs, export files)
    #[error("I/O error: {0}")]
    Io(String),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WriteConflict { .. })
    }

    pub fn invalid_interval(interval_ms: u64) -> Self {
        Self::ConfigError(format!(
            "Invalid check interval: {}ms. Must be greater than zero",
            interval_ms
        ))
    }

    pub fn auto_repair_unsupported() -> Self {
        Self::ConfigError(
            "auto_repair is not supported: a broken hash chain can only be restored from a trusted backup"
                .to_string(),
        )
    }
}

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;
