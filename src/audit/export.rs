//! Ledger Export
//!
//! Read-only snapshot of the ledger for offline audit and compliance
//! review: every block in order, the current verification result, and
//! the current anomaly report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::anomaly::{AnomalyDetector, AnomalyReport};
use crate::audit::verify::{ChainVerifier, VerifyResponse};
use crate::database::models::{BlockRecord, BlockRow};
use crate::database::queries::Queries;
use crate::database::Database;
use crate::error::{LedgerError, Result};

pub const DEFAULT_HASH_DISPLAY_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Hex characters of each hash to keep; `None` exports full hashes
    pub hash_display_len: Option<usize>,
    pub page_size: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            hash_display_len: Some(DEFAULT_HASH_DISPLAY_LEN),
            page_size: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerExport {
    pub export_id: Uuid,
    pub exported_at: DateTime<Utc>,
    pub tool_version: String,
    pub block_count: u64,
    /// Every stored block in index order; undecodable rows are kept raw
    pub blocks: Vec<BlockRecord>,
    pub verification: VerifyResponse,
    pub anomalies: AnomalyReport,
}

pub struct LedgerExporter {
    database: Database,
    verifier: ChainVerifier,
    detector: AnomalyDetector,
    config: ExportConfig,
}

impl LedgerExporter {
    pub fn new(
        database: Database,
        verifier: ChainVerifier,
        detector: AnomalyDetector,
        config: ExportConfig,
    ) -> Self {
        Self {
            database,
            verifier,
            detector,
            config,
        }
    }

    pub async fn export(&self) -> Result<LedgerExport> {
        let exported_at = Utc::now();
        let blocks = self.load_blocks().await?;
        let verification = self.verifier.verify_chain().await?.to_response();
        let anomalies = self.detector.scan_default().await?;

        info!(
            "Exported {} audit blocks (verified: {})",
            blocks.len(),
            verification.ok
        );

        Ok(LedgerExport {
            export_id: Uuid::new_v4(),
            exported_at,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            block_count: blocks.len() as u64,
            blocks,
            verification,
            anomalies,
        })
    }

    async fn load_blocks(&self) -> Result<Vec<BlockRecord>> {
        let page_size = i64::from(self.config.page_size.max(1));
        let mut blocks = Vec::new();
        let mut next: i64 = 0;

        loop {
            let page = Queries::fetch_range(self.database.pool(), next, i64::MAX, page_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            next = last.idx + 1;
            let page_len = page.len();

            blocks.extend(page.into_iter().map(|row| self.display_record(row)));

            if (page_len as i64) < page_size {
                break;
            }
        }

        Ok(blocks)
    }

    fn display_record(&self, row: BlockRow) -> BlockRecord {
        let mut record = row.into_record();
        if !record.is_decoded() {
            warn!(
                "Exporting undecodable block {} raw: {}",
                record.index,
                record.decode_error.as_deref().unwrap_or_default()
            );
        }
        record.prev_hash = truncate_hash(&record.prev_hash, self.config.hash_display_len);
        record.hash = truncate_hash(&record.hash, self.config.hash_display_len);
        record
    }
}

fn truncate_hash(hash: &str, len: Option<usize>) -> String {
    match len {
        Some(len) if hash.len() > len => hash.chars().take(len).collect(),
        _ => hash.to_string(),
    }
}

/// Save an export as YAML for `.yml`/`.yaml` paths, JSON otherwise
pub async fn save_export(export: &LedgerExport, output_path: &Path) -> Result<()> {
    let is_yaml = matches!(
        output_path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    );

    let content = if is_yaml {
        serde_yaml::to_string(export).map_err(|e| {
            LedgerError::Serialization(format!("Failed to serialize export: {}", e))
        })?
    } else {
        serde_json::to_string_pretty(export)?
    };

    tokio::fs::write(output_path, content).await.map_err(|e| {
        LedgerError::Io(format!(
            "Failed to write export file {}: {}",
            output_path.display(),
            e
        ))
    })?;

    info!("Saved ledger export {} to {}", export.export_id, output_path.display());
    Ok(())
}

/// Load a previously saved export
pub async fn load_export(path: &Path) -> Result<LedgerExport> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        LedgerError::Io(format!("Failed to read export file {}: {}", path.display(), e))
    })?;

    match path.extension().and_then(|e| e.to_str()) {
        Some("yml") | Some("yaml") => serde_yaml::from_str(&content)
            .map_err(|e| LedgerError::Serialization(format!("Failed to parse export: {}", e))),
        _ => Ok(serde_json::from_str(&content)?),
    }
}
