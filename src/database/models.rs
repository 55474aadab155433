use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::audit::entry::{format_timestamp, AuditEntry, Block};
use crate::error::LedgerError;

/// One persisted row of `audit_blocks`, exactly as stored
#[derive(Debug, Clone, FromRow)]
pub struct BlockRow {
    pub idx: i64,
    pub prev_hash: String,
    pub data: String,
    pub timestamp: String,
    pub hash: String,
}

impl BlockRow {
    pub fn from_block(block: &Block) -> Result<Self, LedgerError> {
        let idx = i64::try_from(block.index).map_err(|_| {
            LedgerError::Serialization(format!("Block index {} out of range", block.index))
        })?;

        Ok(BlockRow {
            idx,
            prev_hash: block.prev_hash.clone(),
            data: serde_json::to_string(&block.entry)?,
            timestamp: format_timestamp(&block.timestamp),
            hash: block.hash.clone(),
        })
    }

    pub fn index(&self) -> u64 {
        self.idx.max(0) as u64
    }

    /// Decode the stored columns. The stored hash is carried over as-is,
    /// never recomputed, so verification sees what is actually on disk.
    pub fn into_block(self) -> Result<Block, LedgerError> {
        let index = u64::try_from(self.idx).map_err(|_| {
            LedgerError::Serialization(format!("Negative block index {}", self.idx))
        })?;

        let entry: AuditEntry = serde_json::from_str(&self.data).map_err(|e| {
            LedgerError::Serialization(format!("Undecodable entry at index {}: {}", index, e))
        })?;

        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| {
                LedgerError::Serialization(format!(
                    "Undecodable timestamp at index {}: {}",
                    index, e
                ))
            })?
            .with_timezone(&Utc);

        Ok(Block {
            index,
            prev_hash: self.prev_hash,
            entry,
            timestamp,
            hash: self.hash,
        })
    }
}

/// A stored block as read back for display. Rows that no longer decode
/// are kept with their raw columns instead of failing the whole read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub index: u64,
    pub prev_hash: String,
    pub hash: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entry: Option<AuditEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decode_error: Option<String>,
}

impl BlockRecord {
    pub fn is_decoded(&self) -> bool {
        self.decode_error.is_none()
    }
}

impl From<Block> for BlockRecord {
    fn from(block: Block) -> Self {
        BlockRecord {
            index: block.index,
            prev_hash: block.prev_hash,
            hash: block.hash,
            timestamp: Some(block.timestamp),
            entry: Some(block.entry),
            raw_data: None,
            raw_timestamp: None,
            decode_error: None,
        }
    }
}

impl BlockRow {
    /// Decode for display; never fails
    pub fn into_record(self) -> BlockRecord {
        let index = self.index();
        let raw = self.clone();
        match self.into_block() {
            Ok(block) => block.into(),
            Err(e) => BlockRecord {
                index,
                prev_hash: raw.prev_hash,
                hash: raw.hash,
                timestamp: None,
                entry: None,
                raw_data: Some(raw.data),
                raw_timestamp: Some(raw.timestamp),
                decode_error: Some(e.to_string()),
            },
        }
    }
}
