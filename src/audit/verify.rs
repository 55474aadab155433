//! Chain Verification
//!
//! Recomputes the hash chain page by page and reports the first block
//! where it diverges. Verification only reads committed rows, so it runs
//! without the append lock; blocks committed after a pass starts are
//! outside its range.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::entry::{compute_block_hash, format_timestamp, Block, GENESIS_HASH};
use crate::database::queries::Queries;
use crate::database::Database;
use crate::error::Result;

pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// Outcome of recomputing the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChainStatus {
    Verified,
    Tampered { at: u64 },
}

impl ChainStatus {
    pub fn is_verified(&self) -> bool {
        matches!(self, ChainStatus::Verified)
    }

    pub fn tampered_at(&self) -> Option<u64> {
        match self {
            ChainStatus::Verified => None,
            ChainStatus::Tampered { at } => Some(*at),
        }
    }

    pub fn to_response(&self) -> VerifyResponse {
        VerifyResponse {
            ok: self.is_verified(),
            at: self.tampered_at(),
        }
    }
}

/// Wire form of a verification result: `{ ok: true }` or `{ ok: false, at }`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<u64>,
}

/// Why a block failed verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TamperReason {
    /// Stored hash differs from the recomputed one
    HashMismatch { expected: String, stored: String },
    /// Stored prev_hash differs from the predecessor's hash
    BrokenLink { expected: String, stored: String },
    /// No row holds this index although later rows exist
    MissingBlock,
    /// Row columns could not be decoded
    Undecodable { detail: String },
    /// Column decodes but is not the exact text the ledger wrote
    NonCanonical { column: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub status: ChainStatus,
    pub blocks_checked: u64,
    pub reason: Option<TamperReason>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl VerificationReport {
    pub fn summary(&self) -> String {
        match self.status {
            ChainStatus::Verified => {
                format!("Audit chain verified ({} blocks)", self.blocks_checked)
            }
            ChainStatus::Tampered { at } => format!(
                "Audit chain tampered at block {}: {:?}",
                at,
                self.reason
            ),
        }
    }
}

/// Verifies the ledger held by a `Database`
#[derive(Clone)]
pub struct ChainVerifier {
    database: Database,
    page_size: u32,
}

impl ChainVerifier {
    pub fn new(database: Database) -> Self {
        Self {
            database,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Verify the whole chain
    pub async fn verify_chain(&self) -> Result<ChainStatus> {
        Ok(self.verify_range(0, None).await?.status)
    }

    /// Verify blocks `from..=to`; `to = None` means the tip as of now.
    ///
    /// For `from > 0` the running hash is seeded from the stored hash of
    /// block `from - 1`, which is trusted as the starting point.
    pub async fn verify_range(&self, from: u64, to: Option<u64>) -> Result<VerificationReport> {
        let started_at = Utc::now();
        let pool = self.database.pool();

        let tip = match Queries::fetch_tip(pool).await? {
            Some(row) => row.index(),
            None => {
                debug!("Audit ledger is empty; nothing to verify");
                return Ok(self.report(ChainStatus::Verified, 0, None, started_at));
            }
        };
        let last = to.map_or(tip, |to| to.min(tip));

        if from > last {
            return Ok(self.report(ChainStatus::Verified, 0, None, started_at));
        }

        let mut running_prev_hash = if from == 0 {
            GENESIS_HASH.to_string()
        } else {
            match Queries::fetch_block(pool, to_sql_index(from - 1)).await? {
                Some(row) => row.hash,
                None => {
                    let report = self.report(
                        ChainStatus::Tampered { at: from - 1 },
                        0,
                        Some(TamperReason::MissingBlock),
                        started_at,
                    );
                    warn!("{}", report.summary());
                    return Ok(report);
                }
            }
        };

        let mut expected_index = from;
        let mut checked = 0u64;

        while expected_index <= last {
            let page = Queries::fetch_range(
                pool,
                to_sql_index(expected_index),
                to_sql_index(last),
                i64::from(self.page_size),
            )
            .await?;

            if page.is_empty() {
                // Rows below the tip are gone
                return Ok(self.tampered(expected_index, checked, TamperReason::MissingBlock, started_at));
            }

            for row in page {
                if row.idx < 0 || row.index() != expected_index {
                    return Ok(self.tampered(expected_index, checked, TamperReason::MissingBlock, started_at));
                }

                let stored_hash = row.hash.clone();
                let stored_prev = row.prev_hash.clone();
                let stored_data = row.data.clone();
                let stored_timestamp = row.timestamp.clone();
                let block = match row.into_block() {
                    Ok(block) => block,
                    Err(e) => {
                        let reason = TamperReason::Undecodable {
                            detail: e.to_string(),
                        };
                        return Ok(self.tampered(expected_index, checked, reason, started_at));
                    }
                };

                if let Some(column) = non_canonical_column(&stored_data, &stored_timestamp, &block)? {
                    let reason = TamperReason::NonCanonical {
                        column: column.to_string(),
                    };
                    return Ok(self.tampered(expected_index, checked, reason, started_at));
                }

                let expected = compute_block_hash(
                    block.index,
                    &running_prev_hash,
                    &block.entry,
                    &block.timestamp,
                );
                if expected != stored_hash {
                    let reason = TamperReason::HashMismatch {
                        expected,
                        stored: stored_hash,
                    };
                    return Ok(self.tampered(expected_index, checked, reason, started_at));
                }
                if stored_prev != running_prev_hash {
                    let reason = TamperReason::BrokenLink {
                        expected: running_prev_hash,
                        stored: stored_prev,
                    };
                    return Ok(self.tampered(expected_index, checked, reason, started_at));
                }

                running_prev_hash = stored_hash;
                checked += 1;
                expected_index += 1;
            }

            // Let other tasks run between pages on long chains
            tokio::task::yield_now().await;
        }

        let report = self.report(ChainStatus::Verified, checked, None, started_at);
        info!("{}", report.summary());
        Ok(report)
    }

    fn tampered(
        &self,
        at: u64,
        checked: u64,
        reason: TamperReason,
        started_at: DateTime<Utc>,
    ) -> VerificationReport {
        let report = self.report(ChainStatus::Tampered { at }, checked, Some(reason), started_at);
        warn!("{}", report.summary());
        report
    }

    fn report(
        &self,
        status: ChainStatus,
        blocks_checked: u64,
        reason: Option<TamperReason>,
        started_at: DateTime<Utc>,
    ) -> VerificationReport {
        VerificationReport {
            status,
            blocks_checked,
            reason,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// The hash covers decoded values, so the stored text must be exactly
/// what encoding those values produces. Otherwise an edit that decodes
/// to the same values (reformatted JSON, extra sub-millisecond digits)
/// would go unnoticed.
fn non_canonical_column(
    data: &str,
    timestamp: &str,
    block: &Block,
) -> Result<Option<&'static str>> {
    if serde_json::to_string(&block.entry)? != data {
        return Ok(Some("data"));
    }
    if format_timestamp(&block.timestamp) != timestamp {
        return Ok(Some("timestamp"));
    }
    Ok(None)
}

fn to_sql_index(index: u64) -> i64 {
    i64::try_from(index).unwrap_or(i64::MAX)
}
