//! Audit Ledger
//!
//! Appends entries to the hash-chained ledger. Appends are the only
//! operation that needs mutual exclusion: each one claims the next index,
//! so they are serialized behind a write lock and committed in a single
//! transaction. The store's unique `idx` key backstops writers outside
//! this process; losing that race is a `WriteConflict`, retried with
//! backoff and never resolved by overwriting.

use anyhow::{anyhow, Result as AnyResult};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::audit::entry::{AuditEntry, Block, GENESIS_HASH};
use crate::config::LedgerConfig;
use crate::database::models::{BlockRecord, BlockRow};
use crate::database::queries::{is_index_collision, is_write_contention, Queries};
use crate::database::Database;
use crate::error::{LedgerError, Result};

#[derive(Clone)]
pub struct AuditLedger {
    database: Database,
    config: LedgerConfig,
    write_lock: Arc<Mutex<()>>,
}

impl AuditLedger {
    pub fn new(database: Database, config: LedgerConfig) -> Self {
        Self {
            database,
            config,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Append `entry` as the next block and return it once durable.
    ///
    /// Fails with `StorageUnavailable` when the store cannot be reached,
    /// or `WriteConflict` when every attempt lost the index race.
    pub async fn append(&self, entry: AuditEntry) -> Result<Block> {
        let max_attempts = self.config.max_append_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.try_append(&entry).await {
                Ok(block) => {
                    debug!("Appended audit block {}: {}", block.index, entry.summary());
                    return Ok(block);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "Append attempt {}/{} failed ({}); retrying in {:?}",
                        attempt, max_attempts, err, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!("Failed to append audit entry {}: {}", entry.summary(), err);
                    return Err(err);
                }
            }
        }
    }

    /// One read-compute-insert pass under the write lock
    async fn try_append(&self, entry: &AuditEntry) -> Result<Block> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.database.pool().begin().await?;

        let (index, prev_hash) = match Queries::fetch_tip(&mut *tx).await? {
            Some(tip) => (tip.index() + 1, tip.hash),
            None => (0, GENESIS_HASH.to_string()),
        };

        let block = Block::next(index, prev_hash, entry.clone());
        let row = BlockRow::from_block(&block)?;

        Queries::insert_block(&mut *tx, &row)
            .await
            .map_err(|e| classify_write_error(e, index))?;
        tx.commit()
            .await
            .map_err(|e| classify_write_error(e, index))?;

        Ok(block)
    }

    /// Exponential backoff with up to one base interval of jitter
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.retry_backoff_ms.max(1);
        let exp = base.saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
        let jitter = rand::thread_rng().gen_range(0..=base);
        Duration::from_millis(exp.saturating_add(jitter))
    }

    pub async fn latest_block(&self) -> Result<Option<Block>> {
        Queries::fetch_tip(self.database.pool())
            .await?
            .map(BlockRow::into_block)
            .transpose()
    }

    pub async fn block(&self, index: u64) -> Result<Option<Block>> {
        let Ok(idx) = i64::try_from(index) else {
            return Ok(None);
        };
        Queries::fetch_block(self.database.pool(), idx)
            .await?
            .map(BlockRow::into_block)
            .transpose()
    }

    /// Ascending page of up to `limit` stored blocks starting at `from`.
    /// Rows that fail to decode come back raw rather than as an error.
    pub async fn blocks(&self, from: u64, limit: u32) -> Result<Vec<BlockRecord>> {
        let from = i64::try_from(from).unwrap_or(i64::MAX);
        let rows =
            Queries::fetch_range(self.database.pool(), from, i64::MAX, i64::from(limit)).await?;
        Ok(rows.into_iter().map(BlockRow::into_record).collect())
    }

    pub async fn len(&self) -> Result<u64> {
        let count = Queries::count_blocks(self.database.pool()).await?;
        Ok(count.max(0) as u64)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Losing the race for `index` is a conflict; anything else means the
/// store could not take the write.
fn classify_write_error(err: sqlx::Error, index: u64) -> LedgerError {
    if is_index_collision(&err) || is_write_contention(&err) {
        LedgerError::WriteConflict { index }
    } else {
        err.into()
    }
}

/// Run a state-changing action, then record it in the ledger.
///
/// The action's result is only handed back once its audit block is
/// durable; if the append fails the whole call fails, so no mutation
/// reports success without a matching block.
pub async fn execute_with_audit<F, Fut, T, E>(
    ledger: &AuditLedger,
    entry: AuditEntry,
    action: F,
) -> AnyResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let result = action()
        .await
        .map_err(|e| anyhow!("Action {} failed: {}", entry.action, e))?;

    ledger
        .append(entry)
        .await
        .map_err(|e| anyhow!("Action succeeded but could not be audited: {}", e))?;

    Ok(result)
}
