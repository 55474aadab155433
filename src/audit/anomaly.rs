//! Anomaly Detection
//!
//! Heuristic scan over the most recent blocks. This is a risk signal for
//! operators, independent of cryptographic verification: a chain that
//! verifies cleanly can still be flagged here.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{info, warn};

use crate::audit::entry::Block;
use crate::database::models::BlockRow;
use crate::database::queries::Queries;
use crate::database::Database;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub window_size: u32,
    /// Trailing span, in seconds, that counts as a recent modification
    pub recent_window_secs: i64,
    /// Recent modifications above this mark the window as high risk
    pub high_risk_threshold: u64,
    pub destructive_actions: Vec<String>,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            recent_window_secs: 3600,
            high_risk_threshold: 50,
            destructive_actions: [
                "student.delete",
                "teacher.delete",
                "class.delete",
                "enrollment.delete",
                "attendance.delete",
                "assignment.delete",
                "exam.delete",
                "message.delete",
                "user.delete",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnusualAction {
    pub index: u64,
    pub action: String,
    pub actor_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub blocks_scanned: usize,
    pub recent_modifications: u64,
    /// Blocks whose timestamp is shared with at least one other block
    pub duplicate_timestamps: u64,
    pub unusual_actions: Vec<UnusualAction>,
    pub suspicious_actors: Vec<String>,
    pub risk_level: RiskLevel,
    pub scanned_at: DateTime<Utc>,
}

/// Score a window of blocks against `config` as of `now`
pub fn analyze(blocks: &[Block], now: DateTime<Utc>, config: &AnomalyConfig) -> AnomalyReport {
    let recent_cutoff = now - Duration::seconds(config.recent_window_secs.max(0));
    let recent_modifications = blocks
        .iter()
        // Future-dated blocks count as recent
        .filter(|b| b.timestamp >= recent_cutoff)
        .count() as u64;

    let mut per_timestamp: HashMap<DateTime<Utc>, u64> = HashMap::new();
    for block in blocks {
        *per_timestamp.entry(block.timestamp).or_insert(0) += 1;
    }
    let duplicate_timestamps = per_timestamp.values().filter(|&&n| n > 1).sum();

    let mut unusual_actions: Vec<UnusualAction> = blocks
        .iter()
        .filter(|b| config.destructive_actions.iter().any(|a| a == &b.entry.action))
        .map(|b| UnusualAction {
            index: b.index,
            action: b.entry.action.clone(),
            actor_id: b.entry.actor_id.clone(),
        })
        .collect();
    unusual_actions.sort_by_key(|u| u.index);

    let suspicious_actors: Vec<String> = unusual_actions
        .iter()
        .map(|u| u.actor_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let risk_level = if recent_modifications > config.high_risk_threshold {
        RiskLevel::High
    } else {
        RiskLevel::Normal
    };

    AnomalyReport {
        blocks_scanned: blocks.len(),
        recent_modifications,
        duplicate_timestamps,
        unusual_actions,
        suspicious_actors,
        risk_level,
        scanned_at: now,
    }
}

#[derive(Clone)]
pub struct AnomalyDetector {
    database: Database,
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(database: Database, config: AnomalyConfig) -> Self {
        Self { database, config }
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    /// Scan with the configured window size
    pub async fn scan_default(&self) -> Result<AnomalyReport> {
        self.scan(self.config.window_size).await
    }

    /// Scan the most recent `window_size` blocks.
    ///
    /// Rows that cannot be decoded are skipped here; reporting them is the
    /// verifier's job.
    pub async fn scan(&self, window_size: u32) -> Result<AnomalyReport> {
        let rows = Queries::fetch_recent(self.database.pool(), i64::from(window_size)).await?;

        let blocks: Vec<Block> = rows
            .into_iter()
            .filter_map(|row| {
                let idx = row.idx;
                BlockRow::into_block(row)
                    .map_err(|e| warn!("Skipping block {} in anomaly scan: {}", idx, e))
                    .ok()
            })
            .collect();

        let report = analyze(&blocks, Utc::now(), &self.config);
        if report.risk_level == RiskLevel::High {
            warn!(
                "Anomaly scan: HIGH risk ({} recent modifications in last {}s)",
                report.recent_modifications, self.config.recent_window_secs
            );
        } else {
            info!(
                "Anomaly scan: {} blocks, {} duplicate timestamps, {} destructive actions",
                report.blocks_scanned,
                report.duplicate_timestamps,
                report.unusual_actions.len()
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::{AuditEntry, GENESIS_HASH};

    fn block_at(index: u64, action: &str, actor: &str, timestamp: DateTime<Utc>) -> Block {
        Block::at(
            index,
            GENESIS_HASH.to_string(),
            AuditEntry::new(action, actor, "student"),
            timestamp,
        )
    }

    #[test]
    fn test_empty_window() {
        let report = analyze(&[], Utc::now(), &AnomalyConfig::default());
        assert_eq!(report.blocks_scanned, 0);
        assert_eq!(report.recent_modifications, 0);
        assert_eq!(report.duplicate_timestamps, 0);
        assert!(report.unusual_actions.is_empty());
        assert_eq!(report.risk_level, RiskLevel::Normal);
    }

    #[test]
    fn test_shared_timestamp_is_counted_per_block() {
        let now = Utc::now();
        let shared = now - Duration::minutes(5);
        let blocks = vec![
            block_at(0, "student.create", "a", shared),
            block_at(1, "student.update", "b", shared),
            block_at(2, "student.update", "c", shared),
            block_at(3, "student.update", "c", now - Duration::minutes(1)),
        ];

        let report = analyze(&blocks, now, &AnomalyConfig::default());
        assert_eq!(report.duplicate_timestamps, 3);
    }

    #[test]
    fn test_recent_window_and_risk_threshold() {
        let now = Utc::now();
        let config = AnomalyConfig {
            high_risk_threshold: 2,
            ..AnomalyConfig::default()
        };
        let mut blocks: Vec<Block> = (0..3)
            .map(|i| block_at(i, "class.update", "t", now - Duration::minutes(10 + i as i64)))
            .collect();
        blocks.push(block_at(3, "class.update", "t", now - Duration::hours(3)));

        let report = analyze(&blocks, now, &config);
        assert_eq!(report.recent_modifications, 3);
        assert_eq!(report.risk_level, RiskLevel::High);

        let report = analyze(&blocks[..2], now, &config);
        assert_eq!(report.risk_level, RiskLevel::Normal);
    }

    #[test]
    fn test_future_dated_blocks_count_as_recent() {
        let now = Utc::now();
        let config = AnomalyConfig {
            high_risk_threshold: 1,
            ..AnomalyConfig::default()
        };
        let blocks = vec![
            block_at(0, "exam.update", "t", now - Duration::minutes(1)),
            block_at(1, "exam.update", "t", now + Duration::days(30)),
        ];

        let report = analyze(&blocks, now, &config);
        assert_eq!(report.recent_modifications, 2);
        assert_eq!(report.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_destructive_actions_collect_distinct_actors() {
        let now = Utc::now();
        let blocks = vec![
            block_at(4, "class.delete", "admin-2", now),
            block_at(3, "student.delete", "admin-1", now - Duration::seconds(1)),
            block_at(2, "student.delete", "admin-2", now - Duration::seconds(2)),
            block_at(1, "student.create", "admin-3", now - Duration::seconds(3)),
        ];

        let report = analyze(&blocks, now, &AnomalyConfig::default());
        let indices: Vec<u64> = report.unusual_actions.iter().map(|u| u.index).collect();
        assert_eq!(indices, vec![2, 3, 4]);
        assert_eq!(report.suspicious_actors, vec!["admin-1".to_string(), "admin-2".to_string()]);
    }

    #[test]
    fn test_risk_level_serializes_uppercase() {
        assert_eq!(serde_json::to_value(RiskLevel::High).unwrap(), serde_json::json!("HIGH"));
    }
}
