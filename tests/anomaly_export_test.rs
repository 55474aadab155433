//! Anomaly scans and exports over persisted ledgers

use chrono::{Duration, Utc};

use edu_audit::audit::export::{load_export, save_export};
use edu_audit::audit::{
    AnomalyConfig, AnomalyDetector, AuditEntry, Block, ChainVerifier, ExportConfig, LedgerExporter,
    RiskLevel, VerifyResponse, GENESIS_HASH,
};
use edu_audit::database::models::BlockRow;
use edu_audit::database::queries::Queries;
use edu_audit::database::Database;

mod common;
use common::*;

/// Persist a hand-built, correctly linked chain with chosen timestamps
async fn insert_chain(database: &Database, blocks: &[(&str, &str, chrono::DateTime<Utc>)]) {
    let mut prev_hash = GENESIS_HASH.to_string();
    for (i, (action, actor, timestamp)) in blocks.iter().enumerate() {
        let block = Block::at(
            i as u64,
            prev_hash.clone(),
            AuditEntry::new(*action, *actor, "student"),
            *timestamp,
        );
        Queries::insert_block(database.pool(), &BlockRow::from_block(&block).unwrap())
            .await
            .unwrap();
        prev_hash = block.hash;
    }
}

#[tokio::test]
async fn test_empty_ledger_scan_does_not_fail() {
    let database = setup_test_db().await;
    let detector = AnomalyDetector::new(database, AnomalyConfig::default());

    let report = detector.scan(100).await.unwrap();
    assert_eq!(report.blocks_scanned, 0);
    assert_eq!(report.duplicate_timestamps, 0);
    assert_eq!(report.risk_level, RiskLevel::Normal);
}

#[tokio::test]
async fn test_three_blocks_sharing_a_timestamp() {
    let database = setup_test_db().await;
    let shared = Utc::now() - Duration::minutes(2);
    insert_chain(
        &database,
        &[
            ("student.update", "admin-1", shared),
            ("student.update", "admin-2", shared),
            ("student.update", "admin-3", shared),
        ],
    )
    .await;

    let detector = AnomalyDetector::new(database.clone(), AnomalyConfig::default());
    let report = detector.scan(100).await.unwrap();
    assert!(report.duplicate_timestamps >= 2);

    // The chain itself is intact: anomalies are independent of tampering
    let status = ChainVerifier::new(database).verify_chain().await.unwrap();
    assert!(status.is_verified());
}

#[tokio::test]
async fn test_scenario_flags_deletions_and_their_actors() {
    let ledger = setup_test_ledger().await;
    append_all(&ledger, scenario_entries()).await;

    let detector = AnomalyDetector::new(ledger.database().clone(), AnomalyConfig::default());
    let report = detector.scan(100).await.unwrap();

    let actions: Vec<&str> = report.unusual_actions.iter().map(|u| u.action.as_str()).collect();
    assert_eq!(actions, vec!["student.delete", "class.delete"]);
    assert_eq!(report.suspicious_actors, vec!["admin-2".to_string()]);
    assert_eq!(report.recent_modifications, 5);
    assert_eq!(report.risk_level, RiskLevel::Normal);
}

#[tokio::test]
async fn test_burst_of_recent_activity_is_high_risk() {
    let ledger = setup_test_ledger().await;
    for i in 0..12 {
        ledger
            .append(AuditEntry::new("assignment.update", format!("teacher-{}", i), "assignment"))
            .await
            .unwrap();
    }

    let config = AnomalyConfig {
        high_risk_threshold: 10,
        ..AnomalyConfig::default()
    };
    let detector = AnomalyDetector::new(ledger.database().clone(), config);
    assert_eq!(detector.scan(100).await.unwrap().risk_level, RiskLevel::High);

    // A narrower window sees too few blocks to cross the threshold
    assert_eq!(detector.scan(5).await.unwrap().risk_level, RiskLevel::Normal);
}

#[tokio::test]
async fn test_old_activity_is_not_recent() {
    let database = setup_test_db().await;
    let old = Utc::now() - Duration::hours(5);
    insert_chain(
        &database,
        &[
            ("class.update", "t-1", old),
            ("class.update", "t-1", old + Duration::seconds(1)),
            ("class.update", "t-1", Utc::now() - Duration::minutes(1)),
        ],
    )
    .await;

    let report = AnomalyDetector::new(database, AnomalyConfig::default())
        .scan(100)
        .await
        .unwrap();
    assert_eq!(report.recent_modifications, 1);
}

fn exporter_for(database: &Database, config: ExportConfig) -> LedgerExporter {
    LedgerExporter::new(
        database.clone(),
        ChainVerifier::new(database.clone()),
        AnomalyDetector::new(database.clone(), AnomalyConfig::default()),
        config,
    )
}

#[tokio::test]
async fn test_export_combines_blocks_verification_and_anomalies() {
    let ledger = setup_test_ledger().await;
    let appended = append_all(&ledger, scenario_entries()).await;

    let config = ExportConfig {
        page_size: 2,
        ..ExportConfig::default()
    };
    let export = exporter_for(ledger.database(), config).export().await.unwrap();

    assert_eq!(export.block_count, 5);
    let indices: Vec<u64> = export.blocks.iter().map(|b| b.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    assert_eq!(export.blocks[1].hash.len(), 16);
    assert!(appended[1].hash.starts_with(&export.blocks[1].hash));
    assert!(export.verification.ok);
    assert_eq!(export.anomalies.unusual_actions.len(), 2);

    // Exporting changed nothing
    assert_eq!(ledger.len().await.unwrap(), 5);
}

#[tokio::test]
async fn test_export_reports_tampering() {
    let ledger = setup_test_ledger().await;
    append_all(&ledger, scenario_entries()).await;
    tamper(ledger.database(), 2, "hash", &"e".repeat(64)).await;

    let config = ExportConfig {
        hash_display_len: None,
        ..ExportConfig::default()
    };
    let export = exporter_for(ledger.database(), config).export().await.unwrap();

    assert!(!export.verification.ok);
    assert_eq!(export.verification.at, Some(2));
    assert_eq!(export.blocks[2].hash, "e".repeat(64));
}

#[tokio::test]
async fn test_export_succeeds_when_a_row_no_longer_decodes() {
    let ledger = setup_test_ledger().await;
    append_all(&ledger, scenario_entries()).await;
    tamper(ledger.database(), 1, "data", "garbage").await;

    let export = exporter_for(ledger.database(), ExportConfig::default())
        .export()
        .await
        .unwrap();

    assert_eq!(export.verification, VerifyResponse { ok: false, at: Some(1) });
    assert_eq!(export.block_count, 5);

    let broken = &export.blocks[1];
    assert_eq!(broken.index, 1);
    assert!(broken.entry.is_none());
    assert_eq!(broken.raw_data.as_deref(), Some("garbage"));
    assert!(broken.decode_error.is_some());
    assert!(export.blocks[2].is_decoded());

    // The anomaly scan skips the row instead of failing
    assert_eq!(export.anomalies.blocks_scanned, 4);
}

#[tokio::test]
async fn test_export_round_trips_through_json_and_yaml() {
    let ledger = setup_test_ledger().await;
    append_all(&ledger, scenario_entries()).await;
    tamper(ledger.database(), 4, "timestamp", "not a time").await;
    let export = exporter_for(ledger.database(), ExportConfig::default())
        .export()
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    for name in ["export.json", "export.yaml"] {
        let path = dir.path().join(name);
        save_export(&export, &path).await.unwrap();

        let loaded = load_export(&path).await.unwrap();
        assert_eq!(loaded.export_id, export.export_id);
        assert_eq!(loaded.blocks, export.blocks);
        assert_eq!(loaded.verification, export.verification);
    }
}
