#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use edu_audit::audit::{
    AlertSink, AuditEntry, AuditLedger, Block, ChainVerifier, IntegrityMonitor, TamperAlert,
};
use edu_audit::config::LedgerConfig;
use edu_audit::database::Database;
use edu_audit::LedgerError;

/// Setup an in-memory SQLite database for testing
pub async fn setup_test_db() -> Database {
    Database::new_in_memory().await.expect("Failed to create test database")
}

pub async fn setup_test_ledger() -> AuditLedger {
    AuditLedger::new(setup_test_db().await, LedgerConfig::default())
}

/// The five-action scenario: create a student, a class, enroll, then
/// delete both
pub fn scenario_entries() -> Vec<AuditEntry> {
    vec![
        AuditEntry::new("student.create", "admin-1", "student").with_entity_id("s-100"),
        AuditEntry::new("class.create", "admin-1", "class").with_entity_id("c-7"),
        AuditEntry::new("enrollment.create", "teacher-3", "enrollment")
            .with_entity_id("e-1")
            .with_payload(serde_json::json!({"student": "s-100", "class": "c-7"})),
        AuditEntry::new("student.delete", "admin-2", "student").with_entity_id("s-100"),
        AuditEntry::new("class.delete", "admin-2", "class").with_entity_id("c-7"),
    ]
}

pub async fn append_all(ledger: &AuditLedger, entries: Vec<AuditEntry>) -> Vec<Block> {
    let mut blocks = Vec::new();
    for entry in entries {
        blocks.push(ledger.append(entry).await.expect("append failed"));
    }
    blocks
}

/// Overwrite one column of a persisted block, bypassing the ledger
pub async fn tamper(database: &Database, index: i64, column: &str, value: &str) {
    let sql = format!("UPDATE audit_blocks SET {} = ?1 WHERE idx = ?2", column);
    sqlx::query(&sql)
        .bind(value)
        .bind(index)
        .execute(database.pool())
        .await
        .expect("tamper update failed");
}

/// Alert sink that keeps every alert in memory
#[derive(Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<TamperAlert>>,
}

impl RecordingAlertSink {
    pub fn alerts(&self) -> Vec<TamperAlert> {
        self.alerts.lock().unwrap().clone()
    }
}

impl AlertSink for RecordingAlertSink {
    fn raise(&self, alert: &TamperAlert) -> Result<(), LedgerError> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

pub fn recording_monitor(database: &Database) -> (IntegrityMonitor, Arc<RecordingAlertSink>) {
    let sink = Arc::new(RecordingAlertSink::default());
    let monitor =
        IntegrityMonitor::with_alert_sink(ChainVerifier::new(database.clone()), sink.clone());
    (monitor, sink)
}
