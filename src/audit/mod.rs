//! Audit Ledger
//!
//! Tamper-evident record of every administrative action: an append-only
//! hash chain, its verifier, a background integrity monitor, a heuristic
//! anomaly detector and a read-only exporter.

pub mod alert;
pub mod anomaly;
pub mod entry;
pub mod export;
pub mod ledger;
pub mod monitor;
pub mod schedule;
pub mod verify;

pub use alert::{AlertSink, AlertSinkConfig, FileAlertSink, TamperAlert, TracingAlertSink};
pub use anomaly::{AnomalyConfig, AnomalyDetector, AnomalyReport, RiskLevel};
pub use entry::{AuditEntry, Block, GENESIS_HASH};
pub use export::{ExportConfig, LedgerExport, LedgerExporter};
pub use ledger::{execute_with_audit, AuditLedger};
pub use monitor::{IntegrityMonitor, MonitorConfig, MonitorSnapshot};
pub use verify::{ChainStatus, ChainVerifier, VerificationReport, VerifyResponse};
