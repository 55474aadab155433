//! Integrity Monitor
//!
//! Background service that re-verifies the audit chain on a fixed
//! interval, keeps the last known status, and raises alerts when the
//! chain is found tampered. Nothing is ever repaired: a broken chain is a
//! finding for operators, who restore from a trusted backup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::audit::alert::{AlertSink, AlertSinkConfig, TamperAlert, TracingAlertSink};
use crate::audit::schedule::RepeatingTask;
use crate::audit::verify::{ChainStatus, ChainVerifier, TamperReason};
use crate::error::{LedgerError, Result};

pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub check_interval_ms: u64,
    pub alert_on_tampering: bool,
    /// Accepted in configuration but never honoured; `true` is rejected.
    pub auto_repair: bool,
    pub alert_sink: AlertSinkConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: DEFAULT_CHECK_INTERVAL_MS,
            alert_on_tampering: true,
            auto_repair: false,
            alert_sink: AlertSinkConfig::Log,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.check_interval_ms == 0 {
            return Err(LedgerError::invalid_interval(self.check_interval_ms));
        }
        if self.auto_repair {
            return Err(LedgerError::auto_repair_unsupported());
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

/// Process-local view of the monitor; reset on restart
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub active: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub check_interval_ms: Option<u64>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_status: Option<ChainStatus>,
    pub last_reason: Option<TamperReason>,
    pub last_error: Option<String>,
    pub checks_run: u64,
    pub alerts_raised: u64,
}

struct MonitorInner {
    verifier: ChainVerifier,
    config: RwLock<MonitorConfig>,
    snapshot: RwLock<MonitorSnapshot>,
    schedule: Mutex<Option<RepeatingTask>>,
    sink_override: Option<Arc<dyn AlertSink>>,
    sink: RwLock<Arc<dyn AlertSink>>,
}

/// Start/stop service around periodic chain verification.
///
/// Each instance owns its own schedule and snapshot, so independent
/// monitors (one per ledger, or per test) never interfere.
#[derive(Clone)]
pub struct IntegrityMonitor {
    inner: Arc<MonitorInner>,
}

impl IntegrityMonitor {
    pub fn new(verifier: ChainVerifier) -> Self {
        Self::build(verifier, None)
    }

    /// Route alerts to `sink` regardless of the configured sink kind
    pub fn with_alert_sink(verifier: ChainVerifier, sink: Arc<dyn AlertSink>) -> Self {
        Self::build(verifier, Some(sink))
    }

    fn build(verifier: ChainVerifier, sink_override: Option<Arc<dyn AlertSink>>) -> Self {
        let sink = sink_override
            .clone()
            .unwrap_or_else(|| Arc::new(TracingAlertSink) as Arc<dyn AlertSink>);

        Self {
            inner: Arc::new(MonitorInner {
                verifier,
                config: RwLock::new(MonitorConfig::default()),
                snapshot: RwLock::new(MonitorSnapshot::default()),
                schedule: Mutex::new(None),
                sink_override,
                sink: RwLock::new(sink),
            }),
        }
    }

    /// Run one check now, then every `check_interval_ms`.
    ///
    /// Invalid configuration is rejected before anything is scheduled.
    /// Starting an already active monitor is a logged no-op.
    pub async fn start(&self, config: MonitorConfig) -> Result<()> {
        config.validate()?;

        let mut schedule = self.inner.schedule.lock().await;
        if schedule.is_some() {
            warn!("Integrity monitor already active; ignoring duplicate start");
            return Ok(());
        }

        let sink = self
            .inner
            .sink_override
            .clone()
            .unwrap_or_else(|| config.alert_sink.build());
        *self.inner.sink.write().await = sink;
        *self.inner.config.write().await = config.clone();

        {
            let mut snapshot = self.inner.snapshot.write().await;
            snapshot.active = true;
            snapshot.started_at = Some(Utc::now());
            snapshot.check_interval_ms = Some(config.check_interval_ms);
        }

        let inner = self.inner.clone();
        *schedule = Some(RepeatingTask::spawn(config.interval(), move || {
            let inner = inner.clone();
            async move {
                if let Err(e) = inner.check(false).await {
                    error!("Scheduled integrity check failed: {}", e);
                }
            }
        }));

        info!(
            "Integrity monitor started (interval {}ms, alerts {})",
            config.check_interval_ms,
            if config.alert_on_tampering { "on" } else { "off" }
        );
        Ok(())
    }

    /// Cancel the schedule. An in-flight check is not waited for.
    pub async fn stop(&self) {
        let task = self.inner.schedule.lock().await.take();
        match task {
            Some(task) => {
                task.cancel();
                self.inner.snapshot.write().await.active = false;
                info!("Integrity monitor stopped");
            }
            None => debug!("Integrity monitor not active; nothing to stop"),
        }
    }

    pub async fn status(&self) -> MonitorSnapshot {
        self.inner.snapshot.read().await.clone()
    }

    pub async fn is_active(&self) -> bool {
        self.inner.schedule.lock().await.is_some()
    }

    /// Verify immediately, outside the schedule. Runs whether or not the
    /// monitor is started and updates the same snapshot.
    pub async fn trigger_manual_check(&self) -> Result<ChainStatus> {
        info!("Manual integrity check requested");
        self.inner.check(true).await
    }
}

impl MonitorInner {
    async fn check(&self, manual: bool) -> Result<ChainStatus> {
        let result = self.verifier.verify_range(0, None).await;
        let checked_at = Utc::now();

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                let mut snapshot = self.snapshot.write().await;
                snapshot.checks_run += 1;
                snapshot.last_checked_at = Some(checked_at);
                snapshot.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        {
            let mut snapshot = self.snapshot.write().await;
            snapshot.checks_run += 1;
            snapshot.last_checked_at = Some(checked_at);
            snapshot.last_status = Some(report.status);
            snapshot.last_reason = report.reason.clone();
            snapshot.last_error = None;
        }

        if let ChainStatus::Tampered { at } = report.status {
            let alert = TamperAlert {
                at_index: at,
                reason: report.reason,
                detected_at: checked_at,
                manual,
            };
            self.raise(alert).await;
        } else {
            debug!("Integrity check passed ({} blocks)", report.blocks_checked);
        }

        Ok(report.status)
    }

    async fn raise(&self, alert: TamperAlert) {
        if !self.config.read().await.alert_on_tampering {
            warn!("{} (alerting disabled)", alert.summary());
            return;
        }

        let sink = self.sink.read().await.clone();
        match sink.raise(&alert) {
            Ok(()) => self.snapshot.write().await.alerts_raised += 1,
            Err(e) => error!("Failed to deliver tamper alert for block {}: {}", alert.at_index, e),
        }
    }
}
