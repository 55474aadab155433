use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info};

use crate::api::AppState;
use crate::audit::export::LedgerExporter;
use crate::error::LedgerError;

const MAX_SCAN_WINDOW: u32 = 10_000;
const DEFAULT_PAGE_LIMIT: u32 = 100;
const MAX_PAGE_LIMIT: u32 = 1_000;

#[derive(Debug, Deserialize)]
pub struct AnomalyQuery {
    pub window: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct BlocksQuery {
    pub from: Option<u64>,
    pub limit: Option<u32>,
}

/// `{ "ok": true }` or `{ "ok": false, "at": n }`
pub async fn verify_chain(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.verifier.verify_chain().await {
        Ok(status) => (StatusCode::OK, Json(serde_json::json!(status.to_response()))),
        Err(e) => failure("verify audit chain", e),
    }
}

pub async fn monitor_status(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let snapshot = state.monitor.status().await;
    (StatusCode::OK, Json(serde_json::json!(snapshot)))
}

pub async fn manual_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.monitor.trigger_manual_check().await {
        Ok(status) => {
            info!("Manual check via API: {:?}", status);
            (StatusCode::OK, Json(serde_json::json!(status.to_response())))
        }
        Err(e) => failure("run manual integrity check", e),
    }
}

pub async fn anomalies(
    State(state): State<AppState>,
    Query(query): Query<AnomalyQuery>,
) -> (StatusCode, Json<Value>) {
    let window = query
        .window
        .unwrap_or(state.detector.config().window_size)
        .min(MAX_SCAN_WINDOW);

    match state.detector.scan(window).await {
        Ok(report) => (StatusCode::OK, Json(serde_json::json!(report))),
        Err(e) => failure("scan for anomalies", e),
    }
}

pub async fn export(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let exporter = LedgerExporter::new(
        state.ledger.database().clone(),
        state.verifier.clone(),
        state.detector.clone(),
        state.config.export.clone(),
    );

    match exporter.export().await {
        Ok(export) => (StatusCode::OK, Json(serde_json::json!(export))),
        Err(e) => failure("export ledger", e),
    }
}

pub async fn blocks(
    State(state): State<AppState>,
    Query(query): Query<BlocksQuery>,
) -> (StatusCode, Json<Value>) {
    let from = query.from.unwrap_or(0);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);

    match state.ledger.blocks(from, limit).await {
        Ok(blocks) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "from": from,
                "count": blocks.len(),
                "blocks": blocks,
            })),
        ),
        Err(e) => failure("read audit blocks", e),
    }
}

fn failure(what: &str, err: LedgerError) -> (StatusCode, Json<Value>) {
    error!("Failed to {}: {}", what, err);
    let status = match err {
        LedgerError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({"error": "failed"})))
}
