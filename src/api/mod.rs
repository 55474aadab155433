//! HTTP surface for privileged operators
//!
//! Ordinary application users never reach these routes; every `/audit`
//! route requires the configured admin bearer token.

pub mod handlers;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::audit::{AnomalyDetector, AuditLedger, ChainVerifier, IntegrityMonitor};
use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub ledger: AuditLedger,
    pub verifier: ChainVerifier,
    pub monitor: IntegrityMonitor,
    pub detector: AnomalyDetector,
}

pub fn router(state: AppState) -> Router {
    let audit_routes = Router::new()
        .route("/verify", get(handlers::verify_chain))
        .route("/monitor", get(handlers::monitor_status))
        .route("/monitor/check", post(handlers::manual_check))
        .route("/anomalies", get(handlers::anomalies))
        .route("/export", get(handlers::export))
        .route("/blocks", get(handlers::blocks))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/health", get(health_check))
        .nest("/audit", audit_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "edu-audit",
        "timestamp": chrono::Utc::now()
    }))
}

async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.config.server.admin_token.as_deref() else {
        warn!("Rejected {}: no admin token configured", request.uri().path());
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"error": "audit routes are disabled"})),
        )
            .into_response();
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if presented != Some(expected) {
        warn!("Rejected unauthorized request to {}", request.uri().path());
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "unauthorized"})),
        )
            .into_response();
    }

    next.run(request).await
}
