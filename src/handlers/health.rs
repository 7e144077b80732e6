use crate::{handlers::AppState, models::HealthStatus};
use axum::{extract::State, Json};
use chrono::Utc;

pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    let block_height = match state.verifier.chain().current_height().await {
        Ok(height) => Some(height),
        Err(e) => {
            tracing::warn!("Health check: ledger node unreachable: {}", e);
            None
        }
    };
    let ledger_ok = match state.verifier.ledger().probe().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Health check: payment ledger unavailable: {}", e);
            false
        }
    };
    let node_ok = block_height.is_some();

    let status = match (node_ok, ledger_ok) {
        (true, true) => "healthy",
        (true, false) | (false, true) => "degraded",
        (false, false) => "unhealthy",
    };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ledger_node: node_ok,
        block_height,
        payment_ledger: ledger_ok,
        timestamp: Utc::now(),
    })
}
