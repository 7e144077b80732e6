use crate::{
    error::GateError,
    models::{ApiResponse, PaymentUsage, TransactionId, VerificationResult, VerifyRequest},
    services::PaymentVerifier,
};
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<PaymentVerifier>,
}

/// Policy rejections are a successful response with `valid: false`; only
/// infrastructure and input failures become error responses.
pub async fn verify_payment(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<ApiResponse<VerificationResult>>, GateError> {
    let result = state
        .verifier
        .verify(&request.tx_hash, request.agent.as_deref(), request.mark_used)
        .await?;

    Ok(Json(ApiResponse {
        success: true,
        data: result,
        timestamp: Utc::now(),
        request_id: Uuid::new_v4().to_string(),
    }))
}

pub async fn payment_usage(
    State(state): State<AppState>,
    Path(tx_hash): Path<String>,
) -> Result<Json<ApiResponse<PaymentUsage>>, GateError> {
    let tx = TransactionId::parse(&tx_hash)?;
    let used = state.verifier.ledger().contains(&tx).await?;

    Ok(Json(ApiResponse {
        success: true,
        data: PaymentUsage { tx_hash: tx, used },
        timestamp: Utc::now(),
        request_id: Uuid::new_v4().to_string(),
    }))
}
