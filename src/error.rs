use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Failures that stop a verification before a decision can be made.
///
/// Policy rejections are not errors; they come back as an invalid
/// [`VerificationResult`](crate::models::VerificationResult).
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Ledger node unavailable: {0}")]
    NodeUnavailable(String),

    #[error("Malformed node response: {0}")]
    MalformedResponse(String),

    #[error("Payment ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Invalid transaction id: {0}")]
    InvalidTransactionId(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl GateError {
    /// Infrastructure failures say nothing about the payment itself and may
    /// succeed when tried again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GateError::NodeUnavailable(_)
                | GateError::MalformedResponse(_)
                | GateError::LedgerUnavailable(_)
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            GateError::NodeUnavailable(_) => "NODE_UNAVAILABLE",
            GateError::MalformedResponse(_) => "MALFORMED_RESPONSE",
            GateError::LedgerUnavailable(_) => "LEDGER_UNAVAILABLE",
            GateError::InvalidTransactionId(_) => "INVALID_TRANSACTION_ID",
            GateError::ConfigError(_) => "CONFIG_ERROR",
        }
    }
}

impl From<redis::RedisError> for GateError {
    fn from(err: redis::RedisError) -> Self {
        GateError::LedgerUnavailable(err.to_string())
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub error_code: String,
    pub retryable: bool,
    pub timestamp: chrono::DateTime<Utc>,
    pub request_id: String,
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();

        let status = match &self {
            GateError::NodeUnavailable(_) | GateError::MalformedResponse(_) => {
                StatusCode::BAD_GATEWAY
            }
            GateError::LedgerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GateError::InvalidTransactionId(_) => StatusCode::BAD_REQUEST,
            GateError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let error_code = self.error_code();

        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
            error_code: error_code.to_string(),
            retryable: self.is_retryable(),
            timestamp: Utc::now(),
            request_id,
        };

        tracing::error!(
            error = ?self,
            error_code = error_code,
            "Request failed"
        );

        (status, Json(body)).into_response()
    }
}
