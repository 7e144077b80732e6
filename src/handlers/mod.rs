pub mod health;
pub mod verify;

pub use health::*;
pub use verify::*;

use axum::{
    routing::{get, post},
    Router,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/verify", post(verify_payment))
        .route("/api/payments/:tx_hash", get(payment_usage))
        .with_state(state)
}
