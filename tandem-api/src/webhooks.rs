use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::Deserialize;

use tandem_core::payment::ChargeStatus;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChargeResultWebhook {
    pub intent_id: String,
    pub status: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/webhooks/payments", post(handle_payment_webhook))
}

/// Receive charge results from the payment gateway. Delivery is
/// at-least-once; the ledger absorbs redeliveries, so every recognised
/// payload is acknowledged with 200.
async fn handle_payment_webhook(
    State(state): State<AppState>,
    Json(payload): Json<ChargeResultWebhook>,
) -> Result<StatusCode, StatusCode> {
    tracing::info!(
        "Received charge result for intent {}: {}",
        payload.intent_id,
        payload.status
    );

    let status = match payload.status.as_str() {
        "approved" | "APPROVED" => ChargeStatus::Approved,
        "rejected" | "REJECTED" => ChargeStatus::Rejected,
        "expired" | "EXPIRED" => ChargeStatus::Expired,
        "pending" | "PENDING" => return Ok(StatusCode::OK),
        _ => return Err(StatusCode::BAD_REQUEST),
    };

    state
        .ledger
        .handle_charge_result(&payload.intent_id, status)
        .await
        .map_err(|e| {
            tracing::error!("Charge result processing failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(StatusCode::OK)
}
