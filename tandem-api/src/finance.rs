use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tandem_domain::repository::WalletStore;

use crate::auth::claims_from;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct WalletResponse {
    instructor_id: Uuid,
    available_cents: i64,
    penalties_cents: i64,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/finance/wallets/{instructor_id}", get(get_wallet))
        .route(
            "/v1/finance/wallets/{instructor_id}/payout",
            post(request_payout),
        )
}

async fn get_wallet(
    State(state): State<AppState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(instructor_id): Path<Uuid>,
) -> Result<Json<WalletResponse>, AppError> {
    let claims = claims_from(bearer.token(), &state.auth.secret)?;
    if claims.actor_id()? != instructor_id && claims.role != "ADMIN" {
        return Err(AppError::AuthorizationError(
            "wallet belongs to another instructor".into(),
        ));
    }

    let wallet = state
        .wallets
        .get(instructor_id)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;
    let (available_cents, penalties_cents) = wallet
        .map(|w| (w.available_cents, w.penalties_cents))
        .unwrap_or((0, 0));
    Ok(Json(WalletResponse {
        instructor_id,
        available_cents,
        penalties_cents,
    }))
}

#[derive(Debug, Deserialize)]
struct PayoutRequest {
    amount_cents: i64,
}

async fn request_payout(
    State(state): State<AppState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(instructor_id): Path<Uuid>,
    Json(req): Json<PayoutRequest>,
) -> Result<Json<WalletResponse>, AppError> {
    let claims = claims_from(bearer.token(), &state.auth.secret)?;
    if claims.actor_id()? != instructor_id {
        return Err(AppError::AuthorizationError(
            "wallet belongs to another instructor".into(),
        ));
    }

    state.ledger.payout(instructor_id, req.amount_cents).await?;

    let wallet = state
        .wallets
        .get(instructor_id)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .ok_or_else(|| AppError::NotFoundError("wallet".into()))?;
    Ok(Json(WalletResponse {
        instructor_id,
        available_cents: wallet.available_cents,
        penalties_cents: wallet.penalties_cents,
    }))
}
