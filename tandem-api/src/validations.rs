use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use serde::Serialize;
use uuid::Uuid;

use tandem_domain::repository::ValidationStore;
use tandem_domain::validation::ValidationTask;

use crate::auth::claims_from;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct ValidationResponse {
    booking_id: Uuid,
    attempt: u32,
    state: String,
    protocol_id: Option<String>,
    failure_reason: Option<String>,
    validated_by: Option<Uuid>,
}

impl From<ValidationTask> for ValidationResponse {
    fn from(t: ValidationTask) -> Self {
        Self {
            booking_id: t.booking_id,
            attempt: t.attempt,
            state: format!("{:?}", t.state),
            protocol_id: t.protocol_id,
            failure_reason: t.failure_reason,
            validated_by: t.validated_by,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/validations/{booking_id}", get(get_validation))
        .route(
            "/v1/validations/{booking_id}/override",
            post(override_validation),
        )
}

async fn get_validation(
    State(state): State<AppState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<ValidationResponse>, AppError> {
    claims_from(bearer.token(), &state.auth.secret)?.require_admin()?;
    let task = state
        .validations
        .get(booking_id)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .ok_or_else(|| AppError::NotFoundError(format!("validation task {booking_id}")))?;
    Ok(Json(task.into()))
}

/// Force a stuck certification through: RequiresManualReview -> Validated,
/// with the admin recorded as the authorizer.
async fn override_validation(
    State(state): State<AppState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<ValidationResponse>, AppError> {
    let claims = claims_from(bearer.token(), &state.auth.secret)?;
    claims.require_admin()?;
    let admin = claims.actor_id()?;

    let booking = state.engine.get(booking_id).await?;
    state.validation.override_validated(&booking, admin).await?;
    state.metrics.certification("overridden");

    let task = state
        .validations
        .get(booking_id)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .ok_or_else(|| AppError::NotFoundError(format!("validation task {booking_id}")))?;
    Ok(Json(task.into()))
}
