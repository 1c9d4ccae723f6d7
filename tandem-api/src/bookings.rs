use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tandem_booking::{CreateBooking, RescheduleRequest};
use tandem_domain::booking::{ActorRole, Booking};

use crate::auth::claims_from;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct BookingResponse {
    booking_id: Uuid,
    status: String,
    payment_status: String,
    slot_key: String,
    price_cents: i64,
    deposit_cents: i64,
    remaining_cents: i64,
    reschedule_count: i32,
}

impl From<Booking> for BookingResponse {
    fn from(b: Booking) -> Self {
        Self {
            booking_id: b.id,
            status: b.status.as_str().to_string(),
            payment_status: b.payment_status.as_str().to_string(),
            slot_key: b.slot_key.to_string(),
            price_cents: b.price_cents,
            deposit_cents: b.deposit_cents,
            remaining_cents: b.remaining_cents,
            reschedule_count: b.reschedule_count,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(create_booking))
        .route("/v1/bookings/{id}", get(get_booking))
        .route("/v1/bookings/{id}/confirm", post(confirm_booking))
        .route("/v1/bookings/{id}/complete", post(complete_booking))
        .route("/v1/bookings/{id}/cancel", post(cancel_booking))
        .route("/v1/bookings/{id}/reschedule", post(reschedule_booking))
}

#[derive(Debug, Deserialize)]
struct CreateBookingRequest {
    instructor_id: Uuid,
    scheduled_start: DateTime<Utc>,
    duration_hours: i32,
    price_cents: i64,
    package_hours: Option<i32>,
    #[serde(default = "default_method")]
    payment_method: String,
}

fn default_method() -> String {
    "card".to_string()
}

async fn create_booking(
    State(state): State<AppState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<Json<BookingResponse>, AppError> {
    let claims = claims_from(bearer.token(), &state.auth.secret)?;
    let learner_id = claims.actor_id()?;

    let booking = state
        .engine
        .create(CreateBooking {
            learner_id,
            instructor_id: req.instructor_id,
            scheduled_start: req.scheduled_start,
            duration_hours: req.duration_hours,
            price_cents: req.price_cents,
            package_hours: req.package_hours,
            payment_method: req.payment_method,
        })
        .await?;

    state.metrics.transition("requested");
    Ok(Json(booking.into()))
}

async fn get_booking(
    State(state): State<AppState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(id): Path<Uuid>,
) -> Result<Json<BookingResponse>, AppError> {
    let claims = claims_from(bearer.token(), &state.auth.secret)?;
    let actor = claims.actor_id()?;

    let booking = state.engine.get(id).await?;
    if actor != booking.learner_id && actor != booking.instructor_id && claims.role != "ADMIN" {
        return Err(AppError::AuthorizationError(
            "caller is not a party to this booking".into(),
        ));
    }
    Ok(Json(booking.into()))
}

async fn confirm_booking(
    State(state): State<AppState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(id): Path<Uuid>,
) -> Result<Json<BookingResponse>, AppError> {
    let claims = claims_from(bearer.token(), &state.auth.secret)?;
    let booking = state.engine.confirm(id, claims.actor_id()?).await?;
    state.metrics.transition("confirmed");
    Ok(Json(booking.into()))
}

#[derive(Debug, Deserialize)]
struct CompleteRequest {
    actual_duration_hours: i32,
}

async fn complete_booking(
    State(state): State<AppState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CompleteRequest>,
) -> Result<Json<BookingResponse>, AppError> {
    let claims = claims_from(bearer.token(), &state.auth.secret)?;
    let booking = state
        .engine
        .complete(id, claims.actor_id()?, req.actual_duration_hours)
        .await?;
    state.metrics.transition("completed");
    Ok(Json(booking.into()))
}

async fn cancel_booking(
    State(state): State<AppState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(id): Path<Uuid>,
) -> Result<Json<BookingResponse>, AppError> {
    let claims = claims_from(bearer.token(), &state.auth.secret)?;
    let role = claims.actor_role()?;
    if !matches!(role, ActorRole::Learner | ActorRole::Instructor) {
        return Err(AppError::AuthorizationError(
            "only booking parties can cancel".into(),
        ));
    }
    let booking = state.engine.cancel(id, claims.actor_id()?, role).await?;
    state.metrics.transition("cancelled");
    Ok(Json(booking.into()))
}

#[derive(Debug, Deserialize)]
struct RescheduleBody {
    new_start: DateTime<Utc>,
    new_duration_hours: Option<i32>,
}

async fn reschedule_booking(
    State(state): State<AppState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(id): Path<Uuid>,
    Json(req): Json<RescheduleBody>,
) -> Result<Json<BookingResponse>, AppError> {
    let claims = claims_from(bearer.token(), &state.auth.secret)?;
    let booking = state
        .engine
        .reschedule(
            id,
            claims.actor_id()?,
            RescheduleRequest {
                new_start: req.new_start,
                new_duration_hours: req.new_duration_hours,
            },
        )
        .await?;
    state.metrics.transition("rescheduled");
    Ok(Json(booking.into()))
}
