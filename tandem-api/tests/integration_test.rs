use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use tandem_api::metrics::Metrics;
use tandem_api::state::{AppState, AuthConfig};
use tandem_booking::BookingEngine;
use tandem_core::authority::MockValidationAuthority;
use tandem_core::clock::SystemClock;
use tandem_core::config::BusinessRules;
use tandem_core::notify::LogNotifier;
use tandem_core::payment::MockPaymentGateway;
use tandem_domain::memory::{
    MemoryBookingStore, MemoryDeadlineStore, MemorySettlementStore, MemoryValidationStore,
    MemoryWalletStore,
};
use tandem_settlement::SettlementLedger;
use tandem_store::EventBus;
use tandem_validation::ValidationGateway;

const SECRET: &str = "integration-secret";

fn test_app() -> Router {
    let rules = BusinessRules::default();
    let clock = Arc::new(SystemClock);
    let notifier = Arc::new(LogNotifier);
    let bus = EventBus::new(64);

    let bookings = Arc::new(MemoryBookingStore::new());
    let settlements = Arc::new(MemorySettlementStore::new());
    let wallets = Arc::new(MemoryWalletStore::new());
    let validations = Arc::new(MemoryValidationStore::new());
    let deadlines = Arc::new(MemoryDeadlineStore::new());

    let ledger = Arc::new(SettlementLedger::new(
        settlements,
        wallets.clone(),
        bookings.clone(),
        deadlines.clone(),
        Arc::new(MockPaymentGateway::new(10)),
        Arc::new(bus.clone()),
        notifier.clone(),
        clock.clone(),
        rules.clone(),
    ));
    let validation = Arc::new(ValidationGateway::new(
        Arc::new(MockValidationAuthority),
        validations.clone(),
        notifier.clone(),
        clock.clone(),
        rules.clone(),
    ));
    let engine = Arc::new(BookingEngine::new(
        bookings.clone(),
        validations.clone(),
        deadlines,
        ledger.clone(),
        Arc::new(bus.clone()),
        notifier,
        clock,
        rules.clone(),
    ));

    tandem_api::app(AppState {
        engine,
        ledger,
        validation,
        bookings,
        validations,
        wallets,
        bus,
        redis: None,
        rate_limit_per_minute: 100,
        auth: AuthConfig {
            secret: SECRET.to_string(),
            expiration: 3600,
        },
        rules,
        metrics: Arc::new(Metrics::new()),
    })
}

fn token(user_id: Uuid, role: &str) -> String {
    let claims = json!({
        "sub": user_id.to_string(),
        "role": role,
        "exp": (Utc::now() + Duration::hours(1)).timestamp(),
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn post_json(uri: &str, bearer: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {bearer}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_booking_flow_over_http() {
    let app = test_app();
    let learner = Uuid::new_v4();
    let instructor = Uuid::new_v4();
    let start = Utc::now() + Duration::hours(48);

    // Create
    let response = app
        .clone()
        .oneshot(post_json(
            "/v1/bookings",
            &token(learner, "LEARNER"),
            json!({
                "instructor_id": instructor,
                "scheduled_start": start,
                "duration_hours": 2,
                "price_cents": 14_000,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "REQUESTED");
    assert_eq!(body["deposit_cents"], 2_800);
    assert_eq!(body["remaining_cents"], 11_200);
    let booking_id = body["booking_id"].as_str().unwrap().to_string();

    // A stranger cannot confirm it.
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/v1/bookings/{booking_id}/confirm"),
            &token(Uuid::new_v4(), "INSTRUCTOR"),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // The booked instructor can.
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/v1/bookings/{booking_id}/confirm"),
            &token(instructor, "INSTRUCTOR"),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "CONFIRMED");

    // Confirming again is a structured conflict.
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/v1/bookings/{booking_id}/confirm"),
            &token(instructor, "INSTRUCTOR"),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_slot_conflict_surfaces_as_409() {
    let app = test_app();
    let instructor = Uuid::new_v4();
    let start = Utc::now() + Duration::hours(24);
    let body = |learner: Uuid| {
        post_json(
            "/v1/bookings",
            &token(learner, "LEARNER"),
            json!({
                "instructor_id": instructor,
                "scheduled_start": start,
                "duration_hours": 2,
                "price_cents": 9_000,
            }),
        )
    };

    let first = app.clone().oneshot(body(Uuid::new_v4())).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.clone().oneshot(body(Uuid::new_v4())).await.unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_webhook_marks_deposit_paid() {
    let app = test_app();
    let learner = Uuid::new_v4();
    let instructor = Uuid::new_v4();

    let response = app
        .clone()
        .oneshot(post_json(
            "/v1/bookings",
            &token(learner, "LEARNER"),
            json!({
                "instructor_id": instructor,
                "scheduled_start": Utc::now() + Duration::hours(24),
                "duration_hours": 1,
                "price_cents": 6_000,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let booking_id = body["booking_id"].as_str().unwrap().to_string();

    // Let the spawned deposit task open its intent.
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    // The mock gateway derives the intent id from the booking.
    let booking_uuid = Uuid::parse_str(&booking_id).unwrap();
    let intent_id = format!("mock_pi_{}_{}", booking_uuid.simple(), 1_200);
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/webhooks/payments")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "intent_id": intent_id, "status": "approved" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/v1/bookings/{booking_id}"))
                .header(
                    header::AUTHORIZATION,
                    format!("Bearer {}", token(learner, "LEARNER")),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["payment_status"], "DEPOSIT_PAID");
}

#[tokio::test]
async fn test_metrics_and_auth_token_routes() {
    let app = test_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/auth/token")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "user_id": Uuid::new_v4(), "role": "LEARNER" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["token"].as_str().is_some());
}

#[tokio::test]
async fn test_validation_routes_require_admin() {
    let app = test_app();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/v1/validations/{}", Uuid::new_v4()))
                .header(
                    header::AUTHORIZATION,
                    format!("Bearer {}", token(Uuid::new_v4(), "LEARNER")),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
