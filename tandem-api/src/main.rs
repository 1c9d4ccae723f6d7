use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tandem_api::{app, metrics::Metrics, state::{AppState, AuthConfig}, worker};
use tandem_booking::BookingEngine;
use tandem_core::authority::MockValidationAuthority;
use tandem_core::clock::SystemClock;
use tandem_core::notify::LogNotifier;
use tandem_core::payment::MockPaymentGateway;
use tandem_settlement::SettlementLedger;
use tandem_store::{
    DbClient, EventBus, PgBookingStore, PgDeadlineStore, PgSettlementStore, PgValidationStore,
    PgWalletStore, RedisClient,
};
use tandem_validation::ValidationGateway;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = tandem_store::app_config::Config::load().expect("Failed to load config");
    tracing::info!("Starting Tandem API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url)
        .await
        .expect("Failed to connect to Postgres");
    db.migrate().await.expect("Failed to run migrations");

    let redis = match &config.redis.url {
        Some(url) => Some(Arc::new(
            RedisClient::new(url).await.expect("Failed to connect to Redis"),
        )),
        None => {
            tracing::warn!("No Redis configured, rate limiting disabled");
            None
        }
    };

    let rules = config.business_rules.clone();
    let clock = Arc::new(SystemClock);
    let notifier = Arc::new(LogNotifier);
    let bus = EventBus::new(256);

    let bookings = Arc::new(PgBookingStore::new(db.pool.clone()));
    let settlements = Arc::new(PgSettlementStore::new(db.pool.clone()));
    let wallets = Arc::new(PgWalletStore::new(db.pool.clone()));
    let validations = Arc::new(PgValidationStore::new(db.pool.clone()));
    let deadlines = Arc::new(PgDeadlineStore::new(db.pool.clone()));

    // Collaborator stand-ins; swap for real gateway/authority adapters at
    // deployment.
    let gateway = Arc::new(MockPaymentGateway::new(rules.intent_expiry_minutes));
    let authority = Arc::new(MockValidationAuthority);

    let ledger = Arc::new(SettlementLedger::new(
        settlements.clone(),
        wallets.clone(),
        bookings.clone(),
        deadlines.clone(),
        gateway,
        Arc::new(bus.clone()),
        notifier.clone(),
        clock.clone(),
        rules.clone(),
    ));
    let validation = Arc::new(ValidationGateway::new(
        authority,
        validations.clone(),
        notifier.clone(),
        clock.clone(),
        rules.clone(),
    ));
    let engine = Arc::new(BookingEngine::new(
        bookings.clone(),
        validations.clone(),
        deadlines.clone(),
        ledger.clone(),
        Arc::new(bus.clone()),
        notifier,
        clock,
        rules.clone(),
    ));

    let app_state = AppState {
        engine,
        ledger,
        validation,
        bookings,
        validations,
        wallets,
        bus: bus.clone(),
        redis,
        rate_limit_per_minute: config.redis.rate_limit_per_minute,
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            expiration: config.auth.jwt_expiration_seconds,
        },
        rules,
        metrics: Arc::new(Metrics::new()),
    };

    tokio::spawn(worker::start_event_worker(app_state.clone()));
    tokio::spawn(worker::start_deadline_worker(app_state.clone(), deadlines));

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
