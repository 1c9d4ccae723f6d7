use std::sync::Arc;

use tandem_booking::BookingEngine;
use tandem_core::config::BusinessRules;
use tandem_domain::repository::{BookingStore, ValidationStore, WalletStore};
use tandem_settlement::SettlementLedger;
use tandem_store::{EventBus, RedisClient};
use tandem_validation::ValidationGateway;

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BookingEngine>,
    pub ledger: Arc<SettlementLedger>,
    pub validation: Arc<ValidationGateway>,
    pub bookings: Arc<dyn BookingStore>,
    pub validations: Arc<dyn ValidationStore>,
    pub wallets: Arc<dyn WalletStore>,
    pub bus: EventBus,
    pub redis: Option<Arc<RedisClient>>,
    pub rate_limit_per_minute: u32,
    pub auth: AuthConfig,
    pub rules: BusinessRules,
    pub metrics: Arc<Metrics>,
}
