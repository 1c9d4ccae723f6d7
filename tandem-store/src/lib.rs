pub mod app_config;
pub mod database;
pub mod events;
pub mod redis_repo;
pub mod booking_repo;
pub mod settlement_repo;
pub mod wallet_repo;
pub mod validation_repo;
pub mod deadline_repo;

pub use booking_repo::PgBookingStore;
pub use database::DbClient;
pub use deadline_repo::PgDeadlineStore;
pub use events::EventBus;
pub use redis_repo::RedisClient;
pub use settlement_repo::PgSettlementStore;
pub use validation_repo::PgValidationStore;
pub use wallet_repo::PgWalletStore;
