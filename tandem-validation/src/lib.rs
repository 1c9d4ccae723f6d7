pub mod gateway;

pub use gateway::ValidationGateway;
