pub mod fees;
pub mod ledger;

pub use fees::fee_bps_for;
pub use ledger::SettlementLedger;
