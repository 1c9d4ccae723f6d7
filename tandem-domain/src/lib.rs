pub mod booking;
pub mod slot;
pub mod settlement;
pub mod wallet;
pub mod validation;
pub mod deadline;
pub mod events;
pub mod repository;
pub mod memory;

pub use booking::{ActorRole, Booking, BookingStatus, PaymentState};
pub use deadline::{DeadlineKind, DeadlineRecord};
pub use events::{BookingEvent, EventSink};
pub use repository::{
    BookingStore, DeadlineStore, SettlementStore, StoreError, StoreResult, ValidationStore,
    WalletStore,
};
pub use settlement::{ChargeKind, PaymentRecord, RefundRecord, SettlementRecord, SettlementState};
pub use slot::{SlotKey, SlotReservation, SlotState};
pub use validation::{ValidationState, ValidationTask};
pub use wallet::{TransactionKind, Wallet, WalletTransaction};
