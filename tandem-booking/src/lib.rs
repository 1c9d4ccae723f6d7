pub mod engine;
pub mod policy;

pub use engine::{BookingEngine, CreateBooking, RescheduleRequest};
pub use policy::{cancellation_policy, reschedule_fee, CancellationOutcome};
