use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical key for an (instructor, start-time, duration) reservation unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SlotKey(pub String);

impl SlotKey {
    pub fn new(start: DateTime<Utc>, duration_hours: i32) -> Self {
        Self(format!(
            "{}+{}h",
            start.format("%Y%m%dT%H%M"),
            duration_hours
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotState {
    Reserved,
    Released,
}

/// Exclusive claim on one instructor time window. Created in the same
/// transaction as the owning booking; a new claim on the key is rejected
/// unless the prior one is Released.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotReservation {
    pub instructor_id: Uuid,
    pub slot_key: SlotKey,
    pub booking_id: Uuid,
    pub state: SlotState,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_slot_key_format() {
        let start = Utc.with_ymd_and_hms(2026, 8, 6, 14, 0, 0).unwrap();
        assert_eq!(SlotKey::new(start, 2).as_str(), "20260806T1400+2h");
    }

    #[test]
    fn test_same_window_same_key() {
        let start = Utc.with_ymd_and_hms(2026, 8, 6, 9, 30, 0).unwrap();
        assert_eq!(SlotKey::new(start, 3), SlotKey::new(start, 3));
        assert_ne!(SlotKey::new(start, 3), SlotKey::new(start, 2));
    }
}
