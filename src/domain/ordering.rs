//! Stable fill ordering for deterministic processing.

use crate::domain::Fill;

/// Stable ordering key for fills.
///
/// Ensures deterministic ordering of fills with the same timestamp.
/// Ordering: event_time -> tx_id -> log_index -> fill_key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FillOrderingKey {
    /// Time in milliseconds (primary sort).
    pub time_ms: i64,
    /// Transaction identifier (secondary sort).
    pub tx_id: String,
    /// Position within the transaction (tertiary sort).
    pub log_index: i64,
    /// Fill key hash (fallback sort).
    pub fill_key: String,
}

impl FillOrderingKey {
    /// Create an ordering key from a Fill.
    pub fn from_fill(fill: &Fill) -> Self {
        FillOrderingKey {
            time_ms: fill.event_time.as_i64(),
            tx_id: fill.tx_id.clone(),
            log_index: fill.log_index,
            fill_key: fill.fill_key().to_string(),
        }
    }

    /// Returns true if fill_a should come before fill_b.
    pub fn should_come_before(fill_a: &Fill, fill_b: &Fill) -> bool {
        Self::from_fill(fill_a) < Self::from_fill(fill_b)
    }
}

/// Sort fills deterministically.
pub fn sort_fills_deterministic(fills: &mut [Fill]) {
    fills.sort_by_cached_key(FillOrderingKey::from_fill);
}
