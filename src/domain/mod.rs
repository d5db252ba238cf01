//! Domain types and determinism layer for the wallet ledger.
//!
//! This module provides:
//! - Lossless numeric handling via Decimal wrapper
//! - Domain primitives: TimeMs, Wallet, MarketId, OutcomeIndex, Role, FillSource
//! - Fill and Resolution input records
//! - Stable fill ordering key helper for deterministic processing

pub mod decimal;
pub mod fill;
pub mod ordering;
pub mod primitives;
pub mod resolution;

pub use decimal::Decimal;
pub use fill::Fill;
pub use ordering::{sort_fills_deterministic, FillOrderingKey};
pub use primitives::{
    FillSource, MarketId, OutcomeIndex, ParseIdError, PositionKey, Role, TimeMs, Wallet,
};
pub use resolution::Resolution;
