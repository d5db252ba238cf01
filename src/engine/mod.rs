//! Pure computation engine(s) for deterministic ledger logic.
//!
//! Nothing in here touches storage or the network: every entry point takes an
//! explicit snapshot of fills, resolutions and policy, so the same call is used
//! by tests, batch rebuilds and the API.

use crate::domain::{Decimal, FillSource, PositionKey, TimeMs};
use std::collections::BTreeSet;
use thiserror::Error;

pub mod aggregator;
pub mod canonical;
pub mod lot_ledger;
pub mod normalizer;
pub mod ranker;
pub mod settlement;
pub mod unit;

pub use aggregator::{
    aggregate_position, aggregate_wallet, aggregate_wallets, lot_rows, LotRow, Position,
    ResolutionStatus, RoiStats, WalletSummary,
};
pub use canonical::{Canonicalizer, IdentityCanonicalizer, WalletAliases};
pub use lot_ledger::{Lot, LotLedger};
pub use normalizer::{normalize, ExcludedFill, NormalizeReport, Normalized};
pub use ranker::{rank, Confidence, FunnelStage, Leaderboard, LeaderboardFilters, RankedWallet, SortKey};
pub use settlement::settle;
pub use unit::{compute_unit, UnitLedger};

/// One ledger-ready event for a single (wallet, market, outcome).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvent {
    pub fill_key: String,
    pub tx_id: String,
    pub log_index: i64,
    pub time: TimeMs,
    /// Positive = acquisition, negative = disposal.
    pub quantity_delta: Decimal,
    /// Positive = cash received, negative = cash paid.
    pub cash_delta: Decimal,
    pub source: FillSource,
}

/// What closed a slice of a lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RealizationKind {
    /// Disposal (or short cover) before the market resolved.
    EarlyExit,
    /// Redemption of tokens that were never marked settled.
    Redemption,
    /// Resolution payout applied to the remaining open quantity.
    Settlement,
    /// Trading against a lot after it was already settled.
    PostSettlement,
}

impl RealizationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RealizationKind::EarlyExit => "early_exit",
            RealizationKind::Redemption => "redemption",
            RealizationKind::Settlement => "settlement",
            RealizationKind::PostSettlement => "post_settlement",
        }
    }
}

/// Realized PnL for one (lot, closing event) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Realization {
    pub lot_seq: u32,
    /// Closing fill; `None` for resolution settlement.
    pub fill_key: Option<String>,
    pub time: TimeMs,
    pub kind: RealizationKind,
    /// Absolute quantity closed.
    pub quantity: Decimal,
    /// Signed cash attributed to this slice.
    pub cash: Decimal,
    pub realized_pnl: Decimal,
}

/// How the cash leg of split/merge fills enters the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMergeCash {
    /// Drop the cash leg; only the token quantity feeds the ledger.
    Excluded,
    /// Ignore the raw cash leg; each side of a split costs this much per share.
    FixedPrice(Decimal),
    /// Use the cash leg as delivered.
    Raw,
}

/// The named policy knobs of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginePolicy {
    /// Sources that represent internal-mechanism transfers and never reach the ledger.
    pub excluded_sources: BTreeSet<FillSource>,
    pub split_merge_cash: SplitMergeCash,
    /// Ceiling applied to per-position ROI before summary statistics.
    pub roi_cap: Decimal,
    /// Floor applied to per-position ROI before summary statistics.
    pub roi_floor: Decimal,
}

impl EnginePolicy {
    pub fn default_excluded_sources() -> BTreeSet<FillSource> {
        ["liquidity-adapter", "adapter-transfer"]
            .into_iter()
            .map(FillSource::from)
            .collect()
    }

    pub fn cap_roi(&self, roi: Decimal) -> Decimal {
        roi.clamp_to(self.roi_floor, self.roi_cap)
    }
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            excluded_sources: Self::default_excluded_sources(),
            split_merge_cash: SplitMergeCash::Excluded,
            roi_cap: Decimal::from(10i64),
            roi_floor: -Decimal::one(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("duplicate fill for tx {tx_id} market {market_id} outcome {outcome_index} role {role}")]
    DuplicateFill {
        tx_id: String,
        market_id: String,
        outcome_index: u8,
        role: String,
    },
    #[error("fills for more than one wallet in a single batch: {first} and {other}")]
    MixedWallets { first: String, other: String },
    #[error("fill {fill_key} does not belong to unit {unit}")]
    ForeignFill { fill_key: String, unit: String },
    #[error("fill {fill_key} has zero token quantity")]
    ZeroQuantity { fill_key: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("event {fill_key} at {time_ms} precedes the last processed event at {last_ms}")]
    OutOfOrder {
        fill_key: String,
        time_ms: i64,
        last_ms: i64,
    },
    #[error("event {fill_key} has zero quantity")]
    ZeroQuantity { fill_key: String },
    #[error("open lot quantity {open} differs from net quantity {net}")]
    ConservationViolated { open: String, net: String },
    #[error("amount out of decimal range at {context}")]
    Overflow { context: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettlementError {
    #[error("payout per share {0} outside [0, 1]")]
    PayoutOutOfRange(String),
    #[error("resolution for {resolution} applied to unit {unit}")]
    ResolutionMismatch { resolution: String, unit: String },
}

/// Failure of one (wallet, market, outcome) unit. Never aborts a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Settlement(#[from] SettlementError),
}

/// Helper for error messages that name a unit.
pub(crate) fn unit_label(key: &PositionKey) -> String {
    key.to_string()
}
