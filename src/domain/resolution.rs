//! Market resolution events.

use crate::domain::{Decimal, MarketId, OutcomeIndex, TimeMs};
use serde::{Deserialize, Serialize};

/// Final payout for one outcome of a resolved market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub market_id: MarketId,
    pub outcome_index: OutcomeIndex,
    /// Value paid per share, in `[0, 1]`.
    pub payout_per_share: Decimal,
    pub resolved_at: TimeMs,
}

impl Resolution {
    pub fn new(
        market_id: MarketId,
        outcome_index: OutcomeIndex,
        payout_per_share: Decimal,
        resolved_at: TimeMs,
    ) -> Self {
        Self {
            market_id,
            outcome_index,
            payout_per_share,
            resolved_at,
        }
    }

    pub fn payout_in_range(&self) -> bool {
        self.payout_per_share >= Decimal::zero() && self.payout_per_share <= Decimal::one()
    }

    /// Whether this outcome paid anything at all.
    pub fn paid_out(&self) -> bool {
        self.payout_per_share.is_positive()
    }
}
