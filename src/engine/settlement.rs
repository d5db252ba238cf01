//! Resolution settlement: finalizes open exposure at the resolved payout.

use super::{unit_label, EngineError, LotLedger, Realization, SettlementError};
use crate::domain::{PositionKey, Resolution};

/// Settle every open, unsettled lot of `ledger` against `resolution`.
///
/// Long lots realize `remaining * (payout - unit_cost)`, short lots
/// `|remaining| * (unit_cost - payout)`. Early disposals already realized are
/// left untouched, and settling twice is a no-op for lots already settled.
///
/// # Errors
/// Returns an error if the payout lies outside `[0, 1]`, the resolution
/// belongs to a different market outcome than `key`, or a settlement value
/// leaves the decimal range.
pub fn settle(
    ledger: &mut LotLedger,
    key: &PositionKey,
    resolution: &Resolution,
) -> Result<Vec<Realization>, EngineError> {
    validate(key, resolution)?;
    Ok(ledger.settle_open_lots(resolution.payout_per_share, resolution.resolved_at)?)
}

pub(crate) fn validate(key: &PositionKey, resolution: &Resolution) -> Result<(), SettlementError> {
    if !resolution.payout_in_range() {
        return Err(SettlementError::PayoutOutOfRange(
            resolution.payout_per_share.to_canonical_string(),
        ));
    }
    if resolution.market_id != key.market_id || resolution.outcome_index != key.outcome_index {
        return Err(SettlementError::ResolutionMismatch {
            resolution: format!("{}/{}", resolution.market_id, resolution.outcome_index),
            unit: unit_label(key),
        });
    }
    Ok(())
}
