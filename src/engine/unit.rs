//! Full recomputation of one (wallet, market, outcome) unit.

use super::settlement::validate;
use super::{
    normalize, unit_label, EngineError, EnginePolicy, Lot, LotLedger, NormalizeError,
    NormalizeReport, Realization,
};
use crate::domain::{Decimal, Fill, PositionKey, Resolution, TimeMs};
use std::collections::BTreeSet;

/// Ledger state of one unit after every fill (and the resolution, if any) was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitLedger {
    pub key: PositionKey,
    pub lots: Vec<Lot>,
    pub realizations: Vec<Realization>,
    pub resolution: Option<Resolution>,
    pub net_quantity: Decimal,
    /// Per-share price of the latest order-matched event.
    pub mark_price: Option<Decimal>,
    /// UTC day numbers with at least one event.
    pub active_days: BTreeSet<i64>,
    pub first_event_at: Option<TimeMs>,
    pub last_event_at: Option<TimeMs>,
    pub report: NormalizeReport,
}

impl UnitLedger {
    /// True when no fill survived normalization.
    pub fn is_empty(&self) -> bool {
        self.lots.is_empty()
    }
}

/// Recompute one unit from scratch.
///
/// Events before `resolved_at` are walked first, then open lots settle, then
/// any later events (redemptions, post-resolution trades) are applied against
/// the settled lots. Anything opened after resolution settles at the same payout.
///
/// # Errors
/// Any input-contract violation fails the whole unit.
pub fn compute_unit(
    key: &PositionKey,
    fills: &[Fill],
    resolution: Option<&Resolution>,
    policy: &EnginePolicy,
) -> Result<UnitLedger, EngineError> {
    if let Some(foreign) = fills.iter().find(|f| f.position_key() != *key) {
        return Err(NormalizeError::ForeignFill {
            fill_key: foreign.fill_key.clone(),
            unit: unit_label(key),
        }
        .into());
    }
    if let Some(res) = resolution {
        validate(key, res)?;
    }

    let mut normalized = normalize(fills, policy)?;
    let events = normalized.streams.remove(key).unwrap_or_default();

    let mut ledger = LotLedger::new();
    let mut settled = false;
    let mut mark_price = None;
    let mut active_days = BTreeSet::new();

    for event in &events {
        if let Some(res) = resolution {
            if !settled && event.time >= res.resolved_at {
                ledger.settle_open_lots(res.payout_per_share, res.resolved_at)?;
                settled = true;
            }
        }
        ledger.apply(event)?;
        active_days.insert(event.time.day_index());
        if event.source.is_price_bearing() {
            if let Some(price) = event.cash_delta.checked_div(event.quantity_delta) {
                mark_price = Some(price.abs());
            }
        }
    }

    if let Some(res) = resolution {
        let at = ledger
            .last_event_time()
            .map_or(res.resolved_at, |last| last.max(res.resolved_at));
        ledger.settle_open_lots(res.payout_per_share, at)?;
    }

    let net_quantity = ledger.net_quantity();
    let (lots, realizations) = ledger.into_parts();
    Ok(UnitLedger {
        key: key.clone(),
        lots,
        realizations,
        resolution: resolution.cloned(),
        net_quantity,
        mark_price,
        active_days,
        first_event_at: events.first().map(|e| e.time),
        last_event_at: events.last().map(|e| e.time),
        report: normalized.report,
    })
}
