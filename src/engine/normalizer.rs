//! Fill normalization: exclusion filter, self-fill collapse, duplicate rejection,
//! split/merge cash policy and deterministic ordering.

use super::{EnginePolicy, NormalizeError, NormalizedEvent, SplitMergeCash};
use crate::domain::{
    sort_fills_deterministic, Decimal, Fill, FillSource, MarketId, OutcomeIndex, PositionKey, Role,
};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// A fill dropped by the exclusion policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludedFill {
    pub fill_key: String,
    pub source: FillSource,
}

/// Audit trail of one normalization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub input_fills: usize,
    pub excluded: Vec<ExcludedFill>,
    /// Maker-side fill keys dropped because the taker side of the same match survived.
    pub collapsed_maker: Vec<String>,
    pub output_events: usize,
}

/// Time-ordered event streams, one per (market, outcome).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Normalized {
    pub streams: BTreeMap<PositionKey, Vec<NormalizedEvent>>,
    pub report: NormalizeReport,
}

/// Normalize all fills of one wallet (optionally pre-filtered to one market outcome).
///
/// # Errors
/// Rejects the whole batch on duplicate (tx, market, outcome, role) records,
/// on fills from more than one wallet, and on zero-quantity fills.
pub fn normalize(fills: &[Fill], policy: &EnginePolicy) -> Result<Normalized, NormalizeError> {
    let mut report = NormalizeReport {
        input_fills: fills.len(),
        ..Default::default()
    };

    if let Some(first) = fills.first() {
        if let Some(other) = fills.iter().find(|f| f.wallet != first.wallet) {
            return Err(NormalizeError::MixedWallets {
                first: first.wallet.to_string(),
                other: other.wallet.to_string(),
            });
        }
    }

    let mut kept: Vec<&Fill> = Vec::with_capacity(fills.len());
    for fill in fills {
        if policy.excluded_sources.contains(&fill.source) {
            debug!(
                fill_key = %fill.fill_key,
                source = %fill.source,
                "excluding internal-mechanism fill"
            );
            report.excluded.push(ExcludedFill {
                fill_key: fill.fill_key.clone(),
                source: fill.source.clone(),
            });
        } else {
            kept.push(fill);
        }
    }

    // Duplicates are checked before the collapse so a repeated maker record
    // cannot hide behind the taker side of the same match.
    let mut seen: HashSet<(&str, &MarketId, OutcomeIndex, Role)> = HashSet::new();
    for fill in kept.iter().copied() {
        if !seen.insert((
            fill.tx_id.as_str(),
            &fill.market_id,
            fill.outcome_index,
            fill.role,
        )) {
            return Err(NormalizeError::DuplicateFill {
                tx_id: fill.tx_id.clone(),
                market_id: fill.market_id.to_string(),
                outcome_index: fill.outcome_index.as_u8(),
                role: fill.role.to_string(),
            });
        }
    }

    // Self-fill collapse: a wallet on both sides of one match keeps only its taker record.
    let has_taker: HashSet<(&str, &MarketId, OutcomeIndex)> = seen
        .iter()
        .filter(|(_, _, _, role)| *role == Role::Taker)
        .map(|(tx, market, outcome, _)| (*tx, *market, *outcome))
        .collect();
    let mut surviving: Vec<Fill> = Vec::with_capacity(kept.len());
    for fill in kept {
        if fill.role == Role::Maker
            && has_taker.contains(&(fill.tx_id.as_str(), &fill.market_id, fill.outcome_index))
        {
            debug!(fill_key = %fill.fill_key, tx_id = %fill.tx_id, "collapsing maker-side self-fill");
            report.collapsed_maker.push(fill.fill_key.clone());
            continue;
        }
        if fill.token_delta.is_zero() {
            return Err(NormalizeError::ZeroQuantity {
                fill_key: fill.fill_key.clone(),
            });
        }
        surviving.push(fill.clone());
    }

    sort_fills_deterministic(&mut surviving);

    let mut streams: BTreeMap<PositionKey, Vec<NormalizedEvent>> = BTreeMap::new();
    for fill in surviving {
        let cash_delta = effective_cash(&fill, policy.split_merge_cash);
        streams
            .entry(fill.position_key())
            .or_default()
            .push(NormalizedEvent {
                fill_key: fill.fill_key,
                tx_id: fill.tx_id,
                log_index: fill.log_index,
                time: fill.event_time,
                quantity_delta: fill.token_delta,
                cash_delta,
                source: fill.source,
            });
    }

    report.output_events = streams.values().map(Vec::len).sum();
    Ok(Normalized { streams, report })
}

/// Cash leg that feeds the ledger for one fill.
fn effective_cash(fill: &Fill, split_merge_cash: SplitMergeCash) -> Decimal {
    match split_merge_cash {
        SplitMergeCash::Excluded if fill.source.is_split_or_merge() => Decimal::zero(),
        SplitMergeCash::FixedPrice(price) if fill.source.is_split_or_merge() => {
            // Acquiring via split pays the fixed price; disposing via merge receives it.
            -(fill.token_delta * price)
        }
        _ => fill.cash_delta_usd,
    }
}
