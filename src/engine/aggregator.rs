//! Position and wallet roll-ups.
//!
//! `aggregate_position` turns one finished [`UnitLedger`] into a [`Position`];
//! `aggregate_wallet` rolls positions into a [`WalletSummary`]. Statistics that
//! cannot be computed (no scored positions, no long positions) are `None`,
//! never zero.

use super::{Canonicalizer, EnginePolicy, RealizationKind, UnitLedger};
use crate::domain::{Decimal, MarketId, PositionKey, TimeMs, Wallet};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Unresolved,
    ResolvedWon,
    ResolvedLost,
}

impl ResolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStatus::Unresolved => "unresolved",
            ResolutionStatus::ResolvedWon => "resolved_won",
            ResolutionStatus::ResolvedLost => "resolved_lost",
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, ResolutionStatus::Unresolved)
    }
}

impl std::str::FromStr for ResolutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unresolved" => Ok(ResolutionStatus::Unresolved),
            "resolved_won" => Ok(ResolutionStatus::ResolvedWon),
            "resolved_lost" => Ok(ResolutionStatus::ResolvedLost),
            other => Err(format!("unknown resolution status {other:?}")),
        }
    }
}

/// Aggregate of all lots of one (wallet, market, outcome).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub key: PositionKey,
    pub status: ResolutionStatus,
    /// Signed net token quantity (positive = long, negative = short).
    pub net_quantity: Decimal,
    /// Signed remaining quantity not yet finalized by a resolution.
    pub open_quantity: Decimal,
    pub open_cost_basis: Decimal,
    pub consumed_cost_basis: Decimal,
    pub total_cost_basis: Decimal,
    /// PnL from disposals and redemptions.
    pub realized_early_pnl: Decimal,
    /// PnL from resolution settlement of open lots.
    pub realized_settlement_pnl: Decimal,
    pub total_realized_pnl: Decimal,
    /// Mark-to-market of open exposure; `None` when open with no observed price.
    pub unrealized_pnl: Option<Decimal>,
    /// `total_realized_pnl / consumed_cost_basis`; `None` when nothing was consumed.
    pub roi: Option<Decimal>,
    pub payout_per_share: Option<Decimal>,
    /// Signed cash booked by resolution settlement.
    pub settlement_value: Option<Decimal>,
    pub resolved_at: Option<TimeMs>,
    pub entry_time: Option<TimeMs>,
    pub last_activity: Option<TimeMs>,
    pub quantity_sold_early: Decimal,
    pub quantity_held_to_resolution: Decimal,
    pub is_closed: bool,
    /// Any lot of this position was a short.
    pub is_short: bool,
    pub lot_count: usize,
    pub mark_price: Option<Decimal>,
    pub active_days: BTreeSet<i64>,
}

impl Position {
    /// Resolved, or fully closed before resolution.
    pub fn is_scored(&self) -> bool {
        self.status.is_resolved() || self.is_closed
    }

    pub fn is_win(&self) -> bool {
        self.total_realized_pnl.is_positive()
    }
}

/// Output row per lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LotRow {
    pub wallet: Wallet,
    pub market_id: MarketId,
    pub outcome_index: u8,
    pub lot_seq: u32,
    pub fill_key: String,
    pub tx_id: String,
    pub entry_time: TimeMs,
    pub resolved_at: Option<TimeMs>,
    /// Signed quantity acquired (negative for a short entry).
    pub quantity: Decimal,
    pub cost: Decimal,
    pub unit_cost: Decimal,
    pub quantity_sold_early: Decimal,
    pub quantity_held_to_resolution: Decimal,
    pub remaining_quantity: Decimal,
    pub exit_value: Decimal,
    pub realized_pnl: Decimal,
    pub roi: Option<Decimal>,
    pub is_closed: bool,
    pub is_short: bool,
}

/// Build the per-lot output rows of one unit.
pub fn lot_rows(unit: &UnitLedger) -> Vec<LotRow> {
    let resolved_at = unit.resolution.as_ref().map(|r| r.resolved_at);
    unit.lots
        .iter()
        .map(|lot| LotRow {
            wallet: unit.key.wallet.clone(),
            market_id: unit.key.market_id.clone(),
            outcome_index: unit.key.outcome_index.as_u8(),
            lot_seq: lot.seq,
            fill_key: lot.fill_key.clone(),
            tx_id: lot.tx_id.clone(),
            entry_time: lot.acquired_at,
            resolved_at,
            quantity: lot.original_quantity,
            cost: lot.cost_basis(),
            unit_cost: lot.unit_cost,
            quantity_sold_early: lot.quantity_closed_early,
            quantity_held_to_resolution: lot.quantity_held_to_resolution,
            remaining_quantity: lot.remaining_quantity,
            exit_value: lot.exit_cash,
            realized_pnl: lot.realized_pnl,
            roi: lot.realized_pnl.checked_div(lot.consumed_cost_basis()),
            is_closed: lot.is_closed(),
            is_short: lot.is_short(),
        })
        .collect()
}

/// Roll one unit's lots and realizations into a [`Position`].
pub fn aggregate_position(unit: &UnitLedger) -> Position {
    let mut realized_early_pnl = Decimal::zero();
    let mut realized_settlement_pnl = Decimal::zero();
    let mut settlement_cash = Decimal::zero();
    for r in &unit.realizations {
        match r.kind {
            RealizationKind::Settlement => {
                realized_settlement_pnl += r.realized_pnl;
                settlement_cash += r.cash;
            }
            RealizationKind::EarlyExit
            | RealizationKind::Redemption
            | RealizationKind::PostSettlement => realized_early_pnl += r.realized_pnl,
        }
    }
    let total_realized_pnl = realized_early_pnl + realized_settlement_pnl;

    let open_quantity: Decimal = unit
        .lots
        .iter()
        .filter(|lot| !lot.is_settled())
        .map(|lot| lot.remaining_quantity)
        .sum();
    let open_entry_cash: Decimal = unit.lots.iter().map(|lot| lot.open_entry_cash()).sum();
    let consumed_cost_basis: Decimal = unit.lots.iter().map(|lot| lot.consumed_cost_basis()).sum();
    let total_cost_basis: Decimal = unit.lots.iter().map(|lot| lot.cost_basis()).sum();

    let status = match &unit.resolution {
        None => ResolutionStatus::Unresolved,
        Some(res) if res.paid_out() => ResolutionStatus::ResolvedWon,
        Some(_) => ResolutionStatus::ResolvedLost,
    };

    let unrealized_pnl = if open_quantity.is_zero() {
        Some(Decimal::zero())
    } else {
        unit.mark_price
            .and_then(|mark| open_quantity.checked_mul(mark))
            .map(|value| value + open_entry_cash)
    };

    Position {
        key: unit.key.clone(),
        status,
        net_quantity: unit.net_quantity,
        open_quantity,
        open_cost_basis: open_entry_cash.abs(),
        consumed_cost_basis,
        total_cost_basis,
        realized_early_pnl,
        realized_settlement_pnl,
        total_realized_pnl,
        unrealized_pnl,
        roi: total_realized_pnl.checked_div(consumed_cost_basis),
        payout_per_share: unit.resolution.as_ref().map(|r| r.payout_per_share),
        settlement_value: unit.resolution.as_ref().map(|_| settlement_cash),
        resolved_at: unit.resolution.as_ref().map(|r| r.resolved_at),
        entry_time: unit.lots.first().map(|lot| lot.acquired_at),
        last_activity: unit.last_event_at,
        quantity_sold_early: unit.lots.iter().map(|lot| lot.quantity_closed_early).sum(),
        quantity_held_to_resolution: unit
            .lots
            .iter()
            .map(|lot| lot.quantity_held_to_resolution)
            .sum(),
        is_closed: !unit.lots.is_empty() && unit.lots.iter().all(|lot| lot.is_closed()),
        is_short: unit.lots.iter().any(|lot| lot.is_short()),
        lot_count: unit.lots.len(),
        mark_price: unit.mark_price,
        active_days: unit.active_days.clone(),
    }
}

/// Median and percentile bands of a set of (capped) ROI values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoiStats {
    pub count: usize,
    pub median: Decimal,
    pub p10: Decimal,
    pub p25: Decimal,
    pub p75: Decimal,
    pub p90: Decimal,
}

impl RoiStats {
    /// `None` for an empty input.
    pub fn from_values(mut values: Vec<Decimal>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        values.sort();
        Some(Self {
            count: values.len(),
            median: percentile(&values, 50),
            p10: percentile(&values, 10),
            p25: percentile(&values, 25),
            p75: percentile(&values, 75),
            p90: percentile(&values, 90),
        })
    }
}

/// Linear-interpolated percentile of a sorted, non-empty slice.
fn percentile(sorted: &[Decimal], pct: usize) -> Decimal {
    let scaled = (sorted.len() - 1) * pct;
    let lo = scaled / 100;
    let rem = scaled % 100;
    match sorted.get(lo + 1) {
        Some(next) if rem > 0 => {
            let base = sorted[lo];
            base + (*next - base) * Decimal::from(rem) / Decimal::hundred()
        }
        _ => sorted[lo],
    }
}

fn median(values: Vec<Decimal>) -> Option<Decimal> {
    RoiStats::from_values(values).map(|s| s.median)
}

/// Wallet-level aggregate used by the ranker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletSummary {
    pub wallet: Wallet,
    /// Raw wallets whose positions were merged into this summary.
    pub member_wallets: Vec<Wallet>,
    pub position_count: usize,
    pub distinct_markets: usize,
    pub resolved_positions: usize,
    pub closed_unresolved_positions: usize,
    pub open_positions: usize,
    /// Resolved or closed-before-resolution positions.
    pub scored_positions: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: Option<Decimal>,
    pub total_realized_pnl: Decimal,
    pub total_unrealized_pnl: Decimal,
    /// Total cost basis across all lots.
    pub volume: Decimal,
    pub consumed_cost_basis: Decimal,
    pub roi: Option<Decimal>,
    /// `total_realized_pnl / volume`.
    pub expectancy: Option<Decimal>,
    pub roi_all: Option<RoiStats>,
    pub roi_long: Option<RoiStats>,
    /// Median capped ROI over winning long positions.
    pub median_win_roi: Option<Decimal>,
    /// Median floored ROI over losing long positions.
    pub median_loss_roi: Option<Decimal>,
    /// Largest single position cost as a share of volume.
    pub largest_position_share: Option<Decimal>,
    pub avg_position_size: Option<Decimal>,
    pub first_activity: Option<TimeMs>,
    pub last_activity: Option<TimeMs>,
    pub active_days: usize,
}

impl WalletSummary {
    pub fn loss_rate(&self) -> Option<Decimal> {
        self.win_rate.map(|rate| Decimal::one() - rate)
    }

    /// Whole days between first activity and `as_of`.
    pub fn wallet_age_days(&self, as_of: TimeMs) -> Option<i64> {
        self.first_activity.map(|first| first.days_until(as_of))
    }
}

/// Roll positions (all belonging to one account) into a [`WalletSummary`].
pub fn aggregate_wallet<'a>(
    wallet: Wallet,
    positions: impl IntoIterator<Item = &'a Position>,
    policy: &EnginePolicy,
) -> WalletSummary {
    let positions: Vec<&Position> = positions.into_iter().collect();

    let mut members = BTreeSet::new();
    let mut markets = BTreeSet::new();
    let mut days = BTreeSet::new();
    let mut summary = WalletSummary {
        wallet,
        member_wallets: Vec::new(),
        position_count: positions.len(),
        distinct_markets: 0,
        resolved_positions: 0,
        closed_unresolved_positions: 0,
        open_positions: 0,
        scored_positions: 0,
        wins: 0,
        losses: 0,
        win_rate: None,
        total_realized_pnl: Decimal::zero(),
        total_unrealized_pnl: Decimal::zero(),
        volume: Decimal::zero(),
        consumed_cost_basis: Decimal::zero(),
        roi: None,
        expectancy: None,
        roi_all: None,
        roi_long: None,
        median_win_roi: None,
        median_loss_roi: None,
        largest_position_share: None,
        avg_position_size: None,
        first_activity: None,
        last_activity: None,
        active_days: 0,
    };

    let mut roi_all = Vec::new();
    let mut roi_long = Vec::new();
    let mut win_long = Vec::new();
    let mut loss_long = Vec::new();
    let mut largest = Decimal::zero();

    for p in &positions {
        members.insert(p.key.wallet.clone());
        markets.insert(p.key.market_id.clone());
        days.extend(p.active_days.iter().copied());

        summary.total_realized_pnl += p.total_realized_pnl;
        summary.total_unrealized_pnl += p.unrealized_pnl.unwrap_or_default();
        summary.volume += p.total_cost_basis;
        summary.consumed_cost_basis += p.consumed_cost_basis;
        largest = largest.max(p.total_cost_basis);

        summary.first_activity = min_time(summary.first_activity, p.entry_time);
        summary.last_activity = max_time(summary.last_activity, p.last_activity);

        if p.status.is_resolved() {
            summary.resolved_positions += 1;
        } else if p.is_closed {
            summary.closed_unresolved_positions += 1;
        } else {
            summary.open_positions += 1;
        }

        if !p.is_scored() {
            continue;
        }
        summary.scored_positions += 1;
        if p.is_win() {
            summary.wins += 1;
        } else {
            summary.losses += 1;
        }
        if let Some(roi) = p.roi {
            let capped = policy.cap_roi(roi);
            roi_all.push(capped);
            // A winning short in a binary market is 100% ROI by construction.
            if !p.is_short {
                roi_long.push(capped);
                if p.is_win() {
                    win_long.push(capped);
                } else {
                    loss_long.push(capped);
                }
            }
        }
    }

    let position_count = Decimal::from(summary.position_count);
    summary.member_wallets = members.into_iter().collect();
    summary.distinct_markets = markets.len();
    summary.active_days = days.len();
    summary.win_rate =
        Decimal::from(summary.wins).checked_div(Decimal::from(summary.scored_positions));
    summary.roi = summary.total_realized_pnl.checked_div(summary.consumed_cost_basis);
    summary.expectancy = summary.total_realized_pnl.checked_div(summary.volume);
    summary.roi_all = RoiStats::from_values(roi_all);
    summary.roi_long = RoiStats::from_values(roi_long);
    summary.median_win_roi = median(win_long);
    summary.median_loss_roi = median(loss_long);
    summary.largest_position_share = largest.checked_div(summary.volume);
    summary.avg_position_size = summary.volume.checked_div(position_count);
    summary
}

/// Group finished positions by canonical wallet and summarize each group.
///
/// Canonicalization only re-keys positions that were computed per raw wallet.
pub fn aggregate_wallets(
    positions: &[Position],
    canonicalizer: &dyn Canonicalizer,
    policy: &EnginePolicy,
) -> Vec<WalletSummary> {
    let mut groups: BTreeMap<Wallet, Vec<&Position>> = BTreeMap::new();
    for p in positions {
        groups
            .entry(canonicalizer.canonicalize(&p.key.wallet))
            .or_default()
            .push(p);
    }
    groups
        .into_iter()
        .map(|(wallet, group)| aggregate_wallet(wallet, group, policy))
        .collect()
}

fn min_time(a: Option<TimeMs>, b: Option<TimeMs>) -> Option<TimeMs> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, y) => x.or(y),
    }
}

fn max_time(a: Option<TimeMs>, b: Option<TimeMs>) -> Option<TimeMs> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    }
}
