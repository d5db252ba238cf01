//! Leaderboard ranking: an inspectable filter funnel followed by a sort.

use super::WalletSummary;
use crate::domain::{Decimal, TimeMs};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Pnl,
    Roi,
    Expectancy,
    RobustEv,
}

impl SortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Pnl => "pnl",
            SortKey::Roi => "roi",
            SortKey::Expectancy => "expectancy",
            SortKey::RobustEv => "robust_ev",
        }
    }

    /// The metric this key sorts by; `None` means the wallet cannot be ranked.
    pub fn score(&self, summary: &WalletSummary) -> Option<Decimal> {
        match self {
            SortKey::Pnl => Some(summary.total_realized_pnl),
            SortKey::Roi => summary.roi,
            SortKey::Expectancy => summary.expectancy,
            SortKey::RobustEv => robust_ev(summary),
        }
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pnl" => Ok(SortKey::Pnl),
            "roi" => Ok(SortKey::Roi),
            "expectancy" => Ok(SortKey::Expectancy),
            "robust_ev" | "robustev" | "ev" => Ok(SortKey::RobustEv),
            other => Err(format!("unknown sort key {other:?}")),
        }
    }
}

impl std::fmt::Display for SortKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(win_rate * median_win_roi + loss_rate * median_loss_roi) * sqrt(scored / active_days)`.
///
/// A missing median only matters when its rate is non-zero.
pub fn robust_ev(summary: &WalletSummary) -> Option<Decimal> {
    let win_rate = summary.win_rate?;
    let loss_rate = Decimal::one() - win_rate;

    let win_part = if win_rate.is_zero() {
        Decimal::zero()
    } else {
        win_rate * summary.median_win_roi?
    };
    let loss_part = if loss_rate.is_zero() {
        Decimal::zero()
    } else {
        loss_rate * summary.median_loss_roi?
    };

    let per_day = Decimal::from(summary.scored_positions)
        .checked_div(Decimal::from(summary.active_days))?;
    Some((win_part + loss_part) * per_day.sqrt()?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn from_sample(scored_positions: usize) -> Self {
        match scored_positions {
            n if n >= 50 => Confidence::High,
            n if n >= 20 => Confidence::Medium,
            _ => Confidence::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardFilters {
    /// Minimum resolved-or-closed positions.
    pub min_resolved_positions: usize,
    pub min_wallet_age_days: i64,
    pub active_within_days: Option<i64>,
    /// Minimum average cost per position.
    pub min_position_size: Decimal,
    pub require_non_negative_pnl: bool,
    pub min_median_win_roi: Option<Decimal>,
}

impl Default for LeaderboardFilters {
    fn default() -> Self {
        Self {
            min_resolved_positions: 10,
            min_wallet_age_days: 0,
            active_within_days: None,
            min_position_size: Decimal::zero(),
            require_non_negative_pnl: true,
            min_median_win_roi: None,
        }
    }
}

/// Pass counts of one funnel stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunnelStage {
    pub stage: &'static str,
    pub entered: usize,
    pub survived: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedWallet {
    pub rank: usize,
    pub score: Decimal,
    pub robust_ev: Option<Decimal>,
    pub confidence: Confidence,
    pub summary: WalletSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Leaderboard {
    pub sort_key: SortKey,
    pub as_of: TimeMs,
    pub candidates: usize,
    pub funnel: Vec<FunnelStage>,
    pub entries: Vec<RankedWallet>,
}

type Stage<'f> = (&'static str, Box<dyn Fn(&WalletSummary) -> bool + 'f>);

fn stages<'f>(filters: &'f LeaderboardFilters, sort_key: SortKey, as_of: TimeMs) -> Vec<Stage<'f>> {
    let mut stages: Vec<Stage<'f>> = Vec::with_capacity(8);
    stages.push(("has_positions", Box::new(|s: &WalletSummary| s.position_count > 0)));
    stages.push((
        "min_resolved_positions",
        Box::new(move |s: &WalletSummary| s.scored_positions >= filters.min_resolved_positions),
    ));
    stages.push((
        "min_wallet_age",
        Box::new(move |s: &WalletSummary| {
            s.wallet_age_days(as_of)
                .is_some_and(|age| age >= filters.min_wallet_age_days)
        }),
    ));
    stages.push((
        "recency",
        Box::new(move |s: &WalletSummary| match filters.active_within_days {
            None => true,
            Some(days) => s
                .last_activity
                .is_some_and(|last| last.days_until(as_of) <= days),
        }),
    ));
    stages.push((
        "min_position_size",
        Box::new(move |s: &WalletSummary| {
            s.avg_position_size
                .is_some_and(|avg| avg >= filters.min_position_size)
        }),
    ));
    stages.push((
        "non_negative_pnl",
        Box::new(move |s: &WalletSummary| {
            !filters.require_non_negative_pnl || !s.total_realized_pnl.is_negative()
        }),
    ));
    stages.push((
        "min_median_win_roi",
        Box::new(move |s: &WalletSummary| match filters.min_median_win_roi {
            None => true,
            Some(min) => s.median_win_roi.is_some_and(|m| m >= min),
        }),
    ));
    stages.push((
        "sort_metric_available",
        Box::new(move |s: &WalletSummary| sort_key.score(s).is_some()),
    ));
    stages
}

/// Filter `summaries` through the funnel and rank the survivors by `sort_key`.
///
/// Ties break on scored position count (more first), then wallet address.
pub fn rank(
    summaries: &[WalletSummary],
    filters: &LeaderboardFilters,
    sort_key: SortKey,
    as_of: TimeMs,
    limit: Option<usize>,
) -> Leaderboard {
    let mut survivors: Vec<&WalletSummary> = summaries.iter().collect();
    let mut funnel = Vec::new();
    for (stage, keep) in stages(filters, sort_key, as_of) {
        let entered = survivors.len();
        survivors.retain(|s| keep(s));
        debug!(stage, entered, survived = survivors.len(), "leaderboard funnel stage");
        funnel.push(FunnelStage {
            stage,
            entered,
            survived: survivors.len(),
        });
    }

    let mut scored: Vec<(Decimal, &WalletSummary)> = survivors
        .into_iter()
        .filter_map(|s| sort_key.score(s).map(|score| (score, s)))
        .collect();
    scored.sort_by(|(a_score, a), (b_score, b)| {
        b_score
            .cmp(a_score)
            .then_with(|| b.scored_positions.cmp(&a.scored_positions))
            .then_with(|| a.wallet.cmp(&b.wallet))
    });

    let entries = scored
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .enumerate()
        .map(|(i, (score, summary))| RankedWallet {
            rank: i + 1,
            score,
            robust_ev: robust_ev(summary),
            confidence: Confidence::from_sample(summary.scored_positions),
            summary: summary.clone(),
        })
        .collect();

    Leaderboard {
        sort_key,
        as_of,
        candidates: summaries.len(),
        funnel,
        entries,
    }
}
