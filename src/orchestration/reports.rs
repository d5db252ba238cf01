//! Read-side reports over stored positions: wallet summaries and the leaderboard.

use crate::db::Repository;
use crate::domain::{Decimal, TimeMs, Wallet};
use crate::engine::{
    aggregate_wallet, aggregate_wallets, rank, Canonicalizer, EnginePolicy, IdentityCanonicalizer,
    Leaderboard, LeaderboardFilters, Position, SortKey, WalletSummary,
};
use serde::Serialize;
use std::io::Write;

/// Summary of one wallet plus the positions it was built from.
#[derive(Debug, Clone)]
pub struct WalletReport {
    pub summary: WalletSummary,
    pub positions: Vec<Position>,
}

/// Summarize a wallet from stored positions.
///
/// With `canonical` set, `wallet` is treated as an account identity and every
/// raw wallet aliased to it is merged in.
pub async fn wallet_report(
    repo: &Repository,
    wallet: &Wallet,
    canonical: bool,
    policy: &EnginePolicy,
) -> Result<WalletReport, sqlx::Error> {
    let mut members = vec![wallet.clone()];
    if canonical {
        members.extend(repo.query_alias_members(wallet).await?);
    }
    let positions = repo.query_positions_for_wallets(&members).await?;
    let summary = aggregate_wallet(wallet.clone(), &positions, policy);
    Ok(WalletReport { summary, positions })
}

/// Rank every stored wallet (or canonical account) through the funnel.
pub async fn build_leaderboard(
    repo: &Repository,
    filters: &LeaderboardFilters,
    sort_key: SortKey,
    as_of: TimeMs,
    limit: Option<usize>,
    canonical: bool,
    policy: &EnginePolicy,
) -> Result<Leaderboard, sqlx::Error> {
    let positions = repo.query_all_positions().await?;
    let summaries = if canonical {
        let aliases = repo.load_wallet_aliases().await?;
        aggregate_wallets(&positions, &aliases, policy)
    } else {
        aggregate_wallets(&positions, &IdentityCanonicalizer as &dyn Canonicalizer, policy)
    };
    Ok(rank(&summaries, filters, sort_key, as_of, limit))
}

/// Flat export row; decimals are canonical strings, missing statistics are empty.
#[derive(Debug, Serialize)]
struct LeaderboardCsvRow {
    rank: usize,
    wallet: String,
    member_wallets: String,
    score: String,
    robust_ev: String,
    confidence: &'static str,
    scored_positions: usize,
    resolved_positions: usize,
    closed_unresolved_positions: usize,
    open_positions: usize,
    wins: usize,
    losses: usize,
    win_rate: String,
    total_realized_pnl: String,
    total_unrealized_pnl: String,
    volume: String,
    roi: String,
    expectancy: String,
    roi_median: String,
    roi_p10: String,
    roi_p90: String,
    median_win_roi: String,
    median_loss_roi: String,
    active_days: usize,
    first_activity: String,
    last_activity: String,
}

fn opt(d: Option<Decimal>) -> String {
    d.map(|d| d.to_canonical_string()).unwrap_or_default()
}

fn opt_time(t: Option<TimeMs>) -> String {
    t.map(|t| t.to_rfc3339()).unwrap_or_default()
}

/// Write the ranked entries as CSV with a header row.
pub fn write_leaderboard_csv<W: Write>(leaderboard: &Leaderboard, writer: W) -> Result<(), csv::Error> {
    let mut out = csv::Writer::from_writer(writer);
    for entry in &leaderboard.entries {
        let s = &entry.summary;
        out.serialize(LeaderboardCsvRow {
            rank: entry.rank,
            wallet: s.wallet.to_string(),
            member_wallets: s
                .member_wallets
                .iter()
                .map(|w| w.as_str())
                .collect::<Vec<_>>()
                .join(";"),
            score: entry.score.to_canonical_string(),
            robust_ev: opt(entry.robust_ev),
            confidence: entry.confidence.as_str(),
            scored_positions: s.scored_positions,
            resolved_positions: s.resolved_positions,
            closed_unresolved_positions: s.closed_unresolved_positions,
            open_positions: s.open_positions,
            wins: s.wins,
            losses: s.losses,
            win_rate: opt(s.win_rate),
            total_realized_pnl: s.total_realized_pnl.to_canonical_string(),
            total_unrealized_pnl: s.total_unrealized_pnl.to_canonical_string(),
            volume: s.volume.to_canonical_string(),
            roi: opt(s.roi),
            expectancy: opt(s.expectancy),
            roi_median: opt(s.roi_all.as_ref().map(|r| r.median)),
            roi_p10: opt(s.roi_all.as_ref().map(|r| r.p10)),
            roi_p90: opt(s.roi_all.as_ref().map(|r| r.p90)),
            median_win_roi: opt(s.median_win_roi),
            median_loss_roi: opt(s.median_loss_roi),
            active_days: s.active_days,
            first_activity: opt_time(s.first_activity),
            last_activity: opt_time(s.last_activity),
        })?;
    }
    out.flush()?;
    Ok(())
}
