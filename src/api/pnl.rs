use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::{opt_decimal, opt_ms, parse_wallet, AppState};
use crate::engine::ranker::robust_ev;
use crate::engine::RoiStats;
use crate::error::AppError;
use crate::orchestration::wallet_report;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PnlQuery {
    pub wallet: String,
    /// Treat `wallet` as an account and merge every aliased raw wallet.
    pub canonical: Option<bool>,
    pub refresh: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoiStatsDto {
    pub count: usize,
    pub median: String,
    pub p10: String,
    pub p25: String,
    pub p75: String,
    pub p90: String,
}

impl From<&RoiStats> for RoiStatsDto {
    fn from(s: &RoiStats) -> Self {
        Self {
            count: s.count,
            median: s.median.to_canonical_string(),
            p10: s.p10.to_canonical_string(),
            p25: s.p25.to_canonical_string(),
            p75: s.p75.to_canonical_string(),
            p90: s.p90.to_canonical_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PnlResponse {
    pub wallet: String,
    pub member_wallets: Vec<String>,
    pub position_count: usize,
    pub distinct_markets: usize,
    pub resolved_positions: usize,
    pub closed_unresolved_positions: usize,
    pub open_positions: usize,
    pub scored_positions: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: Option<String>,
    pub realized_pnl: String,
    pub unrealized_pnl: String,
    pub volume: String,
    pub roi: Option<String>,
    pub expectancy: Option<String>,
    pub roi_all: Option<RoiStatsDto>,
    pub roi_long: Option<RoiStatsDto>,
    pub median_win_roi: Option<String>,
    pub median_loss_roi: Option<String>,
    pub robust_ev: Option<String>,
    pub active_days: usize,
    pub first_activity_ms: Option<i64>,
    pub last_activity_ms: Option<i64>,
}

pub async fn get_pnl(
    Query(params): Query<PnlQuery>,
    State(state): State<AppState>,
) -> Result<Json<PnlResponse>, AppError> {
    let wallet = parse_wallet(&params.wallet)?;
    let canonical = params.canonical.unwrap_or(false);

    if params.refresh.unwrap_or(false) {
        let mut wallets = vec![wallet.clone()];
        if canonical {
            wallets.extend(state.repo.query_alias_members(&wallet).await?);
        }
        for w in &wallets {
            state.orchestrator.ensure_compiled(w, None, None).await?;
        }
    }

    let report = wallet_report(&state.repo, &wallet, canonical, &state.config.policy).await?;
    let s = &report.summary;

    Ok(Json(PnlResponse {
        wallet: s.wallet.to_string(),
        member_wallets: s.member_wallets.iter().map(|w| w.to_string()).collect(),
        position_count: s.position_count,
        distinct_markets: s.distinct_markets,
        resolved_positions: s.resolved_positions,
        closed_unresolved_positions: s.closed_unresolved_positions,
        open_positions: s.open_positions,
        scored_positions: s.scored_positions,
        wins: s.wins,
        losses: s.losses,
        win_rate: opt_decimal(s.win_rate),
        realized_pnl: s.total_realized_pnl.to_canonical_string(),
        unrealized_pnl: s.total_unrealized_pnl.to_canonical_string(),
        volume: s.volume.to_canonical_string(),
        roi: opt_decimal(s.roi),
        expectancy: opt_decimal(s.expectancy),
        roi_all: s.roi_all.as_ref().map(RoiStatsDto::from),
        roi_long: s.roi_long.as_ref().map(RoiStatsDto::from),
        median_win_roi: opt_decimal(s.median_win_roi),
        median_loss_roi: opt_decimal(s.median_loss_roi),
        robust_ev: opt_decimal(robust_ev(s)),
        active_days: s.active_days,
        first_activity_ms: opt_ms(s.first_activity),
        last_activity_ms: opt_ms(s.last_activity),
    }))
}
