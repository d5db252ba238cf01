use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::api::{opt_decimal, opt_ms, AppState};
use crate::domain::{Decimal, TimeMs};
use crate::engine::{Leaderboard, LeaderboardFilters, SortKey};
use crate::error::AppError;
use crate::orchestration::build_leaderboard;

/// Query overrides for the configured funnel; anything absent uses config.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardQuery {
    pub sort_key: Option<String>,
    pub limit: Option<usize>,
    pub canonical: Option<bool>,
    pub as_of_ms: Option<i64>,
    pub min_resolved_positions: Option<usize>,
    pub min_wallet_age_days: Option<i64>,
    pub active_within_days: Option<i64>,
    pub min_position_size: Option<String>,
    pub require_non_negative_pnl: Option<bool>,
    pub min_median_win_roi: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardResponse {
    pub sort_key: &'static str,
    pub as_of_ms: i64,
    pub candidates: usize,
    pub funnel: Vec<FunnelStageDto>,
    pub entries: Vec<LeaderboardEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunnelStageDto {
    pub stage: &'static str,
    pub entered: usize,
    pub survived: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub wallet: String,
    pub member_wallets: Vec<String>,
    pub score: String,
    pub robust_ev: Option<String>,
    pub confidence: &'static str,
    pub scored_positions: usize,
    pub resolved_positions: usize,
    pub closed_unresolved_positions: usize,
    pub open_positions: usize,
    pub win_rate: Option<String>,
    pub realized_pnl: String,
    pub volume: String,
    pub roi: Option<String>,
    pub expectancy: Option<String>,
    pub roi_median: Option<String>,
    pub roi_p10: Option<String>,
    pub roi_p90: Option<String>,
    pub median_win_roi: Option<String>,
    pub median_loss_roi: Option<String>,
    pub active_days: usize,
    pub last_activity_ms: Option<i64>,
}

fn parse_decimal(raw: &str, name: &str) -> Result<Decimal, AppError> {
    Decimal::from_str_canonical(raw.trim())
        .map_err(|_| AppError::BadRequest(format!("Invalid {}", name)))
}

fn apply_overrides(
    mut filters: LeaderboardFilters,
    params: &LeaderboardQuery,
) -> Result<LeaderboardFilters, AppError> {
    if let Some(n) = params.min_resolved_positions {
        filters.min_resolved_positions = n;
    }
    if let Some(days) = params.min_wallet_age_days {
        filters.min_wallet_age_days = days;
    }
    if let Some(days) = params.active_within_days {
        filters.active_within_days = Some(days);
    }
    if let Some(raw) = params.min_position_size.as_deref() {
        filters.min_position_size = parse_decimal(raw, "minPositionSize")?;
    }
    if let Some(flag) = params.require_non_negative_pnl {
        filters.require_non_negative_pnl = flag;
    }
    if let Some(raw) = params.min_median_win_roi.as_deref() {
        filters.min_median_win_roi = Some(parse_decimal(raw, "minMedianWinRoi")?);
    }
    Ok(filters)
}

pub async fn get_leaderboard(
    Query(params): Query<LeaderboardQuery>,
    State(state): State<AppState>,
) -> Result<Json<LeaderboardResponse>, AppError> {
    let sort_key = match params.sort_key.as_deref() {
        Some(raw) => SortKey::from_str(raw).map_err(|_| {
            AppError::BadRequest(
                "sortKey must be one of: pnl, roi, expectancy, robust_ev".to_string(),
            )
        })?,
        None => SortKey::Pnl,
    };
    let filters = apply_overrides(state.config.leaderboard.clone(), &params)?;
    let as_of = params.as_of_ms.map(TimeMs::new).unwrap_or_else(TimeMs::now);

    let board = build_leaderboard(
        &state.repo,
        &filters,
        sort_key,
        as_of,
        params.limit,
        params.canonical.unwrap_or(true),
        &state.config.policy,
    )
    .await?;

    Ok(Json(to_response(board)))
}

pub fn to_response(board: Leaderboard) -> LeaderboardResponse {
    let funnel = board
        .funnel
        .iter()
        .map(|f| FunnelStageDto {
            stage: f.stage,
            entered: f.entered,
            survived: f.survived,
        })
        .collect();

    let entries = board
        .entries
        .iter()
        .map(|e| {
            let s = &e.summary;
            LeaderboardEntry {
                rank: e.rank,
                wallet: s.wallet.to_string(),
                member_wallets: s.member_wallets.iter().map(|w| w.to_string()).collect(),
                score: e.score.to_canonical_string(),
                robust_ev: opt_decimal(e.robust_ev),
                confidence: e.confidence.as_str(),
                scored_positions: s.scored_positions,
                resolved_positions: s.resolved_positions,
                closed_unresolved_positions: s.closed_unresolved_positions,
                open_positions: s.open_positions,
                win_rate: opt_decimal(s.win_rate),
                realized_pnl: s.total_realized_pnl.to_canonical_string(),
                volume: s.volume.to_canonical_string(),
                roi: opt_decimal(s.roi),
                expectancy: opt_decimal(s.expectancy),
                roi_median: opt_decimal(s.roi_all.as_ref().map(|r| r.median)),
                roi_p10: opt_decimal(s.roi_all.as_ref().map(|r| r.p10)),
                roi_p90: opt_decimal(s.roi_all.as_ref().map(|r| r.p90)),
                median_win_roi: opt_decimal(s.median_win_roi),
                median_loss_roi: opt_decimal(s.median_loss_roi),
                active_days: s.active_days,
                last_activity_ms: opt_ms(s.last_activity),
            }
        })
        .collect();

    LeaderboardResponse {
        sort_key: board.sort_key.as_str(),
        as_of_ms: board.as_of.as_ms(),
        candidates: board.candidates,
        funnel,
        entries,
    }
}
