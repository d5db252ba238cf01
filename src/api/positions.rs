use crate::api::{opt_decimal, opt_ms, parse_wallet, AppState};
use crate::domain::MarketId;
use crate::engine::{LotRow, Position};
use crate::error::AppError;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsQuery {
    pub wallet: String,
    pub market_id: Option<String>,
    /// Ingest and rebuild the wallet before reading.
    pub refresh: Option<bool>,
    pub include_lots: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsResponse {
    pub wallet: String,
    pub positions: Vec<PositionDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lots: Option<Vec<LotDto>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionDto {
    pub market_id: String,
    pub outcome_index: u8,
    pub status: &'static str,
    pub net_quantity: String,
    pub open_quantity: String,
    pub open_cost_basis: String,
    pub total_cost_basis: String,
    pub realized_early_pnl: String,
    pub realized_settlement_pnl: String,
    pub total_realized_pnl: String,
    pub unrealized_pnl: Option<String>,
    pub roi: Option<String>,
    pub payout_per_share: Option<String>,
    pub settlement_value: Option<String>,
    pub quantity_sold_early: String,
    pub quantity_held_to_resolution: String,
    pub is_closed: bool,
    pub is_short: bool,
    pub lot_count: usize,
    pub mark_price: Option<String>,
    pub entry_time_ms: Option<i64>,
    pub last_activity_ms: Option<i64>,
    pub resolved_at_ms: Option<i64>,
}

impl From<&Position> for PositionDto {
    fn from(p: &Position) -> Self {
        Self {
            market_id: p.key.market_id.as_str().to_string(),
            outcome_index: p.key.outcome_index.as_u8(),
            status: p.status.as_str(),
            net_quantity: p.net_quantity.to_canonical_string(),
            open_quantity: p.open_quantity.to_canonical_string(),
            open_cost_basis: p.open_cost_basis.to_canonical_string(),
            total_cost_basis: p.total_cost_basis.to_canonical_string(),
            realized_early_pnl: p.realized_early_pnl.to_canonical_string(),
            realized_settlement_pnl: p.realized_settlement_pnl.to_canonical_string(),
            total_realized_pnl: p.total_realized_pnl.to_canonical_string(),
            unrealized_pnl: opt_decimal(p.unrealized_pnl),
            roi: opt_decimal(p.roi),
            payout_per_share: opt_decimal(p.payout_per_share),
            settlement_value: opt_decimal(p.settlement_value),
            quantity_sold_early: p.quantity_sold_early.to_canonical_string(),
            quantity_held_to_resolution: p.quantity_held_to_resolution.to_canonical_string(),
            is_closed: p.is_closed,
            is_short: p.is_short,
            lot_count: p.lot_count,
            mark_price: opt_decimal(p.mark_price),
            entry_time_ms: opt_ms(p.entry_time),
            last_activity_ms: opt_ms(p.last_activity),
            resolved_at_ms: opt_ms(p.resolved_at),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LotDto {
    pub market_id: String,
    pub outcome_index: u8,
    pub lot_seq: u32,
    pub fill_key: String,
    pub tx_id: String,
    pub entry_time_ms: i64,
    pub quantity: String,
    pub cost: String,
    pub unit_cost: String,
    pub quantity_sold_early: String,
    pub quantity_held_to_resolution: String,
    pub remaining_quantity: String,
    pub exit_value: String,
    pub realized_pnl: String,
    pub roi: Option<String>,
    pub is_closed: bool,
    pub is_short: bool,
}

impl From<&LotRow> for LotDto {
    fn from(l: &LotRow) -> Self {
        Self {
            market_id: l.market_id.as_str().to_string(),
            outcome_index: l.outcome_index,
            lot_seq: l.lot_seq,
            fill_key: l.fill_key.clone(),
            tx_id: l.tx_id.clone(),
            entry_time_ms: l.entry_time.as_ms(),
            quantity: l.quantity.to_canonical_string(),
            cost: l.cost.to_canonical_string(),
            unit_cost: l.unit_cost.to_canonical_string(),
            quantity_sold_early: l.quantity_sold_early.to_canonical_string(),
            quantity_held_to_resolution: l.quantity_held_to_resolution.to_canonical_string(),
            remaining_quantity: l.remaining_quantity.to_canonical_string(),
            exit_value: l.exit_value.to_canonical_string(),
            realized_pnl: l.realized_pnl.to_canonical_string(),
            roi: opt_decimal(l.roi),
            is_closed: l.is_closed,
            is_short: l.is_short,
        }
    }
}

pub async fn get_positions(
    Query(params): Query<PositionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<PositionsResponse>, AppError> {
    let wallet = parse_wallet(&params.wallet)?;
    let market = params
        .market_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(MarketId::new);

    if params.refresh.unwrap_or(false) {
        state.orchestrator.ensure_compiled(&wallet, None, None).await?;
    }

    let positions = state
        .repo
        .query_positions_for_wallets(std::slice::from_ref(&wallet))
        .await?;
    let positions = positions
        .iter()
        .filter(|p| market.as_ref().map_or(true, |m| &p.key.market_id == m))
        .map(PositionDto::from)
        .collect();

    let lots = if params.include_lots.unwrap_or(false) {
        let rows = state.repo.query_lot_rows(&wallet, market.as_ref()).await?;
        Some(rows.iter().map(LotDto::from).collect())
    } else {
        None
    };

    Ok(Json(PositionsResponse {
        wallet: wallet.to_string(),
        positions,
        lots,
    }))
}
