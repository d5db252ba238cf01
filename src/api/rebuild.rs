use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::{parse_wallet, AppState};
use crate::compile::RebuildSummary;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildQuery {
    /// Ingest and rebuild only this wallet; absent rebuilds every stored unit.
    pub wallet: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitFailureDto {
    pub wallet: String,
    pub market_id: String,
    pub outcome_index: u8,
    pub kind: &'static str,
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildResponse {
    pub run_id: String,
    pub started_at_ms: i64,
    pub finished_at_ms: i64,
    pub units_total: usize,
    pub units_succeeded: usize,
    pub units_failed: usize,
    pub units_resolved: usize,
    pub units_unresolved: usize,
    pub units_empty: usize,
    pub fills_excluded: usize,
    pub makers_collapsed: usize,
    pub output_digest: String,
    pub failures: Vec<UnitFailureDto>,
}

impl From<RebuildSummary> for RebuildResponse {
    fn from(s: RebuildSummary) -> Self {
        let units_failed = s.units_failed();
        Self {
            run_id: s.run_id.to_string(),
            started_at_ms: s.started_at.as_ms(),
            finished_at_ms: s.finished_at.as_ms(),
            units_total: s.units_total,
            units_succeeded: s.units_succeeded,
            units_failed,
            units_resolved: s.units_resolved,
            units_unresolved: s.units_unresolved,
            units_empty: s.units_empty,
            fills_excluded: s.fills_excluded,
            makers_collapsed: s.makers_collapsed,
            output_digest: s.output_digest,
            failures: s
                .failures
                .into_iter()
                .map(|f| UnitFailureDto {
                    wallet: f.key.wallet.to_string(),
                    market_id: f.key.market_id.as_str().to_string(),
                    outcome_index: f.key.outcome_index.as_u8(),
                    kind: f.kind.as_str(),
                    reason: f.reason,
                })
                .collect(),
        }
    }
}

pub async fn post_rebuild(
    Query(params): Query<RebuildQuery>,
    State(state): State<AppState>,
) -> Result<Json<RebuildResponse>, AppError> {
    let summary = match params.wallet.as_deref() {
        Some(raw) => {
            let wallet = parse_wallet(raw)?;
            state.orchestrator.ensure_compiled(&wallet, None, None).await?
        }
        None => state.orchestrator.rebuild_all().await?,
    };
    Ok(Json(summary.into()))
}
