use crate::api::AppState;
use crate::error::AppError;
use axum::extract::State;
use axum::Json;
use serde_json::json;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// Ready once the store answers; reports the last rebuild run if any.
pub async fn ready(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let last = state.repo.latest_rebuild_run().await?;
    let last_rebuild = last.map(|run| {
        json!({
            "runId": run.run_id,
            "startedAtMs": run.started_at.as_ms(),
            "finishedAtMs": run.finished_at.as_ms(),
            "unitsTotal": run.units_total,
            "unitsSucceeded": run.units_succeeded,
            "unitsFailed": run.units_failed,
            "outputDigest": run.output_digest,
        })
    });
    Ok(Json(json!({
        "status": "ready",
        "lastRebuild": last_rebuild,
    })))
}
