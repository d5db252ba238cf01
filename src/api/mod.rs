pub mod health;
pub mod leaderboard;
pub mod pnl;
pub mod positions;
pub mod rebuild;

use crate::compile::Rebuilder;
use crate::config::Config;
use crate::datasource::{self, DataSource};
use crate::db::Repository;
use crate::domain::{Decimal, TimeMs, Wallet};
use crate::error::AppError;
use crate::orchestration::{Ingestor, Orchestrator};
use axum::{
    routing::{get, post},
    Router,
};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub config: Config,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, config: Config, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            repo,
            config,
            orchestrator,
        }
    }

    /// Wire the orchestrator from config, with an explicit data source override.
    pub fn with_datasource(
        repo: Arc<Repository>,
        config: Config,
        datasource: Option<Arc<dyn DataSource>>,
    ) -> Self {
        let ingestor =
            datasource.map(|ds| Ingestor::new(ds, repo.clone(), config.clone()));
        let rebuilder = Rebuilder::from_config(repo.clone(), &config);
        let orchestrator = Arc::new(Orchestrator::new(ingestor, rebuilder));
        Self::new(repo, config, orchestrator)
    }

    pub fn from_config(repo: Arc<Repository>, config: Config) -> Self {
        let ds = datasource::from_kind(&config.data_source);
        Self::with_datasource(repo, config, ds)
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/positions", get(positions::get_positions))
        .route("/v1/pnl", get(pnl::get_pnl))
        .route("/v1/leaderboard", get(leaderboard::get_leaderboard))
        .route("/v1/rebuild", post(rebuild::post_rebuild))
        .layer(cors)
        .with_state(state)
}

pub(crate) fn parse_wallet(input: &str) -> Result<Wallet, AppError> {
    Wallet::from_str(input).map_err(|_| AppError::BadRequest("Invalid wallet address".into()))
}

pub(crate) fn opt_decimal(d: Option<Decimal>) -> Option<String> {
    d.map(|d| d.to_canonical_string())
}

pub(crate) fn opt_ms(t: Option<TimeMs>) -> Option<i64> {
    t.map(|t| t.as_ms())
}
