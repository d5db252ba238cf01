use crate::compile::{RebuildError, RebuildSummary, Rebuilder};
use crate::domain::{TimeMs, Wallet};
use crate::orchestration::ensure::{IngestionError, Ingestor};
use thiserror::Error;

/// Ingest-then-rebuild for one wallet, or a rebuild of everything.
///
/// Without a data source only stored inputs are used.
#[derive(Clone)]
pub struct Orchestrator {
    ingestor: Option<Ingestor>,
    rebuilder: Rebuilder,
}

impl Orchestrator {
    pub fn new(ingestor: Option<Ingestor>, rebuilder: Rebuilder) -> Self {
        Self {
            ingestor,
            rebuilder,
        }
    }

    pub fn rebuilder(&self) -> &Rebuilder {
        &self.rebuilder
    }

    /// Ensure the wallet's inputs are ingested and its units recomputed.
    pub async fn ensure_compiled(
        &self,
        wallet: &Wallet,
        from_ms: Option<TimeMs>,
        to_ms: Option<TimeMs>,
    ) -> Result<RebuildSummary, OrchestrationError> {
        if let Some(ingestor) = &self.ingestor {
            ingestor.ensure_ingested(wallet, from_ms, to_ms).await?;
        }
        Ok(self.rebuilder.rebuild_wallet(wallet).await?)
    }

    pub async fn rebuild_all(&self) -> Result<RebuildSummary, OrchestrationError> {
        Ok(self.rebuilder.rebuild_all().await?)
    }
}

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Ingestion(#[from] IngestionError),
    #[error(transparent)]
    Rebuild(#[from] RebuildError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::datasource::MockDataSource;
    use crate::db::{init_db, Repository};
    use crate::domain::{Decimal, Fill, FillSource, MarketId, OutcomeIndex, Resolution, Role};
    use crate::engine::EnginePolicy;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_ensure_compiled_ingests_then_rebuilds() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db").to_string_lossy().to_string();
        let repo = Arc::new(Repository::new(init_db(&db_path).await.unwrap()));

        let wallet = Wallet::new("0xabc");
        let d = |s: &str| Decimal::from_str_canonical(s).unwrap();
        let ds = Arc::new(
            MockDataSource::new()
                .with_fill(Fill::new(
                    "0x1",
                    0,
                    wallet.clone(),
                    MarketId::new("0xm"),
                    OutcomeIndex::new(1),
                    TimeMs::new(1000),
                    d("-100"),
                    d("60"),
                    Role::Taker,
                    FillSource::OrderMatched,
                ))
                .with_resolution(Resolution::new(
                    MarketId::new("0xm"),
                    OutcomeIndex::new(1),
                    Decimal::zero(),
                    TimeMs::new(2000),
                )),
        );

        let mut env = HashMap::new();
        env.insert("DATABASE_PATH".to_string(), db_path.clone());
        let config = Config::from_env_map(env).unwrap();

        let ingestor = Ingestor::new(ds, repo.clone(), config);
        let rebuilder = Rebuilder::new(repo.clone(), EnginePolicy::default());
        let orchestrator = Orchestrator::new(Some(ingestor), rebuilder);

        let summary = orchestrator
            .ensure_compiled(&wallet, Some(TimeMs::new(0)), Some(TimeMs::new(5000)))
            .await
            .unwrap();
        assert_eq!(summary.units_resolved, 1);

        let positions = repo.query_positions_for_wallets(&[wallet]).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].total_realized_pnl, d("60"));
        assert!(positions[0].is_short);
    }
}
