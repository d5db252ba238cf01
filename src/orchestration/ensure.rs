use crate::config::Config;
use crate::datasource::{DataSource, DataSourceError};
use crate::db::Repository;
use crate::domain::{TimeMs, Wallet};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Pulls a wallet's fills, the resolutions of its markets and its aliases
/// from a [`DataSource`] into the store.
#[derive(Clone)]
pub struct Ingestor {
    datasource: Arc<dyn DataSource>,
    repo: Arc<Repository>,
    config: Config,
}

impl Ingestor {
    pub fn new(datasource: Arc<dyn DataSource>, repo: Arc<Repository>, config: Config) -> Self {
        Self {
            datasource,
            repo,
            config,
        }
    }

    /// Ensure inputs are ingested for the given wallet and time range.
    ///
    /// Without an explicit `from_ms` the fetch resumes from the latest stored
    /// fill. Either way the start is pulled back by `LOOKBACK_MS` so late
    /// deliveries are picked up; replays are absorbed by idempotent inserts.
    pub async fn ensure_ingested(
        &self,
        wallet: &Wallet,
        from_ms: Option<TimeMs>,
        to_ms: Option<TimeMs>,
    ) -> Result<IngestionResult, IngestionError> {
        let fetch_from = self.compute_fetch_start(wallet, from_ms).await?;
        let fetch_to = to_ms.unwrap_or_else(TimeMs::now);

        let fills = self
            .datasource
            .fetch_fills(wallet, fetch_from.as_ms(), fetch_to.as_ms())
            .await?;
        let fills_fetched = fills.len();
        let fills_new = self.repo.insert_fills_batch(&fills).await?;

        let markets = self.repo.query_distinct_markets(wallet).await?;
        let resolutions = self.datasource.fetch_resolutions(&markets).await?;
        let resolutions_changed = self.repo.upsert_resolutions(&resolutions).await?;

        let aliases = self
            .datasource
            .fetch_wallet_aliases(std::slice::from_ref(wallet))
            .await?;
        let aliases_changed = self.repo.upsert_wallet_aliases(&aliases).await?;

        info!(
            wallet = %wallet,
            fills_fetched,
            fills_new,
            markets = markets.len(),
            resolutions_changed,
            aliases_changed,
            "Ingestion finished"
        );

        Ok(IngestionResult {
            fills_fetched,
            fills_new,
            resolutions_changed,
            aliases_changed,
            fetch_from,
            fetch_to,
        })
    }

    async fn compute_fetch_start(
        &self,
        wallet: &Wallet,
        requested_from: Option<TimeMs>,
    ) -> Result<TimeMs, IngestionError> {
        let requested = match requested_from {
            Some(from) => from,
            None => self
                .repo
                .latest_fill_time(wallet)
                .await?
                .unwrap_or(TimeMs::new(0)),
        };
        let lookback = self.config.lookback_ms;
        let fetch_from = TimeMs::new(requested.as_ms().saturating_sub(lookback).max(0));

        tracing::debug!(
            wallet = %wallet,
            requested = requested.as_ms(),
            fetch_from = fetch_from.as_ms(),
            lookback_ms = lookback,
            "Computed fetch window start"
        );

        Ok(fetch_from)
    }
}

#[derive(Debug)]
pub struct IngestionResult {
    pub fills_fetched: usize,
    pub fills_new: usize,
    pub resolutions_changed: usize,
    pub aliases_changed: usize,
    pub fetch_from: TimeMs,
    pub fetch_to: TimeMs,
}

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error(transparent)]
    DataSource(#[from] DataSourceError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MockDataSource;
    use crate::db::migrations::init_db;
    use crate::domain::{Decimal, Fill, FillSource, MarketId, OutcomeIndex, Resolution, Role};
    use std::collections::HashMap;
    use tempfile::TempDir;

    async fn setup_repo() -> (Arc<Repository>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Arc::new(Repository::new(pool)), temp_dir)
    }

    fn test_config(lookback_ms: i64) -> Config {
        let mut env = HashMap::new();
        env.insert("DATABASE_PATH".to_string(), ":memory:".to_string());
        env.insert("LOOKBACK_MS".to_string(), lookback_ms.to_string());
        Config::from_env_map(env).unwrap()
    }

    fn make_test_fill(wallet: &Wallet, time_ms: i64, tx: &str) -> Fill {
        Fill::new(
            tx,
            0,
            wallet.clone(),
            MarketId::new("0xm"),
            OutcomeIndex::new(0),
            TimeMs::new(time_ms),
            Decimal::from_str_canonical("10").unwrap(),
            Decimal::from_str_canonical("-4").unwrap(),
            Role::Taker,
            FillSource::OrderMatched,
        )
    }

    #[tokio::test]
    async fn test_ensure_ingested_fetches_and_stores() {
        let wallet = Wallet::new("0x123");
        let ds = Arc::new(
            MockDataSource::new()
                .with_fill(make_test_fill(&wallet, 1000, "0x1"))
                .with_fill(make_test_fill(&wallet, 2000, "0x2"))
                .with_resolution(Resolution::new(
                    MarketId::new("0xm"),
                    OutcomeIndex::new(0),
                    Decimal::one(),
                    TimeMs::new(3000),
                ))
                .with_alias(wallet.clone(), Wallet::new("0xacc")),
        );

        let (repo, _temp) = setup_repo().await;
        let ingestor = Ingestor::new(ds, repo.clone(), test_config(0));

        let result = ingestor
            .ensure_ingested(&wallet, Some(TimeMs::new(0)), Some(TimeMs::new(5000)))
            .await
            .unwrap();
        assert_eq!(result.fills_new, 2);
        assert_eq!(result.resolutions_changed, 1);
        assert_eq!(result.aliases_changed, 1);

        let fills = repo.query_fills(&wallet, None, None).await.unwrap();
        assert_eq!(fills.len(), 2);
    }

    #[tokio::test]
    async fn test_ensure_ingested_is_idempotent() {
        let wallet = Wallet::new("0x123");
        let ds = Arc::new(MockDataSource::new().with_fill(make_test_fill(&wallet, 1000, "0x1")));

        let (repo, _temp) = setup_repo().await;
        let ingestor = Ingestor::new(ds, repo, test_config(0));

        ingestor
            .ensure_ingested(&wallet, Some(TimeMs::new(0)), Some(TimeMs::new(5000)))
            .await
            .unwrap();
        let result2 = ingestor
            .ensure_ingested(&wallet, Some(TimeMs::new(0)), Some(TimeMs::new(5000)))
            .await
            .unwrap();

        assert_eq!(result2.fills_new, 0, "Second run should insert nothing new");
    }

    #[tokio::test]
    async fn test_lookback_applied_to_fetch_from() {
        let wallet = Wallet::new("0x123");
        let (repo, _temp) = setup_repo().await;
        let ingestor = Ingestor::new(Arc::new(MockDataSource::new()), repo, test_config(100));

        let result = ingestor
            .ensure_ingested(&wallet, Some(TimeMs::new(1000)), Some(TimeMs::new(2000)))
            .await
            .unwrap();
        assert_eq!(result.fetch_from.as_ms(), 900);
    }

    #[tokio::test]
    async fn test_resumes_from_latest_stored_fill() {
        let wallet = Wallet::new("0x123");
        let (repo, _temp) = setup_repo().await;
        repo.insert_fills_batch(&[make_test_fill(&wallet, 5000, "0x1")])
            .await
            .unwrap();

        let ingestor = Ingestor::new(Arc::new(MockDataSource::new()), repo, test_config(1000));
        let result = ingestor
            .ensure_ingested(&wallet, None, Some(TimeMs::new(9000)))
            .await
            .unwrap();
        assert_eq!(result.fetch_from.as_ms(), 4000);
    }
}
