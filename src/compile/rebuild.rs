//! Full recomputation of unit ledgers from stored fills.

use super::{FailureKind, RebuildError, RebuildSummary, UnitFailure};
use crate::config::Config;
use crate::db::Repository;
use crate::domain::{Decimal, PositionKey, TimeMs, Wallet};
use crate::engine::{aggregate_position, compute_unit, lot_rows, EnginePolicy, LotRow, Position};
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const DEFAULT_CONCURRENCY: usize = 8;
const DEFAULT_UNIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Recomputes units and replaces their stored output.
///
/// Every unit is an independent job: it reads its own fills and resolution,
/// runs the pure engine, and writes its own rows in one transaction. No
/// transaction spans two units, so a failed or timed-out unit leaves the
/// others untouched.
#[derive(Clone)]
pub struct Rebuilder {
    repo: Arc<Repository>,
    policy: EnginePolicy,
    concurrency: usize,
    unit_timeout: Duration,
}

enum UnitOutcome {
    Written {
        key: PositionKey,
        resolved: bool,
        excluded: usize,
        collapsed: usize,
        fingerprint: String,
    },
    Empty {
        excluded: usize,
        collapsed: usize,
    },
    Failed(UnitFailure),
}

impl Rebuilder {
    pub fn new(repo: Arc<Repository>, policy: EnginePolicy) -> Self {
        Self {
            repo,
            policy,
            concurrency: DEFAULT_CONCURRENCY,
            unit_timeout: DEFAULT_UNIT_TIMEOUT,
        }
    }

    pub fn from_config(repo: Arc<Repository>, config: &Config) -> Self {
        Self::new(repo, config.policy.clone())
            .with_concurrency(config.rebuild_concurrency)
            .with_unit_timeout(Duration::from_millis(config.unit_timeout_ms))
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_unit_timeout(mut self, unit_timeout: Duration) -> Self {
        self.unit_timeout = unit_timeout;
        self
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    /// Rebuild every unit that has stored fills.
    ///
    /// # Errors
    /// Returns an error only if the unit list cannot be read or the run
    /// summary cannot be persisted.
    pub async fn rebuild_all(&self) -> Result<RebuildSummary, RebuildError> {
        let keys = self.repo.query_unit_keys(None).await?;
        self.rebuild_units(keys).await
    }

    /// Rebuild every unit of one raw wallet.
    ///
    /// # Errors
    /// See [`Rebuilder::rebuild_all`].
    pub async fn rebuild_wallet(&self, wallet: &Wallet) -> Result<RebuildSummary, RebuildError> {
        let keys = self.repo.query_unit_keys(Some(wallet)).await?;
        self.rebuild_units(keys).await
    }

    /// Rebuild the given units with a bounded worker pool.
    ///
    /// # Errors
    /// See [`Rebuilder::rebuild_all`].
    pub async fn rebuild_units(
        &self,
        mut keys: Vec<PositionKey>,
    ) -> Result<RebuildSummary, RebuildError> {
        keys.sort();
        keys.dedup();

        let run_id = Uuid::new_v4();
        let started_at = TimeMs::now();
        let run_label = run_id.to_string();
        info!(run_id = %run_id, units = keys.len(), "Starting rebuild");

        let outcomes: Vec<UnitOutcome> = stream::iter(keys.iter().cloned())
            .map(|key| {
                let run_label = run_label.as_str();
                async move { self.rebuild_unit_with_timeout(key, run_label).await }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut summary = RebuildSummary {
            run_id,
            started_at,
            finished_at: started_at,
            units_total: keys.len(),
            units_succeeded: 0,
            units_resolved: 0,
            units_unresolved: 0,
            units_empty: 0,
            fills_excluded: 0,
            makers_collapsed: 0,
            failures: Vec::new(),
            output_digest: String::new(),
        };

        let mut fingerprints: Vec<(PositionKey, String)> = Vec::new();
        for outcome in outcomes {
            match outcome {
                UnitOutcome::Written {
                    key,
                    resolved,
                    excluded,
                    collapsed,
                    fingerprint,
                } => {
                    summary.units_succeeded += 1;
                    if resolved {
                        summary.units_resolved += 1;
                    } else {
                        summary.units_unresolved += 1;
                    }
                    summary.fills_excluded += excluded;
                    summary.makers_collapsed += collapsed;
                    fingerprints.push((key, fingerprint));
                }
                UnitOutcome::Empty {
                    excluded,
                    collapsed,
                } => {
                    summary.units_succeeded += 1;
                    summary.units_empty += 1;
                    summary.fills_excluded += excluded;
                    summary.makers_collapsed += collapsed;
                }
                UnitOutcome::Failed(failure) => summary.failures.push(failure),
            }
        }

        summary.failures.sort_by(|a, b| a.key.cmp(&b.key));
        fingerprints.sort_by(|a, b| a.0.cmp(&b.0));
        let mut hasher = Sha256::new();
        for (_, fingerprint) in &fingerprints {
            hasher.update(fingerprint.as_bytes());
        }
        summary.output_digest = hex::encode(hasher.finalize());
        summary.finished_at = TimeMs::now();

        self.repo.insert_rebuild_run(&summary).await?;

        info!(
            run_id = %run_id,
            units = summary.units_total,
            succeeded = summary.units_succeeded,
            failed = summary.units_failed(),
            resolved = summary.units_resolved,
            unresolved = summary.units_unresolved,
            empty = summary.units_empty,
            fills_excluded = summary.fills_excluded,
            makers_collapsed = summary.makers_collapsed,
            digest = %summary.output_digest,
            "Rebuild finished"
        );

        Ok(summary)
    }

    async fn rebuild_unit_with_timeout(&self, key: PositionKey, run_id: &str) -> UnitOutcome {
        let result = tokio::time::timeout(self.unit_timeout, self.rebuild_unit(&key, run_id)).await;
        match result {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    wallet = %key.wallet,
                    market_id = %key.market_id,
                    outcome_index = key.outcome_index.as_u8(),
                    timeout_ms = self.unit_timeout.as_millis() as u64,
                    "Unit rebuild timed out"
                );
                UnitOutcome::Failed(UnitFailure {
                    reason: format!("timed out after {}ms", self.unit_timeout.as_millis()),
                    key,
                    kind: FailureKind::Timeout,
                })
            }
        }
    }

    async fn rebuild_unit(&self, key: &PositionKey, run_id: &str) -> UnitOutcome {
        let storage_failure = |e: sqlx::Error| {
            warn!(
                wallet = %key.wallet,
                market_id = %key.market_id,
                outcome_index = key.outcome_index.as_u8(),
                error = %e,
                "Unit rebuild storage error"
            );
            UnitOutcome::Failed(UnitFailure {
                key: key.clone(),
                kind: FailureKind::Storage,
                reason: e.to_string(),
            })
        };

        let fills = match self.repo.query_fills_for_unit(key).await {
            Ok(fills) => fills,
            Err(e) => return storage_failure(e),
        };
        let resolution = match self
            .repo
            .get_resolution(&key.market_id, key.outcome_index)
            .await
        {
            Ok(resolution) => resolution,
            Err(e) => return storage_failure(e),
        };

        let unit = match compute_unit(key, &fills, resolution.as_ref(), &self.policy) {
            Ok(unit) => unit,
            Err(e) => {
                warn!(
                    wallet = %key.wallet,
                    market_id = %key.market_id,
                    outcome_index = key.outcome_index.as_u8(),
                    error = %e,
                    "Unit rejected, clearing its output"
                );
                if let Err(db_err) = self.repo.delete_unit_output(key).await {
                    return storage_failure(db_err);
                }
                return UnitOutcome::Failed(UnitFailure {
                    key: key.clone(),
                    kind: FailureKind::Contract,
                    reason: e.to_string(),
                });
            }
        };

        let excluded = unit.report.excluded.len();
        let collapsed = unit.report.collapsed_maker.len();

        if unit.is_empty() {
            debug!(unit = %key, excluded, collapsed, "Unit has no ledger events");
            if let Err(e) = self.repo.delete_unit_output(key).await {
                return storage_failure(e);
            }
            return UnitOutcome::Empty {
                excluded,
                collapsed,
            };
        }

        let lots = lot_rows(&unit);
        let position = aggregate_position(&unit);
        if let Err(e) = self
            .repo
            .replace_unit_output(key, &lots, &position, run_id)
            .await
        {
            return storage_failure(e);
        }

        debug!(
            unit = %key,
            lots = lots.len(),
            status = position.status.as_str(),
            realized = %position.total_realized_pnl,
            "Unit rebuilt"
        );

        UnitOutcome::Written {
            key: key.clone(),
            resolved: position.status.is_resolved(),
            excluded,
            collapsed,
            fingerprint: fingerprint(key, &lots, &position),
        }
    }
}

/// Canonical text of one unit's output; stable across identical rebuilds.
fn fingerprint(key: &PositionKey, lots: &[LotRow], position: &Position) -> String {
    let opt = |d: Option<Decimal>| d.map(|d| d.to_canonical_string()).unwrap_or_default();
    let opt_time = |t: Option<TimeMs>| t.map(|t| t.as_i64().to_string()).unwrap_or_default();

    let mut out = format!(
        "P|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}\n",
        key,
        position.status.as_str(),
        position.net_quantity.to_canonical_string(),
        position.open_quantity.to_canonical_string(),
        position.consumed_cost_basis.to_canonical_string(),
        position.total_cost_basis.to_canonical_string(),
        position.realized_early_pnl.to_canonical_string(),
        position.realized_settlement_pnl.to_canonical_string(),
        opt(position.unrealized_pnl),
        opt(position.roi),
        opt(position.settlement_value),
        opt_time(position.resolved_at),
        position.is_closed,
        position.is_short,
    );
    for lot in lots {
        out.push_str(&format!(
            "L|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}\n",
            lot.lot_seq,
            lot.fill_key,
            lot.entry_time.as_i64(),
            lot.quantity.to_canonical_string(),
            lot.cost.to_canonical_string(),
            lot.quantity_sold_early.to_canonical_string(),
            lot.quantity_held_to_resolution.to_canonical_string(),
            lot.remaining_quantity.to_canonical_string(),
            lot.exit_value.to_canonical_string(),
            lot.realized_pnl.to_canonical_string(),
            opt(lot.roi),
            lot.is_closed,
            lot.is_short,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::domain::{Fill, FillSource, MarketId, OutcomeIndex, Resolution, Role};
    use tempfile::TempDir;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn fill(wallet: &str, tx: &str, time: i64, qty: &str, cash: &str, role: Role) -> Fill {
        Fill::new(
            tx,
            0,
            Wallet::new(wallet),
            MarketId::new("0xm"),
            OutcomeIndex::new(0),
            TimeMs::new(time),
            d(qty),
            d(cash),
            role,
            FillSource::OrderMatched,
        )
    }

    async fn setup() -> (Rebuilder, Arc<Repository>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db").to_string_lossy().to_string();
        let repo = Arc::new(Repository::new(init_db(&db_path).await.unwrap()));
        let rebuilder = Rebuilder::new(repo.clone(), EnginePolicy::default()).with_concurrency(2);
        (rebuilder, repo, temp_dir)
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() {
        let (rebuilder, repo, _temp) = setup().await;
        repo.insert_fills_batch(&[
            fill("0xa", "0x1", 1, "300", "-150", Role::Taker),
            fill("0xa", "0x2", 2, "700", "-420", Role::Taker),
            fill("0xa", "0x3", 3, "-500", "325", Role::Taker),
            fill("0xb", "0x4", 4, "10", "-5", Role::Taker),
        ])
        .await
        .unwrap();
        repo.upsert_resolutions(&[Resolution::new(
            MarketId::new("0xm"),
            OutcomeIndex::new(0),
            d("1"),
            TimeMs::new(100),
        )])
        .await
        .unwrap();

        let first = rebuilder.rebuild_all().await.unwrap();
        let second = rebuilder.rebuild_all().await.unwrap();

        assert_eq!(first.units_total, 2);
        assert_eq!(first.units_succeeded, 2);
        assert_eq!(first.units_resolved, 2);
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(first.output_digest, second.output_digest);

        let positions = repo.query_all_positions().await.unwrap();
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].total_realized_pnl, d("255"));
    }

    #[tokio::test]
    async fn test_contract_violation_isolated_and_clears_output() {
        let (rebuilder, repo, _temp) = setup().await;
        repo.insert_fills_batch(&[
            fill("0xa", "0x1", 1, "10", "-5", Role::Taker),
            fill("0xb", "0x2", 2, "10", "-5", Role::Taker),
        ])
        .await
        .unwrap();
        let first = rebuilder.rebuild_all().await.unwrap();
        assert!(first.failures.is_empty());

        // Same tx, market, outcome and role with a different log index.
        let dup = Fill::new(
            "0x2",
            1,
            Wallet::new("0xb"),
            MarketId::new("0xm"),
            OutcomeIndex::new(0),
            TimeMs::new(3),
            d("1"),
            d("-1"),
            Role::Taker,
            FillSource::OrderMatched,
        );
        repo.insert_fills_batch(&[dup]).await.unwrap();

        let summary = rebuilder.rebuild_all().await.unwrap();
        assert_eq!(summary.units_succeeded, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].key.wallet, Wallet::new("0xb"));
        assert_eq!(summary.failures[0].kind, FailureKind::Contract);

        let positions = repo.query_all_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].key.wallet, Wallet::new("0xa"));

        let stored = repo
            .query_unit_failures(&summary.run_id.to_string())
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_wallet_only_touches_that_wallet() {
        let (rebuilder, repo, _temp) = setup().await;
        repo.insert_fills_batch(&[
            fill("0xa", "0x1", 1, "10", "-5", Role::Taker),
            fill("0xb", "0x2", 2, "10", "-5", Role::Taker),
        ])
        .await
        .unwrap();

        let summary = rebuilder.rebuild_wallet(&Wallet::new("0xa")).await.unwrap();
        assert_eq!(summary.units_total, 1);
        assert_eq!(summary.units_unresolved, 1);

        let positions = repo.query_all_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
    }

    #[tokio::test]
    async fn test_excluded_only_unit_is_empty() {
        let (rebuilder, repo, _temp) = setup().await;
        let mut adapter = fill("0xa", "0x1", 1, "1000", "0", Role::Taker);
        adapter.source = FillSource::from("liquidity-adapter");
        repo.insert_fills_batch(&[adapter]).await.unwrap();

        let summary = rebuilder.rebuild_all().await.unwrap();
        assert_eq!(summary.units_empty, 1);
        assert_eq!(summary.fills_excluded, 1);
        assert!(repo.query_all_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timed_out_unit_keeps_previous_output() {
        let (rebuilder, repo, _temp) = setup().await;
        repo.insert_fills_batch(&[fill("0xa", "0x1", 1, "10", "-4", Role::Taker)])
            .await
            .unwrap();
        let first = rebuilder.rebuild_all().await.unwrap();
        assert_eq!(first.units_succeeded, 1);

        let summary = rebuilder
            .clone()
            .with_unit_timeout(Duration::ZERO)
            .rebuild_all()
            .await
            .unwrap();

        assert_eq!(summary.units_total, 1);
        assert_eq!(summary.units_succeeded, 0);
        assert_eq!(summary.units_failed(), 1);
        assert_eq!(summary.failures[0].kind, FailureKind::Timeout);
        assert_eq!(summary.failures[0].key.wallet, Wallet::new("0xa"));

        let positions = repo.query_all_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].total_cost_basis, d("4"));
    }

    #[tokio::test]
    async fn test_out_of_range_unit_fails_without_aborting_batch() {
        let (rebuilder, repo, _temp) = setup().await;
        repo.insert_fills_batch(&[
            fill("0xa", "0x1", 1, "50000000000000000000000000000", "-1", Role::Taker),
            fill("0xa", "0x2", 2, "50000000000000000000000000000", "-1", Role::Taker),
            fill("0xb", "0x3", 3, "10", "-5", Role::Taker),
        ])
        .await
        .unwrap();

        let summary = rebuilder.rebuild_all().await.unwrap();
        assert_eq!(summary.units_total, 2);
        assert_eq!(summary.units_succeeded, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].kind, FailureKind::Contract);
        assert_eq!(summary.failures[0].key.wallet, Wallet::new("0xa"));

        let positions = repo.query_all_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].key.wallet, Wallet::new("0xb"));
    }
}
