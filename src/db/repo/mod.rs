//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `fills.rs` - Fill ingestion and unit enumeration
//! - `positions.rs` - Ledger lot and position output

mod fills;
mod positions;

use crate::compile::{FailureKind, RebuildSummary};
use crate::domain::{Decimal, MarketId, OutcomeIndex, PositionKey, Resolution, TimeMs, Wallet};
use crate::engine::WalletAliases;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::warn;

/// Stored header of one rebuild run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildRunRow {
    pub run_id: String,
    pub started_at: TimeMs,
    pub finished_at: TimeMs,
    pub units_total: i64,
    pub units_succeeded: i64,
    pub units_failed: i64,
    pub output_digest: String,
}

/// Stored per-unit failure of a rebuild run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailureRow {
    pub key: PositionKey,
    pub kind: FailureKind,
    pub reason: String,
}

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    // =========================================================================
    // Resolution operations
    // =========================================================================

    /// Insert or correct market resolutions in one transaction.
    ///
    /// Returns the number of rows inserted or changed.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn upsert_resolutions(
        &self,
        resolutions: &[Resolution],
    ) -> Result<usize, sqlx::Error> {
        if resolutions.is_empty() {
            return Ok(0);
        }

        let mut changed = 0usize;
        let mut tx = self.pool.begin().await?;

        for resolution in resolutions {
            let result = sqlx::query(
                r#"
                INSERT INTO resolutions (market_id, outcome_index, payout_per_share, resolved_at_ms)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(market_id, outcome_index) DO UPDATE SET
                    payout_per_share = excluded.payout_per_share,
                    resolved_at_ms = excluded.resolved_at_ms
                WHERE payout_per_share != excluded.payout_per_share
                   OR resolved_at_ms != excluded.resolved_at_ms
                "#,
            )
            .bind(resolution.market_id.as_str())
            .bind(resolution.outcome_index.as_u8() as i64)
            .bind(resolution.payout_per_share.to_canonical_string())
            .bind(resolution.resolved_at.as_i64())
            .execute(&mut *tx)
            .await?;

            changed += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(changed)
    }

    /// Resolution of one market outcome, if it has resolved.
    ///
    /// # Errors
    /// Returns an error if the query fails or the stored payout is not a decimal.
    pub async fn get_resolution(
        &self,
        market_id: &MarketId,
        outcome_index: OutcomeIndex,
    ) -> Result<Option<Resolution>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT market_id, outcome_index, payout_per_share, resolved_at_ms
            FROM resolutions
            WHERE market_id = ? AND outcome_index = ?
            "#,
        )
        .bind(market_id.as_str())
        .bind(outcome_index.as_u8() as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(Resolution::new(
                MarketId::new(row.get::<String, _>("market_id")),
                outcome_col(&row, "outcome_index")?,
                decimal_col(&row, "payout_per_share")?,
                TimeMs::new(row.get("resolved_at_ms")),
            ))
        })
        .transpose()
    }

    // =========================================================================
    // Wallet alias operations
    // =========================================================================

    /// Insert or re-point raw → canonical wallet aliases.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn upsert_wallet_aliases(
        &self,
        aliases: &[(Wallet, Wallet)],
    ) -> Result<usize, sqlx::Error> {
        if aliases.is_empty() {
            return Ok(0);
        }

        let mut changed = 0usize;
        let mut tx = self.pool.begin().await?;

        for (raw, canonical) in aliases {
            let result = sqlx::query(
                r#"
                INSERT INTO wallet_aliases (raw_wallet, canonical_wallet)
                VALUES (?, ?)
                ON CONFLICT(raw_wallet) DO UPDATE SET
                    canonical_wallet = excluded.canonical_wallet
                WHERE canonical_wallet != excluded.canonical_wallet
                "#,
            )
            .bind(raw.as_str())
            .bind(canonical.as_str())
            .execute(&mut *tx)
            .await?;

            changed += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(changed)
    }

    /// Load the full alias table.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn load_wallet_aliases(&self) -> Result<WalletAliases, sqlx::Error> {
        let rows = sqlx::query("SELECT raw_wallet, canonical_wallet FROM wallet_aliases")
            .fetch_all(&self.pool)
            .await?;

        Ok(WalletAliases::from_pairs(rows.iter().map(|row| {
            (
                Wallet::new(row.get::<String, _>("raw_wallet")),
                Wallet::new(row.get::<String, _>("canonical_wallet")),
            )
        })))
    }

    /// Raw wallets aliased to `canonical`, sorted. Does not include `canonical` itself.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_alias_members(&self, canonical: &Wallet) -> Result<Vec<Wallet>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT raw_wallet FROM wallet_aliases
            WHERE canonical_wallet = ?
            ORDER BY raw_wallet ASC
            "#,
        )
        .bind(canonical.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Wallet::new(row.get::<String, _>("raw_wallet")))
            .collect())
    }

    // =========================================================================
    // Rebuild run operations
    // =========================================================================

    /// Persist a rebuild run header and its unit failures atomically.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_rebuild_run(&self, summary: &RebuildSummary) -> Result<(), sqlx::Error> {
        let run_id = summary.run_id.to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO rebuild_runs (
                run_id, started_at_ms, finished_at_ms, units_total, units_succeeded,
                units_failed, units_resolved, units_unresolved, units_empty,
                fills_excluded, makers_collapsed, output_digest
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run_id)
        .bind(summary.started_at.as_i64())
        .bind(summary.finished_at.as_i64())
        .bind(summary.units_total as i64)
        .bind(summary.units_succeeded as i64)
        .bind(summary.failures.len() as i64)
        .bind(summary.units_resolved as i64)
        .bind(summary.units_unresolved as i64)
        .bind(summary.units_empty as i64)
        .bind(summary.fills_excluded as i64)
        .bind(summary.makers_collapsed as i64)
        .bind(&summary.output_digest)
        .execute(&mut *tx)
        .await?;

        for failure in &summary.failures {
            sqlx::query(
                r#"
                INSERT INTO unit_failures (run_id, wallet, market_id, outcome_index, kind, reason)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&run_id)
            .bind(failure.key.wallet.as_str())
            .bind(failure.key.market_id.as_str())
            .bind(failure.key.outcome_index.as_u8() as i64)
            .bind(failure.kind.as_str())
            .bind(&failure.reason)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Most recently finished rebuild run.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn latest_rebuild_run(&self) -> Result<Option<RebuildRunRow>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT run_id, started_at_ms, finished_at_ms, units_total, units_succeeded,
                   units_failed, output_digest
            FROM rebuild_runs
            ORDER BY finished_at_ms DESC, run_id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| RebuildRunRow {
            run_id: row.get("run_id"),
            started_at: TimeMs::new(row.get("started_at_ms")),
            finished_at: TimeMs::new(row.get("finished_at_ms")),
            units_total: row.get("units_total"),
            units_succeeded: row.get("units_succeeded"),
            units_failed: row.get("units_failed"),
            output_digest: row.get("output_digest"),
        }))
    }

    /// Failures recorded for one run, in unit order.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored kind is unknown.
    pub async fn query_unit_failures(&self, run_id: &str) -> Result<Vec<UnitFailureRow>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT wallet, market_id, outcome_index, kind, reason
            FROM unit_failures
            WHERE run_id = ?
            ORDER BY wallet ASC, market_id ASC, outcome_index ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let kind: String = row.get("kind");
                Ok(UnitFailureRow {
                    key: key_cols(row)?,
                    kind: FailureKind::from_str(&kind).map_err(|e| {
                        sqlx::Error::ColumnDecode {
                            index: "kind".to_string(),
                            source: Box::new(e),
                        }
                    })?,
                    reason: row.get("reason"),
                })
            })
            .collect()
    }
}

// =========================================================================
// Row decoding helpers
// =========================================================================

/// Decode a TEXT decimal column. Malformed values reject the row instead of defaulting.
pub(super) fn decimal_col(row: &SqliteRow, column: &str) -> Result<Decimal, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    parse_decimal(&raw, column)
}

pub(super) fn opt_decimal_col(row: &SqliteRow, column: &str) -> Result<Option<Decimal>, sqlx::Error> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|raw| parse_decimal(&raw, column)).transpose()
}

fn parse_decimal(raw: &str, column: &str) -> Result<Decimal, sqlx::Error> {
    Decimal::from_str(raw).map_err(|e| {
        warn!(column, value = %raw, error = %e, "Failed to parse stored decimal, rejecting row");
        sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        }
    })
}

pub(super) fn outcome_col(row: &SqliteRow, column: &str) -> Result<OutcomeIndex, sqlx::Error> {
    let raw: i64 = row.try_get(column)?;
    u8::try_from(raw)
        .map(OutcomeIndex::new)
        .map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
}

pub(super) fn key_cols(row: &SqliteRow) -> Result<PositionKey, sqlx::Error> {
    Ok(PositionKey::new(
        Wallet::new(row.try_get::<String, _>("wallet")?),
        MarketId::new(row.try_get::<String, _>("market_id")?),
        outcome_col(row, "outcome_index")?,
    ))
}

pub(super) fn opt_time_col(row: &SqliteRow, column: &str) -> Result<Option<TimeMs>, sqlx::Error> {
    Ok(row.try_get::<Option<i64>, _>(column)?.map(TimeMs::new))
}
