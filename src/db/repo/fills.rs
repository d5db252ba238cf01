//! Fill ingestion and unit enumeration for the repository.

use crate::domain::{Fill, FillSource, PositionKey, Role, TimeMs, Wallet};
use crate::domain::{MarketId, OutcomeIndex};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

use super::{decimal_col, key_cols, outcome_col, Repository};

impl Repository {
    /// Insert multiple fills in a single transaction.
    ///
    /// Returns the number of newly inserted fills (excludes replays of a known `fill_key`).
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_fills_batch(&self, fills: &[Fill]) -> Result<usize, sqlx::Error> {
        if fills.is_empty() {
            return Ok(0);
        }

        let created_at = chrono::Utc::now().timestamp_millis();
        let mut total_inserted = 0usize;

        let mut tx = self.pool.begin().await?;

        for fill in fills {
            let result = sqlx::query(
                r#"
                INSERT INTO fills (
                    fill_key, tx_id, log_index, wallet, market_id, outcome_index,
                    event_time_ms, token_delta, cash_delta_usd, role, source, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(fill_key) DO NOTHING
                "#,
            )
            .bind(fill.fill_key.as_str())
            .bind(fill.tx_id.as_str())
            .bind(fill.log_index)
            .bind(fill.wallet.as_str())
            .bind(fill.market_id.as_str())
            .bind(fill.outcome_index.as_u8() as i64)
            .bind(fill.event_time.as_i64())
            .bind(fill.token_delta.to_canonical_string())
            .bind(fill.cash_delta_usd.to_canonical_string())
            .bind(fill.role.as_str())
            .bind(fill.source.as_str())
            .bind(created_at)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                total_inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(total_inserted)
    }

    /// All stored fills of one unit, in storage order.
    ///
    /// The engine re-sorts deterministically; ordering here only keeps reads stable.
    ///
    /// # Errors
    /// Returns an error if the query fails or any row is malformed.
    pub async fn query_fills_for_unit(&self, key: &PositionKey) -> Result<Vec<Fill>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT fill_key, tx_id, log_index, wallet, market_id, outcome_index,
                   event_time_ms, token_delta, cash_delta_usd, role, source
            FROM fills
            WHERE wallet = ? AND market_id = ? AND outcome_index = ?
            ORDER BY event_time_ms ASC, tx_id ASC, log_index ASC, fill_key ASC
            "#,
        )
        .bind(key.wallet.as_str())
        .bind(key.market_id.as_str())
        .bind(key.outcome_index.as_u8() as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(fill_from_row).collect()
    }

    /// Fills for a wallet within an optional time range.
    ///
    /// # Errors
    /// Returns an error if the query fails or any row is malformed.
    pub async fn query_fills(
        &self,
        wallet: &Wallet,
        from_ms: Option<TimeMs>,
        to_ms: Option<TimeMs>,
    ) -> Result<Vec<Fill>, sqlx::Error> {
        let from_ms = from_ms.unwrap_or(TimeMs::new(0)).as_ms();
        let to_ms = to_ms.unwrap_or(TimeMs::new(i64::MAX)).as_ms();

        let rows = sqlx::query(
            r#"
            SELECT fill_key, tx_id, log_index, wallet, market_id, outcome_index,
                   event_time_ms, token_delta, cash_delta_usd, role, source
            FROM fills
            WHERE wallet = ? AND event_time_ms >= ? AND event_time_ms <= ?
            ORDER BY event_time_ms ASC, tx_id ASC, log_index ASC, fill_key ASC
            "#,
        )
        .bind(wallet.as_str())
        .bind(from_ms)
        .bind(to_ms)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(fill_from_row).collect()
    }

    /// Distinct (wallet, market, outcome) units that have fills, optionally for one wallet.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_unit_keys(
        &self,
        wallet: Option<&Wallet>,
    ) -> Result<Vec<PositionKey>, sqlx::Error> {
        let rows = match wallet {
            Some(wallet) => {
                sqlx::query(
                    r#"
                    SELECT DISTINCT wallet, market_id, outcome_index
                    FROM fills
                    WHERE wallet = ?
                    ORDER BY wallet ASC, market_id ASC, outcome_index ASC
                    "#,
                )
                .bind(wallet.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT DISTINCT wallet, market_id, outcome_index
                    FROM fills
                    ORDER BY wallet ASC, market_id ASC, outcome_index ASC
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(key_cols).collect()
    }

    /// Distinct markets a wallet has traded.
    ///
    /// Used to fetch resolutions during ingestion.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_distinct_markets(&self, wallet: &Wallet) -> Result<Vec<MarketId>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT market_id FROM fills
            WHERE wallet = ?
            ORDER BY market_id ASC
            "#,
        )
        .bind(wallet.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| MarketId::new(row.get::<String, _>("market_id")))
            .collect())
    }

    /// Latest stored event time for a wallet, if any.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn latest_fill_time(&self, wallet: &Wallet) -> Result<Option<TimeMs>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT MAX(event_time_ms) as max_time
            FROM fills
            WHERE wallet = ?
            "#,
        )
        .bind(wallet.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<Option<i64>, _>("max_time").map(TimeMs::new))
    }
}

fn fill_from_row(row: &SqliteRow) -> Result<Fill, sqlx::Error> {
    let role_str: String = row.try_get("role")?;
    let role = Role::from_str(&role_str).map_err(|e| sqlx::Error::ColumnDecode {
        index: "role".to_string(),
        source: Box::new(e),
    })?;
    let outcome_index: OutcomeIndex = outcome_col(row, "outcome_index")?;

    Ok(Fill {
        fill_key: row.try_get("fill_key")?,
        tx_id: row.try_get("tx_id")?,
        log_index: row.try_get("log_index")?,
        wallet: Wallet::new(row.try_get::<String, _>("wallet")?),
        market_id: MarketId::new(row.try_get::<String, _>("market_id")?),
        outcome_index,
        event_time: TimeMs::new(row.try_get("event_time_ms")?),
        token_delta: decimal_col(row, "token_delta")?,
        cash_delta_usd: decimal_col(row, "cash_delta_usd")?,
        role,
        source: FillSource::from(row.try_get::<String, _>("source")?),
    })
}
