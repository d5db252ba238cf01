//! Ledger lot and position output for the repository.

use crate::domain::{MarketId, PositionKey, TimeMs, Wallet};
use crate::engine::{LotRow, Position, ResolutionStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use std::collections::BTreeSet;
use std::str::FromStr;

use super::{decimal_col, key_cols, opt_decimal_col, opt_time_col, Repository};

impl Repository {
    /// Atomically replace the stored output of one unit.
    ///
    /// Readers either see the previous lots and position or the new ones, never a mix.
    ///
    /// # Errors
    /// Returns an error if the transaction fails; the previous output is kept.
    pub async fn replace_unit_output(
        &self,
        key: &PositionKey,
        lots: &[LotRow],
        position: &Position,
        run_id: &str,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        delete_unit_rows(&mut tx, key).await?;

        for lot in lots {
            sqlx::query(
                r#"
                INSERT INTO ledger_lots (
                    wallet, market_id, outcome_index, lot_seq, fill_key, tx_id,
                    entry_time_ms, resolved_at_ms, quantity, cost, unit_cost,
                    quantity_sold_early, quantity_held_to_resolution, remaining_quantity,
                    exit_value, realized_pnl, roi, is_closed, is_short
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(lot.wallet.as_str())
            .bind(lot.market_id.as_str())
            .bind(lot.outcome_index as i64)
            .bind(lot.lot_seq as i64)
            .bind(lot.fill_key.as_str())
            .bind(lot.tx_id.as_str())
            .bind(lot.entry_time.as_i64())
            .bind(lot.resolved_at.map(|t| t.as_i64()))
            .bind(lot.quantity.to_canonical_string())
            .bind(lot.cost.to_canonical_string())
            .bind(lot.unit_cost.to_canonical_string())
            .bind(lot.quantity_sold_early.to_canonical_string())
            .bind(lot.quantity_held_to_resolution.to_canonical_string())
            .bind(lot.remaining_quantity.to_canonical_string())
            .bind(lot.exit_value.to_canonical_string())
            .bind(lot.realized_pnl.to_canonical_string())
            .bind(lot.roi.map(|d| d.to_canonical_string()))
            .bind(lot.is_closed)
            .bind(lot.is_short)
            .execute(&mut *tx)
            .await?;
        }

        let active_days = position
            .active_days
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",");

        sqlx::query(
            r#"
            INSERT INTO positions (
                wallet, market_id, outcome_index, status, net_quantity, open_quantity,
                open_cost_basis, consumed_cost_basis, total_cost_basis, realized_early_pnl,
                realized_settlement_pnl, total_realized_pnl, unrealized_pnl, roi,
                payout_per_share, settlement_value, resolved_at_ms, entry_time_ms,
                last_activity_ms, quantity_sold_early, quantity_held_to_resolution,
                is_closed, is_short, lot_count, mark_price, active_days, run_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(key.wallet.as_str())
        .bind(key.market_id.as_str())
        .bind(key.outcome_index.as_u8() as i64)
        .bind(position.status.as_str())
        .bind(position.net_quantity.to_canonical_string())
        .bind(position.open_quantity.to_canonical_string())
        .bind(position.open_cost_basis.to_canonical_string())
        .bind(position.consumed_cost_basis.to_canonical_string())
        .bind(position.total_cost_basis.to_canonical_string())
        .bind(position.realized_early_pnl.to_canonical_string())
        .bind(position.realized_settlement_pnl.to_canonical_string())
        .bind(position.total_realized_pnl.to_canonical_string())
        .bind(position.unrealized_pnl.map(|d| d.to_canonical_string()))
        .bind(position.roi.map(|d| d.to_canonical_string()))
        .bind(position.payout_per_share.map(|d| d.to_canonical_string()))
        .bind(position.settlement_value.map(|d| d.to_canonical_string()))
        .bind(position.resolved_at.map(|t| t.as_i64()))
        .bind(position.entry_time.map(|t| t.as_i64()))
        .bind(position.last_activity.map(|t| t.as_i64()))
        .bind(position.quantity_sold_early.to_canonical_string())
        .bind(position.quantity_held_to_resolution.to_canonical_string())
        .bind(position.is_closed)
        .bind(position.is_short)
        .bind(position.lot_count as i64)
        .bind(position.mark_price.map(|d| d.to_canonical_string()))
        .bind(active_days)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Remove all stored output of one unit.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn delete_unit_output(&self, key: &PositionKey) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        delete_unit_rows(&mut tx, key).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Stored lots for a wallet, optionally narrowed to one market.
    ///
    /// # Errors
    /// Returns an error if the query fails or any row is malformed.
    pub async fn query_lot_rows(
        &self,
        wallet: &Wallet,
        market_id: Option<&MarketId>,
    ) -> Result<Vec<LotRow>, sqlx::Error> {
        let rows = match market_id {
            Some(market_id) => {
                sqlx::query(
                    r#"
                    SELECT * FROM ledger_lots
                    WHERE wallet = ? AND market_id = ?
                    ORDER BY market_id ASC, outcome_index ASC, lot_seq ASC
                    "#,
                )
                .bind(wallet.as_str())
                .bind(market_id.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM ledger_lots
                    WHERE wallet = ?
                    ORDER BY market_id ASC, outcome_index ASC, lot_seq ASC
                    "#,
                )
                .bind(wallet.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(lot_from_row).collect()
    }

    /// Stored positions of the given raw wallets, in key order.
    ///
    /// # Errors
    /// Returns an error if the query fails or any row is malformed.
    pub async fn query_positions_for_wallets(
        &self,
        wallets: &[Wallet],
    ) -> Result<Vec<Position>, sqlx::Error> {
        let mut positions = Vec::new();
        for wallet in wallets {
            let rows = sqlx::query(
                r#"
                SELECT * FROM positions
                WHERE wallet = ?
                ORDER BY market_id ASC, outcome_index ASC
                "#,
            )
            .bind(wallet.as_str())
            .fetch_all(&self.pool)
            .await?;

            for row in &rows {
                positions.push(position_from_row(row)?);
            }
        }
        positions.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(positions)
    }

    /// Every stored position, in key order.
    ///
    /// # Errors
    /// Returns an error if the query fails or any row is malformed.
    pub async fn query_all_positions(&self) -> Result<Vec<Position>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM positions
            ORDER BY wallet ASC, market_id ASC, outcome_index ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(position_from_row).collect()
    }
}

async fn delete_unit_rows(
    tx: &mut Transaction<'_, Sqlite>,
    key: &PositionKey,
) -> Result<(), sqlx::Error> {
    for table in ["ledger_lots", "positions"] {
        sqlx::query(&format!(
            "DELETE FROM {table} WHERE wallet = ? AND market_id = ? AND outcome_index = ?"
        ))
        .bind(key.wallet.as_str())
        .bind(key.market_id.as_str())
        .bind(key.outcome_index.as_u8() as i64)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn lot_from_row(row: &SqliteRow) -> Result<LotRow, sqlx::Error> {
    let key = key_cols(row)?;
    let lot_seq: i64 = row.try_get("lot_seq")?;
    Ok(LotRow {
        wallet: key.wallet,
        market_id: key.market_id,
        outcome_index: key.outcome_index.as_u8(),
        lot_seq: u32::try_from(lot_seq).map_err(|e| sqlx::Error::ColumnDecode {
            index: "lot_seq".to_string(),
            source: Box::new(e),
        })?,
        fill_key: row.try_get("fill_key")?,
        tx_id: row.try_get("tx_id")?,
        entry_time: TimeMs::new(row.try_get("entry_time_ms")?),
        resolved_at: opt_time_col(row, "resolved_at_ms")?,
        quantity: decimal_col(row, "quantity")?,
        cost: decimal_col(row, "cost")?,
        unit_cost: decimal_col(row, "unit_cost")?,
        quantity_sold_early: decimal_col(row, "quantity_sold_early")?,
        quantity_held_to_resolution: decimal_col(row, "quantity_held_to_resolution")?,
        remaining_quantity: decimal_col(row, "remaining_quantity")?,
        exit_value: decimal_col(row, "exit_value")?,
        realized_pnl: decimal_col(row, "realized_pnl")?,
        roi: opt_decimal_col(row, "roi")?,
        is_closed: row.try_get("is_closed")?,
        is_short: row.try_get("is_short")?,
    })
}

fn position_from_row(row: &SqliteRow) -> Result<Position, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let status = ResolutionStatus::from_str(&status_str).map_err(|e| sqlx::Error::ColumnDecode {
        index: "status".to_string(),
        source: e.into(),
    })?;

    let active_days_str: String = row.try_get("active_days")?;
    let active_days = active_days_str
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i64>())
        .collect::<Result<BTreeSet<_>, _>>()
        .map_err(|e| sqlx::Error::ColumnDecode {
            index: "active_days".to_string(),
            source: Box::new(e),
        })?;

    let lot_count: i64 = row.try_get("lot_count")?;

    Ok(Position {
        key: key_cols(row)?,
        status,
        net_quantity: decimal_col(row, "net_quantity")?,
        open_quantity: decimal_col(row, "open_quantity")?,
        open_cost_basis: decimal_col(row, "open_cost_basis")?,
        consumed_cost_basis: decimal_col(row, "consumed_cost_basis")?,
        total_cost_basis: decimal_col(row, "total_cost_basis")?,
        realized_early_pnl: decimal_col(row, "realized_early_pnl")?,
        realized_settlement_pnl: decimal_col(row, "realized_settlement_pnl")?,
        total_realized_pnl: decimal_col(row, "total_realized_pnl")?,
        unrealized_pnl: opt_decimal_col(row, "unrealized_pnl")?,
        roi: opt_decimal_col(row, "roi")?,
        payout_per_share: opt_decimal_col(row, "payout_per_share")?,
        settlement_value: opt_decimal_col(row, "settlement_value")?,
        resolved_at: opt_time_col(row, "resolved_at_ms")?,
        entry_time: opt_time_col(row, "entry_time_ms")?,
        last_activity: opt_time_col(row, "last_activity_ms")?,
        quantity_sold_early: decimal_col(row, "quantity_sold_early")?,
        quantity_held_to_resolution: decimal_col(row, "quantity_held_to_resolution")?,
        is_closed: row.try_get("is_closed")?,
        is_short: row.try_get("is_short")?,
        lot_count: lot_count.max(0) as usize,
        mark_price: opt_decimal_col(row, "mark_price")?,
        active_days,
    })
}
