//! FIFO lot queue with signed lots, settlement, and quantity conservation.

use crate::domain::{Decimal, FillSource, TimeMs};

use super::{LedgerError, NormalizedEvent, Realization, RealizationKind};

/// One acquisition (or short entry) tracked by the FIFO queue.
///
/// Quantities are signed: a long lot has positive `original_quantity`, a short
/// lot negative. `remaining_quantity` always keeps the sign of the original and
/// shrinks toward zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lot {
    /// 1-based position in the queue.
    pub seq: u32,
    pub fill_key: String,
    pub tx_id: String,
    pub acquired_at: TimeMs,
    pub original_quantity: Decimal,
    /// Cash paid per unit (long) or received per unit (short).
    pub unit_cost: Decimal,
    pub remaining_quantity: Decimal,
    /// Signed cash of the opening event: negative when paid, positive when received.
    pub entry_cash: Decimal,
    /// Signed cash attributed to this lot by closing events and settlement.
    pub exit_cash: Decimal,
    pub realized_pnl: Decimal,
    pub quantity_closed_early: Decimal,
    pub quantity_held_to_resolution: Decimal,
    /// Payout per share once the lot was settled by a resolution.
    pub settlement: Option<Decimal>,
    pub closed_at: Option<TimeMs>,
    entry_cash_released: Decimal,
}

impl Lot {
    fn open(seq: u32, event: &NormalizedEvent, quantity: Decimal, entry_cash: Decimal) -> Self {
        let unit_cost = entry_cash
            .abs()
            .checked_div(quantity.abs())
            .unwrap_or_default();
        Self {
            seq,
            fill_key: event.fill_key.clone(),
            tx_id: event.tx_id.clone(),
            acquired_at: event.time,
            original_quantity: quantity,
            unit_cost,
            remaining_quantity: quantity,
            entry_cash,
            exit_cash: Decimal::zero(),
            realized_pnl: Decimal::zero(),
            quantity_closed_early: Decimal::zero(),
            quantity_held_to_resolution: Decimal::zero(),
            settlement: None,
            closed_at: None,
            entry_cash_released: Decimal::zero(),
        }
    }

    pub fn is_short(&self) -> bool {
        self.original_quantity.is_negative()
    }

    /// +1 for long lots, -1 for short lots.
    pub fn direction(&self) -> Decimal {
        if self.is_short() {
            -Decimal::one()
        } else {
            Decimal::one()
        }
    }

    pub fn is_settled(&self) -> bool {
        self.settlement.is_some()
    }

    /// No exposure left: either fully disposed or finalized by a resolution.
    pub fn is_closed(&self) -> bool {
        self.remaining_quantity.is_zero() || self.is_settled()
    }

    /// Absolute cash put at risk when the lot was opened.
    pub fn cost_basis(&self) -> Decimal {
        self.entry_cash.abs()
    }

    /// Absolute quantity already closed by disposals or settlement.
    pub fn consumed_quantity(&self) -> Decimal {
        self.quantity_closed_early + self.quantity_held_to_resolution
    }

    /// Cost basis of the consumed quantity.
    pub fn consumed_cost_basis(&self) -> Decimal {
        self.entry_cash_released.abs()
    }

    /// Signed entry cash still carried by unsettled remaining quantity.
    pub fn open_entry_cash(&self) -> Decimal {
        if self.is_settled() {
            Decimal::zero()
        } else {
            self.entry_cash - self.entry_cash_released
        }
    }

    pub fn open_cost_basis(&self) -> Decimal {
        self.open_entry_cash().abs()
    }

    /// Share of entry cash released when `take` units leave the lot.
    fn release_entry_cash(
        &mut self,
        take: Decimal,
        closes_lot: bool,
        fill_key: &str,
    ) -> Result<Decimal, LedgerError> {
        let share = if closes_lot {
            self.entry_cash - self.entry_cash_released
        } else {
            self.entry_cash
                .checked_pro_rata(take, self.original_quantity.abs())
                .ok_or_else(|| overflow(fill_key))?
        };
        self.entry_cash_released += share;
        Ok(share)
    }

    /// Signed value of `quantity` units of this lot at `price` per share.
    fn value_at(
        &self,
        quantity: Decimal,
        price: Decimal,
        fill_key: &str,
    ) -> Result<Decimal, LedgerError> {
        quantity
            .checked_mul(price)
            .map(|value| self.direction() * value)
            .ok_or_else(|| overflow(fill_key))
    }
}

/// FIFO lot queue for one (wallet, market, outcome).
#[derive(Debug, Clone, Default)]
pub struct LotLedger {
    lots: Vec<Lot>,
    realizations: Vec<Realization>,
    /// Index of the oldest lot that may still hold quantity.
    head: usize,
    net_quantity: Decimal,
    last_event_time: Option<TimeMs>,
}

impl LotLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one normalized event and return the realizations it produced.
    ///
    /// Disposals consume the oldest opposite-sign lots first. Quantity left
    /// over once the queue is exhausted opens a new lot in the event's
    /// direction, which is how a wallet enters (or flips into) a short.
    ///
    /// # Errors
    /// Rejects zero-quantity and out-of-order events, amounts whose products
    /// leave the decimal range, and reports a broken quantity conservation check.
    pub fn apply(&mut self, event: &NormalizedEvent) -> Result<Vec<Realization>, LedgerError> {
        if event.quantity_delta.is_zero() {
            return Err(LedgerError::ZeroQuantity {
                fill_key: event.fill_key.clone(),
            });
        }
        if let Some(last) = self.last_event_time {
            if event.time < last {
                return Err(LedgerError::OutOfOrder {
                    fill_key: event.fill_key.clone(),
                    time_ms: event.time.as_i64(),
                    last_ms: last.as_i64(),
                });
            }
        }

        let total = event.quantity_delta.abs();
        let incoming_short = event.quantity_delta.is_negative();
        let mut outstanding = total;
        let mut cash_left = event.cash_delta;
        let mut produced = Vec::new();

        while outstanding.is_positive() {
            self.advance_head();
            let Some(lot) = self.lots.get_mut(self.head) else {
                break;
            };
            if lot.is_short() == incoming_short {
                break;
            }

            let take = outstanding.min(lot.remaining_quantity.abs());
            let slice_cash = if take == outstanding {
                cash_left
            } else {
                event
                    .cash_delta
                    .checked_pro_rata(take, total)
                    .ok_or_else(|| overflow(&event.fill_key))?
            };
            cash_left -= slice_cash;
            outstanding -= take;

            let direction = lot.direction();
            lot.remaining_quantity -= direction * take;
            let closes_lot = lot.remaining_quantity.is_zero();

            let (kind, realized) = match lot.settlement {
                Some(payout) => {
                    // Settled lots already booked their payout; only the deviation is new.
                    let deviation = slice_cash - lot.value_at(take, payout, &event.fill_key)?;
                    lot.exit_cash += deviation;
                    (RealizationKind::PostSettlement, deviation)
                }
                None => {
                    let entry_share = lot.release_entry_cash(take, closes_lot, &event.fill_key)?;
                    lot.exit_cash += slice_cash;
                    let kind = if event.source == FillSource::Redemption {
                        lot.quantity_held_to_resolution += take;
                        RealizationKind::Redemption
                    } else {
                        lot.quantity_closed_early += take;
                        RealizationKind::EarlyExit
                    };
                    (kind, slice_cash + entry_share)
                }
            };
            lot.realized_pnl += realized;
            if closes_lot && lot.closed_at.is_none() {
                lot.closed_at = Some(event.time);
            }

            produced.push(Realization {
                lot_seq: lot.seq,
                fill_key: Some(event.fill_key.clone()),
                time: event.time,
                kind,
                quantity: take,
                cash: slice_cash,
                realized_pnl: realized,
            });
        }

        if outstanding.is_positive() {
            let direction = if incoming_short {
                -Decimal::one()
            } else {
                Decimal::one()
            };
            let seq = self.next_seq();
            self.lots
                .push(Lot::open(seq, event, direction * outstanding, cash_left));
        }

        self.net_quantity = self
            .net_quantity
            .checked_add(event.quantity_delta)
            .ok_or_else(|| overflow(&event.fill_key))?;
        self.last_event_time = Some(event.time);
        self.check_conservation()?;

        self.realizations.extend(produced.iter().cloned());
        Ok(produced)
    }

    /// Finalize every unsettled lot that still holds quantity at `payout` per share.
    ///
    /// Remaining quantity is left in place so conservation keeps holding; the
    /// lot is marked settled and later trades against it realize only the
    /// deviation from the payout.
    ///
    /// # Errors
    /// Returns [`LedgerError::Overflow`] when a lot's settlement value leaves
    /// the decimal range; no lot is modified in that case.
    pub(crate) fn settle_open_lots(
        &mut self,
        payout: Decimal,
        at: TimeMs,
    ) -> Result<Vec<Realization>, LedgerError> {
        for lot in self.lots.iter().skip(self.head) {
            if !lot.remaining_quantity.is_zero() && !lot.is_settled() {
                lot.value_at(lot.remaining_quantity.abs(), payout, &lot.fill_key)?;
            }
        }

        let mut produced = Vec::new();
        for lot in self.lots.iter_mut().skip(self.head) {
            if lot.remaining_quantity.is_zero() || lot.is_settled() {
                continue;
            }
            let quantity = lot.remaining_quantity.abs();
            let fill_key = lot.fill_key.clone();
            let value = lot.value_at(quantity, payout, &fill_key)?;
            let entry_share = lot.release_entry_cash(quantity, true, &fill_key)?;
            let realized = value + entry_share;

            lot.exit_cash += value;
            lot.realized_pnl += realized;
            lot.quantity_held_to_resolution += quantity;
            lot.settlement = Some(payout);
            lot.closed_at = Some(at);

            produced.push(Realization {
                lot_seq: lot.seq,
                fill_key: None,
                time: at,
                kind: RealizationKind::Settlement,
                quantity,
                cash: value,
                realized_pnl: realized,
            });
        }
        self.realizations.extend(produced.iter().cloned());
        Ok(produced)
    }

    pub fn lots(&self) -> &[Lot] {
        &self.lots
    }

    pub fn realizations(&self) -> &[Realization] {
        &self.realizations
    }

    /// Signed sum of every applied quantity delta.
    pub fn net_quantity(&self) -> Decimal {
        self.net_quantity
    }

    /// Signed sum of remaining quantity across all lots.
    pub fn open_quantity(&self) -> Decimal {
        self.lots.iter().map(|lot| lot.remaining_quantity).sum()
    }

    /// Remaining quantity not yet finalized by a resolution.
    pub fn unsettled_quantity(&self) -> Decimal {
        self.lots
            .iter()
            .filter(|lot| !lot.is_settled())
            .map(|lot| lot.remaining_quantity)
            .sum()
    }

    pub fn last_event_time(&self) -> Option<TimeMs> {
        self.last_event_time
    }

    pub fn into_parts(self) -> (Vec<Lot>, Vec<Realization>) {
        (self.lots, self.realizations)
    }

    fn advance_head(&mut self) {
        while self
            .lots
            .get(self.head)
            .is_some_and(|lot| lot.remaining_quantity.is_zero())
        {
            self.head += 1;
        }
    }

    fn next_seq(&self) -> u32 {
        u32::try_from(self.lots.len()).unwrap_or(u32::MAX).saturating_add(1)
    }

    fn check_conservation(&self) -> Result<(), LedgerError> {
        let open = self
            .lots
            .iter()
            .try_fold(Decimal::zero(), |acc, lot| acc.checked_add(lot.remaining_quantity))
            .ok_or_else(|| overflow("open quantity"))?;
        if open != self.net_quantity {
            return Err(LedgerError::ConservationViolated {
                open: open.to_canonical_string(),
                net: self.net_quantity.to_canonical_string(),
            });
        }
        Ok(())
    }
}

fn overflow(context: &str) -> LedgerError {
    LedgerError::Overflow {
        context: context.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn event(key: &str, time: i64, qty: &str, cash: &str) -> NormalizedEvent {
        event_from(key, time, qty, cash, FillSource::OrderMatched)
    }

    fn event_from(key: &str, time: i64, qty: &str, cash: &str, source: FillSource) -> NormalizedEvent {
        NormalizedEvent {
            fill_key: key.to_string(),
            tx_id: format!("0x{key}"),
            log_index: 0,
            time: TimeMs::new(time),
            quantity_delta: d(qty),
            cash_delta: d(cash),
            source,
        }
    }

    #[test]
    fn test_buy_opens_lot_with_unit_cost() {
        let mut ledger = LotLedger::new();
        let produced = ledger.apply(&event("a", 1, "100", "-40")).unwrap();
        assert!(produced.is_empty());

        let lot = &ledger.lots()[0];
        assert_eq!(lot.seq, 1);
        assert_eq!(lot.unit_cost, d("0.4"));
        assert_eq!(lot.remaining_quantity, d("100"));
        assert!(!lot.is_short());
    }

    #[test]
    fn test_partial_exit_is_fifo() {
        let mut ledger = LotLedger::new();
        ledger.apply(&event("a", 1, "100", "-30")).unwrap();
        ledger.apply(&event("b", 2, "100", "-50")).unwrap();
        let produced = ledger.apply(&event("c", 3, "-150", "90")).unwrap();

        assert_eq!(produced.len(), 2);
        assert_eq!(produced[0].lot_seq, 1);
        assert_eq!(produced[0].quantity, d("100"));
        assert_eq!(produced[0].cash, d("60"));
        assert_eq!(produced[0].realized_pnl, d("30"));
        assert_eq!(produced[1].lot_seq, 2);
        assert_eq!(produced[1].quantity, d("50"));
        assert_eq!(produced[1].realized_pnl, d("5"));

        let lots = ledger.lots();
        assert_eq!(lots[0].remaining_quantity, Decimal::zero());
        assert_eq!(lots[0].closed_at, Some(TimeMs::new(3)));
        assert_eq!(lots[1].remaining_quantity, d("50"));
        assert_eq!(ledger.net_quantity(), d("50"));
    }

    #[test]
    fn test_oversell_opens_short_lot() {
        let mut ledger = LotLedger::new();
        ledger.apply(&event("a", 1, "10", "-5")).unwrap();
        ledger.apply(&event("b", 2, "-25", "15")).unwrap();

        let lots = ledger.lots();
        assert_eq!(lots.len(), 2);
        assert_eq!(lots[0].realized_pnl, d("1"));
        let short = &lots[1];
        assert!(short.is_short());
        assert_eq!(short.remaining_quantity, d("-15"));
        assert_eq!(short.unit_cost, d("0.6"));
        assert_eq!(short.entry_cash, d("9"));
        assert_eq!(ledger.open_quantity(), d("-15"));
    }

    #[test]
    fn test_cover_closes_short_lot() {
        let mut ledger = LotLedger::new();
        ledger.apply(&event("a", 1, "-10", "7")).unwrap();
        let produced = ledger.apply(&event("b", 2, "10", "-2")).unwrap();

        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].realized_pnl, d("5"));
        assert!(ledger.lots()[0].is_closed());
        assert_eq!(ledger.lots().len(), 1);
    }

    #[test]
    fn test_slices_sum_to_event_cash() {
        let mut ledger = LotLedger::new();
        ledger.apply(&event("a", 1, "1", "-0.3")).unwrap();
        ledger.apply(&event("b", 2, "1", "-0.3")).unwrap();
        ledger.apply(&event("c", 3, "1", "-0.3")).unwrap();
        let produced = ledger.apply(&event("d", 4, "-3", "1")).unwrap();

        let total: Decimal = produced.iter().map(|r| r.cash).sum();
        assert_eq!(total, d("1"));
        let pnl: Decimal = produced.iter().map(|r| r.realized_pnl).sum();
        assert_eq!(pnl, d("0.1"));
    }

    #[test]
    fn test_out_of_order_event_rejected() {
        let mut ledger = LotLedger::new();
        ledger.apply(&event("a", 10, "1", "-1")).unwrap();
        let err = ledger.apply(&event("b", 5, "1", "-1")).unwrap_err();
        assert!(matches!(err, LedgerError::OutOfOrder { .. }));
    }

    #[test]
    fn test_partial_exit_of_huge_lot_stays_in_range() {
        let mut ledger = LotLedger::new();
        ledger
            .apply(&event("a", 1, "1000000000000000", "-500000000000000"))
            .unwrap();
        let produced = ledger
            .apply(&event("b", 2, "-500000000000000", "300000000000000"))
            .unwrap();

        assert_eq!(produced[0].realized_pnl, d("50000000000000"));
        assert_eq!(ledger.lots()[0].open_entry_cash(), d("-250000000000000"));
        assert_eq!(ledger.net_quantity(), d("500000000000000"));
    }

    #[test]
    fn test_net_quantity_out_of_range_is_an_error() {
        let mut ledger = LotLedger::new();
        ledger
            .apply(&event("a", 1, "50000000000000000000000000000", "-1"))
            .unwrap();
        let err = ledger
            .apply(&event("b", 2, "50000000000000000000000000000", "-1"))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Overflow { .. }));
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let mut ledger = LotLedger::new();
        let err = ledger.apply(&event("a", 1, "0", "-1")).unwrap_err();
        assert!(matches!(err, LedgerError::ZeroQuantity { .. }));
    }

    #[test]
    fn test_conservation_holds_after_every_event() {
        let mut ledger = LotLedger::new();
        let stream = [
            ("a", "50", "-20"),
            ("b", "-70", "35"),
            ("c", "30", "-12"),
            ("d", "-5", "3"),
            ("e", "100", "-90"),
        ];
        for (i, (key, qty, cash)) in stream.iter().enumerate() {
            ledger.apply(&event(key, i as i64, qty, cash)).unwrap();
            assert_eq!(ledger.open_quantity(), ledger.net_quantity());
            for lot in ledger.lots() {
                assert!(lot.remaining_quantity.abs() <= lot.original_quantity.abs());
                assert!(
                    lot.remaining_quantity.is_zero()
                        || lot.remaining_quantity.is_negative() == lot.original_quantity.is_negative()
                );
            }
        }
        assert_eq!(ledger.net_quantity(), d("105"));
    }

    #[test]
    fn test_settle_open_lots_long_and_post_settlement_redeem() {
        let mut ledger = LotLedger::new();
        ledger.apply(&event("a", 1, "100", "-40")).unwrap();
        let settled = ledger.settle_open_lots(Decimal::one(), TimeMs::new(5)).unwrap();
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].realized_pnl, d("60"));
        assert_eq!(settled[0].kind, RealizationKind::Settlement);
        assert!(ledger.lots()[0].is_closed());
        assert_eq!(ledger.lots()[0].remaining_quantity, d("100"));

        // Redeeming at the payout adds nothing further.
        let produced = ledger
            .apply(&event_from("r", 6, "-100", "100", FillSource::Redemption))
            .unwrap();
        assert_eq!(produced[0].kind, RealizationKind::PostSettlement);
        assert_eq!(produced[0].realized_pnl, Decimal::zero());
        assert_eq!(ledger.lots()[0].realized_pnl, d("60"));
        assert_eq!(ledger.lots()[0].quantity_held_to_resolution, d("100"));
    }

    #[test]
    fn test_redemption_before_settlement_counts_as_held() {
        let mut ledger = LotLedger::new();
        ledger.apply(&event("a", 1, "10", "-4")).unwrap();
        let produced = ledger
            .apply(&event_from("r", 2, "-10", "10", FillSource::Redemption))
            .unwrap();
        assert_eq!(produced[0].kind, RealizationKind::Redemption);
        let lot = &ledger.lots()[0];
        assert_eq!(lot.quantity_held_to_resolution, d("10"));
        assert_eq!(lot.quantity_closed_early, Decimal::zero());
        assert_eq!(lot.realized_pnl, d("6"));
    }

    #[test]
    fn test_settle_is_idempotent() {
        let mut ledger = LotLedger::new();
        ledger.apply(&event("a", 1, "-20", "6")).unwrap();
        let first = ledger.settle_open_lots(Decimal::zero(), TimeMs::new(3)).unwrap();
        let second = ledger.settle_open_lots(Decimal::zero(), TimeMs::new(3)).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].realized_pnl, d("6"));
        assert!(second.is_empty());
        assert_eq!(ledger.realizations().len(), 1);
    }
}
