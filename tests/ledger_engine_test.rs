use polyledger::engine::{
    aggregate_position, compute_unit, lot_rows, EngineError, EnginePolicy, LedgerError,
    ResolutionStatus,
};
use polyledger::{Decimal, Fill, FillSource, MarketId, OutcomeIndex, PositionKey, Resolution, Role, TimeMs, Wallet};

fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

fn key() -> PositionKey {
    PositionKey::new(Wallet::new("0xabc"), MarketId::new("0xm1"), OutcomeIndex::new(0))
}

fn fill(tx: &str, time_ms: i64, qty: &str, cash: &str, role: Role, source: &str) -> Fill {
    Fill::new(
        tx,
        0,
        Wallet::new("0xabc"),
        MarketId::new("0xm1"),
        OutcomeIndex::new(0),
        TimeMs::new(time_ms),
        d(qty),
        d(cash),
        role,
        FillSource::from(source),
    )
}

fn trade(tx: &str, time_ms: i64, qty: &str, cash: &str) -> Fill {
    fill(tx, time_ms, qty, cash, Role::Taker, "order-matched")
}

fn resolution(payout: &str, at_ms: i64) -> Resolution {
    Resolution::new(
        MarketId::new("0xm1"),
        OutcomeIndex::new(0),
        d(payout),
        TimeMs::new(at_ms),
    )
}

fn scenario_one_fills() -> Vec<Fill> {
    vec![
        trade("0x01", 1000, "300", "-150"),
        trade("0x02", 2000, "700", "-420"),
        trade("0x03", 3000, "-500", "325"),
    ]
}

#[test]
fn test_partial_fifo_exit_realizes_against_oldest_lots() {
    let unit = compute_unit(&key(), &scenario_one_fills(), None, &EnginePolicy::default()).unwrap();
    let lots = lot_rows(&unit);

    assert_eq!(lots.len(), 2);
    assert_eq!(lots[0].remaining_quantity, Decimal::zero());
    assert_eq!(lots[0].realized_pnl, d("45"));
    assert!(lots[0].is_closed);
    assert_eq!(lots[1].remaining_quantity, d("500"));
    assert_eq!(lots[1].realized_pnl, d("10"));
    assert!(!lots[1].is_closed);

    let position = aggregate_position(&unit);
    assert_eq!(position.status, ResolutionStatus::Unresolved);
    assert_eq!(position.total_realized_pnl, d("55"));
    assert_eq!(position.open_quantity, d("500"));
    assert_eq!(position.open_cost_basis, d("300"));
    // Marked at the last trade price of 0.65.
    assert_eq!(position.unrealized_pnl, Some(d("25")));
}

#[test]
fn test_resolution_settles_remaining_lot() {
    let unit = compute_unit(
        &key(),
        &scenario_one_fills(),
        Some(&resolution("1", 4000)),
        &EnginePolicy::default(),
    )
    .unwrap();
    let position = aggregate_position(&unit);

    assert_eq!(position.status, ResolutionStatus::ResolvedWon);
    assert_eq!(position.realized_early_pnl, d("55"));
    assert_eq!(position.realized_settlement_pnl, d("200"));
    assert_eq!(position.total_realized_pnl, d("255"));
    assert_eq!(position.quantity_sold_early, d("500"));
    assert_eq!(position.quantity_held_to_resolution, d("500"));
    assert_eq!(position.open_quantity, Decimal::zero());
    assert!(position.is_closed);
}

#[test]
fn test_short_lot_settles_with_correct_sign() {
    let fills = vec![trade("0x01", 1000, "-100", "60")];

    let lost = compute_unit(&key(), &fills, Some(&resolution("0", 2000)), &EnginePolicy::default())
        .unwrap();
    let position = aggregate_position(&lost);
    assert!(position.is_short);
    assert_eq!(position.total_realized_pnl, d("60"));
    assert!(position.is_win());

    let won = compute_unit(&key(), &fills, Some(&resolution("1", 2000)), &EnginePolicy::default())
        .unwrap();
    assert_eq!(aggregate_position(&won).total_realized_pnl, d("-40"));
}

#[test]
fn test_self_fill_keeps_one_side() {
    let fills = vec![
        Fill::new(
            "0x01",
            0,
            Wallet::new("0xabc"),
            MarketId::new("0xm1"),
            OutcomeIndex::new(0),
            TimeMs::new(1000),
            d("-50"),
            d("25"),
            Role::Maker,
            FillSource::OrderMatched,
        ),
        Fill::new(
            "0x01",
            1,
            Wallet::new("0xabc"),
            MarketId::new("0xm1"),
            OutcomeIndex::new(0),
            TimeMs::new(1000),
            d("50"),
            d("-25"),
            Role::Taker,
            FillSource::OrderMatched,
        ),
    ];
    let unit = compute_unit(&key(), &fills, None, &EnginePolicy::default()).unwrap();

    assert_eq!(unit.report.collapsed_maker.len(), 1);
    assert_eq!(unit.net_quantity, d("50"));
    assert_eq!(unit.lots.len(), 1);
}

#[test]
fn test_excluded_source_produces_no_phantom_gain() {
    let fills = vec![
        fill("0x01", 1000, "1000", "0", Role::Taker, "liquidity-adapter"),
        trade("0x02", 2000, "-1000", "500"),
    ];
    let unit = compute_unit(&key(), &fills, None, &EnginePolicy::default()).unwrap();
    let position = aggregate_position(&unit);

    assert_eq!(unit.report.excluded.len(), 1);
    assert_eq!(position.total_realized_pnl, Decimal::zero());
    assert!(unit.lots.iter().all(|lot| lot.fill_key != fills[0].fill_key));
}

#[test]
fn test_conservation_of_quantity() {
    let fills = vec![
        trade("0x01", 1000, "50", "-20"),
        trade("0x02", 2000, "-70", "35"),
        trade("0x03", 3000, "30", "-12"),
        trade("0x04", 4000, "-5", "3"),
        trade("0x05", 5000, "100", "-90"),
    ];
    for res in [None, Some(resolution("1", 4500))] {
        let unit = compute_unit(&key(), &fills, res.as_ref(), &EnginePolicy::default()).unwrap();
        let remaining: Decimal = unit.lots.iter().map(|lot| lot.remaining_quantity).sum();
        assert_eq!(remaining, unit.net_quantity);
        assert_eq!(unit.net_quantity, d("105"));
    }
}

#[test]
fn test_closed_before_resolution_is_scored() {
    let fills = vec![trade("0x01", 1000, "10", "-4"), trade("0x02", 2000, "-10", "7")];
    let unit = compute_unit(&key(), &fills, None, &EnginePolicy::default()).unwrap();
    let position = aggregate_position(&unit);

    assert_eq!(position.status, ResolutionStatus::Unresolved);
    assert!(position.is_closed);
    assert!(position.is_scored());
    assert_eq!(position.total_realized_pnl, d("3"));
    assert_eq!(position.roi, Some(d("0.75")));
}

#[test]
fn test_redemption_after_resolution_is_not_double_counted() {
    let fills = vec![
        trade("0x01", 1000, "100", "-40"),
        fill("0x02", 3000, "-100", "100", Role::Taker, "redemption"),
    ];
    let unit = compute_unit(&key(), &fills, Some(&resolution("1", 2000)), &EnginePolicy::default())
        .unwrap();
    let position = aggregate_position(&unit);

    assert_eq!(position.total_realized_pnl, d("60"));
    assert_eq!(position.quantity_held_to_resolution, d("100"));
    assert_eq!(position.quantity_sold_early, Decimal::zero());
}

#[test]
fn test_recompute_is_deterministic() {
    let mut shuffled = scenario_one_fills();
    shuffled.reverse();
    let a = compute_unit(&key(), &scenario_one_fills(), None, &EnginePolicy::default()).unwrap();
    let b = compute_unit(&key(), &shuffled, None, &EnginePolicy::default()).unwrap();
    assert_eq!(lot_rows(&a), lot_rows(&b));
    assert_eq!(aggregate_position(&a), aggregate_position(&b));
}

#[test]
fn test_large_positions_compute_without_panicking() {
    let fills = vec![
        trade("0x01", 1000, "1000000000000000", "-500000000000000"),
        trade("0x02", 2000, "-500000000000000", "300000000000000"),
    ];
    let unit = compute_unit(&key(), &fills, None, &EnginePolicy::default()).unwrap();
    let position = aggregate_position(&unit);

    assert_eq!(position.total_realized_pnl, d("50000000000000"));
    assert_eq!(position.open_quantity, d("500000000000000"));
    assert_eq!(position.open_cost_basis, d("250000000000000"));
    // Marked at 0.6 per share.
    assert_eq!(position.unrealized_pnl, Some(d("50000000000000")));
}

#[test]
fn test_out_of_range_quantity_fails_the_unit() {
    let fills = vec![
        trade("0x01", 1000, "50000000000000000000000000000", "-1"),
        trade("0x02", 2000, "50000000000000000000000000000", "-1"),
    ];
    let err = compute_unit(&key(), &fills, None, &EnginePolicy::default()).unwrap_err();
    assert!(matches!(err, EngineError::Ledger(LedgerError::Overflow { .. })));
}
