use chrono::NaiveDate;
use poskeeper::db::{init_db, Repository};
use poskeeper::domain::{
    CalculationMethod, ChangeReason, Clock, DateBasis, Decimal, KeyFormat, ManualClock,
    PositionCalcRequest, PriceMethod, TimeMs, Trade,
};
use poskeeper::engine::{CalcEngine, CalcOutcome};
use std::sync::Arc;
use tempfile::TempDir;

const KEY: &str = "EQ1#ACME#VOD.L";

struct TestEngine {
    repo: Arc<Repository>,
    clock: Arc<ManualClock>,
    engine: CalcEngine,
    _temp: TempDir,
}

async fn setup_engine() -> TestEngine {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));
    let clock = Arc::new(ManualClock::at(1_000));
    let engine = CalcEngine::new(repo.clone(), clock.clone());
    TestEngine {
        repo,
        clock,
        engine,
        _temp: temp_dir,
    }
}

fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn trade(seq: i64, qty: i64, px: &str, trade_date: &str, settlement_date: &str) -> Trade {
    Trade {
        sequence_num: seq,
        book: "EQ1".to_string(),
        counterparty: "ACME".to_string(),
        instrument: "VOD.L".to_string(),
        signed_quantity: qty,
        price: d(px),
        trade_time: TimeMs::new(seq * 1_000),
        trade_date: date(trade_date),
        settlement_date: date(settlement_date),
        source: "FIX".to_string(),
        source_id: format!("ORD-{}", seq),
    }
}

fn request(
    business_date: &str,
    basis: DateBasis,
    reason: ChangeReason,
    seq: i64,
) -> PositionCalcRequest {
    PositionCalcRequest {
        request_id: format!("req-{}-{}", business_date, seq),
        position_id: 1,
        position_key: KEY.to_string(),
        date_basis: basis,
        business_date: date(business_date),
        price_methods: vec![PriceMethod::Wac],
        triggering_trade_sequence: seq,
        change_reason: reason,
        key_format: KeyFormat::BookCounterpartyInstrument,
    }
}

async fn insert(t: &TestEngine, trades: &[Trade]) {
    t.repo
        .batch_insert_trades(trades, t.clock.now())
        .await
        .expect("insert failed");
}

async fn wac_price(t: &TestEngine, business_date: &str, basis: DateBasis) -> Decimal {
    t.repo
        .find_price(KEY, date(business_date), PriceMethod::Wac, basis)
        .await
        .unwrap()
        .expect("price expected")
        .price
}

#[tokio::test]
async fn test_single_buy_from_flat_builds_both_views() {
    let t = setup_engine().await;
    insert(
        &t,
        &[trade(1, 1000, "150.000000", "2025-01-20", "2025-01-22")],
    )
    .await;

    let outcome = t
        .engine
        .process(&request("2025-01-20", DateBasis::TradeDate, ChangeReason::Initial, 1))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        CalcOutcome::Calculated {
            method: CalculationMethod::FullRecalc,
            version: 1
        }
    );

    let snapshot = t
        .repo
        .find_snapshot(KEY, date("2025-01-20"), DateBasis::TradeDate)
        .await
        .unwrap()
        .expect("snapshot expected");
    assert_eq!(snapshot.net_quantity, 1000);
    assert_eq!(snapshot.gross_long, 1000);
    assert_eq!(snapshot.gross_short, 0);
    assert_eq!(snapshot.trade_count, 1);
    assert_eq!(snapshot.total_notional, d("150000"));
    assert_eq!(snapshot.calculation_method, CalculationMethod::FullRecalc);
    assert_eq!(snapshot.last_sequence_num, 1);
    assert_eq!(wac_price(&t, "2025-01-20", DateBasis::TradeDate).await, d("150"));

    // The settlement view mirrors the metrics under its own date.
    t.engine
        .process(&request("2025-01-22", DateBasis::SettlementDate, ChangeReason::Initial, 1))
        .await
        .unwrap();
    let settled = t
        .repo
        .find_snapshot(KEY, date("2025-01-22"), DateBasis::SettlementDate)
        .await
        .unwrap()
        .expect("settled snapshot expected");
    assert_eq!(settled.net_quantity, 1000);
    assert_eq!(settled.total_notional, d("150000"));
    assert_eq!(wac_price(&t, "2025-01-22", DateBasis::SettlementDate).await, d("150"));

    // Nothing leaked into the trade-date store for the settlement date.
    assert!(t
        .repo
        .find_snapshot(KEY, date("2025-01-22"), DateBasis::TradeDate)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_three_trade_intraday_full_recalc() {
    let t = setup_engine().await;
    insert(
        &t,
        &[
            trade(1, 1000, "150", "2025-01-20", "2025-01-22"),
            trade(2, 500, "160", "2025-01-20", "2025-01-22"),
            trade(3, -400, "155", "2025-01-20", "2025-01-22"),
        ],
    )
    .await;

    t.engine
        .process(&request("2025-01-20", DateBasis::TradeDate, ChangeReason::Initial, 3))
        .await
        .unwrap();

    let snapshot = t
        .repo
        .find_snapshot(KEY, date("2025-01-20"), DateBasis::TradeDate)
        .await
        .unwrap()
        .expect("snapshot expected");
    assert_eq!(snapshot.net_quantity, 1100);
    assert_eq!(snapshot.gross_long, 1500);
    assert_eq!(snapshot.gross_short, 400);
    assert_eq!(snapshot.trade_count, 3);
    assert_eq!(
        wac_price(&t, "2025-01-20", DateBasis::TradeDate).await,
        d("153.333333333333")
    );
}

#[tokio::test]
async fn test_same_day_incremental_equals_full_recalc() {
    // Trades arriving one-by-one extend the snapshot incrementally...
    let incremental = setup_engine().await;
    let trades = [
        trade(1, 1000, "150", "2025-01-20", "2025-01-22"),
        trade(2, 500, "160", "2025-01-20", "2025-01-22"),
        trade(3, -400, "155", "2025-01-20", "2025-01-22"),
    ];
    for t in &trades {
        insert(&incremental, std::slice::from_ref(t)).await;
        incremental
            .engine
            .process(&request(
                "2025-01-20",
                DateBasis::TradeDate,
                ChangeReason::Initial,
                t.sequence_num,
            ))
            .await
            .unwrap();
    }

    // ...and one batch recalculated in one shot.
    let full = setup_engine().await;
    insert(&full, &trades).await;
    full.engine
        .process(&request("2025-01-20", DateBasis::TradeDate, ChangeReason::Initial, 3))
        .await
        .unwrap();

    let a = incremental
        .repo
        .find_snapshot(KEY, date("2025-01-20"), DateBasis::TradeDate)
        .await
        .unwrap()
        .unwrap();
    let b = full
        .repo
        .find_snapshot(KEY, date("2025-01-20"), DateBasis::TradeDate)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(a.calculation_version, 3);
    assert_eq!(a.calculation_method, CalculationMethod::Incremental);
    assert_eq!(b.calculation_version, 1);
    assert_eq!(b.calculation_method, CalculationMethod::FullRecalc);

    // Metric fields and WAC must agree bit-for-bit.
    assert_eq!(a.metrics(), b.metrics());
    let price_a = incremental
        .repo
        .find_price(KEY, date("2025-01-20"), PriceMethod::Wac, DateBasis::TradeDate)
        .await
        .unwrap()
        .unwrap();
    let price_b = full
        .repo
        .find_price(KEY, date("2025-01-20"), PriceMethod::Wac, DateBasis::TradeDate)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(price_a.price, price_b.price);
    assert_eq!(price_a.method_data, price_b.method_data);
}

#[tokio::test]
async fn test_same_day_incremental_with_no_new_trades_is_noop() {
    let t = setup_engine().await;
    insert(&t, &[trade(1, 1000, "150", "2025-01-20", "2025-01-22")]).await;
    let req = request("2025-01-20", DateBasis::TradeDate, ChangeReason::Initial, 1);
    t.engine.process(&req).await.unwrap();

    // Redelivery of the same request finds nothing past the watermark.
    let outcome = t.engine.process(&req).await.unwrap();
    assert_eq!(outcome, CalcOutcome::Skipped);
    let snapshot = t
        .repo
        .find_snapshot(KEY, date("2025-01-20"), DateBasis::TradeDate)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.calculation_version, 1);
}

#[tokio::test]
async fn test_multi_day_build_uses_cross_day_incremental() {
    let t = setup_engine().await;
    let days = [
        (1, 1000, "150", "2025-01-20", "2025-01-22"),
        (2, 500, "160", "2025-01-21", "2025-01-23"),
        (3, -300, "155", "2025-01-22", "2025-01-24"),
    ];
    for (seq, qty, px, trade_date, settle) in days {
        insert(&t, &[trade(seq, qty, px, trade_date, settle)]).await;
        t.engine
            .process(&request(trade_date, DateBasis::TradeDate, ChangeReason::Initial, seq))
            .await
            .unwrap();
    }

    let day1 = t
        .repo
        .find_snapshot(KEY, date("2025-01-20"), DateBasis::TradeDate)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(day1.net_quantity, 1000);
    assert_eq!(day1.calculation_method, CalculationMethod::FullRecalc);
    assert_eq!(wac_price(&t, "2025-01-20", DateBasis::TradeDate).await, d("150"));

    let day2 = t
        .repo
        .find_snapshot(KEY, date("2025-01-21"), DateBasis::TradeDate)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(day2.net_quantity, 1500);
    assert_eq!(day2.calculation_method, CalculationMethod::Incremental);
    assert_eq!(
        wac_price(&t, "2025-01-21", DateBasis::TradeDate).await,
        d("153.333333333333")
    );

    let day3 = t
        .repo
        .find_snapshot(KEY, date("2025-01-22"), DateBasis::TradeDate)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(day3.net_quantity, 1200);
    assert_eq!(day3.calculation_method, CalculationMethod::Incremental);
    // Selling toward zero carries the average unchanged.
    assert_eq!(
        wac_price(&t, "2025-01-22", DateBasis::TradeDate).await,
        d("153.333333333333")
    );
}

#[tokio::test]
async fn test_zero_cross_restarts_wac_at_crossing_price() {
    let t = setup_engine().await;
    insert(&t, &[trade(1, 500, "150", "2025-01-20", "2025-01-22")]).await;
    t.engine
        .process(&request("2025-01-20", DateBasis::TradeDate, ChangeReason::Initial, 1))
        .await
        .unwrap();

    insert(&t, &[trade(2, -800, "160", "2025-01-21", "2025-01-23")]).await;
    t.engine
        .process(&request("2025-01-21", DateBasis::TradeDate, ChangeReason::Initial, 2))
        .await
        .unwrap();

    let day2 = t
        .repo
        .find_snapshot(KEY, date("2025-01-21"), DateBasis::TradeDate)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(day2.net_quantity, -300);
    assert_eq!(day2.gross_long, 500);
    assert_eq!(day2.gross_short, 800);
    assert_eq!(wac_price(&t, "2025-01-21", DateBasis::TradeDate).await, d("160"));
}

#[tokio::test]
async fn test_carry_forward_copies_metrics_and_prices_verbatim() {
    let t = setup_engine().await;
    insert(&t, &[trade(1, 1000, "150", "2025-01-20", "2025-01-22")]).await;
    t.engine
        .process(&request("2025-01-20", DateBasis::TradeDate, ChangeReason::Initial, 1))
        .await
        .unwrap();

    // A request for the next day with no trades rolls the position forward.
    t.clock.set(5_000);
    let outcome = t
        .engine
        .process(&request("2025-01-21", DateBasis::TradeDate, ChangeReason::Initial, 1))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        CalcOutcome::Calculated {
            method: CalculationMethod::Incremental,
            version: 1
        }
    );

    let carried = t
        .repo
        .find_snapshot(KEY, date("2025-01-21"), DateBasis::TradeDate)
        .await
        .unwrap()
        .expect("carried snapshot expected");
    let source = t
        .repo
        .find_snapshot(KEY, date("2025-01-20"), DateBasis::TradeDate)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(carried.metrics(), source.metrics());
    assert_eq!(carried.calculation_method, CalculationMethod::Incremental);
    assert_eq!(carried.calculated_at, TimeMs::new(5_000));

    let prices = t
        .repo
        .find_prices_for_snapshot(KEY, date("2025-01-21"), DateBasis::TradeDate)
        .await
        .unwrap();
    assert_eq!(prices.len(), 1);
    assert_eq!(prices[0].price, d("150"));
    assert_eq!(prices[0].method_data.total_cost_basis, d("150000"));
    assert_eq!(prices[0].method_data.last_updated_sequence, 1);
}

#[tokio::test]
async fn test_late_trade_cascade_repairs_downstream_days() {
    let t = setup_engine().await;

    // Jan 20, 22, 25 trade and calculate cleanly.
    let seed = [
        (1, 100, "50", "2025-01-20"),
        (2, 200, "55", "2025-01-22"),
        (3, 150, "52", "2025-01-25"),
    ];
    for (seq, qty, px, day) in seed {
        insert(&t, &[trade(seq, qty, px, day, day)]).await;
        t.engine
            .process(&request(day, DateBasis::TradeDate, ChangeReason::Initial, seq))
            .await
            .unwrap();
    }

    // Late trade dated Jan 21 invalidates everything through Jan 25. The
    // coordinator publishes the cascade oldest-first; replay it here.
    insert(&t, &[trade(4, 300, "48", "2025-01-21", "2025-01-21")]).await;
    for day in [
        "2025-01-21",
        "2025-01-22",
        "2025-01-23",
        "2025-01-24",
        "2025-01-25",
    ] {
        t.engine
            .process(&request(day, DateBasis::TradeDate, ChangeReason::LateTrade, 4))
            .await
            .unwrap();
    }

    // Jan 20 untouched.
    let jan20 = t
        .repo
        .find_snapshot(KEY, date("2025-01-20"), DateBasis::TradeDate)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(jan20.net_quantity, 100);
    assert_eq!(jan20.calculation_version, 1);

    // Jan 21 builds on Jan 20.
    let jan21 = t
        .repo
        .find_snapshot(KEY, date("2025-01-21"), DateBasis::TradeDate)
        .await
        .unwrap()
        .expect("late-trade day snapshot expected");
    assert_eq!(jan21.net_quantity, 400);
    assert_eq!(jan21.calculation_version, 1);
    assert_eq!(jan21.calculation_method, CalculationMethod::Incremental);
    assert_eq!(wac_price(&t, "2025-01-21", DateBasis::TradeDate).await, d("48.5"));

    // Jan 22 recalculated on top of the repaired Jan 21.
    let jan22 = t
        .repo
        .find_snapshot(KEY, date("2025-01-22"), DateBasis::TradeDate)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(jan22.net_quantity, 600);
    assert_eq!(jan22.calculation_version, 2);
    let jan22_history = t
        .repo
        .find_snapshot_history(KEY, date("2025-01-22"), DateBasis::TradeDate)
        .await
        .unwrap();
    assert_eq!(jan22_history.len(), 2);
    assert_eq!(jan22_history[1].change_reason, ChangeReason::LateTrade);
    assert_eq!(jan22_history[1].previous_net_quantity, Some(200));
    assert_eq!(
        wac_price(&t, "2025-01-22", DateBasis::TradeDate).await,
        d("50.666666666667")
    );

    // Gap days with no trades stay absent.
    for day in ["2025-01-23", "2025-01-24"] {
        assert!(
            t.repo
                .find_snapshot(KEY, date(day), DateBasis::TradeDate)
                .await
                .unwrap()
                .is_none(),
            "{} must have no snapshot",
            day
        );
    }

    // Jan 25 has no prior-day snapshot, so it fully recalculates to its own
    // trades only.
    let jan25 = t
        .repo
        .find_snapshot(KEY, date("2025-01-25"), DateBasis::TradeDate)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(jan25.net_quantity, 150);
    assert_eq!(jan25.calculation_version, 2);
    assert_eq!(jan25.calculation_method, CalculationMethod::FullRecalc);
}

#[tokio::test]
async fn test_request_for_empty_date_is_noop() {
    let t = setup_engine().await;
    let outcome = t
        .engine
        .process(&request("2025-01-20", DateBasis::TradeDate, ChangeReason::Initial, 1))
        .await
        .unwrap();
    assert_eq!(outcome, CalcOutcome::Skipped);
    assert!(t
        .repo
        .find_snapshot(KEY, date("2025-01-20"), DateBasis::TradeDate)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_instrument_key_format_aggregates_across_books() {
    let t = setup_engine().await;
    let mut other = trade(2, 400, "151", "2025-01-20", "2025-01-22");
    other.book = "EQ2".to_string();
    other.counterparty = "BETA".to_string();
    insert(&t, &[trade(1, 1000, "150", "2025-01-20", "2025-01-22"), other]).await;

    let req = PositionCalcRequest {
        request_id: "req-inst".to_string(),
        position_id: 9,
        position_key: "VOD.L".to_string(),
        date_basis: DateBasis::TradeDate,
        business_date: date("2025-01-20"),
        price_methods: vec![PriceMethod::Wac],
        triggering_trade_sequence: 2,
        change_reason: ChangeReason::Initial,
        key_format: KeyFormat::Instrument,
    };
    t.engine.process(&req).await.unwrap();

    let snapshot = t
        .repo
        .find_snapshot("VOD.L", date("2025-01-20"), DateBasis::TradeDate)
        .await
        .unwrap()
        .expect("instrument rollup expected");
    assert_eq!(snapshot.net_quantity, 1400);
    assert_eq!(snapshot.trade_count, 2);
}

#[tokio::test]
async fn test_version_monotonicity_and_single_open_history_row() {
    let t = setup_engine().await;
    for seq in 1..=4 {
        insert(&t, &[trade(seq, 100, "10", "2025-01-20", "2025-01-22")]).await;
        t.clock.set(seq * 1_000);
        t.engine
            .process(&request("2025-01-20", DateBasis::TradeDate, ChangeReason::Initial, seq))
            .await
            .unwrap();
    }

    let snapshot = t
        .repo
        .find_snapshot(KEY, date("2025-01-20"), DateBasis::TradeDate)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.calculation_version, 4);
    assert_eq!(snapshot.net_quantity, 400);

    let history = t
        .repo
        .find_snapshot_history(KEY, date("2025-01-20"), DateBasis::TradeDate)
        .await
        .unwrap();
    let versions: Vec<i64> = history.iter().map(|h| h.calculation_version).collect();
    assert_eq!(versions, vec![1, 2, 3, 4]);

    let open: Vec<_> = history.iter().filter(|h| h.superseded_at.is_none()).collect();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].calculation_version, snapshot.calculation_version);

    // Every superseded row was closed at its successor's calculated_at.
    for pair in history.windows(2) {
        assert_eq!(pair[0].superseded_at, Some(pair[1].calculated_at));
        assert_eq!(pair[1].previous_net_quantity, Some(pair[0].net_quantity));
    }
}
