//! Full-pipeline tests: trade payloads in, committed snapshots out,
//! through the coordinator, the partitioned bus, and the calc workers.

use chrono::NaiveDate;
use poskeeper::cache::ConfigCache;
use poskeeper::db::{init_db, Repository};
use poskeeper::domain::{
    CalculationMethod, DateBasis, Decimal, PositionSnapshot, SystemClock, TimeMs, Trade,
};
use poskeeper::engine::CalcEngine;
use poskeeper::ingest::IngestionCoordinator;
use poskeeper::transport::{spawn_calc_workers, CalcRequestBus};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const KEY: &str = "EQ1#ACME#VOD.L";

struct Pipeline {
    repo: Arc<Repository>,
    coordinator: IngestionCoordinator,
    _temp: TempDir,
}

async fn setup_pipeline() -> Pipeline {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));
    let clock = Arc::new(SystemClock);
    let cache = Arc::new(ConfigCache::new(repo.clone(), Duration::from_secs(60)));

    let (bus, receivers) = CalcRequestBus::new(2, 64);
    let engine = Arc::new(CalcEngine::new(repo.clone(), clock.clone()));
    spawn_calc_workers(receivers, engine, Duration::from_secs(30));

    let coordinator =
        IngestionCoordinator::new(repo.clone(), cache, Arc::new(bus), clock);
    Pipeline {
        repo,
        coordinator,
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

fn payloads(trades: &[Trade]) -> Vec<String> {
    trades
        .iter()
        .map(|t| serde_json::to_string(t).unwrap())
        .collect()
}

/// Poll the store until the predicate holds or a few seconds pass. Worker
/// tasks are asynchronous; snapshots land shortly after publish.
async fn wait_for_snapshot<F>(
    repo: &Repository,
    business_date: &str,
    basis: DateBasis,
    predicate: F,
) -> PositionSnapshot
where
    F: Fn(&PositionSnapshot) -> bool,
{
    for _ in 0..250 {
        if let Some(snapshot) = repo
            .find_snapshot(KEY, date(business_date), basis)
            .await
            .unwrap()
        {
            if predicate(&snapshot) {
                return snapshot;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("snapshot for {} did not reach expected state", business_date);
}

#[tokio::test]
async fn test_single_trade_produces_both_views_end_to_end() {
    let p = setup_pipeline().await;
    p.coordinator
        .process_batch(&payloads(&[trade(1, 1000, "150", "2025-01-20", "2025-01-22")]))
        .await
        .unwrap();

    let by_trade_date =
        wait_for_snapshot(&p.repo, "2025-01-20", DateBasis::TradeDate, |s| {
            s.net_quantity == 1000
        })
        .await;
    assert_eq!(by_trade_date.calculation_method, CalculationMethod::FullRecalc);
    assert_eq!(by_trade_date.total_notional, d("150000"));

    let settled =
        wait_for_snapshot(&p.repo, "2025-01-22", DateBasis::SettlementDate, |s| {
            s.net_quantity == 1000
        })
        .await;
    assert_eq!(settled.trade_count, 1);
}

#[tokio::test]
async fn test_late_trade_cascade_end_to_end() {
    let p = setup_pipeline().await;

    // Seed three calculated days with gaps, one batch at a time so each
    // day's snapshot exists before the next batch lands.
    for (seq, qty, px, day) in [
        (1, 100, "50", "2025-01-20"),
        (2, 200, "55", "2025-01-22"),
        (3, 150, "52", "2025-01-25"),
    ] {
        p.coordinator
            .process_batch(&payloads(&[trade(seq, qty, px, day, day)]))
            .await
            .unwrap();
        wait_for_snapshot(&p.repo, day, DateBasis::TradeDate, |s| {
            s.net_quantity == qty
        })
        .await;
    }

    // The late trade triggers the cascade across Jan 21..25.
    p.coordinator
        .process_batch(&payloads(&[trade(4, 300, "48", "2025-01-21", "2025-01-21")]))
        .await
        .unwrap();

    let jan21 = wait_for_snapshot(&p.repo, "2025-01-21", DateBasis::TradeDate, |s| {
        s.net_quantity == 400
    })
    .await;
    assert_eq!(jan21.calculation_version, 1);

    let jan22 = wait_for_snapshot(&p.repo, "2025-01-22", DateBasis::TradeDate, |s| {
        s.net_quantity == 600
    })
    .await;
    assert_eq!(jan22.calculation_version, 2);

    let jan25 = wait_for_snapshot(&p.repo, "2025-01-25", DateBasis::TradeDate, |s| {
        s.calculation_version == 2
    })
    .await;
    assert_eq!(jan25.net_quantity, 150);
    assert_eq!(jan25.calculation_method, CalculationMethod::FullRecalc);

    // Gap days stay absent, and Jan 20 is untouched.
    for day in ["2025-01-23", "2025-01-24"] {
        assert!(p
            .repo
            .find_snapshot(KEY, date(day), DateBasis::TradeDate)
            .await
            .unwrap()
            .is_none());
    }
    let jan20 = p
        .repo
        .find_snapshot(KEY, date("2025-01-20"), DateBasis::TradeDate)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(jan20.calculation_version, 1);
}

#[tokio::test]
async fn test_duplicate_ingestion_leaves_store_identical() {
    let p = setup_pipeline().await;
    let batch = payloads(&[trade(5001, 1000, "150", "2025-01-20", "2025-01-22")]);

    p.coordinator.process_batch(&batch).await.unwrap();
    let first = wait_for_snapshot(&p.repo, "2025-01-20", DateBasis::TradeDate, |s| {
        s.net_quantity == 1000
    })
    .await;

    // Redelivering the batch stores nothing and publishes nothing, so the
    // snapshot (and its version) cannot move.
    let report = p.coordinator.process_batch(&batch).await.unwrap();
    assert_eq!(report.trades_inserted, 0);
    assert_eq!(report.requests_published, 0);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let after = p
        .repo
        .find_snapshot(KEY, date("2025-01-20"), DateBasis::TradeDate)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after, first);

    let history = p
        .repo
        .find_snapshot_history(KEY, date("2025-01-20"), DateBasis::TradeDate)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_multi_day_accumulation_end_to_end() {
    let p = setup_pipeline().await;
    for (seq, qty, px, day, expected_net) in [
        (1, 1000, "150", "2025-01-20", 1000),
        (2, 500, "160", "2025-01-21", 1500),
        (3, -300, "155", "2025-01-22", 1200),
    ] {
        p.coordinator
            .process_batch(&payloads(&[trade(seq, qty, px, day, day)]))
            .await
            .unwrap();
        wait_for_snapshot(&p.repo, day, DateBasis::TradeDate, |s| {
            s.net_quantity == expected_net
        })
        .await;
    }

    let series = p
        .repo
        .find_snapshots_for_position(KEY, DateBasis::TradeDate, None, None)
        .await
        .unwrap();
    let nets: Vec<i64> = series.iter().map(|s| s.net_quantity).collect();
    assert_eq!(nets, vec![1000, 1500, 1200]);
}
