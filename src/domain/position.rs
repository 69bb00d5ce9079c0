//! Position view types: configs, keys, snapshots, average prices, history.

use crate::domain::{
    CalculationMethod, ChangeReason, ConfigType, Decimal, KeyFormat, PriceMethod, Scope, TimeMs,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Descriptor of one position view, owned by the config store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionConfig {
    pub config_id: i64,
    pub config_type: ConfigType,
    pub name: String,
    pub key_format: KeyFormat,
    pub price_methods: Vec<PriceMethod>,
    pub scope: Scope,
    pub active: bool,
}

/// Result of an atomic position-key upsert.
///
/// The prior dates are the cached values *before* this upsert; the
/// ingestion coordinator classifies late trades against them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionKeyUpsert {
    pub position_id: i64,
    pub prior_last_trade_date: Option<NaiveDate>,
    pub prior_last_settlement_date: Option<NaiveDate>,
}

/// A stored position-key row with its cached last-seen dates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionKeyRow {
    pub position_id: i64,
    pub position_key: String,
    pub config_id: i64,
    pub config_type: ConfigType,
    pub config_name: String,
    pub book: Option<String>,
    pub counterparty: Option<String>,
    pub instrument: Option<String>,
    pub last_trade_date: NaiveDate,
    pub last_settlement_date: NaiveDate,
    pub created_at: TimeMs,
    pub created_by_sequence: i64,
}

/// Running aggregate of the counting metrics over a set of trades.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TradeMetrics {
    pub net_quantity: i64,
    pub gross_long: i64,
    pub gross_short: i64,
    pub trade_count: i64,
    pub total_notional: Decimal,
    pub last_sequence_num: i64,
    pub last_trade_time: TimeMs,
}

impl TradeMetrics {
    /// Fold one trade into the aggregate.
    ///
    /// Callers must feed trades in ascending `sequence_num`; quantities have
    /// been range-checked at ingestion so `abs` cannot overflow.
    pub fn apply_trade(
        &mut self,
        sequence_num: i64,
        signed_quantity: i64,
        price: Decimal,
        trade_time: TimeMs,
    ) {
        self.net_quantity += signed_quantity;
        if signed_quantity > 0 {
            self.gross_long += signed_quantity;
        } else {
            self.gross_short += signed_quantity.abs();
        }
        self.trade_count += 1;
        self.total_notional += Decimal::from_i64(signed_quantity.abs()) * price;
        self.last_sequence_num = sequence_num;
        if trade_time > self.last_trade_time {
            self.last_trade_time = trade_time;
        }
    }

    /// net = grossLong - grossShort must hold after any fold.
    pub fn is_consistent(&self) -> bool {
        self.net_quantity == self.gross_long - self.gross_short
            && self.gross_long >= 0
            && self.gross_short >= 0
            && self.trade_count >= 0
    }
}

/// The current computed position for one (key, businessDate, dateBasis)
/// coordinate. Overwritten in place on recalculation; every overwrite
/// appends a history row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionSnapshot {
    pub position_key: String,
    pub business_date: NaiveDate,
    pub net_quantity: i64,
    pub gross_long: i64,
    pub gross_short: i64,
    pub trade_count: i64,
    pub total_notional: Decimal,
    pub calculation_version: i64,
    pub calculated_at: TimeMs,
    pub calculation_method: CalculationMethod,
    pub calculation_request_id: String,
    pub last_sequence_num: i64,
    pub last_trade_time: TimeMs,
}

impl PositionSnapshot {
    /// Assemble a snapshot from an aggregate. `calculation_version` is
    /// assigned by the store at save time; the value here is a placeholder.
    pub fn from_metrics(
        position_key: &str,
        business_date: NaiveDate,
        metrics: &TradeMetrics,
        calculation_method: CalculationMethod,
        calculation_request_id: &str,
        calculated_at: TimeMs,
    ) -> Self {
        PositionSnapshot {
            position_key: position_key.to_string(),
            business_date,
            net_quantity: metrics.net_quantity,
            gross_long: metrics.gross_long,
            gross_short: metrics.gross_short,
            trade_count: metrics.trade_count,
            total_notional: metrics.total_notional,
            calculation_version: 0,
            calculated_at,
            calculation_method,
            calculation_request_id: calculation_request_id.to_string(),
            last_sequence_num: metrics.last_sequence_num,
            last_trade_time: metrics.last_trade_time,
        }
    }

    /// The metric fields as a resumable aggregate.
    pub fn metrics(&self) -> TradeMetrics {
        TradeMetrics {
            net_quantity: self.net_quantity,
            gross_long: self.gross_long,
            gross_short: self.gross_short,
            trade_count: self.trade_count,
            total_notional: self.total_notional,
            last_sequence_num: self.last_sequence_num,
            last_trade_time: self.last_trade_time,
        }
    }
}

/// WAC method state persisted alongside the price as a JSON column.
///
/// Unknown fields in the stored JSON are ignored on read so additions stay
/// forward-compatible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WacMethodData {
    pub total_cost_basis: Decimal,
    pub last_updated_sequence: i64,
}

/// One average price per (key, businessDate, priceMethod, dateBasis).
/// Overwritten like the snapshot; no separate price history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionAveragePrice {
    pub position_key: String,
    pub business_date: NaiveDate,
    pub price_method: PriceMethod,
    /// Rounded to 12 fractional digits.
    pub price: Decimal,
    pub method_data: WacMethodData,
    pub calculation_version: i64,
    pub calculated_at: TimeMs,
}

/// Append-only audit row; exactly one row per coordinate has
/// `superseded_at = None`, and it mirrors the current snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHistoryEntry {
    pub history_id: i64,
    pub position_key: String,
    pub business_date: NaiveDate,
    pub net_quantity: i64,
    pub gross_long: i64,
    pub gross_short: i64,
    pub trade_count: i64,
    pub total_notional: Decimal,
    pub calculation_version: i64,
    pub calculated_at: TimeMs,
    pub superseded_at: Option<TimeMs>,
    pub change_reason: ChangeReason,
    pub previous_net_quantity: Option<i64>,
    pub calculation_request_id: String,
    pub last_sequence_num: i64,
    pub last_trade_time: TimeMs,
    pub calculation_method: CalculationMethod,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_metrics_fold_matches_net_gross_identity() {
        let mut m = TradeMetrics::default();
        m.apply_trade(1, 1000, d("150"), TimeMs::new(10));
        m.apply_trade(2, 500, d("160"), TimeMs::new(20));
        m.apply_trade(3, -400, d("155"), TimeMs::new(30));

        assert_eq!(m.net_quantity, 1100);
        assert_eq!(m.gross_long, 1500);
        assert_eq!(m.gross_short, 400);
        assert_eq!(m.trade_count, 3);
        assert_eq!(m.total_notional, d("292000"));
        assert_eq!(m.last_sequence_num, 3);
        assert_eq!(m.last_trade_time, TimeMs::new(30));
        assert!(m.is_consistent());
    }

    #[test]
    fn test_metrics_last_trade_time_is_monotone() {
        let mut m = TradeMetrics::default();
        m.apply_trade(1, 10, d("1"), TimeMs::new(500));
        // Later sequence with an earlier timestamp must not regress the time.
        m.apply_trade(2, 10, d("1"), TimeMs::new(400));
        assert_eq!(m.last_trade_time, TimeMs::new(500));
        assert_eq!(m.last_sequence_num, 2);
    }

    #[test]
    fn test_snapshot_metrics_roundtrip() {
        let mut m = TradeMetrics::default();
        m.apply_trade(7, -250, d("99.5"), TimeMs::new(1));
        let snapshot = PositionSnapshot::from_metrics(
            "EQ1#ACME#VOD.L",
            chrono::NaiveDate::from_ymd_opt(2025, 1, 20).unwrap(),
            &m,
            CalculationMethod::FullRecalc,
            "req-1",
            TimeMs::new(42),
        );
        assert_eq!(snapshot.metrics(), m);
    }

    #[test]
    fn test_method_data_ignores_unknown_fields() {
        let raw = r#"{"totalCostBasis":"150000","lastUpdatedSequence":3,"futureField":true}"#;
        let data: WacMethodData = serde_json::from_str(raw).unwrap();
        assert_eq!(data.total_cost_basis, d("150000"));
        assert_eq!(data.last_updated_sequence, 3);
    }
}
