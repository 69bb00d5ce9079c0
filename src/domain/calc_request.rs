//! Calc request: one pending instruction to (re)compute one snapshot.

use crate::domain::{ChangeReason, DateBasis, KeyFormat, PriceMethod};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Message on the calc-request log, partitioned by `position_id`.
///
/// `triggering_trade_sequence` is observability only; the engine never
/// gates processing on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionCalcRequest {
    pub request_id: String,
    pub position_id: i64,
    pub position_key: String,
    pub date_basis: DateBasis,
    pub business_date: NaiveDate,
    pub price_methods: Vec<PriceMethod>,
    pub triggering_trade_sequence: i64,
    pub change_reason: ChangeReason,
    pub key_format: KeyFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calc_request_wire_roundtrip() {
        let request = PositionCalcRequest {
            request_id: "7a3f0d5e".to_string(),
            position_id: 12,
            position_key: "EQ1#ACME#VOD.L".to_string(),
            date_basis: DateBasis::SettlementDate,
            business_date: NaiveDate::from_ymd_opt(2025, 1, 22).unwrap(),
            price_methods: vec![PriceMethod::Wac],
            triggering_trade_sequence: 5001,
            change_reason: ChangeReason::LateTrade,
            key_format: KeyFormat::BookCounterpartyInstrument,
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"dateBasis\":\"SETTLEMENT_DATE\""));
        assert!(json.contains("\"changeReason\":\"LATE_TRADE\""));

        let back: PositionCalcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_calc_request_rejects_unknown_basis() {
        let raw = r#"{
            "requestId": "x", "positionId": 1, "positionKey": "K",
            "dateBasis": "VALUE_DATE", "businessDate": "2025-01-20",
            "priceMethods": ["WAC"], "triggeringTradeSequence": 1,
            "changeReason": "INITIAL", "keyFormat": "BOOK"
        }"#;
        assert!(serde_json::from_str::<PositionCalcRequest>(raw).is_err());
    }
}
