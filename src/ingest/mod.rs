//! Ingestion coordinator: trade batches in, deduplicated calc requests out.

use crate::cache::ConfigCache;
use crate::db::Repository;
use crate::domain::{
    ChangeReason, Clock, DateBasis, PositionCalcRequest, PositionConfig, Trade,
};
use crate::transport::CalcRequestSink;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Consumes trade batches from the external trade log, persists trades
/// idempotently, upserts position-key rows, and publishes one calc request
/// per distinct (position, dateBasis, businessDate) coordinate.
pub struct IngestionCoordinator {
    repo: Arc<Repository>,
    config_cache: Arc<ConfigCache>,
    sink: Arc<dyn CalcRequestSink>,
    clock: Arc<dyn Clock>,
}

/// Per-batch accounting, for logs and tests.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub events_received: usize,
    pub malformed_dropped: usize,
    pub constraint_dropped: usize,
    pub trades_inserted: usize,
    pub duplicates_skipped: usize,
    pub requests_published: usize,
    pub publish_failures: usize,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Dedup key: one calc request per coordinate per batch, whatever the
/// trade fan-out. BTreeMap ordering doubles as the publish order, so a
/// cascade's dates reach the engine oldest first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct IntentKey {
    position_key: String,
    date_basis: DateBasis,
    business_date: NaiveDate,
}

#[derive(Debug)]
struct CalcIntent {
    position_id: i64,
    sequence_num: i64,
    change_reason: ChangeReason,
    config: PositionConfig,
}

impl IngestionCoordinator {
    pub fn new(
        repo: Arc<Repository>,
        config_cache: Arc<ConfigCache>,
        sink: Arc<dyn CalcRequestSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            config_cache,
            sink,
            clock,
        }
    }

    /// Process one batch of raw trade-log payloads.
    ///
    /// Trade storage is atomic: either every new trade in the batch lands
    /// or none does. Calc-request publication is best-effort per intent; a
    /// failed publish never un-stores a trade, it only delays the snapshot
    /// until the next trade for the same coordinate arrives.
    ///
    /// # Errors
    /// Returns an error only when the store rejects the batch; the caller
    /// leaves the batch un-acked so the log redelivers it.
    pub async fn process_batch(&self, payloads: &[String]) -> Result<IngestReport, IngestError> {
        let mut report = IngestReport {
            events_received: payloads.len(),
            ..IngestReport::default()
        };

        let mut valid = Vec::new();
        for payload in payloads {
            match serde_json::from_str::<Trade>(payload) {
                Ok(trade) => match trade.validate() {
                    Ok(()) => valid.push(trade),
                    Err(e) => {
                        warn!(payload = %payload, error = %e, "dropping trade violating constraints");
                        report.constraint_dropped += 1;
                    }
                },
                Err(e) => {
                    // The sequence number space is the source of truth; a
                    // payload that cannot parse is not retried.
                    warn!(payload = %payload, error = %e, "dropping unparsable trade event");
                    report.malformed_dropped += 1;
                }
            }
        }

        let inserted = self
            .repo
            .batch_insert_trades(&valid, self.clock.now())
            .await?;
        report.trades_inserted = inserted.len();
        report.duplicates_skipped = valid.len() - inserted.len();
        if report.duplicates_skipped > 0 {
            debug!(
                duplicates = report.duplicates_skipped,
                "skipped already-stored sequence numbers"
            );
        }
        if inserted.is_empty() {
            return Ok(report);
        }

        let configs = self.config_cache.active_configs().await?;
        let intents = self.build_intents(&inserted, &configs).await?;

        for (key, intent) in intents {
            let request = PositionCalcRequest {
                request_id: Uuid::new_v4().to_string(),
                position_id: intent.position_id,
                position_key: key.position_key,
                date_basis: key.date_basis,
                business_date: key.business_date,
                price_methods: intent.config.price_methods.clone(),
                triggering_trade_sequence: intent.sequence_num,
                change_reason: intent.change_reason,
                key_format: intent.config.key_format,
            };
            match self.sink.publish(request).await {
                Ok(()) => report.requests_published += 1,
                Err(e) => {
                    warn!(error = %e, "failed to publish calc request, snapshot will lag");
                    report.publish_failures += 1;
                }
            }
        }

        Ok(report)
    }

    /// Build the deduplicated intent map for the stored subset of a batch.
    async fn build_intents(
        &self,
        inserted: &[Trade],
        configs: &[PositionConfig],
    ) -> Result<BTreeMap<IntentKey, CalcIntent>, IngestError> {
        let mut intents: BTreeMap<IntentKey, CalcIntent> = BTreeMap::new();

        for trade in inserted {
            for config in configs {
                if !config.scope.matches(trade) {
                    continue;
                }

                let position_key = config.key_format.generate(
                    &trade.book,
                    &trade.counterparty,
                    &trade.instrument,
                );
                let dimensions = config.key_format.dimensions(
                    &trade.book,
                    &trade.counterparty,
                    &trade.instrument,
                );
                let upsert = self
                    .repo
                    .upsert_position_key(
                        &position_key,
                        config,
                        &dimensions,
                        trade.trade_date,
                        trade.settlement_date,
                        trade.sequence_num,
                        self.clock.now(),
                    )
                    .await?;

                for basis in [DateBasis::TradeDate, DateBasis::SettlementDate] {
                    let trade_date = trade.business_date(basis);
                    let last_date = match basis {
                        DateBasis::TradeDate => upsert.prior_last_trade_date,
                        DateBasis::SettlementDate => upsert.prior_last_settlement_date,
                    };

                    for (business_date, change_reason) in cascade_dates(trade_date, last_date) {
                        merge_intent(
                            &mut intents,
                            IntentKey {
                                position_key: position_key.clone(),
                                date_basis: basis,
                                business_date,
                            },
                            CalcIntent {
                                position_id: upsert.position_id,
                                sequence_num: trade.sequence_num,
                                change_reason,
                                config: config.clone(),
                            },
                        );
                    }
                }
            }
        }

        Ok(intents)
    }
}

/// The cascade list for one trade under one date basis.
///
/// A trade dated strictly before the position's cached last date
/// invalidates every day through that last date; anything else is a single
/// same-date intent. A first-ever trade (no cached date) never cascades.
fn cascade_dates(
    trade_date: NaiveDate,
    last_date: Option<NaiveDate>,
) -> Vec<(NaiveDate, ChangeReason)> {
    match last_date {
        Some(last_date) if trade_date < last_date => trade_date
            .iter_days()
            .take_while(|day| *day <= last_date)
            .map(|day| (day, ChangeReason::LateTrade))
            .collect(),
        _ => vec![(trade_date, ChangeReason::Initial)],
    }
}

fn merge_intent(
    intents: &mut BTreeMap<IntentKey, CalcIntent>,
    key: IntentKey,
    candidate: CalcIntent,
) {
    match intents.entry(key) {
        std::collections::btree_map::Entry::Vacant(entry) => {
            entry.insert(candidate);
        }
        std::collections::btree_map::Entry::Occupied(mut entry) => {
            let existing = entry.get_mut();
            existing.sequence_num = existing.sequence_num.max(candidate.sequence_num);
            if candidate.change_reason == ChangeReason::LateTrade {
                existing.change_reason = ChangeReason::LateTrade;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_cascade_absent_last_date_is_single_initial() {
        let cascade = cascade_dates(date("2025-01-20"), None);
        assert_eq!(cascade, vec![(date("2025-01-20"), ChangeReason::Initial)]);
    }

    #[test]
    fn test_cascade_on_time_trade_is_single_initial() {
        let cascade = cascade_dates(date("2025-01-20"), Some(date("2025-01-20")));
        assert_eq!(cascade, vec![(date("2025-01-20"), ChangeReason::Initial)]);

        let forward = cascade_dates(date("2025-01-21"), Some(date("2025-01-20")));
        assert_eq!(forward, vec![(date("2025-01-21"), ChangeReason::Initial)]);
    }

    #[test]
    fn test_cascade_late_trade_spans_through_last_date() {
        let cascade = cascade_dates(date("2025-01-21"), Some(date("2025-01-25")));
        let days: Vec<String> = cascade.iter().map(|(d, _)| d.to_string()).collect();
        assert_eq!(
            days,
            vec!["2025-01-21", "2025-01-22", "2025-01-23", "2025-01-24", "2025-01-25"]
        );
        assert!(cascade.iter().all(|(_, r)| *r == ChangeReason::LateTrade));
    }

    #[test]
    fn test_cascade_crosses_month_boundary() {
        let cascade = cascade_dates(date("2025-01-30"), Some(date("2025-02-02")));
        let days: Vec<String> = cascade.iter().map(|(d, _)| d.to_string()).collect();
        assert_eq!(days, vec!["2025-01-30", "2025-01-31", "2025-02-01", "2025-02-02"]);
    }
}
