//! The calculation engine: one calc request in, one committed snapshot out.

use crate::db::Repository;
use crate::domain::{
    CalculationMethod, ChangeReason, Clock, Dimensions, KeyFormat, KeyParseError,
    PositionAveragePrice, PositionCalcRequest, PositionSnapshot, PriceMethod, TimeMs, Trade,
    TradeMetrics,
};
use crate::engine::WacState;
use chrono::NaiveDate;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// What a processed request did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalcOutcome {
    /// No matching trades; nothing was written.
    Skipped,
    Calculated {
        method: CalculationMethod,
        version: i64,
    },
}

#[derive(Debug, Error)]
pub enum CalcError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Key(#[from] KeyParseError),
    #[error("calculation deadline exceeded")]
    DeadlineExceeded,
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl CalcError {
    /// Transient errors are retried by the consumer; the rest abort the
    /// request (malformed input or a core bug).
    pub fn is_transient(&self) -> bool {
        matches!(self, CalcError::Db(_) | CalcError::DeadlineExceeded)
    }
}

/// Processes calc requests for one position at a time.
///
/// The per-partition consumer guarantees requests for a `position_id`
/// arrive in publish order; the engine itself holds no cross-request state
/// and is idempotent with respect to the store (redelivery costs at most an
/// extra history version).
pub struct CalcEngine {
    repo: Arc<Repository>,
    clock: Arc<dyn Clock>,
}

impl CalcEngine {
    pub fn new(repo: Arc<Repository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// Process a single calc request: choose a strategy, compute the
    /// snapshot and WAC, and commit them atomically.
    pub async fn process(&self, request: &PositionCalcRequest) -> Result<CalcOutcome, CalcError> {
        let basis = request.date_basis;
        let key = request.position_key.as_str();

        let current = self.repo.find_snapshot(key, request.business_date, basis).await?;
        let previous_date = previous_day(request.business_date)?;
        let previous = self.repo.find_snapshot(key, previous_date, basis).await?;

        // Same-day incremental is reserved for INITIAL: a late-trade cascade
        // must recompute from updated prior-day state, not extend the
        // existing same-day snapshot.
        match (request.change_reason, current, previous) {
            (ChangeReason::Initial, Some(current), _) => {
                self.same_day_incremental(request, current).await
            }
            (_, current, Some(previous)) => {
                self.cross_day_incremental(request, current.is_some(), previous, previous_date)
                    .await
            }
            _ => self.full_recalculation(request).await,
        }
    }

    async fn same_day_incremental(
        &self,
        request: &PositionCalcRequest,
        current: PositionSnapshot,
    ) -> Result<CalcOutcome, CalcError> {
        let new_trades = self
            .trades_after(request, current.last_sequence_num)
            .await?;
        if new_trades.is_empty() {
            debug!(
                request_id = %request.request_id,
                position_key = %request.position_key,
                "no trades beyond snapshot watermark, nothing to do"
            );
            return Ok(CalcOutcome::Skipped);
        }

        let prior_net_quantity = current.net_quantity;
        let mut metrics = current.metrics();
        for trade in &new_trades {
            metrics.apply_trade(
                trade.sequence_num,
                trade.signed_quantity,
                trade.price,
                trade.trade_time,
            );
        }

        let now = self.clock.now();
        let snapshot = self.build_snapshot(request, &metrics, CalculationMethod::Incremental, now)?;

        let prices = if self.wants_wac(request) {
            let existing = self
                .repo
                .find_price(
                    &request.position_key,
                    request.business_date,
                    PriceMethod::Wac,
                    request.date_basis,
                )
                .await?;
            let initial = match existing {
                Some(price) => WacState::from_price(&price, prior_net_quantity),
                None => WacState::new(),
            };
            let state = fold_wac(initial, &new_trades);
            vec![self.price_row(request, &state, now)]
        } else {
            Vec::new()
        };

        self.commit(request, &snapshot, &prices, CalculationMethod::Incremental)
            .await
    }

    async fn cross_day_incremental(
        &self,
        request: &PositionCalcRequest,
        has_current: bool,
        previous: PositionSnapshot,
        previous_date: NaiveDate,
    ) -> Result<CalcOutcome, CalcError> {
        let now = self.clock.now();
        let today = self.aggregate(request).await?;

        let Some(today) = today else {
            // A late-trade cascade touches every day through the cached last
            // date; days with no trades and no snapshot have nothing to
            // repair and must not materialize one.
            if request.change_reason != ChangeReason::Initial && !has_current {
                debug!(
                    request_id = %request.request_id,
                    position_key = %request.position_key,
                    business_date = %request.business_date,
                    "cascade day has no trades and no snapshot, skipping"
                );
                return Ok(CalcOutcome::Skipped);
            }

            // Carry-forward: no trades on this day, copy the prior day's
            // metrics and prices verbatim onto the new date.
            let snapshot = self.build_snapshot(
                request,
                &previous.metrics(),
                CalculationMethod::Incremental,
                now,
            )?;
            let prices = self
                .repo
                .find_prices_for_snapshot(&request.position_key, previous_date, request.date_basis)
                .await?
                .into_iter()
                .map(|price| PositionAveragePrice {
                    business_date: request.business_date,
                    calculated_at: now,
                    ..price
                })
                .collect::<Vec<_>>();
            return self
                .commit(request, &snapshot, &prices, CalculationMethod::Incremental)
                .await;
        };

        let combined = TradeMetrics {
            net_quantity: previous.net_quantity + today.net_quantity,
            gross_long: previous.gross_long + today.gross_long,
            gross_short: previous.gross_short + today.gross_short,
            trade_count: previous.trade_count + today.trade_count,
            total_notional: previous.total_notional + today.total_notional,
            last_sequence_num: today.last_sequence_num,
            last_trade_time: today.last_trade_time,
        };
        let snapshot = self.build_snapshot(request, &combined, CalculationMethod::Incremental, now)?;

        let prices = if self.wants_wac(request) {
            let todays_trades = self.trades_for_date(request).await?;
            let previous_wac = self
                .repo
                .find_price(
                    &request.position_key,
                    previous_date,
                    PriceMethod::Wac,
                    request.date_basis,
                )
                .await?;
            let initial = match previous_wac {
                Some(price) => WacState::from_price(&price, previous.net_quantity),
                None => {
                    // Prior-day snapshot without a price row: rebuild the
                    // WAC from today's trades alone.
                    warn!(
                        position_key = %request.position_key,
                        business_date = %request.business_date,
                        date_basis = %request.date_basis,
                        "previous-day WAC missing, falling back to full WAC for the day"
                    );
                    WacState::new()
                }
            };
            let state = fold_wac(initial, &todays_trades);
            vec![self.price_row(request, &state, now)]
        } else {
            Vec::new()
        };

        self.commit(request, &snapshot, &prices, CalculationMethod::Incremental)
            .await
    }

    async fn full_recalculation(
        &self,
        request: &PositionCalcRequest,
    ) -> Result<CalcOutcome, CalcError> {
        let Some(metrics) = self.aggregate(request).await? else {
            // A request for a date with no matching trades is a no-op.
            debug!(
                request_id = %request.request_id,
                position_key = %request.position_key,
                business_date = %request.business_date,
                "no trades for date, skipping"
            );
            return Ok(CalcOutcome::Skipped);
        };

        let now = self.clock.now();
        let snapshot = self.build_snapshot(request, &metrics, CalculationMethod::FullRecalc, now)?;

        let prices = if self.wants_wac(request) {
            let trades = self.trades_for_date(request).await?;
            let state = fold_wac(WacState::new(), &trades);
            vec![self.price_row(request, &state, now)]
        } else {
            Vec::new()
        };

        self.commit(request, &snapshot, &prices, CalculationMethod::FullRecalc)
            .await
    }

    async fn commit(
        &self,
        request: &PositionCalcRequest,
        snapshot: &PositionSnapshot,
        prices: &[PositionAveragePrice],
        method: CalculationMethod,
    ) -> Result<CalcOutcome, CalcError> {
        let version = self
            .repo
            .save_snapshot_with_prices(snapshot, prices, request.date_basis, request.change_reason)
            .await?;
        debug!(
            request_id = %request.request_id,
            position_key = %request.position_key,
            business_date = %request.business_date,
            date_basis = %request.date_basis,
            method = %method,
            version,
            net_quantity = snapshot.net_quantity,
            "snapshot committed"
        );
        Ok(CalcOutcome::Calculated { method, version })
    }

    fn build_snapshot(
        &self,
        request: &PositionCalcRequest,
        metrics: &TradeMetrics,
        method: CalculationMethod,
        now: TimeMs,
    ) -> Result<PositionSnapshot, CalcError> {
        if !metrics.is_consistent() {
            return Err(CalcError::Invariant(format!(
                "metrics violate net = grossLong - grossShort for {} on {}: net={} long={} short={}",
                request.position_key,
                request.business_date,
                metrics.net_quantity,
                metrics.gross_long,
                metrics.gross_short,
            )));
        }
        Ok(PositionSnapshot::from_metrics(
            &request.position_key,
            request.business_date,
            metrics,
            method,
            &request.request_id,
            now,
        ))
    }

    fn price_row(
        &self,
        request: &PositionCalcRequest,
        state: &WacState,
        now: TimeMs,
    ) -> PositionAveragePrice {
        PositionAveragePrice {
            position_key: request.position_key.clone(),
            business_date: request.business_date,
            price_method: PriceMethod::Wac,
            price: state.avg_price,
            method_data: state.method_data(),
            calculation_version: 0,
            calculated_at: now,
        }
    }

    fn wants_wac(&self, request: &PositionCalcRequest) -> bool {
        request.price_methods.contains(&PriceMethod::Wac)
    }

    /// Non-BCI key formats read trades by their dimension projection; the
    /// canonical format reads by position key directly.
    fn dimension_selector(
        &self,
        request: &PositionCalcRequest,
    ) -> Result<Option<Dimensions>, KeyParseError> {
        if request.key_format == KeyFormat::BookCounterpartyInstrument {
            Ok(None)
        } else {
            request.key_format.parse_key(&request.position_key).map(Some)
        }
    }

    async fn aggregate(
        &self,
        request: &PositionCalcRequest,
    ) -> Result<Option<TradeMetrics>, CalcError> {
        let metrics = match self.dimension_selector(request)? {
            None => {
                self.repo
                    .aggregate_metrics(
                        &request.position_key,
                        request.business_date,
                        request.date_basis,
                    )
                    .await?
            }
            Some(dims) => {
                self.repo
                    .aggregate_metrics_by_dimensions(
                        &dims,
                        request.business_date,
                        request.date_basis,
                    )
                    .await?
            }
        };
        Ok(metrics)
    }

    async fn trades_for_date(
        &self,
        request: &PositionCalcRequest,
    ) -> Result<Vec<Trade>, CalcError> {
        let trades = match self.dimension_selector(request)? {
            None => {
                self.repo
                    .find_trades_by_position_key_and_date(
                        &request.position_key,
                        request.business_date,
                        request.date_basis,
                    )
                    .await?
            }
            Some(dims) => {
                self.repo
                    .find_trades_by_dimensions(&dims, request.business_date, request.date_basis)
                    .await?
            }
        };
        Ok(trades)
    }

    async fn trades_after(
        &self,
        request: &PositionCalcRequest,
        after_sequence: i64,
    ) -> Result<Vec<Trade>, CalcError> {
        let trades = match self.dimension_selector(request)? {
            None => {
                self.repo
                    .find_trades_after_sequence(
                        &request.position_key,
                        request.business_date,
                        request.date_basis,
                        after_sequence,
                    )
                    .await?
            }
            Some(dims) => {
                self.repo
                    .find_trades_after_sequence_by_dimensions(
                        &dims,
                        request.business_date,
                        request.date_basis,
                        after_sequence,
                    )
                    .await?
            }
        };
        Ok(trades)
    }
}

fn previous_day(date: NaiveDate) -> Result<NaiveDate, CalcError> {
    date.pred_opt().ok_or_else(|| {
        CalcError::Invariant(format!("business date {} has no previous day", date))
    })
}

fn fold_wac(initial: WacState, trades: &[Trade]) -> WacState {
    trades.iter().fold(initial, |state, trade| {
        state.apply_trade(trade.sequence_num, trade.signed_quantity, trade.price)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CalcError::Db(sqlx::Error::PoolTimedOut).is_transient());
        assert!(CalcError::DeadlineExceeded.is_transient());
        assert!(!CalcError::Invariant("broken".to_string()).is_transient());
        let key_err = KeyFormat::Book.parse_key("A#B").unwrap_err();
        assert!(!CalcError::Key(key_err).is_transient());
    }
}
