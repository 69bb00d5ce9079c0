//! Consumer tasks: per-partition calc workers and the trade ingest loop.

use crate::domain::PositionCalcRequest;
use crate::engine::{CalcEngine, CalcError, CalcOutcome};
use crate::ingest::IngestionCoordinator;
use crate::transport::TradeEventSource;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Spawn exactly one worker per partition receiver.
///
/// One task per partition is what serializes calc requests per position:
/// a request is pulled, fully processed, and only then is the next one
/// taken, with no in-process locks spanning I/O.
pub fn spawn_calc_workers(
    receivers: Vec<mpsc::Receiver<PositionCalcRequest>>,
    engine: Arc<CalcEngine>,
    deadline: Duration,
) -> Vec<JoinHandle<()>> {
    receivers
        .into_iter()
        .enumerate()
        .map(|(partition, rx)| {
            let engine = engine.clone();
            tokio::spawn(run_calc_worker(partition, rx, engine, deadline))
        })
        .collect()
}

async fn run_calc_worker(
    partition: usize,
    mut rx: mpsc::Receiver<PositionCalcRequest>,
    engine: Arc<CalcEngine>,
    deadline: Duration,
) {
    info!(partition, "calc worker started");
    while let Some(request) = rx.recv().await {
        process_with_retry(&engine, &request, deadline).await;
    }
    info!(partition, "calc worker stopped, partition closed");
}

/// Process one request, retrying transient failures with exponential
/// backoff bounded by the request deadline.
async fn process_with_retry(
    engine: &CalcEngine,
    request: &PositionCalcRequest,
    deadline: Duration,
) {
    let policy = ExponentialBackoff {
        max_elapsed_time: Some(deadline),
        ..ExponentialBackoff::default()
    };

    let result = retry(policy, || async {
        match tokio::time::timeout(deadline, engine.process(request)).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) if e.is_transient() => Err(backoff::Error::transient(e)),
            Ok(Err(e)) => Err(backoff::Error::permanent(e)),
            Err(_) => Err(backoff::Error::transient(CalcError::DeadlineExceeded)),
        }
    })
    .await;

    match result {
        Ok(CalcOutcome::Calculated { method, version }) => {
            debug!(
                request_id = %request.request_id,
                position_id = request.position_id,
                method = %method,
                version,
                "calc request processed"
            );
        }
        Ok(CalcOutcome::Skipped) => {
            debug!(
                request_id = %request.request_id,
                position_id = request.position_id,
                "calc request was a no-op"
            );
        }
        Err(e) => {
            // Idempotent processing makes redelivery safe; the next trade
            // for this coordinate also repairs the snapshot.
            error!(
                request_id = %request.request_id,
                position_id = request.position_id,
                business_date = %request.business_date,
                error = %e,
                "calc request failed after retries"
            );
        }
    }
}

/// Spawn the trade ingest loop: poll the log, process, ack.
///
/// A batch that fails to store stays uncommitted and is redelivered on the
/// next poll; `batch_insert_trades` is idempotent by sequence number, so
/// redelivery is harmless.
pub fn spawn_ingest_loop(
    mut source: Box<dyn TradeEventSource>,
    coordinator: Arc<IngestionCoordinator>,
    batch_size: usize,
    poll_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(batch_size, "trade ingest loop started");
        loop {
            match source.next_batch(batch_size).await {
                Ok(batch) if batch.is_empty() => {
                    tokio::time::sleep(poll_interval).await;
                }
                Ok(batch) => match coordinator.process_batch(&batch).await {
                    Ok(report) => {
                        source.commit();
                        info!(
                            events = report.events_received,
                            inserted = report.trades_inserted,
                            duplicates = report.duplicates_skipped,
                            dropped = report.malformed_dropped + report.constraint_dropped,
                            published = report.requests_published,
                            "trade batch processed"
                        );
                    }
                    Err(e) => {
                        warn!(error = %e, "trade batch failed, leaving un-acked for redelivery");
                        tokio::time::sleep(poll_interval).await;
                    }
                },
                Err(e) => {
                    warn!(error = %e, "trade log read failed");
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    })
}
