//! Log transports: the calc-request bus and the trade-log source.
//!
//! Both logs are abstract ordered partitioned logs. In this process the
//! calc-request log is a set of bounded mpsc queues (one per partition,
//! exactly one worker each, so requests for a position are handled in
//! publish order and backpressure comes from channel capacity), and the
//! trade log is a JSONL file tailed with explicit offset commits so an
//! unprocessed batch is redelivered.

pub mod calc_bus;
pub mod trade_log;
pub mod worker;

pub use calc_bus::{CalcRequestBus, CalcRequestSink, CollectingSink};
pub use trade_log::{JsonlTradeLog, TradeEventSource};
pub use worker::{spawn_calc_workers, spawn_ingest_loop};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("calc request log closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
