//! The calc-request log as an in-process partitioned bus.

use crate::domain::PositionCalcRequest;
use crate::transport::TransportError;
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Producer side of the calc-request log.
#[async_trait]
pub trait CalcRequestSink: Send + Sync {
    /// Publish one request to its position's partition. May block on
    /// partition backpressure.
    async fn publish(&self, request: PositionCalcRequest) -> Result<(), TransportError>;
}

/// Bounded mpsc queues, one per partition, keyed by `position_id`.
///
/// No unbounded in-memory queue sits between the log and the workers;
/// `publish` suspends when a partition is full.
pub struct CalcRequestBus {
    senders: Vec<mpsc::Sender<PositionCalcRequest>>,
}

impl CalcRequestBus {
    /// Create a bus with `partitions` queues of `capacity` each, returning
    /// the consumer ends for the worker tasks.
    pub fn new(
        partitions: usize,
        capacity: usize,
    ) -> (Self, Vec<mpsc::Receiver<PositionCalcRequest>>) {
        assert!(partitions > 0, "at least one partition is required");
        let mut senders = Vec::with_capacity(partitions);
        let mut receivers = Vec::with_capacity(partitions);
        for _ in 0..partitions {
            let (tx, rx) = mpsc::channel(capacity);
            senders.push(tx);
            receivers.push(rx);
        }
        (Self { senders }, receivers)
    }

    fn partition_for(&self, position_id: i64) -> usize {
        (position_id.rem_euclid(self.senders.len() as i64)) as usize
    }
}

#[async_trait]
impl CalcRequestSink for CalcRequestBus {
    async fn publish(&self, request: PositionCalcRequest) -> Result<(), TransportError> {
        let partition = self.partition_for(request.position_id);
        self.senders[partition]
            .send(request)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// Sink that records published requests, for exercising the ingestion
/// coordinator without worker tasks.
#[derive(Debug, Default)]
pub struct CollectingSink {
    published: Mutex<Vec<PositionCalcRequest>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, in publish order.
    pub fn drain(&self) -> Vec<PositionCalcRequest> {
        std::mem::take(&mut self.published.lock().expect("sink lock poisoned"))
    }
}

#[async_trait]
impl CalcRequestSink for CollectingSink {
    async fn publish(&self, request: PositionCalcRequest) -> Result<(), TransportError> {
        self.published
            .lock()
            .expect("sink lock poisoned")
            .push(request);
        Ok(())
    }
}
