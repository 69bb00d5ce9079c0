//! The external trade log, tailed as an append-only JSONL file.

use crate::transport::TransportError;
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};

/// Consumer side of the trade ingestion log.
///
/// Delivery is at-least-once: `next_batch` stages a read position and
/// `commit` acknowledges it. An uncommitted batch is redelivered on the
/// next poll.
#[async_trait]
pub trait TradeEventSource: Send {
    /// Up to `max` raw payload lines past the committed offset; empty when
    /// caught up.
    async fn next_batch(&mut self, max: usize) -> Result<Vec<String>, TransportError>;

    /// Acknowledge the batch returned by the last `next_batch`.
    fn commit(&mut self);
}

/// Tails an append-only JSONL file, one trade event per line.
///
/// A missing file and a partially-written trailing line both read as "no
/// new events yet".
pub struct JsonlTradeLog {
    path: PathBuf,
    committed_offset: u64,
    pending_offset: u64,
}

impl JsonlTradeLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            committed_offset: 0,
            pending_offset: 0,
        }
    }
}

#[async_trait]
impl TradeEventSource for JsonlTradeLog {
    async fn next_batch(&mut self, max: usize) -> Result<Vec<String>, TransportError> {
        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(self.committed_offset)).await?;

        let mut payloads = Vec::new();
        let mut consumed = 0u64;
        let mut line = String::new();
        while payloads.len() < max {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                break;
            }
            if !line.ends_with('\n') {
                // Writer mid-append; pick the line up once it is complete.
                break;
            }
            consumed += bytes_read as u64;
            let payload = line.trim();
            if !payload.is_empty() {
                payloads.push(payload.to_string());
            }
        }

        self.pending_offset = self.committed_offset + consumed;
        Ok(payloads)
    }

    fn commit(&mut self) {
        self.committed_offset = self.pending_offset;
    }
}
