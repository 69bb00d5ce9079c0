//! Trade: the immutable fact every position view is derived from.

use crate::domain::{DateBasis, Decimal, TimeMs};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single trade event, identified by a globally unique monotonic
/// `sequence_num`. Never mutated once stored.
///
/// The struct doubles as the JSON wire form on the trade ingestion log;
/// field names follow the log's camelCase contract, and `price` travels as
/// a quoted decimal string so it never passes through binary floating
/// point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    /// Globally unique, monotonically assigned sequence number.
    pub sequence_num: i64,
    pub book: String,
    pub counterparty: String,
    pub instrument: String,
    /// Non-zero; sign is direction (positive = buy, negative = sell).
    pub signed_quantity: i64,
    /// Strictly positive; 6 fractional digits on input.
    pub price: Decimal,
    pub trade_time: TimeMs,
    pub trade_date: NaiveDate,
    pub settlement_date: NaiveDate,
    pub source: String,
    pub source_id: String,
}

impl Trade {
    /// Canonical book#counterparty#instrument key stored on the trade row.
    pub fn bci_key(&self) -> String {
        format!("{}#{}#{}", self.book, self.counterparty, self.instrument)
    }

    /// The date this trade contributes to under the given basis.
    pub fn business_date(&self, basis: DateBasis) -> NaiveDate {
        match basis {
            DateBasis::TradeDate => self.trade_date,
            DateBasis::SettlementDate => self.settlement_date,
        }
    }

    /// Check the per-trade constraints the store enforces.
    ///
    /// # Errors
    /// Returns the violated constraint; the caller drops the single trade
    /// and keeps the rest of its batch.
    pub fn validate(&self) -> Result<(), TradeConstraintError> {
        if self.signed_quantity == 0 {
            return Err(TradeConstraintError::ZeroQuantity {
                sequence_num: self.sequence_num,
            });
        }
        // i64::MIN has no absolute value; reject rather than overflow later.
        if self.signed_quantity == i64::MIN {
            return Err(TradeConstraintError::QuantityOutOfRange {
                sequence_num: self.sequence_num,
            });
        }
        if !self.price.is_positive() {
            return Err(TradeConstraintError::NonPositivePrice {
                sequence_num: self.sequence_num,
                price: self.price,
            });
        }
        Ok(())
    }
}

/// Per-trade constraint violations. Each fails only its own trade, never
/// the batch it arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TradeConstraintError {
    #[error("trade {sequence_num} has zero signedQuantity")]
    ZeroQuantity { sequence_num: i64 },
    #[error("trade {sequence_num} signedQuantity is out of range")]
    QuantityOutOfRange { sequence_num: i64 },
    #[error("trade {sequence_num} has non-positive price {price}")]
    NonPositivePrice { sequence_num: i64, price: Decimal },
}
