//! Repository layer implementing the persistence contracts.
//!
//! Methods are organized across submodules by domain:
//! - `trades.rs` - trade inserts, trade lists, metric aggregation
//! - `positions.rs` - position keys, snapshots, prices, history
//! - `configs.rs` - position config CRUD
//!
//! Every write method is transactional: it commits or leaves the store
//! unchanged. The snapshot/price/history tables exist once per date basis;
//! the `DateBasis` argument selects the physical table.

mod configs;
mod positions;
mod trades;

use crate::domain::{DateBasis, Decimal, Dimensions};
use chrono::NaiveDate;
use sqlx::sqlite::SqlitePool;
use std::str::FromStr;

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Physical snapshot table for a date basis.
pub(crate) fn snapshots_table(basis: DateBasis) -> &'static str {
    match basis {
        DateBasis::TradeDate => "position_snapshots",
        DateBasis::SettlementDate => "position_snapshots_settled",
    }
}

/// Physical average-price table for a date basis.
pub(crate) fn prices_table(basis: DateBasis) -> &'static str {
    match basis {
        DateBasis::TradeDate => "position_average_prices",
        DateBasis::SettlementDate => "position_average_prices_settled",
    }
}

/// Physical history table for a date basis.
pub(crate) fn history_table(basis: DateBasis) -> &'static str {
    match basis {
        DateBasis::TradeDate => "position_snapshots_history",
        DateBasis::SettlementDate => "position_snapshots_settled_history",
    }
}

/// The `position_trades` date column a basis keys on.
pub(crate) fn trade_date_column(basis: DateBasis) -> &'static str {
    match basis {
        DateBasis::TradeDate => "trade_date",
        DateBasis::SettlementDate => "settlement_date",
    }
}

/// WHERE fragment + bind values selecting trades for either a canonical
/// position key or a dimension projection.
pub(crate) fn trade_selector_clause(
    position_key: Option<&str>,
    dimensions: Option<&Dimensions>,
) -> (String, Vec<String>) {
    if let Some(key) = position_key {
        return ("position_key = ?".to_string(), vec![key.to_string()]);
    }

    let dims = dimensions.expect("either a position key or dimensions is required");
    let mut clauses = Vec::new();
    let mut binds = Vec::new();
    if let Some(book) = &dims.book {
        clauses.push("book = ?");
        binds.push(book.clone());
    }
    if let Some(counterparty) = &dims.counterparty {
        clauses.push("counterparty = ?");
        binds.push(counterparty.clone());
    }
    if let Some(instrument) = &dims.instrument {
        clauses.push("instrument = ?");
        binds.push(instrument.clone());
    }
    assert!(!clauses.is_empty(), "dimension selector has no dimensions");
    (clauses.join(" AND "), binds)
}

/// Decode a TEXT decimal column, surfacing corruption as a column-decode
/// error instead of a silent default.
pub(crate) fn decode_decimal(value: &str, column: &'static str) -> Result<Decimal, sqlx::Error> {
    Decimal::from_str(value).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

/// Decode a TEXT ISO date column.
pub(crate) fn decode_date(value: &str, column: &'static str) -> Result<NaiveDate, sqlx::Error> {
    NaiveDate::from_str(value).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

/// Decode a TEXT enum column via the domain FromStr impls.
pub(crate) fn decode_enum<T>(value: &str, column: &'static str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    T::from_str(value).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}
