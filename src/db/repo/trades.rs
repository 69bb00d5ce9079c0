//! Trade inserts, trade lists, and metric aggregation.

use crate::domain::{DateBasis, Dimensions, TimeMs, Trade, TradeMetrics};
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{decode_date, decode_decimal, trade_date_column, trade_selector_clause, Repository};

impl Repository {
    /// Insert a trade idempotently.
    ///
    /// Returns true if inserted, false if a row with that sequence number
    /// already exists.
    ///
    /// # Errors
    /// Returns an error only on store failure; duplicates are not errors.
    pub async fn insert_trade(
        &self,
        trade: &Trade,
        processed_at: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = bind_trade_insert(trade, processed_at)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Insert a batch of trades in a single transaction.
    ///
    /// Returns the subset actually inserted, in input order. Trades whose
    /// sequence number is already present are skipped, not failures.
    ///
    /// # Errors
    /// Returns an error if the transaction fails; no trade is stored then.
    pub async fn batch_insert_trades(
        &self,
        trades: &[Trade],
        processed_at: TimeMs,
    ) -> Result<Vec<Trade>, sqlx::Error> {
        if trades.is_empty() {
            return Ok(Vec::new());
        }

        let mut inserted = Vec::new();
        let mut tx = self.pool().begin().await?;

        for trade in trades {
            let result = bind_trade_insert(trade, processed_at)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() > 0 {
                inserted.push(trade.clone());
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Trades for a position key on a business date, strictly after a
    /// sequence number, ascending. Used by same-day incremental.
    pub async fn find_trades_after_sequence(
        &self,
        position_key: &str,
        business_date: NaiveDate,
        basis: DateBasis,
        after_sequence: i64,
    ) -> Result<Vec<Trade>, sqlx::Error> {
        self.query_trades(Some(position_key), None, business_date, basis, Some(after_sequence))
            .await
    }

    /// Dimension-projection variant of [`Self::find_trades_after_sequence`]
    /// for non-BCI key formats.
    pub async fn find_trades_after_sequence_by_dimensions(
        &self,
        dimensions: &Dimensions,
        business_date: NaiveDate,
        basis: DateBasis,
        after_sequence: i64,
    ) -> Result<Vec<Trade>, sqlx::Error> {
        self.query_trades(None, Some(dimensions), business_date, basis, Some(after_sequence))
            .await
    }

    /// All trades for a position key on a business date, ascending by
    /// sequence number. Used for full-recalculation WAC.
    pub async fn find_trades_by_position_key_and_date(
        &self,
        position_key: &str,
        business_date: NaiveDate,
        basis: DateBasis,
    ) -> Result<Vec<Trade>, sqlx::Error> {
        self.query_trades(Some(position_key), None, business_date, basis, None)
            .await
    }

    /// Dimension-projection variant of
    /// [`Self::find_trades_by_position_key_and_date`].
    pub async fn find_trades_by_dimensions(
        &self,
        dimensions: &Dimensions,
        business_date: NaiveDate,
        basis: DateBasis,
    ) -> Result<Vec<Trade>, sqlx::Error> {
        self.query_trades(None, Some(dimensions), business_date, basis, None)
            .await
    }

    /// Full aggregate over the trades for (key, date, basis).
    ///
    /// Returns None when no trades match. Sums are folded in Rust to keep
    /// decimal precision; SQLite's SUM would go through REAL.
    pub async fn aggregate_metrics(
        &self,
        position_key: &str,
        business_date: NaiveDate,
        basis: DateBasis,
    ) -> Result<Option<TradeMetrics>, sqlx::Error> {
        let trades = self
            .find_trades_by_position_key_and_date(position_key, business_date, basis)
            .await?;
        Ok(fold_metrics(&trades))
    }

    /// Dimension-projection variant of [`Self::aggregate_metrics`].
    pub async fn aggregate_metrics_by_dimensions(
        &self,
        dimensions: &Dimensions,
        business_date: NaiveDate,
        basis: DateBasis,
    ) -> Result<Option<TradeMetrics>, sqlx::Error> {
        let trades = self
            .find_trades_by_dimensions(dimensions, business_date, basis)
            .await?;
        Ok(fold_metrics(&trades))
    }

    async fn query_trades(
        &self,
        position_key: Option<&str>,
        dimensions: Option<&Dimensions>,
        business_date: NaiveDate,
        basis: DateBasis,
        after_sequence: Option<i64>,
    ) -> Result<Vec<Trade>, sqlx::Error> {
        let (selector, binds) = trade_selector_clause(position_key, dimensions);
        let mut sql = format!(
            r#"
            SELECT sequence_num, book, counterparty, instrument, signed_quantity,
                   price, trade_time, trade_date, settlement_date, source, source_id
            FROM position_trades
            WHERE {} AND {} = ?
            "#,
            selector,
            trade_date_column(basis),
        );
        if after_sequence.is_some() {
            sql.push_str(" AND sequence_num > ?");
        }
        sql.push_str(" ORDER BY sequence_num ASC");

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        query = query.bind(business_date.to_string());
        if let Some(after) = after_sequence {
            query = query.bind(after);
        }

        let rows = query.fetch_all(self.pool()).await?;
        rows.iter().map(trade_from_row).collect()
    }
}

fn bind_trade_insert(
    trade: &Trade,
    processed_at: TimeMs,
) -> sqlx::query::Query<'_, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'_>> {
    sqlx::query(
        r#"
        INSERT INTO position_trades (
            sequence_num, position_key, trade_time, trade_date, settlement_date,
            book, counterparty, instrument, signed_quantity, price,
            source, source_id, processed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(sequence_num) DO NOTHING
        "#,
    )
    .bind(trade.sequence_num)
    .bind(trade.bci_key())
    .bind(trade.trade_time.as_i64())
    .bind(trade.trade_date.to_string())
    .bind(trade.settlement_date.to_string())
    .bind(&trade.book)
    .bind(&trade.counterparty)
    .bind(&trade.instrument)
    .bind(trade.signed_quantity)
    .bind(trade.price.to_canonical_string())
    .bind(&trade.source)
    .bind(&trade.source_id)
    .bind(processed_at.as_i64())
}

fn trade_from_row(row: &SqliteRow) -> Result<Trade, sqlx::Error> {
    let price_str: String = row.get("price");
    let trade_date_str: String = row.get("trade_date");
    let settlement_date_str: String = row.get("settlement_date");

    Ok(Trade {
        sequence_num: row.get("sequence_num"),
        book: row.get("book"),
        counterparty: row.get("counterparty"),
        instrument: row.get("instrument"),
        signed_quantity: row.get("signed_quantity"),
        price: decode_decimal(&price_str, "price")?,
        trade_time: TimeMs::new(row.get("trade_time")),
        trade_date: decode_date(&trade_date_str, "trade_date")?,
        settlement_date: decode_date(&settlement_date_str, "settlement_date")?,
        source: row.get("source"),
        source_id: row.get("source_id"),
    })
}

fn fold_metrics(trades: &[Trade]) -> Option<TradeMetrics> {
    if trades.is_empty() {
        return None;
    }
    let mut metrics = TradeMetrics::default();
    for trade in trades {
        metrics.apply_trade(
            trade.sequence_num,
            trade.signed_quantity,
            trade.price,
            trade.trade_time,
        );
    }
    Some(metrics)
}
