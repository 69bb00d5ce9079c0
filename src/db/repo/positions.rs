//! Position keys, snapshots, average prices, and snapshot history.

use crate::domain::{
    ChangeReason, DateBasis, Dimensions, PositionAveragePrice, PositionConfig, PositionKeyRow,
    PositionKeyUpsert, PositionSnapshot, PriceMethod, SnapshotHistoryEntry, TimeMs, WacMethodData,
};
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::{
    decode_date, decode_decimal, decode_enum, history_table, prices_table, snapshots_table,
    Repository,
};

impl Repository {
    // =========================================================================
    // Position keys
    // =========================================================================

    /// Insert or advance a position-key row atomically.
    ///
    /// On first sight the row is created with the trade's dates. On
    /// subsequent upserts the cached dates advance to
    /// `max(current, candidate)` and never regress. Either way the returned
    /// value carries the dates as they were *before* this upsert; the
    /// ingestion coordinator classifies late trades against them.
    pub async fn upsert_position_key(
        &self,
        position_key: &str,
        config: &PositionConfig,
        dimensions: &Dimensions,
        trade_date: NaiveDate,
        settlement_date: NaiveDate,
        sequence_num: i64,
        now: TimeMs,
    ) -> Result<PositionKeyUpsert, sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        let existing = sqlx::query(
            r#"
            SELECT position_id, last_trade_date, last_settlement_date
            FROM position_keys
            WHERE position_key = ? AND config_id = ?
            "#,
        )
        .bind(position_key)
        .bind(config.config_id)
        .fetch_optional(&mut *tx)
        .await?;

        let upsert = match existing {
            Some(row) => {
                let position_id: i64 = row.get("position_id");
                let prior_trade_str: String = row.get("last_trade_date");
                let prior_settlement_str: String = row.get("last_settlement_date");
                let prior_trade = decode_date(&prior_trade_str, "last_trade_date")?;
                let prior_settlement =
                    decode_date(&prior_settlement_str, "last_settlement_date")?;

                sqlx::query(
                    r#"
                    UPDATE position_keys
                    SET last_trade_date = ?, last_settlement_date = ?
                    WHERE position_id = ?
                    "#,
                )
                .bind(prior_trade.max(trade_date).to_string())
                .bind(prior_settlement.max(settlement_date).to_string())
                .bind(position_id)
                .execute(&mut *tx)
                .await?;

                PositionKeyUpsert {
                    position_id,
                    prior_last_trade_date: Some(prior_trade),
                    prior_last_settlement_date: Some(prior_settlement),
                }
            }
            None => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO position_keys (
                        position_key, config_id, config_type, config_name,
                        book, counterparty, instrument,
                        last_trade_date, last_settlement_date,
                        created_at, created_by_sequence
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(position_key)
                .bind(config.config_id)
                .bind(config.config_type.as_str())
                .bind(&config.name)
                .bind(dimensions.book.as_deref())
                .bind(dimensions.counterparty.as_deref())
                .bind(dimensions.instrument.as_deref())
                .bind(trade_date.to_string())
                .bind(settlement_date.to_string())
                .bind(now.as_i64())
                .bind(sequence_num)
                .execute(&mut *tx)
                .await?;

                PositionKeyUpsert {
                    position_id: result.last_insert_rowid(),
                    prior_last_trade_date: None,
                    prior_last_settlement_date: None,
                }
            }
        };

        tx.commit().await?;
        Ok(upsert)
    }

    /// The stored key row for a (positionKey, configId), if any.
    pub async fn find_position_key(
        &self,
        position_key: &str,
        config_id: i64,
    ) -> Result<Option<PositionKeyRow>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT position_id, position_key, config_id, config_type, config_name,
                   book, counterparty, instrument, last_trade_date,
                   last_settlement_date, created_at, created_by_sequence
            FROM position_keys
            WHERE position_key = ? AND config_id = ?
            "#,
        )
        .bind(position_key)
        .bind(config_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(|row| {
            let type_str: String = row.get("config_type");
            let trade_date_str: String = row.get("last_trade_date");
            let settlement_date_str: String = row.get("last_settlement_date");
            Ok(PositionKeyRow {
                position_id: row.get("position_id"),
                position_key: row.get("position_key"),
                config_id: row.get("config_id"),
                config_type: decode_enum(&type_str, "config_type")?,
                config_name: row.get("config_name"),
                book: row.get("book"),
                counterparty: row.get("counterparty"),
                instrument: row.get("instrument"),
                last_trade_date: decode_date(&trade_date_str, "last_trade_date")?,
                last_settlement_date: decode_date(&settlement_date_str, "last_settlement_date")?,
                created_at: TimeMs::new(row.get("created_at")),
                created_by_sequence: row.get("created_by_sequence"),
            })
        })
        .transpose()
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Current snapshot for a coordinate, if any.
    pub async fn find_snapshot(
        &self,
        position_key: &str,
        business_date: NaiveDate,
        basis: DateBasis,
    ) -> Result<Option<PositionSnapshot>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT position_key, business_date, net_quantity, gross_long, gross_short,
                   trade_count, total_notional, calculation_version, calculated_at,
                   calculation_method, calculation_request_id, last_sequence_num,
                   last_trade_time
            FROM {}
            WHERE position_key = ? AND business_date = ?
            "#,
            snapshots_table(basis),
        );

        let row = sqlx::query(&sql)
            .bind(position_key)
            .bind(business_date.to_string())
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(snapshot_from_row).transpose()
    }

    /// Ordered snapshot series for one position key.
    pub async fn find_snapshots_for_position(
        &self,
        position_key: &str,
        basis: DateBasis,
        from_date: Option<NaiveDate>,
        to_date: Option<NaiveDate>,
    ) -> Result<Vec<PositionSnapshot>, sqlx::Error> {
        let mut sql = format!(
            r#"
            SELECT position_key, business_date, net_quantity, gross_long, gross_short,
                   trade_count, total_notional, calculation_version, calculated_at,
                   calculation_method, calculation_request_id, last_sequence_num,
                   last_trade_time
            FROM {}
            WHERE position_key = ?
            "#,
            snapshots_table(basis),
        );
        if from_date.is_some() {
            sql.push_str(" AND business_date >= ?");
        }
        if to_date.is_some() {
            sql.push_str(" AND business_date <= ?");
        }
        sql.push_str(" ORDER BY business_date ASC");

        let mut query = sqlx::query(&sql).bind(position_key);
        if let Some(from) = from_date {
            query = query.bind(from.to_string());
        }
        if let Some(to) = to_date {
            query = query.bind(to.to_string());
        }

        let rows = query.fetch_all(self.pool()).await?;
        rows.iter().map(snapshot_from_row).collect()
    }

    /// Upsert the current snapshot and append its history row.
    ///
    /// One transaction covers the three effects: the open history row (if
    /// any) gets `superseded_at` set to the new snapshot's `calculated_at`,
    /// the current row is replaced with `calculation_version = prior + 1`
    /// (or inserted at version 1), and a new open history row is appended.
    ///
    /// Returns the version assigned to the new current row.
    pub async fn save_snapshot(
        &self,
        snapshot: &PositionSnapshot,
        basis: DateBasis,
        change_reason: ChangeReason,
    ) -> Result<i64, sqlx::Error> {
        let mut tx = self.pool().begin().await?;
        let version = save_snapshot_tx(&mut tx, snapshot, basis, change_reason).await?;
        tx.commit().await?;
        Ok(version)
    }

    /// Upsert an average price by coordinate. No price history is kept.
    pub async fn save_price(
        &self,
        price: &PositionAveragePrice,
        basis: DateBasis,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool().begin().await?;
        save_price_tx(&mut tx, price, price.calculation_version, basis).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Commit a snapshot together with its price rows in one transaction.
    ///
    /// This is the calculation engine's write path: snapshot, history, and
    /// prices land together or not at all. Prices take the version assigned
    /// to the snapshot.
    pub async fn save_snapshot_with_prices(
        &self,
        snapshot: &PositionSnapshot,
        prices: &[PositionAveragePrice],
        basis: DateBasis,
        change_reason: ChangeReason,
    ) -> Result<i64, sqlx::Error> {
        let mut tx = self.pool().begin().await?;
        let version = save_snapshot_tx(&mut tx, snapshot, basis, change_reason).await?;
        for price in prices {
            save_price_tx(&mut tx, price, version, basis).await?;
        }
        tx.commit().await?;
        Ok(version)
    }

    // =========================================================================
    // Average prices
    // =========================================================================

    /// Average price for a coordinate and method, if any.
    pub async fn find_price(
        &self,
        position_key: &str,
        business_date: NaiveDate,
        method: PriceMethod,
        basis: DateBasis,
    ) -> Result<Option<PositionAveragePrice>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT position_key, business_date, price_method, price, method_data,
                   calculation_version, calculated_at
            FROM {}
            WHERE position_key = ? AND business_date = ? AND price_method = ?
            "#,
            prices_table(basis),
        );

        let row = sqlx::query(&sql)
            .bind(position_key)
            .bind(business_date.to_string())
            .bind(method.as_str())
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(price_from_row).transpose()
    }

    /// All price rows belonging to one snapshot coordinate.
    pub async fn find_prices_for_snapshot(
        &self,
        position_key: &str,
        business_date: NaiveDate,
        basis: DateBasis,
    ) -> Result<Vec<PositionAveragePrice>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT position_key, business_date, price_method, price, method_data,
                   calculation_version, calculated_at
            FROM {}
            WHERE position_key = ? AND business_date = ?
            ORDER BY price_method ASC
            "#,
            prices_table(basis),
        );

        let rows = sqlx::query(&sql)
            .bind(position_key)
            .bind(business_date.to_string())
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(price_from_row).collect()
    }

    // =========================================================================
    // Snapshot history
    // =========================================================================

    /// History for a coordinate in ascending calculation version.
    pub async fn find_snapshot_history(
        &self,
        position_key: &str,
        business_date: NaiveDate,
        basis: DateBasis,
    ) -> Result<Vec<SnapshotHistoryEntry>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT history_id, position_key, business_date, net_quantity, gross_long,
                   gross_short, trade_count, total_notional, calculation_version,
                   calculated_at, superseded_at, change_reason, previous_net_quantity,
                   calculation_request_id, last_sequence_num, last_trade_time,
                   calculation_method
            FROM {}
            WHERE position_key = ? AND business_date = ?
            ORDER BY calculation_version ASC
            "#,
            history_table(basis),
        );

        let rows = sqlx::query(&sql)
            .bind(position_key)
            .bind(business_date.to_string())
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(history_from_row).collect()
    }
}

async fn save_snapshot_tx(
    tx: &mut SqliteConnection,
    snapshot: &PositionSnapshot,
    basis: DateBasis,
    change_reason: ChangeReason,
) -> Result<i64, sqlx::Error> {
    let select_sql = format!(
        "SELECT calculation_version, net_quantity FROM {} WHERE position_key = ? AND business_date = ?",
        snapshots_table(basis),
    );
    let prior = sqlx::query(&select_sql)
        .bind(&snapshot.position_key)
        .bind(snapshot.business_date.to_string())
        .fetch_optional(&mut *tx)
        .await?;
    let prior = prior.map(|row| {
        (
            row.get::<i64, _>("calculation_version"),
            row.get::<i64, _>("net_quantity"),
        )
    });

    let version = prior.map(|(v, _)| v + 1).unwrap_or(1);
    let previous_net_quantity = prior.map(|(_, net)| net);

    if prior.is_some() {
        let supersede_sql = format!(
            r#"
            UPDATE {}
            SET superseded_at = ?
            WHERE position_key = ? AND business_date = ? AND superseded_at IS NULL
            "#,
            history_table(basis),
        );
        sqlx::query(&supersede_sql)
            .bind(snapshot.calculated_at.as_i64())
            .bind(&snapshot.position_key)
            .bind(snapshot.business_date.to_string())
            .execute(&mut *tx)
            .await?;

        let update_sql = format!(
            r#"
            UPDATE {}
            SET net_quantity = ?, gross_long = ?, gross_short = ?, trade_count = ?,
                total_notional = ?, calculation_version = ?, calculated_at = ?,
                calculation_method = ?, calculation_request_id = ?,
                last_sequence_num = ?, last_trade_time = ?
            WHERE position_key = ? AND business_date = ?
            "#,
            snapshots_table(basis),
        );
        sqlx::query(&update_sql)
            .bind(snapshot.net_quantity)
            .bind(snapshot.gross_long)
            .bind(snapshot.gross_short)
            .bind(snapshot.trade_count)
            .bind(snapshot.total_notional.to_canonical_string())
            .bind(version)
            .bind(snapshot.calculated_at.as_i64())
            .bind(snapshot.calculation_method.as_str())
            .bind(&snapshot.calculation_request_id)
            .bind(snapshot.last_sequence_num)
            .bind(snapshot.last_trade_time.as_i64())
            .bind(&snapshot.position_key)
            .bind(snapshot.business_date.to_string())
            .execute(&mut *tx)
            .await?;
    } else {
        let insert_sql = format!(
            r#"
            INSERT INTO {} (
                position_key, business_date, net_quantity, gross_long, gross_short,
                trade_count, total_notional, calculation_version, calculated_at,
                calculation_method, calculation_request_id, last_sequence_num,
                last_trade_time
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            snapshots_table(basis),
        );
        sqlx::query(&insert_sql)
            .bind(&snapshot.position_key)
            .bind(snapshot.business_date.to_string())
            .bind(snapshot.net_quantity)
            .bind(snapshot.gross_long)
            .bind(snapshot.gross_short)
            .bind(snapshot.trade_count)
            .bind(snapshot.total_notional.to_canonical_string())
            .bind(version)
            .bind(snapshot.calculated_at.as_i64())
            .bind(snapshot.calculation_method.as_str())
            .bind(&snapshot.calculation_request_id)
            .bind(snapshot.last_sequence_num)
            .bind(snapshot.last_trade_time.as_i64())
            .execute(&mut *tx)
            .await?;
    }

    let history_sql = format!(
        r#"
        INSERT INTO {} (
            position_key, business_date, net_quantity, gross_long, gross_short,
            trade_count, total_notional, calculation_version, calculated_at,
            superseded_at, change_reason, previous_net_quantity,
            calculation_request_id, last_sequence_num, last_trade_time,
            calculation_method
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?, ?, ?, ?)
        "#,
        history_table(basis),
    );
    sqlx::query(&history_sql)
        .bind(&snapshot.position_key)
        .bind(snapshot.business_date.to_string())
        .bind(snapshot.net_quantity)
        .bind(snapshot.gross_long)
        .bind(snapshot.gross_short)
        .bind(snapshot.trade_count)
        .bind(snapshot.total_notional.to_canonical_string())
        .bind(version)
        .bind(snapshot.calculated_at.as_i64())
        .bind(change_reason.as_str())
        .bind(previous_net_quantity)
        .bind(&snapshot.calculation_request_id)
        .bind(snapshot.last_sequence_num)
        .bind(snapshot.last_trade_time.as_i64())
        .bind(snapshot.calculation_method.as_str())
        .execute(&mut *tx)
        .await?;

    Ok(version)
}

async fn save_price_tx(
    tx: &mut SqliteConnection,
    price: &PositionAveragePrice,
    version: i64,
    basis: DateBasis,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO {} (
            position_key, business_date, price_method, price, method_data,
            calculation_version, calculated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(position_key, business_date, price_method) DO UPDATE SET
            price = excluded.price,
            method_data = excluded.method_data,
            calculation_version = excluded.calculation_version,
            calculated_at = excluded.calculated_at
        "#,
        prices_table(basis),
    );

    let method_data = serde_json::to_string(&price.method_data)
        .expect("method data serialization cannot fail");

    sqlx::query(&sql)
        .bind(&price.position_key)
        .bind(price.business_date.to_string())
        .bind(price.price_method.as_str())
        .bind(price.price.to_canonical_string())
        .bind(method_data)
        .bind(version)
        .bind(price.calculated_at.as_i64())
        .execute(&mut *tx)
        .await?;

    Ok(())
}

fn snapshot_from_row(row: &SqliteRow) -> Result<PositionSnapshot, sqlx::Error> {
    let business_date_str: String = row.get("business_date");
    let total_notional_str: String = row.get("total_notional");
    let method_str: String = row.get("calculation_method");

    Ok(PositionSnapshot {
        position_key: row.get("position_key"),
        business_date: decode_date(&business_date_str, "business_date")?,
        net_quantity: row.get("net_quantity"),
        gross_long: row.get("gross_long"),
        gross_short: row.get("gross_short"),
        trade_count: row.get("trade_count"),
        total_notional: decode_decimal(&total_notional_str, "total_notional")?,
        calculation_version: row.get("calculation_version"),
        calculated_at: TimeMs::new(row.get("calculated_at")),
        calculation_method: decode_enum(&method_str, "calculation_method")?,
        calculation_request_id: row.get("calculation_request_id"),
        last_sequence_num: row.get("last_sequence_num"),
        last_trade_time: TimeMs::new(row.get("last_trade_time")),
    })
}

fn price_from_row(row: &SqliteRow) -> Result<PositionAveragePrice, sqlx::Error> {
    let business_date_str: String = row.get("business_date");
    let method_str: String = row.get("price_method");
    let price_str: String = row.get("price");
    let method_data_str: String = row.get("method_data");

    let method_data: WacMethodData =
        serde_json::from_str(&method_data_str).map_err(|e| sqlx::Error::ColumnDecode {
            index: "method_data".to_string(),
            source: Box::new(e),
        })?;

    Ok(PositionAveragePrice {
        position_key: row.get("position_key"),
        business_date: decode_date(&business_date_str, "business_date")?,
        price_method: decode_enum(&method_str, "price_method")?,
        price: decode_decimal(&price_str, "price")?,
        method_data,
        calculation_version: row.get("calculation_version"),
        calculated_at: TimeMs::new(row.get("calculated_at")),
    })
}

fn history_from_row(row: &SqliteRow) -> Result<SnapshotHistoryEntry, sqlx::Error> {
    let business_date_str: String = row.get("business_date");
    let total_notional_str: String = row.get("total_notional");
    let reason_str: String = row.get("change_reason");
    let method_str: String = row.get("calculation_method");

    Ok(SnapshotHistoryEntry {
        history_id: row.get("history_id"),
        position_key: row.get("position_key"),
        business_date: decode_date(&business_date_str, "business_date")?,
        net_quantity: row.get("net_quantity"),
        gross_long: row.get("gross_long"),
        gross_short: row.get("gross_short"),
        trade_count: row.get("trade_count"),
        total_notional: decode_decimal(&total_notional_str, "total_notional")?,
        calculation_version: row.get("calculation_version"),
        calculated_at: TimeMs::new(row.get("calculated_at")),
        superseded_at: row
            .get::<Option<i64>, _>("superseded_at")
            .map(TimeMs::new),
        change_reason: decode_enum(&reason_str, "change_reason")?,
        previous_net_quantity: row.get("previous_net_quantity"),
        calculation_request_id: row.get("calculation_request_id"),
        last_sequence_num: row.get("last_sequence_num"),
        last_trade_time: TimeMs::new(row.get("last_trade_time")),
        calculation_method: decode_enum(&method_str, "calculation_method")?,
    })
}
