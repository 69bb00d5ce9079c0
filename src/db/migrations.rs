//! SQLite bootstrap for the position store.
//!
//! The store has a specific write topology: one ingest loop writing trade
//! batches, one calc worker per partition writing snapshot transactions,
//! and the query surface reading concurrently. WAL journaling lets those
//! readers proceed while a snapshot transaction is open, and
//! `synchronous = NORMAL` is sufficient durability because every derived
//! row is recomputable and an un-acked trade batch redelivers after a
//! crash.

use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use tracing::{info, warn};

/// Ingest loop + default four calc partitions + query handlers; a few
/// spare connections over that keeps the API from queueing behind workers.
const POOL_CONNECTIONS: u32 = 8;

/// Applied to every pooled connection, in order.
const CONNECTION_PRAGMAS: &[&str] = &[
    // The composite FK from average prices to snapshots only holds if
    // enforcement is on; SQLite leaves it off per connection.
    "PRAGMA foreign_keys = ON",
    // A snapshot save holds a write transaction across the supersede,
    // replace, and history statements; concurrent partitions wait out the
    // lock instead of surfacing SQLITE_BUSY.
    "PRAGMA busy_timeout = 5000",
    // Safe under WAL: a torn checkpoint loses only rows the trade log
    // will redeliver.
    "PRAGMA synchronous = NORMAL",
];

/// Open (creating if needed) the store at `db_path` and bring the schema
/// up to date.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    ensure_parent_dir(db_path);

    let pool = SqlitePoolOptions::new()
        .max_connections(POOL_CONNECTIONS)
        .after_connect(|conn, _meta| Box::pin(configure_connection(conn)))
        .connect(&format!("sqlite:{}?mode=rwc", db_path))
        .await?;

    apply_schema(&pool).await?;

    info!(db_path, "position store ready");
    Ok(pool)
}

fn ensure_parent_dir(db_path: &str) {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }
}

async fn configure_connection(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    // journal_mode answers with the mode actually in effect, so a
    // fallback (some filesystems cannot take WAL) shows up in the logs
    // instead of silently serializing readers behind writers.
    let row = sqlx::query("PRAGMA journal_mode = WAL")
        .fetch_one(&mut *conn)
        .await?;
    let journal_mode: String = row.get(0);
    if journal_mode != "wal" {
        warn!(journal_mode = %journal_mode, "WAL unavailable, readers will block on writes");
    }

    for pragma in CONNECTION_PRAGMAS {
        sqlx::query(pragma).execute(&mut *conn).await?;
    }

    Ok(())
}

/// Apply `schema.sql` one statement at a time.
///
/// Every statement in it is `IF NOT EXISTS` / `OR IGNORE`, so re-running
/// against an existing store is a no-op; there is no separate migration
/// ledger to maintain.
async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = include_str!("schema.sql")
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty());

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_db_creates_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();

        let pool = init_db(&db_path).await.expect("init_db failed");
        assert!(Path::new(&db_path).exists());

        let result: (i64,) = sqlx::query_as("SELECT 1")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        assert_eq!(result.0, 1);
    }

    #[tokio::test]
    async fn test_schema_creates_both_basis_tables() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");

        for table in [
            "position_configs",
            "position_keys",
            "position_trades",
            "position_snapshots",
            "position_snapshots_settled",
            "position_average_prices",
            "position_average_prices_settled",
            "position_snapshots_history",
            "position_snapshots_settled_history",
        ] {
            let result: (String,) = sqlx::query_as(
                "SELECT name FROM sqlite_master WHERE type='table' AND name = ?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap_or_else(|_| panic!("missing table {}", table));
            assert_eq!(result.0, table);
        }
    }

    #[tokio::test]
    async fn test_schema_reapply_is_noop_and_seed_stays_single() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");

        apply_schema(&pool)
            .await
            .expect("second schema application failed");

        let result: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM position_configs")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        assert_eq!(result.0, 1, "seed config must not duplicate");

        let seeded: (i64, String, String) = sqlx::query_as(
            "SELECT config_id, name, key_format FROM position_configs WHERE config_id = 1",
        )
        .fetch_one(&pool)
        .await
        .expect("seed row missing");
        assert_eq!(seeded.1, "Official Positions");
        assert_eq!(seeded.2, "BOOK_COUNTERPARTY_INSTRUMENT");
    }

    #[tokio::test]
    async fn test_pragmas_configured() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");

        let result: (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        assert_eq!(result.0, 1);

        let result: (i64,) = sqlx::query_as("PRAGMA busy_timeout")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        assert_eq!(result.0, 5000);

        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        // WAL is best-effort; some test filesystems fall back.
        assert!(
            matches!(result.0.as_str(), "wal" | "delete"),
            "unexpected journal_mode: {}",
            result.0
        );
    }
}
