//! Position config CRUD.

use crate::domain::{PositionConfig, PriceMethod, Scope, TimeMs};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

use super::{decode_enum, Repository};

impl Repository {
    /// All configs, active or not, by id.
    pub async fn find_all_configs(&self) -> Result<Vec<PositionConfig>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT config_id, config_type, name, key_format, price_methods, scope, active
            FROM position_configs
            ORDER BY config_id ASC
            "#,
        )
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(config_from_row).collect()
    }

    /// The active configuration set every trade is evaluated against.
    pub async fn find_active_configs(&self) -> Result<Vec<PositionConfig>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT config_id, config_type, name, key_format, price_methods, scope, active
            FROM position_configs
            WHERE active = 1
            ORDER BY config_id ASC
            "#,
        )
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(config_from_row).collect()
    }

    /// One config by id, if present.
    pub async fn find_config_by_id(
        &self,
        config_id: i64,
    ) -> Result<Option<PositionConfig>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT config_id, config_type, name, key_format, price_methods, scope, active
            FROM position_configs
            WHERE config_id = ?
            "#,
        )
        .bind(config_id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(config_from_row).transpose()
    }

    /// Insert a new config and return it with its assigned id.
    ///
    /// # Errors
    /// A duplicate (config_type, key_format, scope) surfaces as a unique
    /// constraint violation; callers map it to a client error.
    pub async fn create_config(
        &self,
        config: &PositionConfig,
        now: TimeMs,
    ) -> Result<PositionConfig, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO position_configs
                (config_type, name, key_format, price_methods, scope, active,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(config.config_type.as_str())
        .bind(&config.name)
        .bind(config.key_format.as_str())
        .bind(price_methods_to_column(&config.price_methods))
        .bind(config.scope.to_json())
        .bind(config.active)
        .bind(now.as_i64())
        .bind(now.as_i64())
        .execute(self.pool())
        .await?;

        let mut created = config.clone();
        created.config_id = result.last_insert_rowid();
        Ok(created)
    }

    /// Overwrite a config's mutable fields. Returns false when the id does
    /// not exist.
    pub async fn update_config(
        &self,
        config: &PositionConfig,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE position_configs
            SET config_type = ?, name = ?, key_format = ?, price_methods = ?,
                scope = ?, active = ?, updated_at = ?
            WHERE config_id = ?
            "#,
        )
        .bind(config.config_type.as_str())
        .bind(&config.name)
        .bind(config.key_format.as_str())
        .bind(price_methods_to_column(&config.price_methods))
        .bind(config.scope.to_json())
        .bind(config.active)
        .bind(now.as_i64())
        .bind(config.config_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a config inactive. Returns false when the id does not exist.
    pub async fn deactivate_config(
        &self,
        config_id: i64,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE position_configs SET active = 0, updated_at = ? WHERE config_id = ?",
        )
        .bind(now.as_i64())
        .bind(config_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn price_methods_to_column(methods: &[PriceMethod]) -> String {
    methods
        .iter()
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

fn price_methods_from_column(raw: &str) -> Result<Vec<PriceMethod>, sqlx::Error> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            PriceMethod::from_str(s.trim()).map_err(|e| sqlx::Error::ColumnDecode {
                index: "price_methods".to_string(),
                source: Box::new(e),
            })
        })
        .collect()
}

fn config_from_row(row: &SqliteRow) -> Result<PositionConfig, sqlx::Error> {
    let type_str: String = row.get("config_type");
    let format_str: String = row.get("key_format");
    let methods_str: String = row.get("price_methods");
    let scope_str: String = row.get("scope");

    let scope = Scope::from_json(&scope_str).map_err(|e| sqlx::Error::ColumnDecode {
        index: "scope".to_string(),
        source: Box::new(e),
    })?;

    Ok(PositionConfig {
        config_id: row.get("config_id"),
        config_type: decode_enum(&type_str, "config_type")?,
        name: row.get("name"),
        key_format: decode_enum(&format_str, "key_format")?,
        price_methods: price_methods_from_column(&methods_str)?,
        scope,
        active: row.get("active"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::domain::{ConfigType, KeyFormat, ScopeField};
    use tempfile::TempDir;

    async fn setup_test_db() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Repository::new(pool), temp_dir)
    }

    fn desk_config() -> PositionConfig {
        PositionConfig {
            config_id: 0,
            config_type: ConfigType::Desk,
            name: "EQ1 book view".to_string(),
            key_format: KeyFormat::BookInstrument,
            price_methods: vec![PriceMethod::Wac],
            scope: Scope::criteria([(ScopeField::Book, "EQ1".to_string())]),
            active: true,
        }
    }

    #[tokio::test]
    async fn test_seeded_official_config_is_active() {
        let (repo, _temp) = setup_test_db().await;
        let active = repo.find_active_configs().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].config_id, 1);
        assert_eq!(active[0].config_type, ConfigType::Official);
        assert_eq!(active[0].key_format, KeyFormat::BookCounterpartyInstrument);
        assert_eq!(active[0].price_methods, vec![PriceMethod::Wac]);
        assert_eq!(active[0].scope, Scope::All);
    }

    #[tokio::test]
    async fn test_create_and_find_config_roundtrip() {
        let (repo, _temp) = setup_test_db().await;
        let created = repo
            .create_config(&desk_config(), TimeMs::new(1000))
            .await
            .unwrap();
        assert!(created.config_id > 1);

        let found = repo
            .find_config_by_id(created.config_id)
            .await
            .unwrap()
            .expect("config expected");
        assert_eq!(found, created);
    }

    #[tokio::test]
    async fn test_duplicate_scope_tuple_rejected() {
        let (repo, _temp) = setup_test_db().await;
        repo.create_config(&desk_config(), TimeMs::new(1000))
            .await
            .unwrap();

        let err = repo
            .create_config(&desk_config(), TimeMs::new(2000))
            .await
            .unwrap_err();
        let is_unique = err
            .as_database_error()
            .map(|db| db.is_unique_violation())
            .unwrap_or(false);
        assert!(is_unique, "expected unique violation, got {err:?}");
    }

    #[tokio::test]
    async fn test_deactivate_removes_from_active_set() {
        let (repo, _temp) = setup_test_db().await;
        let created = repo
            .create_config(&desk_config(), TimeMs::new(1000))
            .await
            .unwrap();
        assert_eq!(repo.find_active_configs().await.unwrap().len(), 2);

        assert!(repo
            .deactivate_config(created.config_id, TimeMs::new(2000))
            .await
            .unwrap());
        let active = repo.find_active_configs().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].config_id, 1);

        // Unknown ids report false rather than erroring.
        assert!(!repo.deactivate_config(999, TimeMs::new(3000)).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_config_overwrites_fields() {
        let (repo, _temp) = setup_test_db().await;
        let mut created = repo
            .create_config(&desk_config(), TimeMs::new(1000))
            .await
            .unwrap();

        created.name = "EQ1 book view (renamed)".to_string();
        created.active = false;
        assert!(repo.update_config(&created, TimeMs::new(2000)).await.unwrap());

        let found = repo
            .find_config_by_id(created.config_id)
            .await
            .unwrap()
            .expect("config expected");
        assert_eq!(found.name, "EQ1 book view (renamed)");
        assert!(!found.active);
    }
}
