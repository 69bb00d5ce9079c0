use crate::api::AppState;
use crate::domain::{ConfigType, KeyFormat, PositionConfig, PriceMethod, Scope};
use crate::error::AppError;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigBody {
    pub config_type: ConfigType,
    pub name: String,
    pub key_format: KeyFormat,
    pub price_methods: Vec<PriceMethod>,
    pub scope: Scope,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl ConfigBody {
    fn into_config(self, config_id: i64) -> Result<PositionConfig, AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::BadRequest("name must not be empty".into()));
        }
        if self.price_methods.is_empty() {
            return Err(AppError::BadRequest(
                "at least one price method is required".into(),
            ));
        }
        Ok(PositionConfig {
            config_id,
            config_type: self.config_type,
            name: self.name,
            key_format: self.key_format,
            price_methods: self.price_methods,
            scope: self.scope,
            active: self.active,
        })
    }
}

pub async fn list_configs(
    State(state): State<AppState>,
) -> Result<Json<Vec<PositionConfig>>, AppError> {
    Ok(Json(state.repo.find_all_configs().await?))
}

pub async fn get_config(
    Path(config_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<PositionConfig>, AppError> {
    let config = state
        .repo
        .find_config_by_id(config_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no config with id {}", config_id)))?;
    Ok(Json(config))
}

pub async fn create_config(
    State(state): State<AppState>,
    Json(body): Json<ConfigBody>,
) -> Result<Json<PositionConfig>, AppError> {
    let config = body.into_config(0)?;
    let created = state.repo.create_config(&config, state.clock.now()).await?;
    state.config_cache.invalidate().await;
    Ok(Json(created))
}

pub async fn update_config(
    Path(config_id): Path<i64>,
    State(state): State<AppState>,
    Json(body): Json<ConfigBody>,
) -> Result<Json<PositionConfig>, AppError> {
    let config = body.into_config(config_id)?;
    let updated = state.repo.update_config(&config, state.clock.now()).await?;
    if !updated {
        return Err(AppError::NotFound(format!("no config with id {}", config_id)));
    }
    state.config_cache.invalidate().await;
    Ok(Json(config))
}

pub async fn deactivate_config(
    Path(config_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let deactivated = state
        .repo
        .deactivate_config(config_id, state.clock.now())
        .await?;
    if !deactivated {
        return Err(AppError::NotFound(format!("no config with id {}", config_id)));
    }
    state.config_cache.invalidate().await;
    Ok(Json(serde_json::json!({ "configId": config_id, "active": false })))
}
