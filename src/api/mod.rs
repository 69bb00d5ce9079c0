//! HTTP query surface and config CRUD.

pub mod configs;
pub mod health;
pub mod positions;

use crate::cache::ConfigCache;
use crate::db::Repository;
use crate::domain::Clock;
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub config_cache: Arc<ConfigCache>,
    pub clock: Arc<dyn Clock>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/positions/snapshot", get(positions::get_snapshot))
        .route("/positions/series", get(positions::get_series))
        .route("/positions/history", get(positions::get_history))
        .route("/positions/prices", get(positions::get_prices))
        .route("/configs", get(configs::list_configs))
        .route("/configs", post(configs::create_config))
        .route("/configs/:id", get(configs::get_config))
        .route("/configs/:id", put(configs::update_config))
        .route("/configs/:id", axum::routing::delete(configs::deactivate_config))
        .with_state(state)
}
