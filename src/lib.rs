pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod transport;

pub use cache::ConfigCache;
pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    ChangeReason, Clock, DateBasis, Decimal, KeyFormat, PositionCalcRequest, PriceMethod, Scope,
    SystemClock, TimeMs, Trade,
};
pub use engine::{CalcEngine, WacState};
pub use error::AppError;
pub use ingest::IngestionCoordinator;
