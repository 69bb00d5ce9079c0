//! Domain types and determinism layer for the position keeper.
//!
//! This module provides:
//! - Lossless numeric handling via the Decimal wrapper
//! - Domain primitives: TimeMs, calendar-date conventions, injected Clock
//! - Trade, config, snapshot, and price types with canonical JSON forms
//! - The finite tagged enumerations shared by wire messages and storage

pub mod calc_request;
pub mod clock;
pub mod decimal;
pub mod enums;
pub mod position;
pub mod primitives;
pub mod scope;
pub mod trade;

pub use calc_request::PositionCalcRequest;
pub use clock::{Clock, ManualClock, SystemClock};
pub use decimal::Decimal;
pub use enums::{
    CalculationMethod, ChangeReason, ConfigType, DateBasis, Dimensions, KeyFormat, KeyParseError,
    PriceMethod, ScopeField, UnknownEnumValue,
};
pub use position::{
    PositionAveragePrice, PositionConfig, PositionKeyRow, PositionKeyUpsert, PositionSnapshot,
    SnapshotHistoryEntry, TradeMetrics, WacMethodData,
};
pub use primitives::TimeMs;
pub use scope::Scope;
pub use trade::{Trade, TradeConstraintError};
