use crate::api::AppState;
use crate::domain::{
    DateBasis, PositionAveragePrice, PositionSnapshot, SnapshotHistoryEntry,
};
use crate::error::AppError;
use axum::extract::{Query, State};
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotQuery {
    pub position_key: String,
    pub business_date: String,
    pub date_basis: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesQuery {
    pub position_key: String,
    pub date_basis: String,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDto {
    pub position_key: String,
    pub business_date: String,
    pub net_quantity: i64,
    pub gross_long: i64,
    pub gross_short: i64,
    pub trade_count: i64,
    pub total_notional: String,
    pub calculation_version: i64,
    pub calculated_at: i64,
    pub calculation_method: String,
    pub calculation_request_id: String,
    pub last_sequence_num: i64,
    pub last_trade_time: i64,
}

impl From<PositionSnapshot> for SnapshotDto {
    fn from(s: PositionSnapshot) -> Self {
        SnapshotDto {
            position_key: s.position_key,
            business_date: s.business_date.to_string(),
            net_quantity: s.net_quantity,
            gross_long: s.gross_long,
            gross_short: s.gross_short,
            trade_count: s.trade_count,
            total_notional: s.total_notional.to_canonical_string(),
            calculation_version: s.calculation_version,
            calculated_at: s.calculated_at.as_ms(),
            calculation_method: s.calculation_method.to_string(),
            calculation_request_id: s.calculation_request_id,
            last_sequence_num: s.last_sequence_num,
            last_trade_time: s.last_trade_time.as_ms(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceDto {
    pub position_key: String,
    pub business_date: String,
    pub price_method: String,
    pub price: String,
    pub total_cost_basis: String,
    pub last_updated_sequence: i64,
    pub calculation_version: i64,
    pub calculated_at: i64,
}

impl From<PositionAveragePrice> for PriceDto {
    fn from(p: PositionAveragePrice) -> Self {
        PriceDto {
            position_key: p.position_key,
            business_date: p.business_date.to_string(),
            price_method: p.price_method.to_string(),
            price: p.price.to_canonical_string(),
            total_cost_basis: p.method_data.total_cost_basis.to_canonical_string(),
            last_updated_sequence: p.method_data.last_updated_sequence,
            calculation_version: p.calculation_version,
            calculated_at: p.calculated_at.as_ms(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntryDto {
    pub calculation_version: i64,
    pub net_quantity: i64,
    pub gross_long: i64,
    pub gross_short: i64,
    pub trade_count: i64,
    pub total_notional: String,
    pub calculated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_at: Option<i64>,
    pub change_reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_net_quantity: Option<i64>,
    pub calculation_request_id: String,
    pub calculation_method: String,
}

impl From<SnapshotHistoryEntry> for HistoryEntryDto {
    fn from(h: SnapshotHistoryEntry) -> Self {
        HistoryEntryDto {
            calculation_version: h.calculation_version,
            net_quantity: h.net_quantity,
            gross_long: h.gross_long,
            gross_short: h.gross_short,
            trade_count: h.trade_count,
            total_notional: h.total_notional.to_canonical_string(),
            calculated_at: h.calculated_at.as_ms(),
            superseded_at: h.superseded_at.map(|t| t.as_ms()),
            change_reason: h.change_reason.to_string(),
            previous_net_quantity: h.previous_net_quantity,
            calculation_request_id: h.calculation_request_id,
            calculation_method: h.calculation_method.to_string(),
        }
    }
}

pub async fn get_snapshot(
    Query(params): Query<SnapshotQuery>,
    State(state): State<AppState>,
) -> Result<Json<SnapshotDto>, AppError> {
    let business_date = parse_date(&params.business_date)?;
    let basis = parse_basis(&params.date_basis)?;

    let snapshot = state
        .repo
        .find_snapshot(&params.position_key, business_date, basis)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "no snapshot for {} on {}",
                params.position_key, business_date
            ))
        })?;

    Ok(Json(snapshot.into()))
}

pub async fn get_series(
    Query(params): Query<SeriesQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<SnapshotDto>>, AppError> {
    let basis = parse_basis(&params.date_basis)?;
    let from_date = params.from_date.as_deref().map(parse_date).transpose()?;
    let to_date = params.to_date.as_deref().map(parse_date).transpose()?;
    if let (Some(from), Some(to)) = (from_date, to_date) {
        if from > to {
            return Err(AppError::BadRequest("fromDate must be <= toDate".into()));
        }
    }

    let snapshots = state
        .repo
        .find_snapshots_for_position(&params.position_key, basis, from_date, to_date)
        .await?;
    Ok(Json(snapshots.into_iter().map(Into::into).collect()))
}

pub async fn get_history(
    Query(params): Query<SnapshotQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<HistoryEntryDto>>, AppError> {
    let business_date = parse_date(&params.business_date)?;
    let basis = parse_basis(&params.date_basis)?;

    let history = state
        .repo
        .find_snapshot_history(&params.position_key, business_date, basis)
        .await?;
    Ok(Json(history.into_iter().map(Into::into).collect()))
}

pub async fn get_prices(
    Query(params): Query<SnapshotQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<PriceDto>>, AppError> {
    let business_date = parse_date(&params.business_date)?;
    let basis = parse_basis(&params.date_basis)?;

    let prices = state
        .repo
        .find_prices_for_snapshot(&params.position_key, business_date, basis)
        .await?;
    Ok(Json(prices.into_iter().map(Into::into).collect()))
}

fn parse_date(raw: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::from_str(raw)
        .map_err(|_| AppError::BadRequest(format!("invalid date: {}", raw)))
}

fn parse_basis(raw: &str) -> Result<DateBasis, AppError> {
    DateBasis::from_str(raw)
        .map_err(|_| AppError::BadRequest(format!("invalid dateBasis: {}", raw)))
}
