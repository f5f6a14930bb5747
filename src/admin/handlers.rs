//! Admin API handlers: health and the request-log audit trail.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::audit::event::RequestLogRecord;
use crate::audit::processor::ProcessorState;
use crate::audit::store::{Page, RequestLogFilter};
use crate::http::error::ApiError;
use crate::http::server::AppState;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;
const NOT_FOUND: &str = "Request log not found";

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub channel_connected: bool,
    pub processor: ProcessorState,
    pub consuming: bool,
}

pub async fn get_health(State(state): State<AppState>) -> Json<HealthStatus> {
    let channel_connected = state.channel.is_connected();
    let consuming = state.processor.is_consuming();
    let status = if channel_connected && consuming {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthStatus {
        status,
        version: env!("CARGO_PKG_VERSION"),
        channel_connected,
        processor: state.processor.state(),
        consuming,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct FilterParams {
    pub method: Option<String>,
    pub status_code: Option<i32>,
    pub path: Option<String>,
    pub ip: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
    pub method: Option<String>,
    pub status_code: Option<i32>,
    pub path: Option<String>,
    pub ip: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// RFC 3339, or a naive ISO timestamp taken as UTC.
fn parse_date(field: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>, ApiError> {
    let Some(raw) = non_empty(value) else {
        return Ok(None);
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(naive.and_utc()))
        .map_err(|_| ApiError::Validation(format!("{} must be an ISO 8601 timestamp", field)))
}

impl FilterParams {
    fn into_filter(self) -> Result<RequestLogFilter, ApiError> {
        Ok(RequestLogFilter {
            method: non_empty(self.method),
            status_code: self.status_code,
            path: non_empty(self.path),
            ip: non_empty(self.ip),
            start_date: parse_date("start_date", self.start_date)?,
            end_date: parse_date("end_date", self.end_date)?,
        })
    }
}

impl ListParams {
    fn split(self) -> (PageParams, FilterParams) {
        (
            PageParams {
                skip: self.skip,
                limit: self.limit,
            },
            FilterParams {
                method: self.method,
                status_code: self.status_code,
                path: self.path,
                ip: self.ip,
                start_date: self.start_date,
                end_date: self.end_date,
            },
        )
    }
}

impl PageParams {
    fn into_page(self) -> Result<Page, ApiError> {
        let skip = self.skip.unwrap_or(0);
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if skip < 0 {
            return Err(ApiError::Validation("skip must be greater than or equal to 0".into()));
        }
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(ApiError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_LIMIT
            )));
        }
        Ok(Page {
            skip: skip as u64,
            limit: limit as u64,
        })
    }
}

fn query<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    params
        .map(|Query(inner)| inner)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound(NOT_FOUND))
}

pub async fn list_request_logs(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Vec<RequestLogRecord>>, ApiError> {
    let (page, filter) = query(params)?.split();
    let page = page.into_page()?;
    let filter = filter.into_filter()?;

    let records = state.store.list(&filter, page).await?;
    Ok(Json(records))
}

pub async fn count_request_logs(
    State(state): State<AppState>,
    params: Result<Query<FilterParams>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let filter = query(params)?.into_filter()?;
    let count = state.store.count(&filter).await?;
    Ok(Json(json!({ "count": count })))
}

pub async fn get_request_log(
    State(state): State<AppState>,
    Path(log_id): Path<String>,
) -> Result<Json<RequestLogRecord>, ApiError> {
    let id = parse_id(&log_id)?;
    state
        .store
        .get(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound(NOT_FOUND))
}

pub async fn list_request_logs_by_resource(
    State(state): State<AppState>,
    Path(resource_id): Path<String>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<Vec<RequestLogRecord>>, ApiError> {
    let page = query(params)?.into_page()?;
    let records = state.store.list_by_resource(&resource_id, page).await?;
    Ok(Json(records))
}

pub async fn delete_request_log(
    State(state): State<AppState>,
    Path(log_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(&log_id)?;
    if !state.store.delete(id).await? {
        return Err(ApiError::NotFound(NOT_FOUND));
    }
    tracing::info!(id = %id, "Deleted request log");
    Ok(Json(json!({ "message": "Request log deleted successfully" })))
}
