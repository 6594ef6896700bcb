use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::{IngestStats, QueryHandle};
use crate::record::{Level, Record};
use crate::storage::RecordFilter;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 10_000;

#[derive(Clone)]
pub struct AppState {
    pub handle: QueryHandle,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub level: Option<String>,
    pub min_level: Option<String>,
    pub source: Option<String>,
    /// Case-insensitive substring of the message
    pub search: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub annotation: Option<String>,
    pub after_id: Option<u64>,
    pub limit: Option<usize>,
}

impl LogsQuery {
    fn to_filter(&self, limit: Option<usize>) -> Result<RecordFilter, ApiError> {
        Ok(RecordFilter {
            since: self.since,
            until: self.until,
            level: parse_level("level", self.level.as_deref())?,
            min_level: parse_level("min_level", self.min_level.as_deref())?,
            source: self.source.clone(),
            contains: self.search.clone().filter(|s| !s.is_empty()),
            annotation: self.annotation.clone(),
            after_id: self.after_id,
            limit,
        })
    }
}

fn parse_level(field: &str, value: Option<&str>) -> Result<Option<Level>, ApiError> {
    value
        .map(|v| {
            v.parse::<Level>()
                .map_err(|e| ApiError::BadRequest(format!("{}: {}", field, e)))
        })
        .transpose()
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<Record>,
    pub count: usize,
    /// Highest id in this page; pass back as `after_id` to poll for newer records.
    pub last_id: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub total: usize,
    pub matching: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub backend: &'static str,
    pub stored: usize,
    pub ingest: IngestStats,
}

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

/// GET /api/logs
pub async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let filter = query.to_filter(Some(limit))?;

    let logs = state
        .handle
        .query(&filter)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    Ok(Json(LogsResponse {
        count: logs.len(),
        last_id: logs.last().map(|r| r.id),
        logs,
    }))
}

/// GET /api/logs/count
pub async fn count_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<CountResponse>, ApiError> {
    let filter = query.to_filter(None)?;

    let total = state
        .handle
        .count()
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    let matching = if filter == RecordFilter::all() {
        total
    } else {
        state
            .handle
            .query(&filter)
            .await
            .map_err(|e| ApiError::InternalError(e.to_string()))?
            .len()
    };

    Ok(Json(CountResponse { total, matching }))
}

/// GET /api/stats
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let stored = state
        .handle
        .count()
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    Ok(Json(StatsResponse {
        backend: state.handle.backend_name(),
        stored,
        ingest: state.handle.stats().await,
    }))
}

// Error handling
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
