//! # API Handlers
//!
//! The Elasticsearch-shaped search endpoint plus the sidecar's own
//! translate and status endpoints.

use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use kq_core::AggError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::Instrument;

pub type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

pub fn status_of(err: &AggError) -> StatusCode {
    match err {
        AggError::NoTables(_) => StatusCode::NOT_FOUND,
        AggError::Catalog(_) | AggError::Execution { .. } => StatusCode::BAD_GATEWAY,
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(err: AggError) -> (StatusCode, String) {
    let status = status_of(&err);
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    } else {
        tracing::warn!(error = %err, "request rejected");
    }
    (status, err.to_string())
}

// =============================================================================
// Search
// =============================================================================

pub async fn search(
    State(state): State<Arc<AppState>>,
    Path(index): Path<String>,
    body: Option<Json<Value>>,
) -> ApiResult<Value> {
    let request = body.map(|Json(v)| v).unwrap_or_else(|| Value::Object(Default::default()));
    let span = tracing::info_span!("search", id = %uuid::Uuid::new_v4(), target = %index);
    async move {
        let response = state.engine.search(&index, &request).await.map_err(reject)?;
        tracing::info!(took = %response["took"], total = %response["hits"]["total"], "search answered");
        Ok(Json(response))
    }
    .instrument(span)
    .await
}

// =============================================================================
// Translate
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub index: String,
    #[serde(default)]
    pub body: Value,
}

#[derive(Debug, Serialize)]
pub struct TranslateResponse {
    pub index: String,
    pub tables: Vec<Value>,
}

pub async fn translate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TranslateRequest>,
) -> ApiResult<TranslateResponse> {
    let body = if req.body.is_null() {
        Value::Object(Default::default())
    } else {
        req.body
    };
    let plans = state.engine.translate(&req.index, &body).await.map_err(reject)?;
    Ok(Json(TranslateResponse {
        index: req.index,
        tables: plans.iter().map(|p| p.summary()).collect(),
    }))
}

// =============================================================================
// Status
// =============================================================================

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub started_at: String,
    pub uptime_seconds: u64,
    pub daemon_url: String,
    pub count_alias: String,
    pub max_gap_buckets: usize,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    let settings = state.engine.settings();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at.to_rfc3339(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        daemon_url: state.config.daemon.url.clone(),
        count_alias: settings.count_alias.clone(),
        max_gap_buckets: settings.max_gap_buckets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kq_core::FilterError;

    #[test]
    fn test_error_statuses() {
        assert_eq!(status_of(&AggError::NoTables("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(&AggError::Execution {
                table: "t".into(),
                message: "boom".into()
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(status_of(&AggError::Catalog("down".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_of(&AggError::MalformedRequest("not an object".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(&AggError::UnsupportedQuery(FilterError::Unsupported("geo_shape".into()))),
            StatusCode::BAD_REQUEST
        );
    }
}
