//! HTTP transport over the inference engine.
//!
//! Routes:
//! - `GET /health`
//! - `POST /predict` with a flat raw-transaction object, answers `{"score", "label"}`
//! - `POST /explain[?k=n]`, answers the top attributions
//! - `GET /metrics`, a JSON snapshot of [`PipelineMetrics`]

use crate::error::ScoringError;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::models::InferenceEngine;
use crate::types::{Contribution, Decision, RawTransaction};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Semaphore, SemaphorePermit};
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Shared state accessible by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<InferenceEngine>,
    pub metrics: Arc<PipelineMetrics>,
    /// Bounds the number of requests inside the pipeline at once
    pub permits: Arc<Semaphore>,
}

impl AppState {
    pub fn new(
        engine: Arc<InferenceEngine>,
        metrics: Arc<PipelineMetrics>,
        max_concurrent_requests: usize,
    ) -> Self {
        Self {
            engine,
            metrics,
            permits: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
        }
    }

    async fn permit(&self) -> Result<SemaphorePermit<'_>, ApiError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| ApiError::Internal("request limiter closed".to_string()))
    }
}

/// Build the router with all routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/predict", post(predict))
        .route("/explain", post(explain))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handler failure rendered as `{"error": .., "status": ..}`.
#[derive(Debug)]
pub enum ApiError {
    Scoring(ScoringError),
    Internal(String),
}

impl From<ScoringError> for ApiError {
    fn from(err: ScoringError) -> Self {
        ApiError::Scoring(err)
    }
}

/// HTTP status for a core error.
pub fn status_for(err: &ScoringError) -> StatusCode {
    match err {
        ScoringError::InvalidInputType { .. } | ScoringError::SingleRowRequired { .. } => {
            StatusCode::BAD_REQUEST
        }
        ScoringError::ContractViolation { .. }
        | ScoringError::MissingFeature { .. }
        | ScoringError::MissingMetaFeature { .. }
        | ScoringError::MetaFeatureOrder { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Scoring(err) => (status_for(&err), err.to_string()),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        let body = json!({ "error": message, "status": status.as_u16() });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ExplainParams {
    pub k: Option<usize>,
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn predict(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Decision>, ApiError> {
    let raw = parse_body(&state, body)?;
    let _permit = state.permit().await?;

    let start = Instant::now();
    let decision = state
        .engine
        .predict(&raw)
        .map_err(|err| reject(&state, "/predict", err))?;
    state.metrics.record_decision(start.elapsed(), &decision);

    Ok(Json(decision))
}

async fn explain(
    State(state): State<AppState>,
    Query(params): Query<ExplainParams>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Vec<Contribution>>, ApiError> {
    let raw = parse_body(&state, body)?;
    let _permit = state.permit().await?;

    let k = params.k.unwrap_or(state.engine.top_k());
    let explanation = state
        .engine
        .explain(&raw, k)
        .map_err(|err| reject(&state, "/explain", err))?;

    Ok(Json(explanation.contributions))
}

fn parse_body(
    state: &AppState,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<RawTransaction, ApiError> {
    let parsed = match body {
        Ok(Json(Value::Array(rows))) => match rows.as_slice() {
            [row] => RawTransaction::from_json_value(row),
            _ => Err(ScoringError::SingleRowRequired { rows: rows.len() }),
        },
        Ok(Json(value)) => RawTransaction::from_json_value(&value),
        Err(rejection) => Err(ScoringError::invalid_input("<body>", rejection.body_text())),
    };
    parsed.map_err(|err| reject(state, "body", err))
}

fn reject(state: &AppState, stage: &str, err: ScoringError) -> ApiError {
    warn!(stage, kind = err.kind(), error = %err, "Request rejected");
    state.metrics.record_rejection(&err);
    ApiError::Scoring(err)
}
