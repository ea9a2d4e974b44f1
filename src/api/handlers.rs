use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::ml::models::round_to;
use crate::ml::{
    DailyPeakProfile, FeatureContext, Metric, PeakDensity, TimeSuggestion, TrainingScore,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};
use validator::Validate;

type JsonBody<T> = std::result::Result<Json<T>, JsonRejection>;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "ML service is running".to_string(),
        trained: state.forecaster.is_trained(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub trained: bool,
}

/// Prometheus exposition endpoint
pub async fn prometheus_metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}

/// Run one prediction on the blocking pool; a panicked task still yields the fallback
async fn predict_blocking(state: &AppState, metric: Metric, context: FeatureContext) -> f64 {
    let forecaster = state.forecaster.clone();
    let task_context = context.clone();
    tokio::task::spawn_blocking(move || forecaster.predict(metric, &task_context))
        .await
        .unwrap_or_else(|e| {
            warn!(metric = %metric, error = %e, "Prediction task failed");
            metric.fallback(&context)
        })
}

fn context_from(body: JsonBody<Value>) -> Result<FeatureContext> {
    let Json(body) = body?;
    Ok(FeatureContext::from_json_lenient(&body))
}

/// Predict the waiting time for a newcomer
pub async fn predict_waiting_time(
    State(state): State<AppState>,
    body: JsonBody<Value>,
) -> Result<Json<WaitingTimeResponse>> {
    let context = context_from(body)?;
    let waiting_time = predict_blocking(&state, Metric::WaitingTime, context).await;

    Ok(Json(WaitingTimeResponse {
        waiting_time,
        unit: "minutes".to_string(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingTimeResponse {
    pub waiting_time: f64,
    pub unit: String,
}

/// Predict how many people will be waiting
pub async fn predict_queue_length(
    State(state): State<AppState>,
    body: JsonBody<Value>,
) -> Result<Json<QueueLengthResponse>> {
    let context = context_from(body)?;
    let queue_length = predict_blocking(&state, Metric::QueueLength, context).await as u32;

    Ok(Json(QueueLengthResponse { queue_length }))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueLengthResponse {
    pub queue_length: u32,
}

/// Predict the probability that a ticket holder does not show up
pub async fn predict_no_show(
    State(state): State<AppState>,
    body: JsonBody<Value>,
) -> Result<Json<NoShowResponse>> {
    let context = context_from(body)?;
    let probability = predict_blocking(&state, Metric::NoShow, context).await;

    Ok(Json(NoShowResponse {
        no_show_probability: probability,
        percentage: round_to(probability * 100.0, 1),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoShowResponse {
    pub no_show_probability: f64,
    pub percentage: f64,
}

/// Predict the queue density for one hour
pub async fn predict_peak_hours(
    State(state): State<AppState>,
    body: JsonBody<Value>,
) -> Result<Json<PeakDensity>> {
    let context = context_from(body)?;
    let density = predict_blocking(&state, Metric::PeakHours, context).await;

    Ok(Json(PeakDensity::new(density)))
}

/// Predict the density at the requested hour and across opening hours
pub async fn predict_daily_peaks(
    State(state): State<AppState>,
    body: JsonBody<Value>,
) -> Result<Json<DailyPeakProfile>> {
    let context = context_from(body)?;
    let forecaster = state.forecaster.clone();

    let profile = tokio::task::spawn_blocking(move || forecaster.daily_peak_profile(&context))
        .await
        .map_err(|e| AppError::Internal(format!("Daily profile task failed: {}", e)))?;

    Ok(Json(profile))
}

/// Suggest the three least-crowded hours to visit.
///
/// `service` and `dayOfWeek` are read as model features, so odd values still
/// yield three suggestions.
pub async fn suggest_best_time(
    State(state): State<AppState>,
    body: JsonBody<Value>,
) -> Result<Json<SuggestResponse>> {
    let FeatureContext {
        service,
        day_of_week,
        ..
    } = context_from(body)?;

    let forecaster = state.forecaster.clone();
    let suggestions = tokio::task::spawn_blocking(move || {
        forecaster.suggest_best_time(service.as_deref(), day_of_week)
    })
    .await
    .unwrap_or_else(|e| {
        warn!(error = %e, "Suggestion task failed");
        TimeSuggestion::defaults()
    });

    Ok(Json(SuggestResponse { suggestions }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuggestResponse {
    pub suggestions: Vec<TimeSuggestion>,
}

/// Retrain every model on the submitted records
pub async fn train(
    State(state): State<AppState>,
    body: JsonBody<TrainRequest>,
) -> Result<Json<TrainResponse>> {
    let Json(request) = body?;
    request.validate()?;

    info!(records = request.data.len(), "Training requested");

    let forecaster = state.forecaster.clone();
    let summary = tokio::task::spawn_blocking(move || forecaster.train(&request.data))
        .await
        .map_err(|e| AppError::Internal(format!("Training task failed: {}", e)))??;

    Ok(Json(TrainResponse {
        message: "Models trained successfully".to_string(),
        results: summary.results,
        synthetic: summary.synthetic,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct TrainRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "No training data provided"))]
    pub data: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrainResponse {
    pub message: String,
    pub results: BTreeMap<Metric, TrainingScore>,
    pub synthetic: bool,
}
