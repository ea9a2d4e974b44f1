use crate::api::{handlers, AppState};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Build the main API router
pub fn build_router(state: AppState) -> Router {
    let train_body_limit = DefaultBodyLimit::max(state.max_body_bytes);

    Router::new()
        // Health and metrics
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        // Predictions
        .route("/predict/waiting-time", post(handlers::predict_waiting_time))
        .route("/predict/queue-length", post(handlers::predict_queue_length))
        .route("/predict/no-show", post(handlers::predict_no_show))
        .route("/predict/peak-hours", post(handlers::predict_peak_hours))
        .route("/predict/peak-hours/daily", post(handlers::predict_daily_peaks))
        .route("/suggest/best-time", post(handlers::suggest_best_time))
        // Training
        .route("/train", post(handlers::train).layer(train_body_limit))
        // Add state
        .with_state(state)
        // Add middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
}
