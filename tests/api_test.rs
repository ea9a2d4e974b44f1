//! HTTP API tests
//!
//! Drive the axum router in-process with `tower::ServiceExt::oneshot`.

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use queue_forecast::{
    api::{build_router, AppState},
    ml::Forecaster,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

fn app(dir: &TempDir) -> Router {
    let forecaster = Arc::new(Forecaster::new(common::test_config(dir.path())));
    build_router(AppState::new(forecaster))
}

fn app_with_body_limit(dir: &TempDir, max_body_bytes: usize) -> Router {
    let forecaster = Arc::new(Forecaster::new(common::test_config(dir.path())));
    build_router(AppState::new(forecaster).with_body_limit(max_body_bytes))
}

fn artifact_bytes(dir: &TempDir) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<(String, Vec<u8>)> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| {
            let path = entry.unwrap().path();
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            (name, std::fs::read(&path).unwrap())
        })
        .collect();
    files.sort();
    files
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<String>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(body) => {
            request = request.header("content-type", "application/json");
            Body::from(body)
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, "POST", uri, Some(body.to_string())).await
}

async fn train(app: &Router, n: usize) -> (StatusCode, Value) {
    post_json(app, "/train", json!({ "data": common::sample_records(n) })).await
}

#[tokio::test]
async fn test_health_before_training() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ML service is running");
    assert_eq!(body["trained"], false);
}

#[tokio::test]
async fn test_fallback_predictions_without_models() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);

    let (status, body) =
        post_json(&app, "/predict/waiting-time", json!({"positionInQueue": 5})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"waitingTime": 10.0, "unit": "minutes"}));

    let (_, body) = post_json(&app, "/predict/queue-length", json!({})).await;
    assert_eq!(body, json!({"queueLength": 10}));

    let (_, body) = post_json(&app, "/predict/no-show", json!({})).await;
    assert_eq!(body, json!({"noShowProbability": 0.15, "percentage": 15.0}));

    let (_, body) = post_json(&app, "/predict/peak-hours", json!({})).await;
    assert_eq!(body, json!({"queueDensity": 20.0, "isPeak": false}));
}

#[tokio::test]
async fn test_malformed_json_is_rejected() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);

    for uri in ["/predict/waiting-time", "/suggest/best-time", "/train"] {
        let (status, body) = send(&app, "POST", uri, Some("{not json".to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["error"]["code"], "INVALID_BODY");
    }
}

#[tokio::test]
async fn test_non_object_prediction_body_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);

    let (status, body) = post_json(&app, "/predict/waiting-time", json!([1, 2, 3])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["waitingTime"], 0.0);
}

#[tokio::test]
async fn test_train_rejects_empty_data() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);

    let (status, body) = post_json(&app, "/train", json!({"data": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("No training data provided"));

    let (status, _) = post_json(&app, "/train", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_empty_train_keeps_existing_artifacts() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);

    let (status, _) = train(&app, 30).await;
    assert_eq!(status, StatusCode::OK);
    let before = artifact_bytes(&dir);
    assert_eq!(before.len(), 5);

    let (status, _) = post_json(&app, "/train", json!({"data": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(artifact_bytes(&dir), before);
}

#[tokio::test]
async fn test_train_accepts_batches_over_two_megabytes() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);

    let notes = "x".repeat(64 * 1024);
    let records: Vec<Value> = common::sample_records(40)
        .into_iter()
        .map(|mut record| {
            record["notes"] = json!(notes);
            record
        })
        .collect();
    let body = json!({ "data": records }).to_string();
    assert!(body.len() > 2 * 1024 * 1024);

    let (status, body) = send(&app, "POST", "/train", Some(body)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["synthetic"], false);
}

#[tokio::test]
async fn test_train_over_body_limit_is_rejected() {
    let dir = TempDir::new().unwrap();
    let app = app_with_body_limit(&dir, 1024);

    let (status, body) = train(&app, 40).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"]["code"], "PAYLOAD_TOO_LARGE");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_train_then_predict() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);

    let (status, body) = train(&app, 50).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Models trained successfully");
    assert_eq!(body["synthetic"], false);
    for key in ["waitingTime", "queueLength", "noShow", "peakHours"] {
        assert!(body["results"][key]["score"].is_number(), "{key}");
    }

    let (_, health) = send(&app, "GET", "/health", None).await;
    assert_eq!(health["trained"], true);

    let request = json!({
        "service": "General",
        "joinedAt": "2024-03-13T10:15:00Z",
        "positionInQueue": 4,
    });

    let (_, body) = post_json(&app, "/predict/no-show", request.clone()).await;
    let probability = body["noShowProbability"].as_f64().unwrap();
    let percentage = body["percentage"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&probability));
    assert_eq!(percentage, (probability * 1000.0).round() / 10.0);

    let (_, body) = post_json(&app, "/predict/peak-hours", request.clone()).await;
    let density = body["queueDensity"].as_f64().unwrap();
    assert_eq!(body["isPeak"], density > 25.0);

    let (_, first) = post_json(&app, "/predict/waiting-time", request.clone()).await;
    let (_, second) = post_json(&app, "/predict/waiting-time", request).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_small_batch_reports_synthetic_training() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);

    let (status, body) = train(&app, 4).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["synthetic"], true);
}

#[tokio::test]
async fn test_suggest_best_time() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);
    train(&app, 40).await;

    let (status, body) =
        post_json(&app, "/suggest/best-time", json!({"service": "Billing", "dayOfWeek": 2})).await;
    assert_eq!(status, StatusCode::OK);

    let suggestions = body["suggestions"].as_array().unwrap();
    assert_eq!(suggestions.len(), 3);
    for suggestion in suggestions {
        let hour = suggestion["hour"].as_u64().unwrap();
        assert!((9..=17).contains(&hour));
        assert!(suggestion["queueLength"].is_u64());
        assert!(suggestion["waitingTime"].is_number());
    }

    let (status, _) = post_json(&app, "/suggest/best-time", json!({})).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_suggest_accepts_unusual_inputs() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);
    train(&app, 40).await;

    let bodies = [
        json!({"dayOfWeek": 7}),
        json!({"dayOfWeek": -1}),
        json!({"dayOfWeek": "2"}),
        json!({"service": 5}),
        json!([1, 2, 3]),
    ];
    for request in bodies {
        let (status, body) = post_json(&app, "/suggest/best-time", request.clone()).await;
        assert_eq!(status, StatusCode::OK, "{request}");

        let suggestions = body["suggestions"].as_array().unwrap();
        assert_eq!(suggestions.len(), 3, "{request}");
        for suggestion in suggestions {
            assert!((9..=17).contains(&suggestion["hour"].as_u64().unwrap()));
        }
    }
}

#[tokio::test]
async fn test_daily_peak_profile() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);

    let (status, body) =
        post_json(&app, "/predict/peak-hours/daily", json!({"hourOfDay": 12})).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(body["current"], json!({"queueDensity": 20.0, "isPeak": false}));
    let hourly = body["hourlyPredictions"].as_array().unwrap();
    assert_eq!(hourly.len(), 9);
    assert_eq!(hourly[0], json!({"hour": 9, "queueDensity": 20.0, "isPeak": false}));
    assert_eq!(body["peakHours"], json!([]));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    queue_forecast::metrics::init_metrics().unwrap();
    let dir = TempDir::new().unwrap();
    let app = app(&dir);

    post_json(&app, "/predict/queue-length", json!({})).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let output = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(common::metric_exists(&output, "queue_forecast_predictions_total"));

    let fallbacks = output
        .lines()
        .find(|line| line.contains("metric=\"queue_length\"") && line.contains("outcome=\"fallback\""))
        .and_then(common::extract_metric_value)
        .unwrap();
    assert!(fallbacks >= 1.0);
}
