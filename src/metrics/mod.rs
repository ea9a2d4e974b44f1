//! Prometheus metrics for the forecasting service.
//!
//! Counters and histograms are process-global and cheap to touch from the
//! blocking pool; `init_metrics` registers them once with the exported registry.
//!
//! # Example
//! ```no_run
//! use queue_forecast::metrics::PREDICTIONS_TOTAL;
//!
//! PREDICTIONS_TOTAL
//!     .with_label_values(&["waiting_time", "model"])
//!     .inc();
//! ```

use lazy_static::lazy_static;
use prometheus::{CounterVec, GaugeVec, Histogram, HistogramOpts, Opts, Registry};

const NAMESPACE: &str = "queue_forecast";

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    /// Predictions served
    ///
    /// Labels: metric, outcome (`model` or `fallback`)
    pub static ref PREDICTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("predictions_total", "Total number of predictions served")
            .namespace(NAMESPACE),
        &["metric", "outcome"]
    ).expect("Failed to create PREDICTIONS_TOTAL metric");

    /// Training runs
    ///
    /// Labels: outcome (`success`, `failure`), source (`records`, `synthetic`)
    pub static ref TRAINING_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("training_runs_total", "Total number of training runs")
            .namespace(NAMESPACE),
        &["outcome", "source"]
    ).expect("Failed to create TRAINING_RUNS_TOTAL metric");

    /// Wall-clock time of a full train-and-persist run
    pub static ref TRAINING_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "training_duration_seconds",
            "Duration of a training run in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0])
    ).expect("Failed to create TRAINING_DURATION_SECONDS metric");

    /// Hold-out score of the most recent training run
    ///
    /// Labels: metric
    pub static ref MODEL_SCORE: GaugeVec = GaugeVec::new(
        Opts::new("model_score", "Hold-out score of the installed model")
            .namespace(NAMESPACE),
        &["metric"]
    ).expect("Failed to create MODEL_SCORE metric");

    /// Build information
    ///
    /// Labels: version
    pub static ref BUILD_INFO: GaugeVec = GaugeVec::new(
        Opts::new("build_info", "Build information").namespace(NAMESPACE),
        &["version"]
    ).expect("Failed to create BUILD_INFO metric");
}

/// Register all metrics with the exported registry.
///
/// Safe to call more than once; repeated registrations are ignored.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    register(Box::new(PREDICTIONS_TOTAL.clone()))?;
    register(Box::new(TRAINING_RUNS_TOTAL.clone()))?;
    register(Box::new(TRAINING_DURATION_SECONDS.clone()))?;
    register(Box::new(MODEL_SCORE.clone()))?;
    register(Box::new(BUILD_INFO.clone()))?;

    BUILD_INFO
        .with_label_values(&[env!("CARGO_PKG_VERSION")])
        .set(1.0);

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

fn register(collector: Box<dyn prometheus::core::Collector>) -> Result<(), prometheus::Error> {
    match PROMETHEUS_REGISTRY.register(collector) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Render the registry in the Prometheus text exposition format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
