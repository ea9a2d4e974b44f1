/// Queue forecasting models
///
/// This module provides:
/// - Feature preparation from raw queue records, with a stable service encoder
/// - Four random-forest models (waiting time, queue length, no-show, peak density)
/// - Deterministic synthetic data for cold-start training
/// - Lazy artifact loading with per-metric fallback values
/// - Best-time suggestions built on the queue-length and waiting-time models

pub mod error;
pub mod estimator;
pub mod features;
pub mod models;
pub mod service;
pub mod store;
pub mod synthetic;

pub use error::{PredictionError, PredictionResult};
pub use estimator::{ForestModel, SupervisedModel};
pub use features::{CategoryEncoder, FeatureContext, FeaturePreparer};
pub use models::{FeatureColumn, Metric, ModelMetadata, TaskKind, TrainingDataset, TrainingScore};
pub use service::{
    DailyPeakProfile, Forecaster, HourlyDensity, PeakDensity, TimeSuggestion, TrainingSummary,
};
pub use store::{ArtifactState, ModelStore};
pub use synthetic::SyntheticGenerator;
