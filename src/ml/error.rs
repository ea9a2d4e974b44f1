//! Error types for training and inference

use std::path::PathBuf;

/// Result type for model operations
pub type PredictionResult<T> = std::result::Result<T, PredictionError>;

/// Failures inside the model layer.
///
/// On the prediction path every variant resolves to the metric's fallback
/// value (see [`crate::ml::Metric::fallback`]); only training surfaces them.
#[derive(Debug, thiserror::Error)]
pub enum PredictionError {
    /// No fitted estimator in memory
    #[error("Model not trained: {0}")]
    ModelNotTrained(String),

    /// Artifact file does not exist
    #[error("Artifact not found: {}", .0.display())]
    ArtifactMissing(PathBuf),

    /// Artifact exists but could not be decoded
    #[error("Artifact corrupt: {0}")]
    ArtifactCorrupt(String),

    /// Service encoding requested before any encoder was fitted
    #[error("Category encoder has not been fitted")]
    EncoderNotFitted,

    /// Service name not present in the fitted encoder
    #[error("Unseen category: {0}")]
    UnseenCategory(String),

    /// Feature table could not be built
    #[error("Invalid features: {0}")]
    InvalidFeatures(String),

    /// The underlying estimator failed to fit or predict
    #[error("Estimator error: {0}")]
    Estimator(String),

    /// Inference produced NaN or infinity
    #[error("Non-finite prediction: {0}")]
    NonFinite(f64),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for PredictionError {
    fn from(err: bincode::Error) -> Self {
        PredictionError::ArtifactCorrupt(err.to_string())
    }
}

impl From<smartcore::error::Failed> for PredictionError {
    fn from(err: smartcore::error::Failed) -> Self {
        PredictionError::Estimator(err.to_string())
    }
}

impl From<ndarray::ShapeError> for PredictionError {
    fn from(err: ndarray::ShapeError) -> Self {
        PredictionError::InvalidFeatures(err.to_string())
    }
}
