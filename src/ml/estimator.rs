use crate::ml::error::{PredictionError, PredictionResult};
use crate::ml::models::{Metric, ModelMetadata, TaskKind, TrainingDataset, TrainingScore};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;
use std::fs;
use std::path::{Path, PathBuf};

type Forest = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// Capability set shared by the per-metric estimators
pub trait SupervisedModel: Send + Sync {
    /// Fit on the full dataset, replacing any previous state
    fn fit(&mut self, dataset: &TrainingDataset) -> PredictionResult<()>;

    /// Raw model outputs, one per row
    fn predict(&self, features: &Array2<f64>) -> PredictionResult<Vec<f64>>;

    /// Write the fitted model to `path`
    fn persist(&self, path: &Path) -> PredictionResult<()>;

    /// Read a model previously written with [`persist`](Self::persist)
    fn restore(path: &Path) -> PredictionResult<Self>
    where
        Self: Sized;

    fn metadata(&self) -> &ModelMetadata;

    fn metadata_mut(&mut self) -> &mut ModelMetadata;

    fn is_fitted(&self) -> bool;

    /// Split, fit on the training share and score on the hold-out share
    fn train(&mut self, dataset: &TrainingDataset, test_size: f64) -> PredictionResult<TrainingScore> {
        let seed = self.metadata().seed;
        let (train, test) = dataset.train_test_split(test_size, seed);
        self.fit(&train)?;

        // Tiny batches have no hold-out rows; score on what was fitted
        let holdout = if test.n_samples() == 0 { &train } else { &test };
        let score = evaluate(self.metadata().metric, self, holdout)?;

        let metadata = self.metadata_mut();
        metadata.n_training_samples = train.n_samples();
        metadata.n_features = dataset.n_features();
        metadata.synthetic = dataset.synthetic;
        metadata.score = score;
        metadata.trained_at = Some(chrono::Utc::now());

        Ok(TrainingScore { score })
    }
}

/// Random forest regressor backing every metric.
///
/// The no-show model is fitted on 0/1 targets, so its output is the forest
/// average of leaf no-show rates and reads directly as a probability.
#[derive(Serialize, Deserialize)]
pub struct ForestModel {
    /// Model metadata
    metadata: ModelMetadata,

    /// Fitted forest
    model: Option<Forest>,
}

impl ForestModel {
    pub fn new(metric: Metric, n_trees: usize, max_depth: u16, seed: u64) -> Self {
        Self {
            metadata: ModelMetadata::new(metric, n_trees, max_depth, seed),
            model: None,
        }
    }

    pub fn metric(&self) -> Metric {
        self.metadata.metric
    }

    /// Artifact bytes for a fitted model
    pub fn to_bytes(&self) -> PredictionResult<Vec<u8>> {
        if self.model.is_none() {
            return Err(PredictionError::ModelNotTrained(self.metric().to_string()));
        }
        Ok(bincode::serialize(self)?)
    }

    fn parameters(&self) -> RandomForestRegressorParameters {
        RandomForestRegressorParameters::default()
            .with_n_trees(self.metadata.n_trees as _)
            .with_max_depth(self.metadata.max_depth)
            .with_seed(self.metadata.seed)
    }
}

impl SupervisedModel for ForestModel {
    fn fit(&mut self, dataset: &TrainingDataset) -> PredictionResult<()> {
        if dataset.n_samples() == 0 {
            return Err(PredictionError::InvalidFeatures(
                "cannot fit on an empty dataset".to_string(),
            ));
        }

        let x = ndarray_to_densematrix(&dataset.features);
        let y = dataset.targets.to_vec();

        let forest = RandomForestRegressor::fit(&x, &y, self.parameters())?;
        self.model = Some(forest);
        Ok(())
    }

    fn predict(&self, features: &Array2<f64>) -> PredictionResult<Vec<f64>> {
        let forest = self
            .model
            .as_ref()
            .ok_or_else(|| PredictionError::ModelNotTrained(self.metric().to_string()))?;

        let expected = self.metric().columns().len();
        if features.ncols() != expected {
            return Err(PredictionError::InvalidFeatures(format!(
                "expected {} columns, got {}",
                expected,
                features.ncols()
            )));
        }

        let x = ndarray_to_densematrix(features);
        Ok(forest.predict(&x)?)
    }

    fn persist(&self, path: &Path) -> PredictionResult<()> {
        write_artifact(path, &self.to_bytes()?)
    }

    fn restore(path: &Path) -> PredictionResult<Self> {
        let bytes = read_artifact(path)?;
        let model: ForestModel = bincode::deserialize(&bytes)?;
        if model.model.is_none() {
            return Err(PredictionError::ArtifactCorrupt(format!(
                "{} holds no fitted forest",
                path.display()
            )));
        }
        Ok(model)
    }

    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ModelMetadata {
        &mut self.metadata
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }
}

/// Convert ndarray to smartcore's row-major DenseMatrix
fn ndarray_to_densematrix(arr: &Array2<f64>) -> DenseMatrix<f64> {
    let (rows, cols) = arr.dim();
    let data: Vec<f64> = arr.iter().copied().collect();
    DenseMatrix::new(rows, cols, data, false)
}

/// Write through a temporary sibling so a crash never leaves a half-written artifact
pub(crate) fn write_artifact(path: &Path, bytes: &[u8]) -> PredictionResult<()> {
    let staged = stage_artifact(path, bytes)?;
    commit_artifact(&staged, path)
}

/// Write `bytes` next to `path` without touching `path` itself
pub(crate) fn stage_artifact(path: &Path, bytes: &[u8]) -> PredictionResult<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("bin.tmp");
    fs::write(&tmp, bytes)?;
    Ok(tmp)
}

/// Move a staged artifact into place
pub(crate) fn commit_artifact(staged: &Path, path: &Path) -> PredictionResult<()> {
    fs::rename(staged, path)?;
    Ok(())
}

pub(crate) fn read_artifact(path: &Path) -> PredictionResult<Vec<u8>> {
    if !path.exists() {
        return Err(PredictionError::ArtifactMissing(path.to_path_buf()));
    }
    Ok(fs::read(path)?)
}

/// Score a fitted model on a hold-out set: R² for regressors, accuracy for classifiers
pub fn evaluate<M: SupervisedModel + ?Sized>(
    metric: Metric,
    model: &M,
    holdout: &TrainingDataset,
) -> PredictionResult<f64> {
    let predictions = model.predict(&holdout.features)?;
    let truth = holdout.targets.to_vec();

    Ok(match metric.kind() {
        TaskKind::Regression => r2_score(&truth, &predictions),
        TaskKind::Classification => accuracy(&truth, &predictions),
    })
}

/// Coefficient of determination
pub fn r2_score(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }

    let mean = y_true.iter().sum::<f64>() / y_true.len() as f64;
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();

    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Share of rows whose prediction lands on the right side of 0.5
pub fn accuracy(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }

    let correct = y_true
        .iter()
        .zip(y_pred)
        .filter(|(t, p)| (**t >= 0.5) == (**p >= 0.5))
        .count();
    correct as f64 / y_true.len() as f64
}
