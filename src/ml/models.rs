use crate::ml::error::{PredictionError, PredictionResult};
use crate::ml::features::FeatureContext;
use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter};

/// The four independently trained prediction targets
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumIter, AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "snake_case")]
pub enum Metric {
    /// Minutes a newcomer waits before being served
    WaitingTime,

    /// Number of people waiting in a day/hour/service bucket
    QueueLength,

    /// Probability that a ticket holder never shows up
    NoShow,

    /// Number of queue joins in a day/hour bucket
    PeakHours,
}

/// How a metric's score is computed and its output interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Regression,
    Classification,
}

impl Metric {
    /// Ordered feature columns this metric's model expects
    pub fn columns(self) -> &'static [FeatureColumn] {
        use FeatureColumn::*;
        match self {
            Metric::WaitingTime | Metric::NoShow => &[
                DayOfWeek,
                HourOfDay,
                Month,
                DayOfMonth,
                ServiceCode,
                PositionInQueue,
            ],
            Metric::QueueLength | Metric::PeakHours => {
                &[DayOfWeek, HourOfDay, Month, DayOfMonth, ServiceCode]
            }
        }
    }

    pub fn kind(self) -> TaskKind {
        match self {
            Metric::NoShow => TaskKind::Classification,
            _ => TaskKind::Regression,
        }
    }

    /// File name of the persisted artifact
    pub fn artifact_file(self) -> String {
        format!("{}_model.bin", self.as_ref())
    }

    /// Key used for this metric in the training results payload
    pub fn result_key(self) -> &'static str {
        match self {
            Metric::WaitingTime => "waitingTime",
            Metric::QueueLength => "queueLength",
            Metric::NoShow => "noShow",
            Metric::PeakHours => "peakHours",
        }
    }

    /// Value served when inference fails for any reason
    pub fn fallback(self, context: &FeatureContext) -> f64 {
        match self {
            Metric::WaitingTime => context.position_in_queue.unwrap_or(0.0) * 2.0,
            Metric::QueueLength => 10.0,
            Metric::NoShow => 0.15,
            Metric::PeakHours => 20.0,
        }
    }

    /// Turn a raw model output into the served value
    pub fn postprocess(self, raw: f64) -> PredictionResult<f64> {
        if !raw.is_finite() {
            return Err(PredictionError::NonFinite(raw));
        }

        Ok(match self {
            Metric::WaitingTime | Metric::PeakHours => round_to(raw, 2).max(0.0),
            Metric::QueueLength => raw.round().max(0.0),
            Metric::NoShow => round_to(raw.clamp(0.0, 1.0), 3),
        })
    }
}

/// Round to a fixed number of decimal places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// A named numeric input column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "camelCase")]
pub enum FeatureColumn {
    DayOfWeek,
    HourOfDay,
    Month,
    DayOfMonth,
    ServiceCode,
    PositionInQueue,
}

/// Model metadata, persisted alongside the estimator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
    /// Metric this model predicts
    pub metric: Metric,

    /// Number of training samples (after the hold-out split)
    pub n_training_samples: usize,

    /// Number of features
    pub n_features: usize,

    /// Trained on the synthetic cold-start dataset
    pub synthetic: bool,

    /// Hold-out score reported at training time
    pub score: f64,

    /// Hyperparameters
    pub n_trees: usize,
    pub max_depth: u16,
    pub seed: u64,

    /// Training timestamp; kept out of the artifact so retraining on the same
    /// data reproduces identical bytes
    #[serde(skip)]
    pub trained_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ModelMetadata {
    pub fn new(metric: Metric, n_trees: usize, max_depth: u16, seed: u64) -> Self {
        Self {
            metric,
            n_training_samples: 0,
            n_features: metric.columns().len(),
            synthetic: false,
            score: 0.0,
            n_trees,
            max_depth,
            seed,
            trained_at: None,
        }
    }
}

/// Feature matrix plus target vector for one metric
#[derive(Debug, Clone)]
pub struct TrainingDataset {
    /// Feature matrix (n_samples × n_features)
    pub features: Array2<f64>,

    /// Target values
    pub targets: Array1<f64>,

    /// Built by the synthetic generator
    pub synthetic: bool,
}

impl TrainingDataset {
    pub fn new(features: Array2<f64>, targets: Array1<f64>) -> PredictionResult<Self> {
        if features.nrows() != targets.len() {
            return Err(PredictionError::InvalidFeatures(format!(
                "{} feature rows but {} targets",
                features.nrows(),
                targets.len()
            )));
        }

        Ok(Self {
            features,
            targets,
            synthetic: false,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.features.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    /// Shuffle rows with a fixed seed and split off `test_size` as a hold-out.
    ///
    /// The test partition gets `ceil(n * test_size)` rows, and both
    /// partitions keep at least one row when `n >= 2`.
    pub fn train_test_split(&self, test_size: f64, seed: u64) -> (TrainingDataset, TrainingDataset) {
        let n = self.n_samples();
        let mut indices: Vec<usize> = (0..n).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let mut n_test = (n as f64 * test_size).ceil() as usize;
        if n >= 2 {
            n_test = n_test.clamp(1, n - 1);
        } else {
            n_test = 0;
        }
        let (test_idx, train_idx) = indices.split_at(n_test);

        (self.select(train_idx), self.select(test_idx))
    }

    fn select(&self, rows: &[usize]) -> TrainingDataset {
        TrainingDataset {
            features: self.features.select(Axis(0), rows),
            targets: self.targets.select(Axis(0), rows),
            synthetic: self.synthetic,
        }
    }
}

/// Per-metric training outcome as reported by `/train`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TrainingScore {
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use strum::IntoEnumIterator;

    #[test]
    fn test_artifact_files() {
        let files: Vec<String> = Metric::iter().map(Metric::artifact_file).collect();
        assert_eq!(
            files,
            vec![
                "waiting_time_model.bin",
                "queue_length_model.bin",
                "no_show_model.bin",
                "peak_hours_model.bin",
            ]
        );
    }

    #[test]
    fn test_column_layouts() {
        assert_eq!(Metric::WaitingTime.columns().len(), 6);
        assert_eq!(Metric::NoShow.columns().len(), 6);
        assert_eq!(Metric::QueueLength.columns().len(), 5);
        assert_eq!(Metric::PeakHours.columns().len(), 5);
        assert_eq!(FeatureColumn::PositionInQueue.as_ref(), "positionInQueue");
    }

    #[test]
    fn test_fallback_table() {
        let mut context = FeatureContext::default();
        assert_eq!(Metric::WaitingTime.fallback(&context), 0.0);
        context.position_in_queue = Some(7.0);
        assert_eq!(Metric::WaitingTime.fallback(&context), 14.0);
        assert_eq!(Metric::QueueLength.fallback(&context), 10.0);
        assert_eq!(Metric::NoShow.fallback(&context), 0.15);
        assert_eq!(Metric::PeakHours.fallback(&context), 20.0);
    }

    #[test]
    fn test_postprocess() {
        assert_eq!(Metric::WaitingTime.postprocess(12.3456).unwrap(), 12.35);
        assert_eq!(Metric::WaitingTime.postprocess(-3.0).unwrap(), 0.0);
        assert_eq!(Metric::QueueLength.postprocess(7.6).unwrap(), 8.0);
        assert_eq!(Metric::NoShow.postprocess(0.12345).unwrap(), 0.123);
        assert_eq!(Metric::NoShow.postprocess(1.7).unwrap(), 1.0);
        assert!(matches!(
            Metric::PeakHours.postprocess(f64::NAN),
            Err(PredictionError::NonFinite(_))
        ));
    }

    #[test]
    fn test_train_test_split_sizes() {
        let features = Array2::from_shape_fn((10, 2), |(i, j)| (i * 2 + j) as f64);
        let targets = Array1::from_iter((0..10).map(|i| i as f64));
        let dataset = TrainingDataset::new(features, targets).unwrap();

        let (train, test) = dataset.train_test_split(0.2, 42);
        assert_eq!(train.n_samples(), 8);
        assert_eq!(test.n_samples(), 2);

        // Rows stay aligned with their targets after shuffling
        for (row, target) in train.features.rows().into_iter().zip(train.targets.iter()) {
            assert_eq!(row[0], target * 2.0);
        }

        let (again, _) = dataset.train_test_split(0.2, 42);
        assert_eq!(train.targets, again.targets);
    }

    #[test]
    fn test_dataset_shape_mismatch() {
        let result = TrainingDataset::new(array![[1.0, 2.0]], array![1.0, 2.0]);
        assert!(matches!(result, Err(PredictionError::InvalidFeatures(_))));
    }
}
