//! Deterministic cold-start datasets
//!
//! Used when a training batch is too small to fit on. Every call with the same
//! seed and size yields the same table.

use crate::ml::error::PredictionResult;
use crate::ml::models::{FeatureColumn, Metric, TrainingDataset};
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::f64::consts::PI;

/// Generates the synthetic table for one metric
#[derive(Debug, Clone, Copy)]
pub struct SyntheticGenerator {
    seed: u64,
    n_samples: usize,
}

impl SyntheticGenerator {
    pub fn new(seed: u64, n_samples: usize) -> Self {
        Self { seed, n_samples }
    }

    pub fn generate(&self, metric: Metric) -> PredictionResult<TrainingDataset> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let n = self.n_samples;

        // Drawn column by column in a fixed order, whatever the metric keeps
        let day_of_week = uniform_ints(&mut rng, n, 0, 7);
        let hour_of_day = uniform_ints(&mut rng, n, 0, 24);
        let month = uniform_ints(&mut rng, n, 1, 13);
        let day_of_month = uniform_ints(&mut rng, n, 1, 29);
        let service_code = uniform_ints(&mut rng, n, 0, 5);
        let position = uniform_ints(&mut rng, n, 1, 50);

        let targets: Vec<f64> = match metric {
            Metric::WaitingTime => (0..n)
                .map(|i| (2.0 * position[i] + 0.5 * hour_of_day[i] + normal(&mut rng, 5.0)).max(0.0))
                .collect(),
            Metric::QueueLength => (0..n)
                .map(|i| (10.0 + 0.8 * hour_of_day[i] + normal(&mut rng, 3.0)).max(0.0))
                .collect(),
            Metric::NoShow => (0..n)
                .map(|i| {
                    let late = if hour_of_day[i] > 18.0 { 1.0 } else { 0.0 };
                    let random = if rng.gen::<f64>() > 0.85 { 1.0 } else { 0.0 };
                    f64::min(1.0, late + random)
                })
                .collect(),
            Metric::PeakHours => (0..n)
                .map(|i| (20.0 + 1.5 * hour_of_day[i] + normal(&mut rng, 5.0)).max(0.0))
                .collect(),
        };

        let columns = metric.columns();
        let features = Array2::from_shape_fn((n, columns.len()), |(i, j)| match columns[j] {
            FeatureColumn::DayOfWeek => day_of_week[i],
            FeatureColumn::HourOfDay => hour_of_day[i],
            FeatureColumn::Month => month[i],
            FeatureColumn::DayOfMonth => day_of_month[i],
            FeatureColumn::ServiceCode => service_code[i],
            FeatureColumn::PositionInQueue => position[i],
        });

        let mut dataset = TrainingDataset::new(features, Array1::from_vec(targets))?;
        dataset.synthetic = true;
        Ok(dataset)
    }
}

fn uniform_ints(rng: &mut ChaCha8Rng, n: usize, low: i64, high: i64) -> Vec<f64> {
    (0..n).map(|_| rng.gen_range(low..high) as f64).collect()
}

/// Zero-mean gaussian noise (Box-Muller), clamped to three standard deviations
fn normal(rng: &mut ChaCha8Rng, std_dev: f64) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen::<f64>();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
    (z * std_dev).clamp(-3.0 * std_dev, 3.0 * std_dev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_generation_is_deterministic() {
        let generator = SyntheticGenerator::new(42, 100);
        for metric in Metric::iter() {
            let first = generator.generate(metric).unwrap();
            let second = generator.generate(metric).unwrap();
            assert_eq!(first.features, second.features);
            assert_eq!(first.targets, second.targets);
            assert!(first.synthetic);
        }
    }

    #[test]
    fn test_feature_ranges() {
        let dataset = SyntheticGenerator::new(42, 100).generate(Metric::WaitingTime).unwrap();
        assert_eq!(dataset.features.dim(), (100, 6));

        let ranges = [(0.0, 6.0), (0.0, 23.0), (1.0, 12.0), (1.0, 28.0), (0.0, 4.0), (1.0, 49.0)];
        for (j, (low, high)) in ranges.iter().enumerate() {
            let column = dataset.features.column(j);
            assert!(column.iter().all(|v| v >= low && v <= high), "column {j} out of range");
        }
    }

    #[test]
    fn test_target_ranges() {
        let generator = SyntheticGenerator::new(42, 100);

        let no_show = generator.generate(Metric::NoShow).unwrap();
        assert!(no_show.targets.iter().all(|t| *t == 0.0 || *t == 1.0));

        let queue = generator.generate(Metric::QueueLength).unwrap();
        assert_eq!(queue.n_features(), 5);
        // 10 + 0.8 * 23 + 3 sigma of 3
        assert!(queue.targets.iter().all(|t| *t >= 1.0 && *t <= 37.4));

        let wait = generator.generate(Metric::WaitingTime).unwrap();
        assert!(wait.targets.iter().all(|t| *t >= 0.0));
    }

    #[test]
    fn test_noise_is_bounded() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..1000 {
            let value = normal(&mut rng, 5.0);
            assert!((-15.0..=15.0).contains(&value));
        }
    }
}
