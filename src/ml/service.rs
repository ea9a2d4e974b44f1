use crate::config::ModelConfig;
use crate::metrics::{MODEL_SCORE, PREDICTIONS_TOTAL, TRAINING_DURATION_SECONDS, TRAINING_RUNS_TOTAL};
use crate::ml::error::{PredictionError, PredictionResult};
use crate::ml::estimator::{ForestModel, SupervisedModel};
use crate::ml::features::{FeatureContext, FeaturePreparer};
use crate::ml::models::{Metric, TrainingScore};
use crate::ml::store::ModelStore;
use crate::ml::synthetic::SyntheticGenerator;
use chrono::{Datelike, NaiveDate};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use strum::IntoEnumIterator;
use tracing::{debug, info, warn};

/// Density above which an hour counts as a peak
pub const PEAK_THRESHOLD: f64 = 25.0;

/// Opening hours scanned by the suggestion and daily-profile pipelines
pub const OPENING_HOURS: std::ops::RangeInclusive<u32> = 9..=17;

/// Service assumed when a suggestion request names none
pub const DEFAULT_SERVICE: &str = "General";

const SUGGESTION_COUNT: usize = 3;
const QUEUE_WEIGHT: f64 = 0.6;
const WAIT_WEIGHT: f64 = 0.4;

/// One recommended visiting hour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSuggestion {
    pub hour: u32,
    pub queue_length: u32,
    pub waiting_time: f64,
}

impl TimeSuggestion {
    fn new(hour: u32, queue_length: u32, waiting_time: f64) -> Self {
        Self {
            hour,
            queue_length,
            waiting_time,
        }
    }

    fn score(&self) -> f64 {
        QUEUE_WEIGHT * self.queue_length as f64 + WAIT_WEIGHT * self.waiting_time
    }

    /// Served when the suggestion pipeline itself fails
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(10, 5, 10.0),
            Self::new(14, 7, 14.0),
            Self::new(16, 6, 12.0),
        ]
    }
}

/// Predicted density for one hour
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeakDensity {
    pub queue_density: f64,
    pub is_peak: bool,
}

impl PeakDensity {
    pub fn new(queue_density: f64) -> Self {
        Self {
            queue_density,
            is_peak: queue_density > PEAK_THRESHOLD,
        }
    }
}

/// Density for one opening hour of the daily profile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyDensity {
    pub hour: u32,
    #[serde(flatten)]
    pub density: PeakDensity,
}

/// Density at the requested hour plus every opening hour of the same day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPeakProfile {
    pub current: PeakDensity,
    pub hourly_predictions: Vec<HourlyDensity>,
    pub peak_hours: Vec<u32>,
}

/// Outcome of a full training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    /// Hold-out score per metric
    pub results: BTreeMap<Metric, TrainingScore>,

    /// Usable records in the submitted batch
    pub usable_rows: usize,

    /// The batch was too small and synthetic data was used instead
    pub synthetic: bool,
}

/// Prediction facade: lazy artifact loading, fallbacks, suggestions and training
pub struct Forecaster {
    config: ModelConfig,
    store: RwLock<ModelStore>,
}

impl Forecaster {
    pub fn new(config: ModelConfig) -> Self {
        let store = ModelStore::new(config.directory.clone());
        Self {
            config,
            store: RwLock::new(store),
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Every metric has a model in memory or persisted
    pub fn is_trained(&self) -> bool {
        self.store.read().is_trained()
    }

    /// Train all four models on a batch of records, persist them and install
    /// them in place of the current ones.
    ///
    /// Records that are not JSON objects are skipped. When fewer than the
    /// configured minimum remain, every model is trained on the synthetic
    /// dataset instead.
    pub fn train(&self, records: &[Value]) -> PredictionResult<TrainingSummary> {
        if records.is_empty() {
            return Err(PredictionError::InvalidFeatures(
                "No training data provided".to_string(),
            ));
        }

        let contexts: Vec<FeatureContext> =
            records.iter().filter_map(FeatureContext::from_json).collect();
        let synthetic = contexts.len() < self.config.min_training_rows;
        let source = if synthetic { "synthetic" } else { "records" };

        info!(
            records = records.len(),
            usable_rows = contexts.len(),
            synthetic,
            "🧠 Training models"
        );
        if synthetic {
            warn!(
                usable_rows = contexts.len(),
                minimum = self.config.min_training_rows,
                "Not enough usable records, training on synthetic data"
            );
        }

        let timer = TRAINING_DURATION_SECONDS.start_timer();
        let result = self.train_all(&contexts, synthetic);
        timer.observe_duration();

        match &result {
            Ok(_) => TRAINING_RUNS_TOTAL.with_label_values(&["success", source]).inc(),
            Err(e) => {
                warn!(error = %e, "Training failed, previous models kept");
                TRAINING_RUNS_TOTAL.with_label_values(&["failure", source]).inc()
            }
        }

        result.map(|results| TrainingSummary {
            results,
            usable_rows: contexts.len(),
            synthetic,
        })
    }

    fn train_all(
        &self,
        contexts: &[FeatureContext],
        synthetic: bool,
    ) -> PredictionResult<BTreeMap<Metric, TrainingScore>> {
        // Held for fit, persist and install so concurrent runs are serialized
        let mut store = self.store.write();

        let mut preparer = FeaturePreparer::new();
        preparer.fit(contexts);
        let generator = SyntheticGenerator::new(self.config.seed, self.config.synthetic_samples);

        let mut models = Vec::with_capacity(4);
        let mut results = BTreeMap::new();
        for metric in Metric::iter() {
            let dataset = if synthetic {
                generator.generate(metric)?
            } else {
                preparer.training_set(contexts, metric)?
            };

            let mut model = ForestModel::new(
                metric,
                self.config.n_trees,
                self.config.max_depth,
                self.config.seed,
            );
            let score = model.train(&dataset, self.config.test_size)?;

            info!(
                metric = %metric,
                samples = model.metadata().n_training_samples,
                score = score.score,
                "✅ Model trained"
            );
            MODEL_SCORE.with_label_values(&[metric.as_ref()]).set(score.score);

            results.insert(metric, score);
            models.push(model);
        }

        store.persist(&preparer, &models)?;
        store.install(preparer, models);

        info!(directory = %store.directory().display(), "Model artifacts saved");
        Ok(results)
    }

    /// Prediction without fallback
    pub fn try_predict(&self, metric: Metric, context: &FeatureContext) -> PredictionResult<f64> {
        {
            let store = self.store.read();
            if store.is_loaded(metric) {
                return store.predict(metric, context);
            }
        }

        let mut store = self.store.write();
        store.ensure_loaded(metric)?;
        store.predict(metric, context)
    }

    /// Prediction that resolves every failure to the metric's fallback value
    pub fn predict(&self, metric: Metric, context: &FeatureContext) -> f64 {
        match self.try_predict(metric, context) {
            Ok(value) => {
                PREDICTIONS_TOTAL
                    .with_label_values(&[metric.as_ref(), "model"])
                    .inc();
                value
            }
            Err(e) => {
                debug!(metric = %metric, error = %e, "Prediction failed, serving fallback");
                PREDICTIONS_TOTAL
                    .with_label_values(&[metric.as_ref(), "fallback"])
                    .inc();
                metric.fallback(context)
            }
        }
    }

    /// Expected wait in minutes
    pub fn predict_waiting_time(&self, context: &FeatureContext) -> f64 {
        self.predict(Metric::WaitingTime, context)
    }

    /// Expected number of people waiting
    pub fn predict_queue_length(&self, context: &FeatureContext) -> u32 {
        self.predict(Metric::QueueLength, context) as u32
    }

    /// Probability in [0, 1] that the visitor does not show up
    pub fn predict_no_show(&self, context: &FeatureContext) -> f64 {
        self.predict(Metric::NoShow, context)
    }

    pub fn predict_peak_density(&self, context: &FeatureContext) -> PeakDensity {
        PeakDensity::new(self.predict(Metric::PeakHours, context))
    }

    /// Density at the context's hour and at every opening hour of that day
    pub fn daily_peak_profile(&self, context: &FeatureContext) -> DailyPeakProfile {
        let current = self.predict_peak_density(context);

        let hourly_predictions: Vec<HourlyDensity> = OPENING_HOURS
            .map(|hour| {
                let at_hour = FeatureContext {
                    hour_of_day: Some(hour as f64),
                    ..context.clone()
                };
                HourlyDensity {
                    hour,
                    density: self.predict_peak_density(&at_hour),
                }
            })
            .collect();

        let peak_hours = hourly_predictions
            .iter()
            .filter(|h| h.density.is_peak)
            .map(|h| h.hour)
            .collect();

        DailyPeakProfile {
            current,
            hourly_predictions,
            peak_hours,
        }
    }

    /// Three least-crowded opening hours for today's date
    pub fn suggest_best_time(&self, service: Option<&str>, day_of_week: Option<f64>) -> Vec<TimeSuggestion> {
        let today = chrono::Local::now().date_naive();
        self.suggest_best_time_on(service, day_of_week, today)
    }

    /// Three least-crowded opening hours, ranked by a weighted blend of queue
    /// length and waiting time. `day_of_week` defaults to that of `date`.
    pub fn suggest_best_time_on(
        &self,
        service: Option<&str>,
        day_of_week: Option<f64>,
        date: NaiveDate,
    ) -> Vec<TimeSuggestion> {
        let service = service.unwrap_or(DEFAULT_SERVICE);
        match self.rank_hours(service, day_of_week, date) {
            Ok(suggestions) => suggestions,
            Err(e) => {
                warn!(service, error = %e, "Suggestion pipeline failed, serving defaults");
                TimeSuggestion::defaults()
            }
        }
    }

    fn rank_hours(
        &self,
        service: &str,
        day_of_week: Option<f64>,
        date: NaiveDate,
    ) -> PredictionResult<Vec<TimeSuggestion>> {
        let day_of_week =
            day_of_week.unwrap_or_else(|| date.weekday().num_days_from_monday() as f64);

        let mut scored = Vec::with_capacity(OPENING_HOURS.count());
        for hour in OPENING_HOURS {
            let context = FeatureContext {
                service: Some(service.to_string()),
                day_of_week: Some(day_of_week),
                hour_of_day: Some(hour as f64),
                month: Some(date.month() as f64),
                day_of_month: Some(date.day() as f64),
                position_in_queue: Some(1.0),
                ..Default::default()
            };

            let suggestion = TimeSuggestion::new(
                hour,
                self.predict_queue_length(&context),
                self.predict_waiting_time(&context),
            );
            let score = suggestion.score();
            if !score.is_finite() {
                return Err(PredictionError::NonFinite(score));
            }
            scored.push((score, suggestion));
        }

        // Stable sort keeps hour order among equal scores
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(scored
            .into_iter()
            .take(SUGGESTION_COUNT)
            .map(|(_, suggestion)| suggestion)
            .collect())
    }
}
