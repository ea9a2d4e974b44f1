use crate::ml::error::{PredictionError, PredictionResult};
use crate::ml::models::{FeatureColumn, Metric, TrainingDataset};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Status string that marks a record as still queued
pub const WAITING_STATUS: &str = "Waiting";

/// One record or prediction request, reduced to the fields the models use.
///
/// Time fields are resolved once: a parseable `joinedAt` wins over explicit
/// `dayOfWeek`/`hourOfDay`/`month`/`dayOfMonth` values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureContext {
    pub service: Option<String>,
    pub day_of_week: Option<f64>,
    pub hour_of_day: Option<f64>,
    pub month: Option<f64>,
    pub day_of_month: Option<f64>,
    pub position_in_queue: Option<f64>,
    pub status: Option<String>,
    pub waiting_time: Option<f64>,
    pub no_show: Option<bool>,
}

impl FeatureContext {
    /// Build a context from a JSON object; `None` when the value is not an object
    pub fn from_json(value: &Value) -> Option<Self> {
        value.as_object().map(Self::from_map)
    }

    /// Like [`from_json`](Self::from_json) but falls back to an empty context
    pub fn from_json_lenient(value: &Value) -> Self {
        Self::from_json(value).unwrap_or_default()
    }

    pub fn from_map(map: &Map<String, Value>) -> Self {
        let mut context = Self {
            service: map.get("service").and_then(text),
            day_of_week: map.get("dayOfWeek").and_then(numeric),
            hour_of_day: map.get("hourOfDay").and_then(numeric),
            month: map.get("month").and_then(numeric),
            day_of_month: map.get("dayOfMonth").and_then(numeric),
            position_in_queue: map.get("positionInQueue").and_then(numeric),
            status: map.get("status").and_then(text),
            waiting_time: map.get("waitingTime").and_then(numeric),
            no_show: map.get("noShow").and_then(flag),
        };

        if let Some(joined_at) = map.get("joinedAt").and_then(Value::as_str).and_then(parse_timestamp) {
            context.apply_timestamp(&joined_at);
        }

        context
    }

    /// Overwrite the time fields with those derived from a timestamp
    pub fn apply_timestamp(&mut self, at: &NaiveDateTime) {
        self.day_of_week = Some(at.weekday().num_days_from_monday() as f64);
        self.hour_of_day = Some(at.hour() as f64);
        self.month = Some(at.month() as f64);
        self.day_of_month = Some(at.day() as f64);
    }

    /// Value of a non-categorical column; absent fields default to 0
    fn column_value(&self, column: FeatureColumn) -> f64 {
        let value = match column {
            FeatureColumn::DayOfWeek => self.day_of_week,
            FeatureColumn::HourOfDay => self.hour_of_day,
            FeatureColumn::Month => self.month,
            FeatureColumn::DayOfMonth => self.day_of_month,
            FeatureColumn::PositionInQueue => self.position_in_queue,
            FeatureColumn::ServiceCode => None,
        };
        value.unwrap_or(0.0)
    }

    fn is_waiting(&self) -> bool {
        self.status.as_deref() == Some(WAITING_STATUS)
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn numeric(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

fn flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" | "" => Some(false),
            _ => None,
        },
        other => numeric(other).map(|n| n != 0.0),
    }
}

/// Parse the timestamp formats queue records arrive with, keeping wall-clock time
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Stable service-name to integer mapping.
///
/// Codes follow the lexicographic order of the names seen at fit time, so
/// fitting the same set of names always yields the same mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryEncoder {
    classes: BTreeMap<String, usize>,
    fitted: bool,
}

impl CategoryEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the mapping with one built from `values`
    pub fn fit<'a, I>(&mut self, values: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let distinct: BTreeSet<&str> = values.into_iter().collect();
        self.classes = distinct
            .into_iter()
            .enumerate()
            .map(|(code, name)| (name.to_string(), code))
            .collect();
        self.fitted = true;
    }

    pub fn encode(&self, value: &str) -> PredictionResult<usize> {
        if !self.fitted {
            return Err(PredictionError::EncoderNotFitted);
        }
        self.classes
            .get(value)
            .copied()
            .ok_or_else(|| PredictionError::UnseenCategory(value.to_string()))
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }
}

/// Turns feature contexts into metric-specific numeric tables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeaturePreparer {
    encoder: CategoryEncoder,
}

impl FeaturePreparer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encoder(encoder: CategoryEncoder) -> Self {
        Self { encoder }
    }

    pub fn encoder(&self) -> &CategoryEncoder {
        &self.encoder
    }

    /// Fit the category encoder over the services present in a training batch
    pub fn fit(&mut self, contexts: &[FeatureContext]) {
        self.encoder
            .fit(contexts.iter().filter_map(|c| c.service.as_deref()));
    }

    /// Encode one context into the metric's column order
    pub fn transform_row(&self, context: &FeatureContext, metric: Metric) -> PredictionResult<Vec<f64>> {
        metric
            .columns()
            .iter()
            .map(|&column| match column {
                FeatureColumn::ServiceCode => match context.service.as_deref() {
                    Some(service) => self.encoder.encode(service).map(|code| code as f64),
                    None => Ok(0.0),
                },
                other => Ok(context.column_value(other)),
            })
            .collect()
    }

    /// Encode a batch into an `n × columns` matrix
    pub fn transform(&self, contexts: &[FeatureContext], metric: Metric) -> PredictionResult<Array2<f64>> {
        let n_columns = metric.columns().len();
        let mut data = Vec::with_capacity(contexts.len() * n_columns);
        for context in contexts {
            data.extend(self.transform_row(context, metric)?);
        }
        Ok(Array2::from_shape_vec((contexts.len(), n_columns), data)?)
    }

    /// Single-row table for inference
    pub fn transform_one(&self, context: &FeatureContext, metric: Metric) -> PredictionResult<Array2<f64>> {
        let row = self.transform_row(context, metric)?;
        Ok(Array2::from_shape_vec((1, row.len()), row)?)
    }

    /// Features and targets for one metric from a training batch.
    ///
    /// Queue-length and peak-density targets are bucket counts over the same
    /// batch, so every row sees the final size of its own bucket.
    pub fn training_set(&self, contexts: &[FeatureContext], metric: Metric) -> PredictionResult<TrainingDataset> {
        let features = self.transform(contexts, metric)?;
        let targets: Vec<f64> = match metric {
            Metric::WaitingTime => contexts
                .iter()
                .map(|c| c.waiting_time.filter(|w| *w >= 0.0).unwrap_or(0.0))
                .collect(),
            Metric::NoShow => contexts
                .iter()
                .map(|c| if c.no_show.unwrap_or(false) { 1.0 } else { 0.0 })
                .collect(),
            Metric::QueueLength => waiting_counts(contexts),
            Metric::PeakHours => density_counts(contexts),
        };

        TrainingDataset::new(features, Array1::from_vec(targets))
    }
}

type HourBucket = (i64, i64);

fn hour_bucket(context: &FeatureContext) -> HourBucket {
    (
        context.column_value(FeatureColumn::DayOfWeek) as i64,
        context.column_value(FeatureColumn::HourOfDay) as i64,
    )
}

/// Per-row count of `Waiting` records sharing its day/hour/service bucket
fn waiting_counts(contexts: &[FeatureContext]) -> Vec<f64> {
    let mut counts: HashMap<(HourBucket, Option<&str>), usize> = HashMap::new();
    for context in contexts {
        let key = (hour_bucket(context), context.service.as_deref());
        let entry = counts.entry(key).or_insert(0);
        if context.is_waiting() {
            *entry += 1;
        }
    }

    contexts
        .iter()
        .map(|c| counts[&(hour_bucket(c), c.service.as_deref())] as f64)
        .collect()
}

/// Per-row count of records sharing its day/hour bucket
fn density_counts(contexts: &[FeatureContext]) -> Vec<f64> {
    let mut counts: HashMap<HourBucket, usize> = HashMap::new();
    for context in contexts {
        *counts.entry(hour_bucket(context)).or_insert(0) += 1;
    }

    contexts.iter().map(|c| counts[&hour_bucket(c)] as f64).collect()
}
