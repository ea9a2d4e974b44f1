//! Queue forecasting service: per-metric random forests behind an HTTP API

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod ml;

pub use error::{AppError, Result};
