pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::config::ServerConfig;
use crate::ml::Forecaster;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub forecaster: Arc<Forecaster>,

    /// Body limit applied to `/train`
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(forecaster: Arc<Forecaster>) -> Self {
        Self {
            forecaster,
            max_body_bytes: ServerConfig::default().max_body_bytes,
        }
    }

    pub fn with_body_limit(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}
