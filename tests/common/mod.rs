//! Shared fixtures for the integration tests
#![allow(dead_code)]

use queue_forecast::config::ModelConfig;
use serde_json::{json, Value};
use std::path::Path;

pub const SERVICES: [&str; 3] = ["Billing", "General", "Pharmacy"];

const STATUSES: [&str; 4] = ["Waiting", "In Progress", "Completed", "No-Show"];

/// Small forests keep the suites fast
pub fn test_config(dir: &Path) -> ModelConfig {
    ModelConfig {
        n_trees: 12,
        max_depth: 6,
        ..ModelConfig::with_directory(dir)
    }
}

/// Deterministic queue records spread over a week of opening hours
pub fn sample_records(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| {
            let day = 11 + (i % 5); // 2024-03-11 is a Monday
            let hour = 9 + (i * 7) % 9;
            let minute = (i * 13) % 60;
            let position = 1 + i % 12;
            let status = STATUSES[i % STATUSES.len()];

            json!({
                "joinedAt": format!("2024-03-{:02}T{:02}:{:02}:00Z", day, hour, minute),
                "service": SERVICES[i % SERVICES.len()],
                "positionInQueue": position,
                "status": status,
                "waitingTime": position * 3 + hour % 4,
                "noShow": status == "No-Show",
            })
        })
        .collect()
}

/// Check if a metric exists in Prometheus output
pub fn metric_exists(output: &str, metric_name: &str) -> bool {
    output.lines().any(|line| {
        line.starts_with(&format!("# HELP {}", metric_name))
            || line.starts_with(&format!("# TYPE {}", metric_name))
            || line.starts_with(metric_name)
    })
}

/// Extract metric value from a Prometheus output line
/// Example: `metric_name{label1="value1"} 42.5` -> Some(42.5)
pub fn extract_metric_value(line: &str) -> Option<f64> {
    line.split_whitespace().last()?.parse::<f64>().ok()
}
