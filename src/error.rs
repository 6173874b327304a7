//! Error types for the telemetry source, configuration and classifier layers.
//!
//! Soft conditions (bad timestamps, empty batches, short units, zero
//! variance, unknown groups) are not represented here: the pipeline absorbs
//! them and reports them as notices instead.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to bulk-read one group's telemetry.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("no telemetry for group `{group}` at {path}")]
    GroupNotFound { group: String, path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Invalid analysis configuration or economic override.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("unknown economic profile key `{0}` (expected revenue_per_hour or maintenance_base)")]
    UnknownKey(String),

    #[error("{key} for `{group}` must be non-negative, got {value}")]
    Negative {
        group: String,
        key: &'static str,
        value: f64,
    },

    #[error("malformed override `{0}` (expected GROUP.KEY=VALUE)")]
    MalformedOverride(String),

    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure inside the at-risk classifier backend.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("failed to build feature matrix: {0}")]
    Matrix(String),

    #[error("classifier training failed: {0}")]
    Fit(String),

    #[error("classifier prediction failed: {0}")]
    Predict(String),
}
