//! Analysis configuration.
//!
//! Every field has a default, so a config file only needs the keys it
//! changes. Ranges are enforced by [`AnalysisConfig::validate`]; nothing is
//! clamped silently.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::economics::ProfileUpdate;
use crate::error::ConfigError;

pub const DEFAULT_SOURCE: &str = "./telemetry";
pub const DEFAULT_STORE: &str = "digitalTwinsTelemetryDB";
pub const DEFAULT_GROUPS: &[&str] = &[
    "compressor1",
    "drillrig1",
    "pipeline1",
    "refinery1",
    "retail1",
    "transformer1",
    "turbine1",
    "wellhead1",
];

pub const DEFAULT_LIMIT: usize = 1000;
pub const LIMIT_RANGE: (usize, usize) = (100, 5000);

pub const DEFAULT_HORIZON_HOURS: u32 = 72;
pub const HORIZON_RANGE: (u32, u32) = (12, 336);

pub const MIN_RISK_RANGE: (f64, f64) = (0.0, 1.0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Telemetry root directory.
    pub source: PathBuf,
    /// Store directory below `source`.
    pub store: String,
    pub groups: Vec<String>,
    /// Most recent rows fetched per group.
    pub limit: usize,
    pub horizon_hours: u32,
    /// Units below this aggregate risk are left out of trend output.
    pub min_risk: f64,
    pub train_classifier: bool,
    /// Display symbol for monetary values.
    pub currency: String,
    /// Per-group economic profile overrides.
    pub economics: BTreeMap<String, ProfileUpdate>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from(DEFAULT_SOURCE),
            store: DEFAULT_STORE.to_string(),
            groups: DEFAULT_GROUPS.iter().map(|g| g.to_string()).collect(),
            limit: DEFAULT_LIMIT,
            horizon_hours: DEFAULT_HORIZON_HOURS,
            min_risk: 0.0,
            train_classifier: false,
            currency: "₹".to_string(),
            economics: BTreeMap::new(),
        }
    }
}

fn check_range(name: &'static str, value: f64, (min, max): (f64, f64)) -> Result<(), ConfigError> {
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}

impl AnalysisConfig {
    /// Read a JSON config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "limit",
            self.limit as f64,
            (LIMIT_RANGE.0 as f64, LIMIT_RANGE.1 as f64),
        )?;
        check_range(
            "horizon_hours",
            f64::from(self.horizon_hours),
            (f64::from(HORIZON_RANGE.0), f64::from(HORIZON_RANGE.1)),
        )?;
        check_range("min_risk", self.min_risk, MIN_RISK_RANGE)?;
        Ok(())
    }

    pub fn horizon(&self) -> f64 {
        f64::from(self.horizon_hours)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
