//! Per-row anomaly scoring for one unit.
//!
//! Each row's risk is the fraction of its feature columns whose z-score
//! (against the unit's own window) is out of band. The unit's aggregate
//! risk is the mean of those fractions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::anomaly::{mean, out_of_band_counts};
use crate::telemetry::{FeatureMatrix, NormalizedBatch, UnitRows};

/// Units with fewer rows than this are not scored.
pub const MIN_UNIT_ROWS: usize = 30;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Risk of one timestamped row, retained for trend display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskTimePoint {
    pub group: String,
    pub unit: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Anomaly fraction in [0, 1].
    pub risk: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitScore {
    pub unit: Option<String>,
    /// Rows scored, including rows without a timestamp.
    pub rows: usize,
    pub row_risk: Vec<f64>,
    /// Mean row risk, clipped to [0, 1].
    pub aggregate: f64,
    /// One point per timestamped row, ascending.
    pub time_points: Vec<RiskTimePoint>,
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

/// Anomaly fraction of every row of `matrix`.
///
/// The denominator is the matrix width, so a missing cell counts as in band.
/// A matrix with no columns scores 0 everywhere.
pub fn anomaly_fractions(matrix: &FeatureMatrix) -> Vec<f64> {
    let width = matrix.n_cols();
    if width == 0 {
        return vec![0.0; matrix.n_rows()];
    }
    out_of_band_counts(matrix)
        .into_iter()
        .map(|n| (n as f64 / width as f64).clamp(0.0, 1.0))
        .collect()
}

/// Mean of row fractions clipped to [0, 1]; 0 for an empty window.
pub fn aggregate_risk(fractions: &[f64]) -> f64 {
    mean(fractions).clamp(0.0, 1.0)
}

/// Score one unit of a batch, or `None` if it is below [`MIN_UNIT_ROWS`].
pub fn score_unit(batch: &NormalizedBatch, unit: &UnitRows) -> Option<UnitScore> {
    if unit.rows.len() < MIN_UNIT_ROWS {
        debug!(
            group = %batch.group,
            unit = ?unit.unit,
            rows = unit.rows.len(),
            "skipping unit below row floor"
        );
        return None;
    }

    let matrix = batch.features.select_rows(&unit.rows);
    let row_risk = anomaly_fractions(&matrix);

    let time_points = unit
        .rows
        .iter()
        .zip(&row_risk)
        .filter_map(|(&i, &risk)| {
            let timestamp = batch.keys.get(i)?.timestamp?;
            Some(RiskTimePoint {
                group: batch.group.clone(),
                unit: unit.unit.clone(),
                timestamp,
                risk,
            })
        })
        .collect();

    Some(UnitScore {
        unit: unit.unit.clone(),
        rows: unit.rows.len(),
        aggregate: aggregate_risk(&row_risk),
        row_risk,
        time_points,
    })
}

/// Score every unit of a batch that clears the row floor.
pub fn score_batch(batch: &NormalizedBatch) -> Vec<UnitScore> {
    batch
        .units()
        .iter()
        .filter_map(|unit| score_unit(batch, unit))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{normalize, TelemetryRecord};
    use serde_json::json;

    fn records(unit: &str, n: usize, f: impl Fn(usize) -> serde_json::Value) -> Vec<TelemetryRecord> {
        (0..n)
            .map(|i| {
                let mut r: TelemetryRecord = serde_json::from_value(f(i)).unwrap();
                r.insert("twinId".into(), json!(unit));
                r.insert("ts".into(), json!(format!("2025-01-01T00:{:02}:{:02}Z", i / 60, i % 60)));
                r
            })
            .collect()
    }

    #[test]
    fn no_columns_scores_zero() {
        let m = FeatureMatrix::new(Vec::new(), vec![Vec::new(); 5]);
        assert_eq!(anomaly_fractions(&m), vec![0.0; 5]);
    }

    #[test]
    fn empty_window_aggregate_zero() {
        assert_eq!(aggregate_risk(&[]), 0.0);
    }

    #[test]
    fn spike_hits_one_of_two_columns() {
        let recs = records("t1", 40, |i| {
            let v = if i == 39 { 500.0 } else { 10.0 + (i % 3) as f64 };
            json!({"v": v, "w": 1.0 + (i % 2) as f64})
        });
        let batch = normalize("g", &recs);
        let scores = score_batch(&batch);
        assert_eq!(scores.len(), 1);
        let s = &scores[0];
        assert_eq!(s.row_risk[39], 0.5);
        assert!(s.row_risk[..39].iter().all(|&r| r == 0.0));
        assert!((s.aggregate - 0.5 / 40.0).abs() < 1e-12);
    }

    #[test]
    fn fractions_bounded() {
        let recs = records("t1", 60, |i| {
            json!({"a": (i * i) as f64, "b": if i % 17 == 0 { 1e6 } else { 0.0 }, "c": i as f64})
        });
        for s in score_batch(&normalize("g", &recs)) {
            assert!(s.row_risk.iter().all(|r| (0.0..=1.0).contains(r)));
            assert!((0.0..=1.0).contains(&s.aggregate));
        }
    }

    #[test]
    fn constant_unit_has_zero_risk() {
        let recs = records("flat", 45, |_| json!({"a": 7.0, "b": -2.0}));
        let scores = score_batch(&normalize("g", &recs));
        assert_eq!(scores[0].aggregate, 0.0);
    }

    #[test]
    fn row_floor() {
        let mut recs = records("small", 29, |i| json!({"a": i as f64}));
        recs.extend(records("big", 30, |i| json!({"a": i as f64})));
        let scores = score_batch(&normalize("g", &recs));
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].unit.as_deref(), Some("big"));
    }

    #[test]
    fn untimed_rows_count_but_do_not_plot() {
        let mut recs = records("t1", 35, |i| json!({"a": i as f64}));
        recs[3].insert("ts".into(), json!("not a time"));
        recs[4].shift_remove("ts");
        let scores = score_batch(&normalize("g", &recs));
        assert_eq!(scores[0].rows, 35);
        assert_eq!(scores[0].row_risk.len(), 35);
        assert_eq!(scores[0].time_points.len(), 33);
        let ts: Vec<_> = scores[0].time_points.iter().map(|p| p.timestamp).collect();
        assert!(ts.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn stats_are_per_unit() {
        // Unit b sits far from unit a, but each is calm relative to itself.
        let mut recs = records("a", 40, |i| json!({"v": (i % 4) as f64}));
        recs.extend(records("b", 40, |i| json!({"v": 1000.0 + (i % 4) as f64})));
        for s in score_batch(&normalize("g", &recs)) {
            assert_eq!(s.aggregate, 0.0);
        }
    }
}
