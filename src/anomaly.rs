//! Population statistics and z-score banding.
//!
//! Every statistic here is computed from the same window that is being
//! scored: risk is relative to the unit's own recent behaviour, not to a
//! separate healthy baseline.

use crate::telemetry::FeatureMatrix;

/// A cell is out of band when its absolute z-score exceeds this.
pub const Z_THRESHOLD: f64 = 3.0;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Population mean and standard deviation (ddof = 0) of one column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnStats {
    pub mean: f64,
    /// Never zero: a constant column gets 1 so its z-scores are all 0.
    pub std: f64,
}

impl ColumnStats {
    pub fn from_values(vals: &[f64]) -> Option<Self> {
        if vals.is_empty() {
            return None;
        }
        let m = mean(vals);
        let sd = population_stdev(vals, m);
        Some(Self {
            mean: m,
            std: if sd == 0.0 { 1.0 } else { sd },
        })
    }

    #[inline]
    pub fn z(&self, x: f64) -> f64 {
        (x - self.mean) / self.std
    }
}

// ---------------------------------------------------------------------------
// Statistics helpers
// ---------------------------------------------------------------------------

pub fn mean(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return 0.0;
    }
    vals.iter().sum::<f64>() / vals.len() as f64
}

fn population_stdev(vals: &[f64], m: f64) -> f64 {
    if vals.is_empty() {
        return 0.0;
    }
    let var: f64 = vals.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / vals.len() as f64;
    var.sqrt()
}

/// Per-column statistics over present cells. Columns with no present cell
/// have no statistics and never produce an out-of-band cell.
pub fn column_stats(matrix: &FeatureMatrix) -> Vec<Option<ColumnStats>> {
    (0..matrix.n_cols())
        .map(|j| {
            let vals: Vec<f64> = matrix.column_values(j).collect();
            ColumnStats::from_values(&vals)
        })
        .collect()
}

#[inline]
pub fn is_out_of_band(cell: Option<f64>, stats: Option<&ColumnStats>) -> bool {
    match (cell, stats) {
        (Some(x), Some(s)) => s.z(x).abs() > Z_THRESHOLD,
        _ => false,
    }
}

/// Number of out-of-band cells in each row.
pub fn out_of_band_counts(matrix: &FeatureMatrix) -> Vec<usize> {
    let stats = column_stats(matrix);
    matrix
        .rows()
        .map(|row| {
            row.iter()
                .zip(&stats)
                .filter(|(cell, s)| is_out_of_band(**cell, s.as_ref()))
                .count()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Label synthesis
// ---------------------------------------------------------------------------

/// Binary at-risk label per row: 1 if any cell is out of band, else 0.
///
/// Statistics are taken over the whole matrix passed in (the full group
/// batch), not per unit. The labels only feed the classifier trainer.
pub fn synthesize_labels(matrix: &FeatureMatrix) -> Vec<u8> {
    out_of_band_counts(matrix)
        .into_iter()
        .map(|n| u8::from(n > 0))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
