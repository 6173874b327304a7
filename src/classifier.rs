//! Binary at-risk classifier over a group's feature matrix.
//!
//! Informational only: nothing downstream consumes its predictions and the
//! displayed risk is always the raw anomaly fraction. When the labels carry
//! no class diversity the forest is fitted on random synthetic data of the
//! same width, which keeps the model shape consistent but makes it
//! meaningless for that batch; [`TrainingPath::Synthetic`] records when that
//! happened.

use std::fmt;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use smartcore::ensemble::random_forest_classifier::{
    RandomForestClassifier, RandomForestClassifierParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::model_selection::train_test_split;

use crate::anomaly::ColumnStats;
use crate::error::ClassifierError;
use crate::telemetry::FeatureMatrix;

/// Seed for splits, forests and synthetic data, so repeated passes agree.
pub const SEED: u64 = 42;

/// Share of rows held out for evaluation.
pub const TEST_FRACTION: f64 = 0.25;

pub const OBSERVED_TREES: u16 = 200;
pub const SYNTHETIC_TREES: u16 = 50;

/// Feature name used when the matrix has no columns.
const PLACEHOLDER_FEATURE: &str = "f0";

const MIN_SYNTHETIC_ROWS: usize = 20;

type Forest = RandomForestClassifier<f64, u32, DenseMatrix<f64>, Vec<u32>>;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingPath {
    /// Observed data, class-stratified split.
    Stratified,
    /// Observed data, a class had fewer than 2 samples.
    Plain,
    /// Synthetic fallback: empty matrix or a single label class.
    Synthetic,
}

/// Random forest plus the per-column fill used for missing (NaN) inputs.
pub struct AtRiskModel {
    forest: Forest,
    fill: Vec<f64>,
}

impl fmt::Debug for AtRiskModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtRiskModel")
            .field("n_features", &self.fill.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct TrainedClassifier {
    pub model: AtRiskModel,
    /// Column order the model expects at prediction time.
    pub feature_names: Vec<String>,
    pub path: TrainingPath,
    pub train_rows: usize,
    pub test_rows: usize,
    pub test_accuracy: Option<f64>,
}

/// Serializable outcome of a training run for one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifierSummary {
    pub group: String,
    pub feature_names: Vec<String>,
    pub path: TrainingPath,
    pub train_rows: usize,
    pub test_rows: usize,
    pub positive_labels: usize,
    pub test_accuracy: Option<f64>,
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

fn dense(rows: Vec<Vec<f64>>) -> Result<DenseMatrix<f64>, ClassifierError> {
    DenseMatrix::from_2d_vec(&rows).map_err(|e| ClassifierError::Matrix(e.to_string()))
}

/// Mean of the finite values of each column; 0 for a column with none.
fn column_means(rows: &[Vec<f64>], width: usize) -> Vec<f64> {
    (0..width)
        .map(|j| {
            let vals: Vec<f64> = rows
                .iter()
                .filter_map(|r| r.get(j).copied())
                .filter(|v| v.is_finite())
                .collect();
            ColumnStats::from_values(&vals).map_or(0.0, |s| s.mean)
        })
        .collect()
}

fn impute(rows: &[Vec<f64>], fill: &[f64]) -> Vec<Vec<f64>> {
    rows.iter()
        .map(|row| {
            row.iter()
                .zip(fill)
                .map(|(&v, &f)| if v.is_finite() { v } else { f })
                .collect()
        })
        .collect()
}

impl AtRiskModel {
    /// Fit a seeded forest of `n_trees` on `rows` (NaN = missing).
    pub fn fit(rows: &[Vec<f64>], labels: &[u32], n_trees: u16) -> Result<Self, ClassifierError> {
        let width = rows.first().map_or(0, Vec::len);
        let fill = column_means(rows, width);
        let x = dense(impute(rows, &fill))?;
        Self::fit_dense(&x, &labels.to_vec(), fill, n_trees)
    }

    fn fit_dense(
        x: &DenseMatrix<f64>,
        y: &Vec<u32>,
        fill: Vec<f64>,
        n_trees: u16,
    ) -> Result<Self, ClassifierError> {
        let params = RandomForestClassifierParameters::default()
            .with_n_trees(n_trees)
            .with_seed(SEED);
        let forest = RandomForestClassifier::fit(x, y, params)
            .map_err(|e| ClassifierError::Fit(e.to_string()))?;
        Ok(Self { forest, fill })
    }

    pub fn n_features(&self) -> usize {
        self.fill.len()
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<u32>, ClassifierError> {
        self.predict_dense(&dense(impute(rows, &self.fill))?)
    }

    fn predict_dense(&self, x: &DenseMatrix<f64>) -> Result<Vec<u32>, ClassifierError> {
        self.forest
            .predict(x)
            .map_err(|e| ClassifierError::Predict(e.to_string()))
    }
}

impl TrainedClassifier {
    pub fn summary(&self, group: &str, labels: &[u8]) -> ClassifierSummary {
        ClassifierSummary {
            group: group.to_string(),
            feature_names: self.feature_names.clone(),
            path: self.path,
            train_rows: self.train_rows,
            test_rows: self.test_rows,
            positive_labels: labels.iter().filter(|&&l| l == 1).count(),
            test_accuracy: self.test_accuracy,
        }
    }
}

// ---------------------------------------------------------------------------
// Training
// ---------------------------------------------------------------------------

/// Row-major copy of a feature matrix; missing cells become NaN.
pub fn to_rows(matrix: &FeatureMatrix) -> Vec<Vec<f64>> {
    matrix
        .rows()
        .map(|row| row.iter().map(|c| c.unwrap_or(f64::NAN)).collect())
        .collect()
}

fn test_count(n: usize, fraction: f64) -> usize {
    if n < 2 {
        return 0;
    }
    ((n as f64 * fraction).ceil() as usize).clamp(1, n - 1)
}

/// Shuffle row indices into (train, test). With `stratify`, each class is
/// split separately so both sides keep the class mix.
pub fn split_indices(
    labels: &[u8],
    test_fraction: f64,
    stratify: bool,
    rng: &mut StdRng,
) -> (Vec<usize>, Vec<usize>) {
    let strata: Vec<Vec<usize>> = if stratify {
        [0u8, 1]
            .iter()
            .map(|&class| {
                labels
                    .iter()
                    .enumerate()
                    .filter(|(_, &l)| l == class)
                    .map(|(i, _)| i)
                    .collect()
            })
            .collect()
    } else {
        vec![(0..labels.len()).collect()]
    };

    let mut train = Vec::with_capacity(labels.len());
    let mut test = Vec::new();
    for mut idx in strata {
        idx.shuffle(rng);
        let n_test = test_count(idx.len(), test_fraction);
        test.extend_from_slice(&idx[..n_test]);
        train.extend_from_slice(&idx[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

fn train_synthetic(
    rows: usize,
    feature_names: Vec<String>,
    rng: &mut StdRng,
) -> Result<TrainedClassifier, ClassifierError> {
    let n_rows = rows.max(MIN_SYNTHETIC_ROWS);
    let width = feature_names.len();
    let x: Vec<Vec<f64>> = (0..n_rows)
        .map(|_| (0..width).map(|_| standard_normal(rng)).collect())
        .collect();
    let y: Vec<u32> = (0..n_rows).map(|_| rng.gen_range(0..2u32)).collect();
    Ok(TrainedClassifier {
        model: AtRiskModel::fit(&x, &y, SYNTHETIC_TREES)?,
        feature_names,
        path: TrainingPath::Synthetic,
        train_rows: n_rows,
        test_rows: 0,
        test_accuracy: None,
    })
}

/// Train and held-out sets, already imputed.
struct Split {
    x_train: DenseMatrix<f64>,
    y_train: Vec<u32>,
    test: Option<(DenseMatrix<f64>, Vec<u32>)>,
}

fn stratified_split(
    rows: &[Vec<f64>],
    labels: &[u8],
    y: &[u32],
    rng: &mut StdRng,
) -> Result<Split, ClassifierError> {
    let (train_idx, test_idx) = split_indices(labels, TEST_FRACTION, true, rng);
    let pick = |idx: &[usize]| -> (Vec<Vec<f64>>, Vec<u32>) {
        (
            idx.iter().map(|&i| rows[i].clone()).collect(),
            idx.iter().map(|&i| y[i]).collect(),
        )
    };
    let (x_train, y_train) = pick(&train_idx);
    let (x_test, y_test) = pick(&test_idx);
    Ok(Split {
        x_train: dense(x_train)?,
        y_train,
        test: Some((dense(x_test)?, y_test)),
    })
}

fn plain_split(rows: Vec<Vec<f64>>, y: Vec<u32>) -> Result<Split, ClassifierError> {
    let x = dense(rows)?;
    // The library split needs at least one held-out row.
    if ((y.len() as f64) * TEST_FRACTION) < 1.0 {
        return Ok(Split {
            x_train: x,
            y_train: y,
            test: None,
        });
    }
    let (x_train, x_test, y_train, y_test) =
        train_test_split(&x, &y, TEST_FRACTION as f32, true, Some(SEED));
    Ok(Split {
        x_train,
        y_train,
        test: Some((x_test, y_test)),
    })
}

/// Fit a classifier on `matrix` against synthesized `labels`.
pub fn train_classifier(
    matrix: &FeatureMatrix,
    labels: &[u8],
) -> Result<TrainedClassifier, ClassifierError> {
    let mut rng = StdRng::seed_from_u64(SEED);

    let mut feature_names = matrix.columns().to_vec();
    if feature_names.is_empty() {
        feature_names.push(PLACEHOLDER_FEATURE.to_string());
    }

    let diverse = labels.first().is_some_and(|&first| labels.iter().any(|&l| l != first));
    if matrix.is_empty()
        || matrix.n_cols() == 0
        || labels.len() != matrix.n_rows()
        || !diverse
    {
        return train_synthetic(matrix.n_rows(), feature_names, &mut rng);
    }

    let rows = to_rows(matrix);
    let fill = column_means(&rows, matrix.n_cols());
    let imputed = impute(&rows, &fill);
    let y: Vec<u32> = labels.iter().map(|&l| u32::from(l)).collect();

    let positives = labels.iter().filter(|&&l| l == 1).count();
    let stratify = positives.min(labels.len() - positives) >= 2;
    let split = if stratify {
        stratified_split(&imputed, labels, &y, &mut rng)?
    } else {
        plain_split(imputed, y)?
    };

    let model = AtRiskModel::fit_dense(&split.x_train, &split.y_train, fill, OBSERVED_TREES)?;
    let (test_rows, test_accuracy) = match &split.test {
        Some((x_test, y_test)) if !y_test.is_empty() => {
            let predicted = model.predict_dense(x_test)?;
            let correct = predicted.iter().zip(y_test).filter(|(p, y)| p == y).count();
            (y_test.len(), Some(correct as f64 / y_test.len() as f64))
        }
        _ => (0, None),
    };

    Ok(TrainedClassifier {
        model,
        feature_names,
        path: if stratify {
            TrainingPath::Stratified
        } else {
            TrainingPath::Plain
        },
        train_rows: split.y_train.len(),
        test_rows,
        test_accuracy,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(cols: &[&str], rows: Vec<Vec<Option<f64>>>) -> FeatureMatrix {
        FeatureMatrix::new(cols.iter().map(|c| c.to_string()).collect(), rows)
    }

    /// 20 rows near 0 labelled 0, 20 rows near 100 labelled 1.
    fn separable() -> (FeatureMatrix, Vec<u8>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..40 {
            let high = i >= 20;
            let base = if high { 100.0 } else { 0.0 };
            rows.push(vec![Some(base + (i % 20) as f64), Some((i % 3) as f64)]);
            labels.push(u8::from(high));
        }
        (matrix(&["x", "noise"], rows), labels)
    }

    #[test]
    fn no_columns_uses_placeholder() {
        let m = matrix(&[], vec![vec![]; 5]);
        let t = train_classifier(&m, &[0; 5]).unwrap();
        assert_eq!(t.feature_names, vec!["f0"]);
        assert_eq!(t.path, TrainingPath::Synthetic);
        assert_eq!(t.model.n_features(), 1);
        assert_eq!(t.train_rows, MIN_SYNTHETIC_ROWS);
    }

    #[test]
    fn single_class_falls_back_to_synthetic() {
        let rows = (0..50).map(|i| vec![Some(i as f64), None, Some(1.0)]).collect();
        let t = train_classifier(&matrix(&["a", "b", "c"], rows), &[0; 50]).unwrap();
        assert_eq!(t.path, TrainingPath::Synthetic);
        assert_eq!(t.model.n_features(), 3);
        assert_eq!(t.feature_names, vec!["a", "b", "c"]);
        assert_eq!(t.train_rows, 50);
        assert!(t.test_accuracy.is_none());
    }

    #[test]
    fn empty_matrix_falls_back() {
        let t = train_classifier(&matrix(&["a"], vec![]), &[]).unwrap();
        assert_eq!(t.path, TrainingPath::Synthetic);
        assert_eq!(t.model.n_features(), 1);
    }

    #[test]
    fn separable_data_stratified() {
        let (m, labels) = separable();
        let t = train_classifier(&m, &labels).unwrap();
        assert_eq!(t.path, TrainingPath::Stratified);
        assert_eq!(t.test_rows, 10);
        assert_eq!(t.train_rows, 30);
        assert!(t.test_accuracy.unwrap() >= 0.9);
        let expected: Vec<u32> = labels.iter().map(|&l| u32::from(l)).collect();
        assert_eq!(t.model.predict(&to_rows(&m)).unwrap(), expected);
    }

    #[test]
    fn lone_positive_plain_split() {
        let rows = (0..12).map(|i| vec![Some(i as f64)]).collect();
        let mut labels = vec![0u8; 12];
        labels[11] = 1;
        let t = train_classifier(&matrix(&["a"], rows), &labels).unwrap();
        assert_eq!(t.path, TrainingPath::Plain);
        assert!(t.test_rows > 0);
        assert_eq!(t.train_rows + t.test_rows, 12);
    }

    #[test]
    fn tiny_plain_batch_trains_on_everything() {
        let rows = (0..3).map(|i| vec![Some(i as f64)]).collect();
        let t = train_classifier(&matrix(&["a"], rows), &[0, 0, 1]).unwrap();
        assert_eq!(t.path, TrainingPath::Plain);
        assert_eq!(t.train_rows, 3);
        assert_eq!(t.test_rows, 0);
        assert!(t.test_accuracy.is_none());
    }

    #[test]
    fn stratified_split_keeps_both_classes() {
        let labels: Vec<u8> = (0..16).map(|i| u8::from(i % 4 == 0)).collect();
        let mut rng = StdRng::seed_from_u64(SEED);
        let (train, test) = split_indices(&labels, TEST_FRACTION, true, &mut rng);
        assert_eq!(train.len() + test.len(), 16);
        assert!(train.iter().all(|i| !test.contains(i)));
        assert!(test.iter().any(|&i| labels[i] == 1));
        assert!(test.iter().any(|&i| labels[i] == 0));
        assert!(train.iter().any(|&i| labels[i] == 1));
    }

    #[test]
    fn training_is_deterministic() {
        let (m, labels) = separable();
        let grid: Vec<Vec<f64>> = (0..25).map(|i| vec![i as f64 * 5.0, 1.0]).collect();
        let a = train_classifier(&m, &labels).unwrap();
        let b = train_classifier(&m, &labels).unwrap();
        assert_eq!(a.model.predict(&grid).unwrap(), b.model.predict(&grid).unwrap());
        assert_eq!(a.test_accuracy, b.test_accuracy);

        let flat = matrix(&["a"], vec![vec![Some(1.0)]; 3]);
        let syn_a = train_classifier(&flat, &[1; 3]).unwrap();
        let syn_b = train_classifier(&flat, &[1; 3]).unwrap();
        let tail: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64 - 5.0]).collect();
        assert_eq!(syn_a.model.predict(&tail).unwrap(), syn_b.model.predict(&tail).unwrap());
    }

    #[test]
    fn missing_inputs_imputed() {
        let (m, labels) = separable();
        let t = train_classifier(&m, &labels).unwrap();
        let p = t.model.predict(&[vec![f64::NAN, f64::NAN]]).unwrap();
        assert_eq!(p.len(), 1);
        assert!(p[0] <= 1);
    }
}
