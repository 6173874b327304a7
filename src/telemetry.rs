//! Telemetry normalization.
//!
//! Turns a batch of open-ended JSON records for one group into a
//! rectangular numeric feature matrix plus a parallel side-table of unit
//! identity and timestamp. Field typing is decided per column across the
//! whole batch: a field becomes a feature only if every value it carries
//! is a JSON number.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use indexmap::IndexMap;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Field holding the observation instant.
pub const TIMESTAMP_FIELD: &str = "ts";

/// Field identifying the unit (twin) within a group.
pub const UNIT_FIELD: &str = "twinId";

/// Record identity and status fields, dropped before typing.
const DROPPED_FIELDS: &[&str] = &["_id", "status"];

/// Presentation-only fields, never features (matched case-insensitively).
const PRESENTATION_FIELDS: &[&str] = &["sales", "lastsales"];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// One raw observation: an ordered mapping of field name to JSON value.
pub type TelemetryRecord = IndexMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Timestamp,
    Unit,
    Dropped,
    PresentationOnly,
    /// Candidate feature; kept only if the column is numeric.
    Metric,
}

/// Numeric feature table. Cells are `None` where a record lacks the field
/// or carries `null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    rows: Vec<Vec<Option<f64>>>,
}

impl FeatureMatrix {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<f64>>>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == columns.len()));
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Option<f64>]> {
        self.rows.iter().map(Vec::as_slice)
    }

    /// Present values of column `j`, in row order.
    pub fn column_values(&self, j: usize) -> impl Iterator<Item = f64> + '_ {
        self.rows.iter().filter_map(move |row| row.get(j).copied().flatten())
    }

    /// Sub-matrix holding the given rows, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> FeatureMatrix {
        FeatureMatrix {
            columns: self.columns.clone(),
            rows: indices
                .iter()
                .filter_map(|&i| self.rows.get(i).cloned())
                .collect(),
        }
    }
}

/// Identity and time of one matrix row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowKey {
    pub unit: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Rows of one unit inside a [`NormalizedBatch`].
#[derive(Debug, Clone, PartialEq)]
pub struct UnitRows {
    /// `None` when the batch carries no unit identifiers at all.
    pub unit: Option<String>,
    pub rows: Vec<usize>,
}

/// A group's batch after normalization, sorted by ascending timestamp.
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub group: String,
    pub features: FeatureMatrix,
    /// Parallel to the matrix rows.
    pub keys: Vec<RowKey>,
    /// True if any record carried a non-null unit identifier.
    pub has_unit_field: bool,
}

impl NormalizedBatch {
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Partition rows by unit identifier, in order of first appearance.
    ///
    /// Without any identifier in the batch every row belongs to one implicit
    /// unit. With identifiers present, rows lacking one join no unit.
    pub fn units(&self) -> Vec<UnitRows> {
        if self.is_empty() {
            return Vec::new();
        }
        if !self.has_unit_field {
            return vec![UnitRows {
                unit: None,
                rows: (0..self.features.n_rows()).collect(),
            }];
        }

        let mut by_unit: IndexMap<&str, Vec<usize>> = IndexMap::new();
        for (i, key) in self.keys.iter().enumerate() {
            if let Some(unit) = key.unit.as_deref() {
                by_unit.entry(unit).or_default().push(i);
            }
        }
        by_unit
            .into_iter()
            .map(|(unit, rows)| UnitRows {
                unit: Some(unit.to_string()),
                rows,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Field typing
// ---------------------------------------------------------------------------

pub fn classify_field(name: &str) -> FieldKind {
    if name == TIMESTAMP_FIELD {
        FieldKind::Timestamp
    } else if name == UNIT_FIELD {
        FieldKind::Unit
    } else if DROPPED_FIELDS.contains(&name) {
        FieldKind::Dropped
    } else if PRESENTATION_FIELDS
        .iter()
        .any(|f| name.eq_ignore_ascii_case(f))
    {
        FieldKind::PresentationOnly
    } else {
        FieldKind::Metric
    }
}

/// Feature columns of a batch, in order of first appearance.
///
/// A metric field qualifies when it holds at least one number and nothing
/// but numbers or nulls. Booleans and numeric strings disqualify it.
pub fn numeric_columns(records: &[TelemetryRecord]) -> Vec<String> {
    // (all values numeric, saw a number)
    let mut seen: IndexMap<&str, (bool, bool)> = IndexMap::new();
    for record in records {
        for (name, value) in record {
            if classify_field(name) != FieldKind::Metric {
                continue;
            }
            let entry = seen.entry(name.as_str()).or_insert((true, false));
            match value {
                Value::Null => {}
                Value::Number(_) => entry.1 = true,
                _ => entry.0 = false,
            }
        }
    }
    seen.into_iter()
        .filter(|(_, (numeric, any))| *numeric && *any)
        .map(|(name, _)| name.to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Timestamps and identifiers
// ---------------------------------------------------------------------------

/// Coerce a timestamp value; anything unrecognised is `None`, not an error.
///
/// Accepts RFC 3339 strings, naive date-times (taken as UTC), epoch
/// milliseconds, and extended-JSON `{"$date": ...}` wrappers.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => {
            let millis = match n.as_i64() {
                Some(m) => m,
                None => {
                    let f = n.as_f64().filter(|f| f.is_finite())?;
                    f as i64
                }
            };
            Utc.timestamp_millis_opt(millis).single()
        }
        Value::Object(map) => map.get("$date").and_then(parse_timestamp),
        _ => None,
    }
}

fn parse_timestamp_str(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn unit_id(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Normalize
// ---------------------------------------------------------------------------

/// Build the feature matrix and identity side-table for one group's batch.
///
/// An empty input yields an empty batch, which callers treat as "no data".
/// Rows are ordered by ascending timestamp; rows without a usable timestamp
/// keep their relative order after all timed rows.
pub fn normalize(group: &str, records: &[TelemetryRecord]) -> NormalizedBatch {
    let columns = numeric_columns(records);

    let mut parsed: Vec<(RowKey, Vec<Option<f64>>)> = records
        .iter()
        .map(|record| {
            let key = RowKey {
                unit: record.get(UNIT_FIELD).and_then(unit_id),
                timestamp: record.get(TIMESTAMP_FIELD).and_then(parse_timestamp),
            };
            let cells = columns
                .iter()
                .map(|c| record.get(c).and_then(Value::as_f64))
                .collect();
            (key, cells)
        })
        .collect();
    parsed.sort_by_key(|(key, _)| (key.timestamp.is_none(), key.timestamp));

    let has_unit_field = parsed.iter().any(|(key, _)| key.unit.is_some());
    let (keys, rows): (Vec<RowKey>, Vec<Vec<Option<f64>>>) = parsed.into_iter().unzip();

    NormalizedBatch {
        group: group.to_string(),
        features: FeatureMatrix::new(columns, rows),
        keys,
        has_unit_field,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
