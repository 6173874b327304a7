//! Telemetry sources.
//!
//! A source bulk-reads the most recent records of one group. The on-disk
//! layout is one JSON-lines file per group under a store directory:
//! `<source>/<store>/<group>.jsonl`.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::telemetry::{parse_timestamp, TelemetryRecord, TIMESTAMP_FIELD};

pub trait TelemetrySource {
    /// Up to `limit` records of `group`, newest first. Records without a
    /// usable timestamp come after all timestamped ones.
    fn fetch_recent(&self, group: &str, limit: usize) -> Result<Vec<TelemetryRecord>, SourceError>;
}

// ---------------------------------------------------------------------------
// JSON lines parsing
// ---------------------------------------------------------------------------

/// Records parsed from a JSON-lines payload.
#[derive(Debug, Clone, Default)]
pub struct ParsedLines {
    pub records: Vec<TelemetryRecord>,
    /// Non-blank lines that were not a JSON object.
    pub parse_errors: usize,
}

/// Parse one JSON object per line. Blank lines are ignored; anything that is
/// not an object is counted and skipped.
pub fn parse_json_lines(data: &str) -> ParsedLines {
    let mut out = ParsedLines::default();
    for (lineno, line) in data.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(map)) => out.records.push(map.into_iter().collect()),
            Ok(_) | Err(_) => {
                debug!(line = lineno + 1, "skipping non-object telemetry line");
                out.parse_errors += 1;
            }
        }
    }
    out
}

/// Order newest first (untimed last, otherwise stable) and keep `limit`.
pub fn newest_first(mut records: Vec<TelemetryRecord>, limit: usize) -> Vec<TelemetryRecord> {
    records.sort_by_cached_key(|r| {
        let ts = r.get(TIMESTAMP_FIELD).and_then(parse_timestamp);
        (ts.is_none(), Reverse(ts))
    });
    records.truncate(limit);
    records
}

// ---------------------------------------------------------------------------
// Directory source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    root: PathBuf,
}

impl JsonLinesSource {
    /// Source reading `<root>/<group>.jsonl`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Source for one store below a telemetry directory.
    pub fn for_store(source: impl AsRef<Path>, store: &str) -> Self {
        Self::new(source.as_ref().join(store))
    }

    pub fn path_for(&self, group: &str) -> PathBuf {
        self.root.join(format!("{group}.jsonl"))
    }
}

impl TelemetrySource for JsonLinesSource {
    fn fetch_recent(&self, group: &str, limit: usize) -> Result<Vec<TelemetryRecord>, SourceError> {
        let path = self.path_for(group);
        let data = fs::read_to_string(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SourceError::GroupNotFound {
                group: group.to_string(),
                path: path.clone(),
            },
            _ => SourceError::Io {
                path: path.clone(),
                source: e,
            },
        })?;

        let parsed = parse_json_lines(&data);
        if parsed.parse_errors > 0 {
            warn!(
                group,
                path = %path.display(),
                skipped = parsed.parse_errors,
                "skipped unreadable telemetry lines"
            );
        }
        Ok(newest_first(parsed.records, limit))
    }
}

// ---------------------------------------------------------------------------
// In-memory source
// ---------------------------------------------------------------------------

/// Source backed by records held in memory. Unknown groups read as empty.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    groups: HashMap<String, Vec<TelemetryRecord>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append records to a group.
    pub fn insert(&mut self, group: &str, records: impl IntoIterator<Item = TelemetryRecord>) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .extend(records);
    }
}

impl TelemetrySource for MemorySource {
    fn fetch_recent(&self, group: &str, limit: usize) -> Result<Vec<TelemetryRecord>, SourceError> {
        let records = self.groups.get(group).cloned().unwrap_or_default();
        Ok(newest_first(records, limit))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
