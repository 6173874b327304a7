//! Analysis pass.
//!
//! [`RiskEngine`] owns the configuration and the effective economic
//! profiles. Each call to [`RiskEngine::run`] fetches every configured
//! group, scores its units and projects costs from scratch; nothing is
//! cached between passes, so the same telemetry and profiles always give
//! the same report.

use std::fmt;

use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::anomaly::synthesize_labels;
use crate::classifier::{train_classifier, ClassifierSummary};
use crate::config::AnalysisConfig;
use crate::economics::{round_to, CostProjection, EconomicProfiles, ProfileOverride};
use crate::error::ConfigError;
use crate::scorer::{score_batch, RiskTimePoint};
use crate::severity::Severity;
use crate::source::TelemetrySource;
use crate::telemetry::{normalize, TelemetryRecord};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Decimals of every risk value shown to a reader.
pub const RISK_DECIMALS: i32 = 3;

/// Risk as displayed. Filtering and ordering compare on this, not the raw
/// fraction.
pub fn displayed_risk(risk: f64) -> f64 {
    round_to(risk, RISK_DECIMALS)
}

fn round3<S: Serializer>(value: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(displayed_risk(*value))
}

/// Risk and cost for one (group, unit).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub group: String,
    /// `None` for the implicit unit of a group without unit identifiers.
    pub unit: Option<String>,
    /// Unrounded aggregate risk; serialized with 3 decimals.
    #[serde(serialize_with = "round3")]
    pub risk: f64,
    pub severity: Severity,
    pub horizon_hours: u32,
    #[serde(flatten)]
    pub costs: CostProjection,
    pub rows: usize,
}

impl RiskAssessment {
    /// Revenue loss plus maintenance cost: exposure if the unit fails.
    pub fn failure_cost(&self) -> f64 {
        self.costs.revenue_loss + self.costs.maintenance_cost
    }
}

/// Time series of one scored unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitTrend {
    pub unit: Option<String>,
    #[serde(serialize_with = "round3")]
    pub avg_risk: f64,
    pub points: Vec<RiskTimePoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupTrend {
    pub group: String,
    pub units: Vec<UnitTrend>,
    /// Scored units left out for falling below the minimum risk.
    pub hidden_units: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoticeKind {
    NoData,
    FetchFailed { reason: String },
    NoTrendData { hidden_units: usize },
}

/// Operator-facing condition for one group. Never fatal to the pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupNotice {
    pub group: String,
    #[serde(flatten)]
    pub kind: NoticeKind,
}

impl fmt::Display for GroupNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NoticeKind::NoData => write!(f, "no data for {}", self.group),
            NoticeKind::FetchFailed { reason } => {
                write!(f, "could not fetch {}: {reason}", self.group)
            }
            NoticeKind::NoTrendData { hidden_units: 0 } => {
                write!(f, "no time series data for {}", self.group)
            }
            NoticeKind::NoTrendData { hidden_units } => write!(
                f,
                "no time series data for {} ({hidden_units} units below minimum risk)",
                self.group
            ),
        }
    }
}

/// Result of analysing one group's batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupAnalysis {
    pub group: String,
    pub rows: usize,
    pub assessments: Vec<RiskAssessment>,
    /// One entry per scored unit, unfiltered.
    pub series: Vec<UnitTrend>,
    pub classifier: Option<ClassifierSummary>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub horizon_hours: u32,
    /// Highest severity first, then highest risk.
    pub assessments: Vec<RiskAssessment>,
    pub trends: Vec<GroupTrend>,
    pub notices: Vec<GroupNotice>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub classifiers: Vec<ClassifierSummary>,
}

impl AnalysisReport {
    pub fn severity_counts(&self) -> SeverityCounts {
        let mut counts = SeverityCounts::default();
        for a in &self.assessments {
            match a.severity {
                Severity::High => counts.high += 1,
                Severity::Medium => counts.medium += 1,
                Severity::Low => counts.low += 1,
            }
        }
        counts
    }

    pub fn total_revenue_at_risk(&self) -> f64 {
        self.assessments.iter().map(|a| a.costs.revenue_loss).sum()
    }

    pub fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &RiskAssessment> {
        self.assessments.iter().filter(move |a| a.severity == severity)
    }
}

pub fn sort_assessments(assessments: &mut [RiskAssessment]) {
    assessments.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| displayed_risk(b.risk).total_cmp(&displayed_risk(a.risk)))
    });
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RiskEngine {
    config: AnalysisConfig,
    profiles: EconomicProfiles,
}

impl RiskEngine {
    /// Validate `config` and commit its economic overrides on top of the
    /// built-in profiles.
    pub fn new(config: AnalysisConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut profiles = EconomicProfiles::with_defaults();
        profiles.apply(config.economics.iter().map(|(g, u)| (g.as_str(), *u)))?;
        Ok(Self { config, profiles })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn profiles(&self) -> &EconomicProfiles {
        &self.profiles
    }

    /// Commit overrides for all later passes. All or nothing: on error the
    /// profiles are unchanged.
    pub fn apply_overrides(&mut self, overrides: &[ProfileOverride]) -> Result<(), ConfigError> {
        let mut staged = self.profiles.clone();
        for o in overrides {
            staged.set(&o.group, o.key, o.value)?;
        }
        self.profiles = staged;
        info!(count = overrides.len(), "applied economic overrides");
        Ok(())
    }

    /// Score one group's records. An empty batch yields an empty analysis.
    pub fn analyze_group(&self, group: &str, records: &[TelemetryRecord]) -> GroupAnalysis {
        let batch = normalize(group, records);
        let mut analysis = GroupAnalysis {
            group: group.to_string(),
            rows: batch.features.n_rows(),
            ..Default::default()
        };
        if batch.is_empty() {
            return analysis;
        }

        if batch.has_unit_field {
            let orphans = batch.keys.iter().filter(|k| k.unit.is_none()).count();
            if orphans > 0 {
                debug!(group, rows = orphans, "rows without unit id left out");
            }
        }

        let horizon = self.config.horizon();
        for score in score_batch(&batch) {
            analysis.assessments.push(RiskAssessment {
                group: group.to_string(),
                unit: score.unit.clone(),
                risk: score.aggregate,
                severity: Severity::from_risk(score.aggregate),
                horizon_hours: self.config.horizon_hours,
                costs: self.profiles.project(score.aggregate, group, horizon),
                rows: score.rows,
            });
            analysis.series.push(UnitTrend {
                unit: score.unit,
                avg_risk: score.aggregate,
                points: score.time_points,
            });
        }

        if self.config.train_classifier {
            let labels = synthesize_labels(&batch.features);
            match train_classifier(&batch.features, &labels) {
                Ok(trained) => {
                    debug!(group, path = ?trained.path, "classifier trained");
                    analysis.classifier = Some(trained.summary(group, &labels));
                }
                Err(e) => warn!(group, error = %e, "classifier training failed"),
            }
        }
        analysis
    }

    /// Trend output for a group: units at or above the minimum risk that
    /// have at least one timestamped row. Independent of the assessments.
    fn trend(&self, analysis: &GroupAnalysis) -> GroupTrend {
        let (shown, hidden): (Vec<&UnitTrend>, Vec<&UnitTrend>) = analysis
            .series
            .iter()
            .partition(|s| displayed_risk(s.avg_risk) >= self.config.min_risk);
        GroupTrend {
            group: analysis.group.clone(),
            units: shown
                .into_iter()
                .filter(|s| !s.points.is_empty())
                .cloned()
                .collect(),
            hidden_units: hidden.len(),
        }
    }

    /// One full analysis pass over every configured group. A group that
    /// fails to fetch becomes a notice; the remaining groups still run.
    pub fn run<S: TelemetrySource + ?Sized>(&self, source: &S) -> AnalysisReport {
        let mut report = AnalysisReport {
            horizon_hours: self.config.horizon_hours,
            ..Default::default()
        };

        for group in &self.config.groups {
            let records = match source.fetch_recent(group, self.config.limit) {
                Ok(records) => records,
                Err(e) => {
                    warn!(group = %group, error = %e, "fetch failed");
                    report.notices.push(GroupNotice {
                        group: group.clone(),
                        kind: NoticeKind::FetchFailed {
                            reason: e.to_string(),
                        },
                    });
                    continue;
                }
            };
            if records.is_empty() {
                warn!(group = %group, "no data");
                report.notices.push(GroupNotice {
                    group: group.clone(),
                    kind: NoticeKind::NoData,
                });
                continue;
            }

            let analysis = self.analyze_group(group, &records);
            info!(
                group = %group,
                rows = analysis.rows,
                units = analysis.assessments.len(),
                "group analysed"
            );

            if !analysis.assessments.is_empty() {
                let trend = self.trend(&analysis);
                if trend.units.is_empty() {
                    report.notices.push(GroupNotice {
                        group: group.clone(),
                        kind: NoticeKind::NoTrendData {
                            hidden_units: trend.hidden_units,
                        },
                    });
                } else {
                    report.trends.push(trend);
                }
            }
            report.assessments.extend(analysis.assessments);
            report.classifiers.extend(analysis.classifier);
        }

        sort_assessments(&mut report.assessments);
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
