//! Severity bands and the maintenance narrative attached to them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::economics::round_to;

/// Lower edge of the medium band (inclusive).
pub const MEDIUM_THRESHOLD: f64 = 0.33;

/// Lower edge of the high band (inclusive).
pub const HIGH_THRESHOLD: f64 = 0.66;

const GENERIC_FAILURE_MODES: &[&str] = &["General Equipment Failure"];

const FAILURE_MODES: &[(&str, &[&str])] = &[
    ("drillrig1", &["Mechanical Wear", "Bearing Failure", "Hydraulic System"]),
    ("wellhead1", &["Pressure Valve Failure", "Seal Degradation", "Flow Control Issue"]),
    ("pipeline1", &["Corrosion", "Leak", "Pressure Drop"]),
    ("compressor1", &["Motor Failure", "Overheating", "Energy Inefficiency"]),
    ("refinery1", &["Heat Exchanger Failure", "Catalyst Degradation", "Process Upset"]),
    ("retail1", &["Pump Failure", "Tank Leak", "Dispenser Malfunction"]),
    ("turbine1", &["Blade Damage", "Vibration Excess", "Bearing Wear"]),
    ("transformer1", &["Insulation Breakdown", "Overheating", "Voltage Fluctuation"]),
];

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn from_risk(risk: f64) -> Self {
        if risk >= HIGH_THRESHOLD {
            Severity::High
        } else if risk >= MEDIUM_THRESHOLD {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    pub fn recommended_actions(&self) -> &'static [&'static str] {
        match self {
            Severity::Low => &["No maintenance required"],
            Severity::Medium => &[
                "Schedule routine inspection",
                "Perform preventive maintenance",
                "Monitor trends closely",
                "Update maintenance logs",
            ],
            Severity::High => &[
                "Conduct immediate visual inspection",
                "Review recent sensor data for anomalies",
                "Prepare maintenance team and spare parts",
                "Alert operations manager",
            ],
        }
    }

    /// Maintenance window suggested for the band.
    pub fn maintenance_window(&self) -> &'static str {
        match self {
            Severity::Low => "none",
            Severity::Medium => "within 7 days",
            Severity::High => "immediate inspection",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Time to failure
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Moderate,
    High,
    Urgent,
    Critical,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Moderate => "moderate",
            Urgency::High => "high",
            Urgency::Urgent => "urgent",
            Urgency::Critical => "critical",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FailureWindow {
    pub label: &'static str,
    pub urgency: Urgency,
}

/// Estimated time to failure; only high-severity risk gets a window. The
/// band is picked from the 3-decimal risk the dashboard shows.
pub fn time_to_failure(risk: f64) -> Option<FailureWindow> {
    if Severity::from_risk(risk) != Severity::High {
        return None;
    }
    let risk = round_to(risk, 3);
    let (label, urgency) = if risk >= 0.9 {
        ("<6h", Urgency::Critical)
    } else if risk >= 0.8 {
        ("6-12h", Urgency::Urgent)
    } else if risk >= 0.7 {
        ("12-24h", Urgency::High)
    } else {
        ("24-48h", Urgency::Moderate)
    };
    Some(FailureWindow { label, urgency })
}

/// Plausible failure modes for a group, most likely first.
pub fn failure_modes(group: &str) -> &'static [&'static str] {
    FAILURE_MODES
        .iter()
        .find(|(g, _)| *g == group)
        .map(|(_, modes)| *modes)
        .unwrap_or(GENERIC_FAILURE_MODES)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
