//! Economic profiles and failure cost projection.
//!
//! Profiles are process-lifetime state owned by the engine: built-in
//! defaults per known group, a generic fallback for everything else, and
//! operator overrides applied on top.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Expected downtime never exceeds this share of the horizon.
pub const DOWNTIME_DERATING: f64 = 0.25;

/// Maintenance cost multiplier at zero risk.
const MAINTENANCE_FLOOR: f64 = 0.5;

/// Additional maintenance multiplier per unit of risk.
const MAINTENANCE_SLOPE: f64 = 1.5;

/// Built-in profiles: (group, revenue per hour, maintenance base).
const DEFAULT_PROFILES: &[(&str, f64, f64)] = &[
    ("compressor1", 41_500.0, 207_500.0),
    ("drillrig1", 99_600.0, 664_000.0),
    ("turbine1", 124_500.0, 830_000.0),
    ("pipeline1", 58_100.0, 332_000.0),
    ("refinery1", 166_000.0, 1_245_000.0),
    ("retail1", 24_900.0, 124_500.0),
    ("transformer1", 49_800.0, 415_000.0),
    ("wellhead1", 37_350.0, 249_000.0),
];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EconomicProfile {
    /// Revenue lost per hour of downtime.
    pub revenue_per_hour: f64,
    /// Baseline maintenance cost.
    pub maintenance_base: f64,
}

impl EconomicProfile {
    /// Profile for groups with no built-in or overridden entry.
    pub const GENERIC: EconomicProfile = EconomicProfile {
        revenue_per_hour: 500.0,
        maintenance_base: 2_500.0,
    };
}

/// Rounded cost projection for one unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostProjection {
    pub expected_downtime_hours: f64,
    pub revenue_loss: f64,
    pub maintenance_cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileKey {
    RevenuePerHour,
    MaintenanceBase,
}

impl ProfileKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileKey::RevenuePerHour => "revenue_per_hour",
            ProfileKey::MaintenanceBase => "maintenance_base",
        }
    }
}

impl fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "revenue_per_hour" => Ok(ProfileKey::RevenuePerHour),
            "maintenance_base" => Ok(ProfileKey::MaintenanceBase),
            other => Err(ConfigError::UnknownKey(other.to_string())),
        }
    }
}

/// Partial profile update; absent fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue_per_hour: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_base: Option<f64>,
}

/// One `GROUP.KEY=VALUE` override.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileOverride {
    pub group: String,
    pub key: ProfileKey,
    pub value: f64,
}

impl ProfileOverride {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let malformed = || ConfigError::MalformedOverride(raw.to_string());
        let (target, value) = raw.split_once('=').ok_or_else(malformed)?;
        let (group, key) = target.rsplit_once('.').ok_or_else(malformed)?;
        let group = group.trim();
        if group.is_empty() {
            return Err(malformed());
        }
        let value: f64 = value.trim().parse().map_err(|_| malformed())?;
        Ok(Self {
            group: group.to_string(),
            key: key.parse()?,
            value,
        })
    }
}

impl FromStr for ProfileOverride {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Effective profile per group.
#[derive(Debug, Clone, PartialEq)]
pub struct EconomicProfiles {
    profiles: BTreeMap<String, EconomicProfile>,
}

impl Default for EconomicProfiles {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl EconomicProfiles {
    pub fn with_defaults() -> Self {
        let profiles = DEFAULT_PROFILES
            .iter()
            .map(|&(group, revenue_per_hour, maintenance_base)| {
                (
                    group.to_string(),
                    EconomicProfile {
                        revenue_per_hour,
                        maintenance_base,
                    },
                )
            })
            .collect();
        Self { profiles }
    }

    /// Profile for `group`, falling back to [`EconomicProfile::GENERIC`].
    pub fn profile(&self, group: &str) -> EconomicProfile {
        self.profiles
            .get(group)
            .copied()
            .unwrap_or(EconomicProfile::GENERIC)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EconomicProfile)> {
        self.profiles.iter().map(|(g, p)| (g.as_str(), p))
    }

    /// Set a single key for one group. Last write wins.
    pub fn set(&mut self, group: &str, key: ProfileKey, value: f64) -> Result<(), ConfigError> {
        if !(value >= 0.0 && value.is_finite()) {
            return Err(ConfigError::Negative {
                group: group.to_string(),
                key: key.as_str(),
                value,
            });
        }
        let entry = self
            .profiles
            .entry(group.to_string())
            .or_insert(EconomicProfile::GENERIC);
        match key {
            ProfileKey::RevenuePerHour => entry.revenue_per_hour = value,
            ProfileKey::MaintenanceBase => entry.maintenance_base = value,
        }
        Ok(())
    }

    /// Commit a batch of updates. Every value is validated before any is
    /// applied, so a rejected batch leaves the profiles untouched.
    pub fn apply<'a, I>(&mut self, updates: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (&'a str, ProfileUpdate)>,
    {
        let mut staged = self.clone();
        for (group, update) in updates {
            if let Some(v) = update.revenue_per_hour {
                staged.set(group, ProfileKey::RevenuePerHour, v)?;
            }
            if let Some(v) = update.maintenance_base {
                staged.set(group, ProfileKey::MaintenanceBase, v)?;
            }
        }
        *self = staged;
        Ok(())
    }

    /// Project costs for `group` using its current profile.
    pub fn project(&self, risk: f64, group: &str, horizon_hours: f64) -> CostProjection {
        project_costs(risk, &self.profile(group), horizon_hours)
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Map a risk in [0, 1] to expected downtime, revenue loss and maintenance
/// cost over `horizon_hours`. All three are computed unrounded and then
/// rounded to 2 decimals for output.
pub fn project_costs(risk: f64, profile: &EconomicProfile, horizon_hours: f64) -> CostProjection {
    let downtime = horizon_hours * risk * DOWNTIME_DERATING;
    let revenue_loss = downtime * profile.revenue_per_hour;
    let maintenance_cost = profile.maintenance_base * (MAINTENANCE_FLOOR + MAINTENANCE_SLOPE * risk);
    CostProjection {
        expected_downtime_hours: round_to(downtime, 2),
        revenue_loss: round_to(revenue_loss, 2),
        maintenance_cost: round_to(maintenance_cost, 2),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressor_example() {
        let profiles = EconomicProfiles::with_defaults();
        let c = profiles.project(0.8, "compressor1", 72.0);
        assert_eq!(c.expected_downtime_hours, 14.4);
        assert_eq!(c.revenue_loss, 597_600.0);
        assert_eq!(c.maintenance_cost, 352_750.0);
    }

    #[test]
    fn unknown_group_generic() {
        let profiles = EconomicProfiles::with_defaults();
        assert!(profiles.iter().all(|(g, _)| g != "boiler9"));
        let c = profiles.project(0.0, "boiler9", 100.0);
        assert_eq!(c.expected_downtime_hours, 0.0);
        assert_eq!(c.revenue_loss, 0.0);
        assert_eq!(c.maintenance_cost, 1_250.0);
    }

    #[test]
    fn idempotent() {
        let profiles = EconomicProfiles::with_defaults();
        let a = profiles.project(0.4137, "turbine1", 168.0);
        let b = profiles.project(0.4137, "turbine1", 168.0);
        assert_eq!(a, b);
    }

    #[test]
    fn monotonic_in_risk() {
        let profile = EconomicProfile {
            revenue_per_hour: 1234.5,
            maintenance_base: 9876.5,
        };
        let mut prev = project_costs(0.0, &profile, 96.0);
        for step in 1..=100 {
            let next = project_costs(step as f64 / 100.0, &profile, 96.0);
            assert!(next.revenue_loss >= prev.revenue_loss);
            assert!(next.maintenance_cost >= prev.maintenance_cost);
            prev = next;
        }
    }

    #[test]
    fn maintenance_range() {
        let p = EconomicProfile::GENERIC;
        assert_eq!(project_costs(0.0, &p, 12.0).maintenance_cost, 1_250.0);
        assert_eq!(project_costs(1.0, &p, 12.0).maintenance_cost, 5_000.0);
        assert_eq!(project_costs(1.0, &p, 12.0).expected_downtime_hours, 3.0);
    }

    #[test]
    fn rounding_is_output_only() {
        // 0.123456 * 100 * 0.25 = 3.0864; revenue uses the unrounded hours.
        let p = EconomicProfile {
            revenue_per_hour: 1000.0,
            maintenance_base: 0.0,
        };
        let c = project_costs(0.123456, &p, 100.0);
        assert_eq!(c.expected_downtime_hours, 3.09);
        assert_eq!(c.revenue_loss, 3086.4);
    }

    #[test]
    fn override_applies_immediately_and_persists() {
        let mut profiles = EconomicProfiles::with_defaults();
        let before = profiles.project(0.5, "retail1", 24.0);
        profiles
            .apply([(
                "retail1",
                ProfileUpdate {
                    revenue_per_hour: Some(10_000.0),
                    maintenance_base: None,
                },
            )])
            .unwrap();
        let after = profiles.project(0.5, "retail1", 24.0);
        assert_ne!(before, after);
        assert_eq!(after.revenue_loss, 24.0 * 0.5 * 0.25 * 10_000.0);
        assert_eq!(after.maintenance_cost, before.maintenance_cost);
        assert_eq!(profiles.project(0.5, "retail1", 24.0), after);
    }

    #[test]
    fn override_unknown_group_starts_generic() {
        let mut profiles = EconomicProfiles::with_defaults();
        profiles.set("boiler9", ProfileKey::MaintenanceBase, 100.0).unwrap();
        let p = profiles.profile("boiler9");
        assert_eq!(p.revenue_per_hour, 500.0);
        assert_eq!(p.maintenance_base, 100.0);
    }

    #[test]
    fn rejected_batch_leaves_profiles() {
        let mut profiles = EconomicProfiles::with_defaults();
        let good = ProfileUpdate {
            revenue_per_hour: Some(1.0),
            maintenance_base: None,
        };
        let bad = ProfileUpdate {
            revenue_per_hour: None,
            maintenance_base: Some(-5.0),
        };
        let err = profiles.apply([("wellhead1", good), ("pipeline1", bad)]);
        assert!(matches!(err, Err(ConfigError::Negative { .. })));
        assert_eq!(profiles, EconomicProfiles::with_defaults());
    }

    #[test]
    fn parse_override() {
        let o = ProfileOverride::parse("turbine1.revenue_per_hour=2500.5").unwrap();
        assert_eq!(o.group, "turbine1");
        assert_eq!(o.key, ProfileKey::RevenuePerHour);
        assert_eq!(o.value, 2500.5);

        assert!(matches!(
            ProfileOverride::parse("turbine1.speed=3"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            ProfileOverride::parse("turbine1=3"),
            Err(ConfigError::MalformedOverride(_))
        ));
        assert!(matches!(
            ProfileOverride::parse("turbine1.maintenance_base=lots"),
            Err(ConfigError::MalformedOverride(_))
        ));
    }
}
