//! Tunable constants for discovery, matching, encounter tracking and location write-back.
//!
//! Every value has a documented default and can be overridden from JSON:
//!
//! ```rust
//! use pace_match::ProximityConfig;
//!
//! let config = ProximityConfig::from_json_str(r#"{
//!     "nearby": { "activeThresholdMs": 300000 },
//!     "matching": { "radiusBands": { "cyclingKm": 8.0, "wideMultiplier": 3.0 } }
//! }"#).unwrap();
//!
//! assert_eq!(config.nearby.active_threshold_ms, 300_000);
//! assert_eq!(config.tracker.write_throttle_ms, 7_500); // untouched default
//! assert_eq!(config.matching.radius_bands.running_km, 2.0);
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Activity, PaceMatchError, RadiusPreference, Result};

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProximityConfig {
    pub nearby: NearbyConfig,
    pub encounters: EncounterConfig,
    pub tracker: TrackerConfig,
    pub matching: MatchConfig,
}

impl ProximityConfig {
    /// Parse and validate a JSON document. Missing keys keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ProximityConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<()> {
        if !(self.nearby.default_max_distance_km > 0.0) {
            return Err(invalid("nearby.defaultMaxDistanceKm must be > 0"));
        }
        if self.nearby.active_threshold_ms == 0 {
            return Err(invalid("nearby.activeThresholdMs must be > 0"));
        }
        if self.nearby.reevaluate_interval_ms == 0 {
            return Err(invalid("nearby.reevaluateIntervalMs must be > 0"));
        }
        if self.encounters.dedup_window_ms == 0 {
            return Err(invalid("encounters.dedupWindowMs must be > 0"));
        }
        if self.encounters.retention_ms == 0 {
            return Err(invalid("encounters.retentionMs must be > 0"));
        }
        if self.tracker.write_throttle_ms == 0 {
            return Err(invalid("tracker.writeThrottleMs must be > 0"));
        }
        if self.tracker.acquisition_attempts == 0 {
            return Err(invalid("tracker.acquisitionAttempts must be >= 1"));
        }
        self.matching.radius_bands.validate()?;
        self.matching.weights.validate()?;
        if self.matching.active_threshold_ms == 0 {
            return Err(invalid("matching.activeThresholdMs must be > 0"));
        }
        if let Some(ratio) = self.matching.max_pace_diff_ratio {
            if !(ratio >= 0.0) {
                return Err(invalid("matching.maxPaceDiffRatio must be >= 0"));
            }
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> PaceMatchError {
    PaceMatchError::InvalidConfig(msg.to_string())
}

/// Nearby filter pipeline and re-evaluation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NearbyConfig {
    /// Radius used when the caller does not pick one.
    /// Default: 5.0 km
    pub default_max_distance_km: f64,

    /// A location older than this is stale and the user is treated as inactive.
    /// Default: 600,000 ms (10 minutes)
    pub active_threshold_ms: u64,

    /// Interval between timer-driven passes over the cached snapshot.
    /// Default: 30,000 ms
    pub reevaluate_interval_ms: u64,
}

impl Default for NearbyConfig {
    fn default() -> Self {
        Self {
            default_max_distance_km: 5.0,
            active_threshold_ms: 10 * 60 * 1000,
            reevaluate_interval_ms: 30_000,
        }
    }
}

impl NearbyConfig {
    pub fn reevaluate_interval(&self) -> Duration {
        Duration::from_millis(self.reevaluate_interval_ms)
    }
}

/// Encounter tracking settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EncounterConfig {
    /// A pair is recorded at most once per window within a session.
    /// Default: 300,000 ms (5 minutes)
    pub dedup_window_ms: u64,

    /// Minimum gap between two recording passes, regardless of candidate.
    /// Default: 10,000 ms
    pub min_pass_gap_ms: u64,

    /// Encounters not seen for this long are removed by cleanup.
    /// Default: 90 days
    pub retention_ms: u64,
}

impl Default for EncounterConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: 5 * 60 * 1000,
            min_pass_gap_ms: 10_000,
            retention_ms: 90 * DAY_MS,
        }
    }
}

/// Location acquisition and write-back settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackerConfig {
    /// Minimum interval between two store writes after the first one.
    /// Default: 7,500 ms (midpoint of a 5-10 s cadence)
    pub write_throttle_ms: u64,

    /// Attempts for the initial fix before giving up.
    /// Default: 3
    pub acquisition_attempts: u32,

    /// Timeout of a high-accuracy request.
    /// Default: 10,000 ms
    pub high_accuracy_timeout_ms: u64,

    /// Maximum cached-fix age accepted by high-accuracy requests.
    /// Default: 5,000 ms
    pub high_accuracy_max_age_ms: u64,

    /// Timeout of the relaxed-accuracy fallback request.
    /// Default: 20,000 ms
    pub fallback_timeout_ms: u64,

    /// Maximum cached-fix age accepted by the fallback request.
    /// Default: 60,000 ms
    pub fallback_max_age_ms: u64,

    /// Delay between acquisition attempts.
    /// Default: 1,000 ms
    pub retry_backoff_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            write_throttle_ms: 7_500,
            acquisition_attempts: 3,
            high_accuracy_timeout_ms: 10_000,
            high_accuracy_max_age_ms: 5_000,
            fallback_timeout_ms: 20_000,
            fallback_max_age_ms: 60_000,
            retry_backoff_ms: 1_000,
        }
    }
}

impl TrackerConfig {
    pub fn write_throttle(&self) -> Duration {
        Duration::from_millis(self.write_throttle_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Matching radius: a per-activity base scaled by the [`RadiusPreference`] multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RadiusBands {
    /// Default: 10 km
    pub cycling_km: f64,

    /// Default: 2 km
    pub running_km: f64,

    /// Default: 1 km
    pub walking_km: f64,

    /// Default: 0.5
    pub nearby_multiplier: f64,

    /// Default: 1.0
    pub normal_multiplier: f64,

    /// Default: 2.0
    pub wide_multiplier: f64,
}

impl Default for RadiusBands {
    fn default() -> Self {
        Self {
            cycling_km: 10.0,
            running_km: 2.0,
            walking_km: 1.0,
            nearby_multiplier: 0.5,
            normal_multiplier: 1.0,
            wide_multiplier: 2.0,
        }
    }
}

impl RadiusBands {
    pub fn base_km(&self, activity: Activity) -> f64 {
        match activity {
            Activity::Cycling => self.cycling_km,
            Activity::Running => self.running_km,
            Activity::Walking => self.walking_km,
        }
    }

    pub fn multiplier(&self, preference: RadiusPreference) -> f64 {
        match preference {
            RadiusPreference::Nearby => self.nearby_multiplier,
            RadiusPreference::Normal => self.normal_multiplier,
            RadiusPreference::Wide => self.wide_multiplier,
        }
    }

    pub fn radius_km(&self, activity: Activity, preference: RadiusPreference) -> f64 {
        self.base_km(activity) * self.multiplier(preference)
    }

    /// Bases must be positive and multipliers strictly increasing.
    pub fn validate(&self) -> Result<()> {
        let bases = [self.cycling_km, self.running_km, self.walking_km];
        if !bases.iter().all(|km| km.is_finite() && *km > 0.0) {
            return Err(invalid("matching.radiusBands activity bases must be > 0"));
        }
        if !(self.nearby_multiplier > 0.0
            && self.nearby_multiplier < self.normal_multiplier
            && self.normal_multiplier < self.wide_multiplier
            && self.wide_multiplier.is_finite())
        {
            return Err(invalid(
                "matching.radiusBands must satisfy 0 < nearbyMultiplier < normalMultiplier < wideMultiplier",
            ));
        }
        Ok(())
    }
}

/// Relative weights of the match score components.
///
/// Weights are normalized by their sum, so only ratios matter. The defaults
/// favour proximity, then pace, then fitness level:
///
/// | Component | Default | Scoring |
/// |-----------|---------|---------|
/// | distance  | 0.45 | `1 - d / radius`, floored at 0 |
/// | pace      | 0.25 | `1 - |Δpace| / seeker_pace`, floored at 0; 1.0 if either pace is unknown |
/// | fitness   | 0.20 | same level 1.0, adjacent 0.5, beginner vs pro 0.0 |
/// | activity  | 0.10 | 1.0 if same activity, else 0.0 |
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MatchWeights {
    pub distance: f64,
    pub pace: f64,
    pub fitness: f64,
    pub activity: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            distance: 0.45,
            pace: 0.25,
            fitness: 0.20,
            activity: 0.10,
        }
    }
}

impl MatchWeights {
    pub fn total(&self) -> f64 {
        self.distance + self.pace + self.fitness + self.activity
    }

    pub fn validate(&self) -> Result<()> {
        let all = [self.distance, self.pace, self.fitness, self.activity];
        if all.iter().any(|w| !(w.is_finite() && *w >= 0.0)) {
            return Err(invalid("matching.weights must be finite and >= 0"));
        }
        if !(self.total() > 0.0) {
            return Err(invalid("matching.weights must not all be zero"));
        }
        Ok(())
    }
}

/// Match scorer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MatchConfig {
    pub radius_bands: RadiusBands,
    pub weights: MatchWeights,

    /// Candidates whose last location push is older than this are not matched.
    /// Default: 180,000 ms (3 minutes)
    pub active_threshold_ms: u64,

    /// Truncate ranked results ("top matches"). `None` keeps everything.
    /// Default: Some(5)
    pub max_results: Option<usize>,

    /// Reject candidates whose pace differs from the seeker's by more than this
    /// fraction of the seeker's pace. `None` disables the gate.
    /// Default: Some(0.30)
    pub max_pace_diff_ratio: Option<f64>,

    /// Only admit candidates doing the seeker's activity.
    /// Default: true
    pub require_same_activity: bool,

    /// Also require the seeker's own visibility policy to admit the candidate's level.
    /// Default: false
    pub mutual_visibility: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            radius_bands: RadiusBands::default(),
            weights: MatchWeights::default(),
            active_threshold_ms: 3 * 60 * 1000,
            max_results: Some(5),
            max_pace_diff_ratio: Some(0.30),
            require_same_activity: true,
            mutual_visibility: false,
        }
    }
}
