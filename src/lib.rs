//! # Pace Match
//!
//! Proximity discovery and workout-partner matching for social fitness apps.
//!
//! This library provides:
//! - Great-circle distance and display formatting
//! - A "nearby people" filter pipeline (visibility, activity, gender, recency)
//! - Compatibility scoring for "top matches" (activity, fitness level, pace, distance)
//! - Deduplicated, throttled encounter tracking
//! - A throttled location write-back tracker
//! - A session object tying a live user snapshot to periodic re-evaluation
//!
//! ## Features
//!
//! - **`parallel`** - Score match candidates in parallel with rayon
//! - **`http`** - Firebase Realtime Database REST store adapter
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use pace_match::{filter_nearby, now_ms, GpsPoint, NearbyQuery, UserSnapshot};
//! use serde_json::json;
//!
//! let now = now_ms();
//! let users = json!({
//!     "alice": { "lat": 51.5080, "lng": -0.1290, "timestamp": now, "activity": "running" },
//!     "bob":   { "lat": 48.8566, "lng": 2.3522,  "timestamp": now },
//! });
//!
//! let snapshot = UserSnapshot::from_value(&users);
//! let query = NearbyQuery::new(GpsPoint::new(51.5074, -0.1278), 5.0).excluding("me");
//!
//! let nearby = filter_nearby(&snapshot, &query, now);
//! assert_eq!(nearby.len(), 1);
//! assert_eq!(nearby[0].id, "alice");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod error;
pub use error::{PaceMatchError, PositionError, Result};

pub mod config;
pub use config::{
    EncounterConfig, MatchConfig, MatchWeights, NearbyConfig, ProximityConfig, RadiusBands,
    TrackerConfig,
};

// Geographic utilities (distance, formatting, search envelopes)
pub mod geo_utils;
pub use geo_utils::{distance_km, format_distance};

// Parsing boundary for raw user documents
pub mod record;
pub use record::{Candidate, UserLocationRecord};

pub mod snapshot;
pub use snapshot::UserSnapshot;

// Nearby filter pipeline
pub mod nearby;
pub use nearby::{filter_nearby, Exclusion, NearbyQuery, VisibilityMode};

// Match scoring ("top matches" / "discover")
pub mod matching;
pub use matching::{pace_from_workouts, score_matches, MatchResult, Seeker, WorkoutSummary};

// Store contracts and in-memory implementations
pub mod store;
pub use store::{
    EncounterStore, MemoryEncounterStore, MemoryLocationStore, Subscription, UserLocationStore,
    UsersDocument,
};

pub mod encounter;
pub use encounter::{EncounterOutcome, EncounterRecord, EncounterTracker};

pub mod location;
pub use location::{
    GeolocationProvider, LocationTracker, Position, PositionOptions, TrackerStatus, WriteThrottle,
};

pub mod reevaluator;
pub use reevaluator::PeriodicReevaluator;

pub mod session;
pub use session::ProximitySession;

// REST adapter for Firebase Realtime Database
#[cfg(feature = "http")]
pub mod rest;

#[cfg(feature = "http")]
pub use rest::RestStore;

#[cfg(feature = "ffi")]
mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("PaceMatchRust"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
fn init_logging() {
    // No-op on non-Android platforms
}

/// Current wall-clock time in epoch milliseconds.
///
/// All timestamps in user and encounter documents use this unit.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use pace_match::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }

    /// Great-circle distance to another point, in kilometers.
    #[inline]
    pub fn distance_km_to(&self, other: &GpsPoint) -> f64 {
        geo_utils::haversine_distance(self, other) / 1000.0
    }
}

/// Workout activity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    Running,
    Cycling,
    Walking,
}

impl Activity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Activity::Running => "running",
            Activity::Cycling => "cycling",
            Activity::Walking => "walking",
        }
    }
}

impl FromStr for Activity {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(Activity::Running),
            "cycling" => Ok(Activity::Cycling),
            "walking" => Ok(Activity::Walking),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Self-declared fitness level. Absent levels are treated as intermediate.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum FitnessLevel {
    Beginner,
    #[default]
    Intermediate,
    Pro,
}

impl FitnessLevel {
    pub const ALL: [FitnessLevel; 3] = [
        FitnessLevel::Beginner,
        FitnessLevel::Intermediate,
        FitnessLevel::Pro,
    ];

    /// Position on the beginner..pro scale.
    pub fn rank(&self) -> u8 {
        match self {
            FitnessLevel::Beginner => 0,
            FitnessLevel::Intermediate => 1,
            FitnessLevel::Pro => 2,
        }
    }

    /// Number of steps between two levels (0, 1 or 2).
    pub fn steps_to(&self, other: FitnessLevel) -> u8 {
        self.rank().abs_diff(other.rank())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FitnessLevel::Beginner => "beginner",
            FitnessLevel::Intermediate => "intermediate",
            FitnessLevel::Pro => "pro",
        }
    }
}

impl FromStr for FitnessLevel {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "beginner" => Ok(FitnessLevel::Beginner),
            "intermediate" => Ok(FitnessLevel::Intermediate),
            "pro" => Ok(FitnessLevel::Pro),
            _ => Err(()),
        }
    }
}

/// Coarse matching radius chosen by the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RadiusPreference {
    Nearby,
    #[default]
    Normal,
    Wide,
}

impl FromStr for RadiusPreference {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "nearby" => Ok(RadiusPreference::Nearby),
            "normal" => Ok(RadiusPreference::Normal),
            "wide" => Ok(RadiusPreference::Wide),
            _ => Err(()),
        }
    }
}

/// Which fitness levels a user wants to find.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchFilter {
    #[default]
    All,
    Beginner,
    Intermediate,
    Pro,
}

impl SearchFilter {
    pub fn admits(&self, level: FitnessLevel) -> bool {
        match self {
            SearchFilter::All => true,
            SearchFilter::Beginner => level == FitnessLevel::Beginner,
            SearchFilter::Intermediate => level == FitnessLevel::Intermediate,
            SearchFilter::Pro => level == FitnessLevel::Pro,
        }
    }
}

impl FromStr for SearchFilter {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "all" => Ok(SearchFilter::All),
            "beginner" => Ok(SearchFilter::Beginner),
            "intermediate" => Ok(SearchFilter::Intermediate),
            "pro" => Ok(SearchFilter::Pro),
            _ => Err(()),
        }
    }
}

/// A user's declared willingness to be discovered by other fitness levels.
///
/// This is the candidate-side opt-in: it answers "who may find me", not
/// "who do I want to find" (see [`SearchFilter`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityPolicy {
    pub visible_to_all_levels: bool,
    pub allowed_levels: Vec<FitnessLevel>,
}

impl Default for VisibilityPolicy {
    fn default() -> Self {
        Self {
            visible_to_all_levels: true,
            allowed_levels: FitnessLevel::ALL.to_vec(),
        }
    }
}

impl VisibilityPolicy {
    /// Check whether a viewer of the given level may discover this user.
    pub fn admits(&self, viewer: FitnessLevel) -> bool {
        self.visible_to_all_levels || self.allowed_levels.contains(&viewer)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gps_point_validation() {
        assert!(GpsPoint::new(51.5074, -0.1278).is_valid());
        assert!(GpsPoint::new(0.0, 0.0).is_valid());
        assert!(!GpsPoint::new(91.0, 0.0).is_valid());
        assert!(!GpsPoint::new(0.0, 181.0).is_valid());
        assert!(!GpsPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_fitness_level_steps() {
        assert_eq!(FitnessLevel::Beginner.steps_to(FitnessLevel::Beginner), 0);
        assert_eq!(FitnessLevel::Beginner.steps_to(FitnessLevel::Intermediate), 1);
        assert_eq!(FitnessLevel::Pro.steps_to(FitnessLevel::Beginner), 2);
        assert_eq!(FitnessLevel::default(), FitnessLevel::Intermediate);
    }

    #[test]
    fn test_visibility_policy() {
        let open = VisibilityPolicy::default();
        assert!(open.admits(FitnessLevel::Beginner));

        let pros_only = VisibilityPolicy {
            visible_to_all_levels: false,
            allowed_levels: vec![FitnessLevel::Pro],
        };
        assert!(pros_only.admits(FitnessLevel::Pro));
        assert!(!pros_only.admits(FitnessLevel::Beginner));
    }

    #[test]
    fn test_search_filter() {
        assert!(SearchFilter::All.admits(FitnessLevel::Pro));
        assert!(SearchFilter::Beginner.admits(FitnessLevel::Beginner));
        assert!(!SearchFilter::Beginner.admits(FitnessLevel::Pro));
        assert_eq!("pro".parse::<SearchFilter>(), Ok(SearchFilter::Pro));
        assert!("elite".parse::<SearchFilter>().is_err());
    }

    #[test]
    fn test_activity_round_trip_str() {
        for activity in [Activity::Running, Activity::Cycling, Activity::Walking] {
            assert_eq!(activity.as_str().parse::<Activity>(), Ok(activity));
        }
    }
}
