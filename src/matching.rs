//! Workout-partner matching.
//!
//! Ranks nearby, currently active users by how good a workout partner they would be
//! for the caller (the *seeker*). Admission reuses the nearby filter pipeline in
//! discovery mode, then applies the matching gates:
//!
//! - same activity (configurable; a candidate with no activity is assumed to share the seeker's)
//! - the seeker's search filter admits the candidate's fitness level
//! - the candidate's search filter admits the seeker's fitness level
//! - the candidate's [`VisibilityPolicy`] admits the seeker's fitness level
//! - optionally, the seeker's own policy admits the candidate's level
//! - paces within the configured tolerance, when both are known
//!
//! Survivors are scored with [`score_candidate`] (see [`MatchWeights`] for the formula),
//! sorted by descending score with ties broken by ascending distance, and truncated
//! to `max_results`.
//!
//! # Example
//!
//! ```rust
//! use pace_match::{score_matches, Activity, GpsPoint, MatchConfig, Seeker, UserSnapshot};
//! use serde_json::json;
//!
//! let now = 1_700_000_000_000i64;
//! let snapshot = UserSnapshot::from_value(&json!({
//!     "sam": { "lat": 51.5080, "lng": -0.1290, "timestamp": now,
//!              "activity": "running", "fitnessLevel": "intermediate", "pace": 5.5 },
//! }));
//!
//! let mut seeker = Seeker::new("me", GpsPoint::new(51.5074, -0.1278), Activity::Running);
//! seeker.pace = Some(5.2);
//!
//! let matches = score_matches(&seeker, &snapshot, &MatchConfig::default(), now);
//! assert_eq!(matches[0].user_id, "sam");
//! assert!(matches[0].score > 0.8);
//! ```

use log::debug;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::{MatchConfig, MatchWeights};
use crate::nearby::{filter_nearby, NearbyQuery, VisibilityMode};
use crate::{
    Activity, Candidate, FitnessLevel, GpsPoint, RadiusPreference, SearchFilter,
    UserLocationRecord, UserSnapshot, VisibilityPolicy,
};

/// Pace similarity when either side has no pace on record.
const NEUTRAL_PACE_SCORE: f64 = 1.0;

/// Workouts considered when deriving a pace from history.
const PACE_HISTORY_LEN: usize = 10;

/// Running/walking paces at or above this (min/km) are discarded as bad data.
const MAX_FOOT_PACE_MIN_PER_KM: f64 = 30.0;

/// The caller's matching profile.
#[derive(Debug, Clone, PartialEq)]
pub struct Seeker {
    pub user_id: String,
    pub location: GpsPoint,
    pub activity: Activity,
    pub fitness_level: FitnessLevel,
    pub pace: Option<f64>,
    pub visibility: VisibilityPolicy,
    pub search_filter: SearchFilter,
    pub radius_preference: RadiusPreference,
    /// A seeker who hides their profile gets no matches.
    pub profile_visible: bool,
}

impl Seeker {
    pub fn new(user_id: impl Into<String>, location: GpsPoint, activity: Activity) -> Self {
        Self {
            user_id: user_id.into(),
            location,
            activity,
            fitness_level: FitnessLevel::default(),
            pace: None,
            visibility: VisibilityPolicy::default(),
            search_filter: SearchFilter::default(),
            radius_preference: RadiusPreference::default(),
            profile_visible: true,
        }
    }

    /// Overlay the stored profile document on top of these caller-supplied values.
    ///
    /// Fields present and well-formed in `profile` win; everything else keeps the
    /// current value.
    pub fn with_profile(mut self, profile: &Value) -> Self {
        let parse = |key: &str| profile.get(key).and_then(Value::as_str);

        if let Some(level) = parse("fitnessLevel").and_then(|s| s.parse().ok()) {
            self.fitness_level = level;
        }
        if let Some(activity) = parse("activity").and_then(|s| s.parse().ok()) {
            self.activity = activity;
        }
        if let Some(filter) = parse("searchFilter").and_then(|s| s.parse().ok()) {
            self.search_filter = filter;
        }
        if let Some(radius) = parse("radiusPreference").and_then(|s| s.parse().ok()) {
            self.radius_preference = radius;
        }
        if let Some(pace) = profile
            .get("pace")
            .and_then(Value::as_f64)
            .filter(|p| p.is_finite() && *p > 0.0)
        {
            self.pace = Some(pace);
        }
        if let Some(visible) = profile.get("profileVisible").and_then(Value::as_bool) {
            self.profile_visible = visible;
        }
        if profile.get("visibility").is_some_and(Value::is_object) {
            let parsed = UserLocationRecord::from_value(&serde_json::json!({
                "visibility": profile["visibility"].clone()
            }));
            self.visibility = parsed.visibility;
        }
        self
    }
}

/// A ranked match. Ephemeral.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub user_id: String,
    pub user: UserLocationRecord,
    /// Distance from the seeker in meters.
    pub distance_m: f64,
    /// Compatibility in `[0, 1]`.
    pub score: f64,
}

/// Why an in-range candidate was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    ActivityMismatch,
    SeekerFilter,
    CandidateFilter,
    NotVisibleToLevel,
    SeekerPolicy,
    PaceIncompatible,
}

/// Apply the matching gates to a candidate that already passed the nearby pipeline.
pub fn admit(seeker: &Seeker, candidate: &UserLocationRecord, config: &MatchConfig) -> Result<(), Rejection> {
    let activity = candidate.activity.unwrap_or(seeker.activity);
    if config.require_same_activity && activity != seeker.activity {
        return Err(Rejection::ActivityMismatch);
    }
    if !seeker.search_filter.admits(candidate.fitness_level) {
        return Err(Rejection::SeekerFilter);
    }
    if !candidate.search_filter.admits(seeker.fitness_level) {
        return Err(Rejection::CandidateFilter);
    }
    if !candidate.visibility.admits(seeker.fitness_level) {
        return Err(Rejection::NotVisibleToLevel);
    }
    if config.mutual_visibility && !seeker.visibility.admits(candidate.fitness_level) {
        return Err(Rejection::SeekerPolicy);
    }
    // A zero pace means "not set"
    if let (Some(ratio), Some(mine), Some(theirs)) =
        (config.max_pace_diff_ratio, seeker.pace, candidate.pace)
    {
        if mine > 0.0 && theirs > 0.0 && (mine - theirs).abs() / mine > ratio {
            return Err(Rejection::PaceIncompatible);
        }
    }
    Ok(())
}

/// Fitness compatibility: same level 1.0, adjacent 0.5, beginner vs pro 0.0.
pub fn fitness_compatibility(a: FitnessLevel, b: FitnessLevel) -> f64 {
    match a.steps_to(b) {
        0 => 1.0,
        1 => 0.5,
        _ => 0.0,
    }
}

/// Pace similarity in `[0, 1]`. Unknown paces are neutral.
pub fn pace_similarity(seeker_pace: Option<f64>, candidate_pace: Option<f64>) -> f64 {
    match (seeker_pace, candidate_pace) {
        (Some(mine), Some(theirs)) if mine > 0.0 && theirs > 0.0 => {
            (1.0 - (mine - theirs).abs() / mine).max(0.0)
        }
        _ => NEUTRAL_PACE_SCORE,
    }
}

/// Score one candidate against the seeker. Always in `[0, 1]`.
pub fn score_candidate(
    seeker: &Seeker,
    candidate: &UserLocationRecord,
    distance_km: f64,
    radius_km: f64,
    weights: &MatchWeights,
) -> f64 {
    let distance = if radius_km > 0.0 && distance_km.is_finite() {
        (1.0 - distance_km / radius_km).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let pace = pace_similarity(seeker.pace, candidate.pace);
    let fitness = fitness_compatibility(seeker.fitness_level, candidate.fitness_level);
    let activity = if candidate.activity.unwrap_or(seeker.activity) == seeker.activity {
        1.0
    } else {
        0.0
    };

    let total = weights.total();
    if !(total > 0.0) {
        return 0.0;
    }
    let raw = (weights.distance * distance
        + weights.pace * pace
        + weights.fitness * fitness
        + weights.activity * activity)
        / total;

    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Rank matches for a seeker against a snapshot.
pub fn score_matches(
    seeker: &Seeker,
    snapshot: &UserSnapshot,
    config: &MatchConfig,
    now_ms: i64,
) -> Vec<MatchResult> {
    if !seeker.profile_visible {
        debug!("[Matching] Seeker {} hides their profile, no matches", seeker.user_id);
        return Vec::new();
    }

    let radius_km = config
        .radius_bands
        .radius_km(seeker.activity, seeker.radius_preference);
    let query = NearbyQuery::new(seeker.location, radius_km)
        .excluding(seeker.user_id.clone())
        .with_visibility(VisibilityMode::Discovery)
        .with_active_threshold_ms(config.active_threshold_ms);

    let nearby = filter_nearby(snapshot, &query, now_ms);
    let in_range = nearby.len();

    let admitted: Vec<Candidate> = nearby
        .into_iter()
        .filter(|c| match admit(seeker, &c.record, config) {
            Ok(()) => true,
            Err(reason) => {
                debug!("[Matching] {} rejected: {:?}", c.id, reason);
                false
            }
        })
        .collect();

    let to_result = |c: Candidate| {
        let score = score_candidate(seeker, &c.record, c.distance_km, radius_km, &config.weights);
        MatchResult {
            user_id: c.id,
            user: c.record,
            distance_m: c.distance_km * 1000.0,
            score,
        }
    };

    #[cfg(feature = "parallel")]
    let mut ranked: Vec<MatchResult> = admitted.into_par_iter().map(to_result).collect();

    #[cfg(not(feature = "parallel"))]
    let mut ranked: Vec<MatchResult> = admitted.into_iter().map(to_result).collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.distance_m.partial_cmp(&b.distance_m).unwrap_or(Ordering::Equal))
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    debug!(
        "[Matching] {} in range -> {} ranked within {:.1}km",
        in_range,
        ranked.len(),
        radius_km
    );

    if let Some(max) = config.max_results {
        ranked.truncate(max);
    }
    ranked
}

/// A completed workout, as needed for pace estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkoutSummary {
    pub activity: Activity,
    pub duration_secs: f64,
    pub distance_km: f64,
    pub avg_speed_kmh: Option<f64>,
}

/// Average pace over the last 10 workouts of `activity` (oldest first in `workouts`).
///
/// Cycling returns km/h; running and walking return min/km, ignoring paces
/// outside `(0, 30)`. `None` when no usable workout exists.
pub fn pace_from_workouts(workouts: &[WorkoutSummary], activity: Activity) -> Option<f64> {
    let matching: Vec<&WorkoutSummary> = workouts.iter().filter(|w| w.activity == activity).collect();
    let recent = &matching[matching.len().saturating_sub(PACE_HISTORY_LEN)..];
    let usable = recent
        .iter()
        .filter(|w| w.distance_km > 0.0 && w.duration_secs > 0.0);

    let values: Vec<f64> = match activity {
        Activity::Cycling => usable
            .map(|w| {
                w.avg_speed_kmh
                    .filter(|s| *s > 0.0)
                    .unwrap_or(w.distance_km / (w.duration_secs / 3600.0))
            })
            .filter(|s| *s > 0.0)
            .collect(),
        Activity::Running | Activity::Walking => usable
            .map(|w| (w.duration_secs / 60.0) / w.distance_km)
            .filter(|p| *p > 0.0 && *p < MAX_FOOT_PACE_MIN_PER_KM)
            .collect(),
    };

    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}
