//! Mobile bindings.
//!
//! User documents cross the boundary as JSON strings (the same shape the
//! backend stores), results come back as JSON arrays. Malformed input is
//! logged and yields an empty result rather than an error.

use log::{debug, info, warn};
use serde_json::Value;

use crate::{
    filter_nearby, format_distance, init_logging, score_matches, Activity, GpsPoint, MatchConfig,
    NearbyQuery, ProximityConfig, Seeker, UserSnapshot, VisibilityMode,
};

fn parse_users(users_json: &str) -> Option<UserSnapshot> {
    match serde_json::from_str::<Value>(users_json) {
        Ok(value) => Some(UserSnapshot::from_value(&value)),
        Err(e) => {
            warn!("[PaceMatchRust] Invalid users JSON: {}", e);
            None
        }
    }
}

/// `None` and `"all"` mean no activity filter. Anything else must name an activity.
fn parse_activity_filter(activity: Option<&str>) -> Result<Option<Activity>, String> {
    match activity {
        None | Some("all") => Ok(None),
        Some(name) => name.parse().map(Some).map_err(|_| name.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        warn!("[PaceMatchRust] Failed to serialize result: {}", e);
        "[]".to_string()
    })
}

/// Distance in km between two coordinate pairs, or `None` when not comparable.
#[uniffi::export]
pub fn ffi_distance_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> Option<f64> {
    crate::distance_km(lat1, lng1, lat2, lng2)
}

/// "850m", "2.3km" or "Unknown".
#[uniffi::export]
pub fn ffi_format_distance(distance_km: Option<f64>) -> String {
    format_distance(distance_km)
}

/// Nearby users as a JSON array of candidates, nearest first.
///
/// `activity` and `gender` of `None` mean "all". `discovery` also applies
/// `profileVisible`.
#[uniffi::export]
#[allow(clippy::too_many_arguments)]
pub fn ffi_filter_nearby(
    users_json: String,
    origin: GpsPoint,
    max_distance_km: f64,
    exclude_user_id: Option<String>,
    activity: Option<String>,
    gender: Option<String>,
    discovery: bool,
    now_ms: i64,
) -> String {
    init_logging();
    let Some(snapshot) = parse_users(&users_json) else {
        return "[]".to_string();
    };

    let activity = match parse_activity_filter(activity.as_deref()) {
        Ok(activity) => activity,
        Err(unknown) => {
            warn!("[PaceMatchRust] Unknown activity filter {:?}, nothing matches", unknown);
            return "[]".to_string();
        }
    };

    let mut query = NearbyQuery::new(origin, max_distance_km)
        .with_activity(activity)
        .with_gender(gender.filter(|g| g != "all"))
        .with_visibility(if discovery {
            VisibilityMode::Discovery
        } else {
            VisibilityMode::Workout
        });
    if let Some(id) = exclude_user_id {
        query = query.excluding(id);
    }

    let results = filter_nearby(&snapshot, &query, now_ms);
    debug!("[PaceMatchRust] filter_nearby: {} of {} users", results.len(), snapshot.len());
    to_json(&results)
}

/// Top matches as a JSON array, best first.
///
/// `profile_json` is the seeker's stored user document; `config_json` overrides
/// the matching defaults.
#[uniffi::export]
pub fn ffi_score_matches(
    users_json: String,
    seeker_id: String,
    origin: GpsPoint,
    activity: String,
    profile_json: Option<String>,
    config_json: Option<String>,
    now_ms: i64,
) -> String {
    init_logging();
    let Some(snapshot) = parse_users(&users_json) else {
        return "[]".to_string();
    };

    let activity = activity.parse().unwrap_or_else(|_| {
        warn!("[PaceMatchRust] Unknown seeker activity {:?}, assuming running", activity);
        Activity::Running
    });
    let mut seeker = Seeker::new(seeker_id, origin, activity);
    if let Some(profile) = profile_json.and_then(|p| serde_json::from_str::<Value>(&p).ok()) {
        seeker = seeker.with_profile(&profile);
    }

    let config = match config_json.as_deref().map(serde_json::from_str::<MatchConfig>) {
        Some(Ok(config)) => config,
        Some(Err(e)) => {
            warn!("[PaceMatchRust] Invalid match config, using defaults: {}", e);
            MatchConfig::default()
        }
        None => MatchConfig::default(),
    };

    let start = std::time::Instant::now();
    let matches = score_matches(&seeker, &snapshot, &config, now_ms);
    info!(
        "[PaceMatchRust] {} matches from {} users in {:?}",
        matches.len(),
        snapshot.len(),
        start.elapsed()
    );
    to_json(&matches)
}

/// Default configuration as JSON, for display or editing on the app side.
#[uniffi::export]
pub fn ffi_default_config_json() -> String {
    init_logging();
    serde_json::to_string_pretty(&ProximityConfig::default()).unwrap_or_default()
}
