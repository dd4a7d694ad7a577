//! Parsing boundary for raw user documents.
//!
//! The backend stores one loosely-typed JSON document per user under `users/{userId}`.
//! [`UserLocationRecord::from_value`] turns such a document into a typed record once,
//! applying every default in one place. Parsing never fails: a malformed field
//! becomes "absent", and a record without a usable coordinate pair is simply
//! unlocatable.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{Activity, FitnessLevel, GpsPoint, RadiusPreference, SearchFilter, VisibilityPolicy};

/// Keys consumed by the parser; everything else is kept in `extra`.
const KNOWN_KEYS: &[&str] = &[
    "lat",
    "lng",
    "visible",
    "profileVisible",
    "timestamp",
    "activity",
    "gender",
    "fitnessLevel",
    "pace",
    "visibility",
    "searchFilter",
    "radiusPreference",
];

/// Typed view of one user's location document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLocationRecord {
    /// `None` when lat/lng are absent, non-numeric, non-finite or out of range.
    pub location: Option<GpsPoint>,
    /// Workout visibility. Defaults to `true`.
    pub visible: bool,
    /// Discovery visibility. Defaults to `true`.
    pub profile_visible: bool,
    /// Epoch milliseconds of the last location push.
    pub timestamp: Option<i64>,
    pub activity: Option<Activity>,
    pub gender: Option<String>,
    /// Defaults to intermediate.
    pub fitness_level: FitnessLevel,
    /// min/km for running and walking, km/h for cycling. Only positive values are kept.
    pub pace: Option<f64>,
    /// Candidate-side opt-in. Defaults to visible to all levels.
    pub visibility: VisibilityPolicy,
    /// Which levels this user wants to find. Defaults to all.
    pub search_filter: SearchFilter,
    pub radius_preference: Option<RadiusPreference>,
    /// Remaining profile fields (name, photo, ...), untouched.
    pub extra: Map<String, Value>,
}

impl Default for UserLocationRecord {
    fn default() -> Self {
        Self {
            location: None,
            visible: true,
            profile_visible: true,
            timestamp: None,
            activity: None,
            gender: None,
            fitness_level: FitnessLevel::default(),
            pace: None,
            visibility: VisibilityPolicy::default(),
            search_filter: SearchFilter::default(),
            radius_preference: None,
            extra: Map::new(),
        }
    }
}

impl UserLocationRecord {
    /// Parse a raw user document. Non-object values yield an unlocatable default record.
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };

        let location = match (number(obj, "lat"), number(obj, "lng")) {
            (Some(lat), Some(lng)) => Some(GpsPoint::new(lat, lng)).filter(GpsPoint::is_valid),
            _ => None,
        };

        let timestamp = obj.get("timestamp").and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_f64().filter(|t| t.is_finite()).map(|t| t as i64))
        });

        let extra = obj
            .iter()
            .filter(|(k, _)| !KNOWN_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Self {
            location,
            visible: obj.get("visible").and_then(Value::as_bool).unwrap_or(true),
            profile_visible: obj
                .get("profileVisible")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            timestamp,
            activity: parse_str(obj, "activity"),
            gender: obj
                .get("gender")
                .and_then(Value::as_str)
                .filter(|g| !g.is_empty())
                .map(str::to_string),
            fitness_level: parse_str(obj, "fitnessLevel").unwrap_or_default(),
            pace: number(obj, "pace").filter(|p| *p > 0.0),
            visibility: obj
                .get("visibility")
                .map(parse_visibility)
                .unwrap_or_default(),
            search_filter: parse_str(obj, "searchFilter").unwrap_or_default(),
            radius_preference: parse_str(obj, "radiusPreference"),
            extra,
        }
    }

    /// Whether this record can take part in any proximity operation.
    pub fn is_locatable(&self) -> bool {
        self.location.is_some()
    }

    /// Display name from the profile fields, if any.
    pub fn name(&self) -> Option<&str> {
        self.extra.get("name").and_then(Value::as_str)
    }
}

fn number(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    obj.get(key).and_then(Value::as_f64).filter(|v| v.is_finite())
}

fn parse_str<T: std::str::FromStr>(obj: &Map<String, Value>, key: &str) -> Option<T> {
    obj.get(key).and_then(Value::as_str).and_then(|s| s.parse().ok())
}

fn parse_visibility(value: &Value) -> VisibilityPolicy {
    let visible_to_all_levels = value
        .get("visibleToAllLevels")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let allowed_levels = match value.get("allowedLevels").and_then(Value::as_array) {
        Some(levels) => levels
            .iter()
            .filter_map(Value::as_str)
            .filter_map(|s| s.parse::<FitnessLevel>().ok())
            .collect(),
        None => FitnessLevel::ALL.to_vec(),
    };
    VisibilityPolicy {
        visible_to_all_levels,
        allowed_levels,
    }
}

/// A locatable record that survived a filter pass, with its distance from the caller.
///
/// Ephemeral: rebuilt on every pass and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: String,
    #[serde(flatten)]
    pub record: UserLocationRecord,
    /// Same as `record.location`, unwrapped.
    #[serde(skip)]
    pub location: GpsPoint,
    pub distance_km: f64,
}
