//! Nearby filter pipeline.
//!
//! Turns a [`UserSnapshot`] into the distance-sorted list of people currently
//! active around the caller. Each record goes through these checks, in order,
//! and the first failing check excludes it:
//!
//! 1. the caller's own id
//! 2. missing or invalid coordinates
//! 3. `visible == false`
//! 4. `profileVisible == false` (discovery mode only)
//! 5. farther than the radius
//! 6. activity filter
//! 7. gender filter
//! 8. no timestamp, or a timestamp older than the active threshold
//!
//! The checks are independent, so the order only affects which [`Exclusion`]
//! is reported in debug logs. Filtering is pure: the same snapshot, query and
//! `now_ms` always give the same output.

use log::debug;
use std::cmp::Ordering;

use crate::config::NearbyConfig;
use crate::{Activity, Candidate, GpsPoint, UserLocationRecord, UserSnapshot};

/// Which visibility flags apply to a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VisibilityMode {
    /// Workout map: only `visible` is checked.
    Workout,
    /// People discovery: both `visible` and `profileVisible` are checked.
    #[default]
    Discovery,
}

/// Reason a record was left out of the results.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Exclusion {
    SelfExcluded,
    Unlocatable,
    Hidden,
    NotDiscoverable,
    OutOfRange { distance_km: f64 },
    ActivityMismatch,
    GenderMismatch,
    NoTimestamp,
    Stale { age_ms: i64 },
}

/// Parameters of a filter pass.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyQuery {
    pub origin: GpsPoint,
    pub max_distance_km: f64,
    pub exclude_user_id: Option<String>,
    /// `None` means all activities.
    pub activity: Option<Activity>,
    /// `None` means all genders.
    pub gender: Option<String>,
    pub visibility: VisibilityMode,
    pub active_threshold_ms: u64,
}

impl NearbyQuery {
    /// Query with no filters and the default 10 minute active threshold.
    pub fn new(origin: GpsPoint, max_distance_km: f64) -> Self {
        Self {
            origin,
            max_distance_km,
            exclude_user_id: None,
            activity: None,
            gender: None,
            visibility: VisibilityMode::default(),
            active_threshold_ms: NearbyConfig::default().active_threshold_ms,
        }
    }

    /// Query using the configured default radius and active threshold.
    pub fn from_config(origin: GpsPoint, config: &NearbyConfig) -> Self {
        Self {
            active_threshold_ms: config.active_threshold_ms,
            ..Self::new(origin, config.default_max_distance_km)
        }
    }

    pub fn excluding(mut self, user_id: impl Into<String>) -> Self {
        self.exclude_user_id = Some(user_id.into());
        self
    }

    pub fn with_activity(mut self, activity: Option<Activity>) -> Self {
        self.activity = activity;
        self
    }

    pub fn with_gender(mut self, gender: Option<String>) -> Self {
        self.gender = gender;
        self
    }

    pub fn with_visibility(mut self, mode: VisibilityMode) -> Self {
        self.visibility = mode;
        self
    }

    pub fn with_active_threshold_ms(mut self, threshold_ms: u64) -> Self {
        self.active_threshold_ms = threshold_ms;
        self
    }
}

/// Run every check on a single record.
pub fn evaluate(
    id: &str,
    record: &UserLocationRecord,
    query: &NearbyQuery,
    now_ms: i64,
) -> Result<Candidate, Exclusion> {
    if query.exclude_user_id.as_deref() == Some(id) {
        return Err(Exclusion::SelfExcluded);
    }

    let location = record.location.ok_or(Exclusion::Unlocatable)?;

    if !record.visible {
        return Err(Exclusion::Hidden);
    }

    if query.visibility == VisibilityMode::Discovery && !record.profile_visible {
        return Err(Exclusion::NotDiscoverable);
    }

    let distance_km = query.origin.distance_km_to(&location);
    if !(distance_km <= query.max_distance_km) {
        return Err(Exclusion::OutOfRange { distance_km });
    }

    if let Some(activity) = query.activity {
        if record.activity != Some(activity) {
            return Err(Exclusion::ActivityMismatch);
        }
    }

    if let Some(gender) = &query.gender {
        if record.gender.as_deref() != Some(gender.as_str()) {
            return Err(Exclusion::GenderMismatch);
        }
    }

    let timestamp = record.timestamp.ok_or(Exclusion::NoTimestamp)?;
    let age_ms = now_ms.saturating_sub(timestamp);
    if age_ms > query.active_threshold_ms as i64 {
        return Err(Exclusion::Stale { age_ms });
    }

    Ok(Candidate {
        id: id.to_string(),
        record: record.clone(),
        location,
        distance_km,
    })
}

/// Filter a snapshot down to active nearby users, sorted by ascending distance.
///
/// Equal distances are ordered by id so output is fully deterministic.
pub fn filter_nearby(snapshot: &UserSnapshot, query: &NearbyQuery, now_ms: i64) -> Vec<Candidate> {
    if !query.origin.is_valid() {
        debug!("[Nearby] Caller has no valid location, nothing to compare");
        return Vec::new();
    }

    let ids = snapshot.ids_near(&query.origin, query.max_distance_km);
    let mut results: Vec<Candidate> = ids
        .into_iter()
        .filter_map(|id| {
            let record = snapshot.get(id)?;
            match evaluate(id, record, query, now_ms) {
                Ok(candidate) => Some(candidate),
                Err(reason) => {
                    debug!("[Nearby] {} excluded: {:?}", id, reason);
                    None
                }
            }
        })
        .collect();

    results.sort_by(|a, b| {
        a.distance_km
            .partial_cmp(&b.distance_km)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    debug!(
        "[Nearby] {} of {} users within {:.1}km and active",
        results.len(),
        snapshot.len(),
        query.max_distance_km
    );

    results
}
