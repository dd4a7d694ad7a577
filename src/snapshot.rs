//! Immutable snapshot of every user document, with a spatial index.
//!
//! A snapshot is built once per upstream change and then shared (behind an `Arc`)
//! by every filter pass that runs against it, push-driven or timer-driven. It is
//! never mutated after construction.

use rstar::{RTree, RTreeObject, AABB};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::geo_utils::search_envelope;
use crate::{GpsPoint, UserLocationRecord};

/// Index entry: one locatable user.
#[derive(Debug, Clone)]
struct IndexedUser {
    id: String,
    lng: f64,
    lat: f64,
}

impl RTreeObject for IndexedUser {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lng, self.lat])
    }
}

/// Parsed user records keyed by user id.
#[derive(Debug, Default)]
pub struct UserSnapshot {
    records: HashMap<String, UserLocationRecord>,
    index: RTree<IndexedUser>,
}

impl UserSnapshot {
    /// Build from a `{ userId: document }` JSON object. Anything else yields an empty snapshot.
    pub fn from_value(value: &Value) -> Self {
        match value.as_object() {
            Some(map) => Self::from_document(map),
            None => Self::default(),
        }
    }

    /// Build from the raw `users` document.
    pub fn from_document(users: &Map<String, Value>) -> Self {
        Self::from_records(
            users
                .iter()
                .map(|(id, doc)| (id.clone(), UserLocationRecord::from_value(doc))),
        )
    }

    /// Build from already-parsed records.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (String, UserLocationRecord)>,
    {
        let records: HashMap<String, UserLocationRecord> = records.into_iter().collect();

        let entries: Vec<IndexedUser> = records
            .iter()
            .filter_map(|(id, r)| {
                r.location.map(|p| IndexedUser {
                    id: id.clone(),
                    lng: p.longitude,
                    lat: p.latitude,
                })
            })
            .collect();

        Self {
            records,
            index: RTree::bulk_load(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records with a usable coordinate pair.
    pub fn locatable_count(&self) -> usize {
        self.index.size()
    }

    pub fn get(&self, id: &str) -> Option<&UserLocationRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UserLocationRecord)> {
        self.records.iter().map(|(id, r)| (id.as_str(), r))
    }

    /// Ids of locatable users that may lie within `radius_km` of `center`.
    ///
    /// This is a superset: callers still check the exact distance. Circles that
    /// touch a pole or the antimeridian return every locatable user.
    pub fn ids_near(&self, center: &GpsPoint, radius_km: f64) -> Vec<&str> {
        match search_envelope(center, radius_km) {
            Some(env) => {
                let aabb = AABB::from_corners([env.min_lng, env.min_lat], [env.max_lng, env.max_lat]);
                self.index
                    .locate_in_envelope(&aabb)
                    .map(|u| u.id.as_str())
                    .collect()
            }
            None => self.index.iter().map(|u| u.id.as_str()).collect(),
        }
    }
}
