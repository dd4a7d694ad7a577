//! # Geographic Utilities
//!
//! Distance computation and display helpers for proximity discovery.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two GPS points, in meters |
//! | [`distance_km`] | Null-propagating distance between raw coordinates, in kilometers |
//! | [`format_distance`] | Human-readable "850m" / "2.3km" / "Unknown" |
//! | [`meters_to_degrees`] | Convert meters to degrees of longitude at a latitude |
//! | [`search_envelope`] | Conservative lat/lng box around a search circle |
//!
//! ## Example
//!
//! ```rust
//! use pace_match::geo_utils;
//!
//! let km = geo_utils::distance_km(51.5074, -0.1278, 51.5090, -0.1300);
//! assert!(km.is_some());
//! println!("{}", geo_utils::format_distance(km)); // "227m"
//!
//! // Missing coordinates never error, they just can't be compared
//! assert_eq!(geo_utils::distance_km(0.0, -0.1278, 51.5090, -0.1300), None);
//! assert_eq!(geo_utils::format_distance(None), "Unknown");
//! ```
//!
//! ## Algorithm Notes
//!
//! Distances use the haversine formula on a sphere with the IUGG mean Earth radius
//! (6,371,008.8 m). At urban scales (< 50 km) the error against the WGS84 ellipsoid
//! is well below typical GPS error.

use geo::{Distance, Haversine, Point};

use crate::GpsPoint;

/// Length of one degree of latitude on the haversine sphere, in meters.
const METERS_PER_DEGREE: f64 = 111_195.08;

/// Slack added to search envelopes so the exact distance check is the only cut.
const ENVELOPE_MARGIN: f64 = 1.01;

// =============================================================================
// Distance Functions
// =============================================================================

/// Calculate the great-circle distance between two GPS points using the Haversine formula.
///
/// Returns the distance in meters. Symmetric: `d(a, b) == d(b, a)`.
///
/// # Example
///
/// ```rust
/// use pace_match::{GpsPoint, geo_utils};
///
/// let london = GpsPoint::new(51.5074, -0.1278);
/// let paris = GpsPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 1000.0); // ~344 km
/// ```
#[inline]
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Distance in kilometers between two raw coordinate pairs.
///
/// Returns `None` when any coordinate is zero, NaN or infinite. Callers treat
/// `None` as "cannot compare" and exclude the record; it is never an error.
///
/// Zero is rejected because documents written by older clients use `0` as a
/// "no fix yet" placeholder. Parsed [`UserLocationRecord`](crate::UserLocationRecord)s
/// carry an explicit `Option<GpsPoint>` instead and compare with
/// [`GpsPoint::distance_km_to`].
pub fn distance_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> Option<f64> {
    let usable = |v: f64| v.is_finite() && v != 0.0;
    if !(usable(lat1) && usable(lng1) && usable(lat2) && usable(lng2)) {
        return None;
    }

    let meters = haversine_distance(&GpsPoint::new(lat1, lng1), &GpsPoint::new(lat2, lng2));
    Some(meters / 1000.0)
}

/// Format a distance for display.
///
/// - `None` → `"Unknown"`
/// - below 1 km → whole meters, e.g. `"850m"`
/// - otherwise → kilometers with one decimal, e.g. `"2.3km"`
///
/// Unit localization is left to the display layer.
pub fn format_distance(distance_km: Option<f64>) -> String {
    match distance_km {
        Some(km) if km.is_finite() => {
            if km < 1.0 {
                format!("{}m", (km * 1000.0).round() as i64)
            } else {
                format!("{:.1}km", km)
            }
        }
        _ => "Unknown".to_string(),
    }
}

/// Convert meters to approximate degrees of longitude at a given latitude.
///
/// The cosine is floored at 0.1 so the result stays finite near the poles;
/// the value is only used to size search boxes.
#[inline]
pub fn meters_to_degrees(meters: f64, latitude: f64) -> f64 {
    let lat_rad = latitude.to_radians();
    let meters_per_degree = METERS_PER_DEGREE * lat_rad.cos().max(0.1);
    meters / meters_per_degree
}

// =============================================================================
// Search Envelopes
// =============================================================================

/// Axis-aligned lat/lng box, inclusive on all sides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchEnvelope {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl SearchEnvelope {
    pub fn contains(&self, p: &GpsPoint) -> bool {
        p.latitude >= self.min_lat
            && p.latitude <= self.max_lat
            && p.longitude >= self.min_lng
            && p.longitude <= self.max_lng
    }
}

/// Compute a box guaranteed to contain every point within `radius_km` of `center`.
///
/// Returns `None` when the circle reaches a pole or crosses the antimeridian;
/// callers fall back to scanning every point in that case.
pub fn search_envelope(center: &GpsPoint, radius_km: f64) -> Option<SearchEnvelope> {
    if !center.is_valid() || !radius_km.is_finite() || radius_km < 0.0 {
        return None;
    }

    let radius_m = radius_km * 1000.0 * ENVELOPE_MARGIN;
    let lat_delta = radius_m / METERS_PER_DEGREE;
    let min_lat = center.latitude - lat_delta;
    let max_lat = center.latitude + lat_delta;
    if min_lat <= -90.0 || max_lat >= 90.0 {
        return None;
    }

    // Longitude degrees shrink towards the poles, so size by the widest latitude reached
    let widest_lat = min_lat.abs().max(max_lat.abs());
    let lng_delta = radius_m / (METERS_PER_DEGREE * widest_lat.to_radians().cos());
    let min_lng = center.longitude - lng_delta;
    let max_lng = center.longitude + lng_delta;
    if min_lng < -180.0 || max_lng > 180.0 {
        return None;
    }

    Some(SearchEnvelope { min_lat, max_lat, min_lng, max_lng })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    #[test]
    fn test_haversine_distance_same_point() {
        let p = GpsPoint::new(51.5074, -0.1278);
        assert_eq!(haversine_distance(&p, &p), 0.0);
    }

    #[test]
    fn test_haversine_distance_known_value() {
        // London to Paris is approximately 344 km
        let london = GpsPoint::new(51.5074, -0.1278);
        let paris = GpsPoint::new(48.8566, 2.3522);
        let dist = haversine_distance(&london, &paris);
        assert!(approx_eq(dist, 343_560.0, 5000.0)); // Within 5km
    }

    #[test]
    fn test_distance_km_symmetric() {
        let pairs = [
            (51.5074, -0.1278, 48.8566, 2.3522),
            (-33.8688, 151.2093, -33.8700, 151.2200),
            (40.7128, -74.0060, 40.7306, -73.9352),
        ];
        for (a, b, c, d) in pairs {
            let ab = distance_km(a, b, c, d).unwrap();
            let ba = distance_km(c, d, a, b).unwrap();
            assert!(approx_eq(ab, ba, 1e-9), "{} vs {}", ab, ba);
        }
    }

    #[test]
    fn test_distance_km_self_is_zero() {
        assert_eq!(distance_km(51.5074, -0.1278, 51.5074, -0.1278), Some(0.0));
    }

    #[test]
    fn test_distance_km_null_propagation() {
        assert_eq!(distance_km(0.0, -0.1278, 51.5, -0.12), None);
        assert_eq!(distance_km(51.5074, 0.0, 51.5, -0.12), None);
        assert_eq!(distance_km(51.5074, -0.1278, f64::NAN, -0.12), None);
        assert_eq!(distance_km(51.5074, -0.1278, 51.5, f64::INFINITY), None);
    }

    #[test]
    fn test_distance_km_urban_accuracy() {
        // 0.01 degrees of latitude is ~1.112 km anywhere
        let d = distance_km(51.50, -0.12, 51.51, -0.12).unwrap();
        assert!(approx_eq(d, 1.112, 0.005));
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(None), "Unknown");
        assert_eq!(format_distance(Some(f64::NAN)), "Unknown");
        assert_eq!(format_distance(Some(0.0)), "0m");
        assert_eq!(format_distance(Some(0.8504)), "850m");
        assert_eq!(format_distance(Some(0.9996)), "1000m");
        assert_eq!(format_distance(Some(1.0)), "1.0km");
        assert_eq!(format_distance(Some(2.34)), "2.3km");
        assert_eq!(format_distance(Some(111.19)), "111.2km");
    }

    #[test]
    fn test_meters_to_degrees() {
        let deg = meters_to_degrees(METERS_PER_DEGREE, 0.0);
        assert!(approx_eq(deg, 1.0, 1e-9));

        // At higher latitude, same distance = more degrees
        let deg_45 = meters_to_degrees(METERS_PER_DEGREE, 45.0);
        assert!(deg_45 > 1.0);
    }

    #[test]
    fn test_search_envelope_contains_circle() {
        let center = GpsPoint::new(60.0, 10.0);
        let env = search_envelope(&center, 5.0).unwrap();

        // Points exactly 5 km away on each axis must be inside
        let north = GpsPoint::new(60.0 + 5000.0 / METERS_PER_DEGREE, 10.0);
        let east_deg = 5000.0 / (METERS_PER_DEGREE * 60.0f64.to_radians().cos());
        let east = GpsPoint::new(60.0, 10.0 + east_deg);
        assert!(env.contains(&north));
        assert!(env.contains(&east));
        assert!(haversine_distance(&center, &east) <= 5000.0 + 1.0);

        // Far away point is outside
        assert!(!env.contains(&GpsPoint::new(61.0, 10.0)));
    }

    #[test]
    fn test_search_envelope_wraps() {
        assert!(search_envelope(&GpsPoint::new(0.0, 179.99), 5.0).is_none());
        assert!(search_envelope(&GpsPoint::new(89.99, 0.0), 5.0).is_none());
        assert!(search_envelope(&GpsPoint::new(0.0, 0.0), 5.0).is_some());
    }
}
