//! Filter a small user snapshot for nearby, active people.
//!
//! Run with: cargo run --example nearby_scan

use pace_match::{filter_nearby, format_distance, now_ms, Activity, GpsPoint, NearbyQuery, UserSnapshot, VisibilityMode};
use serde_json::json;

fn main() {
    let now = now_ms();
    let users = json!({
        "me":     { "lat": 51.5074, "lng": -0.1278, "timestamp": now, "activity": "running" },
        "alex":   { "lat": 51.5080, "lng": -0.1290, "timestamp": now, "activity": "running", "gender": "female" },
        "jordan": { "lat": 51.5150, "lng": -0.1400, "timestamp": now - 60_000, "activity": "cycling" },
        "sam":    { "lat": 51.5200, "lng": -0.1000, "timestamp": now, "activity": "running", "profileVisible": false },
        "riley":  { "lat": 51.5090, "lng": -0.1250, "timestamp": now - 20 * 60_000, "activity": "walking" },
        "casey":  { "lat": 51.5100, "lng": -0.1300, "visible": false, "timestamp": now },
        "ghost":  { "lat": "n/a", "lng": -0.1300, "timestamp": now },
        "paris":  { "lat": 48.8566, "lng": 2.3522, "timestamp": now },
    });

    let snapshot = UserSnapshot::from_value(&users);
    let origin = GpsPoint::new(51.5074, -0.1278);

    println!("Nearby Scan ({} users, {} locatable)\n", snapshot.len(), snapshot.locatable_count());

    let workout = NearbyQuery::new(origin, 5.0)
        .excluding("me")
        .with_visibility(VisibilityMode::Workout);
    println!("1. Workout map (visible only):");
    for c in filter_nearby(&snapshot, &workout, now) {
        println!("   {:<8} {}", c.id, format_distance(Some(c.distance_km)));
    }

    let discovery = workout.clone().with_visibility(VisibilityMode::Discovery);
    println!("\n2. Discovery (visible and profileVisible):");
    for c in filter_nearby(&snapshot, &discovery, now) {
        println!("   {:<8} {}", c.id, format_distance(Some(c.distance_km)));
    }

    let runners = discovery.with_activity(Some(Activity::Running));
    println!("\n3. Runners only:");
    for c in filter_nearby(&snapshot, &runners, now) {
        println!("   {:<8} {}", c.id, format_distance(Some(c.distance_km)));
    }
}
