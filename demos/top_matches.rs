//! Rank workout partners for a runner.
//!
//! Run with: cargo run --example top_matches

use pace_match::{now_ms, score_matches, Activity, FitnessLevel, GpsPoint, MatchConfig, Seeker, UserSnapshot};
use serde_json::json;

fn main() {
    let now = now_ms();
    let users = json!({
        "alex":   { "lat": 51.5080, "lng": -0.1290, "timestamp": now, "activity": "running",
                    "fitnessLevel": "intermediate", "pace": 5.4 },
        "jordan": { "lat": 51.5300, "lng": -0.1278, "timestamp": now, "activity": "running",
                    "fitnessLevel": "pro", "pace": 4.6 },
        "sam":    { "lat": 51.5100, "lng": -0.1200, "timestamp": now, "activity": "running",
                    "fitnessLevel": "beginner" },
        "riley":  { "lat": 51.5090, "lng": -0.1250, "timestamp": now, "activity": "running",
                    "fitnessLevel": "pro", "pace": 4.1,
                    "visibility": { "visibleToAllLevels": false, "allowedLevels": ["pro"] } },
        "casey":  { "lat": 51.5110, "lng": -0.1260, "timestamp": now, "activity": "cycling", "pace": 25.0 },
        "idle":   { "lat": 51.5075, "lng": -0.1279, "timestamp": now - 10 * 60_000, "activity": "running" },
    });
    let snapshot = UserSnapshot::from_value(&users);

    let mut seeker = Seeker::new("me", GpsPoint::new(51.5074, -0.1278), Activity::Running);
    seeker.fitness_level = FitnessLevel::Intermediate;
    seeker.pace = Some(5.2);

    let config = MatchConfig::default();
    println!("Top Matches (weights: {:?})\n", config.weights);

    for (rank, m) in score_matches(&seeker, &snapshot, &config, now).iter().enumerate() {
        println!(
            "{}. {:<8} score {:.3}  {:>5.0}m  level {}  pace {:?}",
            rank + 1,
            m.user_id,
            m.score,
            m.distance_m,
            m.user.fitness_level.as_str(),
            m.user.pace
        );
    }
}
