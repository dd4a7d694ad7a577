//! Follow nearby users from a Firebase Realtime Database over REST.
//!
//! Run with:
//!   PACE_MATCH_DB=https://my-app.firebaseio.com PACE_MATCH_TOKEN=... \
//!     cargo run --example rest_session --features http

use std::sync::Arc;

use pace_match::config::NearbyConfig;
use pace_match::rest::RestConfig;
use pace_match::{format_distance, GpsPoint, NearbyQuery, ProximitySession, RestStore};

#[tokio::main]
async fn main() -> pace_match::Result<()> {
    let base_url = std::env::var("PACE_MATCH_DB").unwrap_or_else(|_| "http://localhost:9000".to_string());
    let mut rest = RestConfig::new(base_url);
    if let Ok(token) = std::env::var("PACE_MATCH_TOKEN") {
        rest = rest.with_auth(token);
    }

    let store = Arc::new(RestStore::new(rest)?);
    let config = NearbyConfig::default();
    let query = NearbyQuery::from_config(GpsPoint::new(51.5074, -0.1278), &config).excluding("me");

    let session = ProximitySession::new(store, query, &config);
    session.start().await?;

    let mut results = session.results();
    for _ in 0..5 {
        let nearby = results.borrow_and_update().clone();
        println!("{} nearby:", nearby.len());
        for c in nearby.iter() {
            println!("   {:<12} {}", c.id, format_distance(Some(c.distance_km)));
        }
        if results.changed().await.is_err() {
            break;
        }
    }

    session.stop();
    Ok(())
}
