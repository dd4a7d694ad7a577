//! Tests for the REST store adapter.
//!
//! Uses `wiremock` to stand up a local HTTP server for each test.

#![cfg(feature = "http")]

use std::time::Duration;

use pace_match::rest::{RestConfig, RestStore};
use pace_match::{EncounterRecord, EncounterStore, PaceMatchError, UserLocationStore};
use serde_json::json;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store(server: &MockServer) -> RestStore {
    let config = RestConfig {
        retry_backoff_ms: 1,
        poll_interval_ms: 50,
        ..RestConfig::new(server.uri()).with_auth("secret")
    };
    RestStore::new(config).expect("failed to build test RestStore")
}

#[tokio::test]
async fn get_returns_none_for_missing_user() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/u1.json"))
        .and(query_param("auth", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(null)))
        .mount(&server)
        .await;

    let result = UserLocationStore::get(&store(&server), "u1").await;
    assert!(matches!(result, Ok(None)), "got {result:?}");
}

#[tokio::test]
async fn set_puts_full_document() {
    let server = MockServer::start().await;
    let doc = json!({ "lat": 51.5, "lng": -0.12, "visible": true, "name": "Sam" });
    Mock::given(method("PUT"))
        .and(path("/users/u1.json"))
        .and(body_json(&doc))
        .respond_with(ResponseTemplate::new(200).set_body_json(&doc))
        .expect(1)
        .mount(&server)
        .await;

    UserLocationStore::set(&store(&server), "u1", doc).await.unwrap();
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/u1.json"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/u1.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "lat": 1.5 })))
        .mount(&server)
        .await;

    let doc = UserLocationStore::get(&store(&server), "u1").await.unwrap();
    assert_eq!(doc, Some(json!({ "lat": 1.5 })));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/u1.json"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let err = UserLocationStore::get(&store(&server), "u1").await.unwrap_err();
    assert!(matches!(err, PaceMatchError::Store { .. }));
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn subscribe_polls_for_changes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "u1": { "lat": 1.5 } })))
        .mount(&server)
        .await;

    let mut sub = store(&server).subscribe().await.unwrap();
    assert!(sub.current().is_empty());

    let doc = tokio::time::timeout(Duration::from_secs(5), sub.changed())
        .await
        .expect("no change within 5s")
        .expect("subscription closed");
    assert!(doc.contains_key("u1"));
    sub.unsubscribe();
}

#[tokio::test]
async fn encounter_round_trip() {
    let server = MockServer::start().await;
    let record = EncounterRecord {
        user_id: "u1".to_string(),
        encountered_at: 1,
        last_seen_at: 2,
        distance: 0.4,
        lat: 51.5,
        lng: -0.12,
        count: 2,
    };
    Mock::given(method("GET"))
        .and(path("/encounteredUsers/me/u1.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&record))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/encounteredUsers/me.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "u1": record, "junk": "not a record" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/encounteredUsers/me/u1.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(null)))
        .expect(1)
        .mount(&server)
        .await;

    let store = store(&server);
    assert_eq!(EncounterStore::get(&store, "me", "u1").await.unwrap(), Some(record.clone()));
    assert_eq!(store.list("me").await.unwrap(), vec![("u1".to_string(), record)]);
    store.remove("me", "u1").await.unwrap();
}
