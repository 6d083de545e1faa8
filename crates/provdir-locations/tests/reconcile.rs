//! Integration tests for `ReconciliationClient` using wiremock HTTP mocks.

use std::sync::Arc;
use std::time::Duration;

use provdir_core::{CatalogService, PrimaryUpdateMode, ServiceCatalog};
use provdir_locations::{
    BearerToken, ClientSettings, EditingSession, LocationDraft, LocationError, LocationKey,
    LocationStore, ProviderTarget, ReconciliationClient, RemoteLocation, RemoteLocations,
    ServiceNormalizer, ServiceRef, SharedStore, WritePhase,
};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const PROVIDER_ID: i64 = 42;

fn normalizer() -> ServiceNormalizer {
    let catalog = ServiceCatalog::new(vec![
        CatalogService {
            id: 1,
            name: "ABA Therapy".to_string(),
        },
        CatalogService {
            id: 3,
            name: "Speech Therapy".to_string(),
        },
    ])
    .expect("catalog should be valid");
    ServiceNormalizer::new(catalog)
}

fn test_client(base_url: &str, target: ProviderTarget) -> ReconciliationClient {
    let settings = ClientSettings {
        fetch_max_retries: 0,
        fetch_backoff_base_ms: 1,
        ..ClientSettings::default()
    };
    let remote = RemoteLocations::new(base_url, &settings, Arc::new(BearerToken::new("test-token")))
        .expect("client construction should not fail");
    ReconciliationClient::new(remote, target, normalizer())
}

fn admin_client(base_url: &str) -> ReconciliationClient {
    test_client(base_url, ProviderTarget::admin(PROVIDER_ID))
}

fn remote(id: i64, name: &str) -> RemoteLocation {
    RemoteLocation {
        id: Some(id),
        name: Some(name.to_string()),
        ..RemoteLocation::default()
    }
}

fn seeded(locations: &[(i64, &str)], primary: Option<i64>) -> SharedStore {
    let store = LocationStore::shared();
    store.lock().unwrap().load(
        locations.iter().map(|(id, name)| remote(*id, name)).collect(),
        primary,
        &normalizer(),
    );
    store
}

fn ids(store: &SharedStore) -> Vec<Option<i64>> {
    store.lock().unwrap().locations().map(|l| l.id).collect()
}

fn write_reply(attributes: &Value) -> Value {
    json!({ "data": [{ "id": PROVIDER_ID.to_string(), "type": "provider", "attributes": attributes }] })
}

/// Answers a replace-all write with exactly what was sent, like a remote
/// that accepts every change.
struct EchoWrite {
    delay: Duration,
}

impl Respond for EchoWrite {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).expect("write body is JSON");
        let attributes = body["data"][0]["attributes"].clone();
        ResponseTemplate::new(200)
            .set_body_json(write_reply(&attributes))
            .set_delay(self.delay)
    }
}

async fn patch_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .expect("request recording is enabled")
        .iter()
        .filter(|r| r.method.as_str() == "PATCH")
        .map(|r| serde_json::from_slice(&r.body).expect("write body is JSON"))
        .collect()
}

fn body_ids(body: &Value) -> Vec<Option<i64>> {
    body["data"][0]["attributes"]["locations"]
        .as_array()
        .expect("locations array")
        .iter()
        .map(|l| l.get("id").and_then(Value::as_i64))
        .collect()
}

#[tokio::test]
async fn add_location_sends_full_set_and_keeps_echoed_primary() {
    let server = MockServer::start().await;

    let reply = write_reply(&json!({
        "locations": [
            { "id": 1, "name": "Main", "primary": true },
            { "id": 2, "name": "Branch", "primary": false },
            { "id": 3, "name": "New", "primary": false }
        ],
        "primary_location_id": 1
    }));
    Mock::given(method("PATCH"))
        .and(path("/providers/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&reply))
        .expect(1)
        .mount(&server)
        .await;

    let client = admin_client(&server.uri());
    let store = seeded(&[(1, "Main"), (2, "Branch")], Some(1));

    let outcome = client
        .add_location(&store, LocationDraft::named("New"))
        .await
        .expect("write should succeed");

    assert!(outcome.applied);
    assert!(outcome.warnings.is_empty());
    assert!(!outcome.refetched);

    let bodies = patch_bodies(&server).await;
    assert_eq!(bodies.len(), 1);
    let body = &bodies[0];
    assert_eq!(body["data"][0]["id"], json!(42));
    let sent = body["data"][0]["attributes"]["locations"]
        .as_array()
        .expect("locations array");
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0]["id"], json!(1));
    assert_eq!(sent[0]["primary"], json!(true));
    assert_eq!(sent[1]["id"], json!(2));
    assert_eq!(sent[1]["primary"], json!(false));
    assert!(sent[2].get("id").is_none());
    assert_eq!(sent[2]["name"], json!("New"));
    assert_eq!(sent[2]["primary"], json!(false));
    assert_eq!(sent[2]["phone"], Value::Null);
    assert_eq!(
        body["data"][0]["attributes"]["primary_location_id"],
        json!(1)
    );

    let guard = store.lock().unwrap();
    assert_eq!(guard.primary_location_id(), Some(1));
    assert_eq!(guard.len(), 3);
    assert_eq!(guard.phase(), WritePhase::Idle);
    assert!(guard.locations().all(|l| l.id.is_some()));
}

#[tokio::test]
async fn count_mismatch_is_rejected_before_any_request() {
    let server = MockServer::start().await;
    let client = admin_client(&server.uri());
    let store = seeded(&[(1, "Main"), (2, "Branch")], Some(1));

    let mut payload = client
        .build_payload(&store.lock().unwrap())
        .expect("payload should build");
    payload.locations.truncate(1);

    let err = client
        .send(&store, payload, 2)
        .await
        .expect_err("mismatched payload must not be sent");

    assert!(matches!(
        err,
        LocationError::CountMismatch {
            expected: 2,
            actual: 1
        }
    ));
    assert!(server.received_requests().await.unwrap().is_empty());
    assert_eq!(ids(&store), vec![Some(1), Some(2)]);
    assert!(!store.lock().unwrap().is_busy());
}

#[tokio::test]
async fn validation_failure_sends_nothing_and_restores_store() {
    let server = MockServer::start().await;
    let client = admin_client(&server.uri());
    let store = seeded(&[(1, "Main")], Some(1));

    let draft = LocationDraft {
        state: Some("South Carolina".to_string()),
        zip: Some("2940".to_string()),
        ..LocationDraft::named("Annex")
    };
    let err = client
        .add_location(&store, draft)
        .await
        .expect_err("invalid draft must be rejected");

    match err {
        LocationError::Validation(errors) => {
            assert_eq!(errors.for_field("state").len(), 1);
            assert_eq!(errors.for_field("zip").len(), 1);
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(server.received_requests().await.unwrap().is_empty());
    assert_eq!(ids(&store), vec![Some(1)]);
}

#[tokio::test]
async fn failed_write_rolls_back_and_refetches_without_retrying() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/providers/42"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/providers/42/locations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "locations": [
                { "id": 1, "name": "Main", "primary": true },
                { "id": 2, "name": "Branch (renamed)", "primary": false }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = admin_client(&server.uri());
    let store = seeded(&[(1, "Main"), (2, "Branch")], Some(1));

    let err = client
        .remove_location(&store, LocationKey::Persisted(2))
        .await
        .expect_err("503 should surface");

    assert!(matches!(err, LocationError::Network(_)));
    let guard = store.lock().unwrap();
    assert_eq!(guard.phase(), WritePhase::Idle);
    assert_eq!(guard.len(), 2);
    assert_eq!(guard.primary_location_id(), Some(1));
    assert_eq!(
        guard
            .get(LocationKey::Persisted(2))
            .and_then(|l| l.name.as_deref()),
        Some("Branch (renamed)")
    );
}

#[tokio::test]
async fn postflight_mismatch_triggers_corrective_refetch() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/providers/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(write_reply(&json!({
            "locations": [
                { "id": 1, "name": "Main", "primary": true },
                { "id": 2, "name": "Branch", "primary": false }
            ]
        }))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/providers/42/locations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "locations": [
                { "id": 1, "name": "Main", "primary": false },
                { "id": 2, "name": "Branch", "primary": true }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = admin_client(&server.uri());
    let store = seeded(&[(1, "Main"), (2, "Branch")], Some(1));

    let outcome = client
        .set_primary(&store, LocationKey::Persisted(2))
        .await
        .expect("write should succeed");

    assert!(outcome.applied);
    assert_eq!(outcome.warnings.len(), 1);
    assert_eq!(outcome.warnings[0].intended, Some(2));
    assert_eq!(outcome.warnings[0].designated, vec![Some(1)]);
    assert!(outcome.refetched);
    assert_eq!(store.lock().unwrap().primary_location_id(), Some(2));
    assert_eq!(ids(&store), vec![Some(2), Some(1)]);
}

#[tokio::test]
async fn refresh_accepts_data_key_and_sends_bearer_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/providers/42/locations"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "id": 7, "name": "North", "practice_types": ["Speech Therapy", "Art Class"] },
                {
                    "id": 5,
                    "name": "Clinic",
                    "address1": "1 Main St",
                    "services": [{ "id": 1, "name": "ABA Therapy" }],
                    "in_clinic_waitlist": "1-2 weeks",
                    "primary": true
                }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = admin_client(&server.uri());
    let store = LocationStore::shared();

    client.refresh(&store).await.expect("refresh should succeed");

    let guard = store.lock().unwrap();
    assert_eq!(guard.primary_location_id(), Some(5));
    let primary = guard.primary().expect("primary location");
    assert_eq!(primary.address1.as_deref(), Some("1 Main St"));
    assert_eq!(
        primary.in_clinic_waitlist.as_ref().map(ToString::to_string),
        Some("1-2 weeks".to_string())
    );
    let north = guard
        .get(LocationKey::Persisted(7))
        .expect("north location");
    assert_eq!(
        north.services,
        vec![
            ServiceRef {
                id: 3,
                name: "Speech Therapy".to_string()
            },
            ServiceRef::unresolved("Art Class"),
        ]
    );
}

#[tokio::test]
async fn delete_location_refetches_full_set() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/providers/42/locations/2"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/providers/42/locations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "locations": [{ "id": 1, "name": "Main", "primary": true }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = admin_client(&server.uri());
    let store = seeded(&[(1, "Main"), (2, "Branch")], Some(1));

    let outcome = client
        .delete_location(&store, LocationKey::Persisted(2))
        .await
        .expect("delete should succeed");

    assert!(outcome.refetched);
    assert_eq!(ids(&store), vec![Some(1)]);
    assert_eq!(store.lock().unwrap().primary_location_id(), Some(1));
}

#[tokio::test]
async fn deleting_unsaved_location_stays_local() {
    let server = MockServer::start().await;
    let client = admin_client(&server.uri());
    let store = seeded(&[(1, "Main")], Some(1));
    let key = store
        .lock()
        .unwrap()
        .add(LocationDraft::named("Draft"))
        .expect("idle store accepts adds");

    let outcome = client
        .delete_location(&store, key)
        .await
        .expect("local delete should succeed");

    assert!(outcome.applied);
    assert!(server.received_requests().await.unwrap().is_empty());
    assert_eq!(ids(&store), vec![Some(1)]);
}

#[tokio::test]
async fn designator_only_primary_update_sends_narrow_body() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/providers/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "attributes": { "primary_location_id": 2 } }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/providers/42/locations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "locations": [
                { "id": 1, "name": "Main", "primary": false },
                { "id": 2, "name": "Branch", "primary": true }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client =
        admin_client(&server.uri()).with_primary_update(PrimaryUpdateMode::DesignatorOnly);
    let store = seeded(&[(1, "Main"), (2, "Branch")], Some(1));

    let outcome = client
        .set_primary(&store, LocationKey::Persisted(2))
        .await
        .expect("write should succeed");

    assert!(outcome.warnings.is_empty());
    let bodies = patch_bodies(&server).await;
    assert_eq!(
        bodies[0]["data"][0]["attributes"],
        json!({ "primary_location_id": 2 })
    );
    assert_eq!(store.lock().unwrap().primary_location_id(), Some(2));
    assert_eq!(ids(&store), vec![Some(2), Some(1)]);
}

#[tokio::test]
async fn self_service_target_writes_to_provider_self() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/provider_self"))
        .respond_with(EchoWrite {
            delay: Duration::ZERO,
        })
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), ProviderTarget::self_service(PROVIDER_ID));
    let store = seeded(&[(1, "Main"), (2, "Branch"), (3, "Annex")], Some(1));

    client
        .move_down(&store, LocationKey::Persisted(2))
        .await
        .expect("write should succeed");

    let bodies = patch_bodies(&server).await;
    assert!(bodies[0]["data"][0].get("id").is_none());
    assert_eq!(body_ids(&bodies[0]), vec![Some(1), Some(3), Some(2)]);
    assert_eq!(ids(&store), vec![Some(1), Some(3), Some(2)]);
}

#[tokio::test]
async fn writes_are_sent_in_submission_order() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/providers/42"))
        .respond_with(EchoWrite {
            delay: Duration::from_millis(150),
        })
        .expect(2)
        .mount(&server)
        .await;

    let client = Arc::new(admin_client(&server.uri()));
    let store = seeded(&[(1, "A"), (2, "B"), (3, "C")], Some(1));

    let first = {
        let (client, store) = (Arc::clone(&client), Arc::clone(&store));
        tokio::spawn(async move { client.set_primary(&store, LocationKey::Persisted(3)).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    let second = {
        let (client, store) = (Arc::clone(&client), Arc::clone(&store));
        tokio::spawn(async move { client.set_primary(&store, LocationKey::Persisted(2)).await })
    };

    first.await.unwrap().expect("first write should succeed");
    second.await.unwrap().expect("second write should succeed");

    let bodies = patch_bodies(&server).await;
    assert_eq!(bodies.len(), 2);
    assert_eq!(body_ids(&bodies[0]), vec![Some(3), Some(1), Some(2)]);
    // Built from the first write's reconciled state, not the original.
    assert_eq!(body_ids(&bodies[1]), vec![Some(2), Some(3), Some(1)]);
    assert_eq!(store.lock().unwrap().primary_location_id(), Some(2));
}

#[tokio::test]
async fn structural_edits_are_rejected_while_a_write_is_in_flight() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/providers/42"))
        .respond_with(EchoWrite {
            delay: Duration::from_millis(200),
        })
        .mount(&server)
        .await;

    let client = Arc::new(admin_client(&server.uri()));
    let store = seeded(&[(1, "A"), (2, "B")], Some(1));

    let write = {
        let (client, store) = (Arc::clone(&client), Arc::clone(&store));
        tokio::spawn(async move { client.move_up(&store, LocationKey::Persisted(2)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = store
        .lock()
        .unwrap()
        .add(LocationDraft::named("Late"))
        .expect_err("store should be busy");
    assert!(matches!(
        err,
        LocationError::Busy {
            phase: WritePhase::Sending
        }
    ));

    write.await.unwrap().expect("write should succeed");
    assert!(!store.lock().unwrap().is_busy());
}

#[tokio::test]
async fn closing_the_session_discards_a_late_write_result() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/providers/42"))
        .respond_with(EchoWrite {
            delay: Duration::from_millis(200),
        })
        .expect(1)
        .mount(&server)
        .await;

    let client = Arc::new(admin_client(&server.uri()));
    let session = EditingSession::new();
    session.with_store(|store| {
        store.load(vec![remote(1, "A"), remote(2, "B")], Some(1), &normalizer());
    });
    let store = Arc::clone(session.store());

    let write = {
        let (client, store) = (Arc::clone(&client), Arc::clone(&store));
        tokio::spawn(async move { client.set_primary(&store, LocationKey::Persisted(2)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(session);

    let outcome = write.await.unwrap().expect("discarding is not an error");
    assert!(!outcome.applied);

    {
        let guard = store.lock().unwrap();
        assert!(guard.is_detached());
        assert_eq!(guard.phase(), WritePhase::Idle);
    }

    let err = client
        .refresh(&store)
        .await
        .expect_err("detached store cannot be refreshed");
    assert!(matches!(err, LocationError::Detached));
}

#[tokio::test]
async fn designator_reply_confirms_primary_without_flagged_fetch() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/providers/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "attributes": { "primary_location_id": 2 } }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/providers/42/locations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "locations": [
                { "id": 1, "name": "Main" },
                { "id": 2, "name": "Branch" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client =
        admin_client(&server.uri()).with_primary_update(PrimaryUpdateMode::DesignatorOnly);
    let store = seeded(&[(1, "Main"), (2, "Branch")], Some(1));

    let outcome = client
        .set_primary(&store, LocationKey::Persisted(2))
        .await
        .expect("write should succeed");

    assert!(outcome.applied);
    assert!(outcome.warnings.is_empty());
    assert!(!outcome.refetched);
    assert_eq!(store.lock().unwrap().primary_location_id(), Some(2));
    assert_eq!(ids(&store), vec![Some(2), Some(1)]);
}

#[tokio::test]
async fn empty_write_reply_is_read_back_with_a_fetch() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/providers/42"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/providers/42/locations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "locations": [{ "id": 1, "name": "Main", "city": "Provo", "primary": true }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = admin_client(&server.uri());
    let store = seeded(&[(1, "Main"), (2, "Branch")], Some(1));

    let outcome = client
        .remove_location(&store, LocationKey::Persisted(2))
        .await
        .expect("write should succeed");

    assert!(outcome.applied);
    assert!(outcome.warnings.is_empty());
    let guard = store.lock().unwrap();
    assert_eq!(guard.len(), 1);
    assert_eq!(guard.primary_location_id(), Some(1));
    assert_eq!(
        guard.primary().and_then(|l| l.city.as_deref()),
        Some("Provo")
    );
    assert_eq!(guard.phase(), WritePhase::Idle);
}

#[tokio::test]
async fn failed_read_back_after_empty_reply_keeps_the_written_state() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/providers/42"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/providers/42/locations"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let client = admin_client(&server.uri());
    let store = seeded(&[(1, "Main"), (2, "Branch")], Some(1));

    let err = client
        .remove_location(&store, LocationKey::Persisted(2))
        .await
        .expect_err("read-back failure should surface");

    assert!(matches!(err, LocationError::Network(_)));
    assert_eq!(ids(&store), vec![Some(1)]);
    assert_eq!(store.lock().unwrap().phase(), WritePhase::Idle);
}

#[tokio::test]
async fn server_held_values_do_not_block_set_primary() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/providers/42"))
        .respond_with(EchoWrite {
            delay: Duration::ZERO,
        })
        .expect(1)
        .mount(&server)
        .await;

    let client = admin_client(&server.uri());
    let store = LocationStore::shared();
    store.lock().unwrap().load(
        vec![
            RemoteLocation {
                state: Some("Utah".to_string()),
                phone: Some("(801) 555-1234 ext 2".to_string()),
                ..remote(1, "Main")
            },
            remote(2, "Branch"),
        ],
        Some(1),
        &normalizer(),
    );

    client
        .set_primary(&store, LocationKey::Persisted(2))
        .await
        .expect("untouched server values must not block the write");

    let bodies = patch_bodies(&server).await;
    let sent = &bodies[0]["data"][0]["attributes"]["locations"];
    assert_eq!(sent[1]["state"], json!("Utah"));
    assert_eq!(sent[1]["phone"], json!("(801) 555-1234 ext 2"));
    assert_eq!(store.lock().unwrap().primary_location_id(), Some(2));
}
