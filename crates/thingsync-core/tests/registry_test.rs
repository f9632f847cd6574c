// Integration tests for `RegistrySync` against a wiremock things service.
#![allow(clippy::unwrap_used, clippy::float_cmp)]

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use wiremock::matchers::{body_json, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use thingsync_api::{ThingsClient, TransportConfig};
use thingsync_core::cache::ManualClock;
use thingsync_core::{
    ChannelConnector, CoreError, DeviceType, Freshness, LiveUpdateBus, MemoryStorage,
    PersistentCache, RegistrySync, Storage, SyncConfig, SyncState,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn registry(server: &MockServer, cache: PersistentCache) -> RegistrySync {
    let config = SyncConfig::new(server.uri().parse().unwrap());
    let client = ThingsClient::new(config.server_url.clone(), &TransportConfig::default()).unwrap();
    RegistrySync::with_parts(config, client, cache, LiveUpdateBus::new(ChannelConnector::new()))
}

async fn mount_json(server: &MockServer, route: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// A four-device service: two lamps, a plug and a battery door sensor.
async fn mount_catalog(server: &MockServer, hash: &str) {
    mount_json(server, "/get_known_things_hash", json!(hash)).await;
    mount_json(
        server,
        "/ls",
        json!(["TVRoomLamp", "TVRoomFan", "Kitchen", "Door"]),
    )
    .await;
    mount_json(
        server,
        "/meta/TVRoomLamp",
        json!({
            "type": "light",
            "actions": {
                "state": { "kind": "binary" },
                "brightness": { "kind": "numeric", "min": 0, "max": 254 },
            }
        }),
    )
    .await;
    mount_json(
        server,
        "/meta/TVRoomFan",
        json!({ "type": "switch", "actions": { "state": { "kind": "binary" } } }),
    )
    .await;
    mount_json(
        server,
        "/meta/Kitchen",
        json!({ "type": "light", "actions": [{ "name": "state", "kind": "binary" }] }),
    )
    .await;
    mount_json(
        server,
        "/meta/Door",
        json!({
            "thing_type": "sensor",
            "actions": {
                "contact": { "kind": "binary", "settable": false },
                "battery": { "kind": "numeric", "min": 0, "max": 100, "settable": false },
            }
        }),
    )
    .await;
}

/// Poll until `server` has seen `count` requests to `route`.
async fn wait_for_requests(server: &MockServer, route: &str, count: usize) {
    for _ in 0..100 {
        let seen = server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == route)
            .count();
        if seen >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} request(s) to {route}");
}

// ── Rebuild ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_first_run_rebuilds_and_persists_categories() {
    let server = MockServer::start().await;
    mount_catalog(&server, "ABC123").await;

    let storage = MemoryStorage::new();
    let cache = PersistentCache::new(storage.clone());
    let registry = registry(&server, cache.clone());
    assert!(registry.needs_rebuild());

    let freshness = registry.ensure_fresh().await.unwrap();
    assert_eq!(freshness, Freshness::Rebuilt { devices: 4 });
    assert_eq!(*registry.state().borrow(), SyncState::Ready);
    assert!(!registry.needs_rebuild());
    assert!(registry.banner().borrow().is_none());

    let lights: Vec<String> = registry
        .devices(DeviceType::Light)
        .iter()
        .map(|d| d.name.clone())
        .collect();
    assert_eq!(lights, ["Kitchen", "TVRoomLamp"]);
    assert_eq!(registry.battery_powered(), ["Door"]);

    let lamp = registry.device("TVRoomLamp").unwrap();
    assert!(lamp.capabilities.brightness);
    assert!(lamp.capabilities.on_off);

    // Every category is written, including empty ones.
    assert_eq!(cache.get::<Vec<Value>>("things_metas_scenes"), Some(Vec::new()));
    assert_eq!(
        cache.get::<Vec<String>>("things_catalog").unwrap(),
        ["Door", "Kitchen", "TVRoomFan", "TVRoomLamp"]
    );
    assert_eq!(cache.get::<String>("things_hash").as_deref(), Some("abc123"));

    let grouping = registry.grouped(None);
    assert_eq!(
        grouping.group("TVRoom").unwrap().members,
        ["TVRoomFan", "TVRoomLamp"]
    );
    assert_eq!(grouping.others().unwrap().members, ["Door", "Kitchen"]);
}

#[tokio::test]
async fn test_matching_hash_skips_metadata_fetches() {
    let storage = MemoryStorage::new();

    {
        let server = MockServer::start().await;
        mount_catalog(&server, "abc123").await;
        registry(&server, PersistentCache::new(storage.clone()))
            .ensure_fresh()
            .await
            .unwrap();
    }

    let server = MockServer::start().await;
    mount_json(&server, "/get_known_things_hash", json!(" ABC123 ")).await;
    Mock::given(method("GET"))
        .and(path("/ls"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let restarted = registry(&server, PersistentCache::new(storage));
    assert!(!restarted.needs_rebuild());
    assert_eq!(restarted.all_devices().len(), 4);

    let freshness = restarted.ensure_fresh().await.unwrap();
    assert_eq!(freshness, Freshness::UpToDate);
}

#[tokio::test]
async fn test_hash_mismatch_triggers_rebuild() {
    let server = MockServer::start().await;
    mount_catalog(&server, "first").await;
    let cache = PersistentCache::in_memory();
    let registry = registry(&server, cache);
    registry.ensure_fresh().await.unwrap();

    server.reset().await;
    mount_json(&server, "/get_known_things_hash", json!("second")).await;
    mount_json(&server, "/ls", json!(["Plug"])).await;
    mount_json(&server, "/meta/Plug", json!({ "type": "switch" })).await;

    let freshness = registry.ensure_fresh().await.unwrap();
    assert_eq!(freshness, Freshness::Rebuilt { devices: 1 });
    assert!(registry.device("TVRoomLamp").is_none());
    assert_eq!(registry.devices(DeviceType::Switch)[0].name, "Plug");
}

#[tokio::test]
async fn test_failed_rebuild_keeps_last_known_good() {
    let server = MockServer::start().await;
    mount_catalog(&server, "abc").await;
    let cache = PersistentCache::in_memory();
    let registry = registry(&server, cache.clone());
    registry.ensure_fresh().await.unwrap();

    server.reset().await;
    mount_json(&server, "/get_known_things_hash", json!("changed")).await;
    mount_json(&server, "/ls", json!(["TVRoomLamp", "NewThing"])).await;
    Mock::given(method("GET"))
        .and(path("/meta/NewThing"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    mount_json(&server, "/meta/TVRoomLamp", json!({ "type": "light" })).await;

    let err = registry.reload().await.unwrap_err();
    assert!(matches!(err, CoreError::Api { status: 503, .. }));
    assert!(err.is_transient());

    assert_eq!(registry.all_devices().len(), 4, "catalog untouched");
    assert_eq!(cache.get::<Vec<String>>("things_catalog").unwrap().len(), 4);
    assert_eq!(cache.get::<String>("things_hash").as_deref(), Some("abc"));
    assert!(registry.needs_rebuild());
    assert_eq!(*registry.state().borrow(), SyncState::Ready);
    assert!(registry.banner().borrow().as_deref().unwrap().contains("503"));

    // The next successful rebuild clears the banner.
    server.reset().await;
    mount_catalog(&server, "abc").await;
    registry.ensure_fresh().await.unwrap();
    assert!(registry.banner().borrow().is_none());
}

#[tokio::test]
async fn test_partial_cache_write_forces_rebuild_on_restart() {
    let storage = MemoryStorage::with_quota(4000);

    let small = MockServer::start().await;
    mount_json(&small, "/get_known_things_hash", json!("h1")).await;
    mount_json(&small, "/ls", json!(["OldLamp"])).await;
    mount_json(&small, "/meta/OldLamp", json!({ "type": "light" })).await;
    registry(&small, PersistentCache::new(storage.clone()))
        .rebuild()
        .await
        .unwrap();

    // Forty-one lights no longer fit under the quota.
    let names: Vec<String> = (0..41).map(|i| format!("HallwayLamp{i:02}")).collect();
    let large = MockServer::start().await;
    mount_json(&large, "/get_known_things_hash", json!("h2")).await;
    mount_json(&large, "/ls", json!(names)).await;
    Mock::given(method("GET"))
        .and(path_regex("^/meta/HallwayLamp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "light",
            "actions": {
                "state": { "kind": "binary" },
                "brightness": { "kind": "numeric", "min": 0, "max": 254 },
            }
        })))
        .mount(&large)
        .await;

    let first = registry(&large, PersistentCache::new(storage.clone()));
    assert_eq!(first.rebuild().await.unwrap(), 41, "in-memory catalog is complete");
    assert!(storage.get_item("things_metas_lights").unwrap().is_none());
    assert!(storage.get_item("things_hash").unwrap().is_none());

    let restarted = registry(&large, PersistentCache::new(storage.clone()));
    assert!(restarted.needs_rebuild());
    assert!(restarted.device("OldLamp").is_none(), "no mixed catalog");
    assert_eq!(
        restarted.ensure_fresh().await.unwrap(),
        Freshness::Rebuilt { devices: 41 }
    );
}

#[tokio::test]
async fn test_malformed_metadata_becomes_unknown() {
    let server = MockServer::start().await;
    mount_json(&server, "/get_known_things_hash", json!("h")).await;
    mount_json(&server, "/ls", json!(["Weird", "Lamp1"])).await;
    mount_json(&server, "/meta/Lamp1", json!({ "type": "light" })).await;
    Mock::given(method("GET"))
        .and(path("/meta/Weird"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let registry = registry(&server, PersistentCache::in_memory());
    assert_eq!(registry.rebuild().await.unwrap(), 2);

    let weird = registry.device("Weird").unwrap();
    assert_eq!(weird.device_type, DeviceType::Unknown);
    assert!(weird.actions.is_empty());
}

#[tokio::test]
async fn test_missing_remote_hash_records_local_hash() {
    let server = MockServer::start().await;
    mount_json(&server, "/ls", json!(["Lamp1"])).await;
    mount_json(&server, "/meta/Lamp1", json!({ "type": "light" })).await;

    let cache = PersistentCache::in_memory();
    let registry = registry(&server, cache.clone());
    registry.rebuild().await.unwrap();

    let stored = cache.get::<String>("things_hash").unwrap();
    assert_eq!(stored, thingsync_core::CatalogHash::of_names(["Lamp1"]).as_str());
}

#[tokio::test]
async fn test_expired_cache_is_revalidated_by_hash() {
    let server = MockServer::start().await;
    mount_catalog(&server, "abc").await;

    let storage = MemoryStorage::new();
    let clock = ManualClock::new(0);
    let mut config = SyncConfig::new(server.uri().parse().unwrap());
    config.metadata_ttl = Some(Duration::from_secs(60));
    let client = ThingsClient::new(config.server_url.clone(), &TransportConfig::default()).unwrap();
    let build = |cache: PersistentCache| {
        RegistrySync::with_parts(
            config.clone(),
            client.clone(),
            cache,
            LiveUpdateBus::new(ChannelConnector::new()),
        )
    };

    build(PersistentCache::with_clock(storage.clone(), clock.clone()))
        .ensure_fresh()
        .await
        .unwrap();

    clock.advance(Duration::from_secs(120));
    let cache = PersistentCache::with_clock(storage, clock);
    let restarted = build(cache.clone());
    assert!(restarted.device("Door").unwrap().stale);
    assert!(cache.get::<Vec<Value>>("things_metas_sensors").is_none());

    assert_eq!(restarted.ensure_fresh().await.unwrap(), Freshness::UpToDate);
    assert!(!restarted.device("Door").unwrap().stale);
    assert!(
        cache.get::<Vec<Value>>("things_metas_sensors").is_some(),
        "revalidation restarts the TTL"
    );
}

#[tokio::test]
async fn test_reset_cache_forgets_everything() {
    let server = MockServer::start().await;
    mount_catalog(&server, "abc").await;
    let cache = PersistentCache::in_memory();
    let registry = registry(&server, cache.clone());
    registry.ensure_fresh().await.unwrap();

    registry.reset_cache();
    assert!(registry.all_devices().is_empty());
    assert!(registry.needs_rebuild());
    assert_eq!(*registry.state().borrow(), SyncState::Uninitialized);
    assert!(cache.get::<Value>("things_metas_lights").is_none());
    assert!(cache.get::<Value>("things_hash").is_none());
}

// ── State ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_load_world_and_refresh_state() {
    let server = MockServer::start().await;
    mount_catalog(&server, "abc").await;
    mount_json(
        &server,
        "/get_world",
        json!({
            "TVRoomLamp": { "state": "off", "brightness": 40 },
            "Door": { "battery": 9 },
            "Stranger": { "state": true },
        }),
    )
    .await;
    mount_json(&server, "/get/Kitchen", json!({ "state": true })).await;
    mount_json(&server, "/get/TVRoomLamp", json!({ "state": "off", "brightness": null })).await;

    let registry = registry(&server, PersistentCache::in_memory());
    registry.ensure_fresh().await.unwrap();

    assert_eq!(registry.load_world().await.unwrap(), 2);
    let lamp = registry.device("TVRoomLamp").unwrap();
    assert_eq!(lamp.current_state["state"], json!(false));
    assert_eq!(lamp.current_state["brightness"], json!(40));
    assert!(registry.device("Stranger").is_none());

    let low = registry.low_battery(20.0);
    assert_eq!(low.len(), 1);
    assert_eq!(low[0].name, "Door");
    assert_eq!(low[0].level, 9.0);

    registry.refresh_state("Kitchen").await.unwrap();
    assert_eq!(registry.device("Kitchen").unwrap().current_state["state"], json!(true));

    // A direct fetch is normalized the same way as world and bus updates.
    registry.refresh_state("TVRoomLamp").await.unwrap();
    let lamp = registry.device("TVRoomLamp").unwrap();
    assert_eq!(lamp.current_state.get("state"), Some(&json!(false)));
    assert!(!lamp.current_state.contains_key("brightness"));

    let err = registry.refresh_state("Ghost").await.unwrap_err();
    assert!(matches!(err, CoreError::DeviceNotFound { .. }));
}

// ── Mutations ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_set_action_clamps_and_applies_optimistically() {
    let server = MockServer::start().await;
    mount_catalog(&server, "abc").await;
    Mock::given(method("PUT"))
        .and(path("/set/TVRoomLamp"))
        .and(body_json(json!({ "brightness": 254 })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let registry = registry(&server, PersistentCache::in_memory());
    registry.ensure_fresh().await.unwrap();

    registry
        .set_action("TVRoomLamp", "brightness", json!(999))
        .await
        .unwrap();
    assert_eq!(
        registry.device("TVRoomLamp").unwrap().current_state["brightness"],
        json!(254)
    );
}

#[tokio::test]
async fn test_failed_mutation_keeps_optimistic_state() {
    let server = MockServer::start().await;
    mount_catalog(&server, "abc").await;
    Mock::given(method("PUT"))
        .and(path("/set/TVRoomFan"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let registry = registry(&server, PersistentCache::in_memory());
    registry.ensure_fresh().await.unwrap();

    let err = registry
        .set_action("TVRoomFan", "state", json!(true))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Api { status: 500, .. }));
    assert_eq!(
        registry.device("TVRoomFan").unwrap().current_state["state"],
        json!(true)
    );
    assert!(registry.banner().borrow().is_some());
}

#[tokio::test]
async fn test_debounced_drag_sends_one_put_through_worker() {
    let server = MockServer::start().await;
    mount_catalog(&server, "abc").await;
    Mock::given(method("PUT"))
        .and(path("/set/TVRoomLamp"))
        .and(body_json(json!({ "brightness": 150.0 })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let registry = registry(&server, PersistentCache::in_memory());
    registry.ensure_fresh().await.unwrap();
    registry.start();

    let mut control = registry.control("TVRoomLamp", "brightness", 0.0_f64).unwrap();
    control.begin_gesture();
    for step in 1..=50 {
        control.input(f64::from(step) * 3.0);
    }
    control.end_gesture();

    wait_for_requests(&server, "/set/TVRoomLamp", 1).await;
    registry.shutdown().await;

    let err = registry
        .control::<bool>("Door", "contact", false)
        .unwrap_err();
    assert!(matches!(err, CoreError::ReadOnlyAction { .. }));
}

// ── Live updates ────────────────────────────────────────────────────

#[tokio::test]
async fn test_live_tracking_follows_rebuilds() {
    let server = MockServer::start().await;
    mount_catalog(&server, "abc").await;

    let connector = ChannelConnector::new();
    let config = SyncConfig::new(server.uri().parse().unwrap());
    let client = ThingsClient::new(config.server_url.clone(), &TransportConfig::default()).unwrap();
    let registry = RegistrySync::with_parts(
        config,
        client,
        PersistentCache::in_memory(),
        LiveUpdateBus::new(connector.clone()),
    );

    registry.track_live_state();
    assert!(!registry.bus().is_streaming(), "nothing to follow yet");

    registry.ensure_fresh().await.unwrap();
    assert_eq!(registry.bus().subscription_count(), 4);
    assert!(registry.bus().is_streaming());
    assert_eq!(connector.connect_count(), 1);

    let mut catalog = registry.subscribe_catalog();
    connector.emit(thingsync_api::StreamEvent::ThingMessage(
        json!({ "Door": { "battery": "7", "contact": null } })
            .as_object()
            .unwrap()
            .clone(),
    ));
    catalog.changed().await.unwrap();
    assert_eq!(registry.device("Door").unwrap().battery_level(), Some(7.0));

    registry.shutdown().await;
    assert!(!registry.bus().is_streaming());
}
