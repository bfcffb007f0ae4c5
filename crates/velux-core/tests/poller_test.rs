#![allow(clippy::unwrap_used)]
// Integration tests for the poll loop: full cycles against mocked feeds.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use velux_api::{Identity, VeluxClient};
use velux_core::{
    Account, CoreError, CredentialStore, ExporterContext, MetricsState, RetryPolicy, TokenManager,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn context(
    server: &MockServer,
    dir: &TempDir,
    poll_interval: Duration,
    retry: RetryPolicy,
) -> ExporterContext {
    let client = VeluxClient::with_client(
        reqwest::Client::new(),
        Url::parse(&server.uri()).unwrap(),
    );
    let tokens = TokenManager::new(
        client.clone(),
        Identity::new("client-id", SecretString::from("client-secret".to_string())),
        Account {
            username: "me@example.com".into(),
            password: SecretString::from("hunter2".to_string()),
        },
        CredentialStore::new(dir.path().join("token.json")),
        poll_interval,
        retry,
    );
    ExporterContext::new(client, tokens, Arc::new(MetricsState::default()), poll_interval)
}

async fn mount_grant(server: &MockServer, grant_type: &str, access: &str, times: u64) {
    mount_grant_expiring(server, grant_type, access, 10800, times).await;
}

async fn mount_grant_expiring(
    server: &MockServer,
    grant_type: &str,
    access: &str,
    expires_in: u64,
    times: u64,
) {
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains(format!("grant_type={grant_type}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access,
            "refresh_token": "refresh-1",
            "expires_in": expires_in
        })))
        .expect(times)
        .mount(server)
        .await;
}

async fn mount_home_id(server: &MockServer, times: u64) {
    Mock::given(method("POST"))
        .and(path("/api/gethomedata"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "body": { "homes": [ { "id": "home-1", "name": "Home" } ] },
            "status": "ok"
        })))
        .expect(times)
        .mount(server)
        .await;
}

async fn mount_topology(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/homesdata"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "body": { "homes": [ {
                "id": "home-1",
                "name": "Home",
                "rooms": [ { "id": "r1", "name": "Living Room" } ],
                "modules": [
                    { "id": "g1", "type": "NXG", "name": "Gateway" },
                    { "id": "m1", "type": "NXO", "name": "Window A", "room_id": "r1" }
                ]
            } ] },
            "status": "ok"
        })))
        .mount(server)
        .await;
}

fn status_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "body": { "home": {
            "id": "home-1",
            "rooms": [ { "id": "r1", "temperature": 21.5 } ],
            "modules": [
                { "id": "g1", "type": "NXG", "wifi_strength": 55 },
                { "id": "m1", "type": "NXO", "current_position": 100, "battery_state": "full" }
            ]
        } },
        "status": "ok"
    }))
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

async fn wait_for_status_call(server: &MockServer, access: &str) {
    let needle = format!("access_token={access}");
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let requests = server.received_requests().await.unwrap_or_default();
            if requests.iter().any(|r| {
                r.url.path() == "/api/homestatus"
                    && String::from_utf8_lossy(&r.body).contains(&needle)
            }) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

// ── Single cycle ────────────────────────────────────────────────────

#[tokio::test]
async fn test_cycle_publishes_reconciled_tree() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_grant(&server, "password", "access-1", 1).await;
    mount_home_id(&server, 1).await;
    mount_topology(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/homestatus"))
        .and(body_string_contains("access_token=access-1"))
        .and(body_string_contains("home_id=home-1"))
        .respond_with(status_response())
        .expect(2)
        .mount(&server)
        .await;

    let mut ctx = context(&server, &dir, Duration::from_secs(60), RetryPolicy::default());

    let report = ctx.run_cycle().await.unwrap();
    assert!(report.is_clean());
    assert_eq!(ctx.home_id(), Some("home-1"));

    // Home id is bootstrapped once; the token is reused.
    ctx.run_cycle().await.unwrap();

    let snapshot = ctx.metrics().snapshot();
    assert!(snapshot.up);
    let tree = snapshot.tree.as_ref().unwrap();
    let room = tree.room("r1").unwrap();
    assert_eq!(room.name, "Living Room");
    assert_eq!(room.modules[0].name, "Window A");
    assert_eq!(tree.room("global").unwrap().modules[0].name, "Gateway");

    let text = ctx.metrics().render();
    assert!(text.contains("velux_netatmo_up 1\n"));
    assert!(text.contains(concat!(
        "velux_netatmo_module_battery_percent{id=\"m1\",name=\"Window A\",type=\"NXO\",",
        "room_id=\"r1\",room_name=\"Living Room\"} 90\n"
    )));
}

#[tokio::test]
async fn test_failed_fetch_publishes_nothing() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_grant(&server, "password", "access-1", 1).await;
    mount_home_id(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/api/homestatus"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let mut ctx = context(&server, &dir, Duration::from_secs(60), RetryPolicy::default());

    let err = ctx.run_cycle().await.unwrap_err();
    assert!(matches!(err, CoreError::Fetch { feed: "status", status: Some(502), .. }));
    assert!(!err.is_fatal());
    assert!(ctx.metrics().snapshot().tree.is_none());
}

// ── Loop ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_loop_keeps_stale_tree_on_failure() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_grant(&server, "password", "access-1", 1).await;
    mount_home_id(&server, 1).await;
    mount_topology(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/homestatus"))
        .respond_with(status_response())
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/homestatus"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut ctx = context(&server, &dir, Duration::from_millis(20), RetryPolicy::default());
    let metrics = Arc::clone(ctx.metrics());
    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { ctx.run(cancel).await }
    });

    wait_until(|| metrics.snapshot().failures_total >= 2).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    let snapshot = metrics.snapshot();
    assert!(!snapshot.up);
    assert!(snapshot.last_success.is_some());
    assert_eq!(snapshot.tree.as_ref().unwrap().room("r1").unwrap().name, "Living Room");
}

#[tokio::test]
async fn test_rejected_access_token_triggers_refresh() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_grant(&server, "password", "access-1", 1).await;
    mount_grant(&server, "refresh_token", "access-2", 1).await;
    mount_home_id(&server, 1).await;
    mount_topology(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/homestatus"))
        .and(body_string_contains("access_token=access-1"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": { "code": 3, "message": "Access token expired" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/homestatus"))
        .and(body_string_contains("access_token=access-2"))
        .respond_with(status_response())
        .mount(&server)
        .await;

    let mut ctx = context(&server, &dir, Duration::from_millis(20), RetryPolicy::default());
    let metrics = Arc::clone(ctx.metrics());
    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { ctx.run(cancel).await }
    });

    wait_until(|| metrics.snapshot().up).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(metrics.snapshot().failures_total, 1);
}

#[tokio::test]
async fn test_token_refreshed_ahead_of_expiry() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    // 2s lifetime, 50ms interval: each sleep charges 1.05s, so the third
    // cycle sees less than one interval left while the token is still live.
    mount_grant_expiring(&server, "password", "access-1", 2, 1).await;
    mount_grant(&server, "refresh_token", "access-2", 1).await;
    mount_home_id(&server, 1).await;
    mount_topology(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/homestatus"))
        .and(body_string_contains("access_token=access-1"))
        .respond_with(status_response())
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/homestatus"))
        .and(body_string_contains("access_token=access-2"))
        .respond_with(status_response())
        .expect(1..)
        .mount(&server)
        .await;

    let mut ctx = context(&server, &dir, Duration::from_millis(50), RetryPolicy::default());
    let metrics = Arc::clone(ctx.metrics());
    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { ctx.run(cancel).await }
    });

    wait_for_status_call(&server, "access-2").await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    let refresh = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .find(|r| String::from_utf8_lossy(&r.body).contains("grant_type=refresh_token"))
        .unwrap();
    assert!(String::from_utf8_lossy(&refresh.body).contains("refresh_token=refresh-1"));
    assert_eq!(metrics.snapshot().failures_total, 0);
    server.verify().await;
}

#[tokio::test]
async fn test_exhausted_auth_stops_loop() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let retry = RetryPolicy {
        max_attempts: 1,
        ..RetryPolicy::default()
    };
    let mut ctx = context(&server, &dir, Duration::from_secs(60), retry);

    let err = ctx.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, CoreError::AuthRetriesExhausted { attempts: 1, .. }));
    assert!(!ctx.metrics().snapshot().up);
}

#[tokio::test]
async fn test_cancellation_interrupts_inflight_request() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let mut ctx = context(&server, &dir, Duration::from_secs(60), RetryPolicy::default());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    tokio::time::timeout(Duration::from_secs(5), ctx.run(cancel))
        .await
        .unwrap()
        .unwrap();
}
