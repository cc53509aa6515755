//! End-to-end smoke tests for the full portbridged stack.
//!
//! Each test spins up the complete application (in-memory `SQLite`, real repos,
//! real services, real adapters, real axum router) and exercises the HTTP layer
//! via `tower::ServiceExt::oneshot`. The hub is disabled and controllers are
//! served by wiremock.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use portbridge_adapter_backup_fs::{BackupConfig, FsBackupManager};
use portbridge_adapter_device_http_ws::{DeviceConfig, HttpWsDeviceApi, LanScanner, ScanConfig};
use portbridge_adapter_http_axum::router;
use portbridge_adapter_http_axum::state::AppState;
use portbridge_adapter_hub_ws::{HubConfig, HubConnector};
use portbridge_adapter_storage_sqlite_sqlx::{
    Config, SqliteDeviceRepository, SqlitePortRepository,
};
use portbridge_app::event_bus::InProcessEventBus;
use portbridge_app::services::backup_service::BackupService;
use portbridge_app::services::bridge::Bridge;
use portbridge_app::services::device_registry::DeviceRegistry;
use portbridge_app::services::port_sync::PortSyncEngine;
use portbridge_domain::entity::EntityNamespace;

/// A fully-wired router plus the directory its backups land in.
struct TestApp {
    router: axum::Router,
    _store: TempDir,
}

/// Build a fully-wired router backed by an in-memory `SQLite` database.
async fn app() -> TestApp {
    let db = Config {
        database_url: "sqlite::memory:".to_string(),
    }
    .build()
    .await
    .expect("in-memory database should initialise");

    let devices = Arc::new(SqliteDeviceRepository::new(db.pool().clone()));
    let ports = Arc::new(SqlitePortRepository::new(db.pool().clone()));
    let events = Arc::new(InProcessEventBus::new(256));

    let device_config = DeviceConfig {
        http_timeout_secs: 1,
        reconnect_delay_secs: 60,
        ..DeviceConfig::default()
    };
    let api = Arc::new(HttpWsDeviceApi::new(device_config.clone()).unwrap());
    let (hub_tx, _hub_rx) = mpsc::unbounded_channel();
    let hub = Arc::new(
        HubConnector::new(
            HubConfig {
                enabled: false,
                ..HubConfig::default()
            },
            hub_tx,
        )
        .unwrap(),
    );

    let store = tempfile::tempdir().unwrap();
    let backup_config = BackupConfig {
        root_dir: store.path().join("backup"),
        logs_dir: store.path().join("logs"),
        ..BackupConfig::default()
    };

    let sync = Arc::new(PortSyncEngine::new(
        hub,
        Arc::clone(&devices),
        Arc::clone(&ports),
        EntityNamespace::new("myhome"),
    ));
    let registry = Arc::new(DeviceRegistry::new(
        Arc::clone(&api),
        Arc::clone(&devices),
        Arc::clone(&ports),
        Arc::clone(&sync),
        Arc::clone(&events),
        device_config.link_settings(),
    ));
    let backups = Arc::new(BackupService::new(
        FsBackupManager::new(api, backup_config),
        Arc::clone(&devices),
        Arc::clone(&registry),
        Arc::clone(&events),
    ));
    let bridge = Bridge::new(
        registry,
        sync,
        backups,
        devices,
        ports,
        LanScanner::new(ScanConfig::default()).unwrap(),
        events,
    );
    bridge.start().await.unwrap();

    TestApp {
        router: router::build(AppState::new(bridge)),
        _store: store,
    }
}

async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> axum::response::Response {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.router.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// A controller answering `/info` and `/values`.
async fn controller() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "chip_id": 10_485_760,
            "name": "Kitchen controller",
            "config_name": "MHOME-8R",
            "version": "1.4.2"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/values"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"code": "t1", "title": "Temperature", "type": "in.analog", "val": 21.5, "unit": "°C"},
            {"title": "Relays", "data": [
                {"code": "r1", "type": "out.switch", "val": "0"}
            ]}
        ])))
        .mount(&server)
        .await;
    server
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_return_ok_when_health_check_called() {
    let app = app().await;

    let resp = send(&app, "GET", "/health", None).await;

    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"OK");
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_list_no_devices_when_database_is_empty() {
    let app = app().await;

    let resp = send(&app, "GET", "/api/devices", None).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await, json!([]));
}

#[tokio::test]
async fn should_add_device_by_ip_and_expose_its_ports() {
    let app = app().await;
    let server = controller().await;
    let ip = server.address().to_string();

    let resp = send(&app, "POST", "/api/devices", Some(json!({"ip": ip}))).await;

    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = json_body(resp).await;
    assert_eq!(created["code"], "10485760");
    assert_eq!(created["name"], "Kitchen controller");
    assert_eq!(created["model"], "MHOME-8R");
    assert_eq!(created["ip"], ip);

    let resp = send(&app, "GET", "/api/devices", None).await;
    let listed = json_body(resp).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    // the link bootstraps its ports in the background
    let uri = format!("/api/devices/{}/ports", created["device_id"].as_str().unwrap());
    let mut codes = Vec::new();
    for _ in 0..50 {
        let resp = send(&app, "GET", &uri, None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        codes = json_body(resp)
            .await
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|port| port["code"].as_str().map(str::to_string))
            .collect();
        if !codes.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(codes.contains(&"t1".to_string()));
    assert!(codes.contains(&"r1".to_string()));
}

#[tokio::test]
async fn should_reject_second_device_on_same_ip() {
    let app = app().await;
    let server = controller().await;
    let ip = server.address().to_string();
    send(&app, "POST", "/api/devices", Some(json!({"ip": ip}))).await;

    let resp = send(&app, "POST", "/api/devices", Some(json!({"ip": ip}))).await;

    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let resp = send(&app, "GET", "/api/devices", None).await;
    assert_eq!(json_body(resp).await.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn should_report_unreachable_controller_as_unavailable() {
    let app = app().await;

    let resp = send(&app, "POST", "/api/devices", Some(json!({"ip": "127.0.0.1:1"}))).await;

    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn should_return_404_for_unknown_device() {
    let app = app().await;

    let resp = send(
        &app,
        "GET",
        "/api/devices/00000000-0000-0000-0000-000000000000",
        None,
    )
    .await;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn should_return_400_for_malformed_device_id() {
    let app = app().await;

    let resp = send(&app, "DELETE", "/api/devices/kitchen", None).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Hub sync
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_report_disconnected_hub_in_sync_status() {
    let app = app().await;

    let resp = send(&app, "GET", "/api/sync/status", None).await;

    assert_eq!(resp.status(), StatusCode::OK);
    let status = json_body(resp).await;
    assert_eq!(status["hub"]["connected"], false);
    assert_eq!(status["in_progress"], false);
    assert_eq!(status["published_ports"], 0);
}

#[tokio::test]
async fn should_refuse_force_sync_when_hub_is_disabled() {
    let app = app().await;

    let resp = send(&app, "POST", "/api/sync", None).await;

    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn should_refuse_hub_reconnect_when_hub_is_disabled() {
    let app = app().await;

    let resp = send(&app, "POST", "/api/hub/reconnect", None).await;

    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}
