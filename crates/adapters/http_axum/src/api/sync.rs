//! Hub synchronisation and network discovery.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use portbridge_app::ports::{BridgeControl, HubStatus};
use portbridge_app::ports::control::{ScanResult, SyncStatus};
use portbridge_app::ports::scanner::ScanMethod;
use portbridge_domain::sync_plan::SyncReport;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct ScanQuery {
    pub method: ScanMethod,
}

/// `POST /api/sync`: reconcile the hub with the published ports now.
pub async fn force<C: BridgeControl>(
    State(state): State<AppState<C>>,
) -> Result<Json<SyncReport>, ApiError> {
    let report = state.control.force_sync().await?;
    Ok(Json(report))
}

/// `GET /api/sync/status`
pub async fn status<C: BridgeControl>(State(state): State<AppState<C>>) -> Json<SyncStatus> {
    Json(state.control.sync_status().await)
}

/// `POST /api/hub/reconnect`: restart the hub connection.
///
/// Answers before the new connection is up; the body is the status at
/// that moment.
pub async fn reconnect<C: BridgeControl>(
    State(state): State<AppState<C>>,
) -> Result<(StatusCode, Json<HubStatus>), ApiError> {
    let status = state.control.reconnect_hub().await?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

/// `POST /api/scan?method=tcp|ssdp`
pub async fn scan<C: BridgeControl>(
    State(state): State<AppState<C>>,
    Query(query): Query<ScanQuery>,
) -> Result<Json<Vec<ScanResult>>, ApiError> {
    let found = state.control.scan(query.method).await?;
    tracing::info!(method = ?query.method, found = found.len(), "scan finished");
    Ok(Json(found))
}

#[cfg(test)]
mod tests {
    use crate::router::build;
    use crate::state::AppState;
    use crate::testing::{StubControl, json_body, request};
    use axum::http::StatusCode;
    use tower::ServiceExt;

    #[tokio::test]
    async fn should_return_sync_report() {
        let app = build(AppState::new(StubControl::default()));

        let response = app.oneshot(request("POST", "/api/sync", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["created"], 1);
    }

    #[tokio::test]
    async fn should_reject_sync_while_hub_is_down() {
        let control = StubControl::default();
        control.set_offline();
        let app = build(AppState::new(control));

        let response = app.oneshot(request("POST", "/api/sync", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn should_report_sync_status() {
        let app = build(AppState::new(StubControl::default()));

        let response = app
            .oneshot(request("GET", "/api/sync/status", None))
            .await
            .unwrap();

        let body = json_body(response).await;
        assert_eq!(body["hub"]["connected"], true);
        assert_eq!(body["in_progress"], false);
    }

    #[tokio::test]
    async fn should_accept_hub_reconnect_request() {
        let control = StubControl::default();
        control.set_offline();
        let app = build(AppState::new(control));

        let response = app
            .oneshot(request("POST", "/api/hub/reconnect", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(json_body(response).await["connected"], true);
    }

    #[tokio::test]
    async fn should_pass_scan_method_through() {
        let app = build(AppState::new(StubControl::default()));

        let response = app
            .oneshot(request("POST", "/api/scan?method=ssdp", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body[0]["ip"], "192.168.1.20");
        assert_eq!(body[0]["info"]["name"], "ssdp");
    }

    #[tokio::test]
    async fn should_reject_unknown_scan_method() {
        let app = build(AppState::new(StubControl::default()));

        let response = app
            .oneshot(request("POST", "/api/scan?method=carrier-pigeon", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
