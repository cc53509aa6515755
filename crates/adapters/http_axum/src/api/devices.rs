//! JSON handlers for devices, their ports and backups.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use portbridge_app::ports::BridgeControl;
use portbridge_domain::backup::{BackupOutcome, HistoryEntry};
use portbridge_domain::device::{DeviceMeta, DeviceParamsPatch, DevicePatch};
use portbridge_domain::port::Port;

use super::device_id;
use crate::error::ApiError;
use crate::state::AppState;

/// Request body for adding a device.
#[derive(Deserialize)]
pub struct CreateDeviceRequest {
    pub ip: String,
}

/// Request body for writing a port value.
#[derive(Deserialize)]
pub struct CommandRequest {
    pub code: String,
    pub value: String,
}

#[derive(Deserialize)]
pub struct PublishRequest {
    pub published: bool,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct BackupQuery {
    /// Download every file under the config dir instead of the top level.
    pub force: bool,
}

/// Possible responses from the create endpoint.
pub enum CreateResponse {
    Created(Json<DeviceMeta>),
}

impl IntoResponse for CreateResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Created(json) => (StatusCode::CREATED, json).into_response(),
        }
    }
}

/// Responses without a body.
pub enum EmptyResponse {
    NoContent,
    Accepted,
}

impl IntoResponse for EmptyResponse {
    fn into_response(self) -> Response {
        match self {
            Self::NoContent => StatusCode::NO_CONTENT.into_response(),
            Self::Accepted => StatusCode::ACCEPTED.into_response(),
        }
    }
}

/// `GET /api/devices`
pub async fn list<C: BridgeControl>(
    State(state): State<AppState<C>>,
) -> Result<Json<Vec<DeviceMeta>>, ApiError> {
    Ok(Json(state.control.list_devices().await?))
}

/// `POST /api/devices`: identify the controller at `ip` and manage it.
pub async fn create<C: BridgeControl>(
    State(state): State<AppState<C>>,
    Json(req): Json<CreateDeviceRequest>,
) -> Result<CreateResponse, ApiError> {
    let device = state.control.add_device_by_ip(req.ip).await?;
    tracing::info!(device_id = %device.device_id, ip = %device.ip, "device added");
    Ok(CreateResponse::Created(Json(device)))
}

/// `GET /api/devices/{id}`
pub async fn get<C: BridgeControl>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
) -> Result<Json<DeviceMeta>, ApiError> {
    let device = state.control.device(device_id(&id)?).await?;
    Ok(Json(device))
}

/// `PATCH /api/devices/{id}`
pub async fn update<C: BridgeControl>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
    Json(patch): Json<DevicePatch>,
) -> Result<Json<DeviceMeta>, ApiError> {
    let device = state.control.update_device(device_id(&id)?, patch).await?;
    Ok(Json(device))
}

/// `PATCH /api/devices/{id}/params`
pub async fn update_params<C: BridgeControl>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
    Json(params): Json<DeviceParamsPatch>,
) -> Result<Json<DeviceMeta>, ApiError> {
    let patch = DevicePatch {
        params: Some(params),
        ..DevicePatch::default()
    };
    let device = state.control.update_device(device_id(&id)?, patch).await?;
    Ok(Json(device))
}

/// `DELETE /api/devices/{id}`
pub async fn delete<C: BridgeControl>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
) -> Result<EmptyResponse, ApiError> {
    state.control.remove_device(device_id(&id)?).await?;
    Ok(EmptyResponse::NoContent)
}

/// `GET /api/devices/{id}/ports`
pub async fn ports<C: BridgeControl>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Port>>, ApiError> {
    Ok(Json(state.control.ports(device_id(&id)?).await?))
}

/// `PUT /api/devices/{id}/ports/{code}/publish`
pub async fn publish<C: BridgeControl>(
    State(state): State<AppState<C>>,
    Path((id, code)): Path<(String, String)>,
    Json(req): Json<PublishRequest>,
) -> Result<Json<Port>, ApiError> {
    let port = state
        .control
        .set_published(device_id(&id)?, code, req.published)
        .await?;
    Ok(Json(port))
}

/// `POST /api/devices/{id}/commands`
pub async fn command<C: BridgeControl>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
    Json(req): Json<CommandRequest>,
) -> Result<EmptyResponse, ApiError> {
    state
        .control
        .send_command(device_id(&id)?, req.code, req.value)
        .await?;
    Ok(EmptyResponse::Accepted)
}

/// `POST /api/devices/{id}/backup?force=true`
pub async fn backup<C: BridgeControl>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
    Query(query): Query<BackupQuery>,
) -> Result<Json<BackupOutcome>, ApiError> {
    let outcome = state.control.backup(device_id(&id)?, query.force).await?;
    Ok(Json(outcome))
}

/// `GET /api/devices/{id}/backup/history`
pub async fn backup_history<C: BridgeControl>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    Ok(Json(state.control.backup_history(device_id(&id)?).await?))
}
