//! JSON API handler modules.

#[allow(clippy::missing_errors_doc)]
pub mod devices;
pub mod sse;
#[allow(clippy::missing_errors_doc)]
pub mod sync;

use std::str::FromStr;

use axum::Router;
use axum::routing::{get, patch, post, put};

use portbridge_app::ports::BridgeControl;
use portbridge_domain::id::DeviceId;

use crate::error::ApiError;
use crate::state::AppState;

/// Build the `/api` sub-router.
pub fn routes<C: BridgeControl>() -> Router<AppState<C>> {
    Router::new()
        // Devices
        .route("/devices", get(devices::list::<C>).post(devices::create::<C>))
        .route(
            "/devices/{id}",
            get(devices::get::<C>)
                .patch(devices::update::<C>)
                .delete(devices::delete::<C>),
        )
        .route("/devices/{id}/params", patch(devices::update_params::<C>))
        .route("/devices/{id}/ports", get(devices::ports::<C>))
        .route(
            "/devices/{id}/ports/{code}/publish",
            put(devices::publish::<C>),
        )
        .route("/devices/{id}/commands", post(devices::command::<C>))
        .route("/devices/{id}/backup", post(devices::backup::<C>))
        .route(
            "/devices/{id}/backup/history",
            get(devices::backup_history::<C>),
        )
        // Hub sync and discovery
        .route("/sync", post(sync::force::<C>))
        .route("/sync/status", get(sync::status::<C>))
        .route("/hub/reconnect", post(sync::reconnect::<C>))
        .route("/scan", post(sync::scan::<C>))
        // Events
        .route("/events/stream", get(sse::stream::<C>))
}

/// Parse a device id taken from the path.
pub(crate) fn device_id(raw: &str) -> Result<DeviceId, ApiError> {
    DeviceId::from_str(raw).map_err(|_| ApiError::invalid_id(raw))
}
