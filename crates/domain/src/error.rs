//! Common error types used across the workspace.
//!
//! Each adapter defines its own error enum and converts into [`BridgeError`]
//! at the port boundary.

use crate::id::DeviceId;

/// Top-level error returned by domain validation and application ports.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// An invariant would be broken by the requested operation.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// The remote side (device or hub) cannot serve the request right now.
    #[error(transparent)]
    Unavailable(#[from] UnavailableError),

    /// Failure inside an adapter (database, filesystem, transport).
    #[error("storage error")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Domain invariant violations detected on construction or update.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("code must not be empty")]
    EmptyCode,

    #[error("device ip address is missing")]
    MissingIp,

    #[error("invalid identifier {0:?}")]
    InvalidId(String),
}

/// A lookup did not match any record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} {id} not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

/// Operations rejected to keep registry and sync invariants intact.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConflictError {
    #[error("device {device_id} is already running")]
    DeviceRunning { device_id: DeviceId },

    #[error("ip {ip} is already used by device {device_id}")]
    IpInUse { ip: String, device_id: DeviceId },

    #[error("entity id {entity_id} is derived by more than one port")]
    EntityCollision { entity_id: String },

    #[error("sync already in progress")]
    SyncInProgress,
}

/// Reasons a remote peer could not serve a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnavailableError {
    #[error("device {device_id} is not connected")]
    DeviceOffline { device_id: DeviceId },

    #[error("device did not answer")]
    Unreachable,

    #[error("hub is not connected")]
    HubDisconnected,

    #[error("hub rejected the access token")]
    HubUnauthenticated,

    #[error("request {request_id} timed out")]
    Timeout { request_id: u64 },

    #[error("connection lost before a response arrived")]
    ConnectionLost,
}
