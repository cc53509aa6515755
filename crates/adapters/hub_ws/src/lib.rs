//! # portbridge-adapter-hub-ws
//!
//! [`HubClient`](portbridge_app::ports::HubClient) over the hub's WebSocket
//! API, with the REST API for state writes and as a fallback.
//!
//! ## Responsibilities
//! - Handshake (`auth_required` → `auth` → `auth_ok`/`auth_invalid`); a
//!   rejected token leaves the connector up in a degraded mode
//! - Correlate requests and `result` frames by a strictly increasing id,
//!   with a bounded wait per request
//! - Forward `state_changed` and `call_service` events, plus connection
//!   changes, as [`HubEvent`](portbridge_app::ports::HubEvent)s
//! - Reconnect at a fixed interval up to a bounded number of attempts
//!
//! ## Dependency rule
//! Depends on `portbridge-app` (for port traits) and `portbridge-domain`.

pub mod config;
pub mod connector;
pub mod error;
mod pending;
mod protocol;

pub use config::HubConfig;
pub use connector::HubConnector;
pub use error::HubError;
