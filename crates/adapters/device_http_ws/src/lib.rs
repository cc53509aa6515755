//! # portbridge-adapter-device-http-ws
//!
//! Talks to the controllers on the local network.
//!
//! ## Responsibilities
//! - Implement [`DeviceApi`](portbridge_app::ports::DeviceApi) over the
//!   controller's HTTP surface (`/values`, `/info`, `/list`, `/edit`, raw files)
//! - Open the `code#value` line stream over a WebSocket
//! - Implement [`NetworkScanner`](portbridge_app::ports::NetworkScanner) with
//!   a TCP sweep or an SSDP search, confirmed through `/info`
//!
//! ## Dependency rule
//! Depends on `portbridge-app` (for port traits) and `portbridge-domain`.

pub mod api;
pub mod config;
pub mod error;
pub mod scan;
pub mod stream;

pub use api::HttpWsDeviceApi;
pub use config::{DeviceConfig, ScanConfig};
pub use error::DeviceError;
pub use scan::LanScanner;
