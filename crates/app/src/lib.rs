//! # portbridge-app
//!
//! Application layer: use-cases and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **driven ports** that adapters implement:
//!   - `DeviceRepository` / `PortRepository`: durable device and port state
//!   - `DeviceApi`: HTTP + streaming access to one controller
//!   - `HubClient`: the home-automation hub connection
//!   - `ConfigBackup`: snapshot and log storage
//!   - `NetworkScanner`: discovery of controllers on the LAN
//!   - `EventPublisher`: fan-out of [`BridgeEvent`](portbridge_domain::event::BridgeEvent)s
//! - Define the **driving port** `BridgeControl` used by the HTTP adapter
//! - Run the long-lived workers: one `DeviceLink` per controller, the
//!   `DeviceRegistry` event loop, the `HubEventRouter` and the `Scheduler`
//!
//! ## Dependency rule
//! Depends on `portbridge-domain` only (plus tokio for tasks and channels).
//! Never imports adapter crates.

pub mod event_bus;
pub mod ports;
pub mod services;
