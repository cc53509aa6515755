//! # portbridge-adapter-http-axum
//!
//! HTTP adapter built on [axum](https://docs.rs/axum).
//!
//! ## Responsibilities
//! - Serve a **JSON API** for managing devices, port publication,
//!   backups, hub sync and network scans (`/api/...`)
//! - Stream bridge events to browsers as **server-sent events**
//!   (`/api/events/stream`)
//! - Map HTTP requests into [`BridgeControl`](portbridge_app::ports::BridgeControl)
//!   calls and their results into JSON responses
//!
//! ## Dependency rule
//! Depends on `portbridge-app` (for the driving port) and `portbridge-domain`
//! (for domain types used in request/response mapping). Never leaks axum types
//! into the domain.

pub mod api;
pub mod error;
pub mod router;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;
