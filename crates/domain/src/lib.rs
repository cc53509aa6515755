//! # portbridge-domain
//!
//! Pure domain model for the portbridge device/hub bridge.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps
//! - Define **Devices** (network controllers) and their typed parameters
//! - Define **Ports** (addressable I/O points) and the `/values` flattening
//! - Convert values between device encodings and hub states
//! - Derive hub **entity ids** and compute the **sync plan**
//! - Backup naming/history format and scheduler deadline math
//! - Define **Events** pushed to observers
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod backup;
pub mod device;
pub mod entity;
pub mod event;
pub mod port;
pub mod schedule;
pub mod sync_plan;
pub mod value;
