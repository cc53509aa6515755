//! Application services: use-case implementations and long-lived workers.
//!
//! Each service struct accepts port trait implementations via generic parameters
//! (constructor injection), keeping this layer decoupled from concrete adapters.

pub mod backup_service;
pub mod bridge;
pub mod device_link;
pub mod device_registry;
pub mod hub_router;
pub mod port_sync;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;
