//! # portbridge-adapter-storage-sqlite-sqlx
//!
//! `SQLite` persistence adapter using [sqlx](https://docs.rs/sqlx).
//!
//! ## Responsibilities
//! - Implement the repository port traits defined in `portbridge-app::ports::storage`
//! - Manage `SQLite` connection pool lifecycle
//! - Run database migrations (using sqlx embedded migrations)
//! - Map between domain types and database rows
//!
//! Structured settings (device params, port params, unknown item keys) are
//! stored as JSON text so that keys this version does not know survive a
//! round trip.
//!
//! ## Dependency rule
//! Depends on `portbridge-app` (for port traits) and `portbridge-domain` (for domain types).
//! The `app` and `domain` crates must never reference this adapter.

pub mod device_repo;
pub mod error;
pub mod pool;
pub mod port_repo;

pub use device_repo::SqliteDeviceRepository;
pub use error::StorageError;
pub use pool::{Config, Database};
pub use port_repo::SqlitePortRepository;
