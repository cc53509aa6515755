//! # portbridge-adapter-backup-fs
//!
//! Local filesystem implementation of
//! [`ConfigBackup`](portbridge_app::ports::ConfigBackup).
//!
//! ## Layout
//! ```text
//! {root}/{device_id}/backup.log             append-only history
//! {root}/{device_id}/2024-03-09_07-05-03/   one snapshot per change
//! {logs_dir}/{file}.txt                     exported device logs
//! ```
//!
//! Snapshots are written into a `.tmp` directory and renamed into place, so
//! an aborted run leaves neither a snapshot nor a history line behind.

pub mod config;
pub mod error;
pub mod manager;

pub use config::BackupConfig;
pub use error::BackupError;
pub use manager::FsBackupManager;
