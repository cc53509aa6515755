//! Backup port: configuration snapshots and log exports on durable storage.

use std::future::Future;

use portbridge_domain::backup::{BackupOutcome, HistoryEntry, LogsExportOutcome};
use portbridge_domain::device::Device;
use portbridge_domain::error::BridgeError;
use portbridge_domain::id::DeviceId;

/// Snapshot store for device configuration files.
pub trait ConfigBackup: Send + Sync + 'static {
    /// Fetch the device's config files and write a snapshot only if any
    /// file differs from the latest one.
    fn run_incremental_backup(
        &self,
        device: &Device,
    ) -> impl Future<Output = Result<BackupOutcome, BridgeError>> + Send;

    /// Fetch every remote file and always write a snapshot.
    fn run_forced_backup(
        &self,
        device: &Device,
    ) -> impl Future<Output = Result<BackupOutcome, BridgeError>> + Send;

    /// Copy the device's log files to local storage.
    fn export_logs(
        &self,
        device: &Device,
    ) -> impl Future<Output = Result<LogsExportOutcome, BridgeError>> + Send;

    /// Backup history, oldest first.
    fn history(
        &self,
        device_id: DeviceId,
    ) -> impl Future<Output = Result<Vec<HistoryEntry>, BridgeError>> + Send;

    /// Convert a legacy structured log into the line format.
    ///
    /// Returns `true` when a conversion happened.
    fn migrate_legacy(
        &self,
        device_id: DeviceId,
    ) -> impl Future<Output = Result<bool, BridgeError>> + Send;
}

impl<T: ConfigBackup> ConfigBackup for std::sync::Arc<T> {
    fn run_incremental_backup(
        &self,
        device: &Device,
    ) -> impl Future<Output = Result<BackupOutcome, BridgeError>> + Send {
        (**self).run_incremental_backup(device)
    }

    fn run_forced_backup(
        &self,
        device: &Device,
    ) -> impl Future<Output = Result<BackupOutcome, BridgeError>> + Send {
        (**self).run_forced_backup(device)
    }

    fn export_logs(
        &self,
        device: &Device,
    ) -> impl Future<Output = Result<LogsExportOutcome, BridgeError>> + Send {
        (**self).export_logs(device)
    }

    fn history(
        &self,
        device_id: DeviceId,
    ) -> impl Future<Output = Result<Vec<HistoryEntry>, BridgeError>> + Send {
        (**self).history(device_id)
    }

    fn migrate_legacy(
        &self,
        device_id: DeviceId,
    ) -> impl Future<Output = Result<bool, BridgeError>> + Send {
        (**self).migrate_legacy(device_id)
    }
}
