//! Backup service: runs [`ConfigBackup`] jobs and keeps the device's
//! bookkeeping params (last backup, files, last export) up to date.
//!
//! Bookkeeping goes through [`DeviceBookkeeping`] so it is serialised with
//! user edits of the same device.

use std::sync::Arc;

use portbridge_domain::backup::{BackupOutcome, HistoryEntry, LogsExportOutcome};
use portbridge_domain::device::{Device, LogsMethod};
use portbridge_domain::error::{BridgeError, NotFoundError};
use portbridge_domain::event::{BridgeEvent, EventKind};
use portbridge_domain::id::DeviceId;
use portbridge_domain::time::now;

use crate::ports::{ConfigBackup, DeviceBookkeeping, DeviceRepository, EventPublisher};

pub struct BackupService<B, DR, R, E> {
    backup: B,
    devices: Arc<DR>,
    records: R,
    events: E,
}

impl<B, DR, R, E> BackupService<B, DR, R, E>
where
    B: ConfigBackup,
    DR: DeviceRepository,
    R: DeviceBookkeeping,
    E: EventPublisher,
{
    pub fn new(backup: B, devices: Arc<DR>, records: R, events: E) -> Self {
        Self {
            backup,
            devices,
            records,
            events,
        }
    }

    async fn device(&self, id: DeviceId) -> Result<Device, BridgeError> {
        self.devices.get_by_id(id).await?.ok_or_else(|| {
            NotFoundError {
                entity: "Device",
                id: id.to_string(),
            }
            .into()
        })
    }

    async fn publish(&self, kind: EventKind) {
        if let Err(err) = self.events.publish(BridgeEvent::new(kind)).await {
            tracing::warn!(%err, "failed to publish bridge event");
        }
    }

    /// Back up one device's configuration.
    ///
    /// An incremental run only writes a snapshot when a file changed; a
    /// forced run always does.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotFound`] for an unknown device, or the
    /// backup store's error.
    #[tracing::instrument(skip(self))]
    pub async fn backup_device(
        &self,
        id: DeviceId,
        force: bool,
    ) -> Result<BackupOutcome, BridgeError> {
        let device = self.device(id).await?;
        let outcome = if force {
            self.backup.run_forced_backup(&device).await?
        } else {
            self.backup.run_incremental_backup(&device).await?
        };

        let at = now();
        let changed = outcome.changed.then(|| outcome.files.clone());
        self.records
            .record(id, move |params| {
                params.last_backup_check = Some(at);
                if let Some(files) = changed {
                    params.last_backup_time = Some(at);
                    params.last_backup_files_count = Some(files.len());
                    params.uploaded_files = files;
                }
            })
            .await?;

        tracing::info!(
            changed = outcome.changed,
            snapshot = outcome.snapshot.as_deref(),
            files = outcome.files.len(),
            "backup finished"
        );
        self.publish(EventKind::BackupCompleted {
            device_id: id,
            outcome: outcome.clone(),
        })
        .await;
        Ok(outcome)
    }

    /// Export one device's log files.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotFound`] for an unknown device, or the
    /// backup store's error.
    #[tracing::instrument(skip(self))]
    pub async fn export_logs(&self, id: DeviceId) -> Result<LogsExportOutcome, BridgeError> {
        let device = self.device(id).await?;
        let outcome = self.backup.export_logs(&device).await?;

        let (at, count) = (now(), outcome.exported.len());
        self.records
            .record(id, move |params| {
                params.last_logs_export = Some(at);
                params.last_logs_export_count = Some(count);
            })
            .await?;

        tracing::info!(
            exported = outcome.exported.len(),
            failed = outcome.failed.len(),
            "logs exported"
        );
        self.publish(EventKind::LogsExported {
            device_id: id,
            outcome: outcome.clone(),
        })
        .await;
        Ok(outcome)
    }

    /// # Errors
    ///
    /// Returns [`BridgeError::NotFound`] for an unknown device, or the
    /// backup store's error.
    pub async fn history(&self, id: DeviceId) -> Result<Vec<HistoryEntry>, BridgeError> {
        self.device(id).await?;
        self.backup.history(id).await
    }

    /// Convert every device's legacy backup log. Failures are logged.
    pub async fn migrate_all(&self) -> usize {
        let devices = match self.devices.get_all().await {
            Ok(devices) => devices,
            Err(err) => {
                tracing::warn!(%err, "cannot list devices for log migration");
                return 0;
            }
        };
        let mut migrated = 0;
        for device in devices {
            match self.backup.migrate_legacy(device.id).await {
                Ok(true) => migrated += 1,
                Ok(false) => {}
                Err(err) => tracing::warn!(device_id = %device.id, %err, "legacy log migration failed"),
            }
        }
        if migrated > 0 {
            tracing::info!(migrated, "legacy backup logs migrated");
        }
        migrated
    }

    /// Incremental backup of every device with `backup_config` set.
    ///
    /// Returns how many backups succeeded.
    pub async fn run_scheduled_backups(&self) -> usize {
        let devices = match self.devices.get_all().await {
            Ok(devices) => devices,
            Err(err) => {
                tracing::warn!(%err, "cannot list devices for scheduled backup");
                return 0;
            }
        };
        let mut done = 0;
        for device in devices.iter().filter(|device| device.params.backup_config) {
            match self.backup_device(device.id, false).await {
                Ok(_) => done += 1,
                Err(err) => tracing::warn!(device_id = %device.id, %err, "scheduled backup failed"),
            }
        }
        done
    }

    /// Log export of every device with `save_logs` set.
    ///
    /// Returns how many exports succeeded.
    pub async fn run_scheduled_log_exports(&self) -> usize {
        let devices = match self.devices.get_all().await {
            Ok(devices) => devices,
            Err(err) => {
                tracing::warn!(%err, "cannot list devices for log export");
                return 0;
            }
        };
        let mut done = 0;
        for device in devices.iter().filter(|device| device.params.save_logs) {
            if device.params.logs_method != LogsMethod::LocalSave {
                tracing::warn!(device_id = %device.id, "unsupported logs method, skipping");
                continue;
            }
            match self.export_logs(device.id).await {
                Ok(_) => done += 1,
                Err(err) => tracing::warn!(device_id = %device.id, %err, "scheduled log export failed"),
            }
        }
        done
    }
}
