//! The bridge facade: one [`BridgeControl`] over every service.
//!
//! The HTTP adapter sees only this trait; the generic parameters stay
//! confined to the binary that wires the concrete adapters in.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::broadcast;

use portbridge_domain::backup::{BackupOutcome, HistoryEntry};
use portbridge_domain::device::{Device, DeviceMeta, DevicePatch};
use portbridge_domain::error::{BridgeError, NotFoundError};
use portbridge_domain::event::{BridgeEvent, EventKind};
use portbridge_domain::id::DeviceId;
use portbridge_domain::port::Port;
use portbridge_domain::sync_plan::SyncReport;

use super::backup_service::BackupService;
use super::device_registry::DeviceRegistry;
use super::port_sync::PortSyncEngine;
use crate::event_bus::InProcessEventBus;
use crate::ports::control::{ScanResult, SyncStatus};
use crate::ports::scanner::ScanMethod;
use crate::ports::{
    BridgeControl, ConfigBackup, DeviceApi, DeviceRepository, EventPublisher, HubClient,
    HubStatus, NetworkScanner, PortRepository,
};

type Bus = Arc<InProcessEventBus>;
type Registry<A, DR, PR, H> = Arc<DeviceRegistry<A, DR, PR, H, Bus>>;

pub struct Bridge<A: DeviceApi, DR, PR, H, B, S> {
    registry: Registry<A, DR, PR, H>,
    sync: Arc<PortSyncEngine<H, DR, PR>>,
    backups: Arc<BackupService<B, DR, Registry<A, DR, PR, H>, Bus>>,
    devices: Arc<DR>,
    ports: Arc<PR>,
    scanner: S,
    events: Bus,
}

impl<A, DR, PR, H, B, S> Bridge<A, DR, PR, H, B, S>
where
    A: DeviceApi,
    DR: DeviceRepository,
    PR: PortRepository,
    H: HubClient,
    B: ConfigBackup,
    S: NetworkScanner,
{
    pub fn new(
        registry: Registry<A, DR, PR, H>,
        sync: Arc<PortSyncEngine<H, DR, PR>>,
        backups: Arc<BackupService<B, DR, Registry<A, DR, PR, H>, Bus>>,
        devices: Arc<DR>,
        ports: Arc<PR>,
        scanner: S,
        events: Bus,
    ) -> Self {
        Self {
            registry,
            sync,
            backups,
            devices,
            ports,
            scanner,
            events,
        }
    }

    /// Migrate legacy backup logs, start every stored device and load the
    /// published-port cache.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the stored devices or ports cannot be read.
    pub async fn start(&self) -> Result<(), BridgeError> {
        self.backups.migrate_all().await;
        self.registry.load_devices().await?;
        self.sync.refresh_cache().await?;
        Ok(())
    }

    /// Stop every device link and close the hub connection.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
        self.sync.hub().shutdown().await;
    }

    async fn stored(&self, id: DeviceId) -> Result<Device, BridgeError> {
        self.devices.get_by_id(id).await?.ok_or_else(|| {
            NotFoundError {
                entity: "Device",
                id: id.to_string(),
            }
            .into()
        })
    }

    async fn online(&self, id: DeviceId) -> bool {
        self.registry
            .get_client(id)
            .await
            .is_some_and(|link| link.is_online())
    }
}

impl<A, DR, PR, H, B, S> BridgeControl for Bridge<A, DR, PR, H, B, S>
where
    A: DeviceApi,
    DR: DeviceRepository,
    PR: PortRepository,
    H: HubClient,
    B: ConfigBackup,
    S: NetworkScanner,
{
    async fn list_devices(&self) -> Result<Vec<DeviceMeta>, BridgeError> {
        let mut devices = self.devices.get_all().await?;
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        let mut metas = Vec::with_capacity(devices.len());
        for device in devices {
            let online = self.online(device.id).await;
            metas.push(device.meta(online));
        }
        Ok(metas)
    }

    async fn device(&self, id: DeviceId) -> Result<DeviceMeta, BridgeError> {
        let device = self.stored(id).await?;
        Ok(device.meta(self.online(id).await))
    }

    async fn add_device_by_ip(&self, ip: String) -> Result<DeviceMeta, BridgeError> {
        self.registry.add_by_ip(&ip).await
    }

    async fn update_device(
        &self,
        id: DeviceId,
        patch: DevicePatch,
    ) -> Result<DeviceMeta, BridgeError> {
        self.registry.update_params(id, patch).await
    }

    async fn remove_device(&self, id: DeviceId) -> Result<(), BridgeError> {
        self.registry.delete_device(id).await
    }

    /// Live values from the link cache, publication params from storage.
    async fn ports(&self, id: DeviceId) -> Result<Vec<Port>, BridgeError> {
        self.stored(id).await?;
        let mut merged: BTreeMap<String, Port> = self
            .ports
            .list_by_device(id)
            .await?
            .into_iter()
            .map(|port| (port.code.clone(), port))
            .collect();
        if let Some(link) = self.registry.get_client(id).await {
            for mut live in link.get_ports_cached().await {
                if let Some(stored) = merged.get(&live.code) {
                    live.params = stored.params.clone();
                }
                merged.insert(live.code.clone(), live);
            }
        }
        Ok(merged.into_values().collect())
    }

    async fn send_command(
        &self,
        id: DeviceId,
        code: String,
        value: String,
    ) -> Result<(), BridgeError> {
        self.registry.send_command(id, &code, &value).await
    }

    async fn backup(&self, id: DeviceId, force: bool) -> Result<BackupOutcome, BridgeError> {
        self.backups.backup_device(id, force).await
    }

    async fn backup_history(&self, id: DeviceId) -> Result<Vec<HistoryEntry>, BridgeError> {
        self.backups.history(id).await
    }

    async fn set_published(
        &self,
        id: DeviceId,
        code: String,
        published: bool,
    ) -> Result<Port, BridgeError> {
        self.sync.set_published(id, &code, published).await
    }

    async fn force_sync(&self) -> Result<SyncReport, BridgeError> {
        let report = self.sync.force_sync().await?;
        if let Err(err) = self
            .events
            .publish(BridgeEvent::new(EventKind::SyncCompleted {
                report: report.clone(),
            }))
            .await
        {
            tracing::warn!(%err, "failed to publish sync report");
        }
        Ok(report)
    }

    async fn sync_status(&self) -> SyncStatus {
        let cache = self.sync.cache_status().await;
        SyncStatus {
            hub: self.sync.hub().status(),
            in_progress: self.sync.is_in_progress(),
            published_ports: cache.published_ports,
            cache_refreshed_at: cache.refreshed_at,
        }
    }

    async fn reconnect_hub(&self) -> Result<HubStatus, BridgeError> {
        let hub = self.sync.hub();
        hub.reconnect().await?;
        Ok(hub.status())
    }

    async fn scan(&self, method: ScanMethod) -> Result<Vec<ScanResult>, BridgeError> {
        let found = self.scanner.scan(method).await?;
        let managed = self.registry.managed_ips().await;
        Ok(found
            .into_iter()
            .map(|device| ScanResult {
                managed: managed.contains(&device.ip),
                ip: device.ip,
                info: device.info,
            })
            .collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }
}
