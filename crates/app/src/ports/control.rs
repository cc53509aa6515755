//! Driving port: what the outer surfaces (HTTP API) may ask of the bridge.

use std::future::Future;

use serde::Serialize;
use tokio::sync::broadcast;

use portbridge_domain::backup::{BackupOutcome, HistoryEntry};
use portbridge_domain::device::{DeviceInfo, DeviceMeta, DevicePatch};
use portbridge_domain::error::BridgeError;
use portbridge_domain::event::BridgeEvent;
use portbridge_domain::id::DeviceId;
use portbridge_domain::port::Port;
use portbridge_domain::sync_plan::SyncReport;
use portbridge_domain::time::Timestamp;

use super::hub::HubStatus;
use super::scanner::ScanMethod;

/// Hub synchronisation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub hub: HubStatus,
    pub in_progress: bool,
    pub published_ports: usize,
    pub cache_refreshed_at: Option<Timestamp>,
}

/// A scan hit, flagged when the bridge already manages that address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub ip: String,
    pub info: DeviceInfo,
    pub managed: bool,
}

pub trait BridgeControl: Send + Sync + 'static {
    fn list_devices(&self) -> impl Future<Output = Result<Vec<DeviceMeta>, BridgeError>> + Send;

    fn device(&self, id: DeviceId) -> impl Future<Output = Result<DeviceMeta, BridgeError>> + Send;

    /// Identify the controller at `ip`, persist it and start its link.
    fn add_device_by_ip(
        &self,
        ip: String,
    ) -> impl Future<Output = Result<DeviceMeta, BridgeError>> + Send;

    fn update_device(
        &self,
        id: DeviceId,
        patch: DevicePatch,
    ) -> impl Future<Output = Result<DeviceMeta, BridgeError>> + Send;

    fn remove_device(&self, id: DeviceId) -> impl Future<Output = Result<(), BridgeError>> + Send;

    /// Current port table with publication params.
    fn ports(&self, id: DeviceId) -> impl Future<Output = Result<Vec<Port>, BridgeError>> + Send;

    /// Write a raw value to a device port.
    fn send_command(
        &self,
        id: DeviceId,
        code: String,
        value: String,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send;

    fn backup(
        &self,
        id: DeviceId,
        force: bool,
    ) -> impl Future<Output = Result<BackupOutcome, BridgeError>> + Send;

    fn backup_history(
        &self,
        id: DeviceId,
    ) -> impl Future<Output = Result<Vec<HistoryEntry>, BridgeError>> + Send;

    fn set_published(
        &self,
        id: DeviceId,
        code: String,
        published: bool,
    ) -> impl Future<Output = Result<Port, BridgeError>> + Send;

    fn force_sync(&self) -> impl Future<Output = Result<SyncReport, BridgeError>> + Send;

    fn sync_status(&self) -> impl Future<Output = SyncStatus> + Send;

    /// Restart the hub connection, also after it gave up retrying.
    fn reconnect_hub(&self) -> impl Future<Output = Result<HubStatus, BridgeError>> + Send;

    fn scan(
        &self,
        method: ScanMethod,
    ) -> impl Future<Output = Result<Vec<ScanResult>, BridgeError>> + Send;

    /// Receive every event published after this call.
    fn subscribe(&self) -> broadcast::Receiver<BridgeEvent>;
}
