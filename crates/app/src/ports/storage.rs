//! Storage port: durable device records and the port table.

use std::future::Future;

use portbridge_domain::device::Device;
use portbridge_domain::error::BridgeError;
use portbridge_domain::id::DeviceId;
use portbridge_domain::port::{Port, PortParams};
use portbridge_domain::time::Timestamp;

/// Repository for persisting and querying [`Device`]s.
pub trait DeviceRepository: Send + Sync + 'static {
    /// Create a new device in storage.
    fn create(&self, device: Device) -> impl Future<Output = Result<Device, BridgeError>> + Send;

    /// Get a device by its unique identifier.
    fn get_by_id(
        &self,
        id: DeviceId,
    ) -> impl Future<Output = Result<Option<Device>, BridgeError>> + Send;

    /// Find a device by its hardware code.
    fn find_by_code(
        &self,
        code: &str,
    ) -> impl Future<Output = Result<Option<Device>, BridgeError>> + Send;

    /// Get all devices.
    fn get_all(&self) -> impl Future<Output = Result<Vec<Device>, BridgeError>> + Send;

    /// Replace an existing device record.
    fn update(&self, device: Device) -> impl Future<Output = Result<Device, BridgeError>> + Send;

    /// Record connectivity without touching the rest of the record.
    fn set_status(
        &self,
        id: DeviceId,
        online: bool,
        last_seen: Timestamp,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send;

    /// Delete a device and its ports.
    fn delete(&self, id: DeviceId) -> impl Future<Output = Result<(), BridgeError>> + Send;
}

/// Repository for the per-device port table.
///
/// Ports are keyed by `(device_id, code)`.
pub trait PortRepository: Send + Sync + 'static {
    /// Insert a port or refresh its description and value.
    ///
    /// The stored [`PortParams`] of an existing port are kept: publication
    /// state belongs to the user, not to the device.
    fn upsert(&self, port: Port) -> impl Future<Output = Result<(), BridgeError>> + Send;

    /// [`upsert`](Self::upsert) every port in one transaction.
    fn upsert_many(&self, ports: Vec<Port>) -> impl Future<Output = Result<(), BridgeError>> + Send;

    fn get(
        &self,
        device_id: DeviceId,
        code: &str,
    ) -> impl Future<Output = Result<Option<Port>, BridgeError>> + Send;

    fn list_by_device(
        &self,
        device_id: DeviceId,
    ) -> impl Future<Output = Result<Vec<Port>, BridgeError>> + Send;

    /// All ports whose params say they should exist in the hub.
    fn list_published(&self) -> impl Future<Output = Result<Vec<Port>, BridgeError>> + Send;

    /// Overwrite the params of one port.
    ///
    /// Returns [`BridgeError::NotFound`] if the port does not exist.
    fn save_params(
        &self,
        device_id: DeviceId,
        code: &str,
        params: PortParams,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send;
}
