//! Bookkeeping port: the params a job records about itself.

use std::future::Future;

use portbridge_domain::device::DeviceParams;
use portbridge_domain::error::BridgeError;
use portbridge_domain::id::DeviceId;

/// Writes job bookkeeping (last backup, exported logs) into a device's
/// params, serialised with every other edit of the same device.
pub trait DeviceBookkeeping: Send + Sync + 'static {
    /// Apply `record` to the stored params of `id` and to its live copy.
    fn record<F>(
        &self,
        id: DeviceId,
        record: F,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send
    where
        F: FnOnce(&mut DeviceParams) + Send + 'static;
}

impl<T: DeviceBookkeeping> DeviceBookkeeping for std::sync::Arc<T> {
    fn record<F>(
        &self,
        id: DeviceId,
        record: F,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send
    where
        F: FnOnce(&mut DeviceParams) + Send + 'static,
    {
        (**self).record(id, record)
    }
}
