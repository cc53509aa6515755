//! Scanner port: finding controllers on the local network.

use std::future::Future;

use serde::{Deserialize, Serialize};

use portbridge_domain::device::DeviceInfo;
use portbridge_domain::error::BridgeError;

/// How to look for controllers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMethod {
    /// Try every host of the configured network on the HTTP port.
    #[default]
    Tcp,
    /// Multicast an SSDP search and query the responders.
    Ssdp,
}

/// A controller that answered `/info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    pub ip: String,
    pub info: DeviceInfo,
}

pub trait NetworkScanner: Send + Sync + 'static {
    fn scan(
        &self,
        method: ScanMethod,
    ) -> impl Future<Output = Result<Vec<DiscoveredDevice>, BridgeError>> + Send;
}
