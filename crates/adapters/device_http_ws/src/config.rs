//! Device transport and discovery configuration.

use std::time::Duration;

use serde::Deserialize;

use portbridge_app::services::device_link::LinkSettings;

use crate::stream::Keepalive;

/// How to reach the controllers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Bound on every HTTP request and on the stream handshake, in seconds.
    pub http_timeout_secs: u64,
    /// Port of the `code#value` WebSocket.
    pub stream_port: u16,
    /// Pause between two connection attempts of a link, in seconds.
    pub reconnect_delay_secs: u64,
    /// How long a stopping link may take before it is aborted, in seconds.
    pub stop_timeout_secs: u64,
    /// Pause between two pings on the stream, in seconds.
    pub ping_interval_secs: u64,
    /// Silence tolerated after a ping before the stream is dropped, in seconds.
    pub ping_timeout_secs: u64,
}

impl DeviceConfig {
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    #[must_use]
    pub fn keepalive(&self) -> Keepalive {
        Keepalive {
            interval: Duration::from_secs(self.ping_interval_secs),
            timeout: Duration::from_secs(self.ping_timeout_secs),
        }
    }

    /// Timing of the per-device links driven over this transport.
    #[must_use]
    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: 5,
            stream_port: 81,
            reconnect_delay_secs: 5,
            stop_timeout_secs: 2,
            ping_interval_secs: 20,
            ping_timeout_secs: 10,
        }
    }
}

/// Where and how to look for unmanaged controllers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// IPv4 network in CIDR notation, `/16` or narrower.
    pub network: String,
    pub scan_port: u16,
    pub connect_timeout_secs: u64,
    /// Connection attempts and `/info` requests in flight at once.
    pub concurrency: usize,
    pub ssdp_search_target: String,
    /// How long to collect SSDP answers, in seconds.
    pub ssdp_wait_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            network: "192.168.1.0/24".to_string(),
            scan_port: 80,
            connect_timeout_secs: 2,
            concurrency: 10,
            ssdp_search_target: "upnp:MHOME".to_string(),
            ssdp_wait_secs: 3,
        }
    }
}
