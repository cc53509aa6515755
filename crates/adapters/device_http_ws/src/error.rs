//! Device adapter error types.

use portbridge_domain::error::{BridgeError, UnavailableError};

/// Errors specific to the device transport.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The HTTP request failed or returned an error status.
    #[error("device http request failed")]
    Http(#[from] reqwest::Error),

    /// The line stream failed.
    #[error("device stream failed")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A device document was not the expected JSON.
    #[error("malformed device response")]
    Json(#[from] serde_json::Error),

    /// The device answered `/info` with an error document.
    #[error("device reported an error")]
    Reported,

    /// The stream handshake did not finish in time.
    #[error("device stream handshake timed out")]
    Timeout,

    /// Nothing arrived on the stream, not even a pong, for too long.
    #[error("device stream went silent")]
    Silent,

    /// The scan network is not a usable IPv4 CIDR.
    #[error("invalid scan network {network:?}")]
    InvalidNetwork { network: String },

    /// A socket used by the scan failed.
    #[error("network io failed")]
    Io(#[from] std::io::Error),
}

impl DeviceError {
    /// Convert for propagation across port boundaries.
    ///
    /// Transport failures become [`UnavailableError::Unreachable`]; the rest
    /// is wrapped in [`BridgeError::Storage`].
    pub fn into_domain(self) -> BridgeError {
        let unreachable = match &self {
            Self::Http(err) => err.is_connect() || err.is_timeout(),
            Self::Timeout | Self::Silent => true,
            _ => false,
        };
        if unreachable {
            tracing::debug!(error = %self, "device unreachable");
            return UnavailableError::Unreachable.into();
        }
        BridgeError::Storage(Box::new(self))
    }
}

impl From<DeviceError> for BridgeError {
    fn from(err: DeviceError) -> Self {
        err.into_domain()
    }
}
