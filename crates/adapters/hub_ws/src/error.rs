//! Hub adapter error types.

use portbridge_domain::error::BridgeError;

/// Errors specific to the hub connector.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("invalid hub url")]
    Url(#[from] url::ParseError),

    #[error("unsupported hub url scheme {scheme:?}")]
    UnsupportedScheme { scheme: String },

    /// The access token cannot be sent as a header.
    #[error("invalid hub access token")]
    InvalidToken(#[from] reqwest::header::InvalidHeaderValue),

    /// A REST call failed or returned an error status.
    #[error("hub http request failed")]
    Http(#[from] reqwest::Error),

    #[error("hub websocket failed")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("malformed hub message")]
    Json(#[from] serde_json::Error),

    /// The hub did not follow the authentication sequence.
    #[error("unexpected frame during hub handshake")]
    Handshake,

    #[error("hub handshake timed out")]
    HandshakeTimeout,

    /// Nothing arrived on the socket, not even a pong, for too long.
    #[error("hub connection went silent")]
    Silent,

    /// The socket closed during the handshake.
    #[error("hub closed the connection")]
    Closed,

    /// The hub answered a request with `success: false`.
    #[error("hub rejected the request ({code}): {message}")]
    Rejected { code: String, message: String },
}

impl HubError {
    /// Convert into a [`BridgeError::Storage`] for propagation across port
    /// boundaries.
    pub fn into_domain(self) -> BridgeError {
        BridgeError::Storage(Box::new(self))
    }
}

impl From<HubError> for BridgeError {
    fn from(err: HubError) -> Self {
        err.into_domain()
    }
}
