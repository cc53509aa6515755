//! Hub connection configuration.

use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

use crate::error::HubError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// When `false` the connector never connects and every call fails
    /// with "hub is not connected".
    pub enabled: bool,
    /// Base URL of the hub's REST API, e.g. `http://homeassistant.local:8123`.
    pub url: String,
    /// WebSocket endpoint; derived from `url` when absent.
    pub websocket_url: Option<String>,
    /// Long-lived access token.
    pub token: Option<SecretString>,
    pub request_timeout_secs: u64,
    pub reconnect_interval_secs: u64,
    /// Pause between two pings on the socket, in seconds.
    pub ping_interval_secs: u64,
    /// Silence tolerated after a ping before the connection is dropped.
    pub ping_timeout_secs: u64,
    /// Reconnect attempts before giving up; reset by every accepted token.
    pub max_reconnect_attempts: u32,
    /// Run a full sync after every authenticated (re)connection.
    pub auto_sync: bool,
    /// Object-id prefix of the entities the bridge owns.
    pub entity_namespace: String,
}

impl HubConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    /// Never shorter than one second.
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    #[must_use]
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    /// `ws(s)://{host}/api/websocket` unless configured explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Url`] if the URL cannot be parsed and
    /// [`HubError::UnsupportedScheme`] for anything but http(s)/ws(s).
    pub fn websocket_url(&self) -> Result<Url, HubError> {
        if let Some(explicit) = &self.websocket_url {
            return Ok(Url::parse(explicit)?);
        }
        let mut url = Url::parse(&self.url)?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(HubError::UnsupportedScheme {
                    scheme: other.to_string(),
                });
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| HubError::UnsupportedScheme {
                scheme: scheme.to_string(),
            })?;
        url.set_path("/api/websocket");
        Ok(url)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://homeassistant.local:8123".to_string(),
            websocket_url: None,
            token: None,
            request_timeout_secs: 10,
            reconnect_interval_secs: 5,
            ping_interval_secs: 20,
            ping_timeout_secs: 10,
            max_reconnect_attempts: 10,
            auto_sync: true,
            entity_namespace: "myhome".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_have_sensible_defaults() {
        let config = HubConfig::default();
        assert!(config.enabled);
        assert!(config.auto_sync);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.ping_interval(), Duration::from_secs(20));
        assert_eq!(config.ping_timeout(), Duration::from_secs(10));
        assert_eq!(config.entity_namespace, "myhome");
    }

    #[test]
    fn should_clamp_ping_interval_to_one_second() {
        let config = HubConfig {
            ping_interval_secs: 0,
            ..HubConfig::default()
        };
        assert_eq!(config.ping_interval(), Duration::from_secs(1));
    }

    #[test]
    fn should_derive_websocket_url_from_rest_url() {
        let config = HubConfig {
            url: "https://hub.example:8123/".to_string(),
            ..HubConfig::default()
        };
        assert_eq!(
            config.websocket_url().unwrap().as_str(),
            "wss://hub.example:8123/api/websocket"
        );
    }

    #[test]
    fn should_prefer_explicit_websocket_url() {
        let config = HubConfig {
            websocket_url: Some("ws://127.0.0.1:9000/".to_string()),
            ..HubConfig::default()
        };
        assert_eq!(config.websocket_url().unwrap().as_str(), "ws://127.0.0.1:9000/");
    }

    #[test]
    fn should_reject_unknown_scheme() {
        let config = HubConfig {
            url: "ftp://hub".to_string(),
            ..HubConfig::default()
        };
        assert!(matches!(
            config.websocket_url(),
            Err(HubError::UnsupportedScheme { .. })
        ));
    }

    #[test]
    fn should_not_print_token_in_debug_output() {
        let config = HubConfig {
            token: Some(SecretString::from("super-secret".to_string())),
            ..HubConfig::default()
        };
        assert!(!format!("{config:?}").contains("super-secret"));
    }
}
