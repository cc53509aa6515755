//! HTTP side of the controllers, plus the stream opener.

use serde_json::Value;

use portbridge_app::ports::DeviceApi;
use portbridge_domain::backup::{RemoteEntry, parse_listing};
use portbridge_domain::device::DeviceInfo;
use portbridge_domain::error::BridgeError;

use crate::config::DeviceConfig;
use crate::error::DeviceError;
use crate::stream::{self, WsLineReader, WsLineWriter};

/// [`DeviceApi`] over plain HTTP and a WebSocket line stream.
///
/// `ip` may carry an explicit `:port` for the HTTP surface; the stream
/// always goes to the configured stream port on the same host.
pub struct HttpWsDeviceApi {
    http: reqwest::Client,
    config: DeviceConfig,
}

impl HttpWsDeviceApi {
    /// # Errors
    ///
    /// Returns [`DeviceError::Http`] if the HTTP client cannot be built.
    pub fn new(config: DeviceConfig) -> Result<Self, DeviceError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()?;
        Ok(Self { http, config })
    }

    fn url(ip: &str, path: &str) -> String {
        format!("http://{ip}{path}")
    }

    async fn get(&self, ip: &str, path: &str) -> Result<reqwest::Response, DeviceError> {
        let url = Self::url(ip, path);
        tracing::debug!(%url, "GET");
        Ok(self.http.get(url).send().await?.error_for_status()?)
    }

    async fn get_json(&self, ip: &str, path: &str) -> Result<Value, DeviceError> {
        Ok(self.get(ip, path).await?.json().await?)
    }
}

/// Host part of `ip`, without any `:port`.
fn host(ip: &str) -> &str {
    ip.split_once(':').map_or(ip, |(host, _)| host)
}

/// Decode an `/info` document, rejecting the error documents some firmware
/// answers with a `200`.
pub(crate) fn parse_info(document: Value) -> Result<DeviceInfo, DeviceError> {
    if document.get("error").is_some() {
        return Err(DeviceError::Reported);
    }
    Ok(serde_json::from_value(document)?)
}

impl DeviceApi for HttpWsDeviceApi {
    type Writer = WsLineWriter;
    type Reader = WsLineReader;

    async fn fetch_values(&self, ip: &str) -> Result<Value, BridgeError> {
        Ok(self.get_json(ip, "/values").await?)
    }

    async fn fetch_info(&self, ip: &str) -> Result<DeviceInfo, BridgeError> {
        let document = self.get_json(ip, "/info").await?;
        Ok(parse_info(document)?)
    }

    async fn list_dir(&self, ip: &str, dir: &str) -> Result<Vec<RemoteEntry>, BridgeError> {
        let url = Self::url(ip, "/list");
        tracing::debug!(%url, dir, "GET");
        let listing: Value = self
            .http
            .get(url)
            .query(&[("dir", dir)])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(DeviceError::from)?
            .json()
            .await
            .map_err(DeviceError::from)?;
        Ok(parse_listing(&listing))
    }

    async fn fetch_file(&self, ip: &str, path: &str) -> Result<Vec<u8>, BridgeError> {
        let bytes = self
            .get(ip, path)
            .await?
            .bytes()
            .await
            .map_err(DeviceError::from)?;
        Ok(bytes.to_vec())
    }

    async fn delete_file(&self, ip: &str, path: &str) -> Result<(), BridgeError> {
        let url = Self::url(ip, "/edit");
        tracing::debug!(%url, path, "DELETE");
        self.http
            .delete(url)
            .query(&[("path", path)])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(DeviceError::from)?;
        Ok(())
    }

    async fn open_stream(
        &self,
        ip: &str,
    ) -> Result<(Self::Writer, Self::Reader), BridgeError> {
        Ok(stream::connect(
            host(ip),
            self.config.stream_port,
            self.config.http_timeout(),
            self.config.keepalive(),
        )
        .await?)
    }
}
