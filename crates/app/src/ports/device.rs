//! Device port: talking to one controller over HTTP and its line stream.
//!
//! A controller serves its port table at `/values`, its identity at
//! `/info`, a small file system (`/list`, `/get`, `/delete`) and a
//! WebSocket carrying `code#value` text lines in both directions.

use std::future::Future;

use serde_json::Value;

use portbridge_domain::backup::RemoteEntry;
use portbridge_domain::device::DeviceInfo;
use portbridge_domain::error::BridgeError;

/// Read half of an open device stream.
pub trait LineReader: Send + 'static {
    /// Next text line.
    ///
    /// Returns `None` when the device closed the stream cleanly.
    fn next_line(&mut self) -> impl Future<Output = Option<Result<String, BridgeError>>> + Send;
}

/// Write half of an open device stream.
pub trait LineWriter: Send + 'static {
    fn send_line(&mut self, line: String) -> impl Future<Output = Result<(), BridgeError>> + Send;
}

/// Transport to the controllers, addressed by IP.
///
/// Every call is bounded by the adapter's request timeout; a timeout is
/// reported as [`BridgeError::Unavailable`].
pub trait DeviceApi: Send + Sync + 'static {
    type Writer: LineWriter;
    type Reader: LineReader;

    /// Raw `/values` document.
    fn fetch_values(&self, ip: &str) -> impl Future<Output = Result<Value, BridgeError>> + Send;

    /// Parsed `/info` document.
    fn fetch_info(&self, ip: &str) -> impl Future<Output = Result<DeviceInfo, BridgeError>> + Send;

    /// Entries of a remote directory.
    fn list_dir(
        &self,
        ip: &str,
        dir: &str,
    ) -> impl Future<Output = Result<Vec<RemoteEntry>, BridgeError>> + Send;

    /// Contents of a remote file.
    fn fetch_file(
        &self,
        ip: &str,
        path: &str,
    ) -> impl Future<Output = Result<Vec<u8>, BridgeError>> + Send;

    fn delete_file(&self, ip: &str, path: &str)
    -> impl Future<Output = Result<(), BridgeError>> + Send;

    /// Open the bidirectional line stream.
    fn open_stream(
        &self,
        ip: &str,
    ) -> impl Future<Output = Result<(Self::Writer, Self::Reader), BridgeError>> + Send;
}
