//! Device link: the live connection to one controller.
//!
//! A link owns the device's cached port table and drives a reconnecting
//! state machine in a background task:
//!
//! ```text
//! Idle -> Bootstrapping -> Streaming -> Backoff -> Bootstrapping -> ...
//!                      \______________/
//!                        (any failure)            stop() -> Stopped
//! ```
//!
//! Bootstrapping reads `/values` over HTTP and replaces the port table.
//! Streaming applies `code#value` lines to that table as they arrive.
//! Every change is reported to the owner through an unbounded channel of
//! [`LinkEvent`]s, in the order the lines were received.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use portbridge_domain::device::{Device, DeviceMeta, DeviceParams, DevicePatch};
use portbridge_domain::error::{BridgeError, UnavailableError};
use portbridge_domain::id::DeviceId;
use portbridge_domain::port::{Port, StreamEvent, flatten_values};
use portbridge_domain::time::now;

use crate::ports::{DeviceApi, LineReader, LineWriter};

/// Timing knobs of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    /// Pause between a failure and the next bootstrap.
    pub reconnect_delay: Duration,
    /// How long `stop` waits for the task before aborting it.
    pub stop_timeout: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Idle,
    Bootstrapping,
    Streaming,
    Backoff,
    Stopped,
}

/// Notification emitted by a running link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The stream is open and commands can be sent.
    Connected { device_id: DeviceId },
    /// The device went from online to offline.
    Disconnected { device_id: DeviceId },
    /// The first successful bootstrap after `start`.
    InitialPorts { device_id: DeviceId, ports: Vec<Port> },
    /// A stream line was applied; `port` is the updated cache entry.
    Value { device_id: DeviceId, port: Port },
}

struct Shared<A: DeviceApi> {
    api: Arc<A>,
    device_id: DeviceId,
    device: RwLock<Device>,
    ports: RwLock<BTreeMap<String, Port>>,
    writer: Mutex<Option<A::Writer>>,
    online: AtomicBool,
    state: RwLock<LinkState>,
    events: mpsc::UnboundedSender<LinkEvent>,
    settings: LinkSettings,
}

impl<A: DeviceApi> Shared<A> {
    fn emit(&self, event: LinkEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!(device_id = %self.device_id, "link event dropped, no listener");
        }
    }

    async fn set_state(&self, state: LinkState) {
        *self.state.write().await = state;
    }

    async fn ip(&self) -> String {
        self.device.read().await.ip().to_string()
    }

    async fn bootstrap(&self) -> Result<Vec<Port>, BridgeError> {
        let ip = self.ip().await;
        let document = self.api.fetch_values(&ip).await?;
        let ports = flatten_values(self.device_id, &document, now());
        let table = ports
            .iter()
            .map(|port| (port.code.clone(), port.clone()))
            .collect();
        *self.ports.write().await = table;
        tracing::debug!(device_id = %self.device_id, ports = ports.len(), "port table loaded");
        Ok(ports)
    }

    async fn go_offline(&self) {
        self.writer.lock().await.take();
        if self.online.swap(false, Ordering::SeqCst) {
            tracing::info!(device_id = %self.device_id, "device offline");
            self.emit(LinkEvent::Disconnected {
                device_id: self.device_id,
            });
        }
    }

    async fn handle_line(&self, line: &str) {
        let Some(event) = StreamEvent::parse(line) else {
            tracing::debug!(device_id = %self.device_id, line, "ignoring malformed stream line");
            return;
        };
        let at = now();
        let value = Value::String(event.value);
        let port = {
            let mut ports = self.ports.write().await;
            let port = ports
                .entry(event.code)
                .and_modify(|port| port.apply_value(value.clone(), at))
                .or_insert_with_key(|code| {
                    Port::new_virtual(self.device_id, code.clone(), value.clone(), at)
                });
            port.clone()
        };
        self.emit(LinkEvent::Value {
            device_id: self.device_id,
            port,
        });
    }

    /// One pass of bootstrap + stream. Returns when the stream ends.
    async fn connect_once(&self, initial_sent: &mut bool) -> Result<(), BridgeError> {
        self.set_state(LinkState::Bootstrapping).await;
        let ports = self.bootstrap().await?;
        if !*initial_sent {
            *initial_sent = true;
            self.emit(LinkEvent::InitialPorts {
                device_id: self.device_id,
                ports,
            });
        }

        let ip = self.ip().await;
        let (writer, mut reader) = self.api.open_stream(&ip).await?;
        *self.writer.lock().await = Some(writer);
        self.online.store(true, Ordering::SeqCst);
        self.set_state(LinkState::Streaming).await;
        tracing::info!(device_id = %self.device_id, %ip, "device stream open");
        self.emit(LinkEvent::Connected {
            device_id: self.device_id,
        });

        while let Some(line) = reader.next_line().await {
            self.handle_line(&line?).await;
        }
        Ok(())
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut initial_sent = false;
        loop {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = self.connect_once(&mut initial_sent) => result,
            };
            match result {
                Ok(()) => tracing::info!(device_id = %self.device_id, "device closed the stream"),
                Err(err) => tracing::warn!(device_id = %self.device_id, %err, "device link failed"),
            }
            self.go_offline().await;
            self.set_state(LinkState::Backoff).await;

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.settings.reconnect_delay) => {}
            }
        }
        self.go_offline().await;
        self.set_state(LinkState::Stopped).await;
    }
}

/// Live connection to one controller.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct DeviceLink<A: DeviceApi> {
    shared: Arc<Shared<A>>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl<A: DeviceApi> DeviceLink<A> {
    /// Create an idle link. Nothing happens until [`start`](Self::start).
    pub fn new(
        api: Arc<A>,
        device: Device,
        settings: LinkSettings,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                api,
                device_id: device.id,
                device: RwLock::new(device),
                ports: RwLock::new(BTreeMap::new()),
                writer: Mutex::new(None),
                online: AtomicBool::new(false),
                state: RwLock::new(LinkState::Idle),
                events,
                settings,
            }),
            task: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn device_id(&self) -> DeviceId {
        self.shared.device_id
    }

    pub async fn device(&self) -> Device {
        self.shared.device.read().await.clone()
    }

    pub async fn ip(&self) -> String {
        self.shared.ip().await
    }

    /// The stream is currently open.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.shared.online.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> LinkState {
        *self.shared.state.read().await
    }

    /// The background task exists and has not finished.
    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    pub async fn meta(&self) -> DeviceMeta {
        self.shared.device.read().await.meta(self.is_online())
    }

    /// Spawn the connection task. Starting a running link is a no-op.
    #[tracing::instrument(skip(self), fields(device_id = %self.shared.device_id))]
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|(_, handle)| !handle.is_finished()) {
            return;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.shared).run(cancel.clone()));
        *task = Some((cancel, handle));
        tracing::debug!("device link started");
    }

    /// Cancel the connection task and wait for it, at most
    /// [`LinkSettings::stop_timeout`]; a task that does not finish in
    /// time is aborted.
    #[tracing::instrument(skip(self), fields(device_id = %self.shared.device_id))]
    pub async fn stop(&self) {
        let Some((cancel, mut handle)) = self.task.lock().await.take() else {
            return;
        };
        cancel.cancel();
        if tokio::time::timeout(self.shared.settings.stop_timeout, &mut handle)
            .await
            .is_err()
        {
            tracing::warn!("device link did not stop in time, aborting");
            handle.abort();
            self.shared.go_offline().await;
            self.shared.set_state(LinkState::Stopped).await;
        }
        tracing::debug!("device link stopped");
    }

    /// Re-read `/values` and replace the cached port table.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Unavailable`] when the device cannot be reached.
    pub async fn bootstrap(&self) -> Result<Vec<Port>, BridgeError> {
        self.shared.bootstrap().await
    }

    /// Snapshot of the cached port table, ordered by code.
    pub async fn get_ports_cached(&self) -> Vec<Port> {
        self.shared.ports.read().await.values().cloned().collect()
    }

    pub async fn get_port(&self, code: &str) -> Option<Port> {
        self.shared.ports.read().await.get(code).cloned()
    }

    /// Write `code#value` on the open stream.
    ///
    /// # Errors
    ///
    /// Returns [`UnavailableError::DeviceOffline`] when no stream is open,
    /// or the transport error when the write fails.
    #[tracing::instrument(skip(self), fields(device_id = %self.shared.device_id))]
    pub async fn send_command(&self, code: &str, value: &str) -> Result<(), BridgeError> {
        let mut writer = self.shared.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(UnavailableError::DeviceOffline {
                device_id: self.shared.device_id,
            }
            .into());
        };
        writer.send_line(StreamEvent::encode(code, value)).await
    }

    /// Apply a partial update to the link's device record.
    ///
    /// A running link is restarted when the IP address changed, so the
    /// next bootstrap talks to the new address.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Validation`] if the patch is invalid; the
    /// record is then left unchanged.
    pub async fn update_params(&self, patch: DevicePatch) -> Result<Device, BridgeError> {
        let (device, ip_changed) = {
            let mut device = self.shared.device.write().await;
            let ip_changed = device.apply_patch(patch)?;
            (device.clone(), ip_changed)
        };
        if ip_changed && self.is_running().await {
            tracing::info!(device_id = %device.id, ip = device.ip(), "ip changed, restarting link");
            self.stop().await;
            self.start().await;
        }
        Ok(device)
    }

    /// Replace the in-memory params with the stored ones.
    pub async fn refresh_params(&self, params: DeviceParams) {
        self.shared.device.write().await.params = params;
    }
}

impl<A: DeviceApi> Drop for DeviceLink<A> {
    fn drop(&mut self) {
        if let Some((cancel, _)) = self.task.get_mut().as_ref() {
            cancel.cancel();
        }
    }
}
