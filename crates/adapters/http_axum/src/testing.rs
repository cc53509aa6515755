//! In-memory [`BridgeControl`] and request helpers for handler tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, header};
use axum::response::Response;
use serde_json::{Value, json};
use tokio::sync::broadcast;

use portbridge_app::ports::control::{ScanResult, SyncStatus};
use portbridge_app::ports::scanner::ScanMethod;
use portbridge_app::ports::{BridgeControl, HubStatus};
use portbridge_domain::backup::{BackupOutcome, HistoryEntry};
use portbridge_domain::device::{Device, DeviceInfo, DeviceMeta, DevicePatch};
use portbridge_domain::error::{BridgeError, NotFoundError, UnavailableError};
use portbridge_domain::event::BridgeEvent;
use portbridge_domain::id::DeviceId;
use portbridge_domain::port::Port;
use portbridge_domain::sync_plan::SyncReport;
use portbridge_domain::time::now;

pub(crate) struct StubControl {
    device: Mutex<Option<Device>>,
    commands: Arc<Mutex<Vec<(String, String)>>>,
    offline: AtomicBool,
    events: broadcast::Sender<BridgeEvent>,
}

impl Default for StubControl {
    fn default() -> Self {
        Self {
            device: Mutex::new(None),
            commands: Arc::default(),
            offline: AtomicBool::new(false),
            events: broadcast::channel(16).0,
        }
    }
}

impl StubControl {
    pub(crate) fn with_device() -> Self {
        let device = Device::builder()
            .code("a1b2")
            .name("Kitchen controller")
            .ip("192.168.1.10")
            .build()
            .unwrap();
        let control = Self::default();
        *control.device.lock().unwrap() = Some(device);
        control
    }

    pub(crate) fn device_id(&self) -> DeviceId {
        self.device.lock().unwrap().as_ref().unwrap().id
    }

    pub(crate) fn commands(&self) -> Arc<Mutex<Vec<(String, String)>>> {
        Arc::clone(&self.commands)
    }

    pub(crate) fn events(&self) -> broadcast::Sender<BridgeEvent> {
        self.events.clone()
    }

    pub(crate) fn set_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    fn online(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    fn find(&self, id: DeviceId) -> Result<Device, BridgeError> {
        self.device
            .lock()
            .unwrap()
            .clone()
            .filter(|device| device.id == id)
            .ok_or_else(|| {
                NotFoundError {
                    entity: "Device",
                    id: id.to_string(),
                }
                .into()
            })
    }
}

impl BridgeControl for StubControl {
    async fn list_devices(&self) -> Result<Vec<DeviceMeta>, BridgeError> {
        let online = self.online();
        Ok(self
            .device
            .lock()
            .unwrap()
            .iter()
            .map(|device| device.meta(online))
            .collect())
    }

    async fn device(&self, id: DeviceId) -> Result<DeviceMeta, BridgeError> {
        Ok(self.find(id)?.meta(self.online()))
    }

    async fn add_device_by_ip(&self, ip: String) -> Result<DeviceMeta, BridgeError> {
        let device = Device::builder().code("c3d4").name("New").ip(ip).build()?;
        Ok(device.meta(true))
    }

    async fn update_device(
        &self,
        id: DeviceId,
        patch: DevicePatch,
    ) -> Result<DeviceMeta, BridgeError> {
        let mut device = self.find(id)?;
        device.apply_patch(patch)?;
        let meta = device.meta(self.online());
        *self.device.lock().unwrap() = Some(device);
        Ok(meta)
    }

    async fn remove_device(&self, id: DeviceId) -> Result<(), BridgeError> {
        self.find(id)?;
        self.device.lock().unwrap().take();
        Ok(())
    }

    async fn ports(&self, id: DeviceId) -> Result<Vec<Port>, BridgeError> {
        self.find(id)?;
        Ok(vec![Port::new_virtual(id, "r1", json!("0"), now())])
    }

    async fn send_command(&self, id: DeviceId, code: String, value: String) -> Result<(), BridgeError> {
        self.find(id)?;
        if !self.online() {
            return Err(UnavailableError::DeviceOffline { device_id: id }.into());
        }
        self.commands.lock().unwrap().push((code, value));
        Ok(())
    }

    async fn backup(&self, id: DeviceId, force: bool) -> Result<BackupOutcome, BridgeError> {
        self.find(id)?;
        let file = if force { "forced" } else { "incremental" };
        Ok(BackupOutcome {
            changed: true,
            snapshot: Some("2024-01-02_03-04-05".to_string()),
            changed_files: vec![file.to_string()],
            files: vec![file.to_string()],
        })
    }

    async fn backup_history(&self, id: DeviceId) -> Result<Vec<HistoryEntry>, BridgeError> {
        self.find(id)?;
        Ok(Vec::new())
    }

    async fn set_published(
        &self,
        id: DeviceId,
        code: String,
        published: bool,
    ) -> Result<Port, BridgeError> {
        self.find(id)?;
        let mut port = Port::new_virtual(id, code, json!("0"), now());
        port.params.hub_published = published;
        Ok(port)
    }

    async fn force_sync(&self) -> Result<SyncReport, BridgeError> {
        if !self.online() {
            return Err(UnavailableError::HubDisconnected.into());
        }
        Ok(SyncReport {
            created: 1,
            ..SyncReport::default()
        })
    }

    async fn sync_status(&self) -> SyncStatus {
        let online = self.online();
        SyncStatus {
            hub: HubStatus {
                connected: online,
                authenticated: online,
            },
            in_progress: false,
            published_ports: 0,
            cache_refreshed_at: None,
        }
    }

    async fn reconnect_hub(&self) -> Result<HubStatus, BridgeError> {
        self.offline.store(false, Ordering::SeqCst);
        Ok(HubStatus {
            connected: true,
            authenticated: true,
        })
    }

    async fn scan(&self, method: ScanMethod) -> Result<Vec<ScanResult>, BridgeError> {
        let name = match method {
            ScanMethod::Tcp => "tcp",
            ScanMethod::Ssdp => "ssdp",
        };
        Ok(vec![ScanResult {
            ip: "192.168.1.20".to_string(),
            info: DeviceInfo {
                name: Some(name.to_string()),
                ..DeviceInfo::default()
            },
            managed: false,
        }])
    }

    fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }
}

pub(crate) fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub(crate) async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
