//! In-memory port implementations shared by the service tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio::sync::mpsc;

use portbridge_domain::backup::{BackupOutcome, HistoryEntry, LogsExportOutcome, RemoteEntry};
use portbridge_domain::device::{Device, DeviceInfo, DeviceParams};
use portbridge_domain::entity::{HubEntity, HubEntityId};
use portbridge_domain::error::{BridgeError, NotFoundError, UnavailableError};
use portbridge_domain::id::DeviceId;
use portbridge_domain::port::{Port, PortParams};
use portbridge_domain::time::Timestamp;

use crate::ports::{
    ConfigBackup, DeviceApi, DeviceBookkeeping, DeviceRepository, HubClient, HubStatus, LineReader,
    LineWriter, PortRepository,
};

pub fn device(code: &str, ip: &str) -> Device {
    Device::builder().code(code).name(format!("dev {code}")).ip(ip).build().unwrap()
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

pub fn two_ports() -> Value {
    json!([
        {"code": "r1", "title": "Relay", "type": "out.switch", "val": "0"},
        {"code": "t1", "title": "Temp", "type": "in.analog", "val": "21.5", "unit": "C"}
    ])
}

// ---------------------------------------------------------------- device

type LineSender = mpsc::UnboundedSender<Result<String, BridgeError>>;

#[derive(Default)]
pub struct FakeDevice {
    pub values: Mutex<Value>,
    pub info: Mutex<DeviceInfo>,
    pub files: Mutex<BTreeMap<String, Vec<u8>>>,
    pub fail_values: AtomicBool,
    pub opened: AtomicUsize,
    pub sent: Arc<Mutex<Vec<String>>>,
    streams: Mutex<Vec<LineSender>>,
}

impl FakeDevice {
    pub fn with_values(values: Value) -> Self {
        let fake = Self::default();
        *fake.values.lock().unwrap() = values;
        fake
    }

    /// Feed a line into the most recently opened stream.
    pub fn push_line(&self, line: &str) {
        let streams = self.streams.lock().unwrap();
        streams.last().unwrap().send(Ok(line.to_string())).unwrap();
    }

    /// Close the most recently opened stream from the device side.
    pub fn close_stream(&self) {
        self.streams.lock().unwrap().clear();
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

pub struct FakeReader(mpsc::UnboundedReceiver<Result<String, BridgeError>>);

impl LineReader for FakeReader {
    async fn next_line(&mut self) -> Option<Result<String, BridgeError>> {
        self.0.recv().await
    }
}

pub struct FakeWriter(Arc<Mutex<Vec<String>>>);

impl LineWriter for FakeWriter {
    async fn send_line(&mut self, line: String) -> Result<(), BridgeError> {
        self.0.lock().unwrap().push(line);
        Ok(())
    }
}

impl DeviceApi for FakeDevice {
    type Writer = FakeWriter;
    type Reader = FakeReader;

    async fn fetch_values(&self, _ip: &str) -> Result<Value, BridgeError> {
        if self.fail_values.load(Ordering::SeqCst) {
            return Err(UnavailableError::ConnectionLost.into());
        }
        Ok(self.values.lock().unwrap().clone())
    }

    async fn fetch_info(&self, _ip: &str) -> Result<DeviceInfo, BridgeError> {
        Ok(self.info.lock().unwrap().clone())
    }

    async fn list_dir(&self, _ip: &str, _dir: &str) -> Result<Vec<RemoteEntry>, BridgeError> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .keys()
            .map(|name| RemoteEntry {
                name: name.clone(),
                kind: Some("file".to_string()),
            })
            .collect())
    }

    async fn fetch_file(&self, _ip: &str, path: &str) -> Result<Vec<u8>, BridgeError> {
        self.files
            .lock()
            .unwrap()
            .get(path.trim_start_matches('/'))
            .cloned()
            .ok_or_else(|| UnavailableError::ConnectionLost.into())
    }

    async fn delete_file(&self, _ip: &str, path: &str) -> Result<(), BridgeError> {
        self.files.lock().unwrap().remove(path.trim_start_matches('/'));
        Ok(())
    }

    async fn open_stream(&self, _ip: &str) -> Result<(FakeWriter, FakeReader), BridgeError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().unwrap().push(tx);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok((FakeWriter(Arc::clone(&self.sent)), FakeReader(rx)))
    }
}

// ---------------------------------------------------------------- storage

#[derive(Default)]
pub struct InMemoryDevices {
    pub store: Mutex<HashMap<DeviceId, Device>>,
}

impl InMemoryDevices {
    pub fn with(devices: &[Device]) -> Self {
        let repo = Self::default();
        for device in devices {
            repo.store.lock().unwrap().insert(device.id, device.clone());
        }
        repo
    }

    pub fn snapshot(&self, id: DeviceId) -> Device {
        self.store.lock().unwrap()[&id].clone()
    }
}

impl DeviceRepository for InMemoryDevices {
    async fn create(&self, device: Device) -> Result<Device, BridgeError> {
        self.store.lock().unwrap().insert(device.id, device.clone());
        Ok(device)
    }

    async fn get_by_id(&self, id: DeviceId) -> Result<Option<Device>, BridgeError> {
        Ok(self.store.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Device>, BridgeError> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .values()
            .find(|device| device.code == code)
            .cloned())
    }

    async fn get_all(&self) -> Result<Vec<Device>, BridgeError> {
        Ok(self.store.lock().unwrap().values().cloned().collect())
    }

    async fn update(&self, device: Device) -> Result<Device, BridgeError> {
        self.store.lock().unwrap().insert(device.id, device.clone());
        Ok(device)
    }

    async fn set_status(
        &self,
        id: DeviceId,
        online: bool,
        last_seen: Timestamp,
    ) -> Result<(), BridgeError> {
        if let Some(device) = self.store.lock().unwrap().get_mut(&id) {
            device.online = online;
            device.last_seen = Some(last_seen);
        }
        Ok(())
    }

    async fn delete(&self, id: DeviceId) -> Result<(), BridgeError> {
        self.store.lock().unwrap().remove(&id);
        Ok(())
    }
}

impl DeviceBookkeeping for InMemoryDevices {
    async fn record<F>(&self, id: DeviceId, record: F) -> Result<(), BridgeError>
    where
        F: FnOnce(&mut DeviceParams) + Send + 'static,
    {
        let mut store = self.store.lock().unwrap();
        let device = store.get_mut(&id).ok_or_else(|| NotFoundError {
            entity: "Device",
            id: id.to_string(),
        })?;
        record(&mut device.params);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPorts {
    pub store: Mutex<BTreeMap<(DeviceId, String), Port>>,
}

impl InMemoryPorts {
    pub fn with(ports: &[Port]) -> Self {
        let repo = Self::default();
        for port in ports {
            repo.store
                .lock()
                .unwrap()
                .insert((port.device_id, port.code.clone()), port.clone());
        }
        repo
    }

    pub fn snapshot(&self, device_id: DeviceId, code: &str) -> Option<Port> {
        self.store
            .lock()
            .unwrap()
            .get(&(device_id, code.to_string()))
            .cloned()
    }
}

impl PortRepository for InMemoryPorts {
    async fn upsert(&self, mut port: Port) -> Result<(), BridgeError> {
        let mut store = self.store.lock().unwrap();
        let key = (port.device_id, port.code.clone());
        if let Some(existing) = store.get(&key) {
            port.params = existing.params.clone();
        }
        store.insert(key, port);
        Ok(())
    }

    async fn upsert_many(&self, ports: Vec<Port>) -> Result<(), BridgeError> {
        for port in ports {
            self.upsert(port).await?;
        }
        Ok(())
    }

    async fn get(&self, device_id: DeviceId, code: &str) -> Result<Option<Port>, BridgeError> {
        Ok(self.snapshot(device_id, code))
    }

    async fn list_by_device(&self, device_id: DeviceId) -> Result<Vec<Port>, BridgeError> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .values()
            .filter(|port| port.device_id == device_id)
            .cloned()
            .collect())
    }

    async fn list_published(&self) -> Result<Vec<Port>, BridgeError> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .values()
            .filter(|port| port.params.hub_published)
            .cloned()
            .collect())
    }

    async fn save_params(
        &self,
        device_id: DeviceId,
        code: &str,
        params: PortParams,
    ) -> Result<(), BridgeError> {
        let mut store = self.store.lock().unwrap();
        let port = store
            .get_mut(&(device_id, code.to_string()))
            .ok_or_else(|| NotFoundError {
                entity: "Port",
                id: code.to_string(),
            })?;
        port.params = params;
        Ok(())
    }
}

// ---------------------------------------------------------------- hub

#[derive(Default)]
pub struct FakeHub {
    pub entities: Mutex<BTreeMap<HubEntityId, HubEntity>>,
    pub set_calls: Mutex<Vec<(HubEntityId, String)>>,
    pub removed: Mutex<Vec<HubEntityId>>,
    /// Entity ids whose `set_state` fails.
    pub failing: Mutex<HashSet<String>>,
    /// Delay applied to `get_states`.
    pub slow: Mutex<Option<Duration>>,
    pub disconnected: AtomicBool,
    pub reconnects: AtomicUsize,
}

impl FakeHub {
    pub fn with_entities(entities: Vec<HubEntity>) -> Self {
        let hub = Self::default();
        for entity in entities {
            hub.entities
                .lock()
                .unwrap()
                .insert(entity.entity_id.clone(), entity);
        }
        hub
    }

    pub fn entity(&self, id: &str) -> Option<HubEntity> {
        self.entities
            .lock()
            .unwrap()
            .get(&HubEntityId::new(id))
            .cloned()
    }

    pub fn set_calls(&self) -> Vec<(HubEntityId, String)> {
        self.set_calls.lock().unwrap().clone()
    }
}

impl HubClient for FakeHub {
    fn status(&self) -> HubStatus {
        let connected = !self.disconnected.load(Ordering::SeqCst);
        HubStatus {
            connected,
            authenticated: connected,
        }
    }

    async fn get_states(&self) -> Result<Vec<HubEntity>, BridgeError> {
        let delay = *self.slow.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(UnavailableError::HubDisconnected.into());
        }
        Ok(self.entities.lock().unwrap().values().cloned().collect())
    }

    async fn set_state(
        &self,
        entity_id: &HubEntityId,
        state: &str,
        attributes: Map<String, Value>,
    ) -> Result<(), BridgeError> {
        if self.failing.lock().unwrap().contains(entity_id.as_str()) {
            return Err(UnavailableError::ConnectionLost.into());
        }
        self.set_calls
            .lock()
            .unwrap()
            .push((entity_id.clone(), state.to_string()));
        self.entities.lock().unwrap().insert(
            entity_id.clone(),
            HubEntity {
                entity_id: entity_id.clone(),
                state: state.to_string(),
                attributes,
            },
        );
        Ok(())
    }

    async fn remove_entity(&self, entity_id: &HubEntityId) -> Result<(), BridgeError> {
        self.entities.lock().unwrap().remove(entity_id);
        self.removed.lock().unwrap().push(entity_id.clone());
        Ok(())
    }

    async fn call_service(
        &self,
        _domain: &str,
        _service: &str,
        _entity_id: Option<&HubEntityId>,
        _data: Map<String, Value>,
    ) -> Result<Value, BridgeError> {
        Ok(Value::Null)
    }

    async fn reconnect(&self) -> Result<(), BridgeError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        self.disconnected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------- backup

#[derive(Default)]
pub struct FakeBackup {
    pub outcome: Mutex<BackupOutcome>,
    pub backups: Mutex<Vec<(DeviceId, bool)>>,
    pub exports: Mutex<Vec<DeviceId>>,
    pub migrated: Mutex<Vec<DeviceId>>,
}

impl ConfigBackup for FakeBackup {
    async fn run_incremental_backup(&self, device: &Device) -> Result<BackupOutcome, BridgeError> {
        self.backups.lock().unwrap().push((device.id, false));
        Ok(self.outcome.lock().unwrap().clone())
    }

    async fn run_forced_backup(&self, device: &Device) -> Result<BackupOutcome, BridgeError> {
        self.backups.lock().unwrap().push((device.id, true));
        Ok(self.outcome.lock().unwrap().clone())
    }

    async fn export_logs(&self, device: &Device) -> Result<LogsExportOutcome, BridgeError> {
        self.exports.lock().unwrap().push(device.id);
        Ok(LogsExportOutcome {
            exported: vec!["boot.txt".to_string()],
            failed: Vec::new(),
        })
    }

    async fn history(&self, _device_id: DeviceId) -> Result<Vec<HistoryEntry>, BridgeError> {
        Ok(Vec::new())
    }

    async fn migrate_legacy(&self, device_id: DeviceId) -> Result<bool, BridgeError> {
        self.migrated.lock().unwrap().push(device_id);
        Ok(false)
    }
}
