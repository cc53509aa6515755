//! Device registry: owns every [`DeviceLink`] and the events they emit.
//!
//! All check-then-act operations (add, update, remove) run under one
//! registry-wide lock, so two links never share a device id or an IP.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc};

use portbridge_domain::device::{Device, DeviceMeta, DeviceParams, DevicePatch};
use portbridge_domain::error::{BridgeError, ConflictError, NotFoundError, ValidationError};
use portbridge_domain::event::{BridgeEvent, EventKind};
use portbridge_domain::id::DeviceId;
use portbridge_domain::port::flatten_values;
use portbridge_domain::time::now;
use portbridge_domain::value::ValueMapper;

use super::device_link::{DeviceLink, LinkEvent, LinkSettings};
use super::port_sync::PortSyncEngine;
use crate::ports::{
    DeviceApi, DeviceBookkeeping, DeviceRepository, EventPublisher, HubClient, PortRepository,
};

/// Title of the port a controller exposes when it keeps log files.
const LOGS_PORT_TITLE: &str = "LOGS";

type Links<A> = HashMap<DeviceId, Arc<DeviceLink<A>>>;

/// Manages the set of running device links.
pub struct DeviceRegistry<A: DeviceApi, DR, PR, H, E> {
    api: Arc<A>,
    devices: Arc<DR>,
    ports: Arc<PR>,
    sync: Arc<PortSyncEngine<H, DR, PR>>,
    events: E,
    settings: LinkSettings,
    links: Mutex<Links<A>>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    link_rx: Mutex<Option<mpsc::UnboundedReceiver<LinkEvent>>>,
}

impl<A, DR, PR, H, E> DeviceRegistry<A, DR, PR, H, E>
where
    A: DeviceApi,
    DR: DeviceRepository,
    PR: PortRepository,
    H: HubClient,
    E: EventPublisher,
{
    pub fn new(
        api: Arc<A>,
        devices: Arc<DR>,
        ports: Arc<PR>,
        sync: Arc<PortSyncEngine<H, DR, PR>>,
        events: E,
        settings: LinkSettings,
    ) -> Self {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        Self {
            api,
            devices,
            ports,
            sync,
            events,
            settings,
            links: Mutex::new(HashMap::new()),
            link_tx,
            link_rx: Mutex::new(Some(link_rx)),
        }
    }

    async fn publish(&self, kind: EventKind) {
        if let Err(err) = self.events.publish(BridgeEvent::new(kind)).await {
            tracing::warn!(%err, "failed to publish bridge event");
        }
    }

    async fn stored(&self, id: DeviceId) -> Result<Device, BridgeError> {
        self.devices.get_by_id(id).await?.ok_or_else(|| {
            NotFoundError {
                entity: "Device",
                id: id.to_string(),
            }
            .into()
        })
    }

    async fn ip_owner(links: &Links<A>, ip: &str, except: DeviceId) -> Option<DeviceId> {
        for (id, link) in links {
            if *id != except && link.ip().await == ip {
                return Some(*id);
            }
        }
        None
    }

    /// Reject a device that clashes with a running link.
    async fn check_free(links: &Links<A>, device: &Device) -> Result<(), BridgeError> {
        if let Some(existing) = links.get(&device.id)
            && existing.is_running().await
        {
            return Err(ConflictError::DeviceRunning {
                device_id: device.id,
            }
            .into());
        }
        if let Some(owner) = Self::ip_owner(links, device.ip(), device.id).await {
            return Err(ConflictError::IpInUse {
                ip: device.ip().to_string(),
                device_id: owner,
            }
            .into());
        }
        Ok(())
    }

    async fn attach(&self, links: &mut Links<A>, device: Device) -> Arc<DeviceLink<A>> {
        if let Some(stale) = links.remove(&device.id) {
            stale.stop().await;
        }
        let link = Arc::new(DeviceLink::new(
            Arc::clone(&self.api),
            device,
            self.settings,
            self.link_tx.clone(),
        ));
        link.start().await;
        links.insert(link.device_id(), Arc::clone(&link));
        link
    }

    /// Persist a device and start its link.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Validation`] for an invalid device,
    /// [`ConflictError::DeviceRunning`] when a link for the same id is
    /// running, [`ConflictError::IpInUse`] when another link uses the same
    /// IP, or a storage error. Nothing is persisted or started on error.
    #[tracing::instrument(skip(self, device), fields(device_id = %device.id, code = %device.code))]
    pub async fn add_device(&self, device: Device) -> Result<Arc<DeviceLink<A>>, BridgeError> {
        device.validate()?;
        let mut links = self.links.lock().await;
        Self::check_free(&links, &device).await?;
        if self.devices.get_by_id(device.id).await?.is_some() {
            self.devices.update(device.clone()).await?;
        } else {
            self.devices.create(device.clone()).await?;
        }
        let link = self.attach(&mut links, device).await;
        tracing::info!("device added");
        Ok(link)
    }

    /// Identify the controller at `ip` and add it.
    ///
    /// A device already known by its hardware code keeps its id and
    /// settings; only its address and identity fields are refreshed.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Unavailable`] when the controller does not
    /// answer, [`ValidationError::EmptyCode`] when it reports no chip id,
    /// or any error of [`add_device`](Self::add_device).
    #[tracing::instrument(skip(self))]
    pub async fn add_by_ip(&self, ip: &str) -> Result<DeviceMeta, BridgeError> {
        let info = self.api.fetch_info(ip).await?;
        let values = self.api.fetch_values(ip).await?;
        let code = info
            .chip_id
            .clone()
            .filter(|code| !code.trim().is_empty())
            .ok_or(ValidationError::EmptyCode)?;

        let mut device = match self.devices.find_by_code(&code).await? {
            Some(existing) => existing,
            None => Device::builder().code(&code).name(&code).ip(ip).build()?,
        };
        device.params.ip = ip.to_string();
        device.apply_info(&info);
        let has_logs = flatten_values(device.id, &values, now())
            .iter()
            .any(|port| port.title.as_deref() == Some(LOGS_PORT_TITLE));
        if has_logs {
            device.params.save_logs = true;
        }

        let link = self.add_device(device).await?;
        let device = link.device().await;
        Ok(device.meta(link.is_online()))
    }

    /// Start a link for every stored device.
    ///
    /// Devices that cannot be started are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the device list cannot be read.
    #[tracing::instrument(skip(self))]
    pub async fn load_devices(&self) -> Result<usize, BridgeError> {
        let mut links = self.links.lock().await;
        let mut started = 0;
        for device in self.devices.get_all().await? {
            let device_id = device.id;
            let checked = match device.validate() {
                Ok(()) => Self::check_free(&links, &device).await,
                Err(err) => Err(err),
            };
            match checked {
                Ok(()) => {
                    self.attach(&mut links, device).await;
                    started += 1;
                }
                Err(err) => tracing::warn!(%device_id, %err, "stored device not started"),
            }
        }
        tracing::info!(started, "devices loaded");
        Ok(started)
    }

    /// Stop and forget the link of a device. The stored record stays.
    ///
    /// Returns `false` when no link existed.
    #[tracing::instrument(skip(self))]
    pub async fn remove_device(&self, id: DeviceId) -> bool {
        let link = self.links.lock().await.remove(&id);
        match link {
            Some(link) => {
                link.stop().await;
                true
            }
            None => false,
        }
    }

    /// Stop the link and delete the stored record with its ports.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotFound`] when the device is unknown, or a
    /// storage error.
    #[tracing::instrument(skip(self))]
    pub async fn delete_device(&self, id: DeviceId) -> Result<(), BridgeError> {
        let had_link = self.remove_device(id).await;
        if self.devices.get_by_id(id).await?.is_none() {
            if had_link {
                return Ok(());
            }
            return Err(NotFoundError {
                entity: "Device",
                id: id.to_string(),
            }
            .into());
        }
        self.devices.delete(id).await?;
        if let Err(err) = self.sync.refresh_cache().await {
            tracing::warn!(%err, "published port cache refresh failed");
        }
        tracing::info!("device deleted");
        Ok(())
    }

    /// Merge a partial update into the stored device and its link.
    ///
    /// A changed IP address restarts the link.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotFound`], [`BridgeError::Validation`],
    /// [`ConflictError::IpInUse`] or a storage error. The stored record is
    /// untouched on error.
    #[tracing::instrument(skip(self, patch))]
    pub async fn update_params(
        &self,
        id: DeviceId,
        patch: DevicePatch,
    ) -> Result<DeviceMeta, BridgeError> {
        let links = self.links.lock().await;
        let mut device = self.stored(id).await?;
        let ip_changed = device.apply_patch(patch.clone())?;
        if ip_changed && let Some(owner) = Self::ip_owner(&links, device.ip(), id).await {
            return Err(ConflictError::IpInUse {
                ip: device.ip().to_string(),
                device_id: owner,
            }
            .into());
        }
        let device = self.devices.update(device).await?;
        let online = match links.get(&id) {
            Some(link) => {
                link.update_params(patch).await?;
                link.is_online()
            }
            None => false,
        };
        drop(links);

        if let Err(err) = self.sync.refresh_cache().await {
            tracing::warn!(%err, "published port cache refresh failed");
        }
        let meta = device.meta(online);
        self.publish(EventKind::DeviceUpdated {
            device: Box::new(meta.clone()),
        })
        .await;
        Ok(meta)
    }

    pub async fn get_client(&self, id: DeviceId) -> Option<Arc<DeviceLink<A>>> {
        self.links.lock().await.get(&id).cloned()
    }

    pub async fn clients(&self) -> Vec<Arc<DeviceLink<A>>> {
        self.links.lock().await.values().cloned().collect()
    }

    /// Addresses of every managed device.
    pub async fn managed_ips(&self) -> Vec<String> {
        let links = self.clients().await;
        let mut ips = Vec::with_capacity(links.len());
        for link in links {
            ips.push(link.ip().await);
        }
        ips
    }

    /// Write a raw value to a device port.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotFound`] when no link exists, or
    /// [`BridgeError::Unavailable`] when the device is offline.
    #[tracing::instrument(skip(self))]
    pub async fn send_command(
        &self,
        id: DeviceId,
        code: &str,
        value: &str,
    ) -> Result<(), BridgeError> {
        let link = self.get_client(id).await.ok_or_else(|| NotFoundError {
            entity: "Device",
            id: id.to_string(),
        })?;
        link.send_command(code, value).await?;
        self.publish(EventKind::PortOut {
            device_id: id,
            code: code.to_string(),
            value: value.to_string(),
        })
        .await;
        Ok(())
    }

    /// Translate a hub-side value for the port's kind and send it.
    ///
    /// Returns the value written to the device.
    ///
    /// # Errors
    ///
    /// Same as [`send_command`](Self::send_command).
    pub async fn send_hub_value(
        &self,
        id: DeviceId,
        code: &str,
        value: &Value,
    ) -> Result<String, BridgeError> {
        let kind = match self.get_client(id).await {
            Some(link) => link.get_port(code).await.and_then(|port| port.kind),
            None => None,
        };
        let device_value = ValueMapper::to_device(kind.as_ref(), value);
        self.send_command(id, code, &device_value).await?;
        Ok(device_value)
    }

    /// Persist and fan out one link event.
    ///
    /// # Errors
    ///
    /// Returns a storage error; hub failures are only logged.
    pub async fn handle_event(&self, event: LinkEvent) -> Result<(), BridgeError> {
        match event {
            LinkEvent::Connected { device_id } => self.record_status(device_id, true).await,
            LinkEvent::Disconnected { device_id } => self.record_status(device_id, false).await,
            LinkEvent::InitialPorts { device_id, ports } => {
                let count = ports.len();
                self.ports.upsert_many(ports).await?;
                tracing::debug!(%device_id, count, "initial ports stored");
                Ok(())
            }
            LinkEvent::Value { device_id, port } => {
                self.ports.upsert(port.clone()).await?;
                self.devices.set_status(device_id, true, now()).await?;
                if let Err(err) = self.sync.publish_value(&port).await {
                    tracing::debug!(%device_id, code = %port.code, %err, "hub state update failed");
                }
                let raw = port.value.clone().unwrap_or(Value::Null);
                self.publish(EventKind::PortIn {
                    device_id,
                    value: ValueMapper::to_hub(port.kind.as_ref(), &raw),
                    value_raw: raw,
                    code: port.code,
                    direction: port.direction,
                    kind: port.kind,
                })
                .await;
                Ok(())
            }
        }
    }

    async fn record_status(&self, device_id: DeviceId, online: bool) -> Result<(), BridgeError> {
        let at = now();
        self.devices.set_status(device_id, online, at).await?;
        self.publish(EventKind::DeviceStatus {
            device_id,
            online,
            last_seen: Some(at),
        })
        .await;
        Ok(())
    }

    /// Consume link events until the registry is dropped.
    ///
    /// Only the first caller gets the event stream.
    pub async fn run_events(&self) {
        let Some(mut rx) = self.link_rx.lock().await.take() else {
            tracing::warn!("link event loop already running");
            return;
        };
        while let Some(event) = rx.recv().await {
            if let Err(err) = self.handle_event(event).await {
                tracing::warn!(%err, "failed to handle link event");
            }
        }
    }

    /// Stop every link.
    pub async fn shutdown(&self) {
        let links: Vec<_> = self.links.lock().await.drain().map(|(_, link)| link).collect();
        for link in links {
            link.stop().await;
        }
        tracing::info!("all device links stopped");
    }
}

impl<A, DR, PR, H, E> DeviceBookkeeping for DeviceRegistry<A, DR, PR, H, E>
where
    A: DeviceApi,
    DR: DeviceRepository,
    PR: PortRepository,
    H: HubClient,
    E: EventPublisher,
{
    async fn record<F>(&self, id: DeviceId, record: F) -> Result<(), BridgeError>
    where
        F: FnOnce(&mut DeviceParams) + Send + 'static,
    {
        let links = self.links.lock().await;
        let mut device = self.stored(id).await?;
        record(&mut device.params);
        let device = self.devices.update(device).await?;
        if let Some(link) = links.get(&id) {
            link.refresh_params(device.params).await;
        }
        Ok(())
    }
}
