//! Port sync engine: keeps the hub's entities in line with the publish flags.
//!
//! The desired set is every port whose params say `hub_published`; the
//! actual set is every hub entity inside the bridge's [`EntityNamespace`].
//! A forced sync computes a [`SyncPlan`] between the two and applies it
//! (creates, then deletes, then attribute updates), collecting per-item
//! failures in the [`SyncReport`] instead of aborting.
//!
//! Between syncs, an in-memory cache of published ports answers the hot
//! path: "is this port published, and under which entity id?".

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::RwLock;

use portbridge_domain::device::Device;
use portbridge_domain::entity::{EntityNamespace, HubEntity, HubEntityId};
use portbridge_domain::error::{BridgeError, ConflictError, NotFoundError};
use portbridge_domain::id::DeviceId;
use portbridge_domain::port::{Direction, Port, PortKind};
use portbridge_domain::sync_plan::{DesiredEntity, EntityAttributes, SyncPlan, SyncReport};
use portbridge_domain::time::{Timestamp, now};
use portbridge_domain::value::ValueMapper;

use crate::ports::{DeviceRepository, HubClient, PortRepository};

/// State reported for an entity whose port has no value yet.
const UNKNOWN_STATE: &str = "unknown";

/// What the engine remembers about one published port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPort {
    pub device_id: DeviceId,
    pub port_code: String,
    pub entity_id: HubEntityId,
    pub kind: Option<PortKind>,
    pub direction: Option<Direction>,
    pub attributes: EntityAttributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    pub published_ports: usize,
    pub refreshed_at: Option<Timestamp>,
}

#[derive(Default)]
struct PublishedCache {
    by_port: HashMap<(DeviceId, String), PublishedPort>,
    by_entity: HashMap<HubEntityId, (DeviceId, String)>,
    refreshed_at: Option<Timestamp>,
}

/// Clears the in-progress flag when a sync ends, however it ends.
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Reconciles published ports with hub entities.
pub struct PortSyncEngine<H, DR, PR> {
    hub: H,
    devices: Arc<DR>,
    ports: Arc<PR>,
    namespace: EntityNamespace,
    in_progress: AtomicBool,
    cache: RwLock<PublishedCache>,
}

impl<H, DR, PR> PortSyncEngine<H, DR, PR>
where
    H: HubClient,
    DR: DeviceRepository,
    PR: PortRepository,
{
    pub fn new(hub: H, devices: Arc<DR>, ports: Arc<PR>, namespace: EntityNamespace) -> Self {
        Self {
            hub,
            devices,
            ports,
            namespace,
            in_progress: AtomicBool::new(false),
            cache: RwLock::new(PublishedCache::default()),
        }
    }

    pub fn hub(&self) -> &H {
        &self.hub
    }

    #[must_use]
    pub fn namespace(&self) -> &EntityNamespace {
        &self.namespace
    }

    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Published ports paired with the entity they should become.
    async fn load_published(&self) -> Result<Vec<(DesiredEntity, Port)>, BridgeError> {
        let devices: HashMap<DeviceId, Device> = self
            .devices
            .get_all()
            .await?
            .into_iter()
            .map(|device| (device.id, device))
            .collect();
        let mut published = Vec::new();
        for port in self.ports.list_published().await? {
            let Some(device) = devices.get(&port.device_id) else {
                tracing::warn!(device_id = %port.device_id, code = %port.code, "published port without device");
                continue;
            };
            published.push((DesiredEntity::for_port(&self.namespace, device, &port), port));
        }
        Ok(published)
    }

    /// Reload the published-port cache from storage.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the repositories.
    pub async fn refresh_cache(&self) -> Result<usize, BridgeError> {
        let published = self.load_published().await?;
        let mut cache = PublishedCache {
            refreshed_at: Some(now()),
            ..PublishedCache::default()
        };
        for (desired, port) in published {
            let key = (port.device_id, port.code.clone());
            cache
                .by_entity
                .entry(desired.entity_id.clone())
                .or_insert_with(|| key.clone());
            cache.by_port.insert(
                key,
                PublishedPort {
                    device_id: port.device_id,
                    port_code: port.code,
                    entity_id: desired.entity_id,
                    kind: port.kind,
                    direction: port.direction,
                    attributes: desired.attributes,
                },
            );
        }
        let count = cache.by_port.len();
        *self.cache.write().await = cache;
        tracing::debug!(published = count, "published port cache refreshed");
        Ok(count)
    }

    pub async fn cache_status(&self) -> CacheStatus {
        let cache = self.cache.read().await;
        CacheStatus {
            published_ports: cache.by_port.len(),
            refreshed_at: cache.refreshed_at,
        }
    }

    /// The published port behind a hub entity id, if any.
    pub async fn resolve_entity(&self, entity_id: &HubEntityId) -> Option<PublishedPort> {
        let cache = self.cache.read().await;
        let key = cache.by_entity.get(entity_id)?;
        cache.by_port.get(key).cloned()
    }

    pub async fn published_port(&self, device_id: DeviceId, code: &str) -> Option<PublishedPort> {
        self.cache
            .read()
            .await
            .by_port
            .get(&(device_id, code.to_string()))
            .cloned()
    }

    /// Full reconciliation of the hub with the published ports.
    ///
    /// # Errors
    ///
    /// Returns [`ConflictError::SyncInProgress`] when another sync is
    /// running, [`BridgeError::Unavailable`] when the hub state cannot be
    /// read, or a storage error. Failures of single entities are reported
    /// in [`SyncReport::errors`] instead.
    #[tracing::instrument(skip(self))]
    pub async fn force_sync(&self) -> Result<SyncReport, BridgeError> {
        let _guard = SyncGuard::acquire(&self.in_progress).ok_or(ConflictError::SyncInProgress)?;

        let published = self.load_published().await?;
        let actual: Vec<HubEntity> = self
            .hub
            .get_states()
            .await?
            .into_iter()
            .filter(|entity| self.namespace.contains(&entity.entity_id))
            .collect();

        let mut ports: HashMap<HubEntityId, Port> = HashMap::new();
        let mut desired = Vec::with_capacity(published.len());
        for (entity, port) in published {
            ports.entry(entity.entity_id.clone()).or_insert(port);
            desired.push(entity);
        }
        let plan = SyncPlan::compute(desired, actual);
        tracing::debug!(
            create = plan.to_create.len(),
            delete = plan.to_delete.len(),
            update = plan.to_update.len(),
            "sync plan computed"
        );

        let mut report = SyncReport::default();
        for entity_id in &plan.collisions {
            report
                .errors
                .push(format!("{entity_id}: derived by more than one port"));
        }

        for entity in plan.to_create {
            let Some(port) = ports.get(&entity.entity_id) else {
                continue;
            };
            let state = hub_state(port);
            match self
                .hub
                .set_state(&entity.entity_id, &state, entity.attributes.to_map())
                .await
            {
                Ok(()) => {
                    report.created += 1;
                    if let Err(err) = self.remember_entity_id(port, &entity.entity_id).await {
                        report.errors.push(format!("{}: {err}", entity.entity_id));
                    }
                }
                Err(err) => report.errors.push(format!("{}: {err}", entity.entity_id)),
            }
        }

        for entity_id in plan.to_delete {
            match self.hub.remove_entity(&entity_id).await {
                Ok(()) => report.deleted += 1,
                Err(err) => report.errors.push(format!("{entity_id}: {err}")),
            }
        }

        for update in plan.to_update {
            let entity_id = &update.desired.entity_id;
            let attributes = update.desired.attributes.merge_into(update.current.attributes);
            match self
                .hub
                .set_state(entity_id, &update.current.state, attributes)
                .await
            {
                Ok(()) => report.updated += 1,
                Err(err) => report.errors.push(format!("{entity_id}: {err}")),
            }
        }

        report.total_published = match self.refresh_cache().await {
            Ok(count) => count,
            Err(err) => {
                report.errors.push(format!("cache refresh: {err}"));
                0
            }
        };
        tracing::info!(
            created = report.created,
            deleted = report.deleted,
            updated = report.updated,
            errors = report.errors.len(),
            "hub sync finished"
        );
        Ok(report)
    }

    async fn remember_entity_id(
        &self,
        port: &Port,
        entity_id: &HubEntityId,
    ) -> Result<(), BridgeError> {
        if port.params.hub_entity_id.as_ref() == Some(entity_id) {
            return Ok(());
        }
        let mut params = port.params.clone();
        params.hub_entity_id = Some(entity_id.clone());
        self.ports
            .save_params(port.device_id, &port.code, params)
            .await
    }

    /// Push a fresh port value to the hub if the port is published.
    ///
    /// Returns `false` without contacting the hub for unpublished ports.
    ///
    /// # Errors
    ///
    /// Returns the hub error when the state update fails.
    pub async fn publish_value(&self, port: &Port) -> Result<bool, BridgeError> {
        let Some(published) = self.published_port(port.device_id, &port.code).await else {
            return Ok(false);
        };
        let mut port = port.clone();
        if port.kind.is_none() {
            port.kind = published.kind.clone();
        }
        self.hub
            .set_state(
                &published.entity_id,
                &hub_state(&port),
                published.attributes.to_map(),
            )
            .await?;
        Ok(true)
    }

    /// Flip the publish flag of a port and refresh the cache.
    ///
    /// The hub itself is only touched by the next sync.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotFound`] for an unknown device or port,
    /// [`ConflictError::EntityCollision`] when the entity id is already
    /// used by another published port, or a storage error.
    #[tracing::instrument(skip(self))]
    pub async fn set_published(
        &self,
        device_id: DeviceId,
        code: &str,
        published: bool,
    ) -> Result<Port, BridgeError> {
        let device = self
            .devices
            .get_by_id(device_id)
            .await?
            .ok_or_else(|| NotFoundError {
                entity: "Device",
                id: device_id.to_string(),
            })?;
        let mut port = self
            .ports
            .get(device_id, code)
            .await?
            .ok_or_else(|| NotFoundError {
                entity: "Port",
                id: format!("{device_id}/{code}"),
            })?;

        if published {
            let entity_id = self.namespace.entity_id_for(&device, &port);
            let owner = self.cache.read().await.by_entity.get(&entity_id).cloned();
            if owner.is_some_and(|owner| owner != (device_id, code.to_string())) {
                return Err(ConflictError::EntityCollision {
                    entity_id: entity_id.to_string(),
                }
                .into());
            }
            port.params.hub_published = true;
            port.params.hub_entity_id = Some(entity_id);
        } else {
            port.params.hub_published = false;
            port.params.hub_entity_id = None;
        }
        self.ports
            .save_params(device_id, code, port.params.clone())
            .await?;
        self.refresh_cache().await?;
        Ok(port)
    }
}

fn hub_state(port: &Port) -> String {
    port.value.as_ref().map_or_else(
        || UNKNOWN_STATE.to_string(),
        |value| ValueMapper::to_hub(port.kind.as_ref(), value),
    )
}
