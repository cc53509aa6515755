//! Reconciliation plan between published ports and hub entities.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::device::Device;
use crate::entity::{EntityNamespace, HubEntity, HubEntityId};
use crate::id::DeviceId;
use crate::port::Port;

/// Attributes the bridge owns on a published entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntityAttributes {
    pub friendly_name: Option<String>,
    pub device_class: Option<String>,
    pub unit_of_measurement: Option<String>,
    pub icon: Option<String>,
}

impl EntityAttributes {
    const KEYS: [&'static str; 4] = ["friendly_name", "device_class", "unit_of_measurement", "icon"];

    fn values(&self) -> [Option<&String>; 4] {
        [
            self.friendly_name.as_ref(),
            self.device_class.as_ref(),
            self.unit_of_measurement.as_ref(),
            self.icon.as_ref(),
        ]
    }

    /// Read the owned attributes out of a hub attribute map.
    #[must_use]
    pub fn from_map(attributes: &Map<String, Value>) -> Self {
        let read = |key: &str| attributes.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            friendly_name: read("friendly_name"),
            device_class: read("device_class"),
            unit_of_measurement: read("unit_of_measurement"),
            icon: read("icon"),
        }
    }

    /// Overlay onto an existing attribute map. Owned attributes that are
    /// unset here are removed, foreign attributes are kept.
    #[must_use]
    pub fn merge_into(&self, mut attributes: Map<String, Value>) -> Map<String, Value> {
        for (key, value) in Self::KEYS.iter().zip(self.values()) {
            match value {
                Some(value) => {
                    attributes.insert((*key).to_string(), Value::String(value.clone()));
                }
                None => {
                    attributes.remove(*key);
                }
            }
        }
        attributes
    }

    /// Attribute map for a freshly created entity.
    #[must_use]
    pub fn to_map(&self) -> Map<String, Value> {
        self.merge_into(Map::new())
    }
}

/// A port that should exist in the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesiredEntity {
    pub entity_id: HubEntityId,
    pub device_id: DeviceId,
    pub port_code: String,
    pub attributes: EntityAttributes,
}

impl DesiredEntity {
    /// Describe how `port` of `device` should look in the hub.
    #[must_use]
    pub fn for_port(namespace: &EntityNamespace, device: &Device, port: &Port) -> Self {
        let friendly_name = port
            .params
            .friendly_name
            .clone()
            .unwrap_or_else(|| format!("{} {}", device.name, port.display_name()));
        Self {
            entity_id: namespace.entity_id_for(device, port),
            device_id: device.id,
            port_code: port.code.clone(),
            attributes: EntityAttributes {
                friendly_name: Some(friendly_name),
                device_class: port.params.device_class.clone(),
                unit_of_measurement: port
                    .params
                    .unit_of_measurement
                    .clone()
                    .or_else(|| port.unit.clone().filter(|unit| !unit.is_empty())),
                icon: port.params.icon.clone(),
            },
        }
    }
}

/// An entity that exists in both sets but whose attributes drifted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityUpdate {
    pub desired: DesiredEntity,
    pub current: HubEntity,
}

/// The create/delete/update sets for one sync run.
///
/// The three sets are disjoint by construction: creates are desired ids
/// missing from the hub, deletes are hub ids nobody desires, updates are
/// ids present on both sides.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncPlan {
    pub to_create: Vec<DesiredEntity>,
    pub to_delete: Vec<HubEntityId>,
    pub to_update: Vec<EntityUpdate>,
    /// Entity ids derived by more than one port; only the first port wins.
    pub collisions: Vec<HubEntityId>,
}

impl SyncPlan {
    /// Compute the plan from the desired entities and the hub's entities
    /// inside the managed namespace.
    #[must_use]
    pub fn compute(desired: Vec<DesiredEntity>, actual: Vec<HubEntity>) -> Self {
        let mut plan = Self::default();

        let mut wanted: BTreeMap<HubEntityId, DesiredEntity> = BTreeMap::new();
        for entity in desired {
            if wanted.contains_key(&entity.entity_id) {
                plan.collisions.push(entity.entity_id);
            } else {
                wanted.insert(entity.entity_id.clone(), entity);
            }
        }

        let mut existing: BTreeMap<HubEntityId, HubEntity> = actual
            .into_iter()
            .map(|entity| (entity.entity_id.clone(), entity))
            .collect();

        for (id, entity) in wanted {
            match existing.remove(&id) {
                None => plan.to_create.push(entity),
                Some(current) => {
                    if EntityAttributes::from_map(&current.attributes) != entity.attributes {
                        plan.to_update.push(EntityUpdate {
                            desired: entity,
                            current,
                        });
                    }
                }
            }
        }
        plan.to_delete = existing.into_keys().collect();

        plan
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty() && self.to_update.is_empty()
    }

    /// Every entity id touched by the plan, for disjointness checks.
    #[must_use]
    pub fn touched(&self) -> BTreeSet<&HubEntityId> {
        self.to_create
            .iter()
            .map(|entity| &entity.entity_id)
            .chain(self.to_delete.iter())
            .chain(self.to_update.iter().map(|update| &update.desired.entity_id))
            .collect()
    }
}

/// Outcome of applying a [`SyncPlan`]; each failed step is listed in
/// `errors` without aborting the rest of the plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub deleted: usize,
    pub updated: usize,
    pub errors: Vec<String>,
    pub total_published: usize,
}
