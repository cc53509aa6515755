//! Hub entities: the hub-side representation of published ports.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::device::Device;
use crate::port::{Direction, Port};
use crate::value::KindGroup;

/// Fully qualified hub entity id (`sensor.myhome_a1b2_t1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HubEntityId(String);

impl HubEntityId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build `"{domain}.{prefix}_{code}"` with both segments cleaned.
    #[must_use]
    pub fn derive(domain: EntityDomain, prefix: &str, code: &str) -> Self {
        Self(format!(
            "{}.{}_{}",
            domain.as_str(),
            clean_segment(prefix),
            clean_segment(code)
        ))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Part before the first `.` (`sensor`).
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.split_once('.').map_or("", |(domain, _)| domain)
    }

    /// Part after the first `.`.
    #[must_use]
    pub fn object_id(&self) -> &str {
        self.0.split_once('.').map_or(self.0.as_str(), |(_, object)| object)
    }
}

impl fmt::Display for HubEntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hub domains this bridge creates entities in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityDomain {
    Switch,
    BinarySensor,
    Sensor,
}

impl EntityDomain {
    pub const MANAGED: [Self; 3] = [Self::Switch, Self::BinarySensor, Self::Sensor];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Switch => "switch",
            Self::BinarySensor => "binary_sensor",
            Self::Sensor => "sensor",
        }
    }

    /// Switch-like outputs are switches, switch-like inputs binary sensors,
    /// everything else a sensor.
    #[must_use]
    pub fn for_port(port: &Port) -> Self {
        let switch_like = match KindGroup::of(port.kind.as_ref()) {
            KindGroup::Switch => true,
            KindGroup::Other if port.kind.is_none() => port.code.to_lowercase().contains("switch"),
            _ => false,
        };
        match (switch_like, port.direction.as_ref()) {
            (true, Some(Direction::In)) => Self::BinarySensor,
            (true, _) => Self::Switch,
            (false, _) => Self::Sensor,
        }
    }
}

/// Lowercase and replace every non-alphanumeric char with `_`.
#[must_use]
pub fn clean_segment(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// The slice of hub entity ids this bridge owns.
///
/// An entity belongs to the namespace when it lives in one of the
/// [`EntityDomain::MANAGED`] domains and its object id starts with
/// `"{namespace}_"`. Entities outside it are never touched by sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityNamespace {
    prefix: String,
}

impl EntityNamespace {
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: clean_segment(prefix),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Prefix used for every entity of `device`.
    ///
    /// A custom `entity_prefix` is honoured but forced into the namespace.
    #[must_use]
    pub fn device_prefix(&self, device: &Device) -> String {
        let marker = format!("{}_", self.prefix);
        match device.params.entity_prefix.as_deref().map(clean_segment) {
            Some(custom) if custom.starts_with(&marker) => custom,
            Some(custom) if !custom.is_empty() => format!("{marker}{custom}"),
            _ => format!("{marker}{}", clean_segment(&device.code)),
        }
    }

    /// Entity id a port should be published under.
    ///
    /// A previously stored id is kept as long as it is inside the namespace.
    #[must_use]
    pub fn entity_id_for(&self, device: &Device, port: &Port) -> HubEntityId {
        if let Some(stored) = port.params.hub_entity_id.as_ref().filter(|id| self.contains(id)) {
            return stored.clone();
        }
        HubEntityId::derive(EntityDomain::for_port(port), &self.device_prefix(device), &port.code)
    }

    #[must_use]
    pub fn contains(&self, id: &HubEntityId) -> bool {
        let managed_domain = EntityDomain::MANAGED
            .iter()
            .any(|domain| domain.as_str() == id.domain());
        managed_domain
            && id
                .object_id()
                .strip_prefix(self.prefix.as_str())
                .is_some_and(|rest| rest.starts_with('_'))
    }
}

/// Entity state as reported by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubEntity {
    pub entity_id: HubEntityId,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}
