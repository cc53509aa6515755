//! Devices: network-attached controllers exposing ports.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{BridgeError, ValidationError};
use crate::id::DeviceId;
use crate::time::Timestamp;

/// A managed controller, as persisted and as exposed to the API layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    /// Stable hardware code reported by the controller (chip id).
    pub code: String,
    pub name: String,
    pub model: Option<String>,
    pub vendor: Option<String>,
    /// Free-form hardware type reported by the controller.
    pub kind: Option<String>,
    pub description: Option<String>,
    pub params: DeviceParams,
    pub online: bool,
    pub last_seen: Option<Timestamp>,
}

impl Device {
    /// Create a builder for constructing a [`Device`].
    #[must_use]
    pub fn builder() -> DeviceBuilder {
        DeviceBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Validation`] when the name or code is empty or
    /// no IP address is configured.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if self.code.trim().is_empty() {
            return Err(ValidationError::EmptyCode.into());
        }
        if self.params.ip.trim().is_empty() {
            return Err(ValidationError::MissingIp.into());
        }
        Ok(())
    }

    /// IP address the device is reachable at.
    #[must_use]
    pub fn ip(&self) -> &str {
        &self.params.ip
    }

    /// Apply a partial update and report whether the IP address changed.
    ///
    /// The device is left untouched when the patched result is invalid.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Validation`] if the patch breaks an invariant.
    pub fn apply_patch(&mut self, patch: DevicePatch) -> Result<bool, BridgeError> {
        let mut next = self.clone();
        if let Some(name) = patch.name {
            next.name = name;
        }
        if patch.model.is_some() {
            next.model = patch.model;
        }
        if patch.vendor.is_some() {
            next.vendor = patch.vendor;
        }
        if patch.kind.is_some() {
            next.kind = patch.kind;
        }
        if patch.description.is_some() {
            next.description = patch.description;
        }
        if let Some(params) = patch.params {
            next.params.merge(params);
        }
        next.validate()?;

        let ip_changed = next.params.ip != self.params.ip;
        *self = next;
        Ok(ip_changed)
    }

    /// Refresh descriptive fields from a `/info` response.
    pub fn apply_info(&mut self, info: &DeviceInfo) {
        if let Some(name) = info.name.as_ref().filter(|name| !name.is_empty()) {
            self.name.clone_from(name);
        }
        if info.config_name.is_some() {
            self.model.clone_from(&info.config_name);
        }
        if info.fr_name.is_some() {
            self.vendor.clone_from(&info.fr_name);
        }
        if info.flash_chip_revision.is_some() {
            self.kind.clone_from(&info.flash_chip_revision);
        }
        for (slot, value) in [
            (&mut self.params.mac, &info.mac),
            (&mut self.params.ssid, &info.ssid),
            (&mut self.params.version, &info.version),
            (&mut self.params.flash_date, &info.flash_date),
        ] {
            if value.is_some() {
                slot.clone_from(value);
            }
        }
    }

    /// Snapshot exposed to the API layer, with the live connection flag.
    #[must_use]
    pub fn meta(&self, online: bool) -> DeviceMeta {
        DeviceMeta {
            device_id: self.id,
            code: self.code.clone(),
            name: self.name.clone(),
            model: self.model.clone(),
            vendor: self.vendor.clone(),
            kind: self.kind.clone(),
            description: self.description.clone(),
            online,
            ip: self.params.ip.clone(),
            params: self.params.clone(),
        }
    }
}

/// Typed device settings with an opaque bag for unknown keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceParams {
    pub ip: String,
    /// Take periodic configuration backups.
    pub backup_config: bool,
    /// Export remote log files periodically.
    pub save_logs: bool,
    /// Delete remote log files once exported.
    pub remove_logs: bool,
    pub logs_method: LogsMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_backup_time: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_backup_check: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_backup_files_count: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub uploaded_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_logs_export: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_logs_export_count: Option<usize>,
    /// Settings this version does not know about, kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for DeviceParams {
    fn default() -> Self {
        Self {
            ip: String::new(),
            backup_config: false,
            save_logs: false,
            remove_logs: true,
            logs_method: LogsMethod::default(),
            entity_prefix: None,
            mac: None,
            ssid: None,
            version: None,
            flash_date: None,
            last_backup_time: None,
            last_backup_check: None,
            last_backup_files_count: None,
            uploaded_files: Vec::new(),
            last_logs_export: None,
            last_logs_export_count: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl DeviceParams {
    /// Merge a partial update. A `null` extra value removes the key.
    pub fn merge(&mut self, patch: DeviceParamsPatch) {
        if let Some(ip) = patch.ip {
            self.ip = ip;
        }
        if let Some(value) = patch.backup_config {
            self.backup_config = value;
        }
        if let Some(value) = patch.save_logs {
            self.save_logs = value;
        }
        if let Some(value) = patch.remove_logs {
            self.remove_logs = value;
        }
        if let Some(value) = patch.logs_method {
            self.logs_method = value;
        }
        if let Some(prefix) = patch.entity_prefix {
            self.entity_prefix = Some(prefix).filter(|p| !p.is_empty());
        }
        for (key, value) in patch.extra {
            if value.is_null() {
                self.extra.remove(&key);
            } else {
                self.extra.insert(key, value);
            }
        }
    }
}

/// Where exported remote logs are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogsMethod {
    /// Append to a local file per remote log name.
    #[default]
    LocalSave,
    /// A method this bridge does not implement; exports are skipped.
    #[serde(other)]
    Unsupported,
}

/// Partial update of a [`Device`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DevicePatch {
    pub name: Option<String>,
    pub model: Option<String>,
    pub vendor: Option<String>,
    pub kind: Option<String>,
    pub description: Option<String>,
    pub params: Option<DeviceParamsPatch>,
}

/// Partial update of [`DeviceParams`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceParamsPatch {
    pub ip: Option<String>,
    pub backup_config: Option<bool>,
    pub save_logs: Option<bool>,
    pub remove_logs: Option<bool>,
    pub logs_method: Option<LogsMethod>,
    pub entity_prefix: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Identity document returned by a device's `/info` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    #[serde(deserialize_with = "string_or_number")]
    pub chip_id: Option<String>,
    pub name: Option<String>,
    pub config_name: Option<String>,
    pub fr_name: Option<String>,
    pub mac: Option<String>,
    pub ssid: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub version: Option<String>,
    pub flash_date: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub flash_chip_revision: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Read-only view of a device as served to the API layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceMeta {
    pub device_id: DeviceId,
    pub code: String,
    pub name: String,
    pub model: Option<String>,
    pub vendor: Option<String>,
    pub kind: Option<String>,
    pub description: Option<String>,
    pub online: bool,
    pub ip: String,
    pub params: DeviceParams,
}

/// Step-by-step builder for [`Device`].
#[derive(Debug, Default)]
pub struct DeviceBuilder {
    id: Option<DeviceId>,
    code: Option<String>,
    name: Option<String>,
    model: Option<String>,
    vendor: Option<String>,
    kind: Option<String>,
    description: Option<String>,
    params: Option<DeviceParams>,
    ip: Option<String>,
}

impl DeviceBuilder {
    #[must_use]
    pub fn id(mut self, id: DeviceId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    #[must_use]
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn params(mut self, params: DeviceParams) -> Self {
        self.params = Some(params);
        self
    }

    /// Shortcut overriding `params.ip`.
    #[must_use]
    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// Consume the builder, validate, and return a [`Device`].
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Validation`] if the name, code or IP is missing.
    pub fn build(self) -> Result<Device, BridgeError> {
        let mut params = self.params.unwrap_or_default();
        if let Some(ip) = self.ip {
            params.ip = ip;
        }
        let device = Device {
            id: self.id.unwrap_or_default(),
            code: self.code.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            model: self.model,
            vendor: self.vendor,
            kind: self.kind,
            description: self.description,
            params,
            online: false,
            last_seen: None,
        };
        device.validate()?;
        Ok(device)
    }
}
