//! Bridge events pushed to observers (UI, logs) through the broadcast sink.
//!
//! Serialised as `{"id", "ts", "type", "action", "data"}` so that a
//! subscriber can route on `type`/`action` without knowing every payload.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::backup::{BackupOutcome, LogsExportOutcome};
use crate::device::DeviceMeta;
use crate::id::{DeviceId, EventId};
use crate::port::{Direction, PortKind};
use crate::sync_plan::SyncReport;
use crate::time::{Timestamp, now};

/// Something observers may want to know about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventKind {
    DeviceStatus {
        device_id: DeviceId,
        online: bool,
        last_seen: Option<Timestamp>,
    },
    DeviceUpdated {
        device: Box<DeviceMeta>,
    },
    PortIn {
        device_id: DeviceId,
        code: String,
        /// Value as the hub would show it.
        value: String,
        value_raw: Value,
        direction: Option<Direction>,
        kind: Option<PortKind>,
    },
    PortOut {
        device_id: DeviceId,
        code: String,
        value: String,
    },
    BackupCompleted {
        device_id: DeviceId,
        outcome: BackupOutcome,
    },
    LogsExported {
        device_id: DeviceId,
        outcome: LogsExportOutcome,
    },
    HubStatus {
        connected: bool,
        authenticated: bool,
    },
    SyncCompleted {
        report: SyncReport,
    },
}

impl EventKind {
    /// `(type, action)` pair used for routing.
    #[must_use]
    pub fn topic(&self) -> (&'static str, &'static str) {
        match self {
            Self::DeviceStatus { .. } => ("device", "status_update"),
            Self::DeviceUpdated { .. } => ("device", "update"),
            Self::PortIn { .. } => ("port", "in"),
            Self::PortOut { .. } => ("port", "out"),
            Self::BackupCompleted { .. } => ("backup", "completed"),
            Self::LogsExported { .. } => ("logs", "exported"),
            Self::HubStatus { .. } => ("hub", "status"),
            Self::SyncCompleted { .. } => ("sync", "completed"),
        }
    }
}

/// An immutable, timestamped notification.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeEvent {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub kind: EventKind,
}

impl BridgeEvent {
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: EventId::new(),
            timestamp: now(),
            kind,
        }
    }
}

impl Serialize for BridgeEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (topic, action) = self.kind.topic();
        let mut map = serializer.serialize_map(Some(5))?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("ts", &self.timestamp)?;
        map.serialize_entry("type", topic)?;
        map.serialize_entry("action", action)?;
        map.serialize_entry("data", &self.kind)?;
        map.end()
    }
}
