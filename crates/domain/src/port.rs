//! Ports: addressable input/output points of a device.
//!
//! Ports come from two places: the flattened `/values` document fetched on
//! bootstrap, and `code#value` stream lines that mention a code the device
//! never listed (virtual ports).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::HubEntityId;
use crate::id::DeviceId;
use crate::time::Timestamp;

/// Keys of a `/values` item that map onto [`Port`] fields.
const KNOWN_ITEM_KEYS: [&str; 8] = ["code", "title", "type", "val", "unit", "mqtt", "href", "data"];

/// Item type the device uses for file listings rather than ports.
const FILE_LIST_TYPE: &str = "file_list";

/// Data flow direction of a port, the part before the `.` of its type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Direction {
    In,
    Out,
    Other(String),
}

impl Direction {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::In => "in",
            Self::Out => "out",
            Self::Other(value) => value,
        }
    }
}

impl From<String> for Direction {
    fn from(value: String) -> Self {
        match value.as_str() {
            "in" => Self::In,
            "out" => Self::Out,
            _ => Self::Other(value),
        }
    }
}

impl From<Direction> for String {
    fn from(value: Direction) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value kind of a port, the part after the `.` of its type
/// (`analog`, `switch`, `pwm`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortKind(String);

impl PortKind {
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-port settings, including the hub publication state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortParams {
    /// The port should exist as an entity in the hub.
    pub hub_published: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub_entity_id: Option<HubEntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A device port with its last known value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub device_id: DeviceId,
    pub code: String,
    pub title: Option<String>,
    pub direction: Option<Direction>,
    pub kind: Option<PortKind>,
    /// Compound type string as sent by the device (`in.analog`).
    pub type_raw: Option<String>,
    #[serde(rename = "val")]
    pub value: Option<Value>,
    pub unit: Option<String>,
    pub mqtt: Option<String>,
    pub href: Option<String>,
    pub group_title: Option<String>,
    pub group_href: Option<String>,
    /// Created from a stream line rather than from `/values`.
    #[serde(rename = "virtual")]
    pub is_virtual: bool,
    /// Keys of the device item this model does not know about.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
    #[serde(default)]
    pub params: PortParams,
    pub updated_at: Timestamp,
}

impl Port {
    /// Synthesize a port for a code that only appeared on the stream.
    #[must_use]
    pub fn new_virtual(device_id: DeviceId, code: impl Into<String>, value: Value, now: Timestamp) -> Self {
        Self {
            device_id,
            code: code.into(),
            title: None,
            direction: None,
            kind: None,
            type_raw: None,
            value: Some(value),
            unit: None,
            mqtt: None,
            href: None,
            group_title: None,
            group_href: None,
            is_virtual: true,
            extra: Map::new(),
            params: PortParams::default(),
            updated_at: now,
        }
    }

    /// Record a new value, leaving identity and type untouched.
    pub fn apply_value(&mut self, value: Value, now: Timestamp) {
        self.value = Some(value);
        self.updated_at = now;
    }

    /// Value rendered as the plain text the device would send.
    #[must_use]
    pub fn value_text(&self) -> Option<String> {
        self.value.as_ref().map(value_to_text)
    }

    /// Human readable name, falling back to the code.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.title
            .as_deref()
            .filter(|title| !title.is_empty())
            .unwrap_or(&self.code)
    }
}

/// Render a JSON value the way it appears on the device stream.
#[must_use]
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Split a compound type (`in.analog`) on the first `.`.
///
/// Returns `None` when there is no separator; either side is `None` when
/// empty.
#[must_use]
pub fn split_type(type_raw: &str) -> Option<(Option<&str>, Option<&str>)> {
    let (direction, kind) = type_raw.split_once('.')?;
    Some((
        Some(direction).filter(|s| !s.is_empty()),
        Some(kind).filter(|s| !s.is_empty()),
    ))
}

/// Flatten a `/values` document into a port list.
///
/// Accepts either a bare array of items or an object holding the items
/// under `data`. Items that carry their own `data` array are groups: their
/// title and href are inherited by each child. File listings, items
/// without a code and items whose type has no direction are dropped.
#[must_use]
pub fn flatten_values(device_id: DeviceId, document: &Value, now: Timestamp) -> Vec<Port> {
    let items = match document {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("data") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        _ => &[],
    };

    let mut ports = Vec::new();
    for item in items {
        if item.get("type").and_then(Value::as_str) == Some(FILE_LIST_TYPE) {
            continue;
        }
        match item.get("data") {
            Some(Value::Array(children)) => {
                let group = Group {
                    title: string_field(item, "title"),
                    href: string_field(item, "href"),
                };
                for child in children {
                    if let Some(port) = port_from_item(device_id, child, Some(&group), now) {
                        ports.push(port);
                    }
                }
            }
            _ => {
                if let Some(port) = port_from_item(device_id, item, None, now) {
                    ports.push(port);
                }
            }
        }
    }
    ports
}

struct Group {
    title: Option<String>,
    href: Option<String>,
}

fn port_from_item(device_id: DeviceId, item: &Value, group: Option<&Group>, now: Timestamp) -> Option<Port> {
    let object = item.as_object()?;
    let code = string_field(item, "code").filter(|code| !code.is_empty())?;
    let type_raw = string_field(item, "type");
    let (direction, kind) = split_type(type_raw.as_deref()?)?;
    let direction = Direction::from(direction?.to_string());
    let kind = kind.map(PortKind::new);

    let extra = object
        .iter()
        .filter(|(key, _)| !KNOWN_ITEM_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Some(Port {
        device_id,
        code,
        title: string_field(item, "title"),
        direction: Some(direction),
        kind,
        value: object.get("val").filter(|v| !v.is_null()).cloned(),
        unit: string_field(item, "unit"),
        mqtt: string_field(item, "mqtt"),
        href: string_field(item, "href")
            .filter(|href| !href.is_empty())
            .or_else(|| group.and_then(|g| g.href.clone())),
        group_title: group.and_then(|g| g.title.clone()),
        group_href: group.and_then(|g| g.href.clone()),
        type_raw,
        is_virtual: false,
        extra,
        params: PortParams::default(),
        updated_at: now,
    })
}

fn string_field(item: &Value, key: &str) -> Option<String> {
    match item.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One `code#value` line received from a device stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub code: String,
    pub value: String,
}

impl StreamEvent {
    /// Parse a stream line, splitting on the first `#`.
    ///
    /// Lines without a separator or with an empty code yield `None`.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let (code, value) = line.split_once('#')?;
        let code = code.trim();
        if code.is_empty() {
            return None;
        }
        Some(Self {
            code: code.to_string(),
            value: value.trim().to_string(),
        })
    }

    /// Encode a command line for the device.
    #[must_use]
    pub fn encode(code: &str, value: &str) -> String {
        format!("{code}#{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts() -> Timestamp {
        crate::time::now()
    }

    #[test]
    fn should_flatten_single_analog_input() {
        let device_id = DeviceId::new();
        let doc = json!({"data": [{"code": "t1", "type": "in.analog", "val": "21.5"}]});

        let ports = flatten_values(device_id, &doc, ts());

        assert_eq!(ports.len(), 1);
        let port = &ports[0];
        assert_eq!(port.code, "t1");
        assert_eq!(port.direction, Some(Direction::In));
        assert_eq!(port.kind, Some(PortKind::new("analog")));
        assert_eq!(port.value, Some(json!("21.5")));
        assert!(!port.is_virtual);
    }

    #[test]
    fn should_inherit_group_title_and_href_when_item_is_nested() {
        let doc = json!([
            {"title": "NTC 0", "href": "/#ntc", "data": [
                {"code": "analog-34", "type": "in.analog", "val": 3.1, "unit": "Ohm"},
                {"code": "relay-1", "type": "out.switch", "val": 0, "href": "/#own"}
            ]}
        ]);

        let ports = flatten_values(DeviceId::new(), &doc, ts());

        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].group_title.as_deref(), Some("NTC 0"));
        assert_eq!(ports[0].href.as_deref(), Some("/#ntc"));
        assert_eq!(ports[0].unit.as_deref(), Some("Ohm"));
        assert_eq!(ports[1].href.as_deref(), Some("/#own"));
        assert_eq!(ports[1].group_href.as_deref(), Some("/#ntc"));
    }

    #[test]
    fn should_skip_file_lists_and_items_without_direction() {
        let doc = json!([
            {"code": "files", "type": "file_list"},
            {"code": "label", "type": "text"},
            {"type": "in.analog", "val": 1},
            {"code": "", "type": "in.analog"},
            {"code": "ok", "type": "out.pwm", "val": 128}
        ]);

        let ports = flatten_values(DeviceId::new(), &doc, ts());

        let codes: Vec<&str> = ports.iter().map(|p| p.code.as_str()).collect();
        assert_eq!(codes, vec!["ok"]);
    }

    #[test]
    fn should_keep_unknown_item_keys_in_extra() {
        let doc = json!([{"code": "x", "type": "in.text", "min": 0, "max": 10}]);

        let ports = flatten_values(DeviceId::new(), &doc, ts());

        assert_eq!(ports[0].extra.len(), 2);
        assert_eq!(ports[0].extra["max"], 10);
    }

    #[test]
    fn should_leave_kind_empty_when_type_ends_with_separator() {
        assert_eq!(split_type("in."), Some((Some("in"), None)));
        assert_eq!(split_type("in.analog.fast"), Some((Some("in"), Some("analog.fast"))));
        assert_eq!(split_type("analog"), None);
    }

    #[test]
    fn should_return_empty_list_when_document_has_no_items() {
        assert!(flatten_values(DeviceId::new(), &json!({"status": "ok"}), ts()).is_empty());
        assert!(flatten_values(DeviceId::new(), &json!("nope"), ts()).is_empty());
    }

    #[test]
    fn should_parse_stream_line_on_first_separator() {
        let event = StreamEvent::parse(" t1 # 22.0 ").unwrap();
        assert_eq!(event.code, "t1");
        assert_eq!(event.value, "22.0");

        let event = StreamEvent::parse("msg#a#b").unwrap();
        assert_eq!(event.value, "a#b");
    }

    #[test]
    fn should_discard_stream_line_when_separator_or_code_missing() {
        assert!(StreamEvent::parse("t1 22.0").is_none());
        assert!(StreamEvent::parse("  #22.0").is_none());
    }

    #[test]
    fn should_encode_command_line() {
        assert_eq!(StreamEvent::encode("relay-1", "1"), "relay-1#1");
    }

    #[test]
    fn should_keep_kind_and_direction_when_value_applied() {
        let doc = json!([{"code": "t1", "type": "in.analog", "val": "21.5"}]);
        let mut port = flatten_values(DeviceId::new(), &doc, ts()).remove(0);

        port.apply_value(json!("22.0"), ts());

        assert_eq!(port.value_text().as_deref(), Some("22.0"));
        assert_eq!(port.direction, Some(Direction::In));
        assert_eq!(port.kind, Some(PortKind::new("analog")));
    }

    #[test]
    fn should_serialize_value_as_val() {
        let port = Port::new_virtual(DeviceId::new(), "v1", json!("on"), ts());
        let json = serde_json::to_value(&port).unwrap();
        assert_eq!(json["val"], "on");
        assert_eq!(json["virtual"], true);
    }
}
