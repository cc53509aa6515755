//! Bidirectional value coercion between device encodings and hub states.
//!
//! Devices speak plain text on their stream (`1`, `0`, `128`, `255,0,0`);
//! the hub expects state strings (`on`, `off`, `21.5`, `#ff0000`). The
//! conversion is selected by the port kind.

use serde_json::Value;

use crate::port::{PortKind, value_to_text};

const COLOR_NAMES: [(&str, &str); 14] = [
    ("red", "#FF0000"),
    ("green", "#00FF00"),
    ("blue", "#0000FF"),
    ("white", "#FFFFFF"),
    ("black", "#000000"),
    ("yellow", "#FFFF00"),
    ("cyan", "#00FFFF"),
    ("magenta", "#FF00FF"),
    ("orange", "#FFA500"),
    ("purple", "#800080"),
    ("pink", "#FFC0CB"),
    ("brown", "#A52A2A"),
    ("gray", "#808080"),
    ("grey", "#808080"),
];

const BLACK: &str = "#000000";
const TRUTHY: [&str; 4] = ["on", "true", "1", "yes"];
const FALSY: [&str; 4] = ["off", "false", "0", "no"];

/// Families of port kinds sharing one conversion rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindGroup {
    /// `switch`, `button`, `relay`
    Switch,
    /// `sensor`, `analog`, `temperature`, `humidity`, `pressure`
    Sensor,
    /// `pwm`, `dimmer`: 0..=255 on the device
    Level,
    /// `color`, `rgb`, `rgbw`
    Color,
    /// `text`, `string`
    Text,
    /// Anything else, including ports without a kind.
    Other,
}

impl KindGroup {
    #[must_use]
    pub fn of(kind: Option<&PortKind>) -> Self {
        match kind.map(PortKind::as_str) {
            Some("switch" | "button" | "relay") => Self::Switch,
            Some("sensor" | "analog" | "temperature" | "humidity" | "pressure") => Self::Sensor,
            Some("pwm" | "dimmer") => Self::Level,
            Some("color" | "rgb" | "rgbw") => Self::Color,
            Some("text" | "string") => Self::Text,
            _ => Self::Other,
        }
    }
}

/// Stateless converter between hub states and device values.
pub struct ValueMapper;

impl ValueMapper {
    /// Convert a hub-side value into the text sent to the device.
    #[must_use]
    pub fn to_device(kind: Option<&PortKind>, value: &Value) -> String {
        match KindGroup::of(kind) {
            KindGroup::Switch => switch_to_device(value).to_string(),
            KindGroup::Sensor => format_float(to_float(value)),
            KindGroup::Level => level_to_device(value).to_string(),
            KindGroup::Color => color_to_device(value),
            KindGroup::Text => value_to_text(value),
            KindGroup::Other => match value {
                Value::Bool(b) => u8::from(*b).to_string(),
                other => value_to_text(other),
            },
        }
    }

    /// Convert a device value into the hub state string.
    #[must_use]
    pub fn to_hub(kind: Option<&PortKind>, value: &Value) -> String {
        match KindGroup::of(kind) {
            KindGroup::Switch => switch_to_hub(value).to_string(),
            KindGroup::Sensor => format_float(to_float(value)),
            KindGroup::Level => level_to_hub(value).to_string(),
            KindGroup::Color => color_to_hub(value),
            KindGroup::Text => value_to_text(value),
            KindGroup::Other => match value {
                Value::Bool(b) => on_off(*b).to_string(),
                other => value_to_text(other),
            },
        }
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}

fn is_truthy(s: &str) -> bool {
    TRUTHY.contains(&s.to_lowercase().as_str())
}

fn is_falsy(s: &str) -> bool {
    FALSY.contains(&s.to_lowercase().as_str())
}

fn number_is_set(value: &Value) -> bool {
    value.as_f64().is_some_and(|n| n != 0.0)
}

fn switch_to_device(value: &Value) -> u8 {
    match value {
        Value::Bool(b) => u8::from(*b),
        Value::Number(_) => u8::from(number_is_set(value)),
        Value::String(s) => u8::from(is_truthy(s)),
        _ => 0,
    }
}

fn switch_to_hub(value: &Value) -> &'static str {
    match value {
        Value::Bool(b) => on_off(*b),
        Value::Number(_) => on_off(number_is_set(value)),
        Value::String(s) => on_off(is_truthy(s)),
        _ => "off",
    }
}

fn to_float(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Floats always carry a fractional part (`22.0`, not `22`).
fn format_float(value: f64) -> String {
    format!("{value:?}")
}

#[allow(clippy::cast_possible_truncation)]
fn truncate(value: f64) -> i64 {
    value.trunc() as i64
}

fn level_from_number(value: f64) -> i64 {
    if value > 1.0 {
        if value <= 100.0 {
            truncate(value / 100.0 * 255.0)
        } else if value <= 255.0 {
            truncate(value)
        } else {
            255
        }
    } else {
        truncate(value * 255.0)
    }
}

fn level_to_device(value: &Value) -> i64 {
    match value {
        Value::Bool(b) => level_from_number(f64::from(u8::from(*b))),
        Value::Number(n) => level_from_number(n.as_f64().unwrap_or(0.0)),
        Value::String(s) if is_truthy(s) => 255,
        Value::String(s) if is_falsy(s) => 0,
        Value::String(s) => s.trim().parse().map_or(0, level_from_number),
        _ => 0,
    }
}

fn level_to_hub(value: &Value) -> i64 {
    match value {
        Value::Number(n) => truncate(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => s.trim().parse().map_or(0, truncate),
        _ => 0,
    }
}

fn hex_from_components(components: &[Value]) -> Option<String> {
    if components.len() != 3 && components.len() != 4 {
        return None;
    }
    let mut hex = String::from("#");
    for component in components {
        let byte = component.as_u64().filter(|n| *n <= 255)?;
        hex.push_str(&format!("{byte:02x}"));
    }
    Some(hex)
}

fn color_to_device(value: &Value) -> String {
    match value {
        Value::String(s) if s.starts_with('#') || s.contains(',') => s.clone(),
        Value::String(s) => {
            let name = s.to_lowercase();
            COLOR_NAMES
                .iter()
                .find(|(known, _)| *known == name)
                .map_or(BLACK, |(_, hex)| hex)
                .to_string()
        }
        Value::Array(components) => hex_from_components(components).unwrap_or_else(|| BLACK.to_string()),
        _ => BLACK.to_string(),
    }
}

fn color_to_hub(value: &Value) -> String {
    match value {
        Value::String(s) if s.starts_with('#') => s.clone(),
        Value::String(s) if s.contains(',') => {
            let components: Result<Vec<u8>, _> = s.split(',').map(|part| part.trim().parse::<u8>()).collect();
            match components {
                Ok(rgb) if rgb.len() >= 3 => format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2]),
                _ => BLACK.to_string(),
            }
        }
        Value::Array(components) => hex_from_components(components).unwrap_or_else(|| BLACK.to_string()),
        _ => BLACK.to_string(),
    }
}
