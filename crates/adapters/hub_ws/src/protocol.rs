//! Frames of the hub WebSocket API.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use portbridge_app::ports::HubEvent;
use portbridge_domain::entity::HubEntityId;

use crate::error::HubError;

/// A frame sent by the hub. Unknown types are kept as [`Inbound::Other`].
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum Inbound {
    AuthRequired,
    AuthOk,
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    Result {
        id: u64,
        success: bool,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<Failure>,
    },
    Event {
        event: EventFrame,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Failure {
    code: String,
    message: String,
}

impl From<Failure> for HubError {
    fn from(failure: Failure) -> Self {
        Self::Rejected {
            code: failure.code,
            message: failure.message,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventFrame {
    event_type: String,
    #[serde(default)]
    data: Value,
}

impl EventFrame {
    /// The [`HubEvent`] this frame stands for, if the bridge cares about it.
    pub(crate) fn into_hub_event(self) -> Option<HubEvent> {
        match self.event_type.as_str() {
            "state_changed" => {
                let entity_id = self.data.get("entity_id")?.as_str()?;
                Some(HubEvent::StateChanged {
                    entity_id: HubEntityId::new(entity_id),
                    new_state: state_of(self.data.get("new_state")),
                    old_state: state_of(self.data.get("old_state")),
                })
            }
            "call_service" => {
                let Value::Object(mut data) = self.data else {
                    return None;
                };
                let domain = data.get("domain")?.as_str()?.to_string();
                let service = data.get("service")?.as_str()?.to_string();
                let mut service_data = match data.remove("service_data") {
                    Some(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                let entity_ids = entity_ids(service_data.remove("entity_id"));
                Some(HubEvent::ServiceCalled {
                    domain,
                    service,
                    entity_ids,
                    service_data,
                })
            }
            _ => None,
        }
    }
}

fn state_of(state: Option<&Value>) -> Option<String> {
    state?.get("state")?.as_str().map(str::to_string)
}

/// `entity_id` may be a single id or a list of them.
fn entity_ids(raw: Option<Value>) -> Vec<HubEntityId> {
    match raw {
        Some(Value::String(id)) => vec![HubEntityId::new(id)],
        Some(Value::Array(ids)) => ids
            .iter()
            .filter_map(Value::as_str)
            .map(HubEntityId::new)
            .collect(),
        _ => Vec::new(),
    }
}

pub(crate) fn auth(token: &str) -> Value {
    json!({"type": "auth", "access_token": token})
}

pub(crate) fn subscribe_events(event_type: &str) -> Value {
    json!({"type": "subscribe_events", "event_type": event_type})
}

pub(crate) fn get_states() -> Value {
    json!({"type": "get_states"})
}

pub(crate) fn call_service(
    domain: &str,
    service: &str,
    entity_id: Option<&HubEntityId>,
    data: Map<String, Value>,
) -> Value {
    let mut frame = json!({
        "type": "call_service",
        "domain": domain,
        "service": service,
        "service_data": data,
    });
    if let Some(entity_id) = entity_id {
        frame["target"] = json!({"entity_id": entity_id.as_str()});
    }
    frame
}
