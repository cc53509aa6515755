//! Hub port: the home-automation hub as seen by the bridge.

use std::future::Future;

use serde::Serialize;
use serde_json::{Map, Value};

use portbridge_domain::entity::{HubEntity, HubEntityId};
use portbridge_domain::error::BridgeError;

/// Connection state of the hub client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStatus {
    pub connected: bool,
    pub authenticated: bool,
}

/// Something that happened on the hub side.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    /// An entity changed state.
    StateChanged {
        entity_id: HubEntityId,
        new_state: Option<String>,
        old_state: Option<String>,
    },
    /// A service was called, possibly targeting several entities.
    ServiceCalled {
        domain: String,
        service: String,
        entity_ids: Vec<HubEntityId>,
        service_data: Map<String, Value>,
    },
    /// The connection went up or down.
    ConnectionChanged {
        connected: bool,
        authenticated: bool,
        /// The connection came back after a previous one was lost.
        reconnected: bool,
    },
}

/// Request/response access to the hub.
///
/// Events flow the other way through the channel handed to the adapter
/// at construction time.
pub trait HubClient: Send + Sync + 'static {
    fn status(&self) -> HubStatus;

    /// Every entity the hub currently knows.
    fn get_states(&self) -> impl Future<Output = Result<Vec<HubEntity>, BridgeError>> + Send;

    /// Create or replace an entity's state and attributes.
    fn set_state(
        &self,
        entity_id: &HubEntityId,
        state: &str,
        attributes: Map<String, Value>,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send;

    fn remove_entity(
        &self,
        entity_id: &HubEntityId,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send;

    fn call_service(
        &self,
        domain: &str,
        service: &str,
        entity_id: Option<&HubEntityId>,
        data: Map<String, Value>,
    ) -> impl Future<Output = Result<Value, BridgeError>> + Send;

    /// Restart the connection loop with a fresh attempt budget.
    ///
    /// The way back after the client gave up reconnecting on its own.
    fn reconnect(&self) -> impl Future<Output = Result<(), BridgeError>> + Send;

    /// Close the connection and fail every pending request.
    fn shutdown(&self) -> impl Future<Output = ()> + Send;
}

impl<T: HubClient> HubClient for std::sync::Arc<T> {
    fn status(&self) -> HubStatus {
        (**self).status()
    }

    fn get_states(&self) -> impl Future<Output = Result<Vec<HubEntity>, BridgeError>> + Send {
        (**self).get_states()
    }

    fn set_state(
        &self,
        entity_id: &HubEntityId,
        state: &str,
        attributes: Map<String, Value>,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send {
        (**self).set_state(entity_id, state, attributes)
    }

    fn remove_entity(
        &self,
        entity_id: &HubEntityId,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send {
        (**self).remove_entity(entity_id)
    }

    fn call_service(
        &self,
        domain: &str,
        service: &str,
        entity_id: Option<&HubEntityId>,
        data: Map<String, Value>,
    ) -> impl Future<Output = Result<Value, BridgeError>> + Send {
        (**self).call_service(domain, service, entity_id, data)
    }

    fn reconnect(&self) -> impl Future<Output = Result<(), BridgeError>> + Send {
        (**self).reconnect()
    }

    fn shutdown(&self) -> impl Future<Output = ()> + Send {
        (**self).shutdown()
    }
}
