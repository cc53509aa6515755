//! Routes hub events to device commands.
//!
//! A service call or a state change aimed at a published entity becomes a
//! `code#value` command on the owning device's stream. Connection changes
//! are broadcast and, once authenticated, trigger a full sync.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use portbridge_domain::entity::HubEntityId;
use portbridge_domain::event::{BridgeEvent, EventKind};
use portbridge_domain::port::Direction;
use portbridge_domain::value::ValueMapper;

use super::device_registry::DeviceRegistry;
use super::port_sync::{PortSyncEngine, PublishedPort};
use crate::ports::{DeviceApi, DeviceRepository, EventPublisher, HubClient, HubEvent, PortRepository};

/// Hub states that carry no value to forward.
const PLACEHOLDER_STATES: [&str; 2] = ["unknown", "unavailable"];

/// Hub-side value a service call asks for.
///
/// `current` is the entity's present state, used by `toggle`.
fn service_value(
    domain: &str,
    service: &str,
    data: &Map<String, Value>,
    current: Option<&str>,
) -> Option<Value> {
    let on_off = |on: bool| Some(Value::String(if on { "on" } else { "off" }.to_string()));
    match (domain, service) {
        ("light", "turn_on") => data
            .get("brightness")
            .cloned()
            .or_else(|| on_off(true)),
        ("switch" | "input_boolean" | "light", "turn_on") => on_off(true),
        ("switch" | "input_boolean" | "light", "turn_off") => on_off(false),
        ("switch" | "input_boolean" | "light", "toggle") => on_off(current != Some("on")),
        ("input_number", "set_value") => data.get("value").cloned(),
        ("input_select", "select_option") => data.get("option").cloned(),
        _ => None,
    }
}

pub struct HubEventRouter<A: DeviceApi, DR, PR, H, E> {
    registry: Arc<DeviceRegistry<A, DR, PR, H, E>>,
    sync: Arc<PortSyncEngine<H, DR, PR>>,
    events: E,
    auto_sync: bool,
}

impl<A, DR, PR, H, E> HubEventRouter<A, DR, PR, H, E>
where
    A: DeviceApi,
    DR: DeviceRepository,
    PR: PortRepository,
    H: HubClient,
    E: EventPublisher + Clone,
{
    pub fn new(
        registry: Arc<DeviceRegistry<A, DR, PR, H, E>>,
        sync: Arc<PortSyncEngine<H, DR, PR>>,
        events: E,
        auto_sync: bool,
    ) -> Self {
        Self {
            registry,
            sync,
            events,
            auto_sync,
        }
    }

    /// Consume hub events until the sender side is dropped.
    pub async fn run(&self, mut rx: mpsc::UnboundedReceiver<HubEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle(event).await;
        }
        tracing::debug!("hub event stream ended");
    }

    pub async fn handle(&self, event: HubEvent) {
        match event {
            HubEvent::ServiceCalled {
                domain,
                service,
                entity_ids,
                service_data,
            } => {
                for entity_id in entity_ids {
                    self.on_service_call(&domain, &service, &entity_id, &service_data)
                        .await;
                }
            }
            HubEvent::StateChanged {
                entity_id,
                new_state,
                ..
            } => self.on_state_changed(&entity_id, new_state).await,
            HubEvent::ConnectionChanged {
                connected,
                authenticated,
                reconnected,
            } => self.on_connection(connected, authenticated, reconnected).await,
        }
    }

    /// Hub-side state of the port's cached value.
    async fn current_state(&self, target: &PublishedPort) -> Option<String> {
        let link = self.registry.get_client(target.device_id).await?;
        let port = link.get_port(&target.port_code).await?;
        let value = port.value?;
        Some(ValueMapper::to_hub(
            port.kind.as_ref().or(target.kind.as_ref()),
            &value,
        ))
    }

    async fn dispatch(&self, target: &PublishedPort, value: &Value) {
        match self
            .registry
            .send_hub_value(target.device_id, &target.port_code, value)
            .await
        {
            Ok(written) => tracing::debug!(
                entity_id = %target.entity_id,
                code = %target.port_code,
                written,
                "hub command forwarded"
            ),
            Err(err) => tracing::warn!(
                entity_id = %target.entity_id,
                %err,
                "failed to forward hub command"
            ),
        }
    }

    async fn on_service_call(
        &self,
        domain: &str,
        service: &str,
        entity_id: &HubEntityId,
        data: &Map<String, Value>,
    ) {
        let Some(target) = self.sync.resolve_entity(entity_id).await else {
            return;
        };
        let current = self.current_state(&target).await;
        let Some(value) = service_value(domain, service, data, current.as_deref()) else {
            tracing::debug!(domain, service, %entity_id, "unsupported service call");
            return;
        };
        self.dispatch(&target, &value).await;
    }

    async fn on_state_changed(&self, entity_id: &HubEntityId, new_state: Option<String>) {
        let Some(state) = new_state.filter(|state| !PLACEHOLDER_STATES.contains(&state.as_str()))
        else {
            return;
        };
        let Some(target) = self.sync.resolve_entity(entity_id).await else {
            return;
        };
        if target.direction != Some(Direction::Out) {
            return;
        }
        if self.current_state(&target).await.as_deref() == Some(state.as_str()) {
            return;
        }
        self.dispatch(&target, &Value::String(state)).await;
    }

    async fn on_connection(&self, connected: bool, authenticated: bool, reconnected: bool) {
        tracing::info!(connected, authenticated, reconnected, "hub connection changed");
        if let Err(err) = self
            .events
            .publish(BridgeEvent::new(EventKind::HubStatus {
                connected,
                authenticated,
            }))
            .await
        {
            tracing::warn!(%err, "failed to publish hub status");
        }
        if !(connected && authenticated && self.auto_sync) {
            return;
        }
        let sync = Arc::clone(&self.sync);
        let events = self.events.clone();
        tokio::spawn(async move {
            match sync.force_sync().await {
                Ok(report) => {
                    if let Err(err) = events
                        .publish(BridgeEvent::new(EventKind::SyncCompleted { report }))
                        .await
                    {
                        tracing::warn!(%err, "failed to publish sync report");
                    }
                }
                Err(err) => tracing::warn!(%err, "automatic sync failed"),
            }
        });
    }
}
