//! The hub connector: one multiplexed WebSocket plus the REST API.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde_json::{Map, Value, json};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use portbridge_app::ports::{HubClient, HubEvent, HubStatus};
use portbridge_domain::entity::{HubEntity, HubEntityId};
use portbridge_domain::error::{BridgeError, UnavailableError};

use crate::config::HubConfig;
use crate::error::HubError;
use crate::pending::PendingRequests;
use crate::protocol::{self, Inbound};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const SUBSCRIBED_EVENTS: [&str; 2] = ["state_changed", "call_service"];

/// [`HubClient`] backed by the hub's WebSocket and REST APIs.
///
/// Requests over the socket need an accepted token; without one the
/// connector stays up in a degraded mode where `get_states` and
/// `call_service` go through REST instead.
pub struct HubConnector {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    config: HubConfig,
    http: reqwest::Client,
    pending: PendingRequests,
    connected: AtomicBool,
    authenticated: AtomicBool,
    /// A session was established before, so the next one is a reconnect.
    seen_session: AtomicBool,
    attempts: AtomicU32,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    events: mpsc::UnboundedSender<HubEvent>,
    cancel: CancellationToken,
}

impl HubConnector {
    /// Build a connector pushing hub events into `events`.
    ///
    /// Nothing is connected until [`HubConnector::start`].
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidToken`] if the token cannot be used as a
    /// header, or [`HubError::Http`] if the HTTP client cannot be built.
    pub fn new(config: HubConfig, events: mpsc::UnboundedSender<HubEvent>) -> Result<Self, HubError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .build()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                http,
                pending: PendingRequests::default(),
                connected: AtomicBool::new(false),
                authenticated: AtomicBool::new(false),
                seen_session: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                outbound: Mutex::new(None),
                events,
                cancel: CancellationToken::new(),
            }),
            task: Mutex::new(None),
        })
    }

    /// Spawn the connection loop. A disabled connector stays idle.
    ///
    /// Does nothing while a loop runs. A loop that gave up after
    /// `max_reconnect_attempts` is replaced by a fresh one with a reset
    /// attempt counter.
    pub async fn start(&self) {
        if !self.inner.config.enabled {
            tracing::info!("hub connector disabled");
            return;
        }
        if self.inner.cancel.is_cancelled() {
            tracing::debug!("hub connector already shut down");
            return;
        }
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        self.inner.attempts.store(0, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(async move { inner.run().await }));
    }

    fn ensure_enabled(&self) -> Result<(), BridgeError> {
        if self.inner.config.enabled {
            Ok(())
        } else {
            Err(UnavailableError::HubDisconnected.into())
        }
    }
}

impl Inner {
    fn is_authenticated(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.authenticated.load(Ordering::SeqCst)
    }

    fn emit(&self, event: HubEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("hub event receiver dropped");
        }
    }

    async fn run(self: Arc<Self>) {
        let max = self.config.max_reconnect_attempts;
        loop {
            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                result = self.session() => result,
            };
            match result {
                Ok(()) => tracing::info!("hub connection closed"),
                Err(err) => tracing::warn!(%err, "hub connection failed"),
            }
            self.on_disconnect().await;

            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > max {
                tracing::error!(max, "hub reconnect attempts exhausted, giving up");
                break;
            }
            tracing::info!(attempt, max, "reconnecting to hub");
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.reconnect_interval()) => {}
            }
        }
        self.on_disconnect().await;
        tracing::debug!("hub connection loop stopped");
    }

    /// One connection: handshake, then read until the socket drops.
    async fn session(self: &Arc<Self>) -> Result<(), HubError> {
        let url = self.config.websocket_url()?;
        let timeout = self.config.request_timeout();
        tracing::info!(%url, "connecting to hub");
        let (ws, _response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url.as_str()))
            .await
            .map_err(|_| HubError::HandshakeTimeout)??;
        let (mut sink, mut source) = ws.split();
        let authenticated = tokio::time::timeout(timeout, self.authenticate(&mut sink, &mut source))
            .await
            .map_err(|_| HubError::HandshakeTimeout)??;

        let (tx, rx) = mpsc::unbounded_channel();
        *self.outbound.lock().await = Some(tx);
        let writer = tokio::spawn(write_loop(sink, rx));

        self.connected.store(true, Ordering::SeqCst);
        self.authenticated.store(authenticated, Ordering::SeqCst);
        let reconnected = self.seen_session.swap(true, Ordering::SeqCst);
        if authenticated {
            self.attempts.store(0, Ordering::SeqCst);
            tracing::info!(reconnected, "hub connected and authenticated");
            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.subscribe().await });
        } else {
            tracing::warn!("hub connected without authentication, requests disabled");
        }
        self.emit(HubEvent::ConnectionChanged {
            connected: true,
            authenticated,
            reconnected,
        });

        let result = self.read_loop(&mut source).await;
        self.outbound.lock().await.take();
        writer.abort();
        result
    }

    /// Returns whether the hub accepted the token.
    async fn authenticate(&self, sink: &mut WsSink, source: &mut WsSource) -> Result<bool, HubError> {
        match next_frame(source).await? {
            Inbound::AuthRequired => {}
            Inbound::AuthOk => return Ok(true),
            _ => return Err(HubError::Handshake),
        }
        let Some(token) = &self.config.token else {
            tracing::warn!("no hub token configured");
            return Ok(false);
        };
        let auth = protocol::auth(token.expose_secret());
        sink.send(Message::text(auth.to_string())).await?;
        match next_frame(source).await? {
            Inbound::AuthOk => Ok(true),
            Inbound::AuthInvalid { message } => {
                tracing::warn!(message = message.as_deref(), "hub rejected the access token");
                Ok(false)
            }
            _ => Err(HubError::Handshake),
        }
    }

    async fn subscribe(&self) {
        for event_type in SUBSCRIBED_EVENTS {
            match self.request(protocol::subscribe_events(event_type)).await {
                Ok(_) => tracing::debug!(event_type, "subscribed to hub events"),
                Err(err) => tracing::warn!(event_type, %err, "hub event subscription failed"),
            }
        }
    }

    /// Read until the socket drops, pinging the hub meanwhile.
    ///
    /// Any inbound frame counts as a sign of life; a hub that stays silent
    /// past one ping interval plus the ping timeout is treated as gone.
    async fn read_loop(&self, source: &mut WsSource) -> Result<(), HubError> {
        let every = self.config.ping_interval();
        let idle_limit = every + self.config.ping_timeout();
        let mut ping = tokio::time::interval_at(Instant::now() + every, every);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut deadline = Instant::now() + idle_limit;
        loop {
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(idle = ?idle_limit, "hub connection went silent");
                    return Err(HubError::Silent);
                }
                _ = ping.tick() => self.send_ping().await,
                frame = source.next() => {
                    let Some(frame) = frame else {
                        return Ok(());
                    };
                    deadline = Instant::now() + idle_limit;
                    match frame? {
                        Message::Text(text) => self.dispatch(text.as_str()).await,
                        Message::Close(frame) => {
                            tracing::debug!(?frame, "hub sent close frame");
                            return Ok(());
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    async fn send_ping(&self) {
        if let Some(sender) = self.outbound.lock().await.as_ref()
            && sender.send(Message::Ping(Default::default())).is_err()
        {
            tracing::debug!("hub writer gone, ping dropped");
        }
    }

    async fn dispatch(&self, text: &str) {
        let frame: Inbound = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(%err, "discarding malformed hub frame");
                return;
            }
        };
        match frame {
            Inbound::Result {
                id,
                success,
                result,
                error,
            } => {
                let outcome = if success {
                    Ok(result)
                } else {
                    Err(HubError::from(error.unwrap_or_default()).into())
                };
                if !self.pending.resolve(id, outcome).await {
                    tracing::debug!(id, "result for an unknown or expired request");
                }
            }
            Inbound::Event { event } => {
                if let Some(event) = event.into_hub_event() {
                    self.emit(event);
                }
            }
            _ => {}
        }
    }

    async fn on_disconnect(&self) {
        self.outbound.lock().await.take();
        self.authenticated.store(false, Ordering::SeqCst);
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        let failed = self.pending.fail_all().await;
        if failed > 0 {
            tracing::warn!(failed, "pending hub requests failed by disconnect");
        }
        if was_connected {
            self.emit(HubEvent::ConnectionChanged {
                connected: false,
                authenticated: false,
                reconnected: false,
            });
        }
    }

    /// Send `payload` with a fresh id and wait for its result.
    async fn request(&self, mut payload: Value) -> Result<Value, BridgeError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(UnavailableError::HubDisconnected.into());
        }
        if !self.authenticated.load(Ordering::SeqCst) {
            return Err(UnavailableError::HubUnauthenticated.into());
        }
        let (id, rx) = self.pending.register().await;
        payload["id"] = json!(id);

        let sender = self.outbound.lock().await.clone();
        let Some(sender) = sender else {
            self.pending.discard(id).await;
            return Err(UnavailableError::HubDisconnected.into());
        };
        if sender.send(Message::text(payload.to_string())).is_err() {
            self.pending.discard(id).await;
            return Err(UnavailableError::ConnectionLost.into());
        }

        match tokio::time::timeout(self.config.request_timeout(), rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(UnavailableError::ConnectionLost.into()),
            Err(_) => {
                self.pending.discard(id).await;
                tracing::warn!(id, "hub request timed out");
                Err(UnavailableError::Timeout { request_id: id }.into())
            }
        }
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}{path}", self.config.url.trim_end_matches('/'))
    }

    async fn rest_get(&self, path: &str) -> Result<reqwest::Response, HubError> {
        Ok(self.http.get(self.rest_url(path)).send().await?)
    }

    async fn rest_post(&self, path: &str, body: &Value) -> Result<reqwest::Response, HubError> {
        Ok(self
            .http
            .post(self.rest_url(path))
            .json(body)
            .send()
            .await?
            .error_for_status()?)
    }
}

async fn next_frame(source: &mut WsSource) -> Result<Inbound, HubError> {
    loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(text.as_str())?),
            Some(Ok(Message::Close(_))) | None => return Err(HubError::Closed),
            Some(Ok(_)) => {}
            Some(Err(err)) => return Err(err.into()),
        }
    }
}

async fn write_loop(mut sink: WsSink, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = rx.recv().await {
        if let Err(err) = sink.send(message).await {
            tracing::warn!(%err, "hub write failed");
            break;
        }
    }
    if let Err(err) = sink.close().await {
        tracing::debug!(%err, "hub socket close failed");
    }
}

impl HubClient for HubConnector {
    fn status(&self) -> HubStatus {
        HubStatus {
            connected: self.inner.connected.load(Ordering::SeqCst),
            authenticated: self.inner.authenticated.load(Ordering::SeqCst),
        }
    }

    async fn get_states(&self) -> Result<Vec<HubEntity>, BridgeError> {
        self.ensure_enabled()?;
        let states = if self.inner.is_authenticated() {
            self.inner.request(protocol::get_states()).await?
        } else {
            self.inner
                .rest_get("/api/states")
                .await?
                .error_for_status()
                .map_err(HubError::from)?
                .json()
                .await
                .map_err(HubError::from)?
        };
        Ok(serde_json::from_value(states).map_err(HubError::from)?)
    }

    async fn set_state(
        &self,
        entity_id: &HubEntityId,
        state: &str,
        attributes: Map<String, Value>,
    ) -> Result<(), BridgeError> {
        self.ensure_enabled()?;
        let body = json!({"state": state, "attributes": attributes});
        self.inner
            .rest_post(&format!("/api/states/{entity_id}"), &body)
            .await?;
        tracing::debug!(%entity_id, state, "hub state set");
        Ok(())
    }

    async fn remove_entity(&self, entity_id: &HubEntityId) -> Result<(), BridgeError> {
        self.ensure_enabled()?;
        let path = format!("/api/states/{entity_id}");
        let existing = self.inner.rest_get(&path).await?;
        if existing.status() == StatusCode::NOT_FOUND {
            tracing::debug!(%entity_id, "hub entity already gone");
            return Ok(());
        }
        existing.error_for_status().map_err(HubError::from)?;

        let response = self
            .inner
            .http
            .delete(self.inner.rest_url(&path))
            .send()
            .await
            .map_err(HubError::from)?;
        if response.status() != StatusCode::NOT_FOUND {
            response.error_for_status().map_err(HubError::from)?;
        }
        tracing::debug!(%entity_id, "hub entity removed");
        Ok(())
    }

    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        entity_id: Option<&HubEntityId>,
        data: Map<String, Value>,
    ) -> Result<Value, BridgeError> {
        self.ensure_enabled()?;
        if self.inner.is_authenticated() {
            return self
                .inner
                .request(protocol::call_service(domain, service, entity_id, data))
                .await;
        }
        let mut body = data;
        if let Some(entity_id) = entity_id {
            body.insert("entity_id".to_string(), json!(entity_id.as_str()));
        }
        let result = self
            .inner
            .rest_post(&format!("/api/services/{domain}/{service}"), &Value::Object(body))
            .await?
            .json()
            .await
            .map_err(HubError::from)?;
        Ok(result)
    }

    async fn reconnect(&self) -> Result<(), BridgeError> {
        self.ensure_enabled()?;
        if self.inner.cancel.is_cancelled() {
            return Err(UnavailableError::HubDisconnected.into());
        }
        tracing::info!("hub reconnect requested");
        self.inner.attempts.store(0, Ordering::SeqCst);
        self.start().await;
        Ok(())
    }

    async fn shutdown(&self) {
        self.inner.cancel.cancel();
        if let Some(task) = self.task.lock().await.take()
            && let Err(err) = task.await
        {
            tracing::warn!(%err, "hub connection task ended abnormally");
        }
        self.inner.on_disconnect().await;
    }
}
