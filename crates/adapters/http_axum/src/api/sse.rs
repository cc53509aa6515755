//! Server-Sent Events (SSE) stream for real-time updates.

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use portbridge_app::ports::BridgeControl;

use crate::state::AppState;

/// `GET /api/events/stream`: SSE stream of bridge events.
///
/// Each event is sent as a JSON `data:` frame named after its type. The
/// stream continues until the client disconnects or the bridge stops.
pub async fn stream<C: BridgeControl>(
    State(state): State<AppState<C>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let event_rx = state.control.subscribe();
    let event_stream = BroadcastStream::new(event_rx).filter_map(|result| match result {
        Ok(event) => {
            let (topic, _) = event.kind.topic();
            match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().event(topic).data(json))),
                Err(err) => {
                    tracing::warn!(%err, "failed to serialize event to JSON for SSE stream");
                    None
                }
            }
        }
        Err(BroadcastStreamRecvError::Lagged(n)) => {
            tracing::warn!(skipped = n, "SSE subscriber lagged, some events were dropped");
            None
        }
    });

    Sse::new(event_stream).keep_alive(KeepAlive::default())
}
