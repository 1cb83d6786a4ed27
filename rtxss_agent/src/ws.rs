//! WebSocket upgrade and per-connection handler. Streams `sample`, `history`
//! and `status` events from the connection's subscription queue.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::state::AppState;
use crate::types::{Event, StatusEvent};

pub const GREETING: &str = "Connected to NVIDIA GPU Monitor";

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut tx, mut rx) = socket.split();

    if send_event(&mut tx, &Event::Status(StatusEvent::info(GREETING)))
        .await
        .is_err()
    {
        return;
    }

    let sub = state.subscribe();
    let id = sub.id();
    info!(id, clients = state.broadcaster.subscriber_count(), "client connected");

    loop {
        tokio::select! {
            ev = sub.recv() => {
                let Some(ev) = ev else { break };
                if let Err(e) = send_event(&mut tx, &ev).await {
                    debug!(id, "send failed, dropping client: {e}");
                    break;
                }
            }
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(id, "socket error: {e}");
                        break;
                    }
                    // clients only listen; anything else is ignored
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let lost = sub.dropped();
    if lost > 0 {
        debug!(id, lost, "client fell behind; older events were replaced");
    }
    state.broadcaster.unsubscribe(id);
    info!(id, clients = state.broadcaster.subscriber_count(), "client disconnected");
}

async fn send_event<S>(tx: &mut S, ev: &Event) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(ev) {
        Ok(js) => tx.send(Message::Text(js)).await,
        Err(e) => {
            warn!("failed to encode {} event: {e}", ev.kind());
            Ok(())
        }
    }
}
