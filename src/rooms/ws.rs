use std::time::Duration;

use axum::{
    debug_handler,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};

use crate::SharedRegistry;
use crate::protocol::{self, ServerMessage};

use super::msg;
use super::registry::{ConnHandle, ConnId};

/// How long a closed connection keeps its seat, so the same user can
/// `rejoin` on a fresh socket before being dropped from the room.
pub(crate) const GRACE_PERIOD: Duration = Duration::from_secs(10);

#[debug_handler(state = crate::AppState)]
pub(crate) async fn relay_ws(
    State(registry): State<SharedRegistry>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

async fn handle_socket(socket: WebSocket, registry: SharedRegistry) {
    let conn_id = ConnId::new();
    let (conn, mut outbound) = ConnHandle::new(conn_id);
    tracing::info!(%conn_id, "client connected");

    let (mut sender, mut receiver) = socket.split();

    // write pump: frames queued by the registry go out on this socket
    let send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                msg::handle_msg(&mut registry.lock().unwrap(), &conn, text.as_str());
            }
            // ping/pong/binary/close frames carry no protocol traffic
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(%conn_id, %err, "transport error");
            }
        }
    }

    tracing::info!(%conn_id, "client disconnected");
    send_task.abort();

    tokio::spawn(evict_after_grace(registry, conn_id));
}

/// Fires once the grace period elapses. Re-resolves room and participant by
/// connection id at fire time and evicts only if that id still holds a seat
/// with a closed handle; a rejoin in the interim swapped in a fresh id, so
/// the lookup misses and the seat survives.
async fn evict_after_grace(registry: SharedRegistry, conn_id: ConnId) {
    tokio::time::sleep(GRACE_PERIOD).await;

    let mut registry = registry.lock().unwrap();
    let still_closed = registry
        .find_by_conn(conn_id)
        .is_some_and(|(_, p)| !p.conn().is_open());
    if !still_closed {
        return;
    }

    if let Some((room_id, removed)) = registry.remove_participant(conn_id) {
        tracing::info!(%conn_id, %room_id, name = removed.name(), "evicted after grace period");
        registry.broadcast(
            &room_id,
            &ServerMessage::Chat {
                message: format!("{} left the room", removed.name()),
                timestamp: protocol::now_rfc3339(),
            },
            None,
        );
    }
}
