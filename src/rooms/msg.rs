use crate::protocol::{self, ClientMessage, ServerMessage};

use super::registry::{ConnHandle, Registry, RegistryError, RejoinOutcome};

/// Applies one inbound frame: decode, validate against the registry, mutate
/// it, reply to the sender and/or broadcast to the room. Never awaits, so
/// each frame is atomic under the registry lock, and never fails the
/// connection; every problem becomes an `error` reply or a log line.
pub fn handle_msg(registry: &mut Registry, conn: &ConnHandle, raw: &str) {
    let msg = match serde_json::from_str::<ClientMessage>(raw) {
        Ok(msg) => msg,
        Err(err) => {
            tracing::debug!(conn_id = %conn.id(), %err, "undecodable frame");
            conn.send(&ServerMessage::Error {
                message: "Invalid format".into(),
            });
            return;
        }
    };

    // room codes are typed by humans; normalize before lookup
    match msg {
        ClientMessage::CreateRoom { username } => create_room(registry, conn, username),
        ClientMessage::Join { room_id, username } => {
            join(registry, conn, &room_id.to_uppercase(), &username);
        }
        ClientMessage::Chat {
            room_id,
            username,
            message,
        } => chat(registry, conn, &room_id.to_uppercase(), &username, &message),
        ClientMessage::Rejoin { room_id, username } => {
            rejoin(registry, conn, &room_id.to_uppercase(), &username);
        }
    }
}

fn create_room(registry: &mut Registry, conn: &ConnHandle, username: Option<String>) {
    let room_id = registry.create_room();
    if let Some(username) = &username {
        if let Err(err) = registry.add_participant(&room_id, username, conn.clone()) {
            tracing::warn!(%err, %room_id, "failed to seat room creator");
        }
    }
    conn.send(&ServerMessage::Connection { room_id, username });
}

fn join(registry: &mut Registry, conn: &ConnHandle, room_id: &str, username: &str) {
    match registry.add_participant(room_id, username, conn.clone()) {
        Ok(()) => {
            tracing::info!(conn_id = %conn.id(), room_id, username, "joined room");
            conn.send(&ServerMessage::Joined {
                room_id: room_id.to_owned(),
                message: format!("Successfully joined room {room_id}"),
            });
            registry.broadcast(
                room_id,
                &ServerMessage::Chat {
                    message: format!("{username} joined the room"),
                    timestamp: protocol::now_rfc3339(),
                },
                Some(conn.id()),
            );
        }
        Err(err) => conn.send(&ServerMessage::Error {
            message: err.to_string(),
        }),
    }
}

fn chat(registry: &Registry, conn: &ConnHandle, room_id: &str, username: &str, message: &str) {
    if !registry.room_exists(room_id) {
        conn.send(&ServerMessage::Error {
            message: RegistryError::RoomNotFound(room_id.to_owned()).to_string(),
        });
        return;
    }

    registry.broadcast(
        room_id,
        &ServerMessage::Chat {
            message: format!("{username}: {message}"),
            timestamp: protocol::now_rfc3339(),
        },
        None,
    );
}

fn rejoin(registry: &mut Registry, conn: &ConnHandle, room_id: &str, username: &str) {
    match registry.rejoin_or_add(room_id, username, conn.clone()) {
        Ok(outcome) => {
            match outcome {
                RejoinOutcome::Reconnected => {
                    tracing::info!(conn_id = %conn.id(), room_id, username, "rejoined room");
                }
                RejoinOutcome::Joined => {
                    tracing::info!(conn_id = %conn.id(), room_id, username, "joined room via rejoin");
                }
            }
            conn.send(&ServerMessage::Rejoined {
                room_id: room_id.to_owned(),
                username: username.to_owned(),
            });
            registry.broadcast(
                room_id,
                &ServerMessage::Chat {
                    message: format!("{username} rejoined the room"),
                    timestamp: protocol::now_rfc3339(),
                },
                None,
            );
        }
        Err(err) => conn.send(&ServerMessage::Error {
            message: err.to_string(),
        }),
    }
}
