use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// One frame from a client. Every frame is `{"messageType": ..., "payload": {...}}`;
/// a frame whose payload is missing a required field does not decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "messageType",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    CreateRoom {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    Join {
        room_id: String,
        username: String,
    },
    Chat {
        room_id: String,
        username: String,
        message: String,
    },
    Rejoin {
        room_id: String,
        username: String,
    },
}

/// One frame to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "messageType",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    Connection {
        room_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    Joined {
        room_id: String,
        message: String,
    },
    Rejoined {
        room_id: String,
        username: String,
    },
    Chat {
        message: String,
        timestamp: String,
    },
    Error {
        message: String,
    },
}

/// Timestamp stamped on a chat broadcast, captured once per logical event so
/// every recipient sees the same value.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
