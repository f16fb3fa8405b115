use std::collections::HashMap;
use std::fmt;

use rand::{Rng, distr::Alphanumeric};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::protocol::ServerMessage;

pub type RoomId = String;

const ROOM_CODE_LEN: usize = 6;

/// Stable identity of one accepted connection, assigned at accept time.
/// Membership checks key off this, never off live handle equality, so a
/// rejoin on a fresh socket cannot be confused with the socket it replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(Uuid);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Send side of one connection: its identity plus the channel feeding that
/// connection's write pump. The registry only ever pushes frames on it; the
/// socket itself stays with the connection-lifecycle layer.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    id: ConnId,
    tx: UnboundedSender<String>,
}

impl ConnHandle {
    pub fn new(id: ConnId) -> (Self, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Sendable until the write pump drops its receiver.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Best-effort direct reply; a closed peer drops the frame.
    pub fn send(&self, msg: &ServerMessage) {
        match serde_json::to_string(msg) {
            Ok(frame) => {
                let _ = self.tx.send(frame);
            }
            Err(err) => tracing::error!(%err, "failed to encode outbound frame"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Participant {
    name: String,
    conn: ConnHandle,
}

impl Participant {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn conn(&self) -> &ConnHandle {
        &self.conn
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Room {0} does not exist")]
    RoomNotFound(RoomId),
    #[error("Already in this room")]
    AlreadyMember,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejoinOutcome {
    /// Known name, handle swapped in place.
    Reconnected,
    /// Name unknown, appended as a fresh participant.
    Joined,
}

/// In-memory map of live rooms to their participants, in join order.
/// Constructed once at startup and handed around by reference; tests build
/// isolated instances directly.
#[derive(Debug, Default)]
pub struct Registry {
    rooms: HashMap<RoomId, Vec<Participant>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh code, checked against live rooms, and registers an
    /// empty room under it.
    pub fn create_room(&mut self) -> RoomId {
        let room_id = loop {
            let code = fresh_code();
            if !self.rooms.contains_key(&code) {
                break code;
            }
        };
        self.rooms.insert(room_id.clone(), Vec::new());
        tracing::info!(%room_id, "created room");
        room_id
    }

    pub fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn find_by_conn(&self, conn_id: ConnId) -> Option<(&str, &Participant)> {
        self.rooms.iter().find_map(|(room_id, members)| {
            members
                .iter()
                .find(|p| p.conn.id == conn_id)
                .map(|p| (room_id.as_str(), p))
        })
    }

    pub fn participants(&self, room_id: &str) -> Option<&[Participant]> {
        self.rooms.get(room_id).map(Vec::as_slice)
    }

    /// Seats `conn` in the room. Two connections may share a display name;
    /// the same connection may not be seated twice.
    pub fn add_participant(
        &mut self,
        room_id: &str,
        name: &str,
        conn: ConnHandle,
    ) -> Result<(), RegistryError> {
        let members = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| RegistryError::RoomNotFound(room_id.to_owned()))?;

        if members.iter().any(|p| p.conn.id == conn.id) {
            return Err(RegistryError::AlreadyMember);
        }

        members.push(Participant {
            name: name.to_owned(),
            conn,
        });
        Ok(())
    }

    /// Reconnect path: a participant already known by `name` gets its handle
    /// replaced, anyone else is appended like a normal join.
    pub fn rejoin_or_add(
        &mut self,
        room_id: &str,
        name: &str,
        conn: ConnHandle,
    ) -> Result<RejoinOutcome, RegistryError> {
        let members = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| RegistryError::RoomNotFound(room_id.to_owned()))?;

        if let Some(existing) = members.iter_mut().find(|p| p.name == name) {
            existing.conn = conn;
            Ok(RejoinOutcome::Reconnected)
        } else {
            members.push(Participant {
                name: name.to_owned(),
                conn,
            });
            Ok(RejoinOutcome::Joined)
        }
    }

    /// Removes whichever membership `conn_id` holds, deleting the room along
    /// with its last participant. Returns what was removed so the caller can
    /// send a farewell broadcast.
    pub fn remove_participant(&mut self, conn_id: ConnId) -> Option<(RoomId, Participant)> {
        let (room_id, idx) = self.rooms.iter().find_map(|(room_id, members)| {
            members
                .iter()
                .position(|p| p.conn.id == conn_id)
                .map(|idx| (room_id.clone(), idx))
        })?;

        let members = self.rooms.get_mut(&room_id)?;
        let removed = members.remove(idx);
        if members.is_empty() {
            self.rooms.remove(&room_id);
            tracing::info!(%room_id, "room deleted (empty)");
        }
        Some((room_id, removed))
    }

    /// Fan-out to every open participant of the room, in join order. Closed
    /// peers and `exclude` are skipped silently; a missing room is a no-op.
    pub fn broadcast(&self, room_id: &str, msg: &ServerMessage, exclude: Option<ConnId>) {
        let Some(members) = self.rooms.get(room_id) else {
            return;
        };
        let frame = match serde_json::to_string(msg) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(%err, "failed to encode broadcast frame");
                return;
            }
        };
        for p in members {
            if Some(p.conn.id) == exclude || !p.conn.is_open() {
                continue;
            }
            let _ = p.conn.tx.send(frame.clone());
        }
    }
}

fn fresh_code() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(ROOM_CODE_LEN)
        .map(|b| (b as char).to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn conn() -> (ConnHandle, UnboundedReceiver<String>) {
        ConnHandle::new(ConnId::new())
    }

    fn chat(text: &str) -> ServerMessage {
        ServerMessage::Chat {
            message: text.into(),
            timestamp: "2026-08-07T00:00:00Z".into(),
        }
    }

    fn recv(rx: &mut UnboundedReceiver<String>) -> Option<ServerMessage> {
        rx.try_recv().ok().map(|frame| {
            serde_json::from_str(&frame).expect("outbound frames are well-formed")
        })
    }

    #[test]
    fn create_room_allocates_a_six_char_uppercase_code() {
        let mut registry = Registry::new();
        let room_id = registry.create_room();

        assert_eq!(room_id.len(), 6);
        assert!(
            room_id
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        );
        assert!(registry.room_exists(&room_id));
        assert_eq!(registry.participants(&room_id).unwrap().len(), 0);
    }

    #[test]
    fn add_participant_to_missing_room_fails() {
        let mut registry = Registry::new();
        let (alice, _rx) = conn();

        let res = registry.add_participant("ZZZZZZ", "alice", alice);
        assert_eq!(res, Err(RegistryError::RoomNotFound("ZZZZZZ".into())));
        assert!(!registry.room_exists("ZZZZZZ"));
    }

    #[test]
    fn same_connection_cannot_join_twice() {
        let mut registry = Registry::new();
        let room_id = registry.create_room();
        let (alice, _rx) = conn();

        registry.add_participant(&room_id, "alice", alice.clone()).unwrap();
        let res = registry.add_participant(&room_id, "alice", alice);

        assert_eq!(res, Err(RegistryError::AlreadyMember));
        assert_eq!(registry.participants(&room_id).unwrap().len(), 1);
    }

    #[test]
    fn display_names_are_not_unique() {
        let mut registry = Registry::new();
        let room_id = registry.create_room();
        let (first, _rx1) = conn();
        let (second, _rx2) = conn();

        registry.add_participant(&room_id, "alice", first).unwrap();
        registry.add_participant(&room_id, "alice", second).unwrap();

        assert_eq!(registry.participants(&room_id).unwrap().len(), 2);
    }

    #[test]
    fn membership_is_kept_in_join_order() {
        let mut registry = Registry::new();
        let room_id = registry.create_room();
        for name in ["alice", "bob", "carol"] {
            let (c, _rx) = conn();
            registry.add_participant(&room_id, name, c).unwrap();
        }

        let names: Vec<_> = registry
            .participants(&room_id)
            .unwrap()
            .iter()
            .map(Participant::name)
            .collect();
        assert_eq!(names, ["alice", "bob", "carol"]);
    }

    #[test]
    fn rejoin_swaps_the_handle_without_duplicating() {
        let mut registry = Registry::new();
        let room_id = registry.create_room();
        let (old, mut old_rx) = conn();
        let (new, mut new_rx) = conn();
        registry.add_participant(&room_id, "alice", old).unwrap();

        let outcome = registry.rejoin_or_add(&room_id, "alice", new).unwrap();
        assert_eq!(outcome, RejoinOutcome::Reconnected);
        assert_eq!(registry.participants(&room_id).unwrap().len(), 1);

        registry.broadcast(&room_id, &chat("hi"), None);
        assert!(recv(&mut new_rx).is_some());
        assert!(recv(&mut old_rx).is_none());
    }

    #[test]
    fn rejoin_with_unknown_name_appends() {
        let mut registry = Registry::new();
        let room_id = registry.create_room();
        let (alice, _rx1) = conn();
        let (bob, _rx2) = conn();
        registry.add_participant(&room_id, "alice", alice).unwrap();

        let outcome = registry.rejoin_or_add(&room_id, "bob", bob).unwrap();
        assert_eq!(outcome, RejoinOutcome::Joined);
        assert_eq!(registry.participants(&room_id).unwrap().len(), 2);
    }

    #[test]
    fn rejoin_into_missing_room_fails() {
        let mut registry = Registry::new();
        let (alice, _rx) = conn();

        let res = registry.rejoin_or_add("ZZZZZZ", "alice", alice);
        assert_eq!(res, Err(RegistryError::RoomNotFound("ZZZZZZ".into())));
    }

    #[test]
    fn removing_the_last_participant_deletes_the_room() {
        let mut registry = Registry::new();
        let room_id = registry.create_room();
        let (alice, _rx) = conn();
        let alice_id = alice.id();
        registry.add_participant(&room_id, "alice", alice).unwrap();

        let (removed_room, removed) = registry.remove_participant(alice_id).unwrap();
        assert_eq!(removed_room, room_id);
        assert_eq!(removed.name(), "alice");
        assert!(!registry.room_exists(&room_id));
    }

    #[test]
    fn removing_one_of_many_keeps_the_room() {
        let mut registry = Registry::new();
        let room_id = registry.create_room();
        let (alice, _rx1) = conn();
        let (bob, _rx2) = conn();
        let alice_id = alice.id();
        registry.add_participant(&room_id, "alice", alice).unwrap();
        registry.add_participant(&room_id, "bob", bob).unwrap();

        registry.remove_participant(alice_id).unwrap();
        assert!(registry.room_exists(&room_id));
        assert_eq!(registry.participants(&room_id).unwrap().len(), 1);
    }

    #[test]
    fn removing_an_unknown_connection_is_a_no_op() {
        let mut registry = Registry::new();
        registry.create_room();
        assert!(registry.remove_participant(ConnId::new()).is_none());
    }

    #[test]
    fn broadcast_skips_excluded_and_closed_peers() {
        let mut registry = Registry::new();
        let room_id = registry.create_room();
        let (alice, mut alice_rx) = conn();
        let (bob, bob_rx) = conn();
        let (carol, mut carol_rx) = conn();
        let alice_id = alice.id();
        registry.add_participant(&room_id, "alice", alice).unwrap();
        registry.add_participant(&room_id, "bob", bob).unwrap();
        registry.add_participant(&room_id, "carol", carol).unwrap();

        // bob's write pump is gone
        drop(bob_rx);

        registry.broadcast(&room_id, &chat("hi"), Some(alice_id));
        assert!(recv(&mut alice_rx).is_none());
        assert_eq!(
            recv(&mut carol_rx),
            Some(chat("hi")),
        );
    }

    #[test]
    fn broadcast_to_a_missing_room_is_a_no_op() {
        let registry = Registry::new();
        registry.broadcast("ZZZZZZ", &chat("hi"), None);
    }

    #[test]
    fn find_by_conn_reports_the_membership() {
        let mut registry = Registry::new();
        let room_id = registry.create_room();
        let (alice, _rx) = conn();
        let alice_id = alice.id();
        registry.add_participant(&room_id, "alice", alice).unwrap();

        let (found_room, found) = registry.find_by_conn(alice_id).unwrap();
        assert_eq!(found_room, room_id);
        assert_eq!(found.name(), "alice");
        assert!(registry.find_by_conn(ConnId::new()).is_none());
    }
}
