use std::collections::HashSet;

use dashmap::DashMap;
use remus_shared::api::ws::ServerEvent;
use remus_shared::ids::{ChannelId, GuildId, SessionId, UserId};
use tokio::sync::mpsc;

const SESSION_QUEUE_CAPACITY: usize = 256;

/// Frames the send loop understands: an event to serialize, or an order to
/// close the socket (used for kick/ban).
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(ServerEvent),
    Close,
}

/// Typed multicast group key. Sockets join `user:` and `guild:` rooms on
/// connect and `channel:`/`voice:` rooms lazily.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomKey {
    User(UserId),
    Guild(GuildId),
    Channel(ChannelId),
    Voice(ChannelId),
}

struct SessionEntry {
    user_id: UserId,
    sender: mpsc::Sender<Outbound>,
    rooms: HashSet<RoomKey>,
}

/// In-memory gateway state: the session map, the room index, and the
/// per-user session index. Never persisted.
pub struct WsState {
    sessions: DashMap<SessionId, SessionEntry>,
    rooms: DashMap<RoomKey, HashSet<SessionId>>,
    user_sessions: DashMap<UserId, HashSet<SessionId>>,
}

impl WsState {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            rooms: DashMap::new(),
            user_sessions: DashMap::new(),
        }
    }

    /// Register a connection. The caller owns the receiving half of the
    /// queue and runs the send loop.
    pub fn register(&self, session_id: &SessionId, user_id: &UserId) -> mpsc::Receiver<Outbound> {
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_CAPACITY);
        self.sessions.insert(
            session_id.clone(),
            SessionEntry {
                user_id: user_id.clone(),
                sender: tx,
                rooms: HashSet::new(),
            },
        );
        self.user_sessions
            .entry(user_id.clone())
            .or_default()
            .insert(session_id.clone());
        self.join_room(session_id, RoomKey::User(user_id.clone()));
        rx
    }

    /// The single disconnect hook: removes the session from every index and
    /// returns the rooms it was in.
    pub fn deregister(&self, session_id: &SessionId) -> Option<(UserId, HashSet<RoomKey>)> {
        let (_, entry) = self.sessions.remove(session_id)?;
        for key in &entry.rooms {
            if let Some(mut members) = self.rooms.get_mut(key) {
                members.remove(session_id);
            }
        }
        self.rooms.retain(|_, members| !members.is_empty());
        if let Some(mut sessions) = self.user_sessions.get_mut(&entry.user_id) {
            sessions.remove(session_id);
        }
        self.user_sessions.retain(|_, sessions| !sessions.is_empty());
        Some((entry.user_id, entry.rooms))
    }

    pub fn join_room(&self, session_id: &SessionId, key: RoomKey) {
        let Some(mut entry) = self.sessions.get_mut(session_id) else {
            return;
        };
        entry.rooms.insert(key.clone());
        drop(entry);
        self.rooms.entry(key).or_default().insert(session_id.clone());
    }

    pub fn leave_room(&self, session_id: &SessionId, key: &RoomKey) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.rooms.remove(key);
        }
        if let Some(mut members) = self.rooms.get_mut(key) {
            members.remove(session_id);
        }
        self.rooms.retain(|_, members| !members.is_empty());
    }

    pub fn session_user(&self, session_id: &SessionId) -> Option<UserId> {
        self.sessions.get(session_id).map(|e| e.user_id.clone())
    }

    pub fn sessions_of_user(&self, user_id: &UserId) -> Vec<SessionId> {
        self.user_sessions
            .get(user_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn room_members(&self, key: &RoomKey) -> Vec<SessionId> {
        self.rooms
            .get(key)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn send_to_session(&self, session_id: &SessionId, event: ServerEvent) {
        self.send_raw(session_id, Outbound::Event(event));
    }

    fn send_raw(&self, session_id: &SessionId, frame: Outbound) {
        if let Some(entry) = self.sessions.get(session_id) {
            if let Err(e) = entry.sender.try_send(frame) {
                tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    "dropping frame for saturated or closed session"
                );
            }
        }
    }

    /// Fan an event out to a room, optionally excluding one session (the
    /// sender of the triggering event).
    pub fn emit_room(&self, key: &RoomKey, event: &ServerEvent, except: Option<&SessionId>) {
        for session_id in self.room_members(key) {
            if Some(&session_id) == except {
                continue;
            }
            self.send_to_session(&session_id, event.clone());
        }
    }

    pub fn emit_user(&self, user_id: &UserId, event: &ServerEvent) {
        for session_id in self.sessions_of_user(user_id) {
            self.send_to_session(&session_id, event.clone());
        }
    }

    /// Close every socket a user holds, pushing `final_event` first.
    /// Used by kick and ban.
    pub fn close_user_sessions(&self, user_id: &UserId, final_event: Option<ServerEvent>) {
        for session_id in self.sessions_of_user(user_id) {
            if let Some(event) = &final_event {
                self.send_to_session(&session_id, event.clone());
            }
            self.send_raw(&session_id, Outbound::Close);
        }
    }
}

impl Default for WsState {
    fn default() -> Self {
        Self::new()
    }
}
