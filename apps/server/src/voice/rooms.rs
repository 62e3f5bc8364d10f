use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use remus_shared::api::voice::{MediaKind, ProducerView};
use remus_shared::ids::{ChannelId, ConsumerId, ProducerId, SessionId, TransportId, UserId};

use super::media::{MediaConsumer, MediaProducer, MediaTransport};

/// A connected voice session for one socket in one voice channel. Owns its
/// media-plane handles; everything is dropped together on departure.
pub struct Peer {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub channel_id: ChannelId,
    pub transports: HashMap<TransportId, Arc<dyn MediaTransport>>,
    pub producers: HashMap<ProducerId, Arc<dyn MediaProducer>>,
    pub consumers: HashMap<ConsumerId, Arc<dyn MediaConsumer>>,
}

impl Peer {
    pub fn new(session_id: SessionId, user_id: UserId, channel_id: ChannelId) -> Self {
        Self {
            session_id,
            user_id,
            channel_id,
            transports: HashMap::new(),
            producers: HashMap::new(),
            consumers: HashMap::new(),
        }
    }
}

#[derive(Clone)]
pub struct ProducerEntry {
    pub producer: Arc<dyn MediaProducer>,
    pub peer_id: SessionId,
    pub user_id: UserId,
}

impl ProducerEntry {
    pub fn view(&self) -> ProducerView {
        ProducerView {
            producer_id: self.producer.id(),
            peer_id: self.peer_id.clone(),
            user_id: self.user_id.clone(),
            kind: self.producer.kind(),
            app_data: self.producer.app_data(),
        }
    }

    /// Audio producers plus screen-audio shares; the set force-mute closes.
    pub fn carries_audio(&self) -> bool {
        if self.producer.kind() == MediaKind::Audio {
            return true;
        }
        self.producer
            .app_data()
            .get("type")
            .and_then(|t| t.as_str())
            .map(|t| t == "screen-audio")
            .unwrap_or(false)
    }
}

#[derive(Default)]
pub struct Room {
    pub peers: HashMap<SessionId, Peer>,
    pub producers: HashMap<ProducerId, ProducerEntry>,
    pub speaking: HashSet<SessionId>,
}

/// Coordinator-owned room state. Keyed by voice channel; a room exists only
/// while it has peers.
pub struct VoiceRooms {
    rooms: DashMap<ChannelId, Room>,
    by_session: DashMap<SessionId, ChannelId>,
}

impl VoiceRooms {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            by_session: DashMap::new(),
        }
    }

    pub fn channel_of(&self, session_id: &SessionId) -> Option<ChannelId> {
        self.by_session.get(session_id).map(|c| c.clone())
    }

    pub fn insert_peer(&self, peer: Peer) {
        self.by_session
            .insert(peer.session_id.clone(), peer.channel_id.clone());
        self.rooms
            .entry(peer.channel_id.clone())
            .or_default()
            .peers
            .insert(peer.session_id.clone(), peer);
    }

    /// Remove a peer, returning it for media-plane cleanup. Empty rooms are
    /// dropped.
    pub fn remove_peer(&self, session_id: &SessionId) -> Option<Peer> {
        let (_, channel_id) = self.by_session.remove(session_id)?;
        let mut room = self.rooms.get_mut(&channel_id)?;
        let peer = room.peers.remove(session_id);
        room.producers.retain(|_, entry| &entry.peer_id != session_id);
        room.speaking.remove(session_id);
        let empty = room.peers.is_empty();
        drop(room);
        if empty {
            self.rooms.remove(&channel_id);
        }
        peer
    }

    pub fn with_room<T>(&self, channel_id: &ChannelId, f: impl FnOnce(&Room) -> T) -> Option<T> {
        self.rooms.get(channel_id).map(|room| f(&room))
    }

    pub fn with_room_mut<T>(
        &self,
        channel_id: &ChannelId,
        f: impl FnOnce(&mut Room) -> T,
    ) -> Option<T> {
        self.rooms.get_mut(channel_id).map(|mut room| f(&mut room))
    }

    pub fn with_peer_mut<T>(
        &self,
        session_id: &SessionId,
        f: impl FnOnce(&mut Peer) -> T,
    ) -> Option<T> {
        let channel_id = self.channel_of(session_id)?;
        let mut room = self.rooms.get_mut(&channel_id)?;
        room.peers.get_mut(session_id).map(f)
    }

    pub fn occupied_channels(&self) -> Vec<ChannelId> {
        self.rooms.iter().map(|entry| entry.key().clone()).collect()
    }

    /// All sessions of `user_id` currently in any voice room.
    pub fn sessions_of_user(&self, user_id: &UserId) -> Vec<SessionId> {
        let mut sessions = Vec::new();
        for room in self.rooms.iter() {
            for peer in room.peers.values() {
                if &peer.user_id == user_id {
                    sessions.push(peer.session_id.clone());
                }
            }
        }
        sessions
    }
}

impl Default for VoiceRooms {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(session: &str, user: &str, channel: &str) -> Peer {
        Peer::new(
            SessionId::from(session),
            UserId::from(user),
            ChannelId::from(channel),
        )
    }

    #[test]
    fn insert_and_remove_peer_maintains_indices() {
        let rooms = VoiceRooms::new();
        rooms.insert_peer(peer("s1", "u1", "c1"));
        assert_eq!(rooms.channel_of(&SessionId::from("s1")), Some(ChannelId::from("c1")));

        let removed = rooms.remove_peer(&SessionId::from("s1")).unwrap();
        assert_eq!(removed.user_id, UserId::from("u1"));
        assert!(rooms.channel_of(&SessionId::from("s1")).is_none());
        // Empty room is gone.
        assert!(rooms.occupied_channels().is_empty());
    }

    #[test]
    fn remove_peer_keeps_room_with_other_peers() {
        let rooms = VoiceRooms::new();
        rooms.insert_peer(peer("s1", "u1", "c1"));
        rooms.insert_peer(peer("s2", "u2", "c1"));
        rooms.remove_peer(&SessionId::from("s1"));
        assert_eq!(rooms.occupied_channels(), vec![ChannelId::from("c1")]);
        let count = rooms
            .with_room(&ChannelId::from("c1"), |room| room.peers.len())
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn same_user_twice_yields_two_sessions() {
        let rooms = VoiceRooms::new();
        rooms.insert_peer(peer("s1", "u1", "c1"));
        rooms.insert_peer(peer("s2", "u1", "c1"));
        let mut sessions = rooms.sessions_of_user(&UserId::from("u1"));
        sessions.sort();
        assert_eq!(sessions, vec![SessionId::from("s1"), SessionId::from("s2")]);
    }

    #[test]
    fn speaking_set_clears_with_the_peer() {
        let rooms = VoiceRooms::new();
        rooms.insert_peer(peer("s1", "u1", "c1"));
        rooms.insert_peer(peer("s2", "u2", "c1"));
        rooms
            .with_room_mut(&ChannelId::from("c1"), |room| {
                room.speaking.insert(SessionId::from("s1"));
            })
            .unwrap();
        rooms.remove_peer(&SessionId::from("s1"));
        let speaking = rooms
            .with_room(&ChannelId::from("c1"), |room| room.speaking.len())
            .unwrap();
        assert_eq!(speaking, 0);
    }
}
