use std::collections::BTreeSet;

use crate::{
    ConnectionId, Millis, RoomId, UserId,
    geo::Coordinates,
    protocol::{ChatMessage, PublicUser, RoomStats, UserSnapshot},
};

#[derive(Debug)]
pub struct Room {
    pub id: RoomId,
    pub members: BTreeSet<ConnectionId>,
    /// In send order.
    pub messages: Vec<ChatMessage>,
    pub created_at: Millis,
    pub last_activity: Millis,
}

impl Room {
    pub fn new(id: RoomId, now: Millis) -> Self {
        Self {
            id,
            members: BTreeSet::new(),
            messages: Vec::new(),
            created_at: now,
            last_activity: now,
        }
    }

    pub fn stats(&self) -> RoomStats {
        RoomStats {
            room_id: self.id.clone(),
            user_count: self.members.len(),
            message_count: self.messages.len(),
            last_activity: self.last_activity,
        }
    }

    /// Drops expired messages and returns how many went.
    pub fn prune(&mut self, now: Millis) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| !m.is_expired(now));
        before - self.messages.len()
    }
}

#[derive(Debug, Clone)]
pub struct Member {
    pub connection: ConnectionId,
    pub user: UserSnapshot,
    pub location: Option<Coordinates>,
    pub room: Option<RoomId>,
    pub joined_at: Millis,
    pub last_activity: Millis,
}

impl Member {
    pub fn public(&self) -> PublicUser {
        PublicUser {
            id: self.user.id.clone(),
            nickname: self.user.nickname.clone(),
            is_blue_verified: self.user.is_blue_verified,
        }
    }

    pub fn is_in(&self, room_id: &str) -> bool {
        self.room.as_deref() == Some(room_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reputation {
    pub likes: u64,
    pub reports: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ban {
    pub user_id: UserId,
    pub reason: String,
    pub issued_at: Millis,
    pub expires_at: Millis,
}

impl Ban {
    pub fn is_active(&self, now: Millis) -> bool {
        now < self.expires_at
    }
}
