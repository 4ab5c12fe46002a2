//! The room broker: who is in which room, what they said, and who is banned.
//!
//! The broker never touches a socket. Every operation takes the calling connection and the
//! current time, mutates state only when it accepts the event, and hands back the
//! [`Delivery`] list the transport layer has to carry out.

mod room;
mod schedule;

use std::{collections::HashMap, time::Duration};

use tracing::{debug, info, warn};
use uuid::Uuid;

pub use room::{Ban, Member, Reputation, Room};
pub use schedule::{Schedule, Task};

use crate::{
    ConnectionId, Millis, RoomId, UserId,
    config::BrokerSettings,
    error::BrokerError,
    filter::MessageFilter,
    geo::{Coordinates, anonymize_location, has_moved},
    protocol::{
        ChatMessage, ClientEvent, HealthReport, LocationPayload, MessageSender, NearbyUser, NotificationKind,
        RoomStats, ServerEvent, UserSnapshot,
    },
};

const DAY_MILLIS: Millis = 24 * 60 * 60 * 1000;

/// Moves shorter than this keep the old location and stay quiet.
pub const MIN_MOVE_METERS: f64 = 10.0;

pub const REPORT_BAN_REASON: &str = "accumulated reports";

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event { to: ConnectionId, event: ServerEvent },
    /// Drop the connection after flushing what was queued before it.
    Close(ConnectionId),
}

impl Delivery {
    pub fn event(to: ConnectionId, event: ServerEvent) -> Self {
        Delivery::Event { to, event }
    }
}

pub type BrokerResult = Result<Vec<Delivery>, BrokerError>;

fn fan_out(to: impl IntoIterator<Item = ConnectionId>, event: ServerEvent) -> Vec<Delivery> {
    to.into_iter().map(|conn| Delivery::event(conn, event.clone())).collect()
}

fn millis(d: Duration) -> Millis {
    Millis::try_from(d.as_millis()).unwrap_or(Millis::MAX)
}

pub struct RoomBroker {
    settings: BrokerSettings,
    filter: MessageFilter,
    rooms: HashMap<RoomId, Room>,
    members: HashMap<ConnectionId, Member>,
    reputation: HashMap<UserId, Reputation>,
    bans: HashMap<UserId, Ban>,
    schedule: Schedule,
}

impl RoomBroker {
    pub fn new(settings: BrokerSettings) -> Result<Self, regex::Error> {
        let filter = MessageFilter::new(&settings.banned_words)?;
        Ok(Self {
            settings,
            filter,
            rooms: HashMap::new(),
            members: HashMap::new(),
            reputation: HashMap::new(),
            bans: HashMap::new(),
            schedule: Schedule::default(),
        })
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// Runs one inbound event. Rejections come back as an error event for the caller.
    pub fn handle(&mut self, conn: ConnectionId, event: ClientEvent, now: Millis) -> Vec<Delivery> {
        let outcome = match event {
            ClientEvent::JoinRoom { room_id, location, user } => {
                let location = location.as_ref().and_then(LocationPayload::coordinates);
                return self.join(conn, &room_id, location, user, now).unwrap_or_else(|err| {
                    debug!(%conn, room_id = room_id.as_str(), error = err.code(), "join rejected");
                    vec![Delivery::event(conn, ServerEvent::join_error(&err))]
                });
            }
            ClientEvent::SendMessage { room_id, content } => self.send(conn, &room_id, &content, now),
            ClientEvent::LikeUser { target_user_id, from_user_id } => {
                self.like(conn, &target_user_id, &from_user_id, now)
            }
            ClientEvent::ReportUser { target_user_id, from_user_id, reason } => {
                self.report(conn, &target_user_id, &from_user_id, &reason, now)
            }
            ClientEvent::UpdateLocation { room_id, location } => {
                let location = location.as_ref().and_then(LocationPayload::coordinates);
                self.update_location(conn, &room_id, location, now)
            }
            ClientEvent::LeaveRoom { room_id } => Ok(self.leave(conn, &room_id, now)),
            ClientEvent::GetRoomStats { room_id } => self
                .room_stats(&room_id)
                .map(|stats| vec![Delivery::event(conn, ServerEvent::RoomStats(stats))]),
        };

        outcome.unwrap_or_else(|err| {
            debug!(%conn, error = err.code(), "event rejected");
            vec![Delivery::event(conn, ServerEvent::error(&err))]
        })
    }

    pub fn join(
        &mut self,
        conn: ConnectionId,
        room_id: &str,
        location: Option<Coordinates>,
        user: UserSnapshot,
        now: Millis,
    ) -> BrokerResult {
        self.check_ban(&user.id, now)?;
        let location = location.filter(Coordinates::is_valid).ok_or(BrokerError::InvalidLocation)?;
        if room_id.trim().is_empty() {
            return Err(BrokerError::InvalidRoom);
        }

        let mut out = Vec::new();

        // one room per connection: moving on, or coming back as someone else, means leaving first
        let previous = self.members.get(&conn).and_then(|m| {
            let same_user = m.user.id == user.id;
            m.room.clone().filter(|prev| !same_user || prev != room_id)
        });
        if let Some(previous) = previous {
            out.extend(self.leave(conn, &previous, now));
        }

        self.reputation
            .entry(user.id.clone())
            .or_insert(Reputation { likes: user.like_count, reports: 0 });
        let like_count = self.like_count_of(&user);

        let announce = ServerEvent::UserJoined {
            id: user.id.clone(),
            nickname: user.nickname.clone(),
            is_blue_verified: user.is_blue_verified,
            like_count,
            joined_at: now,
        };
        info!(%conn, room_id, user_id = user.id.as_str(), nickname = user.nickname.as_str(), "joined room");

        let room = self.rooms.entry(room_id.to_owned()).or_insert_with(|| {
            info!(room_id, "room created");
            Room::new(room_id.to_owned(), now)
        });
        let newly_added = room.members.insert(conn);
        room.last_activity = now;

        out.push(Delivery::event(
            conn,
            ServerEvent::RoomJoined {
                room_id: room_id.to_owned(),
                user_count: room.members.len(),
                success: true,
            },
        ));
        if newly_added {
            out.extend(fan_out(room.members.iter().copied().filter(|c| *c != conn), announce));
        }

        self.members.insert(
            conn,
            Member {
                connection: conn,
                user,
                location: Some(location),
                room: Some(room_id.to_owned()),
                joined_at: now,
                last_activity: now,
            },
        );

        out.extend(self.nearby_update(room_id));
        Ok(out)
    }

    pub fn send(&mut self, conn: ConnectionId, room_id: &str, text: &str, now: Millis) -> BrokerResult {
        let member = self.members.get(&conn).ok_or(BrokerError::UnknownUser)?;
        self.check_ban(&member.user.id, now)?;
        if text.trim().is_empty() {
            return Err(BrokerError::EmptyMessage);
        }
        let max = self.settings.max_message_chars;
        if text.chars().count() > max {
            return Err(BrokerError::MessageTooLong { max });
        }
        let in_room = member.is_in(room_id) && self.rooms.get(room_id).is_some_and(|r| r.members.contains(&conn));
        if !in_room {
            return Err(BrokerError::NotAMember(room_id.to_owned()));
        }

        let filtered = self.filter.filter(text);
        let message = ChatMessage {
            id: Uuid::now_v7(),
            room_id: room_id.to_owned(),
            sender: MessageSender {
                id: member.user.id.clone(),
                nickname: member.user.nickname.clone(),
                is_blue_verified: member.user.is_blue_verified,
                like_count: self.like_count_of(&member.user),
            },
            content: filtered.text,
            has_violation: filtered.flagged,
            timestamp: now,
            expires_at: now.saturating_add(millis(self.settings.message_ttl)),
        };

        if let Some(member) = self.members.get_mut(&conn) {
            member.last_activity = now;
        }
        let Some(room) = self.rooms.get_mut(room_id) else {
            return Err(BrokerError::NotAMember(room_id.to_owned()));
        };
        room.messages.push(message.clone());
        room.last_activity = now;

        debug!(%conn, room_id, message_id = %message.id, flagged = message.has_violation, "message sent");
        Ok(fan_out(room.members.iter().copied(), ServerEvent::NewMessage(message)))
    }

    pub fn like(&mut self, conn: ConnectionId, target_user_id: &str, from_user_id: &str, now: Millis) -> BrokerResult {
        let liker = self.caller(conn, from_user_id)?.public();
        if target_user_id == liker.id {
            return Err(BrokerError::SelfLike);
        }

        let rep = self.reputation.entry(target_user_id.to_owned()).or_default();
        rep.likes += 1;
        let new_like_count = rep.likes;
        info!(from = liker.id.as_str(), target = target_user_id, new_like_count, "user liked");

        let event = ServerEvent::LikeReceived {
            from_user: liker,
            new_like_count,
            timestamp: now,
        };
        Ok(fan_out(self.connections_of(target_user_id), event))
    }

    pub fn report(
        &mut self,
        conn: ConnectionId,
        target_user_id: &str,
        from_user_id: &str,
        reason: &str,
        now: Millis,
    ) -> BrokerResult {
        let reporter = self.caller(conn, from_user_id)?.user.id.clone();

        let threshold = self.settings.report_threshold;
        let rep = self.reputation.entry(target_user_id.to_owned()).or_default();
        rep.reports += 1;
        let reports = rep.reports;
        let crossed = reports >= threshold;
        if crossed {
            rep.reports = 0;
        }
        info!(reporter = reporter.as_str(), target = target_user_id, reason, reports, "user reported");

        let mut out = Vec::new();
        if crossed {
            let days = self.settings.ban_days;
            out.extend(self.ban(target_user_id, REPORT_BAN_REASON, days, now));
        }
        out.push(Delivery::event(
            conn,
            ServerEvent::SystemNotification {
                kind: NotificationKind::ReportSuccess,
                message: "report received".to_owned(),
                ban_days: None,
                timestamp: now,
            },
        ));
        Ok(out)
    }

    /// Records the new location and rebroadcasts the nearby list, unless the member barely moved.
    /// Deciding whether the move means a different room is up to the client.
    pub fn update_location(
        &mut self,
        conn: ConnectionId,
        room_id: &str,
        location: Option<Coordinates>,
        now: Millis,
    ) -> BrokerResult {
        let Some(member) = self.members.get_mut(&conn) else {
            return Ok(Vec::new());
        };
        let location = location.filter(Coordinates::is_valid).ok_or(BrokerError::InvalidLocation)?;
        if !member.is_in(room_id) {
            return Err(BrokerError::NotAMember(room_id.to_owned()));
        }

        member.last_activity = now;
        if !has_moved(member.location, location, MIN_MOVE_METERS) {
            return Ok(Vec::new());
        }
        member.location = Some(location);
        Ok(self.nearby_update(room_id))
    }

    /// Leaving a room one is not in does nothing.
    pub fn leave(&mut self, conn: ConnectionId, room_id: &str, now: Millis) -> Vec<Delivery> {
        let Some(member) = self.members.get_mut(&conn) else {
            return Vec::new();
        };
        let Some(room) = self.rooms.get_mut(room_id) else {
            return Vec::new();
        };
        if !room.members.remove(&conn) {
            return Vec::new();
        }
        if member.is_in(room_id) {
            member.room = None;
        }
        room.last_activity = now;

        info!(%conn, room_id, user_id = member.user.id.as_str(), "left room");
        let out = fan_out(
            room.members.iter().copied(),
            ServerEvent::UserLeft {
                id: member.user.id.clone(),
                nickname: member.user.nickname.clone(),
                left_at: now,
            },
        );

        if room.members.is_empty() {
            self.rooms.remove(room_id);
            info!(room_id, "room deleted");
        }
        out
    }

    pub fn disconnect(&mut self, conn: ConnectionId, now: Millis) -> Vec<Delivery> {
        let Some(current) = self.members.get(&conn).map(|m| m.room.clone()) else {
            return Vec::new();
        };
        let out = match current {
            Some(room_id) => self.leave(conn, &room_id, now),
            None => Vec::new(),
        };
        if let Some(member) = self.members.remove(&conn) {
            info!(%conn, user_id = member.user.id.as_str(), "member disconnected");
        }
        out
    }

    /// Bans `user_id` for `days`, warns its live connections and drops them after the grace period.
    pub fn ban(&mut self, user_id: &str, reason: &str, days: u32, now: Millis) -> Vec<Delivery> {
        let expires_at = now.saturating_add(Millis::from(days).saturating_mul(DAY_MILLIS));
        self.bans.insert(
            user_id.to_owned(),
            Ban {
                user_id: user_id.to_owned(),
                reason: reason.to_owned(),
                issued_at: now,
                expires_at,
            },
        );
        self.schedule.push(expires_at, Task::LiftBan(user_id.to_owned()));
        warn!(user_id, reason, days, "user banned");

        let notice = ServerEvent::SystemNotification {
            kind: NotificationKind::Banned,
            message: format!("your account is suspended for {days} days ({reason})"),
            ban_days: Some(days),
            timestamp: now,
        };
        let drop_at = now.saturating_add(millis(self.settings.ban_disconnect_grace));

        let connections = self.connections_of(user_id);
        for conn in &connections {
            self.schedule.push(drop_at, Task::Disconnect(*conn));
        }
        fan_out(connections, notice)
    }

    /// Members of the room with a known location. The whole room counts as nearby.
    pub fn nearby_members(&self, room_id: &str) -> Vec<NearbyUser> {
        let Some(room) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        let jitter = self.settings.location_jitter_meters;
        let mut rng = rand::rng();

        room.members
            .iter()
            .filter_map(|conn| self.members.get(conn))
            .filter_map(|member| {
                let location = member.location?;
                let location = if jitter > 0.0 {
                    anonymize_location(location, jitter, &mut rng)
                } else {
                    location
                };
                Some(NearbyUser {
                    id: member.user.id.clone(),
                    nickname: member.user.nickname.clone(),
                    is_blue_verified: member.user.is_blue_verified,
                    like_count: self.like_count_of(&member.user),
                    location,
                })
            })
            .collect()
    }

    pub fn room_stats(&self, room_id: &str) -> Result<RoomStats, BrokerError> {
        self.rooms
            .get(room_id)
            .map(Room::stats)
            .ok_or_else(|| BrokerError::RoomNotFound(room_id.to_owned()))
    }

    pub fn health(&self, now: Millis) -> HealthReport {
        let mut rooms: Vec<RoomStats> = self.rooms.values().map(Room::stats).collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        HealthReport {
            status: "ok",
            connected_users: self.members.len(),
            active_rooms: self.rooms.len(),
            rooms,
            timestamp: now,
        }
    }

    /// Drops expired messages everywhere. Rooms stay even if they end up silent.
    pub fn sweep_expired(&mut self, now: Millis) -> usize {
        let mut total = 0;
        for room in self.rooms.values_mut() {
            let removed = room.prune(now);
            if removed > 0 {
                debug!(room_id = room.id.as_str(), removed, "pruned expired messages");
            }
            total += removed;
        }
        if total > 0 {
            info!(removed = total, "message sweep finished");
        }
        total
    }

    /// Runs every scheduled task that is due at `now`.
    pub fn run_due(&mut self, now: Millis) -> Vec<Delivery> {
        let mut out = Vec::new();
        while let Some(task) = self.schedule.pop_due(now) {
            match task {
                Task::LiftBan(user_id) => {
                    // a re-ban may have pushed the expiry out since this task was queued
                    if self.bans.get(&user_id).is_some_and(|ban| !ban.is_active(now)) {
                        self.bans.remove(&user_id);
                        info!(user_id = user_id.as_str(), "ban lifted");
                    }
                }
                Task::Disconnect(conn) => {
                    out.extend(self.disconnect(conn, now));
                    out.push(Delivery::Close(conn));
                }
            }
        }
        out
    }

    pub fn next_due(&self) -> Option<Millis> {
        self.schedule.next_due()
    }

    pub fn is_banned(&self, user_id: &str, now: Millis) -> bool {
        self.bans.get(user_id).is_some_and(|ban| ban.is_active(now))
    }

    /// `BANNED_USER` with the end of the ban and the days left, rounded up.
    fn check_ban(&self, user_id: &str, now: Millis) -> Result<(), BrokerError> {
        match self.bans.get(user_id).filter(|ban| ban.is_active(now)) {
            Some(ban) => {
                let left = ban.expires_at - now;
                let days_left = u32::try_from((left + DAY_MILLIS - 1) / DAY_MILLIS).unwrap_or(u32::MAX);
                Err(BrokerError::Banned { expires_at: ban.expires_at, days_left })
            }
            None => Ok(()),
        }
    }

    pub fn ban_record(&self, user_id: &str) -> Option<&Ban> {
        self.bans.get(user_id)
    }

    pub fn reputation(&self, user_id: &str) -> Reputation {
        self.reputation.get(user_id).copied().unwrap_or_default()
    }

    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn member(&self, conn: ConnectionId) -> Option<&Member> {
        self.members.get(&conn)
    }

    fn caller(&self, conn: ConnectionId, claimed_user_id: &str) -> Result<&Member, BrokerError> {
        self.members
            .get(&conn)
            .filter(|m| m.user.id == claimed_user_id)
            .ok_or(BrokerError::Unauthorized)
    }

    fn connections_of(&self, user_id: &str) -> Vec<ConnectionId> {
        let mut conns: Vec<ConnectionId> = self
            .members
            .values()
            .filter(|m| m.user.id == user_id)
            .map(|m| m.connection)
            .collect();
        conns.sort();
        conns
    }

    fn like_count_of(&self, user: &UserSnapshot) -> u64 {
        self.reputation.get(&user.id).map_or(user.like_count, |rep| rep.likes)
    }

    fn nearby_update(&self, room_id: &str) -> Vec<Delivery> {
        let Some(room) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        fan_out(room.members.iter().copied(), ServerEvent::NearbyUsersUpdated(self.nearby_members(room_id)))
    }
}
