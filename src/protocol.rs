//! JSON envelopes exchanged over the room websocket.
//!
//! Every frame is `{"event": "<snake_case name>", "data": {...}}` with camelCase fields,
//! which is what the existing web clients speak.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Millis, RoomId, UserId, error::BrokerError, geo::Coordinates};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    JoinRoom {
        room_id: RoomId,
        #[serde(default)]
        location: Option<LocationPayload>,
        user: UserSnapshot,
    },
    SendMessage {
        room_id: RoomId,
        #[serde(default)]
        content: String,
    },
    LikeUser {
        target_user_id: UserId,
        from_user_id: UserId,
    },
    ReportUser {
        target_user_id: UserId,
        from_user_id: UserId,
        #[serde(default)]
        reason: String,
    },
    UpdateLocation {
        room_id: RoomId,
        #[serde(default)]
        location: Option<LocationPayload>,
    },
    LeaveRoom {
        room_id: RoomId,
    },
    GetRoomStats {
        room_id: RoomId,
    },
}

/// Location as clients send it; any part may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct LocationPayload {
    #[serde(default, alias = "lat")]
    pub latitude: Option<f64>,
    #[serde(default, alias = "lon", alias = "lng")]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
}

impl LocationPayload {
    pub fn coordinates(&self) -> Option<Coordinates> {
        let c = Coordinates::new(self.latitude?, self.longitude?);
        c.is_valid().then_some(c)
    }
}

impl From<Coordinates> for LocationPayload {
    fn from(c: Coordinates) -> Self {
        Self { latitude: Some(c.latitude), longitude: Some(c.longitude), accuracy: None }
    }
}

/// What the client claims about itself when joining.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    pub id: UserId,
    pub nickname: String,
    #[serde(default, alias = "isBlueCheck")]
    pub is_blue_verified: bool,
    #[serde(default)]
    pub like_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: UserId,
    pub nickname: String,
    pub is_blue_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSender {
    pub id: UserId,
    pub nickname: String,
    pub is_blue_verified: bool,
    pub like_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub room_id: RoomId,
    pub sender: MessageSender,
    pub content: String,
    pub has_violation: bool,
    pub timestamp: Millis,
    pub expires_at: Millis,
}

impl ChatMessage {
    pub fn is_expired(&self, now: Millis) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyUser {
    pub id: UserId,
    pub nickname: String,
    pub is_blue_verified: bool,
    pub like_count: u64,
    pub location: Coordinates,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    pub room_id: RoomId,
    pub user_count: usize,
    pub message_count: usize,
    pub last_activity: Millis,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub connected_users: usize,
    pub active_rooms: usize,
    pub rooms: Vec<RoomStats>,
    pub timestamp: Millis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ReportSuccess,
    Banned,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    RoomJoined {
        room_id: RoomId,
        user_count: usize,
        success: bool,
    },
    RoomJoinError {
        error: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        ban_end_date: Option<Millis>,
        #[serde(skip_serializing_if = "Option::is_none")]
        remaining_days: Option<u32>,
    },
    UserJoined {
        id: UserId,
        nickname: String,
        is_blue_verified: bool,
        like_count: u64,
        joined_at: Millis,
    },
    NewMessage(ChatMessage),
    LikeReceived {
        from_user: PublicUser,
        new_like_count: u64,
        timestamp: Millis,
    },
    SystemNotification {
        #[serde(rename = "type")]
        kind: NotificationKind,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        ban_days: Option<u32>,
        timestamp: Millis,
    },
    NearbyUsersUpdated(Vec<NearbyUser>),
    UserLeft {
        id: UserId,
        nickname: String,
        left_at: Millis,
    },
    RoomStats(RoomStats),
    Error {
        error: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        ban_end_date: Option<Millis>,
        #[serde(skip_serializing_if = "Option::is_none")]
        remaining_days: Option<u32>,
    },
}

impl ServerEvent {
    pub fn error(err: &BrokerError) -> Self {
        let (ban_end_date, remaining_days) = ban_details(err);
        ServerEvent::Error {
            error: err.code().to_owned(),
            message: err.to_string(),
            ban_end_date,
            remaining_days,
        }
    }

    pub fn join_error(err: &BrokerError) -> Self {
        let (ban_end_date, remaining_days) = ban_details(err);
        ServerEvent::RoomJoinError {
            error: err.code().to_owned(),
            message: err.to_string(),
            ban_end_date,
            remaining_days,
        }
    }
}

fn ban_details(err: &BrokerError) -> (Option<Millis>, Option<u32>) {
    match *err {
        BrokerError::Banned { expires_at, days_left } => (Some(expires_at), Some(days_left)),
        _ => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_join() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "join_room",
            "data": {
                "roomId": "room_1_2",
                "location": { "latitude": 37.5, "longitude": 127.0, "accuracy": 12.0 },
                "user": { "id": "u1", "nickname": "Quick Fox", "isBlueVerified": true, "likeCount": 3 }
            }
        }))
        .unwrap();

        let ClientEvent::JoinRoom { room_id, location, user } = event else {
            panic!("expected join, got {event:?}");
        };
        assert_eq!(room_id, "room_1_2");
        assert_eq!(location.and_then(|l| l.coordinates()), Some(Coordinates::new(37.5, 127.0)));
        assert!(user.is_blue_verified);
        assert_eq!(user.like_count, 3);
    }

    #[test]
    fn location_aliases_and_gaps() {
        let loc: LocationPayload = serde_json::from_value(json!({ "lat": 1.0, "lng": 2.0 })).unwrap();
        assert_eq!(loc.coordinates(), Some(Coordinates::new(1.0, 2.0)));

        let loc: LocationPayload = serde_json::from_value(json!({ "lat": 1.0 })).unwrap();
        assert_eq!(loc.coordinates(), None);

        let loc: LocationPayload = serde_json::from_value(json!({ "lat": 91.0, "lon": 0.0 })).unwrap();
        assert_eq!(loc.coordinates(), None);
    }

    #[test]
    fn join_without_location_still_parses() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "join_room",
            "data": { "roomId": "r", "user": { "id": "u1", "nickname": "n" } }
        }))
        .unwrap();
        assert!(matches!(event, ClientEvent::JoinRoom { location: None, .. }));
    }

    #[test]
    fn server_events_use_camel_case() {
        let value = serde_json::to_value(ServerEvent::RoomJoined {
            room_id: "r".into(),
            user_count: 2,
            success: true,
        })
        .unwrap();
        assert_eq!(value, json!({ "event": "room_joined", "data": { "roomId": "r", "userCount": 2, "success": true } }));

        let value = serde_json::to_value(ServerEvent::SystemNotification {
            kind: NotificationKind::ReportSuccess,
            message: "ok".into(),
            ban_days: None,
            timestamp: 5,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({ "event": "system_notification", "data": { "type": "report_success", "message": "ok", "timestamp": 5 } })
        );
    }

    #[test]
    fn errors_carry_codes() {
        let banned = BrokerError::Banned { expires_at: 1_700_000_000_000, days_left: 3 };
        let value = serde_json::to_value(ServerEvent::join_error(&banned)).unwrap();
        assert_eq!(value["event"], "room_join_error");
        assert_eq!(value["data"]["error"], "BANNED_USER");
        assert_eq!(value["data"]["banEndDate"], 1_700_000_000_000_i64);
        assert_eq!(value["data"]["remainingDays"], 3);

        let value = serde_json::to_value(ServerEvent::error(&BrokerError::EmptyMessage)).unwrap();
        assert_eq!(value["data"], json!({ "error": "EMPTY_MESSAGE", "message": "message is empty" }));
    }
}
