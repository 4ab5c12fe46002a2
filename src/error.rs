use thiserror::Error;

use crate::Millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    NotFound,
}

/// Why the broker turned an event down. Nothing is mutated when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("location is missing or invalid")]
    InvalidLocation,
    #[error("room id is missing")]
    InvalidRoom,
    #[error("message is empty")]
    EmptyMessage,
    #[error("message is too long (max {max} characters)")]
    MessageTooLong { max: usize },
    #[error("not a member of room {0}")]
    NotAMember(String),
    #[error("malformed event: {0}")]
    Malformed(String),

    #[error("banned users cannot chat ({days_left} more days)")]
    Banned { expires_at: Millis, days_left: u32 },
    #[error("caller does not match the claimed user")]
    Unauthorized,
    #[error("you cannot like yourself")]
    SelfLike,

    #[error("join a room first")]
    UnknownUser,
    #[error("room {0} not found")]
    RoomNotFound(String),
}

impl BrokerError {
    /// Stable reason code sent to clients.
    pub fn code(&self) -> &'static str {
        use BrokerError::*;
        match self {
            InvalidLocation => "INVALID_LOCATION",
            InvalidRoom => "INVALID_ROOM",
            EmptyMessage => "EMPTY_MESSAGE",
            MessageTooLong { .. } => "MESSAGE_TOO_LONG",
            NotAMember(_) => "NOT_A_MEMBER",
            Malformed(_) => "MALFORMED_EVENT",
            Banned { .. } => "BANNED_USER",
            Unauthorized => "UNAUTHORIZED",
            SelfLike => "SELF_LIKE",
            UnknownUser => "UNKNOWN_USER",
            RoomNotFound(_) => "ROOM_NOT_FOUND",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        use BrokerError::*;
        match self {
            InvalidLocation | InvalidRoom | EmptyMessage | MessageTooLong { .. } | NotAMember(_) | Malformed(_) => {
                ErrorKind::Validation
            }
            Banned { .. } | Unauthorized | SelfLike => ErrorKind::Authorization,
            UnknownUser | RoomNotFound(_) => ErrorKind::NotFound,
        }
    }
}
