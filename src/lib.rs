pub mod appresult;
pub mod broker;
pub mod config;
pub mod error;
pub mod filter;
pub mod geo;
pub mod hub;
pub mod protocol;
pub mod rooms;

use std::fmt;

use axum::{Router, extract::FromRef};
use time::OffsetDateTime;
use uuid::Uuid;

pub use appresult::{AppError, AppResult};
pub use broker::RoomBroker;
pub use hub::Hub;

/// Unix epoch milliseconds.
pub type Millis = i64;
pub type RoomId = String;
pub type UserId = String;

pub fn now_millis() -> Millis {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as Millis
}

/// One websocket connection. Never shown to other users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

#[derive(Clone, FromRef)]
pub struct AppState {
    pub hub: Hub,
    pub partitioning: geo::Partitioning,
}

pub fn router(state: AppState) -> Router {
    rooms::router().with_state(state)
}
