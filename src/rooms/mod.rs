mod api;
mod ws;

use axum::{Router, routing::get};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::room_ws))
        .route("/health", get(api::health))
        .route("/api/rooms/locate", get(api::locate))
        .route("/api/rooms/{room_id}/stats", get(api::room_stats))
}
