use axum::{
    Json, debug_handler,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};

use crate::{
    AppResult, Hub,
    error::BrokerError,
    geo::{self, Coordinates, DEFAULT_GEOHASH_PRECISION, DEFAULT_GRID_CELL_DEGREES, Partitioning},
    protocol::{HealthReport, RoomStats},
};

#[debug_handler(state = crate::AppState)]
pub async fn health(State(hub): State<Hub>) -> Json<HealthReport> {
    Json(hub.health().await)
}

#[debug_handler(state = crate::AppState)]
pub async fn room_stats(Path(room_id): Path<String>, State(hub): State<Hub>) -> AppResult<Json<RoomStats>> {
    Ok(Json(hub.room_stats(&room_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct LocateQuery {
    #[serde(alias = "lat")]
    latitude: f64,
    #[serde(alias = "lon", alias = "lng")]
    longitude: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Located {
    /// Id under the partitioning this server runs with.
    room_id: String,
    grid_room_id: String,
    geohash_room_id: String,
    geohash: String,
}

/// Which room a position belongs to, under both schemes.
#[debug_handler(state = crate::AppState)]
pub async fn locate(
    Query(query): Query<LocateQuery>,
    State(partitioning): State<Partitioning>,
) -> AppResult<Json<Located>> {
    let c = Coordinates::new(query.latitude, query.longitude);
    if !c.is_valid() {
        return Err(BrokerError::InvalidLocation.into());
    }

    let cell_degrees = match partitioning {
        Partitioning::Grid { cell_degrees } => cell_degrees,
        Partitioning::Geohash { .. } => DEFAULT_GRID_CELL_DEGREES,
    };
    let precision = match partitioning {
        Partitioning::Geohash { precision } => precision,
        Partitioning::Grid { .. } => DEFAULT_GEOHASH_PRECISION,
    };

    Ok(Json(Located {
        room_id: partitioning.room_id(c),
        grid_room_id: geo::grid_room_id(c, cell_degrees),
        geohash_room_id: geo::geohash_room_id(c, precision),
        geohash: geo::geohash(c, precision),
    }))
}
