//! Coordinate math used to partition chatters into rooms.
//!
//! Everything here is pure. Distances are always meters.

use std::{fmt, str::FromStr};

use rand::Rng;
use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Roughly one kilometer at the equator.
pub const DEFAULT_GRID_CELL_DEGREES: f64 = 0.009;
pub const DEFAULT_GEOHASH_PRECISION: usize = 6;

const METERS_PER_DEGREE: f64 = 111_000.0;
const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Haversine great-circle distance.
pub fn distance_meters(a: Coordinates, b: Coordinates) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_METERS * c
}

pub fn is_within_radius(a: Coordinates, b: Coordinates, radius_km: f64) -> bool {
    distance_meters(a, b) <= radius_km * 1000.0
}

/// Whether moving from `prev` to `next` is worth reporting.
pub fn has_moved(prev: Option<Coordinates>, next: Coordinates, min_meters: f64) -> bool {
    match prev {
        Some(prev) => distance_meters(prev, next) >= min_meters,
        None => true,
    }
}

pub fn grid_room_id(c: Coordinates, cell_degrees: f64) -> String {
    let cell = if cell_degrees.is_finite() && cell_degrees > 0.0 {
        cell_degrees
    } else {
        DEFAULT_GRID_CELL_DEGREES
    };

    // float -> int casts saturate, so garbage input yields a garbage id rather than a panic
    let lat_cell = (c.latitude / cell).floor() as i64;
    let lon_cell = (c.longitude / cell).floor() as i64;
    format!("room_{lat_cell}_{lon_cell}")
}

pub fn geohash(c: Coordinates, precision: usize) -> String {
    let mut lat_range = (-90.0, 90.0);
    let mut lon_range = (-180.0, 180.0);
    let mut hash = String::with_capacity(precision);

    let mut idx = 0usize;
    let mut bit = 0;
    let mut even_bit = true;

    while hash.len() < precision {
        let (range, value) = if even_bit {
            (&mut lon_range, c.longitude)
        } else {
            (&mut lat_range, c.latitude)
        };

        let mid = (range.0 + range.1) / 2.0;
        if value >= mid {
            idx = (idx << 1) | 1;
            range.0 = mid;
        } else {
            idx <<= 1;
            range.1 = mid;
        }
        even_bit = !even_bit;

        bit += 1;
        if bit == 5 {
            hash.push(BASE32[idx] as char);
            bit = 0;
            idx = 0;
        }
    }

    hash
}

pub fn geohash_room_id(c: Coordinates, precision: usize) -> String {
    format!("chat_{}", geohash(c, precision))
}

/// Nudges a location by up to half of `radius_meters` along each axis.
///
/// This only blurs what other chatters see; it is not a privacy guarantee.
pub fn anonymize_location<R: Rng + ?Sized>(c: Coordinates, radius_meters: f64, rng: &mut R) -> Coordinates {
    let lat_offset = (rng.random::<f64>() - 0.5) * (radius_meters / METERS_PER_DEGREE);

    let lon_scale = METERS_PER_DEGREE * c.latitude.to_radians().cos();
    let lon_offset = if lon_scale.abs() > f64::EPSILON {
        (rng.random::<f64>() - 0.5) * (radius_meters / lon_scale)
    } else {
        0.0
    };

    Coordinates::new(c.latitude + lat_offset, c.longitude + lon_offset)
}

/// How coordinates are turned into room ids.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Partitioning {
    Grid { cell_degrees: f64 },
    Geohash { precision: usize },
}

impl Partitioning {
    pub fn room_id(&self, c: Coordinates) -> String {
        match *self {
            Partitioning::Grid { cell_degrees } => grid_room_id(c, cell_degrees),
            Partitioning::Geohash { precision } => geohash_room_id(c, precision),
        }
    }
}

impl Default for Partitioning {
    fn default() -> Self {
        Partitioning::Grid { cell_degrees: DEFAULT_GRID_CELL_DEGREES }
    }
}

impl fmt::Display for Partitioning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Partitioning::Grid { cell_degrees } => write!(f, "grid({cell_degrees}°)"),
            Partitioning::Geohash { precision } => write!(f, "geohash({precision})"),
        }
    }
}

/// Parses `grid`, `grid:<degrees>`, `geohash` or `geohash:<precision>`.
impl FromStr for Partitioning {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, arg) = match s.split_once(':') {
            Some((kind, arg)) => (kind.trim(), Some(arg.trim())),
            None => (s.trim(), None),
        };

        match kind.to_ascii_lowercase().as_str() {
            "grid" => {
                let cell_degrees = match arg {
                    Some(arg) => arg.parse::<f64>().map_err(|e| format!("bad grid cell size {arg:?}: {e}"))?,
                    None => DEFAULT_GRID_CELL_DEGREES,
                };
                if !(cell_degrees.is_finite() && cell_degrees > 0.0) {
                    return Err(format!("grid cell size must be positive, got {cell_degrees}"));
                }
                Ok(Partitioning::Grid { cell_degrees })
            }
            "geohash" => {
                let precision = match arg {
                    Some(arg) => arg.parse::<usize>().map_err(|e| format!("bad geohash precision {arg:?}: {e}"))?,
                    None => DEFAULT_GEOHASH_PRECISION,
                };
                if !(1..=12).contains(&precision) {
                    return Err(format!("geohash precision must be within 1..=12, got {precision}"));
                }
                Ok(Partitioning::Geohash { precision })
            }
            other => Err(format!("unknown partitioning {other:?}, expected grid or geohash")),
        }
    }
}
