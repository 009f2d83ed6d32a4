//! Spatial math for jump distances and the unknown-position sentinel.

use crate::models::Coords;

/// Value persisted on every axis of a system whose position is unknown.
pub const UNKNOWN_SENTINEL: f64 = 999_999.999;

/// Real coordinates must lie strictly inside this bound on every axis.
pub const MAX_REAL_COORD: f64 = 999_999.0;

/// Euclidean distance in light years.
pub fn distance(a: &Coords, b: &Coords) -> f64 {
    distance_squared(a, b).sqrt()
}

pub fn distance_squared(a: &Coords, b: &Coords) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let dz = a.z - b.z;
    dx * dx + dy * dy + dz * dz
}

/// Check that a coordinate is a usable measured position.
///
/// Rejects non-finite values and anything that could collide with the
/// unknown sentinel once persisted.
pub fn is_real_position(coords: &Coords) -> bool {
    coords
        .as_array()
        .iter()
        .all(|v| v.is_finite() && v.abs() < MAX_REAL_COORD)
}

/// The point an unknown-position system occupies in a persisted index.
pub fn sentinel_point() -> Coords {
    Coords::new(UNKNOWN_SENTINEL, UNKNOWN_SENTINEL, UNKNOWN_SENTINEL)
}

/// Encode an optional position into storage columns.
pub fn encode_position(coords: Option<Coords>) -> Coords {
    coords.unwrap_or_else(sentinel_point)
}

/// Decode storage columns, mapping the sentinel back to `None`.
pub fn decode_position(x: f64, y: f64, z: f64) -> Option<Coords> {
    let coords = Coords::new(x, y, z);
    if is_real_position(&coords) {
        Some(coords)
    } else {
        None
    }
}

/// Axis-aligned box enclosing a sphere, as `(min, max)`.
pub fn bounding_box(center: &Coords, radius: f64) -> (Coords, Coords) {
    (
        Coords::new(center.x - radius, center.y - radius, center.z - radius),
        Coords::new(center.x + radius, center.y + radius, center.z + radius),
    )
}
