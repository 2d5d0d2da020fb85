//! Pure geometry helpers: great-circle distance and bounding-box tests

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Mean Earth radius used by the haversine formula, in kilometres
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Valid latitude range
pub const MIN_LAT: f64 = -90.0;
pub const MAX_LAT: f64 = 90.0;

/// Valid longitude range
pub const MIN_LON: f64 = -180.0;
pub const MAX_LON: f64 = 180.0;

/// Convert degrees to radians (`value * π / 180`)
#[inline]
pub fn to_radians(value: f64) -> f64 {
    value * PI / 180.0
}

/// A validated geographic position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Build a point, rejecting NaN and out-of-range coordinates
    pub fn new(lat: f64, lng: f64) -> Option<Self> {
        if is_valid_latitude(lat) && is_valid_longitude(lng) {
            Some(Self { lat, lng })
        } else {
            None
        }
    }

    /// Distance to another point in kilometres
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine_distance_km(self.lat, self.lng, other.lat, other.lng)
    }
}

/// Rectangular filter defined by its four edges
///
/// `west > east` (a rectangle crossing the antimeridian) is not given any
/// special meaning: such a rectangle simply matches no longitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundsRect {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl BoundsRect {
    /// Build a rectangle, requiring `north >= south`
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Option<Self> {
        if north.is_nan() || south.is_nan() || east.is_nan() || west.is_nan() || north < south {
            return None;
        }
        Some(Self {
            north,
            south,
            east,
            west,
        })
    }

    /// Smallest rectangle holding two opposite corners
    pub fn from_corners(a: GeoPoint, b: GeoPoint) -> Self {
        Self {
            north: a.lat.max(b.lat),
            south: a.lat.min(b.lat),
            east: a.lng.max(b.lng),
            west: a.lng.min(b.lng),
        }
    }

    /// Inclusive containment test, see [`in_bounds`]
    pub fn contains(&self, point: &GeoPoint) -> bool {
        in_bounds(point, self)
    }
}

pub fn is_valid_latitude(lat: f64) -> bool {
    (MIN_LAT..=MAX_LAT).contains(&lat)
}

pub fn is_valid_longitude(lng: f64) -> bool {
    (MIN_LON..=MAX_LON).contains(&lng)
}

/// Great-circle distance between two positions in kilometres
///
/// Standard haversine formula on a sphere of radius [`EARTH_RADIUS_KM`].
///
/// # Example
///
/// ```
/// use mapgeo::core::geometry::haversine_distance_km;
///
/// // Moscow → Saint Petersburg
/// let d = haversine_distance_km(55.75, 37.62, 59.93, 30.34);
/// assert!((d - 634.0).abs() < 5.0);
/// ```
pub fn haversine_distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = to_radians(lat2 - lat1);
    let d_lon = to_radians(lon2 - lon1);

    let a = (d_lat / 2.0).sin().powi(2)
        + to_radians(lat1).cos() * to_radians(lat2).cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Inclusive bounding-box test on both axes
///
/// A point lying exactly on any of the four edges is inside.
pub fn in_bounds(point: &GeoPoint, rect: &BoundsRect) -> bool {
    rect.south <= point.lat
        && point.lat <= rect.north
        && rect.west <= point.lng
        && point.lng <= rect.east
}

/// Vertex average of a ring, used as the representative position of a shape
pub fn centroid(points: &[GeoPoint]) -> Option<GeoPoint> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let (lat, lng) = points
        .iter()
        .fold((0.0, 0.0), |(lat, lng), p| (lat + p.lat, lng + p.lng));
    GeoPoint::new(lat / n, lng / n)
}
