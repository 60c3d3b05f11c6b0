//! # Geographic Utilities
//!
//! Distance and search-window helpers shared by the radius filter and the
//! location store.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`distance_km`] | Great-circle distance between two coordinates |
//! | [`km_to_degrees`] | Convert kilometers to degrees of arc |
//! | [`search_windows`] | Lat/lng boxes guaranteed to contain a radius circle |
//! | [`to_geo_point`] | Convert to a `geo::Point` (x = longitude) |
//!
//! ## Example
//!
//! ```rust
//! use event_radar::{Coordinate, geo_utils};
//!
//! let dublin = Coordinate::new(53.3498, -6.2603);
//! let spire = Coordinate::new(53.3498, -6.2603);
//! assert_eq!(geo_utils::distance_km(dublin, spire), 0.0);
//!
//! let windows = geo_utils::search_windows(dublin, 5.0);
//! assert_eq!(windows.len(), 1);
//! ```
//!
//! ## Algorithm Notes
//!
//! ### Haversine Formula
//!
//! Distances use the haversine formula on a sphere of radius 6371 km, with the
//! final step computed as `atan2(√h, √(1−h))` rather than `asin(√h)`. Rounding
//! can push `h` marginally above 1 for antipodal points, which `asin` rejects;
//! `h` is clamped and `atan2` stays defined everywhere.
//!
//! ### Search Windows
//!
//! A circle of angular radius `δ` around latitude `φ` spans `φ ± δ` in latitude
//! and `λ ± asin(sin δ / cos φ)` in longitude. When the circle contains a pole
//! every longitude is covered; when it crosses the antimeridian the window is
//! split in two.

use geo::Point;
use crate::Coordinate;

/// Mean Earth radius used for all distances, in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Padding added to search windows so rounding never excludes a boundary point.
const WINDOW_PADDING_DEG: f64 = 1e-9;

// =============================================================================
// Distance Functions
// =============================================================================

/// Calculate the great-circle distance between two coordinates in kilometers.
///
/// Symmetric, zero for identical coordinates, and finite for any pair of valid
/// coordinates. Out-of-range input is not checked.
///
/// # Example
///
/// ```rust
/// use event_radar::{Coordinate, distance_km};
///
/// let london = Coordinate::new(51.5074, -0.1278);
/// let paris = Coordinate::new(48.8566, 2.3522);
///
/// let distance = distance_km(london, paris);
/// assert!((distance - 343.5).abs() < 1.0);
/// ```
#[inline]
pub fn distance_km(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let half_dlat = (b.latitude - a.latitude).to_radians() / 2.0;
    let half_dlng = (b.longitude - a.longitude).to_radians() / 2.0;

    let h = half_dlat.sin().powi(2) + lat1.cos() * lat2.cos() * half_dlng.sin().powi(2);
    let h = h.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Convert a surface distance in kilometers to degrees of great-circle arc.
#[inline]
pub fn km_to_degrees(km: f64) -> f64 {
    (km / EARTH_RADIUS_KM).to_degrees()
}

/// Convert a coordinate into a `geo::Point` (x = longitude, y = latitude).
#[inline]
pub fn to_geo_point(c: Coordinate) -> Point {
    Point::new(c.longitude, c.latitude)
}

impl From<Coordinate> for Point {
    fn from(c: Coordinate) -> Self {
        to_geo_point(c)
    }
}

impl From<Point> for Coordinate {
    fn from(p: Point) -> Self {
        Coordinate::new(p.y(), p.x())
    }
}

// =============================================================================
// Search Windows
// =============================================================================

/// Axis-aligned lat/lng box, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchWindow {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl SearchWindow {
    /// Lower and upper corners as `[lng, lat]` pairs (R-tree axis order).
    pub fn corners(&self) -> ([f64; 2], [f64; 2]) {
        ([self.min_lng, self.min_lat], [self.max_lng, self.max_lat])
    }

    /// Check if a coordinate lies inside the window (edges inclusive).
    pub fn contains(&self, c: Coordinate) -> bool {
        c.latitude >= self.min_lat
            && c.latitude <= self.max_lat
            && c.longitude >= self.min_lng
            && c.longitude <= self.max_lng
    }
}

/// Compute one or two boxes that together contain every point within
/// `radius_km` of `center`.
///
/// Points inside the boxes may still be farther than `radius_km`; callers
/// refine with [`distance_km`].
pub fn search_windows(center: Coordinate, radius_km: f64) -> Vec<SearchWindow> {
    let delta = radius_km / EARTH_RADIUS_KM;
    let delta_deg = delta.to_degrees() + WINDOW_PADDING_DEG;

    let min_lat = center.latitude - delta_deg;
    let max_lat = center.latitude + delta_deg;

    // Circle reaches a pole or wraps the globe: every longitude is in range
    if delta >= std::f64::consts::PI || min_lat <= -90.0 || max_lat >= 90.0 {
        return vec![SearchWindow {
            min_lat: min_lat.max(-90.0),
            max_lat: max_lat.min(90.0),
            min_lng: -180.0,
            max_lng: 180.0,
        }];
    }

    let lat_rad = center.latitude.to_radians();
    let ratio = (delta.sin() / lat_rad.cos()).min(1.0);
    let delta_lng = ratio.asin().to_degrees() + WINDOW_PADDING_DEG;

    let min_lng = center.longitude - delta_lng;
    let max_lng = center.longitude + delta_lng;

    if min_lng < -180.0 {
        vec![
            SearchWindow { min_lat, max_lat, min_lng: min_lng + 360.0, max_lng: 180.0 },
            SearchWindow { min_lat, max_lat, min_lng: -180.0, max_lng },
        ]
    } else if max_lng > 180.0 {
        vec![
            SearchWindow { min_lat, max_lat, min_lng, max_lng: 180.0 },
            SearchWindow { min_lat, max_lat, min_lng: -180.0, max_lng: max_lng - 360.0 },
        ]
    } else {
        vec![SearchWindow { min_lat, max_lat, min_lng, max_lng }]
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
