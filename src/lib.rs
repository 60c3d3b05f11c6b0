//! # Event Radar
//!
//! Geospatial proximity and event aggregation for a location-aware event
//! discovery client.
//!
//! This library provides:
//! - Great-circle distances between coordinates
//! - Deduplication of raw event occurrences into canonical events with dates
//! - Radius filtering of events and friends around a moving reference point
//! - A concurrent live-location store with staleness-aware snapshots
//! - Single active route selection towards a friend
//!
//! ## Features
//!
//! - **`parallel`** - Enable parallel radius scans with rayon
//! - **`http`** - Enable the HTTP event source / location sink and periodic tasks
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use event_radar::{Coordinate, EventKey, EventOccurrence, group, within};
//!
//! let occurrences = vec![
//!     EventOccurrence::new("1", "Concert", "Park", Coordinate::new(53.3505, -6.2620), 1_735_689_600),
//!     EventOccurrence::new("2", "Concert", "Park", Coordinate::new(53.3505, -6.2620), 1_736_294_400),
//! ];
//!
//! let events = group(&occurrences, EventKey::NameAndVenue);
//! assert_eq!(events.len(), 1);
//! assert_eq!(events[0].dates.len(), 2);
//!
//! let dublin = Coordinate::new(53.3498, -6.2603);
//! let nearby = within(dublin, 5.0, &events).unwrap();
//! assert_eq!(nearby.len(), 1);
//! ```

use std::collections::HashMap;

pub mod error;
pub use error::{DiscoveryError, Endpoint, Result};

pub mod geo_utils;
pub use geo_utils::distance_km;

pub mod aggregate;
pub use aggregate::{
    EventFilter, EventIdentity, EventKey,
    group, group_by, nearby_events, sort_by_earliest,
};

pub mod proximity;
pub use proximity::{Located, ProximityIndex, nearest_first, within, within_with_distance};

pub mod store;
pub use store::{LocationStore, UpdateOutcome};

pub mod route;
pub use route::{RouteSelector, RouteState, RoutingEngine};

// HTTP module for the event API
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{ApiClient, ClientConfig, FriendLocation};

// Periodic refresh / push tasks
#[cfg(feature = "http")]
pub mod tasks;

#[cfg(feature = "http")]
pub use tasks::{PeriodicTask, spawn_event_refresh, spawn_location_push};

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("EventRadarRust")
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A WGS84 coordinate with latitude and longitude in degrees.
///
/// # Example
/// ```
/// use event_radar::Coordinate;
/// let point = Coordinate::new(53.3498, -6.2603); // Dublin
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Create a new coordinate.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the coordinate is finite and within range.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }

    /// Return the coordinate if it is valid, otherwise an `InvalidArgument` error.
    pub fn validated(self) -> Result<Self> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(DiscoveryError::InvalidArgument(format!(
                "coordinate out of range: ({}, {})",
                self.latitude, self.longitude
            )))
        }
    }
}

/// One scheduled instance of an event, as delivered by the event source.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct EventOccurrence {
    /// Identifier assigned by the event source
    pub id: String,
    /// Event name (first half of the identity key)
    pub name: String,
    /// Venue / location label (second half of the default identity key)
    pub venue: String,
    /// Venue coordinate; `None` when the source did not geocode the venue
    pub coordinate: Option<Coordinate>,
    /// Start time (Unix timestamp, seconds)
    pub starts_at: i64,
    pub description: String,
    pub category: Option<String>,
    pub external_link: Option<String>,
    pub image_url: Option<String>,
}

impl EventOccurrence {
    /// Create an occurrence with the identity fields set and empty descriptive fields.
    pub fn new(id: &str, name: &str, venue: &str, coordinate: Coordinate, starts_at: i64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            venue: venue.to_string(),
            coordinate: Some(coordinate),
            starts_at,
            description: String::new(),
            category: None,
            external_link: None,
            image_url: None,
        }
    }
}

/// All occurrences sharing an identity key, collapsed into a single event.
///
/// Descriptive fields come from the first occurrence seen; `dates` holds every
/// occurrence start in first-seen order (duplicates are kept).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct CanonicalEvent {
    /// Identifier of the first occurrence seen
    pub id: String,
    pub name: String,
    pub venue: String,
    pub coordinate: Option<Coordinate>,
    pub description: String,
    pub category: Option<String>,
    pub external_link: Option<String>,
    pub image_url: Option<String>,
    /// Occurrence start times (Unix timestamps), in input order
    pub dates: Vec<i64>,
}

impl CanonicalEvent {
    /// Seed a canonical event from its first occurrence.
    pub fn from_occurrence(occurrence: &EventOccurrence) -> Self {
        Self {
            id: occurrence.id.clone(),
            name: occurrence.name.clone(),
            venue: occurrence.venue.clone(),
            coordinate: occurrence.coordinate,
            description: occurrence.description.clone(),
            category: occurrence.category.clone(),
            external_link: occurrence.external_link.clone(),
            image_url: occurrence.image_url.clone(),
            dates: vec![occurrence.starts_at],
        }
    }

    /// Earliest occurrence, regardless of input order.
    pub fn earliest(&self) -> Option<i64> {
        self.dates.iter().copied().min()
    }

    /// First occurrence starting at or after `now`.
    pub fn next_occurrence(&self, now: i64) -> Option<i64> {
        self.dates.iter().copied().filter(|&d| d >= now).min()
    }
}

/// The most recent known position of a user.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct LocatedUser {
    pub user_id: String,
    pub display_name: String,
    pub coordinate: Coordinate,
    /// Time of the report (Unix timestamp, seconds)
    pub updated_at: i64,
}

impl LocatedUser {
    /// Seconds elapsed since the report, clamped at zero for reports from the future.
    pub fn age_secs(&self, now: i64) -> u64 {
        now.saturating_sub(self.updated_at).max(0) as u64
    }

    /// True once the report is older than `max_age_secs`.
    pub fn is_stale(&self, now: i64, max_age_secs: u64) -> bool {
        self.age_secs(now) > max_age_secs
    }
}

/// The (origin, destination) pair handed to the routing engine.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct ActiveRoute {
    /// Current user's position
    pub origin: Coordinate,
    /// Selected friend's position
    pub destination: Coordinate,
    /// Selected friend's user id
    pub destination_user_id: String,
    /// When the origin position was reported
    pub origin_updated_at: i64,
    /// When the destination position was reported
    pub destination_updated_at: i64,
}

/// Configuration for discovery queries and refresh cadence.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct DiscoveryConfig {
    /// Radius for "near me" queries, in kilometers.
    /// Default: 5.0 km
    pub radius_km: f64,

    /// Location reports older than this are excluded from live views.
    /// Default: 300 seconds (ten missed pushes)
    pub max_location_age_secs: u64,

    /// How often the own position is pushed to the location sink.
    /// Default: 30 seconds
    pub location_push_interval_secs: u64,

    /// How often events are re-fetched and re-grouped.
    /// Default: 20 seconds
    pub refresh_interval_secs: u64,

    /// Identity key used to collapse occurrences.
    /// Default: name + venue label
    pub event_key: EventKey,

    /// Candidate count above which radius queries build an R-tree.
    /// Default: 256
    pub index_threshold: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            radius_km: 5.0,
            max_location_age_secs: 300,
            location_push_interval_secs: 30,
            refresh_interval_secs: 20,
            event_key: EventKey::NameAndVenue,
            index_threshold: 256,
        }
    }
}

impl DiscoveryConfig {
    /// Reject configurations that would make queries or timers meaningless.
    pub fn validate(&self) -> Result<()> {
        if !self.radius_km.is_finite() || self.radius_km < 0.0 {
            return Err(DiscoveryError::InvalidArgument(format!(
                "radius_km must be a non-negative number, got {}",
                self.radius_km
            )));
        }
        if self.location_push_interval_secs == 0 || self.refresh_interval_secs == 0 {
            return Err(DiscoveryError::InvalidArgument(
                "refresh intervals must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-category occurrence counts, in first-seen order of each category.
///
/// Occurrences without a category are counted under `"uncategorized"`.
pub fn category_counts(occurrences: &[EventOccurrence]) -> Vec<(String, u32)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut counts: Vec<(String, u32)> = Vec::new();

    for occurrence in occurrences {
        let category = occurrence.category.as_deref().unwrap_or("uncategorized");
        match index.get(category) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(category, counts.len());
                counts.push((category.to_string(), 1));
            }
        }
    }

    counts
}

// ============================================================================
// FFI Exports (only when feature enabled)
// ============================================================================

#[cfg(feature = "ffi")]
mod ffi {
    use super::*;
    use log::{debug, info};
    use std::sync::{Arc, Mutex};

    /// Great-circle distance in kilometers.
    #[uniffi::export]
    pub fn ffi_distance_km(a: Coordinate, b: Coordinate) -> f64 {
        distance_km(a, b)
    }

    /// Collapse occurrences into canonical events.
    #[uniffi::export]
    pub fn group_events(occurrences: Vec<EventOccurrence>, key: EventKey) -> Vec<CanonicalEvent> {
        init_logging();
        let start = std::time::Instant::now();
        let events = group(&occurrences, key);
        info!(
            "[EventRadarRust] Grouped {} occurrences into {} events in {:?}",
            occurrences.len(),
            events.len(),
            start.elapsed()
        );
        events
    }

    /// Canonical events within `radius_km` of `reference`, in input order.
    #[uniffi::export]
    pub fn events_within(
        reference: Coordinate,
        radius_km: f64,
        events: Vec<CanonicalEvent>,
    ) -> std::result::Result<Vec<CanonicalEvent>, DiscoveryError> {
        init_logging();
        let nearby = proximity::within_parallel(reference, radius_km, &events)?;
        debug!("[EventRadarRust] {} of {} events within {}km", nearby.len(), events.len(), radius_km);
        Ok(nearby.into_iter().cloned().collect())
    }

    /// Get default configuration.
    #[uniffi::export]
    pub fn default_config() -> DiscoveryConfig {
        init_logging();
        DiscoveryConfig::default()
    }

    // ========================================================================
    // Live locations
    // ========================================================================

    /// Session-scoped live location registry.
    #[derive(uniffi::Object)]
    pub struct LiveLocations {
        store: Arc<LocationStore>,
    }

    #[uniffi::export]
    impl LiveLocations {
        #[uniffi::constructor]
        pub fn new() -> Arc<Self> {
            init_logging();
            Arc::new(Self { store: Arc::new(LocationStore::new()) })
        }

        pub fn update(
            &self,
            user_id: String,
            display_name: String,
            coordinate: Coordinate,
            updated_at: i64,
        ) -> std::result::Result<bool, DiscoveryError> {
            let outcome = self.store.update_named(&user_id, &display_name, coordinate, updated_at)?;
            Ok(outcome == UpdateOutcome::Applied)
        }

        pub fn get(&self, user_id: String) -> Option<LocatedUser> {
            self.store.get(&user_id)
        }

        pub fn snapshot(&self, max_age_secs: u64) -> Vec<LocatedUser> {
            self.store.snapshot(max_age_secs)
        }

        pub fn nearby(
            &self,
            reference: Coordinate,
            radius_km: f64,
            max_age_secs: u64,
            exclude_user_id: Option<String>,
        ) -> std::result::Result<Vec<LocatedUser>, DiscoveryError> {
            self.store.nearby(reference, radius_km, max_age_secs, exclude_user_id.as_deref())
        }
    }

    // ========================================================================
    // Routing
    // ========================================================================

    /// Implemented in Kotlin/Swift by the map layer that draws routes.
    #[uniffi::export(callback_interface)]
    pub trait RouteRenderer: Send + Sync {
        /// Remove the currently drawn route, if any.
        fn remove_route(&self);
        /// Draw a route between the two coordinates.
        fn add_route(&self, origin: Coordinate, destination: Coordinate);
    }

    struct RendererEngine(Box<dyn RouteRenderer>);

    impl RoutingEngine for RendererEngine {
        fn remove_route(&mut self) {
            self.0.remove_route();
        }

        fn add_route(&mut self, origin: Coordinate, destination: Coordinate) {
            self.0.add_route(origin, destination);
        }
    }

    /// Active route selection towards a friend.
    #[derive(uniffi::Object)]
    pub struct RoutePlanner {
        selector: Mutex<RouteSelector<RendererEngine>>,
    }

    #[uniffi::export]
    impl RoutePlanner {
        #[uniffi::constructor]
        pub fn new(
            locations: Arc<LiveLocations>,
            self_user_id: String,
            renderer: Box<dyn RouteRenderer>,
        ) -> Arc<Self> {
            init_logging();
            let selector = RouteSelector::new(
                Arc::clone(&locations.store),
                &self_user_id,
                RendererEngine(renderer),
            );
            Arc::new(Self { selector: Mutex::new(selector) })
        }

        pub fn select(&self, friend_id: String) -> std::result::Result<ActiveRoute, DiscoveryError> {
            self.lock().select(&friend_id)
        }

        pub fn refresh(&self) -> std::result::Result<bool, DiscoveryError> {
            self.lock().refresh()
        }

        pub fn clear(&self) {
            self.lock().clear();
        }

        pub fn active(&self) -> Option<ActiveRoute> {
            self.lock().active().cloned()
        }
    }

    impl RoutePlanner {
        fn lock(&self) -> std::sync::MutexGuard<'_, RouteSelector<RendererEngine>> {
            self.selector.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
