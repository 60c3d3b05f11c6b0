//! HTTP client for the event API.
//!
//! This module provides:
//! - The event source (`GET events/`, optionally filtered by category)
//! - The location ingestion sink (`POST update-location/`)
//! - The friend-location feed (`GET friends/locations/`)
//! - Validation of wire records into core types at the ingestion boundary
//! - Automatic retry with exponential backoff on 429 for reads
//!
//! Pushes are never retried immediately; the next periodic cycle retries.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::{Coordinate, DiscoveryError, EventFilter, EventOccurrence, LocatedUser, Result};

const MAX_RETRIES: u32 = 3;

const EVENTS_PATH: &str = "events/";
const UPDATE_LOCATION_PATH: &str = "update-location/";
const FRIEND_LOCATIONS_PATH: &str = "friends/locations/";

// ============================================================================
// Configuration
// ============================================================================

/// Connection settings for [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root, e.g. `https://example.org/api/`
    pub base_url: String,

    /// Session token, sent as `Authorization: Token <token>`.
    pub token: Option<String>,

    /// Per-request timeout.
    /// Default: 30 seconds
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/".to_string(),
            token: None,
            timeout_secs: 30,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        Self {
            base_url: base_url.to_string(),
            token: token.map(str::to_string),
            ..Self::default()
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

// ============================================================================
// Wire records
// ============================================================================

/// Event ids arrive as integers from the API but as strings from some feeds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum WireId {
    Int(i64),
    Text(String),
}

impl WireId {
    fn into_string(self) -> String {
        match self {
            WireId::Int(n) => n.to_string(),
            WireId::Text(s) => s,
        }
    }
}

/// One event occurrence as returned by `GET events/`.
#[derive(Debug, Clone, Deserialize)]
pub struct EventRecord {
    id: WireId,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    location: Option<String>,
    date: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    external_link: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
}

impl TryFrom<EventRecord> for EventOccurrence {
    type Error = DiscoveryError;

    fn try_from(record: EventRecord) -> Result<Self> {
        let id = record.id.into_string();
        if record.name.trim().is_empty() {
            return Err(DiscoveryError::Schema(format!("event {} has no name", id)));
        }

        let coordinate = match (record.lat, record.lon) {
            (Some(lat), Some(lon)) => {
                let c = Coordinate::new(lat, lon);
                if !c.is_valid() {
                    return Err(DiscoveryError::Schema(format!(
                        "event {} has out-of-range coordinate ({}, {})",
                        id, lat, lon
                    )));
                }
                Some(c)
            }
            // Not geocoded; kept for listings, excluded from radius queries
            _ => None,
        };

        let starts_at = parse_timestamp(&record.date)
            .map_err(|e| DiscoveryError::Schema(format!("event {}: {}", id, e)))?;

        Ok(EventOccurrence {
            id,
            name: record.name,
            venue: record.location.unwrap_or_default(),
            coordinate,
            starts_at,
            description: record.description.unwrap_or_default(),
            category: record.category.filter(|c| !c.is_empty()),
            external_link: record.external_link.filter(|l| !l.is_empty()),
            image_url: record.image_url.filter(|u| !u.is_empty()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
struct WireLocation {
    latitude: f64,
    longitude: f64,
}

/// One entry of the friend-location feed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FriendLocation {
    pub username: String,
    #[serde(default)]
    location: Option<WireLocation>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

impl FriendLocation {
    pub fn coordinate(&self) -> Option<Coordinate> {
        self.location.map(|l| Coordinate::new(l.latitude, l.longitude))
    }
}

impl TryFrom<FriendLocation> for LocatedUser {
    type Error = DiscoveryError;

    fn try_from(friend: FriendLocation) -> Result<Self> {
        let coordinate = friend
            .coordinate()
            .ok_or_else(|| DiscoveryError::Schema(format!("{} has no location", friend.username)))?
            .validated()
            .map_err(|e| DiscoveryError::Schema(format!("{}: {}", friend.username, e)))?;

        let updated_at = friend
            .last_updated
            .as_deref()
            .ok_or_else(|| DiscoveryError::Schema(format!("{} has no last_updated", friend.username)))
            .and_then(|s| {
                parse_timestamp(s).map_err(|e| DiscoveryError::Schema(format!("{}: {}", friend.username, e)))
            })?;

        Ok(LocatedUser {
            user_id: friend.username.clone(),
            display_name: friend.username,
            coordinate,
            updated_at,
        })
    }
}

/// Body of `POST update-location/`.
#[derive(Debug, Clone, Serialize)]
struct LocationReport<'a> {
    user_id: &'a str,
    latitude: f64,
    longitude: f64,
    timestamp: i64,
}

/// Parse an API timestamp into Unix seconds.
///
/// Accepts RFC 3339, naive `YYYY-MM-DD[T| ]HH:MM:SS[.f]` (taken as UTC) and
/// bare dates (midnight UTC).
pub fn parse_timestamp(s: &str) -> std::result::Result<i64, String> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp());
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc().timestamp());
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp())
        .ok_or_else(|| format!("unrecognised date {:?}", s))
}

// ============================================================================
// Backoff
// ============================================================================

/// Tracks consecutive 429 responses across requests.
struct Backoff {
    consecutive_429s: AtomicU32,
}

impl Backoff {
    fn new() -> Self {
        Self { consecutive_429s: AtomicU32::new(0) }
    }

    fn record_success(&self) {
        self.consecutive_429s.store(0, Ordering::Relaxed);
    }

    fn record_429(&self) -> Duration {
        let count = self.consecutive_429s.fetch_add(1, Ordering::Relaxed) + 1;
        // Exponential backoff: 1s, 2s, 4s max
        let backoff = Duration::from_millis(500 * (1 << count.min(3)));
        warn!("[ApiClient] Got 429! Consecutive: {}, backing off {:?}", count, backoff);
        backoff
    }
}

// ============================================================================
// Client
// ============================================================================

/// Client for the event source, location sink and friend-location feed.
pub struct ApiClient {
    client: Client,
    config: ClientConfig,
    backoff: Backoff,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DiscoveryError::InvalidArgument(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            backoff: Backoff::new(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => request.header("Authorization", format!("Token {}", token)),
            None => request,
        }
    }

    /// GET `path` and decode the JSON body, retrying 429s and connection errors.
    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = self.config.url(path);
        let mut retries = 0;
        let req_start = Instant::now();

        loop {
            let response = self
                .authorize(self.client.get(&url).query(query))
                .send()
                .await;

            let headers_elapsed = req_start.elapsed();

            match response {
                Ok(resp) => {
                    let status = resp.status();

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        retries += 1;
                        if retries > MAX_RETRIES {
                            return Err(DiscoveryError::TransientIngestion(format!(
                                "GET {}: max retries exceeded (429)",
                                path
                            )));
                        }
                        let wait = self.backoff.record_429();
                        tokio::time::sleep(wait).await;
                        continue;
                    }

                    self.backoff.record_success();

                    if !status.is_success() {
                        return Err(DiscoveryError::TransientIngestion(format!("GET {}: HTTP {}", path, status)));
                    }

                    let body_start = Instant::now();
                    let bytes = resp
                        .bytes()
                        .await
                        .map_err(|e| DiscoveryError::TransientIngestion(format!("GET {}: body error: {}", path, e)))?;
                    let body_elapsed = body_start.elapsed();

                    let json_start = Instant::now();
                    let data = serde_json::from_slice(&bytes)
                        .map_err(|e| DiscoveryError::Schema(format!("GET {}: {}", path, e)))?;

                    info!(
                        "[ApiClient] GET {} headers={:?} body={:?}({:.1}KB) json={:?} total={:?}",
                        path,
                        headers_elapsed,
                        body_elapsed,
                        bytes.len() as f64 / 1024.0,
                        json_start.elapsed(),
                        req_start.elapsed()
                    );
                    return Ok(data);
                }
                Err(e) => {
                    retries += 1;
                    if retries > MAX_RETRIES {
                        return Err(DiscoveryError::TransientIngestion(format!("GET {}: {}", path, e)));
                    }
                    let wait = Duration::from_millis(200 * (1 << retries));
                    warn!("[ApiClient] GET {} error: {}, retry {} after {:?}", path, e, retries, wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Fetch event occurrences.
    ///
    /// The category goes to the server as `?category=`; the name filter is
    /// applied locally. Malformed records are dropped with a warning.
    pub async fn fetch_events(&self, filter: &EventFilter) -> Result<Vec<EventOccurrence>> {
        let query: Vec<(&str, &str)> = filter
            .effective_category()
            .map(|c| vec![("category", c)])
            .unwrap_or_default();

        let records: Vec<EventRecord> = self.get_json(EVENTS_PATH, &query).await?;
        let total = records.len();
        let occurrences = decode_records(records, filter);

        info!("[ApiClient] Fetched {} events ({} kept)", total, occurrences.len());
        Ok(occurrences)
    }

    /// Fetch friends' last reported positions.
    ///
    /// Friends without a location are skipped.
    pub async fn fetch_friend_locations(&self) -> Result<Vec<LocatedUser>> {
        let records: Vec<FriendLocation> = self.get_json(FRIEND_LOCATIONS_PATH, &[]).await?;
        Ok(records
            .into_iter()
            .filter_map(|friend| match LocatedUser::try_from(friend) {
                Ok(user) => Some(user),
                Err(e) => {
                    debug!("[ApiClient] Skipping friend location: {}", e);
                    None
                }
            })
            .collect())
    }

    /// Report the current user's position to the location sink.
    ///
    /// One attempt only; a failure is `TransientIngestion` and the caller's
    /// next periodic push is the retry.
    pub async fn push_location(&self, user_id: &str, coordinate: Coordinate, timestamp: i64) -> Result<()> {
        let coordinate = coordinate.validated()?;
        let body = LocationReport {
            user_id,
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            timestamp,
        };

        let start = Instant::now();
        let response = self
            .authorize(self.client.post(self.config.url(UPDATE_LOCATION_PATH)).json(&body))
            .send()
            .await
            .map_err(|e| DiscoveryError::TransientIngestion(format!("location push: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::TransientIngestion(format!("location push: HTTP {}", status)));
        }

        debug!("[ApiClient] Pushed location for {} in {:?}", user_id, start.elapsed());
        Ok(())
    }
}

fn decode_records(records: Vec<EventRecord>, filter: &EventFilter) -> Vec<EventOccurrence> {
    records
        .into_iter()
        .filter_map(|record| match EventOccurrence::try_from(record) {
            Ok(occurrence) => Some(occurrence),
            Err(e) => {
                warn!("[ApiClient] Dropping event record: {}", e);
                None
            }
        })
        .filter(|occurrence| filter.matches(occurrence))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(json: &str) -> Vec<EventRecord> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(parse_timestamp("2025-01-01T00:00:00Z").unwrap(), 1_735_689_600);
        assert_eq!(parse_timestamp("2025-01-01T01:00:00+01:00").unwrap(), 1_735_689_600);
        assert_eq!(parse_timestamp("2025-01-01T00:00:00").unwrap(), 1_735_689_600);
        assert_eq!(parse_timestamp("2025-01-01 00:00:30.5").unwrap(), 1_735_689_630);
        assert_eq!(parse_timestamp("2025-01-01").unwrap(), 1_735_689_600);
        assert!(parse_timestamp("next tuesday").is_err());
    }

    #[test]
    fn test_event_record_to_occurrence() {
        let json = r#"[{
            "id": 42, "name": "Concert", "description": "Live",
            "lat": 53.3505, "lon": -6.262, "location": "Park",
            "date": "2025-01-08", "category": "Music",
            "external_link": "", "image_url": "https://img/1.jpg"
        }]"#;
        let occurrence = EventOccurrence::try_from(records(json).remove(0)).unwrap();

        assert_eq!(occurrence.id, "42");
        assert_eq!(occurrence.venue, "Park");
        assert_eq!(occurrence.coordinate, Some(Coordinate::new(53.3505, -6.262)));
        assert_eq!(occurrence.starts_at, 1_736_294_400);
        assert_eq!(occurrence.category.as_deref(), Some("Music"));
        assert_eq!(occurrence.external_link, None);
        assert_eq!(occurrence.image_url.as_deref(), Some("https://img/1.jpg"));
    }

    #[test]
    fn test_event_record_without_coordinates() {
        let json = r#"[{"id": "tm-1", "name": "Gig", "lat": null, "lon": -6.2, "date": "2025-01-01"}]"#;
        let occurrence = EventOccurrence::try_from(records(json).remove(0)).unwrap();
        assert_eq!(occurrence.id, "tm-1");
        assert_eq!(occurrence.coordinate, None);
        assert_eq!(occurrence.venue, "");
    }

    #[test]
    fn test_event_record_rejections() {
        let json = r#"[
            {"id": 1, "name": "", "date": "2025-01-01"},
            {"id": 2, "name": "Bad", "lat": 123.0, "lon": 0.0, "date": "2025-01-01"},
            {"id": 3, "name": "Undated", "date": "soon"}
        ]"#;
        for record in records(json) {
            assert!(matches!(EventOccurrence::try_from(record), Err(DiscoveryError::Schema(_))));
        }
    }

    #[test]
    fn test_decode_records_skips_bad_and_filters_locally() {
        let json = r#"[
            {"id": 1, "name": "Jazz Night", "lat": 53.35, "lon": -6.26, "date": "2025-01-01", "category": "Music"},
            {"id": 2, "name": "Broken", "lat": 99.0, "lon": 0.0, "date": "2025-01-01"},
            {"id": 3, "name": "Rock Show", "lat": 53.35, "lon": -6.26, "date": "2025-01-01", "category": "Music"}
        ]"#;
        let filter = EventFilter { category: None, name_contains: Some("jazz".into()) };
        let kept = decode_records(records(json), &filter);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "1");

        let all = decode_records(records(json), &EventFilter::default());
        assert_eq!(all.iter().map(|o| o.id.as_str()).collect::<Vec<_>>(), vec!["1", "3"]);
    }

    #[test]
    fn test_friend_location_to_located_user() {
        let json = r#"[
            {"username": "aoife", "location": {"latitude": 53.34, "longitude": -6.25}, "last_updated": "2025-01-01T00:00:30Z"},
            {"username": "ciaran", "location": null, "last_updated": "2025-01-01T00:00:00Z"}
        ]"#;
        let mut feed: Vec<FriendLocation> = serde_json::from_str(json).unwrap();

        let located = LocatedUser::try_from(feed.remove(0)).unwrap();
        assert_eq!(located.user_id, "aoife");
        assert_eq!(located.display_name, "aoife");
        assert_eq!(located.coordinate, Coordinate::new(53.34, -6.25));
        assert_eq!(located.updated_at, 1_735_689_630);

        assert!(matches!(LocatedUser::try_from(feed.remove(0)), Err(DiscoveryError::Schema(_))));
    }

    #[test]
    fn test_client_config_url_join() {
        let config = ClientConfig::new("https://example.org/api/", Some("abc"));
        assert_eq!(config.url("events/"), "https://example.org/api/events/");
        assert_eq!(config.url("/friends/locations/"), "https://example.org/api/friends/locations/");
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_backoff_grows_and_resets() {
        let backoff = Backoff::new();
        assert_eq!(backoff.record_429(), Duration::from_millis(1000));
        assert_eq!(backoff.record_429(), Duration::from_millis(2000));
        assert_eq!(backoff.record_429(), Duration::from_millis(4000));
        assert_eq!(backoff.record_429(), Duration::from_millis(4000));
        backoff.record_success();
        assert_eq!(backoff.record_429(), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_push_rejects_invalid_coordinate() {
        let client = ApiClient::new(ClientConfig::default()).unwrap();
        let err = client
            .push_location("me", Coordinate::new(200.0, 0.0), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidArgument(_)));
    }
}
