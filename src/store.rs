//! Live location registry.
//!
//! One record per user, replaced whole on every accepted report. Reports are
//! ordered by their own timestamp, not by arrival, so a delayed or retried
//! report can never overwrite a newer one. Records are never removed; a user
//! who stops reporting simply drops out of [`LocationStore::snapshot`] once
//! their last report is older than the requested age, and reappears with the
//! next fresh report.
//!
//! The store is `Send + Sync`; share it with `Arc<LocationStore>`. Readers
//! always receive owned copies, so a snapshot is never torn by a concurrent
//! writer.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;

use crate::proximity;
use crate::{Coordinate, DiscoveryConfig, DiscoveryError, LocatedUser, Result};

/// What happened to a location report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The report replaced (or created) the user's record
    Applied,
    /// The stored record is newer; the report was dropped
    IgnoredStale,
}

/// Current Unix time in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Concurrency-safe registry of the latest position per user.
#[derive(Debug)]
pub struct LocationStore {
    records: RwLock<HashMap<String, LocatedUser>>,
    /// Snapshot size above which [`LocationStore::nearby`] queries an R-tree
    index_threshold: usize,
}

impl Default for LocationStore {
    fn default() -> Self {
        Self::with_config(&DiscoveryConfig::default())
    }
}

impl LocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty store taking its index threshold from `config`.
    pub fn with_config(config: &DiscoveryConfig) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            index_threshold: config.index_threshold as usize,
        }
    }

    pub fn index_threshold(&self) -> usize {
        self.index_threshold
    }

    // Records are replaced with a single insert; a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, LocatedUser>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, LocatedUser>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a position report, keeping any display name already known.
    ///
    /// A report whose timestamp is strictly older than the stored one is a
    /// no-op ([`UpdateOutcome::IgnoredStale`]); equal timestamps replace.
    pub fn update(&self, user_id: &str, coordinate: Coordinate, timestamp: i64) -> Result<UpdateOutcome> {
        self.apply(user_id, None, coordinate, timestamp)
    }

    /// Record a position report and set the user's display name.
    pub fn update_named(
        &self,
        user_id: &str,
        display_name: &str,
        coordinate: Coordinate,
        timestamp: i64,
    ) -> Result<UpdateOutcome> {
        self.apply(user_id, Some(display_name), coordinate, timestamp)
    }

    fn apply(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        coordinate: Coordinate,
        timestamp: i64,
    ) -> Result<UpdateOutcome> {
        if user_id.is_empty() {
            return Err(DiscoveryError::InvalidArgument("empty user id".to_string()));
        }
        let coordinate = coordinate.validated()?;

        // Compare and replace under one write guard
        let mut records = self.write();
        let display_name = match records.get(user_id) {
            Some(current) if timestamp < current.updated_at => {
                debug!(
                    "[LocationStore] Ignoring stale report for {} ({} < {})",
                    user_id, timestamp, current.updated_at
                );
                return Ok(UpdateOutcome::IgnoredStale);
            }
            Some(current) => display_name.map_or_else(|| current.display_name.clone(), str::to_string),
            None => display_name.unwrap_or(user_id).to_string(),
        };

        records.insert(
            user_id.to_string(),
            LocatedUser {
                user_id: user_id.to_string(),
                display_name,
                coordinate,
                updated_at: timestamp,
            },
        );
        Ok(UpdateOutcome::Applied)
    }

    /// Current record for a user, or `None` if they never reported.
    pub fn get(&self, user_id: &str) -> Option<LocatedUser> {
        self.read().get(user_id).cloned()
    }

    /// Records no older than `max_age_secs`, measured against the system clock.
    pub fn snapshot(&self, max_age_secs: u64) -> Vec<LocatedUser> {
        self.snapshot_at(max_age_secs, unix_now())
    }

    /// Records with `now - updated_at <= max_age_secs`, ordered by user id.
    pub fn snapshot_at(&self, max_age_secs: u64, now: i64) -> Vec<LocatedUser> {
        let mut live: Vec<LocatedUser> = self
            .read()
            .values()
            .filter(|user| !user.is_stale(now, max_age_secs))
            .cloned()
            .collect();
        live.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        live
    }

    /// Live users within `radius_km` of `reference`, optionally leaving one
    /// user (usually the caller) out.
    pub fn nearby(
        &self,
        reference: Coordinate,
        radius_km: f64,
        max_age_secs: u64,
        exclude_user_id: Option<&str>,
    ) -> Result<Vec<LocatedUser>> {
        self.nearby_at(reference, radius_km, max_age_secs, exclude_user_id, unix_now())
    }

    /// [`LocationStore::nearby`] against an explicit clock.
    pub fn nearby_at(
        &self,
        reference: Coordinate,
        radius_km: f64,
        max_age_secs: u64,
        exclude_user_id: Option<&str>,
        now: i64,
    ) -> Result<Vec<LocatedUser>> {
        let snapshot: Vec<LocatedUser> = self
            .snapshot_at(max_age_secs, now)
            .into_iter()
            .filter(|user| Some(user.user_id.as_str()) != exclude_user_id)
            .collect();

        Ok(proximity::within_auto(reference, radius_km, &snapshot, self.index_threshold)?
            .into_iter()
            .cloned()
            .collect())
    }

    /// Apply a batch of reports (e.g. a friend-location feed).
    ///
    /// Reports with invalid coordinates are skipped; returns how many were applied.
    pub fn ingest<I>(&self, reports: I) -> usize
    where
        I: IntoIterator<Item = LocatedUser>,
    {
        let mut applied = 0;
        for report in reports {
            match self.update_named(&report.user_id, &report.display_name, report.coordinate, report.updated_at) {
                Ok(UpdateOutcome::Applied) => applied += 1,
                Ok(UpdateOutcome::IgnoredStale) => {}
                Err(e) => debug!("[LocationStore] Skipping report for {}: {}", report.user_id, e),
            }
        }
        applied
    }

    /// Number of users that have ever reported.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
