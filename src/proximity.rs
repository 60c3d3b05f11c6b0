//! Radius filtering around a reference point.
//!
//! [`within`] is a linear scan and is the reference behaviour. [`ProximityIndex`]
//! answers the same query through an R-tree in two stages:
//! 1. **R-tree filter**: lat/lng boxes that enclose the radius circle
//!    (see [`geo_utils::search_windows`])
//! 2. **Haversine filter**: exact great-circle distance on the survivors
//!
//! Both return matches in input order with an inclusive boundary
//! (`distance <= radius`), so the index can replace the scan without changing
//! results.

use rstar::{RTree, RTreeObject, AABB};

use crate::geo_utils::{self, distance_km};
use crate::{CanonicalEvent, Coordinate, DiscoveryConfig, DiscoveryError, EventOccurrence, LocatedUser, Result};

/// Anything with an optional position.
///
/// Items returning `None`, or an out-of-range coordinate, never match a
/// radius query.
pub trait Located {
    fn location(&self) -> Option<Coordinate>;
}

impl Located for Coordinate {
    fn location(&self) -> Option<Coordinate> {
        Some(*self)
    }
}

impl Located for EventOccurrence {
    fn location(&self) -> Option<Coordinate> {
        self.coordinate
    }
}

impl Located for CanonicalEvent {
    fn location(&self) -> Option<Coordinate> {
        self.coordinate
    }
}

impl Located for LocatedUser {
    fn location(&self) -> Option<Coordinate> {
        Some(self.coordinate)
    }
}

impl<T> Located for (Coordinate, T) {
    fn location(&self) -> Option<Coordinate> {
        Some(self.0)
    }
}

impl<T: Located> Located for &T {
    fn location(&self) -> Option<Coordinate> {
        (*self).location()
    }
}

fn valid_location<T: Located>(item: &T) -> Option<Coordinate> {
    item.location().filter(Coordinate::is_valid)
}

fn check_query(reference: Coordinate, radius_km: f64) -> Result<()> {
    if radius_km.is_nan() || radius_km < 0.0 {
        return Err(DiscoveryError::InvalidArgument(format!(
            "radius must be non-negative, got {}",
            radius_km
        )));
    }
    reference.validated().map(|_| ())
}

// ============================================================================
// Linear scan
// ============================================================================

/// Candidates within `radius_km` of `reference` (inclusive), in input order.
///
/// Fails with `InvalidArgument` for a negative radius or an out-of-range
/// reference.
///
/// # Example
/// ```
/// use event_radar::{Coordinate, within};
///
/// let dublin = Coordinate::new(53.3498, -6.2603);
/// let candidates = vec![
///     (Coordinate::new(53.3505, -6.2620), "Temple Bar gig"),
///     (Coordinate::new(53.5000, -6.5000), "Ashbourne fair"),
/// ];
///
/// let nearby = within(dublin, 5.0, &candidates).unwrap();
/// assert_eq!(nearby.len(), 1);
/// assert_eq!(nearby[0].1, "Temple Bar gig");
/// ```
pub fn within<'a, T: Located>(reference: Coordinate, radius_km: f64, candidates: &'a [T]) -> Result<Vec<&'a T>> {
    check_query(reference, radius_km)?;

    Ok(candidates
        .iter()
        .filter(|c| matches!(valid_location(*c), Some(loc) if distance_km(reference, loc) <= radius_km))
        .collect())
}

/// Like [`within`], paired with each match's distance in kilometers.
pub fn within_with_distance<'a, T: Located>(
    reference: Coordinate,
    radius_km: f64,
    candidates: &'a [T],
) -> Result<Vec<(&'a T, f64)>> {
    check_query(reference, radius_km)?;

    Ok(candidates
        .iter()
        .filter_map(|c| {
            let distance = distance_km(reference, valid_location(c)?);
            (distance <= radius_km).then_some((c, distance))
        })
        .collect())
}

/// Stable sort of distance-annotated matches, closest first.
pub fn nearest_first<T>(mut matches: Vec<(T, f64)>) -> Vec<(T, f64)> {
    matches.sort_by(|a, b| a.1.total_cmp(&b.1));
    matches
}

/// Parallel version of [`within`]; same results, same order.
#[cfg(feature = "parallel")]
pub fn within_parallel<'a, T: Located + Sync>(
    reference: Coordinate,
    radius_km: f64,
    candidates: &'a [T],
) -> Result<Vec<&'a T>> {
    use rayon::prelude::*;

    check_query(reference, radius_km)?;

    Ok(candidates
        .par_iter()
        .filter(|c| matches!(valid_location(*c), Some(loc) if distance_km(reference, loc) <= radius_km))
        .collect())
}

/// Use the linear scan for small inputs and an R-tree above `index_threshold`.
pub fn within_auto<'a, T: Located>(
    reference: Coordinate,
    radius_km: f64,
    candidates: &'a [T],
    index_threshold: usize,
) -> Result<Vec<&'a T>> {
    if candidates.len() > index_threshold {
        ProximityIndex::new(candidates).within(reference, radius_km)
    } else {
        within(reference, radius_km, candidates)
    }
}

impl DiscoveryConfig {
    /// Radius query using the configured radius and index threshold.
    pub fn within<'a, T: Located>(&self, reference: Coordinate, candidates: &'a [T]) -> Result<Vec<&'a T>> {
        within_auto(reference, self.radius_km, candidates, self.index_threshold as usize)
    }
}

// ============================================================================
// R-tree index
// ============================================================================

/// Position of one candidate, stored as `[lng, lat]`.
#[derive(Debug, Clone, Copy)]
struct IndexedPoint {
    point: [f64; 2],
    slot: usize,
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

/// R-tree over a borrowed candidate slice.
///
/// Build once per snapshot and query many times; the index never outlives the
/// snapshot it was built from.
pub struct ProximityIndex<'a, T> {
    candidates: &'a [T],
    tree: RTree<IndexedPoint>,
}

impl<'a, T: Located> ProximityIndex<'a, T> {
    /// Index every candidate with a valid coordinate.
    pub fn new(candidates: &'a [T]) -> Self {
        let points: Vec<IndexedPoint> = candidates
            .iter()
            .enumerate()
            .filter_map(|(slot, c)| {
                let loc = valid_location(c)?;
                Some(IndexedPoint { point: [loc.longitude, loc.latitude], slot })
            })
            .collect();

        log::debug!(
            "[ProximityIndex] Indexed {} of {} candidates",
            points.len(),
            candidates.len()
        );

        Self { candidates, tree: RTree::bulk_load(points) }
    }

    /// Number of indexed (validly located) candidates.
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Same contract and results as [`within`].
    pub fn within(&self, reference: Coordinate, radius_km: f64) -> Result<Vec<&'a T>> {
        Ok(self
            .within_with_distance(reference, radius_km)?
            .into_iter()
            .map(|(c, _)| c)
            .collect())
    }

    /// Same contract and results as [`within_with_distance`].
    pub fn within_with_distance(&self, reference: Coordinate, radius_km: f64) -> Result<Vec<(&'a T, f64)>> {
        check_query(reference, radius_km)?;

        let mut hits: Vec<(usize, f64)> = Vec::new();
        for window in geo_utils::search_windows(reference, radius_km) {
            let (lower, upper) = window.corners();
            let envelope = AABB::from_corners(lower, upper);
            for indexed in self.tree.locate_in_envelope(&envelope) {
                let loc = Coordinate::new(indexed.point[1], indexed.point[0]);
                let distance = distance_km(reference, loc);
                if distance <= radius_km {
                    hits.push((indexed.slot, distance));
                }
            }
        }

        // Restore input order; windows split at the antimeridian never overlap
        hits.sort_by_key(|(slot, _)| *slot);
        hits.dedup_by_key(|(slot, _)| *slot);

        Ok(hits
            .into_iter()
            .map(|(slot, distance)| (&self.candidates[slot], distance))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use proptest::test_runner::Config;

    fn offset(center: Coordinate, dlat: f64, dlng: f64) -> Coordinate {
        let lat = (center.latitude + dlat).clamp(-90.0, 90.0);
        let mut lng = center.longitude + dlng;
        if lng > 180.0 {
            lng -= 360.0;
        } else if lng < -180.0 {
            lng += 360.0;
        }
        Coordinate::new(lat, lng)
    }

    fn coordinate() -> impl Strategy<Value = Coordinate> {
        (-90.0f64..=90.0, -180.0f64..=180.0).prop_map(|(lat, lng)| Coordinate::new(lat, lng))
    }

    /// A reference point plus candidates clustered around it and scattered
    /// across the globe. The reference itself is always the last candidate.
    fn scene() -> impl Strategy<Value = (Coordinate, Vec<Coordinate>)> {
        (
            coordinate(),
            prop::collection::vec((-0.5f64..=0.5, -0.5f64..=0.5), 0..80),
            prop::collection::vec(coordinate(), 0..40),
        )
            .prop_map(|(reference, offsets, far)| {
                let mut candidates: Vec<Coordinate> = offsets
                    .into_iter()
                    .map(|(dlat, dlng)| offset(reference, dlat, dlng))
                    .collect();
                candidates.extend(far);
                candidates.push(reference);
                (reference, candidates)
            })
    }

    fn radius() -> impl Strategy<Value = f64> {
        prop_oneof![0.0f64..60.0, 0.0f64..25_000.0]
    }

    fn dublin() -> Coordinate {
        Coordinate::new(53.3498, -6.2603)
    }

    #[test]
    fn test_within_dublin_scenario() {
        let candidates = vec![
            (Coordinate::new(53.3505, -6.2620), "near"),
            (Coordinate::new(53.5000, -6.5000), "far"),
        ];
        let hits = within(dublin(), 5.0, &candidates).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1, "near");
    }

    #[test]
    fn test_within_rejects_negative_radius() {
        let candidates = vec![dublin()];
        assert!(matches!(
            within(dublin(), -0.1, &candidates),
            Err(DiscoveryError::InvalidArgument(_))
        ));
        assert!(within(dublin(), f64::NAN, &candidates).is_err());
    }

    #[test]
    fn test_within_rejects_invalid_reference() {
        let candidates = vec![dublin()];
        assert!(within(Coordinate::new(95.0, 0.0), 5.0, &candidates).is_err());
    }

    #[test]
    fn test_within_excludes_unlocated_candidates() {
        let mut unplaced = EventOccurrence::new("1", "Gig", "TBA", dublin(), 0);
        unplaced.coordinate = None;
        let mut broken = EventOccurrence::new("2", "Gig", "Nowhere", dublin(), 0);
        broken.coordinate = Some(Coordinate::new(200.0, 0.0));
        let placed = EventOccurrence::new("3", "Gig", "Spire", dublin(), 0);

        let candidates = vec![unplaced, broken, placed];
        let hits = within(dublin(), 1.0, &candidates).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "3");
    }

    #[test]
    fn test_within_boundary_is_inclusive() {
        let target = Coordinate::new(53.3600, -6.2603);
        let exact = distance_km(dublin(), target);
        let candidates = vec![target];
        assert_eq!(within(dublin(), exact, &candidates).unwrap().len(), 1);
    }

    #[test]
    fn test_within_zero_radius_matches_only_reference() {
        let candidates = vec![
            dublin(),
            Coordinate::new(53.3498, -6.2604),
            Coordinate::new(53.34981, -6.2603),
            dublin(),
        ];
        let hits = within(dublin(), 0.0, &candidates).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|c| **c == dublin()));
    }

    #[test]
    fn test_within_with_distance_and_nearest_first() {
        let candidates = vec![
            (Coordinate::new(53.3600, -6.2603), "b"),
            (Coordinate::new(53.3505, -6.2620), "a"),
            (Coordinate::new(53.5000, -6.5000), "far"),
        ];
        let hits = within_with_distance(dublin(), 5.0, &candidates).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0 .1, "b");

        let sorted = nearest_first(hits);
        assert_eq!(sorted[0].0 .1, "a");
        assert!(sorted[0].1 <= sorted[1].1);
    }

    #[test]
    fn test_index_skips_invalid_and_covers_pole() {
        let candidates = vec![
            Coordinate::new(f64::NAN, 0.0),
            Coordinate::new(89.99, -120.0),
            Coordinate::new(89.95, 60.0),
            Coordinate::new(80.0, 0.0),
        ];
        let index = ProximityIndex::new(&candidates);
        assert_eq!(index.len(), 3);

        let hits = index.within(Coordinate::new(89.98, 10.0), 10.0).unwrap();
        assert_eq!(hits, vec![&candidates[1], &candidates[2]]);
    }

    #[test]
    fn test_index_handles_antimeridian() {
        let candidates = vec![
            (Coordinate::new(0.0, 179.99), "west side"),
            (Coordinate::new(0.0, -179.99), "east side"),
            (Coordinate::new(0.0, 170.0), "too far"),
        ];
        let index = ProximityIndex::new(&candidates);
        let hits = index.within(Coordinate::new(0.0, 180.0), 5.0).unwrap();
        let labels: Vec<&str> = hits.iter().map(|h| h.1).collect();
        assert_eq!(labels, vec!["west side", "east side"]);
    }

    #[test]
    fn test_config_within_uses_configured_radius() {
        let candidates = vec![
            Coordinate::new(53.3505, -6.2620),
            Coordinate::new(53.5000, -6.5000),
        ];
        let config = DiscoveryConfig::default();
        assert_eq!(config.within(dublin(), &candidates).unwrap(), vec![&candidates[0]]);

        let wide = DiscoveryConfig { radius_km: 30.0, index_threshold: 0, ..DiscoveryConfig::default() };
        assert_eq!(wide.within(dublin(), &candidates).unwrap().len(), 2);
    }

    proptest! {
        #![proptest_config(Config::with_cases(256))]

        #[test]
        fn test_index_matches_linear_scan((reference, candidates) in scene(), radius in radius()) {
            let index = ProximityIndex::new(&candidates);
            let scanned = within(reference, radius, &candidates).unwrap();
            let indexed = index.within(reference, radius).unwrap();

            prop_assert_eq!(scanned.len(), indexed.len());
            for (a, b) in scanned.iter().zip(indexed.iter()) {
                prop_assert!(std::ptr::eq(*a, *b));
            }
        }

        #[test]
        fn test_index_matches_scan_on_circle(
            (reference, candidates) in scene(),
            pick in any::<prop::sample::Index>(),
        ) {
            // Radius set exactly to one candidate's distance
            let target = &candidates[pick.index(candidates.len())];
            let radius = distance_km(reference, *target);

            let scanned = within(reference, radius, &candidates).unwrap();
            let indexed = ProximityIndex::new(&candidates).within(reference, radius).unwrap();

            prop_assert!(scanned.iter().any(|c| std::ptr::eq(*c, target)));
            prop_assert_eq!(scanned, indexed);
        }

        #[test]
        fn test_within_radius_monotonic(
            (reference, candidates) in scene(),
            a in radius(),
            b in radius(),
        ) {
            let (small_r, large_r) = if a <= b { (a, b) } else { (b, a) };
            let small = within(reference, small_r, &candidates).unwrap();
            let large = within(reference, large_r, &candidates).unwrap();

            prop_assert!(small.len() <= large.len());
            for hit in small {
                prop_assert!(large.iter().any(|h| std::ptr::eq(*h, hit)));
            }
        }

        #[test]
        fn test_within_auto_matches_scan(
            (reference, candidates) in scene(),
            radius in radius(),
            threshold in 0usize..150,
        ) {
            let scanned = within(reference, radius, &candidates).unwrap();
            let auto = within_auto(reference, radius, &candidates, threshold).unwrap();
            prop_assert_eq!(scanned, auto);
        }
    }

    #[cfg(feature = "parallel")]
    proptest! {
        #![proptest_config(Config::with_cases(64))]

        #[test]
        fn test_within_parallel_matches((reference, candidates) in scene(), radius in radius()) {
            let scanned = within(reference, radius, &candidates).unwrap();
            let parallel = within_parallel(reference, radius, &candidates).unwrap();
            prop_assert_eq!(scanned, parallel);
        }
    }
}
