//! Occurrence grouping.
//!
//! Event sources list every scheduled showing of an event as its own record.
//! Grouping collapses records sharing an identity key into one
//! [`CanonicalEvent`] whose `dates` lists every showing.
//!
//! Two identity keys are in use by clients:
//! - [`EventKey::NameAndVenue`]: name + venue label (the default)
//! - [`EventKey::NameAndCoordinate`]: name + exact latitude/longitude
//!
//! They disagree when a venue label is spelled differently for the same
//! coordinate, or a venue is geocoded slightly differently between showings.
//! Pick one per view and keep it.

use std::collections::HashMap;

use crate::{CanonicalEvent, Coordinate, EventOccurrence, Result};

/// Which fields identify an event across its occurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum EventKey {
    /// Event name and venue label
    #[default]
    NameAndVenue,
    /// Event name and exact coordinate (bitwise; a missing coordinate is its own value)
    NameAndCoordinate,
}

impl EventKey {
    /// Compute the identity of one occurrence under this key.
    pub fn identity(&self, occurrence: &EventOccurrence) -> EventIdentity {
        match self {
            EventKey::NameAndVenue => {
                EventIdentity::NameVenue(occurrence.name.clone(), occurrence.venue.clone())
            }
            EventKey::NameAndCoordinate => EventIdentity::NameCoordinate(
                occurrence.name.clone(),
                occurrence.coordinate.map(coordinate_bits),
            ),
        }
    }
}

/// Hashable identity of an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventIdentity {
    NameVenue(String, String),
    /// Name plus the bit patterns of latitude and longitude
    NameCoordinate(String, Option<(u64, u64)>),
    /// Caller-defined key for [`group_by`]
    Custom(String),
}

fn coordinate_bits(c: Coordinate) -> (u64, u64) {
    // Normalise -0.0 so it matches 0.0
    ((c.latitude + 0.0).to_bits(), (c.longitude + 0.0).to_bits())
}

/// Collapse occurrences into canonical events using one of the built-in keys.
///
/// Output is in first-seen key order. The first occurrence of each key
/// supplies the descriptive fields; later occurrences only contribute their
/// start time.
///
/// # Example
/// ```
/// use event_radar::{Coordinate, EventKey, EventOccurrence, group};
///
/// let park = Coordinate::new(53.3561, -6.3000);
/// let square = Coordinate::new(53.3438, -6.2546);
/// let occurrences = vec![
///     EventOccurrence::new("1", "Concert", "Park", park, 1_735_689_600),
///     EventOccurrence::new("2", "Concert", "Park", park, 1_736_294_400),
///     EventOccurrence::new("3", "Market", "Square", square, 1_735_776_000),
/// ];
///
/// let events = group(&occurrences, EventKey::NameAndVenue);
/// assert_eq!(events.len(), 2);
/// assert_eq!(events[0].dates, vec![1_735_689_600, 1_736_294_400]);
/// ```
pub fn group(occurrences: &[EventOccurrence], key: EventKey) -> Vec<CanonicalEvent> {
    group_by(occurrences, |occurrence| key.identity(occurrence))
}

/// Collapse occurrences into canonical events using a caller-supplied key.
///
/// Single pass, O(n) time and O(k) extra space for k distinct keys.
pub fn group_by<F>(occurrences: &[EventOccurrence], key_fn: F) -> Vec<CanonicalEvent>
where
    F: Fn(&EventOccurrence) -> EventIdentity,
{
    let mut slots: HashMap<EventIdentity, usize> = HashMap::new();
    let mut events: Vec<CanonicalEvent> = Vec::new();

    for occurrence in occurrences {
        let identity = key_fn(occurrence);
        match slots.get(&identity) {
            Some(&slot) => events[slot].dates.push(occurrence.starts_at),
            None => {
                slots.insert(identity, events.len());
                events.push(CanonicalEvent::from_occurrence(occurrence));
            }
        }
    }

    events
}

/// Radius-filter occurrences around `reference`, then group what remains.
///
/// This is the "events near you" view: occurrences outside the radius never
/// reach the grouping step, so an event whose showings are geocoded on both
/// sides of the boundary only lists the nearby showings.
pub fn nearby_events(
    reference: Coordinate,
    radius_km: f64,
    occurrences: &[EventOccurrence],
    key: EventKey,
) -> Result<Vec<CanonicalEvent>> {
    let nearby: Vec<EventOccurrence> = crate::proximity::within(reference, radius_km, occurrences)?
        .into_iter()
        .cloned()
        .collect();
    Ok(group(&nearby, key))
}

/// Stable sort by earliest occurrence; events without dates go last.
pub fn sort_by_earliest(events: &mut [CanonicalEvent]) {
    events.sort_by_key(|event| event.earliest().unwrap_or(i64::MAX));
}

// ============================================================================
// Filtering
// ============================================================================

/// Category / name filter applied to occurrences before grouping.
///
/// A category of `"all"` (any case) or `None` means unfiltered.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct EventFilter {
    pub category: Option<String>,
    /// Case-insensitive substring of the event name
    pub name_contains: Option<String>,
}

impl EventFilter {
    /// Filter with a category tag only.
    pub fn category(category: &str) -> Self {
        Self { category: Some(category.to_string()), name_contains: None }
    }

    /// The category to filter by, or `None` when every category is accepted.
    pub fn effective_category(&self) -> Option<&str> {
        self.category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case("all"))
    }

    /// Check if an occurrence passes the filter.
    pub fn matches(&self, occurrence: &EventOccurrence) -> bool {
        if let Some(category) = self.effective_category() {
            if occurrence.category.as_deref() != Some(category) {
                return false;
            }
        }

        match self.name_contains.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => occurrence
                .name
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            _ => true,
        }
    }

    /// Keep the occurrences that pass the filter, in input order.
    pub fn apply<'a>(&self, occurrences: &'a [EventOccurrence]) -> Vec<&'a EventOccurrence> {
        occurrences.iter().filter(|o| self.matches(o)).collect()
    }
}
