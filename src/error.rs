//! Error taxonomy for discovery operations.
//!
//! Pure components (distance, grouping, radius filtering) only fail on caller
//! contract violations. Stateful components represent missing data as `None`
//! and only fail when a route cannot be resolved. Stale locations are never an
//! error; they are simply left out of snapshots.

use std::fmt;

/// Which side of a route could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum Endpoint {
    /// The current user's own position
    Origin,
    /// The selected friend's position
    Destination,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Origin => write!(f, "enable location services to get directions"),
            Endpoint::Destination => write!(f, "friend has not shared a location"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error), uniffi(flat_error))]
pub enum DiscoveryError {
    /// Negative radius, out-of-range coordinate, or similar caller mistake.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Location unavailable for {user_id}: {endpoint}")]
    LocationUnavailable { endpoint: Endpoint, user_id: String },

    /// A push or fetch did not reach the API; the next scheduled cycle retries.
    #[error("Transient ingestion failure: {0}")]
    TransientIngestion(String),

    /// A wire record was rejected at the ingestion boundary.
    #[error("Malformed record: {0}")]
    Schema(String),
}

impl DiscoveryError {
    /// True for failures that a later periodic cycle may recover from.
    pub fn is_transient(&self) -> bool {
        matches!(self, DiscoveryError::TransientIngestion(_))
    }
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_unavailable_message() {
        let err = DiscoveryError::LocationUnavailable {
            endpoint: Endpoint::Destination,
            user_id: "friend-7".into(),
        };
        assert_eq!(
            err.to_string(),
            "Location unavailable for friend-7: friend has not shared a location"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(DiscoveryError::TransientIngestion("timeout".into()).is_transient());
        assert!(!DiscoveryError::InvalidArgument("radius".into()).is_transient());
    }
}
