//! Single active route towards a friend.
//!
//! The selector is either **Idle** or **Routed**. Selecting a friend resolves
//! both endpoints from the [`LocationStore`] and hands the pair to the
//! [`RoutingEngine`]; any previous pair is removed first, so the engine never
//! holds two routes. Clearing removes the pair and returns to Idle.
//!
//! Endpoints may be slightly stale; [`ActiveRoute`] carries both report
//! timestamps so callers can show "last updated at T".

use std::sync::Arc;

use log::{debug, info};

use crate::{ActiveRoute, Coordinate, DiscoveryError, Endpoint, LocatedUser, LocationStore, Result};

/// External engine that computes and draws a path between two coordinates.
pub trait RoutingEngine {
    /// Drop the currently registered pair.
    fn remove_route(&mut self);
    /// Register a new ordered pair.
    fn add_route(&mut self, origin: Coordinate, destination: Coordinate);
}

/// Owned view of the selector state.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteState {
    Idle,
    Routed(ActiveRoute),
}

/// Tracks at most one active route for the current user.
pub struct RouteSelector<E: RoutingEngine> {
    store: Arc<LocationStore>,
    self_user_id: String,
    engine: E,
    active: Option<ActiveRoute>,
}

impl<E: RoutingEngine> RouteSelector<E> {
    /// Create an idle selector for `self_user_id`.
    pub fn new(store: Arc<LocationStore>, self_user_id: &str, engine: E) -> Self {
        Self {
            store,
            self_user_id: self_user_id.to_string(),
            engine,
            active: None,
        }
    }

    fn resolve(&self, friend_id: &str) -> Result<(LocatedUser, LocatedUser)> {
        let origin = self.store.get(&self.self_user_id).ok_or_else(|| {
            DiscoveryError::LocationUnavailable {
                endpoint: Endpoint::Origin,
                user_id: self.self_user_id.clone(),
            }
        })?;
        let destination = self.store.get(friend_id).ok_or_else(|| {
            DiscoveryError::LocationUnavailable {
                endpoint: Endpoint::Destination,
                user_id: friend_id.to_string(),
            }
        })?;
        Ok((origin, destination))
    }

    fn install(&mut self, route: ActiveRoute) {
        if self.active.is_some() {
            self.engine.remove_route();
        }
        self.engine.add_route(route.origin, route.destination);
        self.active = Some(route);
    }

    /// Route to `friend_id`, replacing any current route.
    ///
    /// Fails with `LocationUnavailable` if either position is unknown, and
    /// with `InvalidArgument` if `friend_id` is the current user. On failure
    /// the current state is left untouched.
    pub fn select(&mut self, friend_id: &str) -> Result<ActiveRoute> {
        if friend_id == self.self_user_id {
            return Err(DiscoveryError::InvalidArgument("cannot route to yourself".to_string()));
        }

        let (origin, destination) = self.resolve(friend_id)?;
        let route = ActiveRoute {
            origin: origin.coordinate,
            destination: destination.coordinate,
            destination_user_id: destination.user_id,
            origin_updated_at: origin.updated_at,
            destination_updated_at: destination.updated_at,
        };

        info!(
            "[RouteSelector] Routing {} -> {} ({:.2}km)",
            self.self_user_id,
            friend_id,
            crate::distance_km(route.origin, route.destination)
        );
        self.install(route.clone());
        Ok(route)
    }

    /// Re-read both endpoints and re-register the pair if either moved.
    ///
    /// Returns `Ok(true)` when the engine was updated, `Ok(false)` when idle or
    /// nothing changed.
    pub fn refresh(&mut self) -> Result<bool> {
        let Some(current) = self.active.as_ref() else {
            return Ok(false);
        };

        let (origin, destination) = self.resolve(&current.destination_user_id)?;
        if origin.coordinate == current.origin && destination.coordinate == current.destination {
            debug!("[RouteSelector] Endpoints unchanged, keeping route");
            return Ok(false);
        }

        let route = ActiveRoute {
            origin: origin.coordinate,
            destination: destination.coordinate,
            destination_user_id: destination.user_id,
            origin_updated_at: origin.updated_at,
            destination_updated_at: destination.updated_at,
        };
        self.install(route);
        Ok(true)
    }

    /// Drop the current route, if any.
    pub fn clear(&mut self) {
        if self.active.take().is_some() {
            info!("[RouteSelector] Route cleared");
            self.engine.remove_route();
        }
    }

    pub fn active(&self) -> Option<&ActiveRoute> {
        self.active.as_ref()
    }

    pub fn state(&self) -> RouteState {
        match &self.active {
            Some(route) => RouteState::Routed(route.clone()),
            None => RouteState::Idle,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Remove,
        Add(Coordinate, Coordinate),
    }

    #[derive(Default)]
    struct RecordingEngine {
        calls: Vec<Call>,
        live: usize,
    }

    impl RoutingEngine for RecordingEngine {
        fn remove_route(&mut self) {
            self.calls.push(Call::Remove);
            self.live -= 1;
        }

        fn add_route(&mut self, origin: Coordinate, destination: Coordinate) {
            self.calls.push(Call::Add(origin, destination));
            self.live += 1;
            assert!(self.live <= 1, "engine holds more than one route");
        }
    }

    fn me() -> Coordinate {
        Coordinate::new(53.3498, -6.2603)
    }

    fn f1() -> Coordinate {
        Coordinate::new(53.3438, -6.2546)
    }

    fn f2() -> Coordinate {
        Coordinate::new(53.3561, -6.3000)
    }

    fn setup() -> (Arc<LocationStore>, RouteSelector<RecordingEngine>) {
        let store = Arc::new(LocationStore::new());
        store.update("me", me(), 100).unwrap();
        store.update("f1", f1(), 90).unwrap();
        store.update("f2", f2(), 95).unwrap();
        let selector = RouteSelector::new(Arc::clone(&store), "me", RecordingEngine::default());
        (store, selector)
    }

    #[test]
    fn test_starts_idle() {
        let (_, selector) = setup();
        assert_eq!(selector.state(), RouteState::Idle);
        assert!(selector.active().is_none());
    }

    #[test]
    fn test_select_routes_to_friend() {
        let (_, mut selector) = setup();
        let route = selector.select("f1").unwrap();
        assert_eq!(route.origin, me());
        assert_eq!(route.destination, f1());
        assert_eq!(route.destination_user_id, "f1");
        assert_eq!(route.origin_updated_at, 100);
        assert_eq!(route.destination_updated_at, 90);
        assert_eq!(selector.engine().calls, vec![Call::Add(me(), f1())]);
    }

    #[test]
    fn test_reselect_replaces_route() {
        let (_, mut selector) = setup();
        selector.select("f1").unwrap();
        selector.select("f2").unwrap();

        assert_eq!(selector.active().unwrap().destination_user_id, "f2");
        assert_eq!(
            selector.engine().calls,
            vec![Call::Add(me(), f1()), Call::Remove, Call::Add(me(), f2())]
        );
        assert_eq!(selector.engine().live, 1);
    }

    #[test]
    fn test_clear_returns_to_idle() {
        let (_, mut selector) = setup();
        selector.clear();
        assert!(selector.engine().calls.is_empty());

        selector.select("f1").unwrap();
        selector.clear();
        assert_eq!(selector.state(), RouteState::Idle);
        assert_eq!(selector.engine().live, 0);

        selector.clear();
        assert_eq!(selector.engine().calls.len(), 2);
    }

    #[test]
    fn test_missing_friend_leaves_state_unchanged() {
        let (_, mut selector) = setup();
        selector.select("f1").unwrap();

        let err = selector.select("ghost").unwrap_err();
        assert_eq!(
            err,
            DiscoveryError::LocationUnavailable {
                endpoint: Endpoint::Destination,
                user_id: "ghost".into(),
            }
        );
        assert_eq!(selector.active().unwrap().destination_user_id, "f1");
        assert_eq!(selector.engine().calls.len(), 1);
    }

    #[test]
    fn test_missing_self_location() {
        let store = Arc::new(LocationStore::new());
        store.update("f1", f1(), 90).unwrap();
        let mut selector = RouteSelector::new(store, "me", RecordingEngine::default());

        let err = selector.select("f1").unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::LocationUnavailable { endpoint: Endpoint::Origin, .. }
        ));
        assert_eq!(selector.state(), RouteState::Idle);
    }

    #[test]
    fn test_cannot_route_to_self() {
        let (_, mut selector) = setup();
        selector.select("f1").unwrap();

        assert!(matches!(selector.select("me"), Err(DiscoveryError::InvalidArgument(_))));
        assert_eq!(selector.active().unwrap().destination_user_id, "f1");
        assert_eq!(selector.engine().calls, vec![Call::Add(me(), f1())]);
    }

    #[test]
    fn test_refresh_follows_moving_friend() {
        let (store, mut selector) = setup();
        assert!(!selector.refresh().unwrap());

        selector.select("f1").unwrap();
        assert!(!selector.refresh().unwrap());

        let moved = Coordinate::new(53.3450, -6.2550);
        store.update("f1", moved, 120).unwrap();
        assert!(selector.refresh().unwrap());

        let route = selector.active().unwrap();
        assert_eq!(route.destination, moved);
        assert_eq!(route.destination_updated_at, 120);
        assert_eq!(selector.engine().live, 1);
        assert_eq!(
            selector.engine().calls,
            vec![Call::Add(me(), f1()), Call::Remove, Call::Add(me(), moved)]
        );
    }
}
