//! Periodic location push and event refresh.
//!
//! Each loop is an independent tokio task. Cancelling a task (explicitly or
//! by dropping its handle) stops the next scheduled run; a run already in
//! progress completes first.

use log::{debug, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::store::unix_now;
use crate::{group, ApiClient, CanonicalEvent, Coordinate, DiscoveryConfig, EventFilter, EventKey, EventOccurrence, LocationStore};

/// Handle to a repeating background job.
///
/// Must be created inside a tokio runtime.
pub struct PeriodicTask {
    name: String,
    cancel: Option<watch::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Run `job` now and then every `interval` until cancelled.
    ///
    /// Runs never overlap; a slow run delays the next one.
    pub fn spawn<F, Fut>(name: &str, interval: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel_tx, mut cancel_rx) = watch::channel(());
        let task_name = name.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("[PeriodicTask] {} started (every {:?})", task_name, interval);

            loop {
                tokio::select! {
                    biased;
                    // Sender dropped: cancelled
                    _ = cancel_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                job().await;
            }

            info!("[PeriodicTask] {} stopped", task_name);
        });

        Self {
            name: name.to_string(),
            cancel: Some(cancel_tx),
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Prevent any further runs. Idempotent.
    pub fn cancel(&mut self) {
        if self.cancel.take().is_some() {
            debug!("[PeriodicTask] {} cancelled", self.name);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_none()
    }

    /// Cancel and wait for any in-flight run to finish.
    pub async fn stop(mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("[PeriodicTask] {} ended abnormally: {}", self.name, e);
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Push the current user's position every `config.location_push_interval_secs`.
///
/// `position` is polled on every tick; `None` (location services off) skips
/// the run. The position is also recorded in `store` so routing sees it. Push
/// failures are logged and left to the next tick.
pub fn spawn_location_push<P>(
    client: Arc<ApiClient>,
    store: Arc<LocationStore>,
    user_id: &str,
    config: &DiscoveryConfig,
    position: P,
) -> PeriodicTask
where
    P: Fn() -> Option<Coordinate> + Send + 'static,
{
    let user_id = user_id.to_string();
    let interval = Duration::from_secs(config.location_push_interval_secs);

    PeriodicTask::spawn("location-push", interval, move || {
        let client = Arc::clone(&client);
        let store = Arc::clone(&store);
        let user_id = user_id.clone();
        let coordinate = position();

        async move {
            let Some(coordinate) = coordinate else {
                debug!("[LocationPush] No position available, skipping");
                return;
            };
            let now = unix_now();
            if let Err(e) = store.update(&user_id, coordinate, now) {
                warn!("[LocationPush] Rejected own position: {}", e);
                return;
            }
            if let Err(e) = client.push_location(&user_id, coordinate, now).await {
                warn!("[LocationPush] {}", e);
            }
        }
    })
}

/// Re-fetch and re-group events every `config.refresh_interval_secs`.
///
/// Each successful fetch replaces the value in the returned receiver. A
/// failed fetch keeps the previous snapshot.
pub fn spawn_event_refresh(
    client: Arc<ApiClient>,
    filter: EventFilter,
    config: &DiscoveryConfig,
) -> (PeriodicTask, watch::Receiver<Arc<Vec<CanonicalEvent>>>) {
    let (tx, rx) = watch::channel(Arc::new(Vec::new()));
    let tx = Arc::new(tx);
    let key = config.event_key;
    let interval = Duration::from_secs(config.refresh_interval_secs);

    let task = PeriodicTask::spawn("event-refresh", interval, move || {
        let client = Arc::clone(&client);
        let tx = Arc::clone(&tx);
        let filter = filter.clone();

        async move {
            match client.fetch_events(&filter).await {
                Ok(occurrences) => publish_grouped(&tx, &occurrences, key),
                Err(e) => warn!("[EventRefresh] Keeping previous events: {}", e),
            }
        }
    });

    (task, rx)
}

fn publish_grouped(tx: &watch::Sender<Arc<Vec<CanonicalEvent>>>, occurrences: &[EventOccurrence], key: EventKey) {
    let events = group(occurrences, key);
    debug!("[EventRefresh] Publishing {} events from {} occurrences", events.len(), occurrences.len());
    tx.send_replace(Arc::new(events));
}
