//! Example of the periodic event refresh against a live API.
//!
//! Run with: cargo run --example event_feed --features http -- <base_url> [token]

use event_radar::{spawn_event_refresh, ApiClient, ClientConfig, DiscoveryConfig, EventFilter};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    let mut args = std::env::args().skip(1);
    let base_url = args.next().unwrap_or_else(|| ClientConfig::default().base_url);
    let token = args.next();

    let client = match ApiClient::new(ClientConfig::new(&base_url, token.as_deref())) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("{}", e);
            return;
        }
    };

    let config = DiscoveryConfig { refresh_interval_secs: 5, ..DiscoveryConfig::default() };
    let (task, mut events) = spawn_event_refresh(client, EventFilter::default(), &config);

    println!("Polling {} every {}s for 30s\n", base_url, config.refresh_interval_secs);
    let deadline = tokio::time::sleep(Duration::from_secs(30));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            changed = events.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = events.borrow_and_update().clone();
                println!("{} canonical events", snapshot.len());
                for event in snapshot.iter().take(5) {
                    println!("  {} @ {} ({} dates)", event.name, event.venue, event.dates.len());
                }
            }
        }
    }

    task.stop().await;
}
