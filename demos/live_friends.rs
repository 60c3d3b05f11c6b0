//! Example of live friend locations and route selection.
//!
//! Run with: cargo run --example live_friends --features parallel

use event_radar::proximity::within_parallel;
use event_radar::store::unix_now;
use event_radar::{Coordinate, LocationStore, RouteSelector, RoutingEngine};
use rand::prelude::*;
use std::sync::Arc;
use std::time::Instant;

/// Routing engine that prints instead of drawing.
struct PrintEngine;

impl RoutingEngine for PrintEngine {
    fn remove_route(&mut self) {
        println!("  [engine] remove route");
    }

    fn add_route(&mut self, origin: Coordinate, destination: Coordinate) {
        println!(
            "  [engine] add route ({:.4}, {:.4}) -> ({:.4}, {:.4})",
            origin.latitude, origin.longitude, destination.latitude, destination.longitude
        );
    }
}

fn main() {
    println!("Live Friends Example\n");

    let store = Arc::new(LocationStore::new());
    let me = Coordinate::new(53.3498, -6.2603);
    let now = unix_now();

    // Spread 10,000 users around Dublin
    let mut rng = StdRng::seed_from_u64(42);
    let mut rejected = 0;
    for i in 0..10_000 {
        let position = Coordinate::new(
            me.latitude + rng.gen_range(-0.25f64..0.25),
            me.longitude + rng.gen_range(-0.25f64..0.25),
        );
        let age: i64 = rng.gen_range(0..600);
        if let Err(e) = store.update(&format!("user-{}", i), position, now - age) {
            eprintln!("user-{}: {}", i, e);
            rejected += 1;
        }
    }
    if let Err(e) = store.update("me", me, now) {
        eprintln!("me: {}", e);
        return;
    }
    println!("Stored {} users ({} rejected)", store.len(), rejected);

    let start = Instant::now();
    let nearby = store.nearby(me, 5.0, 300, Some("me")).unwrap_or_default();
    println!("{} fresh users within 5km (indexed) in {:?}", nearby.len(), start.elapsed());

    let snapshot = store.snapshot(300);
    let start = Instant::now();
    let scanned = within_parallel(me, 5.0, &snapshot).unwrap_or_default();
    println!("{} users within 5km (parallel scan, incl. self) in {:?}\n", scanned.len(), start.elapsed());

    let mut selector = RouteSelector::new(Arc::clone(&store), "me", PrintEngine);
    for friend in ["user-7", "user-8", "nobody"] {
        println!("Select {}:", friend);
        match selector.select(friend) {
            Ok(route) => println!("  routed, friend last updated at {}", route.destination_updated_at),
            Err(e) => println!("  {}", e),
        }
    }

    println!("Clear:");
    selector.clear();
}
