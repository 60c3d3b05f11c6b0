//! Example of grouping event occurrences and finding the ones near you.
//!
//! Run with: cargo run --example nearby_events

use event_radar::{
    nearby_events, nearest_first, sort_by_earliest, within_with_distance, Coordinate,
    DiscoveryConfig, EventFilter, EventKey, EventOccurrence,
};

fn main() {
    println!("Nearby Events Example\n");

    let config = DiscoveryConfig::default();
    let dublin = Coordinate::new(53.3498, -6.2603);

    let park = Coordinate::new(53.3561, -6.3000);
    let stadium = Coordinate::new(53.3352, -6.2285);
    let galway = Coordinate::new(53.2707, -9.0568);

    let mut occurrences = vec![
        EventOccurrence::new("1", "Concert", "Phoenix Park", park, 1_735_689_600),
        EventOccurrence::new("2", "Concert", "Phoenix Park", park, 1_736_294_400),
        EventOccurrence::new("3", "Rugby", "Aviva Stadium", stadium, 1_736_035_200),
        EventOccurrence::new("4", "Trad Session", "Galway Docks", galway, 1_735_862_400),
        EventOccurrence::new("5", "Concert", "Phoenix Park", park, 1_736_899_200),
    ];
    occurrences[2].category = Some("Sports".to_string());
    for occ in occurrences.iter_mut().filter(|o| o.name == "Concert") {
        occ.category = Some("Music".to_string());
    }

    println!("Received {} occurrences\n", occurrences.len());

    // Filter to the configured radius, then group what is left
    let mut events = nearby_events(dublin, config.radius_km, &occurrences, EventKey::NameAndVenue)
        .unwrap_or_default();
    sort_by_earliest(&mut events);

    println!("Events within {}km of Dublin:", config.radius_km);
    for event in &events {
        println!("  {} @ {} ({} dates)", event.name, event.venue, event.dates.len());
    }

    // Nearest first, with distances
    let annotated = within_with_distance(dublin, config.radius_km, &events).unwrap_or_default();
    println!("\nBy distance:");
    for (event, km) in nearest_first(annotated) {
        println!("  {:.2}km  {}", km, event.name);
    }

    // Category filter ("all" means no filter)
    for category in ["all", "Music", "Sports"] {
        let filter = EventFilter::category(category);
        println!("\nCategory {:?}: {} occurrences", category, filter.apply(&occurrences).len());
    }
}
