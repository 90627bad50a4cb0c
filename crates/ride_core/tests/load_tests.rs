//! Load tests for ride_core: many concurrent rides driven to completion.

mod support;

use std::time::Instant;

use ride_core::commands::Command;
use ride_core::ecs::{DriverId, GeoPoint, RideId, RideSpec, RideStatus};
use ride_core::test_helpers::{ride_spec, TestCore};

use support::entities::conn;

fn spread_spec(rider: usize) -> RideSpec {
    let offset = (rider % 50) as f64 * 0.001;
    RideSpec {
        pickup_location: GeoPoint::new(48.85 + offset, 2.35 - offset),
        ..ride_spec(&format!("r{rider}"))
    }
}

/// Registers `drivers` drivers, requests and accepts one ride per driver.
fn busy_city(core: &mut TestCore, drivers: usize) -> Vec<RideId> {
    for d in 0..drivers {
        core.driver_online(&format!("d{d}"), &format!("driver-{d}"));
    }
    let mut rides = Vec::with_capacity(drivers);
    for d in 0..drivers {
        let ride_id = core.request(spread_spec(d), &format!("rider-{d}"));
        core.handle(
            conn(&format!("driver-{d}")),
            Command::AcceptRide {
                ride_id,
                driver_id: DriverId::from(format!("d{d}")),
            },
        )
        .expect("accept");
        rides.push(ride_id);
    }
    core.drain();
    rides
}

#[test]
#[ignore] // Only run explicitly: cargo test --package ride_core --test load_tests -- --ignored
fn test_sustained_load() {
    let mut core = TestCore::new();
    let rides = busy_city(&mut core, 500);

    let start = Instant::now();
    let mut events = 0;
    for _ in 0..60 {
        events += core.advance_secs(1);
        core.drain();
    }
    let duration = start.elapsed();

    let events_per_sec = events as f64 / duration.as_secs_f64();
    println!(
        "Sustained load test: {} timer events in {:.2}s ({:.0} events/sec)",
        events,
        duration.as_secs_f64(),
        events_per_sec
    );

    assert!(rides
        .iter()
        .all(|id| core.ride(*id).status == RideStatus::Completed));
    assert!(
        events_per_sec > 1000.0,
        "Should process >1000 events/sec, got {:.0}",
        events_per_sec
    );
}

#[test]
#[ignore]
fn test_request_burst() {
    let mut core = TestCore::new();
    for d in 0..100 {
        core.driver_online(&format!("d{d}"), &format!("driver-{d}"));
    }

    let start = Instant::now();
    for r in 0..500 {
        core.request(spread_spec(r), &format!("rider-{r}"));
    }
    let (messages, _) = core.drain();
    let duration = start.elapsed();

    let requests_per_sec = 500.0 / duration.as_secs_f64();
    println!(
        "Request burst: 500 requests, {} frames in {:.2}s ({:.0} requests/sec)",
        messages.len(),
        duration.as_secs_f64(),
        requests_per_sec
    );

    // Every request reaches every idle driver.
    assert_eq!(messages.iter().filter(|m| m.event.name() == "ride:new_request").count(), 50_000);
    assert!(
        requests_per_sec > 500.0,
        "Should handle >500 requests/sec, got {:.0}",
        requests_per_sec
    );
}
