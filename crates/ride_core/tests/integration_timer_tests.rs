mod support;

use ride_core::clock::{TimerKind, ONE_MIN_MS};
use ride_core::commands::Command;
use ride_core::ecs::RideStatus;
use ride_core::protocol::ServerEvent;
use ride_core::spatial::estimate_duration;
use ride_core::test_helpers::{TestCore, DESTINATION, PICKUP, START_MS};

use support::entities::{accepted_ride, conn, driver, pending_ride, DRIVER, RIDER};
use support::frames::{about_ride, events_for};

#[test]
fn acceptance_arms_duration_and_location_timers() {
    let mut core = TestCore::new();
    let ride_id = pending_ride(&mut core);
    assert_eq!(core.timers().armed_for(ride_id), 0);
    assert_eq!(core.core.next_deadline(), None);

    support::entities::accept(&mut core, ride_id, "d1", DRIVER);
    assert!(core.timers().is_armed(ride_id, TimerKind::DurationTick));
    assert!(core.timers().is_armed(ride_id, TimerKind::LocationStep));
    assert!(!core.timers().is_armed(ride_id, TimerKind::SyncTick));
    assert_eq!(core.core.next_deadline(), Some(START_MS + 1_000));
}

#[test]
fn duration_updates_count_up_from_acceptance() {
    let mut core = TestCore::new();
    let ride_id = accepted_ride(&mut core);
    let estimated = estimate_duration(PICKUP, DESTINATION, core.core.config().average_speed_kmh);

    for _ in 0..3 {
        core.advance_secs(1);
    }
    let (messages, _) = core.drain();
    let elapsed: Vec<(u64, u64)> = events_for(&messages, RIDER)
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::DurationUpdate {
                elapsed_time,
                remaining_time,
                ..
            } => Some((elapsed_time.total_seconds, remaining_time.total_seconds)),
            _ => None,
        })
        .collect();
    let total = estimated.minutes * ONE_MIN_MS / 1_000;
    assert_eq!(elapsed, vec![(1, total - 1), (2, total - 2), (3, total - 3)]);

    let ride = core.ride(ride_id);
    assert_eq!(ride.elapsed_time.map(|e| e.total_seconds), Some(3));
    assert_eq!(ride.remaining_time.map(|e| e.formatted.is_empty()), Some(false));
}

#[test]
fn driver_gets_duration_updates_too() {
    let mut core = TestCore::new();
    accepted_ride(&mut core);
    core.advance_secs(1);
    let (messages, _) = core.drain();
    assert!(events_for(&messages, DRIVER)
        .iter()
        .any(|event| matches!(event, ServerEvent::DurationUpdate { .. })));
}

#[test]
fn completed_ride_never_ticks_again() {
    let mut core = TestCore::new();
    let ride_id = accepted_ride(&mut core);
    core.advance_secs(3);
    core.handle(conn(DRIVER), Command::StartRide { ride_id })
        .expect("start");
    core.handle(
        conn(DRIVER),
        Command::CompleteRide {
            ride_id,
            driver_id: Some(driver("d1")),
        },
    )
    .expect("complete");
    assert_eq!(core.timers().armed_for(ride_id), 0);
    assert_eq!(core.timers().cancelled_total(), 2);
    core.drain();

    // Queued entries go stale and are dropped without running a system.
    core.advance_secs(120);
    let (messages, _) = core.drain();
    assert!(about_ride(&messages, ride_id).is_empty());
    assert_eq!(core.stats().completed_rides, 1);
    assert_eq!(core.ride(ride_id).status, RideStatus::Completed);
    assert_eq!(core.core.next_deadline(), None);
}

#[test]
fn cancelling_a_pending_ride_leaves_no_timers() {
    let mut core = TestCore::new();
    let ride_id = pending_ride(&mut core);
    core.handle(conn(RIDER), Command::CancelRide { ride_id })
        .expect("cancel");
    assert_eq!(core.timers().armed_count(), 0);
    assert_eq!(core.advance_secs(30), 0);
}

#[test]
fn timers_for_several_rides_stay_independent() {
    let mut core = TestCore::new();
    let first = accepted_ride(&mut core);
    core.driver_online("d2", "driver-two");
    let second = core.request_ride("r2", "rider-two");
    support::entities::accept(&mut core, second, "d2", "driver-two");

    core.handle(conn(DRIVER), Command::StartRide { ride_id: first })
        .expect("start");
    core.handle(
        conn(DRIVER),
        Command::CompleteRide {
            ride_id: first,
            driver_id: None,
        },
    )
    .expect("complete");
    assert_eq!(core.timers().armed_for(first), 0);
    assert_eq!(core.timers().armed_for(second), 2);

    core.drain();
    core.advance_secs(4);
    let (messages, _) = core.drain();
    assert!(about_ride(&messages, first).is_empty());
    assert!(!about_ride(&messages, second).is_empty());
}

#[test]
fn advancing_reports_how_many_timers_fired() {
    let mut core = TestCore::new();
    accepted_ride(&mut core);
    // Two duration ticks and one location step.
    assert_eq!(core.advance_secs(2), 3);
}
