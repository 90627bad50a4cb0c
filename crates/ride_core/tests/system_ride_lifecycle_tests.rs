mod support;

use ride_core::api;
use ride_core::commands::{Command, Receipt};
use ride_core::ecs::{Ride, RideId, RideStatus};
use ride_core::error::DispatchError;
use ride_core::protocol::ServerEvent;
use ride_core::registry::Registry;
use ride_core::store::CompletedRideFilter;
use ride_core::test_helpers::TestCore;

use support::entities::{accept, accepted_ride, conn, driver, pending_ride, DRIVER, OTHER_DRIVER, RIDER};
use support::frames::{count_named, names_for};
use support::schedule::run_until_status;
use support::world::TestCoreBuilder;

const THIRD_DRIVER: &str = "third-driver-conn";

/// Request, accept, start and complete one ride with `d1`.
fn complete_one(core: &mut TestCore, rider: &str) -> RideId {
    let ride_id = core.request_ride(rider, RIDER);
    accept(core, ride_id, "d1", DRIVER);
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
    core.advance_secs(1);
    ride_id
}

fn live_ride_count(core: &mut TestCore) -> usize {
    let world = core.core.world_mut();
    world.query::<&Ride>().iter(world).count()
}

#[test]
fn accepted_ride_runs_to_completion_on_its_own() {
    let mut core = TestCore::new();
    let ride_id = accepted_ride(&mut core);

    let messages = run_until_status(&mut core, ride_id, RideStatus::Completed, 1_000, 120_000);

    let ride = core.ride(ride_id);
    assert_eq!(ride.status, RideStatus::Completed);
    assert_eq!(ride.progress, 100);
    assert!(ride.start_time.is_some());
    assert!(ride.completed_at.is_some());

    let rider = names_for(&messages, RIDER);
    assert_eq!(rider.iter().filter(|n| **n == "ride:started").count(), 1);
    assert_eq!(rider.iter().filter(|n| **n == "ride:completed").count(), 1);
    assert_eq!(rider.last(), Some(&"ride:completed"));
    assert!(names_for(&messages, DRIVER).contains(&"ride:completed"));

    let d1 = core.driver("d1").expect("driver stays registered");
    assert!(d1.available);
    assert_eq!(d1.current_ride, None);
    assert_eq!(core.timers().armed_for(ride_id), 0);

    assert_eq!(core.stats().completed_rides, 1);
    let records = core
        .store()
        .0
        .completed_rides(&CompletedRideFilter::default(), 10);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].ride_id, ride_id);
    assert_eq!(records[0].driver_id, Some(driver("d1")));
}

#[test]
fn normal_ride_completes_after_both_legs() {
    let mut core = TestCore::new();
    let ride_id = accepted_ride(&mut core);

    // 11 approach ticks, the arrival tick, 15 destination ticks at 2 s.
    core.advance_secs(52);
    assert_eq!(core.ride(ride_id).status, RideStatus::InProgress);
    core.advance_secs(2);
    assert_eq!(core.ride(ride_id).status, RideStatus::Completed);
}

#[test]
fn rejection_rebroadcasts_to_the_remaining_drivers() {
    let mut core = TestCore::new();
    core.driver_online("d1", DRIVER);
    core.driver_online("d2", OTHER_DRIVER);
    let ride_id = core.request_ride("r1", RIDER);
    let (created, _) = core.drain();
    assert_eq!(count_named(&created, "ride:new_request"), 2);

    let reject = Command::RejectRide {
        ride_id,
        driver_id: driver("d1"),
    };
    core.handle(conn(DRIVER), reject.clone()).expect("reject");
    let (messages, _) = core.drain();
    assert_eq!(names_for(&messages, RIDER), vec!["ride:rejected"]);
    assert_eq!(names_for(&messages, OTHER_DRIVER), vec!["ride:new_request"]);
    assert!(names_for(&messages, DRIVER).is_empty());

    // Rejecting twice leaves the set unchanged.
    core.handle(conn(DRIVER), reject).expect("second reject");
    let ride = core.ride(ride_id);
    assert_eq!(ride.status, RideStatus::Pending);
    assert_eq!(ride.rejected_by, vec![driver("d1")]);
    assert!(ride.last_rejection_at.is_some());

    accept(&mut core, ride_id, "d2", OTHER_DRIVER);
    let ride = core.ride(ride_id);
    assert_eq!(ride.status, RideStatus::Accepted);
    assert_eq!(ride.driver_id, Some(driver("d2")));
    assert_eq!(ride.rejected_by, vec![driver("d1")]);
}

#[test]
fn pending_ride_can_be_cancelled_once() {
    let mut core = TestCore::new();
    let ride_id = pending_ride(&mut core);
    core.drain();

    let result = core.handle(conn(RIDER), Command::CancelRide { ride_id });
    assert_eq!(
        result,
        Ok(Receipt::RideUpdated {
            ride_id,
            status: RideStatus::Cancelled
        })
    );
    let (messages, _) = core.drain();
    assert_eq!(names_for(&messages, RIDER), vec!["ride:cancelled"]);
    assert_eq!(names_for(&messages, DRIVER), vec!["ride:cancelled"]);

    let again = core.handle(conn(RIDER), Command::CancelRide { ride_id });
    assert!(matches!(
        again,
        Err(DispatchError::InvalidTransition {
            from: RideStatus::Cancelled,
            to: RideStatus::Cancelled,
            ..
        })
    ));
    assert_eq!(core.stats().cancelled_rides, 1);
}

#[test]
fn illegal_transitions_leave_the_ride_untouched() {
    let mut core = TestCore::new();
    let ride_id = pending_ride(&mut core);

    let start = core.handle(conn(DRIVER), Command::StartRide { ride_id });
    assert!(matches!(start, Err(DispatchError::InvalidTransition { .. })));
    let complete = core.handle(
        conn(DRIVER),
        Command::CompleteRide {
            ride_id,
            driver_id: None,
        },
    );
    assert!(matches!(complete, Err(DispatchError::InvalidTransition { .. })));
    assert_eq!(core.ride(ride_id).status, RideStatus::Pending);

    accept(&mut core, ride_id, "d1", DRIVER);
    let cancel = core.handle(conn(RIDER), Command::CancelRide { ride_id });
    assert!(matches!(cancel, Err(DispatchError::InvalidTransition { .. })));
    let reject = core.handle(
        conn(DRIVER),
        Command::RejectRide {
            ride_id,
            driver_id: driver("d1"),
        },
    );
    assert!(matches!(reject, Err(DispatchError::InvalidTransition { .. })));
    assert_eq!(core.ride(ride_id).status, RideStatus::Accepted);
}

#[test]
fn busy_driver_cannot_take_a_second_ride() {
    let mut core = TestCore::new();
    let first = accepted_ride(&mut core);
    let second = core.request_ride("r2", "rider-two");
    // The busy driver is not offered the new ride.
    let (messages, _) = core.drain();
    assert!(names_for(&messages, DRIVER).is_empty());

    let result = core.handle(
        conn(DRIVER),
        Command::AcceptRide {
            ride_id: second,
            driver_id: driver("d1"),
        },
    );
    assert!(matches!(result, Err(DispatchError::Validation(_))));
    assert_eq!(core.ride(second).status, RideStatus::Pending);
    assert_eq!(core.driver("d1").and_then(|d| d.current_ride), Some(first));
}

#[test]
fn completion_by_the_wrong_driver_is_refused() {
    let mut core = TestCore::new();
    let ride_id = accepted_ride(&mut core);
    core.handle(conn(DRIVER), Command::StartRide { ride_id })
        .expect("start");

    let result = core.handle(
        conn(OTHER_DRIVER),
        Command::CompleteRide {
            ride_id,
            driver_id: Some(driver("d9")),
        },
    );
    assert!(matches!(result, Err(DispatchError::Validation(_))));
    let (messages, _) = core.drain();
    assert!(messages
        .iter()
        .any(|m| matches!(m.event, ServerEvent::Error { command: "ride:complete", .. })));
    assert_eq!(core.ride(ride_id).status, RideStatus::InProgress);
}

#[test]
fn accepting_with_an_unknown_driver_is_not_found() {
    let mut core = TestCore::new();
    let ride_id = pending_ride(&mut core);
    let result = core.handle(
        conn("ghost"),
        Command::AcceptRide {
            ride_id,
            driver_id: driver("ghost"),
        },
    );
    assert!(result.is_err_and(|e| e.is_not_found()));
}

#[test]
fn second_rejection_keeps_the_first() {
    let mut core = TestCore::new();
    core.driver_online("d1", DRIVER);
    core.driver_online("d2", OTHER_DRIVER);
    core.driver_online("d3", THIRD_DRIVER);
    let ride_id = core.request_ride("r1", RIDER);
    core.drain();

    core.handle(
        conn(DRIVER),
        Command::RejectRide {
            ride_id,
            driver_id: driver("d1"),
        },
    )
    .expect("first reject");
    let (messages, _) = core.drain();
    assert!(names_for(&messages, DRIVER).is_empty());
    assert_eq!(names_for(&messages, OTHER_DRIVER), vec!["ride:new_request"]);
    assert_eq!(names_for(&messages, THIRD_DRIVER), vec!["ride:new_request"]);

    core.handle(
        conn(OTHER_DRIVER),
        Command::RejectRide {
            ride_id,
            driver_id: driver("d2"),
        },
    )
    .expect("second reject");
    let (messages, _) = core.drain();
    assert!(names_for(&messages, DRIVER).is_empty());
    assert!(names_for(&messages, OTHER_DRIVER).is_empty());
    assert_eq!(names_for(&messages, THIRD_DRIVER), vec!["ride:new_request"]);

    let ride = core.ride(ride_id);
    assert_eq!(ride.status, RideStatus::Pending);
    assert_eq!(ride.rejected_by, vec![driver("d1"), driver("d2")]);
}

#[test]
fn only_the_accepting_driver_is_bound() {
    let mut core = TestCore::new();
    core.driver_online("d1", DRIVER);
    core.driver_online("d2", OTHER_DRIVER);
    let ride_id = core.request_ride("r1", RIDER);
    let (created, _) = core.drain();
    assert_eq!(names_for(&created, DRIVER), vec!["ride:new_request"]);
    assert_eq!(names_for(&created, OTHER_DRIVER), vec!["ride:new_request"]);

    accept(&mut core, ride_id, "d1", DRIVER);
    let (messages, _) = core.drain();
    assert_eq!(names_for(&messages, RIDER), vec!["ride:accepted"]);
    assert!(names_for(&messages, OTHER_DRIVER).is_empty());

    core.advance_secs(4);
    let (messages, _) = core.drain();
    assert!(names_for(&messages, OTHER_DRIVER).is_empty());

    assert_eq!(core.ride(ride_id).driver_id, Some(driver("d1")));
    assert!(!core.driver("d1").expect("d1").available);
    assert!(core.driver("d2").expect("d2").is_dispatchable());
}

#[test]
fn off_duty_driver_cannot_accept() {
    let mut core = TestCore::new();
    core.driver_online("d1", DRIVER);
    core.handle(
        conn(DRIVER),
        Command::DriverUnavailable {
            driver_id: driver("d1"),
        },
    )
    .expect("go off duty");
    let ride_id = core.request_ride("r1", RIDER);
    let (messages, _) = core.drain();
    assert!(names_for(&messages, DRIVER).is_empty());

    let result = core.handle(
        conn(DRIVER),
        Command::AcceptRide {
            ride_id,
            driver_id: driver("d1"),
        },
    );
    assert!(matches!(result, Err(DispatchError::Validation(_))));
    assert_eq!(core.ride(ride_id).status, RideStatus::Pending);
    assert_eq!(core.driver("d1").and_then(|d| d.current_ride), None);
}

#[test]
fn retention_window_drops_the_oldest_completed_ride() {
    let mut core = TestCoreBuilder::new().with_retention(2).build();
    core.driver_online("d1", DRIVER);
    let first = complete_one(&mut core, "r1");
    let second = complete_one(&mut core, "r2");
    let third = complete_one(&mut core, "r3");

    let registry = core.core.world().resource::<Registry>();
    assert!(!registry.contains_ride(first));
    assert_eq!(registry.completed_ids().collect::<Vec<_>>(), vec![third, second]);
    assert_eq!(live_ride_count(&mut core), 2);

    // The record store still answers for the evicted ride.
    let read = api::get_ride(&core.core, &first.to_string());
    assert_eq!(read.status, 200);
    assert_eq!(core.stats().completed_rides, 3);
}

#[test]
fn cancelled_rides_are_bounded_too() {
    let mut core = TestCoreBuilder::new().with_retention(1).build();
    core.driver_online("d1", DRIVER);
    let first = core.request_ride("r1", RIDER);
    let second = core.request_ride("r2", RIDER);
    let kept = core.request_ride("r3", RIDER);

    for ride_id in [first, second] {
        core.handle(conn(RIDER), Command::CancelRide { ride_id })
            .expect("cancel");
    }

    let registry = core.core.world().resource::<Registry>();
    assert!(!registry.contains_ride(first));
    assert!(registry.contains_ride(second));
    assert!(registry.contains_ride(kept));
    assert_eq!(live_ride_count(&mut core), 2);
    assert_eq!(core.ride(kept).status, RideStatus::Pending);
    assert_eq!(api::get_ride(&core.core, &first.to_string()).status, 200);
}
