mod support;

use ride_core::commands::{Command, Receipt};
use ride_core::ecs::RideStatus;
use ride_core::error::DispatchError;
use ride_core::test_helpers::TestCore;

use support::entities::{accepted_ride, conn, DRIVER, OTHER_DRIVER, RIDER};
use support::frames::count_named;
use support::schedule::run_until_status;

#[test]
fn driver_disconnect_forgets_the_driver() {
    let mut core = TestCore::new();
    core.driver_online("d1", DRIVER);
    core.driver_online("d2", OTHER_DRIVER);

    let result = core.handle(conn(DRIVER), Command::Disconnect);
    assert_eq!(
        result,
        Ok(Receipt::Disconnected {
            drivers_removed: 1,
            rides_cancelled: 0
        })
    );
    assert!(core.driver("d1").is_none());
    assert!(core.driver("d2").is_some());

    core.drain();
    core.request_ride("r1", RIDER);
    let (messages, _) = core.drain();
    assert_eq!(count_named(&messages, "ride:new_request"), 1);
}

#[test]
fn rider_disconnect_cancels_only_pending_rides() {
    let mut core = TestCore::new();
    let accepted = accepted_ride(&mut core);
    let pending = core.request_ride("r1", RIDER);

    let result = core.handle(conn(RIDER), Command::Disconnect);
    assert_eq!(
        result,
        Ok(Receipt::Disconnected {
            drivers_removed: 0,
            rides_cancelled: 1
        })
    );
    assert_eq!(core.ride(pending).status, RideStatus::Cancelled);
    assert_eq!(core.ride(accepted).status, RideStatus::Accepted);
    assert_eq!(core.stats().cancelled_rides, 1);
}

#[test]
fn ride_keeps_moving_after_its_driver_drops() {
    let mut core = TestCore::new();
    let ride_id = accepted_ride(&mut core);
    core.handle(conn(DRIVER), Command::Disconnect)
        .expect("disconnect");

    run_until_status(&mut core, ride_id, RideStatus::Completed, 2_000, 120_000);
    assert_eq!(core.ride(ride_id).status, RideStatus::Completed);
    assert_eq!(core.stats().completed_rides, 1);
}

#[test]
fn driver_can_come_back_on_a_new_connection() {
    let mut core = TestCore::new();
    core.driver_online("d1", DRIVER);
    core.handle(conn(DRIVER), Command::Disconnect)
        .expect("disconnect");
    core.driver_online("d1", "driver-conn-2");

    let d1 = core.driver("d1").expect("registered again");
    assert_eq!(d1.connection.as_str(), "driver-conn-2");
    assert!(d1.available);
}

#[test]
fn disconnect_needs_a_connection() {
    let mut core = TestCore::new();
    let result = core.handle(None, Command::Disconnect);
    assert!(matches!(result, Err(DispatchError::Validation(_))));
}
