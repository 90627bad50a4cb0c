#![allow(dead_code)]

use ride_core::commands::{Command, Receipt};
use ride_core::ecs::{ConnectionId, DriverId, Priority, RideId, RideSpec};
use ride_core::test_helpers::{ride_spec, TestCore};

pub const RIDER: &str = "rider-conn";
pub const DRIVER: &str = "driver-conn";
pub const OTHER_DRIVER: &str = "other-driver-conn";
pub const SHARED_RIDER: &str = "shared-rider-conn";

pub fn conn(name: &str) -> Option<ConnectionId> {
    Some(ConnectionId::from(name))
}

pub fn driver(id: &str) -> DriverId {
    DriverId::from(id)
}

pub fn high_priority_spec(rider: &str) -> RideSpec {
    RideSpec {
        priority: Priority::High,
        ..ride_spec(rider)
    }
}

/// One driver online and one pending ride from `r1`.
pub fn pending_ride(core: &mut TestCore) -> RideId {
    core.driver_online("d1", DRIVER);
    core.request_ride("r1", RIDER)
}

/// # Panics
///
/// Panics if the driver cannot accept the ride.
pub fn accept(core: &mut TestCore, ride_id: RideId, driver_id: &str, connection: &str) {
    match core.handle(
        conn(connection),
        Command::AcceptRide {
            ride_id,
            driver_id: driver(driver_id),
        },
    ) {
        Ok(Receipt::RideUpdated { .. }) => {}
        other => panic!("accept failed: {other:?}"),
    }
}

/// A ride accepted by `d1`, outbox drained.
pub fn accepted_ride(core: &mut TestCore) -> RideId {
    let ride_id = pending_ride(core);
    accept(core, ride_id, "d1", DRIVER);
    core.drain();
    ride_id
}
