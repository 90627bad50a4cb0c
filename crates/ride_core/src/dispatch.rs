//! Announcing rides to drivers.
//!
//! Delivery is per recipient through the outbox; a dead connection only loses
//! its own copy. Re-sending to a driver that already saw the ride is fine,
//! drivers de-duplicate by ride id.

use crate::ecs::{ConnectionId, Driver, DriverId, Ride};
use crate::protocol::{Outbox, ServerEvent};

/// Drivers that may receive `ride` as a new request: dispatchable and not in
/// the ride's rejection set. Sorted by driver id.
pub fn eligible_drivers<'a>(
    ride: &Ride,
    drivers: impl IntoIterator<Item = &'a Driver>,
) -> Vec<&'a Driver> {
    let mut eligible: Vec<&Driver> = drivers
        .into_iter()
        .filter(|d| d.is_dispatchable() && !ride.is_rejected_by(&d.driver_id))
        .collect();
    eligible.sort_by(|a, b| a.driver_id.cmp(&b.driver_id));
    eligible
}

/// Publishes `ride:new_request` to every eligible driver; returns how many.
pub fn broadcast_new_ride<'a>(
    ride: &Ride,
    drivers: impl IntoIterator<Item = &'a Driver>,
    outbox: &mut Outbox,
) -> usize {
    let eligible = eligible_drivers(ride, drivers);
    if eligible.is_empty() {
        return 0;
    }
    let event = ServerEvent::NewRequest(Box::new(ride.clone()));
    outbox.publish_all(eligible.iter().map(|d| &d.connection), &event)
}

/// Connections of dispatchable drivers other than `except`, sorted by
/// driver id. Used for informational notices.
pub fn available_connections_except<'a>(
    drivers: impl IntoIterator<Item = &'a Driver>,
    except: Option<&DriverId>,
) -> Vec<ConnectionId> {
    let mut available: Vec<&Driver> = drivers
        .into_iter()
        .filter(|d| d.is_dispatchable() && Some(&d.driver_id) != except)
        .collect();
    available.sort_by(|a, b| a.driver_id.cmp(&b.driver_id));
    available.into_iter().map(|d| d.connection.clone()).collect()
}
