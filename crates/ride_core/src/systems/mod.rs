//! One system per inbound command and per timer kind.
//!
//! Command systems read [`crate::commands::CurrentCommand`] and leave their
//! result in [`crate::commands::CommandOutcome`]; timer systems read
//! [`crate::clock::CurrentEvent`]. Either way, outbound traffic goes through
//! [`crate::protocol::Outbox`].

pub mod driver_location;
pub mod driver_presence;
pub mod duration_tick;
pub mod location_step;
pub mod ride_accepted;
pub mod ride_cancelled;
pub mod ride_completed;
pub mod ride_rejected;
pub mod ride_requested;
pub mod ride_started;
pub mod sharing_evaluated;
pub mod sharing_requested;
pub mod sharing_response;
pub mod sync_tick;

use bevy_ecs::prelude::Query;
use tracing::warn;

use crate::ecs::{ConnectionId, Driver, DriverId, Ride};
use crate::registry::Registry;
use crate::store::RecordStore;

/// Writes the ride snapshot to the record store. A store failure is logged;
/// the live ride stays authoritative.
pub(crate) fn persist_ride(store: &mut dyn RecordStore, ride: &Ride, now: u64) {
    if let Err(err) = store.upsert_ride(ride, now) {
        warn!(ride_id = %ride.id, error = %err, "ride snapshot not stored");
    }
}

/// Connection of a registered driver, if any.
pub(crate) fn driver_connection(
    registry: &Registry,
    drivers: &Query<&Driver>,
    driver_id: Option<&DriverId>,
) -> Option<ConnectionId> {
    let entity = registry.driver_entity(driver_id?).ok()?;
    drivers.get(entity).ok().map(|d| d.connection.clone())
}
