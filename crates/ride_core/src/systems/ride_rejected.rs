use bevy_ecs::prelude::{Query, Res, ResMut};
use tracing::info;

use crate::clock::SimulationClock;
use crate::commands::{Command, CommandOutcome, CurrentCommand, Receipt};
use crate::dispatch::broadcast_new_ride;
use crate::ecs::{Driver, Ride, RideStatus};
use crate::protocol::{Outbox, ServerEvent};
use crate::registry::{ride_mut, Registry};
use crate::store::RecordStoreResource;
use crate::systems::persist_ride;

/// The rejection self-loop on `pending`: remember the driver, tell the rider,
/// offer the ride again to everyone who has not turned it down.
#[allow(clippy::too_many_arguments)]
pub fn ride_rejected_system(
    command: Res<CurrentCommand>,
    clock: Res<SimulationClock>,
    registry: Res<Registry>,
    mut rides: Query<&mut Ride>,
    drivers: Query<&Driver>,
    mut store: ResMut<RecordStoreResource>,
    mut outbox: ResMut<Outbox>,
    mut outcome: ResMut<CommandOutcome>,
) {
    let Command::RejectRide { ride_id, driver_id } = &command.command else {
        return;
    };
    let now = clock.now();
    let result = ride_mut(&registry, &mut rides, *ride_id).and_then(|mut ride| {
        ride.advance(RideStatus::Pending)?;
        ride.record_rejection(driver_id);
        ride.last_rejection_at = Some(now);
        persist_ride(&mut *store.0, &ride, now);

        outbox.publish_opt(
            ride.rider_connection.as_ref(),
            ServerEvent::RideRejected {
                ride_id: *ride_id,
                driver_id: driver_id.clone(),
                message: "Driver declined, looking for another driver".into(),
                timestamp: now,
            },
        );
        let rebroadcast = broadcast_new_ride(&ride, drivers.iter(), &mut outbox);
        info!(
            ride_id = %ride_id,
            driver_id = %driver_id,
            rejections = ride.rejected_by.len(),
            rebroadcast,
            "ride rejected"
        );
        Ok(Receipt::RideUpdated {
            ride_id: *ride_id,
            status: RideStatus::Pending,
        })
    });
    outcome.set(result);
}
