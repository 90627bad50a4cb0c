use bevy_ecs::prelude::{Commands, Query, Res, ResMut};
use tracing::{debug, info};

use crate::clock::SimulationClock;
use crate::commands::{Command, CommandOutcome, CurrentCommand, Receipt};
use crate::dispatch::eligible_drivers;
use crate::ecs::{Driver, Ride, RideId, RideStatus};
use crate::error::DispatchError;
use crate::protocol::{Outbox, ServerEvent};
use crate::registry::{ride_mut, Registry};
use crate::stats::RideStats;
use crate::store::RecordStoreResource;
use crate::systems::persist_ride;
use crate::timers::RideTimers;

/// `pending -> cancelled`. Any timer still attached to the ride is dropped.
pub(crate) fn cancel_ride(
    ride: &mut Ride,
    now: u64,
    timers: &mut RideTimers,
    stats: &mut RideStats,
) -> Result<(), DispatchError> {
    ride.advance(RideStatus::Cancelled)?;
    ride.cancelled_at = Some(now);
    ride.leg = None;
    timers.cancel_all(ride.id);
    stats.record_cancelled(now);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn ride_cancelled_system(
    mut commands: Commands,
    command: Res<CurrentCommand>,
    clock: Res<SimulationClock>,
    mut registry: ResMut<Registry>,
    mut rides: Query<&mut Ride>,
    drivers: Query<&Driver>,
    mut timers: ResMut<RideTimers>,
    mut stats: ResMut<RideStats>,
    mut store: ResMut<RecordStoreResource>,
    mut outbox: ResMut<Outbox>,
    mut outcome: ResMut<CommandOutcome>,
) {
    let Command::CancelRide { ride_id } = &command.command else {
        return;
    };
    let now = clock.now();
    let result = ride_mut(&registry, &mut rides, *ride_id).and_then(|mut ride| {
        cancel_ride(&mut ride, now, &mut timers, &mut stats)?;
        persist_ride(&mut *store.0, &ride, now);

        // Drivers that were offered the ride drop it from their list.
        let event = ServerEvent::RideCancelled {
            ride_id: *ride_id,
            timestamp: now,
        };
        let offered = eligible_drivers(&ride, drivers.iter());
        outbox.publish_all(offered.iter().map(|d| &d.connection), &event);
        outbox.publish_opt(ride.rider_connection.as_ref(), event);

        info!(ride_id = %ride_id, "ride cancelled");
        Ok(Receipt::RideUpdated {
            ride_id: *ride_id,
            status: RideStatus::Cancelled,
        })
    });
    if result.is_ok() {
        evict_cancelled(&mut registry, &mut commands, *ride_id);
    }
    outcome.set(result);
}

/// Puts a cancelled ride in the cancelled-ride window and despawns whatever
/// falls out of it.
pub(crate) fn evict_cancelled(registry: &mut Registry, commands: &mut Commands, ride_id: RideId) {
    for (evicted, entity) in registry.retain_cancelled(ride_id) {
        commands.entity(entity).despawn();
        debug!(ride_id = %evicted, "cancelled ride evicted from the retention window");
    }
}
