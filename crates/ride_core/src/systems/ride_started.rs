use bevy_ecs::prelude::{Query, Res, ResMut};
use tracing::info;

use crate::clock::SimulationClock;
use crate::commands::{Command, CommandOutcome, CurrentCommand, Receipt};
use crate::config::DispatchConfig;
use crate::ecs::{Ride, RideStatus};
use crate::error::DispatchError;
use crate::protocol::{Outbox, ServerEvent};
use crate::registry::{ride_mut, Registry};
use crate::spatial::estimate_duration;
use crate::store::RecordStoreResource;
use crate::systems::persist_ride;

/// `accepted -> in_progress`, reachable from the driver's start action and
/// from the end of the approach leg. Whichever comes first wins; the second
/// trigger returns `Ok(false)` and changes nothing.
pub(crate) fn begin_ride(
    ride: &mut Ride,
    now: u64,
    speed_kmh: f64,
    outbox: &mut Outbox,
) -> Result<bool, DispatchError> {
    if ride.status == RideStatus::InProgress {
        return Ok(false);
    }
    ride.advance(RideStatus::InProgress)?;
    let start_time = *ride.start_time.get_or_insert(now);

    let event = ServerEvent::RideStarted {
        ride_id: ride.id,
        priority: ride.priority,
        start_time,
        estimated_duration: estimate_duration(ride.pickup_location, ride.destination, speed_kmh),
    };
    outbox.publish_all(ride.rider_connections(), &event);
    info!(ride_id = %ride.id, "ride started");
    Ok(true)
}

#[allow(clippy::too_many_arguments)]
pub fn ride_started_system(
    command: Res<CurrentCommand>,
    clock: Res<SimulationClock>,
    config: Res<DispatchConfig>,
    registry: Res<Registry>,
    mut rides: Query<&mut Ride>,
    mut store: ResMut<RecordStoreResource>,
    mut outbox: ResMut<Outbox>,
    mut outcome: ResMut<CommandOutcome>,
) {
    let Command::StartRide { ride_id } = &command.command else {
        return;
    };
    let now = clock.now();
    let result = ride_mut(&registry, &mut rides, *ride_id).and_then(|mut ride| {
        if begin_ride(&mut ride, now, config.average_speed_kmh, &mut outbox)? {
            persist_ride(&mut *store.0, &ride, now);
        }
        Ok(Receipt::RideUpdated {
            ride_id: *ride_id,
            status: ride.status,
        })
    });
    outcome.set(result);
}
