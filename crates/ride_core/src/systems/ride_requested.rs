use bevy_ecs::prelude::{Commands, Query, Res, ResMut};
use tracing::info;

use crate::clock::SimulationClock;
use crate::commands::{Command, CommandOutcome, CurrentCommand, Receipt};
use crate::config::DispatchConfig;
use crate::dispatch::broadcast_new_ride;
use crate::ecs::{Driver, Ride, RideId};
use crate::protocol::{Outbox, ServerEvent};
use crate::registry::Registry;
use crate::spatial::estimate_duration;
use crate::stats::RideStats;
use crate::store::RecordStoreResource;
use crate::systems::persist_ride;

/// Creates a pending ride and announces it to every eligible driver.
#[allow(clippy::too_many_arguments)]
pub fn ride_requested_system(
    mut commands: Commands,
    command: Res<CurrentCommand>,
    clock: Res<SimulationClock>,
    config: Res<DispatchConfig>,
    mut registry: ResMut<Registry>,
    drivers: Query<&Driver>,
    mut stats: ResMut<RideStats>,
    mut store: ResMut<RecordStoreResource>,
    mut outbox: ResMut<Outbox>,
    mut outcome: ResMut<CommandOutcome>,
) {
    let Command::RequestRide(spec) = &command.command else {
        return;
    };
    if let Err(err) = spec.validate() {
        outcome.set(Err(err));
        return;
    }
    let now = clock.now();

    let ride = Ride::new(RideId::new(), spec.clone(), command.origin.clone(), now);
    let estimated_duration = estimate_duration(
        ride.pickup_location,
        ride.destination,
        config.average_speed_kmh,
    );
    stats.record_created(ride.priority, now);
    persist_ride(&mut *store.0, &ride, now);

    let notified_drivers = broadcast_new_ride(&ride, drivers.iter(), &mut outbox);
    outbox.publish_opt(
        ride.rider_connection.as_ref(),
        ServerEvent::RideCreated {
            ride_id: ride.id,
            status: ride.status,
            priority: ride.priority,
            estimated_duration: estimated_duration.clone(),
            timestamp: now,
        },
    );
    info!(
        ride_id = %ride.id,
        rider_id = %ride.rider_id,
        priority = ?ride.priority,
        notified_drivers,
        "ride requested"
    );

    let ride_id = ride.id;
    let entity = commands.spawn(ride).id();
    registry.index_ride(ride_id, entity);

    outcome.set(Ok(Receipt::RideCreated {
        ride_id,
        estimated_duration,
        notified_drivers,
    }));
}
