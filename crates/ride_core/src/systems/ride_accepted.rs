use bevy_ecs::prelude::{Query, Res, ResMut};
use tracing::info;

use crate::clock::{SimulationClock, TimerKind};
use crate::commands::{Command, CommandOutcome, CommandResult, CurrentCommand, Receipt};
use crate::config::DispatchConfig;
use crate::ecs::{ConnectionId, Driver, DriverId, Ride, RideId, RideStatus};
use crate::error::DispatchError;
use crate::protocol::{ActiveRideNotice, Outbox, ServerEvent, SharingOpportunity};
use crate::registry::{driver_mut, ride_mut, Registry};
use crate::simulation::LegCursor;
use crate::spatial::estimate_duration;
use crate::store::{RecordStore, RecordStoreResource};
use crate::systems::persist_ride;
use crate::timers::RideTimers;

#[allow(clippy::too_many_arguments)]
pub fn ride_accepted_system(
    command: Res<CurrentCommand>,
    mut clock: ResMut<SimulationClock>,
    config: Res<DispatchConfig>,
    registry: Res<Registry>,
    mut rides: Query<&mut Ride>,
    mut drivers: Query<&mut Driver>,
    mut timers: ResMut<RideTimers>,
    mut store: ResMut<RecordStoreResource>,
    mut outbox: ResMut<Outbox>,
    mut outcome: ResMut<CommandOutcome>,
) {
    let Command::AcceptRide { ride_id, driver_id } = &command.command else {
        return;
    };
    let result = accept_ride(
        *ride_id,
        driver_id,
        &config,
        &registry,
        &mut rides,
        &mut drivers,
        &mut clock,
        &mut timers,
        &mut *store.0,
        &mut outbox,
    );
    outcome.set(result);
}

#[allow(clippy::too_many_arguments)]
fn accept_ride(
    ride_id: RideId,
    driver_id: &DriverId,
    config: &DispatchConfig,
    registry: &Registry,
    rides: &mut Query<&mut Ride>,
    drivers: &mut Query<&mut Driver>,
    clock: &mut SimulationClock,
    timers: &mut RideTimers,
    store: &mut dyn RecordStore,
    outbox: &mut Outbox,
) -> CommandResult {
    let now = clock.now();
    let mut driver = driver_mut(registry, drivers, driver_id)?;
    if let Some(current) = driver.current_ride {
        return Err(DispatchError::Validation(format!(
            "driver {driver_id} is already on ride {current}"
        )));
    }
    if driver.off_duty {
        return Err(DispatchError::Validation(format!(
            "driver {driver_id} is off duty"
        )));
    }

    let accepted = {
        let mut ride = ride_mut(registry, rides, ride_id)?;
        ride.advance(RideStatus::Accepted)?;
        ride.driver_id = Some(driver_id.clone());
        ride.accepted_at = Some(now);
        ride.leg = Some(LegCursor::approach());
        driver.assign(ride_id, now);

        timers.start(
            clock,
            ride_id,
            TimerKind::DurationTick,
            config.timers.duration_tick_ms,
        );
        timers.start(
            clock,
            ride_id,
            TimerKind::LocationStep,
            config.simulation.step_interval_ms(ride.priority),
        );
        persist_ride(store, &ride, now);
        ride.clone()
    };

    let estimated_duration = estimate_duration(
        accepted.pickup_location,
        accepted.destination,
        config.average_speed_kmh,
    );
    outbox.publish_opt(
        accepted.rider_connection.as_ref(),
        ServerEvent::RideAccepted {
            ride_id,
            driver_id: driver_id.clone(),
            priority: accepted.priority,
            estimated_duration: estimated_duration.clone(),
            message: "Your ride has been accepted".into(),
            timestamp: now,
        },
    );

    // Riders still waiting may want to share the car that just got busy.
    let waiting: Vec<ConnectionId> = rides
        .iter()
        .filter(|r| r.id != ride_id && r.status == RideStatus::Pending)
        .filter_map(|r| r.rider_connection.clone())
        .collect();
    let notice = ServerEvent::SharingOpportunity(SharingOpportunity::ActiveRide(ActiveRideNotice {
        active_ride_id: ride_id,
        driver_id: Some(driver_id.clone()),
        pickup_location: accepted.pickup_location,
        destination: accepted.destination,
        priority: accepted.priority,
        estimated_duration,
        timestamp: now,
    }));
    let notified = outbox.publish_all(&waiting, &notice);

    info!(
        ride_id = %ride_id,
        driver_id = %driver_id,
        sharing_notices = notified,
        "ride accepted"
    );
    Ok(Receipt::RideUpdated {
        ride_id,
        status: RideStatus::Accepted,
    })
}
