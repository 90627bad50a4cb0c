use bevy_ecs::prelude::{Commands, Query, Res, ResMut};
use tracing::{debug, error, info};

use crate::clock::{SimulationClock, ONE_MIN_MS};
use crate::commands::{Command, CommandOutcome, CurrentCommand, Receipt};
use crate::ecs::{Driver, Ride, RideStatus};
use crate::error::DispatchError;
use crate::protocol::{ActualDuration, Outbox, ServerEvent};
use crate::registry::{ride_mut, Registry};
use crate::spatial::{format_minutes, haversine_km};
use crate::stats::RideStats;
use crate::store::{CompletedRide, RecordStore, RecordStoreResource};
use crate::systems::persist_ride;
use crate::timers::RideTimers;

/// Whole minutes between `start` and `end`, half away from zero.
pub fn duration_minutes(start: u64, end: u64) -> u64 {
    (end.saturating_sub(start) as f64 / ONE_MIN_MS as f64).round() as u64
}

fn record_for(ride: &Ride, completed_at: u64) -> CompletedRide {
    let start_time = ride.clock_start();
    CompletedRide {
        ride_id: ride.id,
        driver_id: ride.driver_id.clone(),
        rider_id: ride.rider_id.clone(),
        start_time,
        completed_at,
        duration: duration_minutes(start_time, completed_at),
        priority: ride.priority,
        distance: haversine_km(ride.pickup_location, ride.destination),
        pickup_location: ride.pickup_location,
        destination: ride.destination,
        shared_ride: ride.has_shared_riders(),
    }
}

/// Completion record of a ride that has completed.
pub fn completed_record(ride: &Ride) -> Option<CompletedRide> {
    match (ride.status, ride.completed_at) {
        (RideStatus::Completed, Some(completed_at)) => Some(record_for(ride, completed_at)),
        _ => None,
    }
}

/// `in_progress -> completed` and everything that hangs off it: timers stop,
/// the driver is released, the completion record is written once, and the
/// retention window drops its oldest ride if it overflows.
#[allow(clippy::too_many_arguments)]
pub(crate) fn finish_ride(
    ride: &mut Ride,
    now: u64,
    registry: &mut Registry,
    drivers: &mut Query<&mut Driver>,
    timers: &mut RideTimers,
    store: &mut dyn RecordStore,
    stats: &mut RideStats,
    outbox: &mut Outbox,
    commands: &mut Commands,
) -> Result<CompletedRide, DispatchError> {
    ride.advance(RideStatus::Completed)?;
    ride.completed_at = Some(now);
    ride.leg = None;
    let cancelled = timers.cancel_all(ride.id);
    let record = record_for(ride, now);
    let duration = record.duration;

    let mut driver_connection = None;
    if let Some(entity) = ride
        .driver_id
        .as_ref()
        .and_then(|id| registry.driver_entity(id).ok())
    {
        if let Ok(mut driver) = drivers.get_mut(entity) {
            if driver.current_ride == Some(ride.id) {
                driver.release(now);
            }
            driver_connection = Some(driver.connection.clone());
        }
    }

    if let Err(err) = store.store_completed_ride(record.clone()) {
        error!(ride_id = %ride.id, error = %err, "completion record not stored");
    }
    persist_ride(store, ride, now);
    stats.record_completed(duration, now);

    let event = ServerEvent::RideCompleted {
        ride_id: ride.id,
        completed_at: now,
        actual_duration: ActualDuration {
            minutes: duration,
            formatted: format_minutes(duration),
        },
        priority: ride.priority,
        shared_ride: record.shared_ride,
    };
    outbox.publish_all(ride.rider_connections().chain(driver_connection.as_ref()), &event);

    for (evicted, entity) in registry.retain_completed(ride.id) {
        commands.entity(entity).despawn();
        debug!(ride_id = %evicted, "completed ride evicted from the retention window");
    }
    info!(
        ride_id = %ride.id,
        duration_minutes = duration,
        timers_cancelled = cancelled,
        "ride completed"
    );
    Ok(record)
}

#[allow(clippy::too_many_arguments)]
pub fn ride_completed_system(
    mut commands: Commands,
    command: Res<CurrentCommand>,
    clock: Res<SimulationClock>,
    mut registry: ResMut<Registry>,
    mut rides: Query<&mut Ride>,
    mut drivers: Query<&mut Driver>,
    mut timers: ResMut<RideTimers>,
    mut stats: ResMut<RideStats>,
    mut store: ResMut<RecordStoreResource>,
    mut outbox: ResMut<Outbox>,
    mut outcome: ResMut<CommandOutcome>,
) {
    let Command::CompleteRide { ride_id, driver_id } = &command.command else {
        return;
    };
    let now = clock.now();
    let result = ride_mut(&registry, &mut rides, *ride_id).and_then(|mut ride| {
        if let Some(driver_id) = driver_id {
            if ride.driver_id.as_ref() != Some(driver_id) {
                return Err(DispatchError::Validation(format!(
                    "driver {driver_id} is not assigned to ride {ride_id}"
                )));
            }
        }
        finish_ride(
            &mut ride,
            now,
            &mut registry,
            &mut drivers,
            &mut timers,
            &mut *store.0,
            &mut stats,
            &mut outbox,
            &mut commands,
        )
        .map(Receipt::RideCompleted)
    });
    outcome.set(result);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_round_to_whole_minutes() {
        assert_eq!(duration_minutes(0, 89_999), 1);
        assert_eq!(duration_minutes(0, 90_000), 2);
        assert_eq!(duration_minutes(0, 29_999), 0);
        assert_eq!(duration_minutes(10, 5), 0);
    }
}
