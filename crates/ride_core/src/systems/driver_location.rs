//! Driver-reported positions.
//!
//! Handling is two explicit steps: [`record_position`] stores the point on the
//! ride and the driver, [`recompute_progress`] derives progress and ETA from
//! it. The system composes them and fans the result out.

use bevy_ecs::prelude::{Query, Res, ResMut};
use tracing::debug;

use crate::clock::SimulationClock;
use crate::commands::{Command, CommandOutcome, CommandResult, CurrentCommand, Receipt};
use crate::config::DispatchConfig;
use crate::ecs::{ConnectionId, Driver, DriverId, GeoPoint, Ride, RideId, RideStatus};
use crate::error::DispatchError;
use crate::protocol::{LocationUpdate, Outbox, ServerEvent};
use crate::registry::{driver_mut, ride_mut, Registry};
use crate::spatial::{eta_minutes, progress_percent};

pub fn record_position(ride: &mut Ride, driver: Option<&mut Driver>, location: GeoPoint, now: u64) {
    ride.current_location = Some(location);
    ride.last_location_update = Some(now);
    if let Some(driver) = driver {
        driver.location = Some(location);
        driver.last_update = now;
    }
}

/// Progress only moves once the rider is aboard; before that the ETA is to
/// the pickup point.
pub fn recompute_progress(ride: &mut Ride, speed_kmh: f64) {
    let Some(current) = ride.current_location else {
        return;
    };
    match ride.status {
        RideStatus::Accepted => {
            ride.eta_minutes = Some(eta_minutes(current, ride.pickup_location, speed_kmh));
        }
        RideStatus::InProgress => {
            ride.progress = progress_percent(ride.pickup_location, ride.destination, current);
            ride.eta_minutes = Some(eta_minutes(current, ride.destination, speed_kmh));
        }
        _ => {}
    }
}

#[allow(clippy::too_many_arguments)]
pub fn driver_location_system(
    command: Res<CurrentCommand>,
    clock: Res<SimulationClock>,
    config: Res<DispatchConfig>,
    registry: Res<Registry>,
    mut rides: Query<&mut Ride>,
    mut drivers: Query<&mut Driver>,
    mut outbox: ResMut<Outbox>,
    mut outcome: ResMut<CommandOutcome>,
) {
    let Command::ReportLocation {
        ride_id,
        driver_id,
        location,
    } = &command.command
    else {
        return;
    };
    let result = report_location(
        *ride_id,
        driver_id,
        *location,
        command.origin.as_ref(),
        clock.now(),
        config.average_speed_kmh,
        &registry,
        &mut rides,
        &mut drivers,
        &mut outbox,
    );
    outcome.set(result);
}

#[allow(clippy::too_many_arguments)]
fn report_location(
    ride_id: RideId,
    driver_id: &DriverId,
    location: GeoPoint,
    origin: Option<&ConnectionId>,
    now: u64,
    speed_kmh: f64,
    registry: &Registry,
    rides: &mut Query<&mut Ride>,
    drivers: &mut Query<&mut Driver>,
    outbox: &mut Outbox,
) -> CommandResult {
    if !location.is_valid() {
        return Err(DispatchError::Validation(
            "location must hold a valid lat/lng".into(),
        ));
    }
    let mut ride = ride_mut(registry, rides, ride_id)?;
    if ride.driver_id.as_ref() != Some(driver_id) {
        return Err(DispatchError::Validation(format!(
            "driver {driver_id} is not assigned to ride {ride_id}"
        )));
    }
    if !ride.status.is_active() {
        return Err(DispatchError::RideNotActive(ride_id));
    }

    // A driver that dropped off the channel still moves the ride.
    let mut driver = driver_mut(registry, drivers, driver_id).ok();
    record_position(&mut ride, driver.as_deref_mut(), location, now);
    recompute_progress(&mut ride, speed_kmh);

    let update = ServerEvent::LocationUpdate(LocationUpdate {
        ride_id,
        driver_id: Some(driver_id.clone()),
        location,
        priority: ride.priority,
        progress: Some(ride.progress),
        eta_minutes: ride.eta_minutes,
        estimated_arrival: None,
        timestamp: now,
    });
    outbox.publish_all(ride.rider_connections(), &update);
    outbox.publish_opt(
        origin,
        ServerEvent::LocationAck {
            ride_id,
            received: true,
            progress: ride.progress,
            eta_minutes: ride.eta_minutes,
            timestamp: now,
        },
    );
    debug!(ride_id = %ride_id, progress = ride.progress, "driver location recorded");
    Ok(Receipt::LocationRecorded {
        ride_id,
        progress: ride.progress,
    })
}
