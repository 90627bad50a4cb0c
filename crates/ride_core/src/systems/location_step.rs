//! Drives the synthetic two-leg movement of an accepted ride.
//!
//! Approach leg: steps `0..=steps` each emit a position, the tick after the
//! last one is the arrival at pickup (starting the ride unless the driver
//! already did). Destination leg: steps `1..=steps` emit position and
//! progress; the final step completes the ride.

use bevy_ecs::prelude::{Commands, Query, Res, ResMut};
use tracing::{debug, warn};

use crate::clock::{CurrentEvent, SimulationClock, TimerKind, ONE_MIN_MS, ONE_SEC_MS};
use crate::config::DispatchConfig;
use crate::ecs::{Driver, Ride};
use crate::protocol::{LocationUpdate, Outbox, ServerEvent, StepEta};
use crate::registry::{ride_mut, Registry};
use crate::simulation::{Leg, LegCursor, StepSample};
use crate::stats::RideStats;
use crate::store::RecordStoreResource;
use crate::systems::persist_ride;
use crate::systems::ride_completed::finish_ride;
use crate::systems::ride_started::begin_ride;
use crate::timers::RideTimers;

#[allow(clippy::too_many_arguments)]
pub fn location_step_system(
    mut commands: Commands,
    event: Res<CurrentEvent>,
    clock: Res<SimulationClock>,
    config: Res<DispatchConfig>,
    mut registry: ResMut<Registry>,
    mut rides: Query<&mut Ride>,
    mut drivers: Query<&mut Driver>,
    mut timers: ResMut<RideTimers>,
    mut stats: ResMut<RideStats>,
    mut store: ResMut<RecordStoreResource>,
    mut outbox: ResMut<Outbox>,
) {
    let event = event.0;
    if event.kind != TimerKind::LocationStep {
        return;
    }
    let mut ride = match ride_mut(&registry, &mut rides, event.ride_id) {
        Ok(ride) => ride,
        Err(err) => {
            warn!(ride_id = %event.ride_id, error = %err, "location step for a missing ride");
            timers.cancel_all(event.ride_id);
            return;
        }
    };
    let Some(cursor) = ride.leg.filter(|_| ride.status.is_active()) else {
        timers.cancel(ride.id, TimerKind::LocationStep);
        return;
    };

    let now = clock.now();
    let plan = config.simulation.plan_for(
        cursor.leg,
        ride.pickup_location,
        ride.destination,
        ride.priority,
    );

    match cursor.leg {
        Leg::Approach if cursor.step > plan.steps => {
            match begin_ride(&mut ride, now, config.average_speed_kmh, &mut outbox) {
                Ok(true) => persist_ride(&mut *store.0, &ride, now),
                Ok(false) => debug!(ride_id = %ride.id, "already started by the driver"),
                Err(err) => warn!(ride_id = %ride.id, error = %err, "arrival could not start the ride"),
            }
            ride.leg = Some(LegCursor::destination());
        }
        Leg::Approach => {
            let sample = plan.sample(cursor.step);
            move_driver(&mut ride, &registry, &mut drivers, &sample, now);
            publish_step(&ride, &sample, false, now, &mut outbox);
            ride.leg = Some(LegCursor {
                step: cursor.step + 1,
                ..cursor
            });
        }
        Leg::Destination => {
            let sample = plan.sample(cursor.step);
            move_driver(&mut ride, &registry, &mut drivers, &sample, now);
            ride.progress = sample.progress;
            ride.eta_minutes = Some(sample.time_remaining_ms.div_ceil(ONE_MIN_MS));
            publish_step(&ride, &sample, true, now, &mut outbox);

            if plan.is_final(cursor.step) {
                if let Err(err) = finish_ride(
                    &mut ride,
                    now,
                    &mut registry,
                    &mut drivers,
                    &mut timers,
                    &mut *store.0,
                    &mut stats,
                    &mut outbox,
                    &mut commands,
                ) {
                    warn!(ride_id = %ride.id, error = %err, "simulated arrival could not complete the ride");
                    timers.cancel(ride.id, TimerKind::LocationStep);
                }
            } else {
                ride.leg = Some(LegCursor {
                    step: cursor.step + 1,
                    ..cursor
                });
            }
        }
    }
}

fn move_driver(
    ride: &mut Ride,
    registry: &Registry,
    drivers: &mut Query<&mut Driver>,
    sample: &StepSample,
    now: u64,
) {
    ride.current_location = Some(sample.position);
    ride.last_location_update = Some(now);
    let Some(entity) = ride
        .driver_id
        .as_ref()
        .and_then(|id| registry.driver_entity(id).ok())
    else {
        return;
    };
    if let Ok(mut driver) = drivers.get_mut(entity) {
        driver.location = Some(sample.position);
        driver.last_update = now;
    }
}

fn publish_step(ride: &Ride, sample: &StepSample, with_progress: bool, now: u64, outbox: &mut Outbox) {
    let update = ServerEvent::LocationUpdate(LocationUpdate {
        ride_id: ride.id,
        driver_id: ride.driver_id.clone(),
        location: sample.position,
        priority: ride.priority,
        progress: with_progress.then_some(sample.progress),
        eta_minutes: None,
        estimated_arrival: Some(StepEta {
            steps: sample.remaining_steps,
            time_remaining: sample.time_remaining_ms as f64 / ONE_SEC_MS as f64,
        }),
        timestamp: now,
    });
    outbox.publish_all(ride.rider_connections(), &update);
}
