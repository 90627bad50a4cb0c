use bevy_ecs::prelude::{Query, Res, ResMut};
use tracing::{debug, warn};

use crate::clock::{CurrentEvent, SimulationClock, TimerKind, ONE_MIN_MS};
use crate::config::DispatchConfig;
use crate::ecs::{Driver, ElapsedTime, Ride};
use crate::protocol::{Outbox, ServerEvent};
use crate::registry::{ride_mut, Registry};
use crate::spatial::estimate_duration;
use crate::systems::driver_connection;
use crate::timers::RideTimers;

/// Elapsed and remaining time of an active ride, sent to rider and driver.
#[allow(clippy::too_many_arguments)]
pub fn duration_tick_system(
    event: Res<CurrentEvent>,
    clock: Res<SimulationClock>,
    config: Res<DispatchConfig>,
    registry: Res<Registry>,
    mut rides: Query<&mut Ride>,
    drivers: Query<&Driver>,
    mut timers: ResMut<RideTimers>,
    mut outbox: ResMut<Outbox>,
) {
    let event = event.0;
    if event.kind != TimerKind::DurationTick {
        return;
    }
    let mut ride = match ride_mut(&registry, &mut rides, event.ride_id) {
        Ok(ride) => ride,
        Err(err) => {
            warn!(ride_id = %event.ride_id, error = %err, "duration tick for a missing ride");
            timers.cancel_all(event.ride_id);
            return;
        }
    };
    if !ride.status.is_active() {
        timers.cancel(ride.id, TimerKind::DurationTick);
        return;
    }

    let now = clock.now();
    let elapsed_ms = now.saturating_sub(ride.clock_start());
    let estimated = estimate_duration(ride.pickup_location, ride.destination, config.average_speed_kmh);
    let remaining_ms = (estimated.minutes * ONE_MIN_MS).saturating_sub(elapsed_ms);
    let elapsed_time = ElapsedTime::from_millis(elapsed_ms);
    let remaining_time = ElapsedTime::from_millis(remaining_ms);
    ride.elapsed_time = Some(elapsed_time.clone());
    ride.remaining_time = Some(remaining_time.clone());

    let update = ServerEvent::DurationUpdate {
        ride_id: ride.id,
        elapsed_time,
        remaining_time,
        estimated_duration: estimated.minutes,
        timestamp: now,
    };
    let driver = driver_connection(&registry, &drivers, ride.driver_id.as_ref());
    outbox.publish_all(ride.rider_connection.iter().chain(driver.as_ref()), &update);
    debug!(ride_id = %ride.id, elapsed_ms, remaining_ms, "duration tick");
}
