use bevy_ecs::prelude::{Query, Res, ResMut};
use tracing::{debug, warn};

use crate::clock::{CurrentEvent, SimulationClock, TimerKind};
use crate::ecs::{Driver, GeoPoint, Ride};
use crate::protocol::{DriverView, Outbox, RiderLeg, ServerEvent, SharedRiderView, SyncSnapshot};
use crate::registry::{ride_ref, Registry};
use crate::timers::RideTimers;

/// Shared-ride snapshot: the original rider gets the plain view, each shared
/// rider gets their own legs added, the driver gets every rider's legs.
pub fn sync_snapshot(ride: &Ride, driver_location: Option<GeoPoint>, now: u64) -> SyncSnapshot {
    SyncSnapshot {
        ride_id: ride.id,
        driver_location: driver_location.or(ride.current_location),
        status: ride.status,
        progress: ride.progress,
        elapsed_time: ride.elapsed_time.clone(),
        remaining_time: ride.remaining_time.clone(),
        route: ride.route.clone(),
        shared_riders_count: ride.shared_riders.len(),
        timestamp: now,
        rider_view: None,
        driver_view: None,
    }
}

#[allow(clippy::too_many_arguments)]
pub fn sync_tick_system(
    event: Res<CurrentEvent>,
    clock: Res<SimulationClock>,
    registry: Res<Registry>,
    rides: Query<&mut Ride>,
    drivers: Query<&Driver>,
    mut timers: ResMut<RideTimers>,
    mut outbox: ResMut<Outbox>,
) {
    let event = event.0;
    if event.kind != TimerKind::SyncTick {
        return;
    }
    let ride = match ride_ref(&registry, &rides, event.ride_id) {
        Ok(ride) => ride,
        Err(err) => {
            warn!(ride_id = %event.ride_id, error = %err, "sync tick for a missing ride");
            timers.cancel_all(event.ride_id);
            return;
        }
    };
    if !ride.has_shared_riders() || ride.status.is_terminal() {
        timers.cancel(ride.id, TimerKind::SyncTick);
        return;
    }

    let now = clock.now();
    let driver = ride
        .driver_id
        .as_ref()
        .and_then(|id| registry.driver_entity(id).ok())
        .and_then(|entity| drivers.get(entity).ok());
    let base = sync_snapshot(ride, driver.and_then(|d| d.location), now);

    outbox.publish_opt(
        ride.rider_connection.as_ref(),
        ServerEvent::Sync(Box::new(base.clone())),
    );
    for shared in &ride.shared_riders {
        let Some(connection) = shared.connection.as_ref() else {
            continue;
        };
        let snapshot = SyncSnapshot {
            rider_view: Some(SharedRiderView {
                your_pickup_location: shared.pickup_location,
                your_destination: shared.destination,
                your_priority: shared.priority,
            }),
            ..base.clone()
        };
        outbox.publish(connection, ServerEvent::Sync(Box::new(snapshot)));
    }
    if let Some(driver) = driver {
        let snapshot = SyncSnapshot {
            driver_view: Some(DriverView {
                is_driver: true,
                original_rider: RiderLeg {
                    rider_id: ride.rider_id.clone(),
                    pickup_location: ride.pickup_location,
                    destination: ride.destination,
                    priority: ride.priority,
                },
                shared_riders: ride
                    .shared_riders
                    .iter()
                    .map(|s| RiderLeg {
                        rider_id: s.rider_id.clone(),
                        pickup_location: s.pickup_location,
                        destination: s.destination,
                        priority: s.priority,
                    })
                    .collect(),
            }),
            ..base
        };
        outbox.publish(&driver.connection, ServerEvent::Sync(Box::new(snapshot)));
    }
    debug!(ride_id = %ride.id, shared = ride.shared_riders.len(), "sync tick");
}
