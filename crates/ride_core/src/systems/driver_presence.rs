use bevy_ecs::prelude::{Commands, Entity, Query, Res, ResMut};
use tracing::info;

use crate::clock::SimulationClock;
use crate::commands::{Command, CommandOutcome, CommandResult, CurrentCommand, Receipt};
use crate::ecs::{ConnectionId, Driver, DriverId, GeoPoint, Ride, RideStatus};
use crate::error::DispatchError;
use crate::registry::{driver_mut, Registry};
use crate::stats::RideStats;
use crate::store::RecordStoreResource;
use crate::systems::persist_ride;
use crate::systems::ride_cancelled::{cancel_ride, evict_cancelled};
use crate::timers::RideTimers;

pub fn driver_available_system(
    mut commands: Commands,
    command: Res<CurrentCommand>,
    clock: Res<SimulationClock>,
    mut registry: ResMut<Registry>,
    mut drivers: Query<&mut Driver>,
    mut outcome: ResMut<CommandOutcome>,
) {
    let Command::DriverAvailable {
        driver_id,
        location,
    } = &command.command
    else {
        return;
    };
    let result = command.require_origin().and_then(|origin| {
        register_driver(
            &mut commands,
            &mut registry,
            &mut drivers,
            driver_id,
            *location,
            origin,
            clock.now(),
        )
    });
    outcome.set(result);
}

fn register_driver(
    commands: &mut Commands,
    registry: &mut Registry,
    drivers: &mut Query<&mut Driver>,
    driver_id: &DriverId,
    location: Option<GeoPoint>,
    origin: &ConnectionId,
    now: u64,
) -> CommandResult {
    if driver_id.as_str().trim().is_empty() {
        return Err(DispatchError::Validation("driverId is required".into()));
    }
    if location.is_some_and(|l| !l.is_valid()) {
        return Err(DispatchError::Validation(
            "location must hold a valid lat/lng".into(),
        ));
    }

    if registry.driver_entity(driver_id).is_ok() {
        let mut driver = driver_mut(registry, drivers, driver_id)?;
        driver.connection = origin.clone();
        driver.off_duty = false;
        if driver.current_ride.is_none() {
            driver.available = true;
        }
        if location.is_some() {
            driver.location = location;
        }
        driver.last_update = now;
        info!(driver_id = %driver_id, "driver available");
        return Ok(Receipt::DriverUpdated {
            driver_id: driver_id.clone(),
        });
    }

    let mut driver = Driver::new(driver_id.clone(), origin.clone(), now);
    driver.location = location;
    let entity = commands.spawn(driver).id();
    registry.index_driver(driver_id.clone(), entity);
    info!(driver_id = %driver_id, "driver registered");
    Ok(Receipt::DriverRegistered {
        driver_id: driver_id.clone(),
    })
}

/// Takes the driver out of dispatch. A ride in progress is unaffected.
pub fn driver_unavailable_system(
    command: Res<CurrentCommand>,
    clock: Res<SimulationClock>,
    registry: Res<Registry>,
    mut drivers: Query<&mut Driver>,
    mut outcome: ResMut<CommandOutcome>,
) {
    let Command::DriverUnavailable { driver_id } = &command.command else {
        return;
    };
    let result = driver_mut(&registry, &mut drivers, driver_id).map(|mut driver| {
        driver.off_duty = true;
        driver.last_update = clock.now();
        info!(driver_id = %driver_id, "driver unavailable");
        Receipt::DriverUpdated {
            driver_id: driver_id.clone(),
        }
    });
    outcome.set(result);
}

/// Forgets every driver bound to the closed connection and cancels that
/// connection's pending ride requests. Accepted and in-progress rides run on.
#[allow(clippy::too_many_arguments)]
pub fn disconnect_system(
    mut commands: Commands,
    command: Res<CurrentCommand>,
    clock: Res<SimulationClock>,
    mut registry: ResMut<Registry>,
    drivers: Query<(Entity, &Driver)>,
    mut rides: Query<&mut Ride>,
    mut timers: ResMut<RideTimers>,
    mut stats: ResMut<RideStats>,
    mut store: ResMut<RecordStoreResource>,
    mut outcome: ResMut<CommandOutcome>,
) {
    if !matches!(command.command, Command::Disconnect) {
        return;
    }
    let origin = match command.require_origin() {
        Ok(origin) => origin,
        Err(err) => {
            outcome.set(Err(err));
            return;
        }
    };
    let now = clock.now();

    let leaving: Vec<(Entity, DriverId)> = drivers
        .iter()
        .filter(|(_, d)| &d.connection == origin)
        .map(|(entity, d)| (entity, d.driver_id.clone()))
        .collect();
    for (entity, driver_id) in &leaving {
        registry.remove_driver(driver_id);
        commands.entity(*entity).despawn();
        info!(driver_id = %driver_id, "driver disconnected");
    }

    let mut cancelled = Vec::new();
    for mut ride in rides.iter_mut() {
        if ride.rider_connection.as_ref() != Some(origin) || ride.status != RideStatus::Pending {
            continue;
        }
        if cancel_ride(&mut ride, now, &mut timers, &mut stats).is_ok() {
            persist_ride(&mut *store.0, &ride, now);
            cancelled.push(ride.id);
            info!(ride_id = %ride.id, "pending ride cancelled on rider disconnect");
        }
    }
    let rides_cancelled = cancelled.len();
    for ride_id in cancelled {
        evict_cancelled(&mut registry, &mut commands, ride_id);
    }

    outcome.set(Ok(Receipt::Disconnected {
        drivers_removed: leaving.len(),
        rides_cancelled,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy_ecs::prelude::{Schedule, World};

    fn world_with(command: Command, origin: Option<&str>) -> World {
        let mut world = World::new();
        world.insert_resource(SimulationClock::starting_at(1_000));
        world.insert_resource(Registry::default());
        world.insert_resource(CommandOutcome::default());
        world.insert_resource(CurrentCommand {
            origin: origin.map(ConnectionId::from),
            command,
        });
        world
    }

    fn run(world: &mut World) -> CommandResult {
        let mut schedule = Schedule::default();
        schedule.add_systems(driver_available_system);
        schedule.run(world);
        world
            .resource_mut::<CommandOutcome>()
            .take()
            .expect("outcome")
    }

    #[test]
    fn first_signal_registers_then_updates() {
        let command = Command::DriverAvailable {
            driver_id: DriverId::from("d1"),
            location: Some(GeoPoint::new(1.0, 2.0)),
        };
        let mut world = world_with(command, Some("c1"));
        assert!(matches!(run(&mut world), Ok(Receipt::DriverRegistered { .. })));
        assert_eq!(world.resource::<Registry>().driver_count(), 1);

        world.insert_resource(CurrentCommand {
            origin: Some(ConnectionId::from("c2")),
            command: Command::DriverAvailable {
                driver_id: DriverId::from("d1"),
                location: None,
            },
        });
        assert!(matches!(run(&mut world), Ok(Receipt::DriverUpdated { .. })));

        let driver = world.query::<&Driver>().single(&world);
        assert_eq!(driver.connection, ConnectionId::from("c2"));
        assert_eq!(driver.location, Some(GeoPoint::new(1.0, 2.0)));
        assert!(driver.is_dispatchable());
    }

    #[test]
    fn registration_needs_a_connection() {
        let command = Command::DriverAvailable {
            driver_id: DriverId::from("d1"),
            location: None,
        };
        let mut world = world_with(command, None);
        assert!(matches!(run(&mut world), Err(DispatchError::Validation(_))));
        assert_eq!(world.resource::<Registry>().driver_count(), 0);
    }

    #[test]
    fn blank_driver_id_is_rejected() {
        let command = Command::DriverAvailable {
            driver_id: DriverId::from(""),
            location: None,
        };
        let mut world = world_with(command, Some("c1"));
        assert!(run(&mut world).is_err());
    }
}
