//! Id indexes over the ride and driver entities.
//!
//! The `World` is the primary map; the registry only maps external ids to
//! entities. An id that resolves to an entity the world no longer holds is an
//! index corruption and aborts the operation that hit it.

use std::collections::{HashMap, VecDeque};

use bevy_ecs::prelude::{Entity, Mut, Query, Resource};
use serde::Deserialize;
use tracing::error;

use crate::ecs::{Driver, DriverId, Priority, Ride, RideId, RideStatus, RiderId};
use crate::error::DispatchError;

pub const DEFAULT_RETENTION_CAPACITY: usize = 100;

#[derive(Debug, Resource)]
pub struct Registry {
    rides: HashMap<RideId, Entity>,
    drivers: HashMap<DriverId, Entity>,
    /// Completed rides still live in the world, oldest first.
    completed: VecDeque<RideId>,
    /// Cancelled rides still live in the world, oldest first.
    cancelled: VecDeque<RideId>,
    retention_capacity: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION_CAPACITY)
    }
}

impl Registry {
    pub fn with_retention(capacity: usize) -> Self {
        Self {
            rides: HashMap::new(),
            drivers: HashMap::new(),
            completed: VecDeque::new(),
            cancelled: VecDeque::new(),
            retention_capacity: capacity,
        }
    }

    pub fn index_ride(&mut self, id: RideId, entity: Entity) {
        self.rides.insert(id, entity);
    }

    pub fn ride_entity(&self, id: RideId) -> Result<Entity, DispatchError> {
        self.rides
            .get(&id)
            .copied()
            .ok_or(DispatchError::RideNotFound(id))
    }

    pub fn contains_ride(&self, id: RideId) -> bool {
        self.rides.contains_key(&id)
    }

    pub fn ride_count(&self) -> usize {
        self.rides.len()
    }

    pub fn index_driver(&mut self, id: DriverId, entity: Entity) {
        self.drivers.insert(id, entity);
    }

    pub fn driver_entity(&self, id: &DriverId) -> Result<Entity, DispatchError> {
        self.drivers
            .get(id)
            .copied()
            .ok_or_else(|| DispatchError::DriverNotFound(id.clone()))
    }

    pub fn remove_driver(&mut self, id: &DriverId) -> Option<Entity> {
        self.drivers.remove(id)
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }

    /// Appends a completed ride to the retention window. When the window
    /// overflows, the oldest ride is unindexed and returned so the caller can
    /// despawn it.
    pub fn retain_completed(&mut self, id: RideId) -> Vec<(RideId, Entity)> {
        self.completed.push_back(id);
        evict_overflow(&mut self.completed, &mut self.rides, self.retention_capacity)
    }

    /// Same as [`Registry::retain_completed`] for cancelled rides, which get a
    /// window of their own so they never push completed rides out.
    pub fn retain_cancelled(&mut self, id: RideId) -> Vec<(RideId, Entity)> {
        self.cancelled.push_back(id);
        evict_overflow(&mut self.cancelled, &mut self.rides, self.retention_capacity)
    }

    /// Completed ride ids in the retention window, newest first.
    pub fn completed_ids(&self) -> impl Iterator<Item = RideId> + '_ {
        self.completed.iter().rev().copied()
    }

    pub fn retained_count(&self) -> usize {
        self.completed.len()
    }

    pub fn retention_capacity(&self) -> usize {
        self.retention_capacity
    }
}

fn evict_overflow(
    window: &mut VecDeque<RideId>,
    rides: &mut HashMap<RideId, Entity>,
    capacity: usize,
) -> Vec<(RideId, Entity)> {
    let mut evicted = Vec::new();
    while window.len() > capacity {
        let Some(oldest) = window.pop_front() else {
            break;
        };
        if let Some(entity) = rides.remove(&oldest) {
            evicted.push((oldest, entity));
        }
    }
    evicted
}

fn corrupted(what: &str, id: impl std::fmt::Display, entity: Entity) -> DispatchError {
    let message = format!("{what} {id} indexed at {entity:?} but missing from the world");
    error!(target: "registry", "{message}");
    DispatchError::RegistryCorrupted(message)
}

/// Resolves a ride id to its component.
pub fn ride_mut<'a>(
    registry: &Registry,
    rides: &'a mut Query<&mut Ride>,
    id: RideId,
) -> Result<Mut<'a, Ride>, DispatchError> {
    let entity = registry.ride_entity(id)?;
    rides.get_mut(entity).map_err(|_| corrupted("ride", id, entity))
}

pub fn ride_ref<'a>(
    registry: &Registry,
    rides: &'a Query<&mut Ride>,
    id: RideId,
) -> Result<&'a Ride, DispatchError> {
    let entity = registry.ride_entity(id)?;
    rides.get(entity).map_err(|_| corrupted("ride", id, entity))
}

pub fn driver_mut<'a>(
    registry: &Registry,
    drivers: &'a mut Query<&mut Driver>,
    id: &DriverId,
) -> Result<Mut<'a, Driver>, DispatchError> {
    let entity = registry.driver_entity(id)?;
    drivers
        .get_mut(entity)
        .map_err(|_| corrupted("driver", id, entity))
}

/// Filter for ride listings. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideFilter {
    pub status: Option<RideStatus>,
    pub driver_id: Option<DriverId>,
    pub rider_id: Option<RiderId>,
    pub priority: Option<Priority>,
}

impl RideFilter {
    pub fn matches(&self, ride: &Ride) -> bool {
        self.status.map_or(true, |s| ride.status == s)
            && self
                .driver_id
                .as_ref()
                .map_or(true, |d| ride.driver_id.as_ref() == Some(d))
            && self.rider_id.as_ref().map_or(true, |r| &ride.rider_id == r)
            && self.priority.map_or(true, |p| ride.priority == p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy_ecs::prelude::World;
    use bevy_ecs::system::SystemState;

    #[test]
    fn retention_window_evicts_oldest_first() {
        let mut world = World::new();
        let mut registry = Registry::with_retention(2);
        let ids: Vec<RideId> = (0..3).map(|_| RideId::new()).collect();
        for id in &ids {
            let entity = world.spawn_empty().id();
            registry.index_ride(*id, entity);
        }

        assert!(registry.retain_completed(ids[0]).is_empty());
        assert!(registry.retain_completed(ids[1]).is_empty());
        let evicted = registry.retain_completed(ids[2]);

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].0, ids[0]);
        assert!(!registry.contains_ride(ids[0]));
        assert_eq!(registry.retained_count(), 2);
        assert_eq!(registry.completed_ids().collect::<Vec<_>>(), vec![ids[2], ids[1]]);
    }

    #[test]
    fn cancelled_rides_do_not_crowd_out_completed_ones() {
        let mut world = World::new();
        let mut registry = Registry::with_retention(1);
        let ids: Vec<RideId> = (0..3).map(|_| RideId::new()).collect();
        for id in &ids {
            let entity = world.spawn_empty().id();
            registry.index_ride(*id, entity);
        }

        assert!(registry.retain_completed(ids[0]).is_empty());
        assert!(registry.retain_cancelled(ids[1]).is_empty());
        let evicted = registry.retain_cancelled(ids[2]);

        assert_eq!(evicted.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![ids[1]]);
        assert!(registry.contains_ride(ids[0]));
        assert!(registry.contains_ride(ids[2]));
        assert_eq!(registry.retained_count(), 1);
    }

    #[test]
    fn dangling_index_is_reported_as_corruption() {
        let mut world = World::new();
        let mut registry = Registry::default();
        let id = RideId::new();
        let entity = world.spawn_empty().id();
        registry.index_ride(id, entity);
        world.despawn(entity);

        let mut state: SystemState<Query<&mut Ride>> = SystemState::new(&mut world);
        let mut rides = state.get_mut(&mut world);
        let err = ride_mut(&registry, &mut rides, id).unwrap_err();
        assert!(matches!(err, DispatchError::RegistryCorrupted(_)));
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let registry = Registry::default();
        let id = RideId::new();
        assert_eq!(registry.ride_entity(id), Err(DispatchError::RideNotFound(id)));
        assert!(registry.driver_entity(&DriverId::from("ghost")).is_err());
    }
}
