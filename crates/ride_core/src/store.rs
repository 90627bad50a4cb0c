//! External record store.
//!
//! The dispatch core writes ride snapshots, completed-ride records and
//! sharing predictions here; the read/write surface reads them back. The
//! in-memory implementation lives for the process lifetime only.

use std::collections::HashMap;

use bevy_ecs::prelude::Resource;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ecs::{DriverId, GeoPoint, Priority, Ride, RideId, RiderId};
use crate::error::StoreError;
use crate::registry::RideFilter;
use crate::traffic::SharingContext;

/// Persisted view of a ride plus any prediction attached to it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RideRecord {
    #[serde(flatten)]
    pub ride: Ride,
    pub ai_prediction: Option<serde_json::Value>,
    pub updated_at: u64,
}

/// Snapshot written exactly once when a ride completes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedRide {
    pub ride_id: RideId,
    pub driver_id: Option<DriverId>,
    pub rider_id: RiderId,
    pub start_time: u64,
    pub completed_at: u64,
    /// Whole minutes.
    pub duration: u64,
    pub priority: Priority,
    /// Kilometres between pickup and destination.
    pub distance: f64,
    pub pickup_location: GeoPoint,
    pub destination: GeoPoint,
    pub shared_ride: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedRideFilter {
    pub driver_id: Option<DriverId>,
    pub rider_id: Option<RiderId>,
    pub priority: Option<Priority>,
}

impl CompletedRideFilter {
    pub fn matches(&self, ride: &CompletedRide) -> bool {
        self.driver_id
            .as_ref()
            .map_or(true, |d| ride.driver_id.as_ref() == Some(d))
            && self.rider_id.as_ref().map_or(true, |r| &ride.rider_id == r)
            && self.priority.map_or(true, |p| ride.priority == p)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDriverProfile {
    pub name: String,
    pub vehicle_type: String,
    pub vehicle_number: String,
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverProfile {
    pub id: Uuid,
    pub name: String,
    pub vehicle_type: String,
    pub vehicle_number: String,
    pub rating: f64,
    pub total_trips: u64,
    pub is_available: bool,
    pub location: Option<GeoPoint>,
    pub created_at: u64,
}

/// One scorer call, kept for later model training.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRecord {
    pub id: Uuid,
    pub ride_id: Option<RideId>,
    pub original_distance_km: f64,
    pub distance_after_adding_rider_km: f64,
    pub new_rider_distance_km: f64,
    pub add_rider: bool,
    pub score: f64,
    pub ai_model_used: bool,
    pub context: SharingContext,
    pub created_at: u64,
}

pub trait RecordStore: Send + Sync {
    fn upsert_ride(&mut self, ride: &Ride, now: u64) -> Result<(), StoreError>;
    fn ride(&self, id: RideId) -> Option<RideRecord>;
    /// Matching rides, newest first.
    fn rides(&self, filter: &RideFilter) -> Vec<RideRecord>;
    fn attach_prediction(&mut self, id: RideId, prediction: serde_json::Value, now: u64) -> Result<RideRecord, StoreError>;

    fn store_completed_ride(&mut self, ride: CompletedRide) -> Result<(), StoreError>;
    /// Matching completed rides, newest first, at most `limit`.
    fn completed_rides(&self, filter: &CompletedRideFilter, limit: usize) -> Vec<CompletedRide>;

    fn create_driver_profile(&mut self, profile: NewDriverProfile, now: u64) -> Result<DriverProfile, StoreError>;
    fn driver_profiles(&self, available: Option<bool>) -> Vec<DriverProfile>;

    fn insert_prediction(&mut self, record: PredictionRecord) -> Result<(), StoreError>;
    /// Newest first, at most `limit`.
    fn predictions(&self, limit: usize) -> Vec<PredictionRecord>;
}

/// ECS resource wrapping the boxed record store.
#[derive(Resource)]
pub struct RecordStoreResource(pub Box<dyn RecordStore>);

#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    rides: HashMap<RideId, RideRecord>,
    completed: Vec<CompletedRide>,
    drivers: Vec<DriverProfile>,
    predictions: Vec<PredictionRecord>,
}

impl RecordStore for InMemoryRecordStore {
    fn upsert_ride(&mut self, ride: &Ride, now: u64) -> Result<(), StoreError> {
        let ai_prediction = self.rides.remove(&ride.id).and_then(|r| r.ai_prediction);
        self.rides.insert(
            ride.id,
            RideRecord {
                ride: ride.clone(),
                ai_prediction,
                updated_at: now,
            },
        );
        Ok(())
    }

    fn ride(&self, id: RideId) -> Option<RideRecord> {
        self.rides.get(&id).cloned()
    }

    fn rides(&self, filter: &RideFilter) -> Vec<RideRecord> {
        let mut out: Vec<RideRecord> = self
            .rides
            .values()
            .filter(|r| filter.matches(&r.ride))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.ride.created_at.cmp(&a.ride.created_at));
        out
    }

    fn attach_prediction(&mut self, id: RideId, prediction: serde_json::Value, now: u64) -> Result<RideRecord, StoreError> {
        let record = self
            .rides
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.ai_prediction = Some(prediction);
        record.updated_at = now;
        Ok(record.clone())
    }

    fn store_completed_ride(&mut self, ride: CompletedRide) -> Result<(), StoreError> {
        if self.completed.iter().any(|c| c.ride_id == ride.ride_id) {
            return Err(StoreError::Rejected(format!(
                "ride {} already has a completion record",
                ride.ride_id
            )));
        }
        self.completed.push(ride);
        Ok(())
    }

    fn completed_rides(&self, filter: &CompletedRideFilter, limit: usize) -> Vec<CompletedRide> {
        let mut out: Vec<CompletedRide> = self
            .completed
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        out.truncate(limit);
        out
    }

    fn create_driver_profile(&mut self, profile: NewDriverProfile, now: u64) -> Result<DriverProfile, StoreError> {
        if profile.name.trim().is_empty() {
            return Err(StoreError::Rejected("name is required".into()));
        }
        let created = DriverProfile {
            id: Uuid::new_v4(),
            name: profile.name,
            vehicle_type: profile.vehicle_type,
            vehicle_number: profile.vehicle_number,
            rating: 5.0,
            total_trips: 0,
            is_available: true,
            location: profile.location,
            created_at: now,
        };
        self.drivers.push(created.clone());
        Ok(created)
    }

    fn driver_profiles(&self, available: Option<bool>) -> Vec<DriverProfile> {
        self.drivers
            .iter()
            .filter(|d| available.map_or(true, |a| d.is_available == a))
            .cloned()
            .collect()
    }

    fn insert_prediction(&mut self, record: PredictionRecord) -> Result<(), StoreError> {
        self.predictions.push(record);
        Ok(())
    }

    fn predictions(&self, limit: usize) -> Vec<PredictionRecord> {
        self.predictions.iter().rev().take(limit).cloned().collect()
    }
}
