use std::fmt;
use std::str::FromStr;

use bevy_ecs::prelude::Component;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::sharing::SharingPrediction;
use crate::simulation::LegCursor;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = DispatchError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| DispatchError::Validation(format!("malformed id '{s}'")))
            }
        }
    };
}

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

uuid_id!(RideId);
uuid_id!(SharingRequestId);
string_id!(DriverId);
string_id!(RiderId);
string_id!(ConnectionId);

// ---------------------------------------------------------------------------
// Value types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Linear interpolation towards `to`; `t` is clamped to `[0, 1]`.
    pub fn lerp(&self, to: GeoPoint, t: f64) -> GeoPoint {
        let t = t.clamp(0.0, 1.0);
        GeoPoint {
            lat: self.lat + (to.lat - self.lat) * t,
            lng: self.lng + (to.lng - self.lng) * t,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn is_high(self) -> bool {
        self == Priority::High
    }

    /// Sort key: high-priority entries first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Pending,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RideStatus::Pending => "pending",
            RideStatus::Accepted => "accepted",
            RideStatus::InProgress => "in_progress",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }

    /// Allowed edges of the ride state machine. `Pending -> Pending` is the
    /// rejection self-loop.
    pub fn can_transition_to(self, next: RideStatus) -> bool {
        matches!(
            (self, next),
            (RideStatus::Pending, RideStatus::Pending)
                | (RideStatus::Pending, RideStatus::Accepted)
                | (RideStatus::Pending, RideStatus::Cancelled)
                | (RideStatus::Accepted, RideStatus::InProgress)
                | (RideStatus::InProgress, RideStatus::Completed)
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, RideStatus::Accepted | RideStatus::InProgress)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    /// States in which the ride carries a driver id.
    pub fn has_driver(self) -> bool {
        matches!(
            self,
            RideStatus::Accepted | RideStatus::InProgress | RideStatus::Completed
        )
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RideStatus {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RideStatus::Pending),
            "accepted" => Ok(RideStatus::Accepted),
            "in_progress" => Ok(RideStatus::InProgress),
            "completed" => Ok(RideStatus::Completed),
            "cancelled" => Ok(RideStatus::Cancelled),
            other => Err(DispatchError::Validation(format!(
                "unknown ride status '{other}'"
            ))),
        }
    }
}

/// Elapsed or remaining time broken down for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElapsedTime {
    pub minutes: u64,
    pub seconds: u64,
    pub total_seconds: u64,
    pub formatted: String,
}

impl ElapsedTime {
    pub fn from_secs(total_seconds: u64) -> Self {
        let minutes = total_seconds / 60;
        let seconds = total_seconds % 60;
        Self {
            minutes,
            seconds,
            total_seconds,
            formatted: format!("{minutes}m {seconds}s"),
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::from_secs(ms / 1000)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SharingStatus {
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharingRequest {
    pub id: SharingRequestId,
    pub new_rider_id: RiderId,
    #[serde(skip)]
    pub new_rider_connection: Option<ConnectionId>,
    pub new_pickup_location: GeoPoint,
    pub new_destination: GeoPoint,
    pub prediction: SharingPrediction,
    pub status: SharingStatus,
    pub priority: Priority,
    pub estimated_pickup_secs: u64,
    pub requested_at: u64,
    pub responded_at: Option<u64>,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedRider {
    pub rider_id: RiderId,
    #[serde(skip)]
    pub connection: Option<ConnectionId>,
    pub sharing_request_id: SharingRequestId,
    pub pickup_location: GeoPoint,
    pub destination: GeoPoint,
    pub priority: Priority,
    pub prediction: SharingPrediction,
    pub joined_at: u64,
    pub estimated_pickup_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StopKind {
    Pickup,
    Destination,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStop {
    pub location: GeoPoint,
    #[serde(rename = "type")]
    pub kind: StopKind,
    pub rider_id: RiderId,
    pub priority: Priority,
    pub estimated_arrival: Option<u64>,
}

/// Caller input for a new ride.
#[derive(Debug, Clone)]
pub struct RideSpec {
    pub rider_id: RiderId,
    pub pickup_location: GeoPoint,
    pub destination: GeoPoint,
    pub priority: Priority,
    pub requested_features: Vec<String>,
}

impl RideSpec {
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.rider_id.as_str().trim().is_empty() {
            return Err(DispatchError::Validation("riderId is required".into()));
        }
        if !self.pickup_location.is_valid() {
            return Err(DispatchError::Validation(
                "pickupLocation must hold a valid lat/lng".into(),
            ));
        }
        if !self.destination.is_valid() {
            return Err(DispatchError::Validation(
                "destination must hold a valid lat/lng".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Component)]
#[serde(rename_all = "camelCase")]
pub struct Ride {
    pub id: RideId,
    pub rider_id: RiderId,
    #[serde(skip)]
    pub rider_connection: Option<ConnectionId>,
    pub pickup_location: GeoPoint,
    pub destination: GeoPoint,
    pub status: RideStatus,
    pub priority: Priority,
    pub requested_features: Vec<String>,
    pub created_at: u64,
    pub driver_id: Option<DriverId>,
    pub accepted_at: Option<u64>,
    pub start_time: Option<u64>,
    pub completed_at: Option<u64>,
    pub cancelled_at: Option<u64>,
    pub current_location: Option<GeoPoint>,
    pub progress: u8,
    pub eta_minutes: Option<u64>,
    pub last_location_update: Option<u64>,
    pub elapsed_time: Option<ElapsedTime>,
    pub remaining_time: Option<ElapsedTime>,
    pub route: Vec<RouteStop>,
    pub rejected_by: Vec<DriverId>,
    pub last_rejection_at: Option<u64>,
    pub sharing_requests: Vec<SharingRequest>,
    pub shared_riders: Vec<SharedRider>,
    #[serde(skip)]
    pub leg: Option<LegCursor>,
}

impl Ride {
    pub fn new(id: RideId, spec: RideSpec, connection: Option<ConnectionId>, now: u64) -> Self {
        Self {
            id,
            rider_id: spec.rider_id,
            rider_connection: connection,
            pickup_location: spec.pickup_location,
            destination: spec.destination,
            status: RideStatus::Pending,
            priority: spec.priority,
            requested_features: spec.requested_features,
            created_at: now,
            driver_id: None,
            accepted_at: None,
            start_time: None,
            completed_at: None,
            cancelled_at: None,
            current_location: None,
            progress: 0,
            eta_minutes: None,
            last_location_update: None,
            elapsed_time: None,
            remaining_time: None,
            route: Vec::new(),
            rejected_by: Vec::new(),
            last_rejection_at: None,
            sharing_requests: Vec::new(),
            shared_riders: Vec::new(),
            leg: None,
        }
    }

    /// Moves the ride along one state-machine edge. Returns the previous
    /// status; an illegal edge leaves the ride untouched.
    pub fn advance(&mut self, next: RideStatus) -> Result<RideStatus, DispatchError> {
        let from = self.status;
        if !from.can_transition_to(next) {
            return Err(DispatchError::InvalidTransition {
                ride_id: self.id,
                from,
                to: next,
            });
        }
        self.status = next;
        Ok(from)
    }

    /// Adds `driver` to the rejection set. The set only grows.
    pub fn record_rejection(&mut self, driver: &DriverId) -> bool {
        if self.rejected_by.contains(driver) {
            return false;
        }
        self.rejected_by.push(driver.clone());
        true
    }

    pub fn is_rejected_by(&self, driver: &DriverId) -> bool {
        self.rejected_by.contains(driver)
    }

    pub fn has_shared_riders(&self) -> bool {
        !self.shared_riders.is_empty()
    }

    pub fn sharing_request(&self, id: SharingRequestId) -> Option<&SharingRequest> {
        self.sharing_requests.iter().find(|r| r.id == id)
    }

    /// Timestamp duration measurements start from.
    pub fn clock_start(&self) -> u64 {
        self.start_time
            .or(self.accepted_at)
            .unwrap_or(self.created_at)
    }

    /// Every connection riding in this car: original rider first, then
    /// shared riders in join order.
    pub fn rider_connections(&self) -> impl Iterator<Item = &ConnectionId> {
        self.rider_connection
            .iter()
            .chain(self.shared_riders.iter().filter_map(|r| r.connection.as_ref()))
    }
}

/// A connected driver. `available` is false exactly while `current_ride` is
/// set; `off_duty` parks a driver without a ride outside dispatch.
#[derive(Debug, Clone, Serialize, Component)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    pub driver_id: DriverId,
    #[serde(skip)]
    pub connection: ConnectionId,
    pub available: bool,
    pub off_duty: bool,
    pub current_ride: Option<RideId>,
    pub busy_since: Option<u64>,
    pub location: Option<GeoPoint>,
    pub last_update: u64,
}

impl Driver {
    pub fn new(driver_id: DriverId, connection: ConnectionId, now: u64) -> Self {
        Self {
            driver_id,
            connection,
            available: true,
            off_duty: false,
            current_ride: None,
            busy_since: None,
            location: None,
            last_update: now,
        }
    }

    /// Receives new-ride broadcasts.
    pub fn is_dispatchable(&self) -> bool {
        self.available && !self.off_duty
    }

    pub fn assign(&mut self, ride: RideId, now: u64) {
        self.available = false;
        self.current_ride = Some(ride);
        self.busy_since = Some(now);
        self.last_update = now;
    }

    pub fn release(&mut self, now: u64) {
        self.available = true;
        self.current_ride = None;
        self.busy_since = None;
        self.last_update = now;
    }
}
