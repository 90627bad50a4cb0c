//! Wire events of the real-time channel and the outbox systems publish into.
//!
//! Every frame is `{"event": "<name>", "data": {...}}`. Systems never talk to
//! the transport: they push [`Outbound`] messages and [`Effect`]s into the
//! [`Outbox`], and the host drains it after each step.

use bevy_ecs::prelude::Resource;
use serde::{Deserialize, Serialize};

use crate::commands::Command;
use crate::ecs::{
    ConnectionId, DriverId, ElapsedTime, GeoPoint, Priority, Ride, RideId, RideSpec, RideStatus,
    RiderId, RouteStop, SharingRequestId,
};
use crate::sharing::{SharingCandidate, SharingPrediction, SharingProposal};
use crate::spatial::EstimatedDuration;

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    #[serde(rename = "driver:available")]
    DriverAvailable {
        driver_id: DriverId,
        #[serde(default)]
        location: Option<GeoPoint>,
    },
    #[serde(rename = "driver:unavailable")]
    DriverUnavailable { driver_id: DriverId },
    #[serde(rename = "ride:request")]
    RequestRide {
        rider_id: RiderId,
        pickup_location: GeoPoint,
        destination: GeoPoint,
        #[serde(default)]
        priority: Option<Priority>,
        #[serde(default)]
        requested_features: Vec<String>,
    },
    #[serde(rename = "ride:accept")]
    AcceptRide { ride_id: RideId, driver_id: DriverId },
    #[serde(rename = "ride:reject")]
    RejectRide { ride_id: RideId, driver_id: DriverId },
    #[serde(rename = "ride:start")]
    StartRide { ride_id: RideId },
    #[serde(rename = "ride:complete")]
    CompleteRide {
        ride_id: RideId,
        #[serde(default)]
        driver_id: Option<DriverId>,
    },
    #[serde(rename = "ride:cancel")]
    CancelRide { ride_id: RideId },
    #[serde(rename = "driver:location")]
    DriverLocation {
        ride_id: RideId,
        driver_id: DriverId,
        location: GeoPoint,
    },
    #[serde(rename = "ride:sharing_request")]
    RequestSharing {
        ride_id: RideId,
        new_rider_id: RiderId,
        new_pickup_location: GeoPoint,
        new_destination: GeoPoint,
        #[serde(default)]
        priority: Option<Priority>,
    },
    #[serde(rename = "ride:sharing_response")]
    RespondSharing {
        ride_id: RideId,
        sharing_request_id: SharingRequestId,
        driver_id: DriverId,
        accepted: bool,
        #[serde(default)]
        reason: Option<String>,
    },
}

impl ClientMessage {
    pub fn into_command(self) -> Command {
        match self {
            ClientMessage::DriverAvailable {
                driver_id,
                location,
            } => Command::DriverAvailable {
                driver_id,
                location,
            },
            ClientMessage::DriverUnavailable { driver_id } => {
                Command::DriverUnavailable { driver_id }
            }
            ClientMessage::RequestRide {
                rider_id,
                pickup_location,
                destination,
                priority,
                requested_features,
            } => Command::RequestRide(RideSpec {
                rider_id,
                pickup_location,
                destination,
                priority: priority.unwrap_or_default(),
                requested_features,
            }),
            ClientMessage::AcceptRide { ride_id, driver_id } => {
                Command::AcceptRide { ride_id, driver_id }
            }
            ClientMessage::RejectRide { ride_id, driver_id } => {
                Command::RejectRide { ride_id, driver_id }
            }
            ClientMessage::StartRide { ride_id } => Command::StartRide { ride_id },
            ClientMessage::CompleteRide { ride_id, driver_id } => {
                Command::CompleteRide { ride_id, driver_id }
            }
            ClientMessage::CancelRide { ride_id } => Command::CancelRide { ride_id },
            ClientMessage::DriverLocation {
                ride_id,
                driver_id,
                location,
            } => Command::ReportLocation {
                ride_id,
                driver_id,
                location,
            },
            ClientMessage::RequestSharing {
                ride_id,
                new_rider_id,
                new_pickup_location,
                new_destination,
                priority,
            } => Command::RequestSharing {
                ride_id,
                candidate: SharingCandidate {
                    new_rider_id,
                    new_pickup_location,
                    new_destination,
                    priority,
                },
            },
            ClientMessage::RespondSharing {
                ride_id,
                sharing_request_id,
                driver_id,
                accepted,
                reason,
            } => Command::RespondSharing {
                ride_id,
                sharing_request_id,
                driver_id,
                accepted,
                reason,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound payload pieces
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActualDuration {
    pub minutes: u64,
    pub formatted: String,
}

/// `remaining steps` and `time remaining` (seconds) of the current leg.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEta {
    pub steps: u32,
    pub time_remaining: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub ride_id: RideId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<DriverId>,
    pub location: GeoPoint,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_minutes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_arrival: Option<StepEta>,
    pub timestamp: u64,
}

/// Shown to riders still waiting: an active ride they might share.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRideNotice {
    pub active_ride_id: RideId,
    pub driver_id: Option<DriverId>,
    pub pickup_location: GeoPoint,
    pub destination: GeoPoint,
    pub priority: Priority,
    pub estimated_duration: EstimatedDuration,
    pub timestamp: u64,
}

/// Shown to other available drivers: a sharing request was raised on a ride.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalNotice {
    pub ride_id: RideId,
    pub sharing_request_id: SharingRequestId,
    pub prediction: SharingPrediction,
    pub priority: Priority,
    pub estimated_pickup_time: u64,
    pub current_ride_status: RideStatus,
    pub current_ride_progress: u8,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SharingOpportunity {
    ActiveRide(ActiveRideNotice),
    Proposal(Box<ProposalNotice>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharingAck {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sharing_request_id: Option<SharingRequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<SharingPrediction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_pickup_time: Option<u64>,
    pub timestamp: u64,
}

impl SharingAck {
    pub fn failure(message: impl Into<String>, timestamp: u64) -> Self {
        Self {
            success: false,
            message: message.into(),
            sharing_request_id: None,
            prediction: None,
            priority: None,
            estimated_pickup_time: None,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlternativeRide {
    pub ride_id: RideId,
    pub driver_id: Option<DriverId>,
    pub current_location: Option<GeoPoint>,
    pub destination: GeoPoint,
    pub progress: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alternatives {
    pub message: String,
    pub available_rides: Vec<AlternativeRide>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiderLeg {
    pub rider_id: RiderId,
    pub pickup_location: GeoPoint,
    pub destination: GeoPoint,
    pub priority: Priority,
}

/// Extra sync fields for a shared rider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedRiderView {
    pub your_pickup_location: GeoPoint,
    pub your_destination: GeoPoint,
    pub your_priority: Priority,
}

/// Extra sync fields for the driver.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverView {
    pub is_driver: bool,
    pub original_rider: RiderLeg,
    pub shared_riders: Vec<RiderLeg>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    pub ride_id: RideId,
    pub driver_location: Option<GeoPoint>,
    pub status: RideStatus,
    pub progress: u8,
    pub elapsed_time: Option<ElapsedTime>,
    pub remaining_time: Option<ElapsedTime>,
    pub route: Vec<RouteStop>,
    pub shared_riders_count: usize,
    pub timestamp: u64,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub rider_view: Option<SharedRiderView>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub driver_view: Option<DriverView>,
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "ride:created")]
    RideCreated {
        ride_id: RideId,
        status: RideStatus,
        priority: Priority,
        estimated_duration: EstimatedDuration,
        timestamp: u64,
    },
    #[serde(rename = "ride:new_request")]
    NewRequest(Box<Ride>),
    #[serde(rename = "ride:accepted")]
    RideAccepted {
        ride_id: RideId,
        driver_id: DriverId,
        priority: Priority,
        estimated_duration: EstimatedDuration,
        message: String,
        timestamp: u64,
    },
    #[serde(rename = "ride:sharing_opportunity")]
    SharingOpportunity(SharingOpportunity),
    #[serde(rename = "ride:rejected")]
    RideRejected {
        ride_id: RideId,
        driver_id: DriverId,
        message: String,
        timestamp: u64,
    },
    #[serde(rename = "ride:started")]
    RideStarted {
        ride_id: RideId,
        priority: Priority,
        start_time: u64,
        estimated_duration: EstimatedDuration,
    },
    #[serde(rename = "ride:completed")]
    RideCompleted {
        ride_id: RideId,
        completed_at: u64,
        actual_duration: ActualDuration,
        priority: Priority,
        shared_ride: bool,
    },
    #[serde(rename = "ride:cancelled")]
    RideCancelled { ride_id: RideId, timestamp: u64 },
    #[serde(rename = "driver:location_update")]
    LocationUpdate(LocationUpdate),
    #[serde(rename = "driver:location_ack")]
    LocationAck {
        ride_id: RideId,
        received: bool,
        progress: u8,
        eta_minutes: Option<u64>,
        timestamp: u64,
    },
    #[serde(rename = "ride:duration_update")]
    DurationUpdate {
        ride_id: RideId,
        elapsed_time: ElapsedTime,
        remaining_time: ElapsedTime,
        estimated_duration: u64,
        timestamp: u64,
    },
    #[serde(rename = "ride:sharing_request")]
    SharingProposal {
        ride_id: RideId,
        sharing_request_id: SharingRequestId,
        new_rider_id: RiderId,
        new_pickup_location: GeoPoint,
        new_destination: GeoPoint,
        prediction: Box<SharingPrediction>,
        priority: Priority,
        estimated_pickup_time: u64,
        timestamp: u64,
    },
    #[serde(rename = "ride:sharing_requested")]
    SharingRequested(Box<SharingAck>),
    #[serde(rename = "ride:sharing_accepted")]
    SharingAccepted {
        ride_id: RideId,
        sharing_request_id: SharingRequestId,
        driver_id: DriverId,
        prediction: Box<SharingPrediction>,
        priority: Priority,
        estimated_pickup_time: u64,
        driver_location: Option<GeoPoint>,
        current_ride_progress: u8,
        timestamp: u64,
    },
    #[serde(rename = "ride:sharing_rejected")]
    SharingRejected {
        ride_id: RideId,
        sharing_request_id: SharingRequestId,
        driver_id: DriverId,
        reason: Option<String>,
        alternatives: Alternatives,
        timestamp: u64,
    },
    #[serde(rename = "ride:sharing_added")]
    SharingAdded {
        ride_id: RideId,
        sharing_request_id: SharingRequestId,
        new_rider_id: RiderId,
        new_pickup_location: GeoPoint,
        new_destination: GeoPoint,
        prediction: Box<SharingPrediction>,
        priority: Priority,
        timestamp: u64,
    },
    #[serde(rename = "ride:sharing_opportunity_taken")]
    SharingOpportunityTaken {
        ride_id: RideId,
        sharing_request_id: SharingRequestId,
        timestamp: u64,
    },
    #[serde(rename = "ride:sync")]
    Sync(Box<SyncSnapshot>),
    #[serde(rename = "ride:error")]
    Error {
        command: &'static str,
        message: String,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::RideCreated { .. } => "ride:created",
            ServerEvent::NewRequest(_) => "ride:new_request",
            ServerEvent::RideAccepted { .. } => "ride:accepted",
            ServerEvent::SharingOpportunity(_) => "ride:sharing_opportunity",
            ServerEvent::RideRejected { .. } => "ride:rejected",
            ServerEvent::RideStarted { .. } => "ride:started",
            ServerEvent::RideCompleted { .. } => "ride:completed",
            ServerEvent::RideCancelled { .. } => "ride:cancelled",
            ServerEvent::LocationUpdate(_) => "driver:location_update",
            ServerEvent::LocationAck { .. } => "driver:location_ack",
            ServerEvent::DurationUpdate { .. } => "ride:duration_update",
            ServerEvent::SharingProposal { .. } => "ride:sharing_request",
            ServerEvent::SharingRequested(_) => "ride:sharing_requested",
            ServerEvent::SharingAccepted { .. } => "ride:sharing_accepted",
            ServerEvent::SharingRejected { .. } => "ride:sharing_rejected",
            ServerEvent::SharingAdded { .. } => "ride:sharing_added",
            ServerEvent::SharingOpportunityTaken { .. } => "ride:sharing_opportunity_taken",
            ServerEvent::Sync(_) => "ride:sync",
            ServerEvent::Error { .. } => "ride:error",
        }
    }

    /// Ride the event is about, when it concerns a single ride.
    pub fn ride_id(&self) -> Option<RideId> {
        match self {
            ServerEvent::RideCreated { ride_id, .. }
            | ServerEvent::RideAccepted { ride_id, .. }
            | ServerEvent::RideRejected { ride_id, .. }
            | ServerEvent::RideStarted { ride_id, .. }
            | ServerEvent::RideCompleted { ride_id, .. }
            | ServerEvent::RideCancelled { ride_id, .. }
            | ServerEvent::LocationAck { ride_id, .. }
            | ServerEvent::DurationUpdate { ride_id, .. }
            | ServerEvent::SharingProposal { ride_id, .. }
            | ServerEvent::SharingAccepted { ride_id, .. }
            | ServerEvent::SharingRejected { ride_id, .. }
            | ServerEvent::SharingAdded { ride_id, .. }
            | ServerEvent::SharingOpportunityTaken { ride_id, .. } => Some(*ride_id),
            ServerEvent::NewRequest(ride) => Some(ride.id),
            ServerEvent::LocationUpdate(update) => Some(update.ride_id),
            ServerEvent::Sync(snapshot) => Some(snapshot.ride_id),
            ServerEvent::SharingOpportunity(SharingOpportunity::ActiveRide(n)) => {
                Some(n.active_ride_id)
            }
            ServerEvent::SharingOpportunity(SharingOpportunity::Proposal(n)) => Some(n.ride_id),
            ServerEvent::SharingRequested(_) | ServerEvent::Error { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Outbound {
    pub recipient: ConnectionId,
    pub event: ServerEvent,
}

/// Work the host performs off the dispatch loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Measure and score a sharing proposal, then submit
    /// [`Command::SharingEvaluated`].
    EvaluateSharing(SharingProposal),
}

#[derive(Debug, Default, Resource)]
pub struct Outbox {
    messages: Vec<Outbound>,
    effects: Vec<Effect>,
}

impl Outbox {
    pub fn publish(&mut self, recipient: &ConnectionId, event: ServerEvent) {
        self.messages.push(Outbound {
            recipient: recipient.clone(),
            event,
        });
    }

    /// Publishes when there is a recipient; riders created over HTTP have none.
    pub fn publish_opt(&mut self, recipient: Option<&ConnectionId>, event: ServerEvent) {
        if let Some(recipient) = recipient {
            self.publish(recipient, event);
        }
    }

    /// Sends a copy of `event` to every recipient; returns how many.
    pub fn publish_all<'a>(
        &mut self,
        recipients: impl IntoIterator<Item = &'a ConnectionId>,
        event: &ServerEvent,
    ) -> usize {
        let before = self.messages.len();
        for recipient in recipients {
            self.publish(recipient, event.clone());
        }
        self.messages.len() - before
    }

    pub fn request(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    pub fn messages(&self) -> &[Outbound] {
        &self.messages
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.effects.is_empty()
    }

    pub fn drain(&mut self) -> (Vec<Outbound>, Vec<Effect>) {
        (
            std::mem::take(&mut self.messages),
            std::mem::take(&mut self.effects),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inbound_frames_parse_into_commands() {
        let ride_id = RideId::new();
        let frame = json!({
            "event": "ride:accept",
            "data": {"rideId": ride_id.to_string(), "driverId": "d-7"}
        });
        let msg: ClientMessage = serde_json::from_value(frame).expect("frame");
        match msg.into_command() {
            Command::AcceptRide { ride_id: id, driver_id } => {
                assert_eq!(id, ride_id);
                assert_eq!(driver_id, DriverId::from("d-7"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn ride_request_defaults_priority_to_normal() {
        let frame = json!({
            "event": "ride:request",
            "data": {
                "riderId": "r-1",
                "pickupLocation": {"lat": 1.0, "lng": 2.0},
                "destination": {"lat": 1.5, "lng": 2.5}
            }
        });
        let msg: ClientMessage = serde_json::from_value(frame).expect("frame");
        let Command::RequestRide(spec) = msg.into_command() else {
            panic!("expected ride request");
        };
        assert_eq!(spec.priority, Priority::Normal);
        assert!(spec.requested_features.is_empty());
    }

    #[test]
    fn malformed_ride_id_is_rejected_at_parse_time() {
        let frame = json!({"event": "ride:start", "data": {"rideId": "ride_123"}});
        assert!(serde_json::from_value::<ClientMessage>(frame).is_err());
    }

    #[test]
    fn outbound_frames_use_event_and_camel_case_data() {
        let ride_id = RideId::new();
        let event = ServerEvent::RideCancelled {
            ride_id,
            timestamp: 42,
        };
        let value = serde_json::to_value(&event).expect("json");
        assert_eq!(value["event"], "ride:cancelled");
        assert_eq!(value["data"]["rideId"], ride_id.to_string());
        assert_eq!(value["data"]["timestamp"], 42);
        assert_eq!(event.name(), "ride:cancelled");
    }

    #[test]
    fn failed_sharing_ack_omits_empty_fields() {
        let event = ServerEvent::SharingRequested(Box::new(SharingAck::failure("nope", 1)));
        let value = serde_json::to_value(&event).expect("json");
        assert_eq!(value["data"]["success"], false);
        assert!(value["data"].get("sharingRequestId").is_none());
    }

    #[test]
    fn outbox_drains_everything_once() {
        let mut outbox = Outbox::default();
        let a = ConnectionId::from("a");
        let b = ConnectionId::from("b");
        let event = ServerEvent::Error {
            command: "ride:start",
            message: "x".into(),
        };
        assert_eq!(outbox.publish_all([&a, &b], &event), 2);
        outbox.publish_opt(None, event);
        let (messages, effects) = outbox.drain();
        assert_eq!(messages.len(), 2);
        assert!(effects.is_empty());
        assert!(outbox.is_empty());
    }
}
