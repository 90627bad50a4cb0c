//! Typed inbound commands and what handling them returns.

use bevy_ecs::prelude::Resource;

use crate::ecs::{
    ConnectionId, DriverId, GeoPoint, Priority, RideId, RideSpec, RideStatus, SharingRequestId,
};
use crate::error::{DispatchError, ProviderError};
use crate::sharing::{SharingCandidate, SharingPrediction, SharingProposal};
use crate::spatial::EstimatedDuration;
use crate::store::CompletedRide;

#[derive(Debug, Clone)]
pub enum Command {
    DriverAvailable {
        driver_id: DriverId,
        location: Option<GeoPoint>,
    },
    DriverUnavailable {
        driver_id: DriverId,
    },
    RequestRide(RideSpec),
    AcceptRide {
        ride_id: RideId,
        driver_id: DriverId,
    },
    RejectRide {
        ride_id: RideId,
        driver_id: DriverId,
    },
    StartRide {
        ride_id: RideId,
    },
    CompleteRide {
        ride_id: RideId,
        driver_id: Option<DriverId>,
    },
    CancelRide {
        ride_id: RideId,
    },
    ReportLocation {
        ride_id: RideId,
        driver_id: DriverId,
        location: GeoPoint,
    },
    RequestSharing {
        ride_id: RideId,
        candidate: SharingCandidate,
    },
    /// Continuation of an off-loop sharing evaluation.
    SharingEvaluated {
        proposal: SharingProposal,
        outcome: Result<SharingPrediction, ProviderError>,
    },
    RespondSharing {
        ride_id: RideId,
        sharing_request_id: SharingRequestId,
        driver_id: DriverId,
        accepted: bool,
        reason: Option<String>,
    },
    /// The origin connection went away.
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    DriverAvailable,
    DriverUnavailable,
    RequestRide,
    AcceptRide,
    RejectRide,
    StartRide,
    CompleteRide,
    CancelRide,
    ReportLocation,
    RequestSharing,
    SharingEvaluated,
    RespondSharing,
    Disconnect,
}

impl CommandKind {
    /// Wire name of the inbound event.
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::DriverAvailable => "driver:available",
            CommandKind::DriverUnavailable => "driver:unavailable",
            CommandKind::RequestRide => "ride:request",
            CommandKind::AcceptRide => "ride:accept",
            CommandKind::RejectRide => "ride:reject",
            CommandKind::StartRide => "ride:start",
            CommandKind::CompleteRide => "ride:complete",
            CommandKind::CancelRide => "ride:cancel",
            CommandKind::ReportLocation => "driver:location",
            CommandKind::RequestSharing => "ride:sharing_request",
            CommandKind::SharingEvaluated => "ride:sharing_request",
            CommandKind::RespondSharing => "ride:sharing_response",
            CommandKind::Disconnect => "disconnect",
        }
    }
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::DriverAvailable { .. } => CommandKind::DriverAvailable,
            Command::DriverUnavailable { .. } => CommandKind::DriverUnavailable,
            Command::RequestRide(_) => CommandKind::RequestRide,
            Command::AcceptRide { .. } => CommandKind::AcceptRide,
            Command::RejectRide { .. } => CommandKind::RejectRide,
            Command::StartRide { .. } => CommandKind::StartRide,
            Command::CompleteRide { .. } => CommandKind::CompleteRide,
            Command::CancelRide { .. } => CommandKind::CancelRide,
            Command::ReportLocation { .. } => CommandKind::ReportLocation,
            Command::RequestSharing { .. } => CommandKind::RequestSharing,
            Command::SharingEvaluated { .. } => CommandKind::SharingEvaluated,
            Command::RespondSharing { .. } => CommandKind::RespondSharing,
            Command::Disconnect => CommandKind::Disconnect,
        }
    }
}

/// What a successfully handled command did.
#[derive(Debug, Clone, PartialEq)]
pub enum Receipt {
    DriverRegistered {
        driver_id: DriverId,
    },
    DriverUpdated {
        driver_id: DriverId,
    },
    RideCreated {
        ride_id: RideId,
        estimated_duration: EstimatedDuration,
        notified_drivers: usize,
    },
    RideUpdated {
        ride_id: RideId,
        status: RideStatus,
    },
    RideCompleted(CompletedRide),
    LocationRecorded {
        ride_id: RideId,
        progress: u8,
    },
    SharingProposed {
        sharing_request_id: SharingRequestId,
    },
    SharingRecorded {
        ride_id: RideId,
        sharing_request_id: SharingRequestId,
        priority: Priority,
    },
    SharingResolved {
        ride_id: RideId,
        sharing_request_id: SharingRequestId,
        accepted: bool,
    },
    Disconnected {
        drivers_removed: usize,
        rides_cancelled: usize,
    },
}

pub type CommandResult = Result<Receipt, DispatchError>;

/// The command being processed by the command schedule.
#[derive(Debug, Clone, Resource)]
pub struct CurrentCommand {
    pub origin: Option<ConnectionId>,
    pub command: Command,
}

impl CurrentCommand {
    pub fn kind(&self) -> CommandKind {
        self.command.kind()
    }

    /// The origin connection, or a validation error for commands that only
    /// make sense over a live connection.
    pub fn require_origin(&self) -> Result<&ConnectionId, DispatchError> {
        self.origin.as_ref().ok_or_else(|| {
            DispatchError::Validation(format!(
                "{} requires a connection",
                self.kind().as_str()
            ))
        })
    }
}

/// Result left behind by the system that handled the current command.
#[derive(Debug, Default, Resource)]
pub struct CommandOutcome(Option<CommandResult>);

impl CommandOutcome {
    pub fn set(&mut self, result: CommandResult) {
        self.0 = Some(result);
    }

    pub fn take(&mut self) -> Option<CommandResult> {
        self.0.take()
    }
}
