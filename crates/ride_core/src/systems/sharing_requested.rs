use bevy_ecs::prelude::{Query, Res, ResMut};
use tracing::info;

use crate::clock::SimulationClock;
use crate::commands::{Command, CommandOutcome, CommandResult, CurrentCommand, Receipt};
use crate::ecs::{ConnectionId, Ride, RideId};
use crate::error::DispatchError;
use crate::protocol::{Effect, Outbox};
use crate::registry::{ride_ref, Registry};
use crate::sharing::{SharingCandidate, SharingProposal};
use crate::traffic::{SharingContext, TrafficProfile};

fn validate_candidate(candidate: &SharingCandidate) -> Result<(), DispatchError> {
    if candidate.new_rider_id.as_str().trim().is_empty() {
        return Err(DispatchError::Validation("newRiderId is required".into()));
    }
    if !candidate.new_pickup_location.is_valid() || !candidate.new_destination.is_valid() {
        return Err(DispatchError::Validation(
            "newPickupLocation and newDestination must hold valid lat/lng".into(),
        ));
    }
    Ok(())
}

/// Captures a proposal for an extra rider and hands it to the host for
/// evaluation. Nothing on the ride changes until the evaluation returns.
#[allow(clippy::too_many_arguments)]
pub fn sharing_requested_system(
    command: Res<CurrentCommand>,
    clock: Res<SimulationClock>,
    traffic: Res<TrafficProfile>,
    registry: Res<Registry>,
    rides: Query<&mut Ride>,
    mut outbox: ResMut<Outbox>,
    mut outcome: ResMut<CommandOutcome>,
) {
    let Command::RequestSharing { ride_id, candidate } = &command.command else {
        return;
    };
    let result = propose(
        *ride_id,
        candidate,
        command.origin.clone(),
        clock.now(),
        &traffic,
        &registry,
        &rides,
        &mut outbox,
    );
    outcome.set(result);
}

#[allow(clippy::too_many_arguments)]
fn propose(
    ride_id: RideId,
    candidate: &SharingCandidate,
    requester: Option<ConnectionId>,
    now: u64,
    traffic: &TrafficProfile,
    registry: &Registry,
    rides: &Query<&mut Ride>,
    outbox: &mut Outbox,
) -> CommandResult {
    validate_candidate(candidate)?;
    let ride = ride_ref(registry, rides, ride_id)?;
    if !ride.status.is_active() {
        return Err(DispatchError::RideNotActive(ride_id));
    }
    let proposal = SharingProposal::new(
        ride,
        candidate.clone(),
        requester,
        SharingContext::at(now, traffic),
        now,
    );
    let sharing_request_id = proposal.id;
    info!(
        ride_id = %ride_id,
        sharing_request_id = %sharing_request_id,
        new_rider_id = %candidate.new_rider_id,
        "sharing proposal queued for evaluation"
    );
    outbox.request(Effect::EvaluateSharing(proposal));
    Ok(Receipt::SharingProposed { sharing_request_id })
}
