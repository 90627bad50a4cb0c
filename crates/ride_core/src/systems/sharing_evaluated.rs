use bevy_ecs::prelude::{Query, Res, ResMut};
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::SimulationClock;
use crate::commands::{Command, CommandOutcome, CommandResult, CurrentCommand, Receipt};
use crate::config::DispatchConfig;
use crate::dispatch::available_connections_except;
use crate::ecs::{Driver, Ride, SharingRequest, SharingStatus};
use crate::error::DispatchError;
use crate::protocol::{Outbox, ProposalNotice, ServerEvent, SharingAck, SharingOpportunity};
use crate::registry::{ride_mut, Registry};
use crate::sharing::{resolve_priority, SharingPrediction, SharingProposal};
use crate::store::{PredictionRecord, RecordStore, RecordStoreResource};
use crate::systems::{driver_connection, persist_ride};

/// Continuation of a sharing proposal once the host has measured and scored
/// it: record the request on the ride, put it to the driver, acknowledge the
/// requester. Provider failures surface as the command error.
#[allow(clippy::too_many_arguments)]
pub fn sharing_evaluated_system(
    command: Res<CurrentCommand>,
    clock: Res<SimulationClock>,
    config: Res<DispatchConfig>,
    registry: Res<Registry>,
    mut rides: Query<&mut Ride>,
    drivers: Query<&Driver>,
    mut store: ResMut<RecordStoreResource>,
    mut outbox: ResMut<Outbox>,
    mut outcome: ResMut<CommandOutcome>,
) {
    let Command::SharingEvaluated {
        proposal,
        outcome: evaluation,
    } = &command.command
    else {
        return;
    };
    let result = match evaluation {
        Ok(prediction) => record_request(
            proposal,
            prediction,
            clock.now(),
            &config,
            &registry,
            &mut rides,
            &drivers,
            &mut *store.0,
            &mut outbox,
        ),
        Err(err) => {
            warn!(ride_id = %proposal.ride_id, error = %err, "sharing evaluation failed");
            Err(DispatchError::Provider(err.clone()))
        }
    };
    outcome.set(result);
}

#[allow(clippy::too_many_arguments)]
fn record_request(
    proposal: &SharingProposal,
    prediction: &SharingPrediction,
    now: u64,
    config: &DispatchConfig,
    registry: &Registry,
    rides: &mut Query<&mut Ride>,
    drivers: &Query<&Driver>,
    store: &mut dyn RecordStore,
    outbox: &mut Outbox,
) -> CommandResult {
    let mut ride = ride_mut(registry, rides, proposal.ride_id)?;
    // The ride may have finished while the providers were busy.
    if !ride.status.is_active() {
        return Err(DispatchError::RideNotActive(ride.id));
    }

    let candidate = &proposal.candidate;
    let priority = resolve_priority(
        candidate.priority,
        prediction.score,
        config.sharing.high_priority_score,
    );
    let estimated_pickup_secs = prediction.estimated_pickup_secs();
    ride.sharing_requests.push(SharingRequest {
        id: proposal.id,
        new_rider_id: candidate.new_rider_id.clone(),
        new_rider_connection: proposal.requester.clone(),
        new_pickup_location: candidate.new_pickup_location,
        new_destination: candidate.new_destination,
        prediction: prediction.clone(),
        status: SharingStatus::Pending,
        priority,
        estimated_pickup_secs,
        requested_at: proposal.requested_at,
        responded_at: None,
        rejection_reason: None,
    });
    persist_ride(store, &ride, now);

    let record = PredictionRecord {
        id: Uuid::new_v4(),
        ride_id: Some(ride.id),
        original_distance_km: prediction.original_distance / 1000.0,
        distance_after_adding_rider_km: prediction.new_route_distance / 1000.0,
        new_rider_distance_km: prediction.new_rider_distance / 1000.0,
        add_rider: prediction.should_add_rider,
        score: prediction.score,
        ai_model_used: prediction.ai_model_used,
        context: prediction.context_data,
        created_at: now,
    };
    if let Err(err) = store.insert_prediction(record) {
        warn!(ride_id = %ride.id, error = %err, "prediction not stored");
    }

    let driver = driver_connection(registry, drivers, ride.driver_id.as_ref());
    outbox.publish_opt(
        driver.as_ref(),
        ServerEvent::SharingProposal {
            ride_id: ride.id,
            sharing_request_id: proposal.id,
            new_rider_id: candidate.new_rider_id.clone(),
            new_pickup_location: candidate.new_pickup_location,
            new_destination: candidate.new_destination,
            prediction: Box::new(prediction.clone()),
            priority,
            estimated_pickup_time: estimated_pickup_secs,
            timestamp: now,
        },
    );
    outbox.publish_opt(
        proposal.requester.as_ref(),
        ServerEvent::SharingRequested(Box::new(SharingAck {
            success: true,
            message: "Sharing request sent to driver".into(),
            sharing_request_id: Some(proposal.id),
            prediction: Some(prediction.clone()),
            priority: Some(priority),
            estimated_pickup_time: Some(estimated_pickup_secs),
            timestamp: now,
        })),
    );

    let others = available_connections_except(drivers.iter(), ride.driver_id.as_ref());
    let notice = ServerEvent::SharingOpportunity(SharingOpportunity::Proposal(Box::new(
        ProposalNotice {
            ride_id: ride.id,
            sharing_request_id: proposal.id,
            prediction: prediction.clone(),
            priority,
            estimated_pickup_time: estimated_pickup_secs,
            current_ride_status: ride.status,
            current_ride_progress: ride.progress,
            timestamp: now,
        },
    )));
    outbox.publish_all(&others, &notice);

    info!(
        ride_id = %ride.id,
        sharing_request_id = %proposal.id,
        score = prediction.score,
        should_add_rider = prediction.should_add_rider,
        priority = ?priority,
        "sharing request recorded"
    );
    Ok(Receipt::SharingRecorded {
        ride_id: ride.id,
        sharing_request_id: proposal.id,
        priority,
    })
}
