use bevy_ecs::prelude::{Query, Res, ResMut};
use tracing::info;

use crate::clock::{SimulationClock, TimerKind, ONE_SEC_MS};
use crate::commands::{Command, CommandOutcome, CommandResult, CurrentCommand, Receipt};
use crate::config::DispatchConfig;
use crate::dispatch::available_connections_except;
use crate::ecs::{
    Driver, DriverId, Ride, RideId, RideStatus, RouteStop, SharedRider, SharingRequest,
    SharingRequestId, SharingStatus, StopKind,
};
use crate::error::DispatchError;
use crate::protocol::{AlternativeRide, Alternatives, Outbox, ServerEvent};
use crate::registry::{ride_mut, Registry};
use crate::sharing::sort_route;
use crate::store::{RecordStore, RecordStoreResource};
use crate::systems::persist_ride;
use crate::timers::RideTimers;

#[allow(clippy::too_many_arguments)]
pub fn sharing_response_system(
    command: Res<CurrentCommand>,
    mut clock: ResMut<SimulationClock>,
    config: Res<DispatchConfig>,
    registry: Res<Registry>,
    mut rides: Query<&mut Ride>,
    drivers: Query<&Driver>,
    mut timers: ResMut<RideTimers>,
    mut store: ResMut<RecordStoreResource>,
    mut outbox: ResMut<Outbox>,
    mut outcome: ResMut<CommandOutcome>,
) {
    let Command::RespondSharing {
        ride_id,
        sharing_request_id,
        driver_id,
        accepted,
        reason,
    } = &command.command
    else {
        return;
    };
    let response = Response {
        ride_id: *ride_id,
        sharing_request_id: *sharing_request_id,
        driver_id,
        accepted: *accepted,
        reason: reason.as_deref(),
    };
    let result = respond(
        &response,
        &config,
        &registry,
        &mut rides,
        &drivers,
        &mut clock,
        &mut timers,
        &mut *store.0,
        &mut outbox,
    );
    outcome.set(result);
}

struct Response<'a> {
    ride_id: RideId,
    sharing_request_id: SharingRequestId,
    driver_id: &'a DriverId,
    accepted: bool,
    reason: Option<&'a str>,
}

#[allow(clippy::too_many_arguments)]
fn respond(
    response: &Response<'_>,
    config: &DispatchConfig,
    registry: &Registry,
    rides: &mut Query<&mut Ride>,
    drivers: &Query<&Driver>,
    clock: &mut SimulationClock,
    timers: &mut RideTimers,
    store: &mut dyn RecordStore,
    outbox: &mut Outbox,
) -> CommandResult {
    let now = clock.now();
    let ride_id = response.ride_id;
    let mut ride = ride_mut(registry, rides, ride_id)?;
    if ride.driver_id.as_ref() != Some(response.driver_id) {
        return Err(DispatchError::Validation(format!(
            "driver {} is not assigned to ride {ride_id}",
            response.driver_id
        )));
    }
    let index = ride
        .sharing_requests
        .iter()
        .position(|r| r.id == response.sharing_request_id)
        .ok_or(DispatchError::SharingRequestNotFound {
            ride_id,
            request_id: response.sharing_request_id,
        })?;
    if ride.sharing_requests[index].status != SharingStatus::Pending {
        return Err(DispatchError::SharingAlreadyResolved(
            response.sharing_request_id,
        ));
    }
    if response.accepted && !ride.status.is_active() {
        return Err(DispatchError::RideNotActive(ride_id));
    }

    let request = {
        let request = &mut ride.sharing_requests[index];
        request.status = if response.accepted {
            SharingStatus::Accepted
        } else {
            SharingStatus::Rejected
        };
        request.responded_at = Some(now);
        if !response.accepted {
            request.rejection_reason = response.reason.map(str::to_owned);
        }
        request.clone()
    };

    if response.accepted {
        splice_rider(&mut ride, &request, now);
        timers.start(clock, ride_id, TimerKind::SyncTick, config.timers.sync_tick_ms);
        persist_ride(store, &ride, now);
        notify_accepted(&ride, &request, response.driver_id, drivers, now, outbox);
    } else {
        persist_ride(store, &ride, now);
        // Release the borrow before scanning the other rides.
        drop(ride);
        let alternatives = alternatives(rides, ride_id, config.sharing.max_alternatives);
        outbox.publish_opt(
            request.new_rider_connection.as_ref(),
            ServerEvent::SharingRejected {
                ride_id,
                sharing_request_id: request.id,
                driver_id: response.driver_id.clone(),
                reason: request.rejection_reason.clone(),
                alternatives,
                timestamp: now,
            },
        );
    }

    info!(
        ride_id = %ride_id,
        sharing_request_id = %request.id,
        accepted = response.accepted,
        "sharing request resolved"
    );
    Ok(Receipt::SharingResolved {
        ride_id,
        sharing_request_id: request.id,
        accepted: response.accepted,
    })
}

/// Turns an accepted request into a shared rider with two route stops and
/// re-sorts the route high priority first.
pub fn splice_rider(ride: &mut Ride, request: &SharingRequest, now: u64) {
    ride.shared_riders.push(SharedRider {
        rider_id: request.new_rider_id.clone(),
        connection: request.new_rider_connection.clone(),
        sharing_request_id: request.id,
        pickup_location: request.new_pickup_location,
        destination: request.new_destination,
        priority: request.priority,
        prediction: request.prediction.clone(),
        joined_at: now,
        estimated_pickup_secs: request.estimated_pickup_secs,
    });
    ride.route.push(RouteStop {
        location: request.new_pickup_location,
        kind: StopKind::Pickup,
        rider_id: request.new_rider_id.clone(),
        priority: request.priority,
        estimated_arrival: Some(now + request.estimated_pickup_secs * ONE_SEC_MS),
    });
    ride.route.push(RouteStop {
        location: request.new_destination,
        kind: StopKind::Destination,
        rider_id: request.new_rider_id.clone(),
        priority: request.priority,
        estimated_arrival: None,
    });
    sort_route(&mut ride.route);
}

fn notify_accepted(
    ride: &Ride,
    request: &SharingRequest,
    driver_id: &DriverId,
    drivers: &Query<&Driver>,
    now: u64,
    outbox: &mut Outbox,
) {
    outbox.publish_opt(
        request.new_rider_connection.as_ref(),
        ServerEvent::SharingAccepted {
            ride_id: ride.id,
            sharing_request_id: request.id,
            driver_id: driver_id.clone(),
            prediction: Box::new(request.prediction.clone()),
            priority: request.priority,
            estimated_pickup_time: request.estimated_pickup_secs,
            driver_location: ride.current_location,
            current_ride_progress: ride.progress,
            timestamp: now,
        },
    );
    outbox.publish_opt(
        ride.rider_connection.as_ref(),
        ServerEvent::SharingAdded {
            ride_id: ride.id,
            sharing_request_id: request.id,
            new_rider_id: request.new_rider_id.clone(),
            new_pickup_location: request.new_pickup_location,
            new_destination: request.new_destination,
            prediction: Box::new(request.prediction.clone()),
            priority: request.priority,
            timestamp: now,
        },
    );
    let others = available_connections_except(drivers.iter(), Some(driver_id));
    outbox.publish_all(
        &others,
        &ServerEvent::SharingOpportunityTaken {
            ride_id: ride.id,
            sharing_request_id: request.id,
            timestamp: now,
        },
    );
}

/// Up to `limit` other rides in progress, oldest first.
fn alternatives(rides: &Query<&mut Ride>, exclude: RideId, limit: usize) -> Alternatives {
    let mut candidates: Vec<&Ride> = rides
        .iter()
        .filter(|r| r.id != exclude && r.status == RideStatus::InProgress)
        .collect();
    candidates.sort_by_key(|r| r.created_at);
    let available_rides: Vec<AlternativeRide> = candidates
        .into_iter()
        .take(limit)
        .map(|r| AlternativeRide {
            ride_id: r.id,
            driver_id: r.driver_id.clone(),
            current_location: r.current_location,
            destination: r.destination,
            progress: r.progress,
        })
        .collect();
    let message = if available_rides.is_empty() {
        "No other rides are available to share right now".to_string()
    } else {
        "Here are other rides you could share".to_string()
    };
    Alternatives {
        message,
        available_rides,
    }
}
