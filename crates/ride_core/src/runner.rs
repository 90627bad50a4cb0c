//! Dispatch runner: advances the clock and routes commands and timer events
//! into the ECS.
//!
//! Clock progression and routing happen here, outside systems. A command is
//! inserted as [CurrentCommand] and runs the command schedule; a due timer is
//! popped from [SimulationClock], inserted as [CurrentEvent] and runs the
//! timer schedule. Systems are gated by `run_if` so only the matching one runs.

use bevy_ecs::prelude::{Res, Schedule, World};
use bevy_ecs::schedule::{apply_deferred, ExecutorKind, IntoSystemConfigs};
use tracing::{debug, error, warn};

use crate::clock::{CurrentEvent, SimulationClock, TimerKind};
use crate::commands::{Command, CommandKind, CommandOutcome, CommandResult, CurrentCommand};
use crate::config::DispatchConfig;
use crate::ecs::ConnectionId;
use crate::error::{DispatchError, ProviderError};
use crate::protocol::{Effect, Outbound, Outbox, ServerEvent, SharingAck};
use crate::registry::Registry;
use crate::routing::DistanceProvider;
use crate::scoring::SharingScorer;
use crate::sharing::{self, SharingPrediction, SharingProposal};
use crate::stats::RideStats;
use crate::store::{RecordStore, RecordStoreResource};
use crate::systems::{
    driver_location::driver_location_system,
    driver_presence::{disconnect_system, driver_available_system, driver_unavailable_system},
    duration_tick::duration_tick_system,
    location_step::location_step_system,
    ride_accepted::ride_accepted_system,
    ride_cancelled::ride_cancelled_system,
    ride_completed::ride_completed_system,
    ride_rejected::ride_rejected_system,
    ride_requested::ride_requested_system,
    ride_started::ride_started_system,
    sharing_evaluated::sharing_evaluated_system,
    sharing_requested::sharing_requested_system,
    sharing_response::sharing_response_system,
    sync_tick::sync_tick_system,
};
use crate::timers::RideTimers;
use crate::traffic::TrafficProfile;

/// Run condition: the current command is of `kind`.
fn command_is(kind: CommandKind) -> impl FnMut(Option<Res<CurrentCommand>>) -> bool + Clone {
    move |command: Option<Res<CurrentCommand>>| command.is_some_and(|c| c.kind() == kind)
}

fn is_duration_tick(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == TimerKind::DurationTick)
        .unwrap_or(false)
}

fn is_location_step(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == TimerKind::LocationStep)
        .unwrap_or(false)
}

fn is_sync_tick(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == TimerKind::SyncTick)
        .unwrap_or(false)
}

/// One system per command kind, followed by [apply_deferred] so spawned and
/// despawned entities are visible to the next command.
pub fn command_schedule() -> Schedule {
    let mut schedule = Schedule::default();
    schedule.set_executor_kind(ExecutorKind::SingleThreaded);
    schedule.add_systems(
        (
            driver_available_system.run_if(command_is(CommandKind::DriverAvailable)),
            driver_unavailable_system.run_if(command_is(CommandKind::DriverUnavailable)),
            ride_requested_system.run_if(command_is(CommandKind::RequestRide)),
            ride_accepted_system.run_if(command_is(CommandKind::AcceptRide)),
            ride_rejected_system.run_if(command_is(CommandKind::RejectRide)),
            ride_started_system.run_if(command_is(CommandKind::StartRide)),
            ride_completed_system.run_if(command_is(CommandKind::CompleteRide)),
            ride_cancelled_system.run_if(command_is(CommandKind::CancelRide)),
            driver_location_system.run_if(command_is(CommandKind::ReportLocation)),
            sharing_requested_system.run_if(command_is(CommandKind::RequestSharing)),
            sharing_evaluated_system.run_if(command_is(CommandKind::SharingEvaluated)),
            sharing_response_system.run_if(command_is(CommandKind::RespondSharing)),
            disconnect_system.run_if(command_is(CommandKind::Disconnect)),
            apply_deferred,
        )
            .chain(),
    );
    schedule
}

pub fn timer_schedule() -> Schedule {
    let mut schedule = Schedule::default();
    schedule.set_executor_kind(ExecutorKind::SingleThreaded);
    schedule.add_systems(
        (
            duration_tick_system.run_if(is_duration_tick),
            location_step_system.run_if(is_location_step),
            sync_tick_system.run_if(is_sync_tick),
            apply_deferred,
        )
            .chain(),
    );
    schedule
}

/// Pops the next timer due at or before `until` and runs it. Stale events
/// (cancelled or re-armed timers) are dropped without running a system.
/// Returns false when nothing is due.
pub fn run_next_timer(world: &mut World, schedule: &mut Schedule, until: u64) -> bool {
    let Some(event) = world.resource_mut::<SimulationClock>().pop_due(until) else {
        return false;
    };
    if !world.resource::<RideTimers>().is_current(&event) {
        debug!(ride_id = %event.ride_id, kind = ?event.kind, "stale timer dropped");
        return true;
    }

    world.insert_resource(CurrentEvent(event));
    schedule.run(world);
    world.remove_resource::<CurrentEvent>();

    // Re-arm only if the system left the timer armed.
    if let Some(interval) = world.resource::<RideTimers>().rearm_interval(&event) {
        world.resource_mut::<SimulationClock>().schedule_in(
            interval,
            event.kind,
            event.ride_id,
            event.token,
        );
    }
    true
}

/// Runs every timer due at or before `until`, then moves the clock there.
/// Returns how many events were popped.
pub fn run_due_timers(world: &mut World, schedule: &mut Schedule, until: u64) -> usize {
    let mut steps = 0;
    while run_next_timer(world, schedule, until) {
        steps += 1;
    }
    world.resource_mut::<SimulationClock>().advance_to(until);
    steps
}

/// Runs one command at `now` and returns what the handling system left
/// behind. Failures are acknowledged to the origin where the protocol has a
/// way to say so; state is left untouched.
pub fn handle_command(
    world: &mut World,
    schedule: &mut Schedule,
    now: u64,
    origin: Option<ConnectionId>,
    command: Command,
) -> CommandResult {
    world.resource_mut::<SimulationClock>().advance_to(now);
    let kind = command.kind();
    let ack_to = match &command {
        Command::SharingEvaluated { proposal, .. } => proposal.requester.clone(),
        _ => origin.clone(),
    };

    world.insert_resource(CurrentCommand { origin, command });
    schedule.run(world);
    world.remove_resource::<CurrentCommand>();

    let result = world
        .resource_mut::<CommandOutcome>()
        .take()
        .unwrap_or_else(|| {
            Err(DispatchError::Validation(format!(
                "{} was not handled",
                kind.as_str()
            )))
        });
    if let Err(err) = &result {
        acknowledge_failure(world, kind, ack_to.as_ref(), err);
    }
    result
}

fn acknowledge_failure(
    world: &mut World,
    kind: CommandKind,
    origin: Option<&ConnectionId>,
    err: &DispatchError,
) {
    let now = world.resource::<SimulationClock>().now();
    if let DispatchError::RegistryCorrupted(_) = err {
        error!(command = kind.as_str(), error = %err, "command aborted");
        return;
    }
    let mut outbox = world.resource_mut::<Outbox>();
    match (kind, err) {
        (CommandKind::RequestSharing | CommandKind::SharingEvaluated, _) => {
            warn!(command = kind.as_str(), error = %err, "sharing request failed");
            outbox.publish_opt(
                origin,
                ServerEvent::SharingRequested(Box::new(SharingAck::failure(err.to_string(), now))),
            );
        }
        (_, DispatchError::Validation(message)) => {
            warn!(command = kind.as_str(), error = %err, "command rejected");
            outbox.publish_opt(
                origin,
                ServerEvent::Error {
                    command: kind.as_str(),
                    message: message.clone(),
                },
            );
        }
        _ => warn!(command = kind.as_str(), error = %err, "command dropped"),
    }
}

/// A world holding every resource the schedules expect.
pub fn build_world(config: DispatchConfig, store: Box<dyn RecordStore>, now: u64) -> World {
    let mut world = World::new();
    world.insert_resource(SimulationClock::starting_at(now));
    world.insert_resource(RideTimers::default());
    world.insert_resource(Registry::with_retention(config.retention_capacity));
    world.insert_resource(Outbox::default());
    world.insert_resource(CommandOutcome::default());
    world.insert_resource(RideStats::default());
    world.insert_resource(TrafficProfile::standard());
    world.insert_resource(RecordStoreResource(store));
    world.insert_resource(config);
    world
}

/// The dispatch core: one world, its two schedules, and the clock they share.
///
/// Every call first runs the timers that fell due before `now`, so callers
/// only need to pass wall-clock time along with each command.
pub struct DispatchCore {
    world: World,
    commands: Schedule,
    timers: Schedule,
}

impl DispatchCore {
    pub fn new(config: DispatchConfig, store: Box<dyn RecordStore>, now: u64) -> Self {
        Self {
            world: build_world(config, store, now),
            commands: command_schedule(),
            timers: timer_schedule(),
        }
    }

    pub fn handle(&mut self, now: u64, origin: Option<ConnectionId>, command: Command) -> CommandResult {
        run_due_timers(&mut self.world, &mut self.timers, now);
        handle_command(&mut self.world, &mut self.commands, now, origin, command)
    }

    /// Feeds the result of an off-loop sharing evaluation back in.
    pub fn submit_evaluation(
        &mut self,
        now: u64,
        proposal: SharingProposal,
        outcome: Result<SharingPrediction, ProviderError>,
    ) -> CommandResult {
        let origin = proposal.requester.clone();
        self.handle(now, origin, Command::SharingEvaluated { proposal, outcome })
    }

    /// Evaluates effects inline against the given providers. Hosts that
    /// cannot block the loop run [`sharing::evaluate`] elsewhere and call
    /// [`DispatchCore::submit_evaluation`] instead.
    pub fn evaluate_effects(
        &mut self,
        effects: Vec<Effect>,
        distances: &dyn DistanceProvider,
        scorer: &dyn SharingScorer,
    ) -> Vec<CommandResult> {
        let mut results = Vec::with_capacity(effects.len());
        for effect in effects {
            let Effect::EvaluateSharing(proposal) = effect;
            let outcome = {
                let config = self.config();
                sharing::evaluate(distances, scorer, &proposal, &config.sharing, &config.pricing)
            };
            let now = self.now();
            results.push(self.submit_evaluation(now, proposal, outcome));
        }
        results
    }

    /// Runs due timers without a command.
    pub fn advance_to(&mut self, now: u64) -> usize {
        run_due_timers(&mut self.world, &mut self.timers, now)
    }

    /// Timestamp of the earliest queued timer.
    pub fn next_deadline(&self) -> Option<u64> {
        self.world.resource::<SimulationClock>().next_event_time()
    }

    pub fn now(&self) -> u64 {
        self.world.resource::<SimulationClock>().now()
    }

    pub fn drain(&mut self) -> (Vec<Outbound>, Vec<Effect>) {
        self.world.resource_mut::<Outbox>().drain()
    }

    pub fn config(&self) -> &DispatchConfig {
        self.world.resource::<DispatchConfig>()
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Receipt;
    use crate::ecs::{DriverId, RideId, RideStatus};
    use crate::store::InMemoryRecordStore;
    use crate::test_helpers::{ride_spec, TestCore};

    #[test]
    fn unknown_ride_is_dropped_without_reply() {
        let mut core = TestCore::new();
        let rider = ConnectionId::from("rider");
        let err = core
            .handle(Some(rider), Command::StartRide { ride_id: RideId::new() })
            .unwrap_err();
        assert!(err.is_not_found());
        let (messages, _) = core.drain();
        assert!(messages.is_empty());
    }

    #[test]
    fn validation_failures_are_answered_with_an_error_frame() {
        let mut core = TestCore::new();
        let rider = ConnectionId::from("rider");
        let mut spec = ride_spec("r1");
        spec.pickup_location.lat = 200.0;
        let err = core
            .handle(Some(rider.clone()), Command::RequestRide(spec))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));

        let (messages, _) = core.drain();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].recipient, rider);
        assert!(matches!(
            messages[0].event,
            ServerEvent::Error { command: "ride:request", .. }
        ));
    }

    #[test]
    fn sharing_failures_reach_the_requester_as_a_failed_ack() {
        let mut core = TestCore::new();
        let requester = ConnectionId::from("new-rider");
        let err = core
            .handle(
                Some(requester.clone()),
                Command::RequestSharing {
                    ride_id: RideId::new(),
                    candidate: crate::test_helpers::sharing_candidate("r2"),
                },
            )
            .unwrap_err();
        assert!(err.is_not_found());

        let (messages, _) = core.drain();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].recipient, requester);
        match &messages[0].event {
            ServerEvent::SharingRequested(ack) => assert!(!ack.success),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn cancelled_timers_never_fire_again() {
        let mut core = TestCore::new();
        core.driver_online("d1", "driver");
        let ride_id = core.request_ride("r1", "rider");
        core.handle(
            Some(ConnectionId::from("driver")),
            Command::AcceptRide {
                ride_id,
                driver_id: DriverId::from("d1"),
            },
        )
        .expect("accept");
        core.drain();

        let status = core
            .handle(Some(ConnectionId::from("driver")), Command::StartRide { ride_id })
            .expect("start");
        assert!(matches!(
            status,
            Receipt::RideUpdated {
                status: RideStatus::InProgress,
                ..
            }
        ));
        core.handle(
            Some(ConnectionId::from("driver")),
            Command::CompleteRide {
                ride_id,
                driver_id: None,
            },
        )
        .expect("complete");
        core.drain();

        // Whatever is still queued for the ride is stale now.
        core.advance_by(60_000);
        let (messages, _) = core.drain();
        assert!(messages.iter().all(|m| m.event.ride_id() != Some(ride_id)));
        assert_eq!(core.timers().armed_for(ride_id), 0);
    }

    #[test]
    fn world_starts_with_every_resource() {
        let world = build_world(
            DispatchConfig::default(),
            Box::new(InMemoryRecordStore::default()),
            5,
        );
        assert_eq!(world.resource::<SimulationClock>().now(), 5);
        assert!(world.contains_resource::<RideTimers>());
        assert!(world.contains_resource::<RecordStoreResource>());
        assert!(world.contains_resource::<TrafficProfile>());
    }
}
