//! Test helpers for common test setup and utilities.
//!
//! Fixed geography around central Paris and a [`TestCore`] that carries its
//! own wall clock so tests read as a sequence of commands.

use crate::clock::ONE_SEC_MS;
use crate::commands::{Command, CommandResult, Receipt};
use crate::config::DispatchConfig;
use crate::ecs::{ConnectionId, Driver, DriverId, GeoPoint, Priority, Ride, RideId, RideSpec, RiderId};
use crate::pricing::PricingConfig;
use crate::protocol::{Effect, Outbound};
use crate::registry::Registry;
use crate::routing::HaversineDistanceProvider;
use crate::runner::DispatchCore;
use crate::scoring::{HeuristicScorer, ScoreOutcome, ScoreRequest};
use crate::sharing::{build_prediction, SharingCandidate, SharingDistances, SharingPrediction};
use crate::stats::RideStats;
use crate::store::{InMemoryRecordStore, RecordStoreResource};
use crate::timers::RideTimers;
use crate::traffic::{SharingContext, TrafficProfile};

/// 2023-11-14T22:13:20Z, a Tuesday.
pub const START_MS: u64 = 1_700_000_000_000;

pub const PICKUP: GeoPoint = GeoPoint::new(48.8566, 2.3522);
/// About 4.3 km west of [`PICKUP`].
pub const DESTINATION: GeoPoint = GeoPoint::new(48.8566, 2.2936);
pub const SHARED_PICKUP: GeoPoint = GeoPoint::new(48.8600, 2.3400);
pub const SHARED_DESTINATION: GeoPoint = GeoPoint::new(48.8620, 2.2800);

pub fn ride_spec(rider: &str) -> RideSpec {
    RideSpec {
        rider_id: RiderId::from(rider),
        pickup_location: PICKUP,
        destination: DESTINATION,
        priority: Priority::Normal,
        requested_features: Vec::new(),
    }
}

pub fn sharing_candidate(rider: &str) -> SharingCandidate {
    SharingCandidate {
        new_rider_id: RiderId::from(rider),
        new_pickup_location: SHARED_PICKUP,
        new_destination: SHARED_DESTINATION,
        priority: None,
    }
}

/// A prediction over a 5 km ride, a 6 km detour and a 3 km new rider.
pub fn sample_prediction(score: f64) -> SharingPrediction {
    let request = ScoreRequest {
        original_km: 5.0,
        with_detour_km: 6.0,
        direct_km: 3.0,
        context: SharingContext::at(START_MS, &TrafficProfile::standard()),
    };
    let measured = SharingDistances {
        original_m: 5_000.0,
        with_detour_m: 6_000.0,
        direct_m: 3_000.0,
    };
    let outcome = ScoreOutcome {
        score,
        should_add_rider: score >= 0.5,
        efficiency: None,
        ai_model_used: false,
        is_fallback: true,
    };
    build_prediction(&request, &measured, outcome, &PricingConfig::default())
}

/// A [`DispatchCore`] over an in-memory store, plus the wall clock tests
/// move forward by hand.
pub struct TestCore {
    pub core: DispatchCore,
    pub now: u64,
}

impl Default for TestCore {
    fn default() -> Self {
        Self::new()
    }
}

impl TestCore {
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default())
    }

    pub fn with_config(config: DispatchConfig) -> Self {
        Self {
            core: DispatchCore::new(config, Box::new(InMemoryRecordStore::default()), START_MS),
            now: START_MS,
        }
    }

    pub fn handle(&mut self, origin: Option<ConnectionId>, command: Command) -> CommandResult {
        self.core.handle(self.now, origin, command)
    }

    /// Moves the wall clock forward and runs every timer that fell due.
    pub fn advance_by(&mut self, ms: u64) -> usize {
        self.now += ms;
        self.core.advance_to(self.now)
    }

    pub fn advance_secs(&mut self, secs: u64) -> usize {
        self.advance_by(secs * ONE_SEC_MS)
    }

    pub fn drain(&mut self) -> (Vec<Outbound>, Vec<Effect>) {
        self.core.drain()
    }

    /// Evaluates pending effects with the haversine provider and the
    /// heuristic scorer.
    pub fn evaluate(&mut self, effects: Vec<Effect>) -> Vec<CommandResult> {
        let scorer = HeuristicScorer {
            config: self.core.config().sharing.clone(),
        };
        self.core
            .evaluate_effects(effects, &HaversineDistanceProvider::default(), &scorer)
    }

    /// # Panics
    ///
    /// Panics if the driver cannot be registered.
    pub fn driver_online(&mut self, driver: &str, connection: &str) {
        self.handle(
            Some(ConnectionId::from(connection)),
            Command::DriverAvailable {
                driver_id: DriverId::from(driver),
                location: Some(PICKUP),
            },
        )
        .expect("driver should register");
    }

    /// # Panics
    ///
    /// Panics if the ride is not created.
    pub fn request_ride(&mut self, rider: &str, connection: &str) -> RideId {
        self.request(ride_spec(rider), connection)
    }

    /// # Panics
    ///
    /// Panics if the ride is not created.
    pub fn request(&mut self, spec: RideSpec, connection: &str) -> RideId {
        match self.handle(Some(ConnectionId::from(connection)), Command::RequestRide(spec)) {
            Ok(Receipt::RideCreated { ride_id, .. }) => ride_id,
            other => panic!("ride not created: {other:?}"),
        }
    }

    /// # Panics
    ///
    /// Panics if the ride is not live in the world.
    pub fn ride(&self, ride_id: RideId) -> Ride {
        let world = self.core.world();
        let entity = world
            .resource::<Registry>()
            .ride_entity(ride_id)
            .expect("ride should be indexed");
        world
            .get::<Ride>(entity)
            .cloned()
            .expect("ride entity should hold a ride")
    }

    pub fn driver(&self, driver_id: &str) -> Option<Driver> {
        let world = self.core.world();
        let entity = world
            .resource::<Registry>()
            .driver_entity(&DriverId::from(driver_id))
            .ok()?;
        world.get::<Driver>(entity).cloned()
    }

    pub fn timers(&self) -> &RideTimers {
        self.core.world().resource::<RideTimers>()
    }

    pub fn stats(&self) -> &RideStats {
        self.core.world().resource::<RideStats>()
    }

    pub fn store(&self) -> &RecordStoreResource {
        self.core.world().resource::<RecordStoreResource>()
    }
}
