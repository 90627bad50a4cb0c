//! Sharing negotiation: building a proposal for an extra rider, evaluating
//! it against the distance provider and scorer, and splicing accepted riders
//! into the route.
//!
//! Evaluation performs provider I/O, so it runs outside the dispatch loop.
//! The loop emits [`crate::protocol::Effect::EvaluateSharing`] with a
//! [`SharingProposal`]; the host calls [`evaluate`] and feeds the result back
//! as [`crate::commands::Command::SharingEvaluated`].

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ecs::{ConnectionId, GeoPoint, Priority, Ride, RideId, RiderId, RouteStop, SharingRequestId};
use crate::error::ProviderError;
use crate::pricing::{environmental_impact, split_fare, EnvironmentalImpact, FareSplit, PricingConfig};
use crate::routing::DistanceProvider;
use crate::scoring::{heuristic_score, ScoreOutcome, ScoreRequest, SharingScorer};
use crate::spatial::{travel_secs, DEFAULT_AVERAGE_SPEED_KMH};
use crate::traffic::SharingContext;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SharingConfig {
    /// Detour percentage the heuristic still accepts (exclusive).
    pub max_detour_percent: f64,
    pub min_direct_km: f64,
    /// Scores above this make a request high priority when the caller gave none.
    pub high_priority_score: f64,
    pub max_alternatives: usize,
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            max_detour_percent: 30.0,
            min_direct_km: 2.0,
            high_priority_score: 0.7,
            max_alternatives: 3,
        }
    }
}

/// The extra rider asking to join.
#[derive(Debug, Clone, PartialEq)]
pub struct SharingCandidate {
    pub new_rider_id: RiderId,
    pub new_pickup_location: GeoPoint,
    pub new_destination: GeoPoint,
    pub priority: Option<Priority>,
}

/// Everything [`evaluate`] needs, captured from the ride when the request
/// arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct SharingProposal {
    pub id: SharingRequestId,
    pub ride_id: RideId,
    pub requester: Option<ConnectionId>,
    pub candidate: SharingCandidate,
    pub original_leg: Vec<GeoPoint>,
    pub detour_leg: Vec<GeoPoint>,
    pub direct_leg: Vec<GeoPoint>,
    pub context: SharingContext,
    pub requested_at: u64,
}

impl SharingProposal {
    pub fn new(
        ride: &Ride,
        candidate: SharingCandidate,
        requester: Option<ConnectionId>,
        context: SharingContext,
        now: u64,
    ) -> Self {
        let here = ride.current_location.unwrap_or(ride.pickup_location);
        Self {
            id: SharingRequestId::new(),
            ride_id: ride.id,
            requester,
            original_leg: vec![ride.pickup_location, ride.destination],
            detour_leg: vec![
                here,
                candidate.new_pickup_location,
                candidate.new_destination,
                ride.destination,
            ],
            direct_leg: vec![candidate.new_pickup_location, candidate.new_destination],
            candidate,
            context,
            requested_at: now,
        }
    }
}

/// Score plus fare/impact snapshot attached to a sharing request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharingPrediction {
    pub score: f64,
    pub should_add_rider: bool,
    pub efficiency: f64,
    pub ai_model_used: bool,
    pub is_fallback: bool,
    /// Meters.
    pub original_distance: f64,
    pub new_route_distance: f64,
    pub new_rider_distance: f64,
    pub additional_distance: f64,
    /// Seconds at the average city speed.
    pub additional_time_estimate: u64,
    pub fare_details: FareSplit,
    pub environmental_impact: EnvironmentalImpact,
    pub context_data: SharingContext,
}

impl SharingPrediction {
    /// Half the additional travel time, in seconds.
    pub fn estimated_pickup_secs(&self) -> u64 {
        (self.additional_time_estimate as f64 / 2.0).round() as u64
    }
}

/// Measured distances of a proposal, in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SharingDistances {
    pub original_m: f64,
    pub with_detour_m: f64,
    pub direct_m: f64,
}

impl SharingDistances {
    pub fn measure(provider: &dyn DistanceProvider, proposal: &SharingProposal) -> Result<Self, ProviderError> {
        Ok(Self {
            original_m: provider.distance_m(&proposal.original_leg)?,
            with_detour_m: provider.distance_m(&proposal.detour_leg)?,
            direct_m: provider.distance_m(&proposal.direct_leg)?,
        })
    }
}

/// Measures, scores and prices a proposal. A distance failure aborts; a
/// scorer failure falls back to the local heuristic.
pub fn evaluate(
    distances: &dyn DistanceProvider,
    scorer: &dyn SharingScorer,
    proposal: &SharingProposal,
    sharing: &SharingConfig,
    pricing: &PricingConfig,
) -> Result<SharingPrediction, ProviderError> {
    let measured = SharingDistances::measure(distances, proposal)?;
    debug!(
        ride_id = %proposal.ride_id,
        original_m = measured.original_m,
        with_detour_m = measured.with_detour_m,
        direct_m = measured.direct_m,
        "sharing distances measured"
    );
    let request = ScoreRequest {
        original_km: measured.original_m / 1000.0,
        with_detour_km: measured.with_detour_m / 1000.0,
        direct_km: measured.direct_m / 1000.0,
        context: proposal.context,
    };
    let outcome = match scorer.score(&request) {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(ride_id = %proposal.ride_id, error = %err, "scorer unavailable, using heuristic");
            heuristic_score(&request, sharing)
        }
    };
    Ok(build_prediction(&request, &measured, outcome, pricing))
}

pub fn build_prediction(
    request: &ScoreRequest,
    measured: &SharingDistances,
    outcome: ScoreOutcome,
    pricing: &PricingConfig,
) -> SharingPrediction {
    let additional_m = measured.with_detour_m - measured.original_m;
    let additional_time = travel_secs(additional_m.max(0.0) / 1000.0, DEFAULT_AVERAGE_SPEED_KMH);
    SharingPrediction {
        score: outcome.score,
        should_add_rider: outcome.should_add_rider,
        efficiency: outcome.efficiency.unwrap_or_else(|| {
            crate::scoring::efficiency(request.original_km, request.with_detour_km, request.direct_km)
        }),
        ai_model_used: outcome.ai_model_used,
        is_fallback: outcome.is_fallback,
        original_distance: measured.original_m,
        new_route_distance: measured.with_detour_m,
        new_rider_distance: measured.direct_m,
        additional_distance: additional_m,
        additional_time_estimate: additional_time.round() as u64,
        fare_details: split_fare(pricing, request.original_km, request.direct_km),
        environmental_impact: environmental_impact(request.direct_km),
        context_data: request.context,
    }
}

/// The caller's priority wins; otherwise a strong score makes it high.
pub fn resolve_priority(requested: Option<Priority>, score: f64, threshold: f64) -> Priority {
    requested.unwrap_or(if score > threshold {
        Priority::High
    } else {
        Priority::Normal
    })
}

/// Stable re-sort: high-priority stops first, insertion order kept within a band.
pub fn sort_route(route: &mut [RouteStop]) {
    route.sort_by_key(|stop| stop.priority.rank());
}
