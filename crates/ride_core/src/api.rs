//! Read/write surface over the dispatch core.
//!
//! Handlers are transport agnostic: they take typed queries and bodies and
//! return an [`ApiResponse`] whose body is the `{"success": bool, ...}`
//! envelope. Writes go through [`DispatchCore::handle`] so they obey the same
//! state machine as the real-time channel.
//!
//! Handlers that call an external provider ([`route`], [`score_prediction`],
//! [`ai_health`]) do not touch the core, so a host can run them off the
//! dispatch loop.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::commands::{Command, Receipt};
use crate::ecs::{Driver, DriverId, GeoPoint, Priority, Ride, RideId, RideSpec, RideStatus, RiderId};
use crate::error::{DispatchError, ProviderError, StoreError};
use crate::registry::{Registry, RideFilter};
use crate::routing::DistanceProvider;
use crate::runner::DispatchCore;
use crate::scoring::{heuristic_score, ScoreOutcome, ScoreRequest, SharingScorer};
use crate::sharing::SharingConfig;
use crate::spatial::{estimate_duration, EstimatedDuration};
use crate::stats::RideStats;
use crate::store::{
    CompletedRide, CompletedRideFilter, NewDriverProfile, PredictionRecord, RecordStore,
    RecordStoreResource,
};
use crate::systems::ride_completed::completed_record;
use crate::traffic::{SharingContext, TrafficProfile};

pub const DEFAULT_LIST_LIMIT: usize = 100;
const RECENT_COMPLETED: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn envelope(status: u16, success: bool, body: Value) -> Self {
        let mut map = match body {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("data".into(), other);
                map
            }
        };
        map.insert("success".into(), Value::Bool(success));
        Self {
            status,
            body: Value::Object(map),
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::envelope(200, true, body)
    }

    pub fn created(body: Value) -> Self {
        Self::envelope(201, true, body)
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self::envelope(status, false, json!({ "message": message.into() }))
    }

    pub fn from_error(err: &DispatchError) -> Self {
        Self::error(err.status_code(), err.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn unexpected(receipt: Receipt) -> ApiResponse {
    ApiResponse::error(500, format!("unexpected receipt {receipt:?}"))
}

fn parse_ride_id(raw: &str) -> Result<RideId, ApiResponse> {
    raw.parse::<RideId>()
        .map_err(|_| ApiResponse::error(400, format!("Invalid ride id: {raw}")))
}

fn store(core: &DispatchCore) -> &dyn RecordStore {
    &*core.world().resource::<RecordStoreResource>().0
}

fn store_mut(core: &mut DispatchCore) -> &mut dyn RecordStore {
    &mut *core
        .world_mut()
        .resource_mut::<RecordStoreResource>()
        .into_inner()
        .0
}

fn live_ride(core: &DispatchCore, ride_id: RideId) -> Option<&Ride> {
    let world = core.world();
    let entity = world.resource::<Registry>().ride_entity(ride_id).ok()?;
    world.get::<Ride>(entity)
}

fn live_rides(core: &mut DispatchCore) -> Vec<Ride> {
    let world = core.world_mut();
    let mut query = world.query::<&Ride>();
    query.iter(world).cloned().collect()
}

fn live_drivers(core: &mut DispatchCore) -> Vec<Driver> {
    let world = core.world_mut();
    let mut query = world.query::<&Driver>();
    let mut drivers: Vec<Driver> = query.iter(world).cloned().collect();
    drivers.sort_by(|a, b| a.driver_id.cmp(&b.driver_id));
    drivers
}

/// Completed rides still held in the retention window, newest first.
fn retained_completed(core: &DispatchCore) -> Vec<CompletedRide> {
    let registry = core.world().resource::<Registry>();
    registry
        .completed_ids()
        .filter_map(|id| live_ride(core, id))
        .filter_map(completed_record)
        .collect()
}

/// A live ride with its real-time extras.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LiveRide<'a> {
    #[serde(flatten)]
    ride: &'a Ride,
    estimated_duration: EstimatedDuration,
    is_active: bool,
}

impl<'a> LiveRide<'a> {
    fn new(ride: &'a Ride, speed_kmh: f64) -> Self {
        Self {
            ride,
            estimated_duration: estimate_duration(ride.pickup_location, ride.destination, speed_kmh),
            is_active: !ride.status.is_terminal(),
        }
    }
}

fn ride_body(core: &DispatchCore, ride_id: RideId) -> Option<Value> {
    if let Some(ride) = live_ride(core, ride_id) {
        return Some(json!({ "ride": LiveRide::new(ride, core.config().average_speed_kmh) }));
    }
    store(core).ride(ride_id).map(|record| json!({ "ride": record }))
}

// ---------------------------------------------------------------------------
// Rides
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRide {
    pub rider_id: Option<RiderId>,
    pub pickup_location: Option<GeoPoint>,
    pub destination: Option<GeoPoint>,
    pub priority: Option<Priority>,
    #[serde(default)]
    pub requested_features: Vec<String>,
}

/// `POST /api/rides`. The rider has no live connection, so only drivers hear
/// about the ride as it happens.
pub fn create_ride(core: &mut DispatchCore, now: u64, body: CreateRide) -> ApiResponse {
    let (Some(rider_id), Some(pickup_location), Some(destination)) =
        (body.rider_id, body.pickup_location, body.destination)
    else {
        return ApiResponse::error(
            400,
            "Missing data: riderId, pickupLocation, and destination are required",
        );
    };
    let spec = RideSpec {
        rider_id,
        pickup_location,
        destination,
        priority: body.priority.unwrap_or_default(),
        requested_features: body.requested_features,
    };
    let priority = spec.priority;
    match core.handle(now, None, Command::RequestRide(spec)) {
        Ok(Receipt::RideCreated {
            ride_id,
            estimated_duration,
            notified_drivers,
        }) => ApiResponse::created(json!({
            "rideId": ride_id,
            "message": "Ride request created successfully",
            "estimatedDuration": estimated_duration,
            "priority": priority,
            "notifiedDrivers": notified_drivers,
        })),
        Ok(other) => unexpected(other),
        Err(err) => ApiResponse::from_error(&err),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideQuery {
    pub status: Option<RideStatus>,
    pub driver_id: Option<DriverId>,
    pub rider_id: Option<RiderId>,
    pub priority: Option<Priority>,
    /// Read unfinished rides from the live world instead of the store.
    #[serde(default)]
    pub active: bool,
}

impl RideQuery {
    fn filter(&self) -> RideFilter {
        RideFilter {
            status: self.status,
            driver_id: self.driver_id.clone(),
            rider_id: self.rider_id.clone(),
            priority: self.priority,
        }
    }
}

/// `GET /api/rides`
pub fn list_rides(core: &mut DispatchCore, query: &RideQuery) -> ApiResponse {
    let filter = query.filter();
    if query.active {
        let speed = core.config().average_speed_kmh;
        let mut rides: Vec<Ride> = live_rides(core)
            .into_iter()
            .filter(|r| !r.status.is_terminal() && filter.matches(r))
            .collect();
        rides.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let views: Vec<LiveRide<'_>> = rides.iter().map(|r| LiveRide::new(r, speed)).collect();
        return ApiResponse::ok(json!({ "count": views.len(), "rides": views }));
    }
    let rides = store(core).rides(&filter);
    ApiResponse::ok(json!({ "count": rides.len(), "rides": rides }))
}

/// `GET /api/rides/:rideId`: the live ride when there is one, else the stored
/// snapshot.
pub fn get_ride(core: &DispatchCore, raw_id: &str) -> ApiResponse {
    let ride_id = match parse_ride_id(raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match ride_body(core, ride_id) {
        Some(body) => ApiResponse::ok(body),
        None => ApiResponse::error(404, format!("Ride not found: {ride_id}")),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRide {
    pub status: Option<RideStatus>,
    pub driver_id: Option<DriverId>,
}

/// Status change requested over HTTP, as the command that performs it.
fn update_command(ride_id: RideId, body: UpdateRide) -> Result<Command, ApiResponse> {
    match (body.status, body.driver_id) {
        (None, _) => Err(ApiResponse::error(400, "Missing data: status is required")),
        (Some(RideStatus::Accepted), Some(driver_id)) => Ok(Command::AcceptRide { ride_id, driver_id }),
        (Some(RideStatus::Pending), Some(driver_id)) => Ok(Command::RejectRide { ride_id, driver_id }),
        (Some(RideStatus::Accepted | RideStatus::Pending), None) => Err(ApiResponse::error(
            400,
            "driverId is required to accept or reject a ride",
        )),
        (Some(RideStatus::InProgress), _) => Ok(Command::StartRide { ride_id }),
        (Some(RideStatus::Completed), driver_id) => Ok(Command::CompleteRide { ride_id, driver_id }),
        (Some(RideStatus::Cancelled), _) => Ok(Command::CancelRide { ride_id }),
    }
}

/// `PUT /api/rides/:rideId`
pub fn update_ride(core: &mut DispatchCore, now: u64, raw_id: &str, body: UpdateRide) -> ApiResponse {
    let ride_id = match parse_ride_id(raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let command = match update_command(ride_id, body) {
        Ok(command) => command,
        Err(response) => return response,
    };
    if let Err(err) = core.handle(now, None, command) {
        return ApiResponse::from_error(&err);
    }
    match ride_body(core, ride_id) {
        Some(body) => ApiResponse::ok(body),
        None => ApiResponse::error(404, format!("Ride not found: {ride_id}")),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedQuery {
    pub driver_id: Option<DriverId>,
    pub rider_id: Option<RiderId>,
    pub priority: Option<Priority>,
    pub limit: Option<usize>,
}

/// `GET /api/rides/completed`: the retention window and the store merged,
/// one entry per ride, newest first.
pub fn completed_rides(core: &DispatchCore, query: &CompletedQuery) -> ApiResponse {
    let limit = query.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_LIST_LIMIT);
    let filter = CompletedRideFilter {
        driver_id: query.driver_id.clone(),
        rider_id: query.rider_id.clone(),
        priority: query.priority,
    };
    let mut seen = HashSet::new();
    let mut rides: Vec<CompletedRide> = retained_completed(core)
        .into_iter()
        .filter(|c| filter.matches(c))
        .chain(store(core).completed_rides(&filter, limit))
        .filter(|c| seen.insert(c.ride_id))
        .collect();
    rides.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
    rides.truncate(limit);
    ApiResponse::ok(json!({ "count": rides.len(), "rides": rides }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsView {
    #[serde(flatten)]
    totals: RideStats,
    /// Minutes.
    average_duration: u64,
    active_rides: usize,
    pending_rides: usize,
    available_drivers: usize,
    busy_drivers: usize,
    total_drivers: usize,
    recent_completed_rides: Vec<CompletedRide>,
    timestamp: u64,
}

/// `GET /api/rides/stats`
pub fn stats(core: &mut DispatchCore) -> ApiResponse {
    let rides = live_rides(core);
    let drivers = live_drivers(core);
    let available_drivers = drivers.iter().filter(|d| d.is_dispatchable()).count();
    let mut recent = retained_completed(core);
    recent.truncate(RECENT_COMPLETED);

    let totals = core.world().resource::<RideStats>().clone();
    let view = StatsView {
        average_duration: totals.average_duration_minutes(),
        totals,
        active_rides: rides.iter().filter(|r| r.status.is_active()).count(),
        pending_rides: rides
            .iter()
            .filter(|r| r.status == RideStatus::Pending)
            .count(),
        available_drivers,
        busy_drivers: drivers.len() - available_drivers,
        total_drivers: drivers.len(),
        recent_completed_rides: recent,
        timestamp: core.now(),
    };
    ApiResponse::ok(json!({ "stats": view }))
}

// ---------------------------------------------------------------------------
// Drivers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDriver {
    pub name: Option<String>,
    pub vehicle_type: Option<String>,
    pub vehicle_number: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

fn store_error(err: &StoreError) -> ApiResponse {
    match err {
        StoreError::NotFound(what) => ApiResponse::error(404, format!("Not found: {what}")),
        StoreError::Rejected(why) => ApiResponse::error(400, why.clone()),
    }
}

/// `POST /api/drivers`: a driver profile in the store. Profiles are separate
/// from the live drivers that announce themselves over the real-time channel.
pub fn create_driver(core: &mut DispatchCore, now: u64, body: CreateDriver) -> ApiResponse {
    let (Some(name), Some(vehicle_type), Some(vehicle_number)) =
        (body.name, body.vehicle_type, body.vehicle_number)
    else {
        return ApiResponse::error(
            400,
            "Missing data: name, vehicleType and vehicleNumber are required",
        );
    };
    let location = body
        .latitude
        .zip(body.longitude)
        .map(|(lat, lng)| GeoPoint::new(lat, lng));
    if location.is_some_and(|l| !l.is_valid()) {
        return ApiResponse::error(400, "latitude/longitude out of range");
    }
    let profile = NewDriverProfile {
        name,
        vehicle_type,
        vehicle_number,
        location,
    };
    match store_mut(core).create_driver_profile(profile, now) {
        Ok(created) => ApiResponse::created(json!({
            "driverId": created.id,
            "message": "Driver created successfully",
        })),
        Err(err) => store_error(&err),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverQuery {
    pub is_available: Option<bool>,
}

/// `GET /api/drivers`: stored profiles plus the drivers online right now.
pub fn list_drivers(core: &mut DispatchCore, query: &DriverQuery) -> ApiResponse {
    let profiles = store(core).driver_profiles(query.is_available);
    let online: Vec<Driver> = live_drivers(core)
        .into_iter()
        .filter(|d| query.is_available.map_or(true, |a| d.is_dispatchable() == a))
        .collect();
    ApiResponse::ok(json!({ "drivers": profiles, "online": online }))
}

// ---------------------------------------------------------------------------
// Routing and scoring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteQuery {
    pub start_lat: Option<f64>,
    pub start_lng: Option<f64>,
    pub end_lat: Option<f64>,
    pub end_lng: Option<f64>,
}

/// `GET /api/route`
pub fn route(provider: &dyn DistanceProvider, query: &RouteQuery) -> ApiResponse {
    let (Some(start_lat), Some(start_lng), Some(end_lat), Some(end_lng)) =
        (query.start_lat, query.start_lng, query.end_lat, query.end_lng)
    else {
        return ApiResponse::error(
            400,
            "Missing coordinates: startLat, startLng, endLat, and endLng are required",
        );
    };
    let waypoints = [
        GeoPoint::new(start_lat, start_lng),
        GeoPoint::new(end_lat, end_lng),
    ];
    if waypoints.iter().any(|p| !p.is_valid()) {
        return ApiResponse::error(400, "Coordinates out of range");
    }
    match provider.route(&waypoints) {
        Ok(route) => ApiResponse::ok(json!({
            "distance": route.distance_m,
            "duration": route.duration_secs,
            "points": route.points,
        })),
        Err(ProviderError::NoRoute) => ApiResponse::error(404, "No route found"),
        Err(err) => ApiResponse::error(500, format!("Failed to get route: {err}")),
    }
}

/// `GET /api/ai/health`
pub fn ai_health(scorer: &dyn SharingScorer) -> ApiResponse {
    let health = scorer.health();
    ApiResponse::ok(json!({
        "status": health.status,
        "message": "Scoring service health check",
        "details": health,
    }))
}

/// Body of `POST /api/ai/predict`. Distances are metres.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictBody {
    pub original_distance: Option<f64>,
    pub distance_after_adding_rider: Option<f64>,
    pub new_rider_distance: Option<f64>,
    pub context_data: Option<SharingContext>,
}

/// Validates a predict body into a scorer request. A missing context is
/// filled in for `now`.
pub fn prediction_request(
    body: PredictBody,
    now: u64,
    traffic: &TrafficProfile,
) -> Result<ScoreRequest, ApiResponse> {
    let (Some(original), Some(with_detour), Some(direct)) = (
        body.original_distance,
        body.distance_after_adding_rider,
        body.new_rider_distance,
    ) else {
        return Err(ApiResponse::error(
            400,
            "Missing required parameters: originalDistance, distanceAfterAddingRider, newRiderDistance",
        ));
    };
    if [original, with_detour, direct].iter().any(|d| !d.is_finite() || *d <= 0.0) {
        return Err(ApiResponse::error(400, "Distances must be positive numbers of metres"));
    }
    Ok(ScoreRequest {
        original_km: original / 1000.0,
        with_detour_km: with_detour / 1000.0,
        direct_km: direct / 1000.0,
        context: body
            .context_data
            .unwrap_or_else(|| SharingContext::at(now, traffic)),
    })
}

/// A scored prediction and the record to keep for it.
#[derive(Debug, Clone)]
pub struct ScoredPrediction {
    pub response: ApiResponse,
    pub record: PredictionRecord,
}

/// Scores a request, falling back to the local heuristic when the scorer
/// fails.
pub fn score_prediction(
    scorer: &dyn SharingScorer,
    config: &SharingConfig,
    request: &ScoreRequest,
    now: u64,
) -> ScoredPrediction {
    let outcome: ScoreOutcome = scorer.score(request).unwrap_or_else(|err| {
        warn!(error = %err, "scorer unavailable, using heuristic");
        heuristic_score(request, config)
    });
    let record = PredictionRecord {
        id: Uuid::new_v4(),
        ride_id: None,
        original_distance_km: request.original_km,
        distance_after_adding_rider_km: request.with_detour_km,
        new_rider_distance_km: request.direct_km,
        add_rider: outcome.should_add_rider,
        score: outcome.score,
        ai_model_used: outcome.ai_model_used,
        context: request.context,
        created_at: now,
    };
    let response = ApiResponse::ok(json!({
        "prediction": {
            "score": outcome.score,
            "shouldAddRider": outcome.should_add_rider,
            "efficiency": outcome.efficiency,
            "aiModelUsed": outcome.ai_model_used,
            "isFallback": outcome.is_fallback,
            "percentIncrease": request.percent_increase(),
            "additionalDistance": request.additional_km() * 1000.0,
            "contextData": request.context,
        }
    }));
    ScoredPrediction { response, record }
}

pub fn record_prediction(core: &mut DispatchCore, record: PredictionRecord) {
    if let Err(err) = store_mut(core).insert_prediction(record) {
        warn!(error = %err, "prediction not stored");
    }
}

/// `POST /api/ai/predict` in one go, for hosts that may block on the scorer.
pub fn predict(
    core: &mut DispatchCore,
    now: u64,
    body: PredictBody,
    scorer: &dyn SharingScorer,
) -> ApiResponse {
    let traffic = core.world().resource::<TrafficProfile>().clone();
    let request = match prediction_request(body, now, &traffic) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let scored = score_prediction(scorer, &core.config().sharing, &request, now);
    record_prediction(core, scored.record);
    scored.response
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionQuery {
    pub limit: Option<usize>,
}

/// `GET /api/ai/predictions`, newest first.
pub fn predictions(core: &DispatchCore, query: &PredictionQuery) -> ApiResponse {
    let limit = query.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_LIST_LIMIT);
    let predictions = store(core).predictions(limit);
    ApiResponse::ok(json!({ "count": predictions.len(), "predictions": predictions }))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachPrediction {
    pub prediction_data: Option<Value>,
}

/// `POST /api/rides/:rideId/ai-prediction`
pub fn attach_prediction(
    core: &mut DispatchCore,
    now: u64,
    raw_id: &str,
    body: AttachPrediction,
) -> ApiResponse {
    let Some(prediction) = body.prediction_data else {
        return ApiResponse::error(400, "Missing required parameter: predictionData");
    };
    let ride_id = match parse_ride_id(raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match store_mut(core).attach_prediction(ride_id, prediction, now) {
        Ok(record) => ApiResponse::ok(json!({ "ride": record })),
        Err(StoreError::NotFound(_)) => {
            ApiResponse::error(404, format!("Ride not found: {ride_id}"))
        }
        Err(err) => store_error(&err),
    }
}
