//! HTTP surface. Handlers extract the request, hop onto the dispatch loop or a
//! blocking thread, and turn the [`ApiResponse`] into an axum response.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use ride_core::api::{
    self, ApiResponse, AttachPrediction, CompletedQuery, CreateDriver, CreateRide, DriverQuery,
    PredictBody, PredictionQuery, RideQuery, RouteQuery, UpdateRide,
};
use ride_core::traffic::TrafficProfile;
use tracing::{error, warn};

use crate::dispatcher::DispatcherGone;
use crate::state::AppState;
use crate::ws;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::upgrade))
        .route("/api/rides", post(create_ride).get(list_rides))
        .route("/api/rides/completed", get(completed_rides))
        .route("/api/rides/stats", get(ride_stats))
        .route("/api/rides/:ride_id", get(get_ride).put(update_ride))
        .route("/api/rides/:ride_id/ai-prediction", post(attach_prediction))
        .route("/api/drivers", post(create_driver).get(list_drivers))
        .route("/api/route", get(route))
        .route("/api/ai/health", get(ai_health))
        .route("/api/ai/predict", post(predict))
        .route("/api/ai/predictions", get(predictions))
        .with_state(state)
}

/// An [`ApiResponse`] on the wire.
pub struct Reply(pub ApiResponse);

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.body)).into_response()
    }
}

impl From<ApiResponse> for Reply {
    fn from(response: ApiResponse) -> Self {
        Self(response)
    }
}

impl From<DispatcherGone> for Reply {
    fn from(err: DispatcherGone) -> Self {
        error!(error = %err, "request dropped");
        Self(ApiResponse::error(503, err.to_string()))
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Reply> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| Reply(ApiResponse::error(400, rejection.body_text())))
}

fn query<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, Reply> {
    params
        .map(|Query(value)| value)
        .map_err(|rejection| Reply(ApiResponse::error(400, rejection.body_text())))
}

/// Runs a provider call off the async workers.
async fn blocking<F>(f: F) -> Reply
where
    F: FnOnce() -> ApiResponse + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(response) => Reply(response),
        Err(err) => {
            warn!(error = %err, "blocking handler failed");
            Reply(ApiResponse::error(500, "internal error"))
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn create_ride(
    State(state): State<AppState>,
    payload: Result<Json<CreateRide>, JsonRejection>,
) -> Result<Reply, Reply> {
    let payload = body(payload)?;
    Ok(state
        .dispatch
        .call(move |core, now| api::create_ride(core, now, payload))
        .await?
        .into())
}

async fn list_rides(
    State(state): State<AppState>,
    params: Result<Query<RideQuery>, QueryRejection>,
) -> Result<Reply, Reply> {
    let params = query(params)?;
    Ok(state
        .dispatch
        .call(move |core, _| api::list_rides(core, &params))
        .await?
        .into())
}

async fn get_ride(
    State(state): State<AppState>,
    Path(ride_id): Path<String>,
) -> Result<Reply, Reply> {
    Ok(state
        .dispatch
        .call(move |core, _| api::get_ride(core, &ride_id))
        .await?
        .into())
}

async fn update_ride(
    State(state): State<AppState>,
    Path(ride_id): Path<String>,
    payload: Result<Json<UpdateRide>, JsonRejection>,
) -> Result<Reply, Reply> {
    let payload = body(payload)?;
    Ok(state
        .dispatch
        .call(move |core, now| api::update_ride(core, now, &ride_id, payload))
        .await?
        .into())
}

async fn completed_rides(
    State(state): State<AppState>,
    params: Result<Query<CompletedQuery>, QueryRejection>,
) -> Result<Reply, Reply> {
    let params = query(params)?;
    Ok(state
        .dispatch
        .call(move |core, _| api::completed_rides(core, &params))
        .await?
        .into())
}

async fn ride_stats(State(state): State<AppState>) -> Result<Reply, Reply> {
    Ok(state.dispatch.call(|core, _| api::stats(core)).await?.into())
}

async fn attach_prediction(
    State(state): State<AppState>,
    Path(ride_id): Path<String>,
    payload: Result<Json<AttachPrediction>, JsonRejection>,
) -> Result<Reply, Reply> {
    let payload = body(payload)?;
    Ok(state
        .dispatch
        .call(move |core, now| api::attach_prediction(core, now, &ride_id, payload))
        .await?
        .into())
}

async fn create_driver(
    State(state): State<AppState>,
    payload: Result<Json<CreateDriver>, JsonRejection>,
) -> Result<Reply, Reply> {
    let payload = body(payload)?;
    Ok(state
        .dispatch
        .call(move |core, now| api::create_driver(core, now, payload))
        .await?
        .into())
}

async fn list_drivers(
    State(state): State<AppState>,
    params: Result<Query<DriverQuery>, QueryRejection>,
) -> Result<Reply, Reply> {
    let params = query(params)?;
    Ok(state
        .dispatch
        .call(move |core, _| api::list_drivers(core, &params))
        .await?
        .into())
}

async fn route(
    State(state): State<AppState>,
    params: Result<Query<RouteQuery>, QueryRejection>,
) -> Result<Reply, Reply> {
    let params = query(params)?;
    let providers = state.providers.clone();
    Ok(blocking(move || api::route(&*providers.distances, &params)).await)
}

async fn ai_health(State(state): State<AppState>) -> Reply {
    let providers = state.providers.clone();
    blocking(move || api::ai_health(&*providers.scorer)).await
}

/// Validated on the loop, scored on a blocking thread, recorded on the loop.
async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<PredictBody>, JsonRejection>,
) -> Result<Reply, Reply> {
    let payload = body(payload)?;
    let (request, now) = state
        .dispatch
        .call(move |core, now| {
            let traffic = core.world().resource::<TrafficProfile>().clone();
            (api::prediction_request(payload, now, &traffic), now)
        })
        .await?;
    let request = request.map_err(Reply)?;

    let providers = state.providers.clone();
    let sharing = state.sharing.clone();
    let scored = tokio::task::spawn_blocking(move || {
        api::score_prediction(&*providers.scorer, &sharing, &request, now)
    })
    .await
    .map_err(|err| {
        warn!(error = %err, "scoring task failed");
        Reply(ApiResponse::error(500, "internal error"))
    })?;

    let response = scored.response;
    let record = scored.record;
    state
        .dispatch
        .call(move |core, _| api::record_prediction(core, record))
        .await?;
    Ok(Reply(response))
}

async fn predictions(
    State(state): State<AppState>,
    params: Result<Query<PredictionQuery>, QueryRejection>,
) -> Result<Reply, Reply> {
    let params = query(params)?;
    Ok(state
        .dispatch
        .call(move |core, _| api::predictions(core, &params))
        .await?
        .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn decode(reply: Reply) -> (StatusCode, serde_json::Value) {
        let response = reply.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, serde_json::from_slice(&bytes).expect("json"))
    }

    #[tokio::test]
    async fn api_status_becomes_http_status() {
        let (status, json) = decode(Reply(ApiResponse::error(404, "Ride not found"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "Ride not found");
    }

    #[tokio::test]
    async fn stopped_loop_is_service_unavailable() {
        let (status, json) = decode(Reply::from(DispatcherGone)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn nonsense_status_is_an_internal_error() {
        let (status, _) = decode(Reply(ApiResponse {
            status: 42,
            body: serde_json::json!({}),
        }))
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
