//! Pluggable distance providers: trait abstraction for routing backends.
//!
//! Two implementations, selectable via [`DistanceProviderKind`]:
//!
//! - **`HaversineDistanceProvider`**: great-circle legs at a fixed average speed. No I/O.
//! - **`OsrmDistanceProvider`** (feature `osrm`): calls an OSRM HTTP endpoint.
//!
//! Providers are called off the dispatch loop; their results come back as
//! commands.

use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Mutex;

use crate::ecs::GeoPoint;
use crate::error::ProviderError;
use crate::spatial::{path_length_m, travel_secs, DEFAULT_AVERAGE_SPEED_KMH};

/// Result of a route query along two or more waypoints.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResult {
    /// Road-network distance in meters.
    pub distance_m: f64,
    pub duration_secs: f64,
    /// Geometry along the route (just the waypoints for the haversine provider).
    pub points: Vec<GeoPoint>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DistanceProviderKind {
    #[default]
    Haversine,
    #[cfg(feature = "osrm")]
    Osrm {
        endpoint: String,
        #[serde(default)]
        fallback_to_haversine: bool,
    },
}

/// Implementations must be `Send + Sync`; the server shares one provider
/// across blocking worker threads.
pub trait DistanceProvider: Send + Sync {
    fn route(&self, waypoints: &[GeoPoint]) -> Result<RouteResult, ProviderError>;

    fn distance_m(&self, waypoints: &[GeoPoint]) -> Result<f64, ProviderError> {
        self.route(waypoints).map(|r| r.distance_m)
    }
}

fn check_waypoints(waypoints: &[GeoPoint]) -> Result<(), ProviderError> {
    if waypoints.len() < 2 {
        return Err(ProviderError::NoRoute);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Haversine provider (always available)
// ---------------------------------------------------------------------------

pub struct HaversineDistanceProvider {
    pub speed_kmh: f64,
}

impl Default for HaversineDistanceProvider {
    fn default() -> Self {
        Self {
            speed_kmh: DEFAULT_AVERAGE_SPEED_KMH,
        }
    }
}

impl DistanceProvider for HaversineDistanceProvider {
    fn route(&self, waypoints: &[GeoPoint]) -> Result<RouteResult, ProviderError> {
        check_waypoints(waypoints)?;
        let distance_m = path_length_m(waypoints);
        Ok(RouteResult {
            distance_m,
            duration_secs: travel_secs(distance_m / 1000.0, self.speed_kmh),
            points: waypoints.to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// OSRM provider (behind `osrm` feature)
// ---------------------------------------------------------------------------

#[cfg(feature = "osrm")]
pub mod osrm {
    use super::*;
    use reqwest::blocking::Client;
    use std::time::Duration;

    pub struct OsrmDistanceProvider {
        client: Client,
        endpoint: String,
    }

    impl OsrmDistanceProvider {
        pub fn new(endpoint: &str) -> Result<Self, ProviderError> {
            let client = Client::builder().timeout(Duration::from_secs(5)).build()?;
            Ok(Self {
                client,
                endpoint: endpoint.trim_end_matches('/').to_string(),
            })
        }
    }

    #[derive(Deserialize)]
    struct OsrmResponse {
        code: String,
        message: Option<String>,
        routes: Option<Vec<OsrmRoute>>,
    }

    #[derive(Deserialize)]
    struct OsrmRoute {
        distance: f64, // metres
        duration: f64, // seconds
        geometry: OsrmGeometry,
    }

    #[derive(Deserialize)]
    struct OsrmGeometry {
        coordinates: Vec<[f64; 2]>, // [lng, lat]
    }

    impl DistanceProvider for OsrmDistanceProvider {
        fn route(&self, waypoints: &[GeoPoint]) -> Result<RouteResult, ProviderError> {
            check_waypoints(waypoints)?;
            let coords = waypoints
                .iter()
                .map(|p| format!("{},{}", p.lng, p.lat))
                .collect::<Vec<_>>()
                .join(";");
            let url = format!(
                "{}/route/v1/driving/{}?overview=full&geometries=geojson",
                self.endpoint, coords
            );

            let resp: OsrmResponse = self.client.get(&url).send()?.json()?;
            if resp.code != "Ok" {
                return Err(ProviderError::InvalidResponse(format!(
                    "{}: {}",
                    resp.code,
                    resp.message.unwrap_or_default()
                )));
            }
            let route = resp
                .routes
                .and_then(|routes| routes.into_iter().next())
                .ok_or(ProviderError::NoRoute)?;

            Ok(RouteResult {
                distance_m: route.distance,
                duration_secs: route.duration,
                points: route
                    .geometry
                    .coordinates
                    .iter()
                    .map(|c| GeoPoint::new(c[1], c[0]))
                    .collect(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Caching wrapper
// ---------------------------------------------------------------------------

/// LRU-cached wrapper around any [`DistanceProvider`].
///
/// Cache key is the waypoint sequence at 1e-6 degree resolution (directional).
/// On inner failure the haversine provider is tried when `fallback_to_haversine`
/// is set; otherwise the error is returned and nothing is cached.
pub struct CachedDistanceProvider {
    inner: Box<dyn DistanceProvider>,
    cache: Mutex<LruCache<Vec<(i64, i64)>, RouteResult>>,
    fallback_to_haversine: bool,
}

impl CachedDistanceProvider {
    pub fn new(inner: Box<dyn DistanceProvider>, capacity: usize, fallback_to_haversine: bool) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
            fallback_to_haversine,
        }
    }

    fn key(waypoints: &[GeoPoint]) -> Vec<(i64, i64)> {
        waypoints
            .iter()
            .map(|p| ((p.lat * 1e6).round() as i64, (p.lng * 1e6).round() as i64))
            .collect()
    }
}

impl DistanceProvider for CachedDistanceProvider {
    fn route(&self, waypoints: &[GeoPoint]) -> Result<RouteResult, ProviderError> {
        let key = Self::key(waypoints);

        if let Ok(mut cache) = self.cache.lock() {
            if let Some(cached) = cache.get(&key) {
                return Ok(cached.clone());
            }
        }

        let result = self.inner.route(waypoints).or_else(|err| {
            if self.fallback_to_haversine {
                tracing::warn!(error = %err, "distance provider failed, using haversine");
                HaversineDistanceProvider::default().route(waypoints)
            } else {
                Err(err)
            }
        })?;

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, result.clone());
        }
        Ok(result)
    }
}

/// Default route cache capacity for remote providers.
#[cfg(feature = "osrm")]
const DEFAULT_ROUTE_CACHE_CAPACITY: usize = 20_000;

pub fn build_distance_provider(kind: &DistanceProviderKind) -> Result<Box<dyn DistanceProvider>, ProviderError> {
    match kind {
        DistanceProviderKind::Haversine => Ok(Box::new(HaversineDistanceProvider::default())),

        #[cfg(feature = "osrm")]
        DistanceProviderKind::Osrm {
            endpoint,
            fallback_to_haversine,
        } => {
            let inner = Box::new(osrm::OsrmDistanceProvider::new(endpoint)?);
            Ok(Box::new(CachedDistanceProvider::new(
                inner,
                DEFAULT_ROUTE_CACHE_CAPACITY,
                *fallback_to_haversine,
            )))
        }
    }
}
