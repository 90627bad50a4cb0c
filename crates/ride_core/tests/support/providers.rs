#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use ride_core::ecs::GeoPoint;
use ride_core::error::ProviderError;
use ride_core::routing::{DistanceProvider, RouteResult};
use ride_core::scoring::{ScoreOutcome, ScoreRequest, ScorerHealth, SharingScorer};

/// Answers every route with a fixed distance and counts calls.
pub struct FixedDistance {
    pub distance_m: f64,
    pub calls: AtomicUsize,
}

impl FixedDistance {
    pub fn new(distance_m: f64) -> Self {
        Self {
            distance_m,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DistanceProvider for FixedDistance {
    fn route(&self, waypoints: &[GeoPoint]) -> Result<RouteResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RouteResult {
            distance_m: self.distance_m,
            duration_secs: self.distance_m / 10.0,
            points: waypoints.to_vec(),
        })
    }
}

pub struct UnreachableRouter;

impl DistanceProvider for UnreachableRouter {
    fn route(&self, _waypoints: &[GeoPoint]) -> Result<RouteResult, ProviderError> {
        Err(ProviderError::Unavailable("router offline".into()))
    }
}

/// A model that always answers with the same score.
pub struct FixedScorer(pub f64);

impl SharingScorer for FixedScorer {
    fn score(&self, _request: &ScoreRequest) -> Result<ScoreOutcome, ProviderError> {
        Ok(ScoreOutcome {
            score: self.0,
            should_add_rider: self.0 >= 0.5,
            efficiency: None,
            ai_model_used: true,
            is_fallback: false,
        })
    }
}

pub struct DownScorer;

impl SharingScorer for DownScorer {
    fn score(&self, _request: &ScoreRequest) -> Result<ScoreOutcome, ProviderError> {
        Err(ProviderError::Timeout)
    }

    fn health(&self) -> ScorerHealth {
        ScorerHealth::unhealthy("model offline")
    }
}
