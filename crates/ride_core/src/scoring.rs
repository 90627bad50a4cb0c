//! Ride-sharing acceptance scorers.
//!
//! A scorer turns three distances plus situational context into a score and a
//! recommendation. The remote model (feature `remote-scorer`) may be down; the
//! caller falls back to [`heuristic_score`] on any scorer error.

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::sharing::SharingConfig;
use crate::traffic::SharingContext;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRequest {
    pub original_km: f64,
    pub with_detour_km: f64,
    pub direct_km: f64,
    pub context: SharingContext,
}

impl ScoreRequest {
    pub fn additional_km(&self) -> f64 {
        self.with_detour_km - self.original_km
    }

    /// Detour cost as a percentage of the original route. An empty original
    /// route makes any detour infinitely expensive.
    pub fn percent_increase(&self) -> f64 {
        if self.original_km <= 0.0 {
            if self.additional_km() <= 0.0 {
                return 0.0;
            }
            return f64::INFINITY;
        }
        self.additional_km() / self.original_km * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreOutcome {
    pub score: f64,
    pub should_add_rider: bool,
    pub efficiency: Option<f64>,
    pub ai_model_used: bool,
    pub is_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScorerHealth {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_loaded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScorerHealth {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".into(),
            model_loaded: None,
            error: None,
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            status: "unhealthy".into(),
            model_loaded: None,
            error: Some(error.into()),
        }
    }
}

pub trait SharingScorer: Send + Sync {
    fn score(&self, request: &ScoreRequest) -> Result<ScoreOutcome, ProviderError>;

    fn health(&self) -> ScorerHealth {
        ScorerHealth::healthy()
    }
}

/// `max(0, 100 - additional/direct * 100)`, rounded. Zero when there is no
/// direct distance to compare against.
pub fn efficiency(original_km: f64, with_detour_km: f64, direct_km: f64) -> f64 {
    if direct_km <= 0.0 {
        return 0.0;
    }
    let ratio = (with_detour_km - original_km) / direct_km;
    (100.0 - ratio * 100.0).max(0.0).round()
}

/// Local rule: accept when the detour adds less than `max_detour_percent` and
/// the new rider travels at least `min_direct_km`.
pub fn heuristic_score(request: &ScoreRequest, config: &SharingConfig) -> ScoreOutcome {
    let percent = request.percent_increase();
    let should_add_rider = percent < config.max_detour_percent && request.direct_km >= config.min_direct_km;
    let score = (1.0 - percent / 100.0).clamp(0.0, 1.0);
    ScoreOutcome {
        score,
        should_add_rider,
        efficiency: Some(efficiency(
            request.original_km,
            request.with_detour_km,
            request.direct_km,
        )),
        ai_model_used: false,
        is_fallback: true,
    }
}

/// Scorer used when no remote model is configured.
#[derive(Debug, Clone, Default)]
pub struct HeuristicScorer {
    pub config: SharingConfig,
}

impl SharingScorer for HeuristicScorer {
    fn score(&self, request: &ScoreRequest) -> Result<ScoreOutcome, ProviderError> {
        Ok(heuristic_score(request, &self.config))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScorerKind {
    #[default]
    Heuristic,
    #[cfg(feature = "remote-scorer")]
    Remote { endpoint: String },
}

pub fn build_scorer(kind: &ScorerKind, config: &SharingConfig) -> Result<Box<dyn SharingScorer>, ProviderError> {
    match kind {
        ScorerKind::Heuristic => Ok(Box::new(HeuristicScorer {
            config: config.clone(),
        })),
        #[cfg(feature = "remote-scorer")]
        ScorerKind::Remote { endpoint } => Ok(Box::new(remote::RemoteScorer::new(endpoint)?)),
    }
}

// ---------------------------------------------------------------------------
// Remote model (behind `remote-scorer` feature)
// ---------------------------------------------------------------------------

#[cfg(feature = "remote-scorer")]
pub mod remote {
    use super::*;
    use reqwest::blocking::Client;
    use std::time::Duration;

    /// Calls a prediction service exposing `POST /predict` and `GET /health`.
    pub struct RemoteScorer {
        client: Client,
        endpoint: String,
    }

    impl RemoteScorer {
        pub fn new(endpoint: &str) -> Result<Self, ProviderError> {
            let client = Client::builder().timeout(Duration::from_secs(8)).build()?;
            Ok(Self {
                client,
                endpoint: endpoint.trim_end_matches('/').to_string(),
            })
        }
    }

    #[derive(Serialize)]
    struct PredictBody {
        original_distance: f64,
        distance_after_adding_rider: f64,
        new_rider_distance: f64,
        time_of_day: u32,
        day_of_week: u32,
        traffic_level: f64,
        weather_condition: u32,
    }

    #[derive(Deserialize)]
    struct PredictResponse {
        prediction_score: Option<f64>,
        add_rider: Option<bool>,
        efficiency: Option<f64>,
    }

    impl SharingScorer for RemoteScorer {
        fn score(&self, request: &ScoreRequest) -> Result<ScoreOutcome, ProviderError> {
            let body = PredictBody {
                original_distance: request.original_km,
                distance_after_adding_rider: request.with_detour_km,
                new_rider_distance: request.direct_km,
                time_of_day: request.context.time_of_day,
                day_of_week: request.context.day_of_week,
                traffic_level: request.context.traffic_level,
                weather_condition: request.context.weather_condition,
            };
            let resp = self
                .client
                .post(format!("{}/predict", self.endpoint))
                .json(&body)
                .send()?;
            if !resp.status().is_success() {
                return Err(ProviderError::InvalidResponse(format!(
                    "scorer returned {}",
                    resp.status()
                )));
            }
            let parsed: PredictResponse = resp.json()?;
            Ok(ScoreOutcome {
                score: parsed.prediction_score.unwrap_or(0.0).clamp(0.0, 1.0),
                should_add_rider: parsed.add_rider == Some(true),
                efficiency: parsed.efficiency.or_else(|| {
                    Some(efficiency(
                        request.original_km,
                        request.with_detour_km,
                        request.direct_km,
                    ))
                }),
                ai_model_used: true,
                is_fallback: false,
            })
        }

        fn health(&self) -> ScorerHealth {
            let result = self
                .client
                .get(format!("{}/health", self.endpoint))
                .send()
                .and_then(|r| r.error_for_status())
                .and_then(|r| r.json::<ScorerHealth>());
            match result {
                Ok(health) => health,
                Err(err) => ScorerHealth::unhealthy(err.to_string()),
            }
        }
    }
}
