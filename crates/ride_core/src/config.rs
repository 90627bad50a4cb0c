use bevy_ecs::prelude::Resource;
use serde::{Deserialize, Serialize};

use crate::pricing::PricingConfig;
use crate::registry::DEFAULT_RETENTION_CAPACITY;
use crate::sharing::SharingConfig;
use crate::simulation::SimulationConfig;
use crate::spatial::DEFAULT_AVERAGE_SPEED_KMH;
use crate::timers::TimerConfig;

/// Tunables of the dispatch core. Every field has a default, so a partial
/// TOML table is enough.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Resource)]
#[serde(default)]
pub struct DispatchConfig {
    pub timers: TimerConfig,
    pub simulation: SimulationConfig,
    pub sharing: SharingConfig,
    pub pricing: PricingConfig,
    /// Completed rides kept live for fast reads.
    pub retention_capacity: usize,
    pub average_speed_kmh: f64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timers: TimerConfig::default(),
            simulation: SimulationConfig::default(),
            sharing: SharingConfig::default(),
            pricing: PricingConfig::default(),
            retention_capacity: DEFAULT_RETENTION_CAPACITY,
            average_speed_kmh: DEFAULT_AVERAGE_SPEED_KMH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: DispatchConfig = serde_json::from_str(
            r#"{"retention_capacity": 5, "simulation": {"approach_steps_high": 4}}"#,
        )
        .expect("config");
        assert_eq!(config.retention_capacity, 5);
        assert_eq!(config.simulation.approach_steps_high, 4);
        assert_eq!(config.simulation.approach_steps_normal, 10);
        assert_eq!(config.timers.duration_tick_ms, 1000);
        assert_eq!(config.pricing.base_fare, 10.0);
    }
}
