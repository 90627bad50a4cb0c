#![allow(dead_code)]

use ride_core::config::DispatchConfig;
use ride_core::test_helpers::TestCore;

/// Builder for reproducible dispatch cores.
#[derive(Clone, Debug, Default)]
pub struct TestCoreBuilder {
    config: DispatchConfig,
}

impl TestCoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` completed rides live.
    pub fn with_retention(mut self, capacity: usize) -> Self {
        self.config.retention_capacity = capacity;
        self
    }

    /// Shorten both legs so whole rides finish in a handful of ticks.
    pub fn with_short_legs(mut self, approach: u32, destination: u32) -> Self {
        let sim = &mut self.config.simulation;
        sim.approach_steps_high = approach;
        sim.approach_steps_normal = approach;
        sim.destination_steps_high = destination;
        sim.destination_steps_normal = destination;
        self
    }

    pub fn with_step_interval_ms(mut self, interval_ms: u64) -> Self {
        self.config.simulation.step_interval_high_ms = interval_ms;
        self.config.simulation.step_interval_normal_ms = interval_ms;
        self
    }

    pub fn with_sync_tick_ms(mut self, interval_ms: u64) -> Self {
        self.config.timers.sync_tick_ms = interval_ms;
        self
    }

    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> TestCore {
        TestCore::with_config(self.config)
    }
}
