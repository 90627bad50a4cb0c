//! Synthetic driver movement for an accepted ride.
//!
//! Two legs run back to back: an approach leg from a fixed offset to the
//! pickup point, then a destination leg from pickup to destination. Step
//! counts and intervals depend only on the ride priority, so positions are
//! reproducible for a given pickup/destination/priority triple.

use serde::{Deserialize, Serialize};

use crate::ecs::{GeoPoint, Priority};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Approach,
    Destination,
}

/// Where a ride's simulation currently stands. Stored on the ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegCursor {
    pub leg: Leg,
    pub step: u32,
}

impl LegCursor {
    pub fn approach() -> Self {
        Self {
            leg: Leg::Approach,
            step: 0,
        }
    }

    pub fn destination() -> Self {
        Self {
            leg: Leg::Destination,
            step: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Subtracted from the pickup lat and lng to get the approach start.
    pub approach_offset_deg: f64,
    pub approach_steps_high: u32,
    pub approach_steps_normal: u32,
    pub destination_steps_high: u32,
    pub destination_steps_normal: u32,
    pub step_interval_high_ms: u64,
    pub step_interval_normal_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            approach_offset_deg: 0.005,
            approach_steps_high: 8,
            approach_steps_normal: 10,
            destination_steps_high: 12,
            destination_steps_normal: 15,
            step_interval_high_ms: 1500,
            step_interval_normal_ms: 2000,
        }
    }
}

impl SimulationConfig {
    pub fn step_interval_ms(&self, priority: Priority) -> u64 {
        match priority {
            Priority::High => self.step_interval_high_ms,
            Priority::Normal => self.step_interval_normal_ms,
        }
    }

    pub fn approach_plan(&self, pickup: GeoPoint, priority: Priority) -> LegPlan {
        let steps = match priority {
            Priority::High => self.approach_steps_high,
            Priority::Normal => self.approach_steps_normal,
        };
        LegPlan {
            from: GeoPoint::new(
                pickup.lat - self.approach_offset_deg,
                pickup.lng - self.approach_offset_deg,
            ),
            to: pickup,
            steps: steps.max(1),
            interval_ms: self.step_interval_ms(priority),
        }
    }

    pub fn destination_plan(&self, pickup: GeoPoint, destination: GeoPoint, priority: Priority) -> LegPlan {
        let steps = match priority {
            Priority::High => self.destination_steps_high,
            Priority::Normal => self.destination_steps_normal,
        };
        LegPlan {
            from: pickup,
            to: destination,
            steps: steps.max(1),
            interval_ms: self.step_interval_ms(priority),
        }
    }

    pub fn plan_for(&self, leg: Leg, pickup: GeoPoint, destination: GeoPoint, priority: Priority) -> LegPlan {
        match leg {
            Leg::Approach => self.approach_plan(pickup, priority),
            Leg::Destination => self.destination_plan(pickup, destination, priority),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegPlan {
    pub from: GeoPoint,
    pub to: GeoPoint,
    pub steps: u32,
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSample {
    pub position: GeoPoint,
    pub remaining_steps: u32,
    pub time_remaining_ms: u64,
    pub progress: u8,
}

impl LegPlan {
    /// Position and ETA after `step` of `steps` (clamped to the leg end).
    pub fn sample(&self, step: u32) -> StepSample {
        let step = step.min(self.steps);
        let fraction = f64::from(step) / f64::from(self.steps);
        let remaining_steps = self.steps - step;
        let position = if remaining_steps == 0 {
            self.to
        } else {
            self.from.lerp(self.to, fraction)
        };
        StepSample {
            position,
            remaining_steps,
            time_remaining_ms: u64::from(remaining_steps) * self.interval_ms,
            progress: (fraction * 100.0).round() as u8,
        }
    }

    pub fn is_final(&self, step: u32) -> bool {
        step >= self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_scales_steps_and_interval() {
        let config = SimulationConfig::default();
        let pickup = GeoPoint::new(40.0, -74.0);
        let destination = GeoPoint::new(40.1, -74.1);

        let high = config.approach_plan(pickup, Priority::High);
        let normal = config.approach_plan(pickup, Priority::Normal);
        assert_eq!((high.steps, high.interval_ms), (8, 1500));
        assert_eq!((normal.steps, normal.interval_ms), (10, 2000));

        let high = config.destination_plan(pickup, destination, Priority::High);
        let normal = config.destination_plan(pickup, destination, Priority::Normal);
        assert_eq!(high.steps, 12);
        assert_eq!(normal.steps, 15);
    }

    #[test]
    fn approach_starts_offset_and_ends_at_pickup() {
        let config = SimulationConfig::default();
        let pickup = GeoPoint::new(40.0, -74.0);
        let plan = config.approach_plan(pickup, Priority::Normal);

        let start = plan.sample(0);
        assert!((start.position.lat - 39.995).abs() < 1e-9);
        assert!((start.position.lng - -74.005).abs() < 1e-9);
        assert_eq!(start.remaining_steps, 10);
        assert_eq!(start.time_remaining_ms, 20_000);

        let end = plan.sample(10);
        assert_eq!(end.position, pickup);
        assert_eq!(end.time_remaining_ms, 0);
        assert!(plan.is_final(10));
    }

    #[test]
    fn destination_progress_rounds_step_fraction() {
        let config = SimulationConfig::default();
        let plan = config.destination_plan(
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 0.15),
            Priority::Normal,
        );
        assert_eq!(plan.sample(1).progress, 7);
        assert_eq!(plan.sample(5).progress, 33);
        assert_eq!(plan.sample(15).progress, 100);
        assert!((plan.sample(5).position.lng - 0.05).abs() < 1e-12);
    }

    #[test]
    fn identical_inputs_replay_identical_positions() {
        let config = SimulationConfig::default();
        let run = || {
            let plan = config.destination_plan(
                GeoPoint::new(1.0, 2.0),
                GeoPoint::new(1.3, 2.4),
                Priority::High,
            );
            (0..=plan.steps).map(|s| plan.sample(s).position).collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
