use bevy_ecs::prelude::Resource;
use serde::Serialize;

use crate::ecs::Priority;

/// Running ride counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Resource)]
#[serde(rename_all = "camelCase")]
pub struct RideStats {
    pub total_rides: u64,
    pub completed_rides: u64,
    pub cancelled_rides: u64,
    pub high_priority_rides: u64,
    pub normal_priority_rides: u64,
    /// Sum of completed ride durations, in minutes.
    pub total_duration_minutes: u64,
    pub last_updated: u64,
}

impl RideStats {
    pub fn record_created(&mut self, priority: Priority, now: u64) {
        self.total_rides += 1;
        match priority {
            Priority::High => self.high_priority_rides += 1,
            Priority::Normal => self.normal_priority_rides += 1,
        }
        self.last_updated = now;
    }

    pub fn record_completed(&mut self, duration_minutes: u64, now: u64) {
        self.completed_rides += 1;
        self.total_duration_minutes += duration_minutes;
        self.last_updated = now;
    }

    pub fn record_cancelled(&mut self, now: u64) {
        self.cancelled_rides += 1;
        self.last_updated = now;
    }

    /// Mean completed-ride duration in minutes, rounded.
    pub fn average_duration_minutes(&self) -> u64 {
        if self.completed_rides == 0 {
            return 0;
        }
        (self.total_duration_minutes as f64 / self.completed_rides as f64).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_priority_and_averages_durations() {
        let mut stats = RideStats::default();
        stats.record_created(Priority::High, 1);
        stats.record_created(Priority::Normal, 2);
        stats.record_created(Priority::Normal, 3);
        stats.record_completed(10, 4);
        stats.record_completed(15, 5);
        stats.record_cancelled(6);

        assert_eq!(stats.total_rides, 3);
        assert_eq!(stats.high_priority_rides, 1);
        assert_eq!(stats.normal_priority_rides, 2);
        assert_eq!(stats.average_duration_minutes(), 13);
        assert_eq!(stats.cancelled_rides, 1);
        assert_eq!(stats.last_updated, 6);
    }

    #[test]
    fn average_is_zero_without_completions() {
        assert_eq!(RideStats::default().average_duration_minutes(), 0);
    }
}
