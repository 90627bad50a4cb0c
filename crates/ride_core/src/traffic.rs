//! Situational context for the sharing scorer: hour-of-day traffic level,
//! day of week, and weather.

use bevy_ecs::prelude::Resource;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Hourly traffic level in `[0, 1]`; 1.0 = gridlock, 0.0 = empty streets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Resource)]
pub struct TrafficProfile {
    /// Level for each hour of the day (0–23).
    pub hourly_levels: [f64; 24],
}

impl Default for TrafficProfile {
    fn default() -> Self {
        Self::standard()
    }
}

impl TrafficProfile {
    /// - 07–09: 0.8 (morning rush)
    /// - 16–19: 0.9 (evening rush)
    /// - 23–05: 0.2 (night)
    /// - otherwise 0.5
    pub fn standard() -> Self {
        let mut levels = [0.5_f64; 24];
        for (hour, slot) in levels.iter_mut().enumerate() {
            *slot = match hour {
                7..=9 => 0.8,
                16..=19 => 0.9,
                23 | 0..=5 => 0.2,
                _ => 0.5,
            };
        }
        Self {
            hourly_levels: levels,
        }
    }

    pub fn level_at_hour(&self, hour: u32) -> f64 {
        self.hourly_levels[(hour % 24) as usize]
    }
}

/// Weather code passed to the scorer. Only clear weather is known locally.
pub const WEATHER_CLEAR: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharingContext {
    pub time_of_day: u32,
    /// Monday = 0.
    pub day_of_week: u32,
    pub traffic_level: f64,
    pub weather_condition: u32,
}

impl SharingContext {
    /// Context for the wall-clock instant `epoch_ms` (UTC).
    pub fn at(epoch_ms: u64, profile: &TrafficProfile) -> Self {
        let instant = i64::try_from(epoch_ms)
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_default();
        let hour = instant.hour();
        Self {
            time_of_day: hour,
            day_of_week: instant.weekday().num_days_from_monday(),
            traffic_level: profile.level_at_hour(hour),
            weather_condition: WEATHER_CLEAR,
        }
    }
}
