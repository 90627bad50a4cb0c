//! Per-ride timer service.
//!
//! Every recurring timer is keyed by `(ride, kind)` and carries a token. The
//! clock only holds `(timestamp, token)` entries; cancelling a timer drops the
//! key, which turns whatever is still queued into a stale event the runner
//! discards.

use std::collections::HashMap;

use bevy_ecs::prelude::Resource;
use serde::{Deserialize, Serialize};

use crate::clock::{Event, SimulationClock, TimerKind};
use crate::ecs::RideId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimerConfig {
    pub duration_tick_ms: u64,
    pub sync_tick_ms: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            duration_tick_ms: 1000,
            sync_tick_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ArmedTimer {
    token: u64,
    interval_ms: u64,
}

#[derive(Debug, Default, Resource)]
pub struct RideTimers {
    armed: HashMap<(RideId, TimerKind), ArmedTimer>,
    next_token: u64,
    started_total: u64,
    cancelled_total: u64,
}

impl RideTimers {
    /// Arms a recurring timer firing every `interval_ms`. Returns false (and
    /// changes nothing) when the timer is already running.
    pub fn start(
        &mut self,
        clock: &mut SimulationClock,
        ride_id: RideId,
        kind: TimerKind,
        interval_ms: u64,
    ) -> bool {
        if self.armed.contains_key(&(ride_id, kind)) {
            return false;
        }
        self.next_token += 1;
        let token = self.next_token;
        let interval_ms = interval_ms.max(1);
        self.armed
            .insert((ride_id, kind), ArmedTimer { token, interval_ms });
        clock.schedule_in(interval_ms, kind, ride_id, token);
        self.started_total += 1;
        true
    }

    /// Cancels one timer. Cancelling a timer that is not armed is a no-op.
    pub fn cancel(&mut self, ride_id: RideId, kind: TimerKind) -> bool {
        let removed = self.armed.remove(&(ride_id, kind)).is_some();
        if removed {
            self.cancelled_total += 1;
        }
        removed
    }

    /// Cancels every timer attached to `ride_id`; returns how many were armed.
    pub fn cancel_all(&mut self, ride_id: RideId) -> usize {
        [
            TimerKind::DurationTick,
            TimerKind::LocationStep,
            TimerKind::SyncTick,
        ]
        .into_iter()
        .filter(|kind| self.cancel(ride_id, *kind))
        .count()
    }

    pub fn is_armed(&self, ride_id: RideId, kind: TimerKind) -> bool {
        self.armed.contains_key(&(ride_id, kind))
    }

    /// True when `event` belongs to the timer currently armed for its key.
    pub fn is_current(&self, event: &Event) -> bool {
        self.armed
            .get(&(event.ride_id, event.kind))
            .is_some_and(|t| t.token == event.token)
    }

    /// Interval to re-arm `event` with, if its timer is still armed.
    pub fn rearm_interval(&self, event: &Event) -> Option<u64> {
        self.armed
            .get(&(event.ride_id, event.kind))
            .filter(|t| t.token == event.token)
            .map(|t| t.interval_ms)
    }

    pub fn armed_for(&self, ride_id: RideId) -> usize {
        self.armed.keys().filter(|(id, _)| *id == ride_id).count()
    }

    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }

    pub fn started_total(&self) -> u64 {
        self.started_total
    }

    pub fn cancelled_total(&self) -> u64 {
        self.cancelled_total
    }
}
