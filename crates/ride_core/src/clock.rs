use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bevy_ecs::prelude::Resource;

use crate::ecs::RideId;

pub const ONE_SEC_MS: u64 = 1000;
pub const ONE_MIN_MS: u64 = 60 * ONE_SEC_MS;

/// Recurring per-ride timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    DurationTick,
    LocationStep,
    SyncTick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub timestamp: u64,
    /// Insertion order; breaks timestamp ties so same-instant events fire FIFO.
    pub sequence: u64,
    pub kind: TimerKind,
    pub ride_id: RideId,
    /// Arming token; an event whose token no longer matches the armed timer is stale.
    pub token: u64,
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering to make BinaryHeap a min-heap by timestamp.
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The event being processed by the timer schedule.
#[derive(Debug, Clone, Copy, Resource)]
pub struct CurrentEvent(pub Event);

#[derive(Debug, Default, Resource)]
pub struct SimulationClock {
    now: u64,
    next_sequence: u64,
    events: BinaryHeap<Event>,
}

impl SimulationClock {
    pub fn starting_at(now: u64) -> Self {
        Self {
            now,
            ..Self::default()
        }
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    /// Moves the clock forward to `timestamp`. Never moves backwards.
    pub fn advance_to(&mut self, timestamp: u64) {
        self.now = self.now.max(timestamp);
    }

    pub fn schedule_at(&mut self, timestamp: u64, kind: TimerKind, ride_id: RideId, token: u64) {
        let timestamp = timestamp.max(self.now);
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.events.push(Event {
            timestamp,
            sequence,
            kind,
            ride_id,
            token,
        });
    }

    pub fn schedule_in(&mut self, delay_ms: u64, kind: TimerKind, ride_id: RideId, token: u64) {
        self.schedule_at(self.now.saturating_add(delay_ms), kind, ride_id, token);
    }

    pub fn next_event_time(&self) -> Option<u64> {
        self.events.peek().map(|e| e.timestamp)
    }

    pub fn pop_next(&mut self) -> Option<Event> {
        let event = self.events.pop()?;
        self.now = self.now.max(event.timestamp);
        Some(event)
    }

    /// Pops the next event only if it is due at or before `until`.
    pub fn pop_due(&mut self, until: u64) -> Option<Event> {
        match self.next_event_time() {
            Some(ts) if ts <= until => self.pop_next(),
            _ => None,
        }
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earliest_timer_of_any_ride_fires_first() {
        let (a, b) = (RideId::new(), RideId::new());
        let mut clock = SimulationClock::starting_at(1_000);
        clock.schedule_in(2_000, TimerKind::LocationStep, a, 1);
        clock.schedule_in(1_000, TimerKind::DurationTick, b, 2);
        clock.schedule_in(1_000, TimerKind::DurationTick, a, 3);
        assert_eq!(clock.pending_events(), 3);

        let order: Vec<(RideId, u64, u64)> = std::iter::from_fn(|| clock.pop_next())
            .map(|e| (e.ride_id, e.token, e.timestamp))
            .collect();
        assert_eq!(order, vec![(b, 2, 2_000), (a, 3, 2_000), (a, 1, 3_000)]);
        assert_eq!(clock.now(), 3_000);
        assert!(clock.is_empty());
    }

    #[test]
    fn same_instant_events_fire_in_insertion_order() {
        let ride = RideId::new();
        let mut clock = SimulationClock::default();
        clock.schedule_at(1000, TimerKind::SyncTick, ride, 1);
        clock.schedule_at(1000, TimerKind::DurationTick, ride, 2);
        clock.schedule_at(1000, TimerKind::LocationStep, ride, 3);

        let kinds: Vec<_> = std::iter::from_fn(|| clock.pop_next())
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                TimerKind::SyncTick,
                TimerKind::DurationTick,
                TimerKind::LocationStep
            ]
        );
    }

    #[test]
    fn pop_due_respects_the_horizon_and_clock_never_rewinds() {
        let ride = RideId::new();
        let mut clock = SimulationClock::starting_at(100);
        clock.schedule_in(50, TimerKind::DurationTick, ride, 1);
        assert!(clock.pop_due(149).is_none());
        assert_eq!(clock.pop_due(150).map(|e| e.timestamp), Some(150));

        clock.advance_to(120);
        assert_eq!(clock.now(), 150);

        // Past timestamps are clamped to now.
        clock.schedule_at(10, TimerKind::SyncTick, ride, 2);
        assert_eq!(clock.next_event_time(), Some(150));
    }
}
