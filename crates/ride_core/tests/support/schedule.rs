#![allow(dead_code)]

use ride_core::ecs::{RideId, RideStatus};
use ride_core::protocol::Outbound;
use ride_core::test_helpers::TestCore;

/// Advances in `step_ms` increments until the ride reaches `status` or
/// `max_ms` have passed, collecting everything published on the way.
pub fn run_until_status(
    core: &mut TestCore,
    ride_id: RideId,
    status: RideStatus,
    step_ms: u64,
    max_ms: u64,
) -> Vec<Outbound> {
    let mut collected = Vec::new();
    let mut waited = 0;
    while core.ride(ride_id).status != status && waited < max_ms {
        core.advance_by(step_ms);
        waited += step_ms;
        collected.extend(core.drain().0);
    }
    collected
}

/// Advances by `total_ms` in `step_ms` increments, collecting messages.
pub fn run_for(core: &mut TestCore, total_ms: u64, step_ms: u64) -> Vec<Outbound> {
    let mut collected = Vec::new();
    let mut waited = 0;
    while waited < total_ms {
        core.advance_by(step_ms);
        waited += step_ms;
        collected.extend(core.drain().0);
    }
    collected
}
