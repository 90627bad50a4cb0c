//! Performance benchmarks for ride_core using Criterion.rs.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ride_core::commands::Command;
use ride_core::ecs::{ConnectionId, DriverId};
use ride_core::routing::{DistanceProvider, HaversineDistanceProvider};
use ride_core::scoring::HeuristicScorer;
use ride_core::sharing::{evaluate, SharingConfig, SharingProposal};
use ride_core::test_helpers::{ride_spec, sharing_candidate, TestCore, PICKUP, SHARED_PICKUP};
use ride_core::traffic::{SharingContext, TrafficProfile};

fn city(drivers: usize) -> (TestCore, Vec<ride_core::ecs::RideId>) {
    let mut core = TestCore::new();
    let mut rides = Vec::with_capacity(drivers);
    for d in 0..drivers {
        core.driver_online(&format!("d{d}"), &format!("driver-{d}"));
        let ride_id = core.request(ride_spec(&format!("r{d}")), &format!("rider-{d}"));
        core.handle(
            Some(ConnectionId::from(format!("driver-{d}"))),
            Command::AcceptRide {
                ride_id,
                driver_id: DriverId::from(format!("d{d}")),
            },
        )
        .expect("accept");
        rides.push(ride_id);
    }
    core.drain();
    (core, rides)
}

fn bench_ride_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("ride_lifecycle");
    for drivers in [10usize, 100, 500] {
        group.bench_with_input(BenchmarkId::from_parameter(drivers), &drivers, |b, &drivers| {
            b.iter(|| {
                let (mut core, _) = city(drivers);
                let mut events = 0;
                for _ in 0..60 {
                    events += core.advance_secs(1);
                    core.drain();
                }
                black_box(events)
            });
        });
    }
    group.finish();
}

fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("ride_request_broadcast");
    for drivers in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(drivers), &drivers, |b, &drivers| {
            let mut core = TestCore::new();
            for d in 0..drivers {
                core.driver_online(&format!("d{d}"), &format!("driver-{d}"));
            }
            b.iter(|| {
                core.request(ride_spec("r"), "rider");
                black_box(core.drain())
            });
        });
    }
    group.finish();
}

fn bench_sharing_evaluation(c: &mut Criterion) {
    let (core, rides) = city(1);
    let ride = core.ride(rides[0]);
    let context = SharingContext::at(core.now, &TrafficProfile::standard());
    let proposal = SharingProposal::new(&ride, sharing_candidate("r2"), None, context, core.now);
    let distances = HaversineDistanceProvider::default();
    let sharing = SharingConfig::default();
    let scorer = HeuristicScorer {
        config: sharing.clone(),
    };
    let pricing = core.core.config().pricing.clone();

    c.bench_function("sharing_evaluate", |b| {
        b.iter(|| black_box(evaluate(&distances, &scorer, &proposal, &sharing, &pricing)))
    });
    c.bench_function("haversine_route", |b| {
        b.iter(|| black_box(distances.route(&[PICKUP, SHARED_PICKUP])))
    });
}

criterion_group!(benches, bench_ride_lifecycle, bench_broadcast, bench_sharing_evaluation);
criterion_main!(benches);
