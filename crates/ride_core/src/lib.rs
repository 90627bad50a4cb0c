pub mod api;
pub mod clock;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod ecs;
pub mod error;
pub mod pricing;
pub mod protocol;
pub mod registry;
pub mod routing;
pub mod runner;
pub mod scoring;
pub mod sharing;
pub mod simulation;
pub mod spatial;
pub mod stats;
pub mod store;
pub mod systems;
pub mod timers;
pub mod traffic;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
