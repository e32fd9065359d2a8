//! Simulation harness: scenario fixtures, operational seed data and the
//! end-to-end runner.

pub mod runner;
pub mod scenarios;
pub mod seed;

pub use runner::{ScenarioOutcome, ScenarioRunner};
pub use scenarios::{
    approval_gated_hold, builtin_scenarios, contradictory_signals, kjfk_ground_stop, klax_normal,
    missing_metar, Scenario, ScenarioFixture, ScenarioRegistry,
};
pub use seed::{seed_booking_evidence, seed_operational_graph, seed_policies};
