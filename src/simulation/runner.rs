//! Scenario runner.
//!
//! Drives a full case end-to-end against a scenario registry with a
//! whole-run ceiling. Simulation runs bypass the evidence cache by
//! construction (the scenario registry reports itself as simulation).

use crate::engine::{CaseRunOptions, Engine};
use crate::error::{Error, Result};
use crate::graph::types::CaseType;
use crate::orchestrator::RunSummary;
use crate::simulation::scenarios::{Scenario, ScenarioRegistry};
use crate::simulation::seed::{seed_booking_evidence, seed_operational_graph, seed_policies};
use serde_json::json;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Outcome of one scenario run.
#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub scenario: String,
    pub case_id: Uuid,
    pub summary: RunSummary,
}

/// Runs scenarios against an engine.
pub struct ScenarioRunner<'a> {
    engine: &'a Engine,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Run one scenario to completion under the simulation ceiling.
    pub async fn run(&self, scenario: &Scenario) -> Result<ScenarioOutcome> {
        info!(scenario = %scenario.name, airport = %scenario.icao, "scenario started");

        seed_policies(self.engine.store())?;
        if scenario.seed_operational {
            seed_operational_graph(self.engine.store(), &scenario.icao)?;
        }

        let case_id = self
            .engine
            .create_case(CaseType::AirportDisruption, json!({"airport": scenario.icao}))?;

        if scenario.seed_booking_evidence {
            seed_booking_evidence(self.engine.store(), case_id, &scenario.icao)?;
        }

        let registry = ScenarioRegistry::for_scenario(scenario);
        let ceiling = Duration::from_secs(self.engine.config().simulation_ceiling_secs);
        let summary = tokio::time::timeout(
            ceiling,
            self.engine.run_case(
                case_id,
                CaseRunOptions {
                    use_playbook: false,
                    registry_override: Some(&registry),
                    cancel: None,
                },
            ),
        )
        .await
        .map_err(|_| Error::budget_exceeded(format!("simulation ceiling {}s", ceiling.as_secs())))??;

        info!(
            scenario = %scenario.name,
            status = %summary.status,
            posture = ?summary.posture,
            "scenario finished"
        );
        Ok(ScenarioOutcome {
            scenario: scenario.name.clone(),
            case_id,
            summary,
        })
    }
}
