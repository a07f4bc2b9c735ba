use crate::driver::RawRunResult;
use cwnd_lab_abstract::{EngineError, ScenarioId, SimTime};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("scenario {scenario}: configuration error: {cause}")]
    Configuration { scenario: ScenarioId, cause: String },

    #[error("scenario {scenario}: engine failure: {cause}")]
    Engine { scenario: ScenarioId, cause: String },

    #[error("scenario {scenario}: run halted at {reached}, before its stop time {stop}")]
    IncompleteRun {
        scenario: ScenarioId,
        reached: SimTime,
        stop: SimTime,
        partial: Box<RawRunResult>,
    },

    #[error("scenario {scenario}: analysis failed: {cause}")]
    Analysis { scenario: ScenarioId, cause: String },
}

/// Failure category, as recorded in a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    Engine,
    IncompleteRun,
    Analysis,
}

impl HarnessError {
    pub fn configuration(scenario: &ScenarioId, cause: impl ToString) -> Self {
        HarnessError::Configuration {
            scenario: scenario.clone(),
            cause: cause.to_string(),
        }
    }

    pub fn engine(scenario: &ScenarioId, cause: impl ToString) -> Self {
        HarnessError::Engine {
            scenario: scenario.clone(),
            cause: cause.to_string(),
        }
    }

    pub fn analysis(scenario: &ScenarioId, cause: impl ToString) -> Self {
        HarnessError::Analysis {
            scenario: scenario.clone(),
            cause: cause.to_string(),
        }
    }

    /// Topology mistakes are the caller's configuration; everything else the
    /// engine reports is an engine failure.
    pub fn from_engine(scenario: &ScenarioId, err: EngineError) -> Self {
        match err {
            EngineError::InvalidTopology(_) => Self::configuration(scenario, err),
            other => Self::engine(scenario, other),
        }
    }

    pub fn scenario(&self) -> &ScenarioId {
        match self {
            HarnessError::Configuration { scenario, .. }
            | HarnessError::Engine { scenario, .. }
            | HarnessError::IncompleteRun { scenario, .. }
            | HarnessError::Analysis { scenario, .. } => scenario,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            HarnessError::Configuration { .. } => FailureKind::Configuration,
            HarnessError::Engine { .. } => FailureKind::Engine,
            HarnessError::IncompleteRun { .. } => FailureKind::IncompleteRun,
            HarnessError::Analysis { .. } => FailureKind::Analysis,
        }
    }
}
