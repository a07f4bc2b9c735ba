use crate::analysis::{latency_throughput_point, reduction_count, throughput_mbps};
use crate::collector::FlowStatsCollector;
use crate::driver::SimulationDriver;
use crate::error::{FailureKind, HarnessError};
use crate::recorder::TraceRecorder;
use crate::report::{Completion, ExperimentReport, FailureRecord, RunResult, RunResultParts};
use crate::trace_file::TraceStore;
use cwnd_lab_abstract::{CancelToken, EngineFactory, RunOutcome, ScenarioDescriptor, ScenarioId};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Where the orchestrator is in the lifecycle of the current scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Building,
    Running,
    Collecting,
    Analyzing,
    Failed { scenario: ScenarioId, cause: String },
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Idle => write!(f, "Idle"),
            RunPhase::Building => write!(f, "Building"),
            RunPhase::Running => write!(f, "Running"),
            RunPhase::Collecting => write!(f, "Collecting"),
            RunPhase::Analyzing => write!(f, "Analyzing"),
            RunPhase::Failed { scenario, .. } => write!(f, "Failed({scenario})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub trace_dir: PathBuf,
    /// Keep going after a run halts before its stop time.
    pub tolerate_incomplete: bool,
    /// Stop each run early once this many window samples were recorded.
    pub sample_limit: Option<usize>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            trace_dir: PathBuf::from("traces"),
            tolerate_incomplete: false,
            sample_limit: None,
        }
    }
}

/// Runs scenarios one after another, each against a freshly built engine,
/// and assembles the report.
pub struct ExperimentOrchestrator<F: EngineFactory> {
    driver: SimulationDriver<F>,
    store: TraceStore,
    config: OrchestratorConfig,
    cancel: CancelToken,
    phase: RunPhase,
    transitions: Vec<RunPhase>,
}

impl<F: EngineFactory> ExperimentOrchestrator<F> {
    pub fn new(factory: F, config: OrchestratorConfig) -> Self {
        Self::with_driver(SimulationDriver::new(factory), config)
    }

    pub fn with_driver(driver: SimulationDriver<F>, config: OrchestratorConfig) -> Self {
        Self {
            driver,
            store: TraceStore::new(config.trace_dir.clone()),
            config,
            cancel: CancelToken::new(),
            phase: RunPhase::Idle,
            transitions: Vec::new(),
        }
    }

    pub fn phase(&self) -> &RunPhase {
        &self.phase
    }

    /// Every phase entered so far, oldest first.
    pub fn transitions(&self) -> &[RunPhase] {
        &self.transitions
    }

    /// Token checked by the engine between events. Reset before each
    /// scenario, so a cancellation only affects the scenario in progress.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn run(&mut self, scenarios: &[ScenarioDescriptor]) -> ExperimentReport {
        let mut report = ExperimentReport::default();
        let mut seen = HashSet::new();
        info!("experiment: {} scenario(s)", scenarios.len());

        for (idx, descriptor) in scenarios.iter().enumerate() {
            let id = &descriptor.id;
            self.cancel.reset();
            let outcome = if seen.insert(id.clone()) {
                self.execute(descriptor)
            } else {
                Err(HarnessError::configuration(id, "duplicate scenario id"))
            };

            let abort = match outcome {
                Ok(result) => {
                    let completion = result.completion();
                    report.results.push(result);
                    match completion {
                        Completion::Incomplete { reached } if !self.config.tolerate_incomplete => {
                            let message = format!(
                                "scenario {id}: run halted at {reached}, before its stop time {}",
                                descriptor.stop_time()
                            );
                            self.fail(id, &message);
                            report.failures.push(FailureRecord {
                                scenario: id.clone(),
                                kind: FailureKind::IncompleteRun,
                                message,
                            });
                            true
                        }
                        Completion::Incomplete { reached } => {
                            warn!("scenario {}: incomplete at {}, continuing", id, reached);
                            false
                        }
                        Completion::Complete => false,
                    }
                }
                Err(err) => {
                    self.fail(id, &err.to_string());
                    report.failures.push(FailureRecord::from(&err));
                    matches!(err.kind(), FailureKind::Configuration | FailureKind::Engine)
                }
            };
            self.transition(RunPhase::Idle);

            if abort {
                let rest = &scenarios[idx + 1..];
                if !rest.is_empty() {
                    warn!("aborting experiment, skipping {} scenario(s)", rest.len());
                }
                report.skipped.extend(rest.iter().map(|d| d.id.clone()));
                break;
            }
        }

        info!(
            "experiment finished: {} result(s), {} failure(s), {} skipped",
            report.results.len(),
            report.failures.len(),
            report.skipped.len()
        );
        report
    }

    fn execute(&mut self, descriptor: &ScenarioDescriptor) -> Result<RunResult, HarnessError> {
        let id = &descriptor.id;

        self.transition(RunPhase::Building);
        let mut handle = self.driver.build_topology(descriptor)?;

        self.transition(RunPhase::Running);
        let mut recorder = TraceRecorder::new();
        if let Some(limit) = self.config.sample_limit {
            recorder = recorder.stop_after(limit, self.cancel.clone());
        }
        let mut collector = FlowStatsCollector::new();
        let run = self.driver.run_scenario(
            &mut handle,
            descriptor,
            &recorder,
            &mut collector,
            &self.cancel,
        );
        self.driver.teardown(handle);
        let raw = match run {
            Ok(raw) => raw,
            Err(HarnessError::IncompleteRun { partial, .. }) => *partial,
            Err(err) => return Err(err),
        };

        self.transition(RunPhase::Collecting);
        let trace_path = self
            .store
            .write(id, &raw.samples)
            .map_err(|e| HarnessError::analysis(id, e))?;
        debug!("scenario {}: {} samples -> {}", id, raw.samples.len(), trace_path.display());

        self.transition(RunPhase::Analyzing);
        let samples = TraceStore::read(&trace_path).map_err(|e| HarnessError::analysis(id, e))?;
        let (completion, measured) = match raw.outcome {
            RunOutcome::Completed { .. } => (Completion::Complete, descriptor.duration),
            RunOutcome::Halted { at, .. } => (Completion::Incomplete { reached: at }, at),
        };
        let throughput = throughput_mbps(raw.flows.values(), measured.as_secs_f64())
            .map_err(|e| HarnessError::analysis(id, e))?;
        let reductions = reduction_count(&samples);
        info!(
            "scenario {}: {} reductions, {:.3} Mbps",
            id, reductions, throughput
        );

        Ok(RunResult::new(RunResultParts {
            scenario: id.clone(),
            variant: raw.variant,
            samples,
            flows: raw.flows,
            reduction_count: reductions,
            throughput_mbps: throughput,
            latency_throughput: latency_throughput_point(descriptor.delay_ms(), throughput),
            completion,
            trace_path,
        }))
    }

    fn transition(&mut self, next: RunPhase) {
        debug!("phase {} -> {}", self.phase, next);
        self.phase = next.clone();
        self.transitions.push(next);
    }

    fn fail(&mut self, scenario: &ScenarioId, cause: &str) {
        warn!("{}", cause);
        self.transition(RunPhase::Failed {
            scenario: scenario.clone(),
            cause: cause.to_string(),
        });
    }
}
