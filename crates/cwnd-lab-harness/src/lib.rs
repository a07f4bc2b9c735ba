//! Experiment harness for congestion-window studies: builds each scenario on
//! a fresh engine, records the sender's window trace, collects per-flow
//! counters and reduces them to comparable metrics.

pub mod analysis;
pub mod collector;
pub mod config;
pub mod driver;
pub mod error;
pub mod orchestrator;
pub mod plot;
pub mod recorder;
pub mod report;
pub mod session;
pub mod trace_file;

#[cfg(test)]
mod testing;

pub use analysis::{AnalysisError, LatencyThroughputPoint};
pub use collector::{CollectError, FlowStatsCollector};
pub use config::{ConfigError, ExperimentFile};
pub use driver::{RawRunResult, SimulationDriver, TopologyHandle};
pub use error::{FailureKind, HarnessError};
pub use orchestrator::{ExperimentOrchestrator, OrchestratorConfig, RunPhase};
pub use plot::{ChartSpec, GnuplotScript, PlotError, PlotSink, Series, SeriesStyle};
pub use recorder::{OutOfOrderSamples, TraceRecorder};
pub use report::{Completion, ExperimentReport, FailureRecord, RunResult};
pub use session::{EngineSession, SessionGate};
pub use trace_file::{TraceFileError, TraceStore};
