use crate::analysis::LatencyThroughputPoint;
use crate::error::{FailureKind, HarnessError};
use cwnd_lab_abstract::{
    CongestionVariant, CongestionWindowSample, FiveTuple, FlowRecord, ScenarioId, SimTime,
};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Completion {
    Complete,
    /// The engine halted before the declared stop time.
    Incomplete { reached: SimTime },
}

/// Outcome of one scenario. Built once by the orchestrator, read-only after.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    scenario: ScenarioId,
    variant: CongestionVariant,
    #[serde(skip)]
    samples: Vec<CongestionWindowSample>,
    sample_count: usize,
    #[serde(serialize_with = "flows_as_list")]
    flows: BTreeMap<FiveTuple, FlowRecord>,
    reduction_count: usize,
    throughput_mbps: f64,
    latency_throughput: LatencyThroughputPoint,
    completion: Completion,
    trace_path: PathBuf,
}

// JSON object keys must be strings; a list of records keeps the tuple fields.
fn flows_as_list<S: Serializer>(
    flows: &BTreeMap<FiveTuple, FlowRecord>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(flows.values())
}

pub(crate) struct RunResultParts {
    pub scenario: ScenarioId,
    pub variant: CongestionVariant,
    pub samples: Vec<CongestionWindowSample>,
    pub flows: BTreeMap<FiveTuple, FlowRecord>,
    pub reduction_count: usize,
    pub throughput_mbps: f64,
    pub latency_throughput: LatencyThroughputPoint,
    pub completion: Completion,
    pub trace_path: PathBuf,
}

impl RunResult {
    pub(crate) fn new(parts: RunResultParts) -> Self {
        Self {
            sample_count: parts.samples.len(),
            scenario: parts.scenario,
            variant: parts.variant,
            samples: parts.samples,
            flows: parts.flows,
            reduction_count: parts.reduction_count,
            throughput_mbps: parts.throughput_mbps,
            latency_throughput: parts.latency_throughput,
            completion: parts.completion,
            trace_path: parts.trace_path,
        }
    }

    pub fn scenario(&self) -> &ScenarioId {
        &self.scenario
    }

    pub fn variant(&self) -> CongestionVariant {
        self.variant
    }

    pub fn samples(&self) -> &[CongestionWindowSample] {
        &self.samples
    }

    pub fn flows(&self) -> &BTreeMap<FiveTuple, FlowRecord> {
        &self.flows
    }

    pub fn reduction_count(&self) -> usize {
        self.reduction_count
    }

    pub fn throughput_mbps(&self) -> f64 {
        self.throughput_mbps
    }

    pub fn latency_throughput(&self) -> LatencyThroughputPoint {
        self.latency_throughput
    }

    pub fn completion(&self) -> Completion {
        self.completion
    }

    pub fn is_complete(&self) -> bool {
        self.completion == Completion::Complete
    }

    pub fn trace_path(&self) -> &Path {
        &self.trace_path
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub scenario: ScenarioId,
    pub kind: FailureKind,
    pub message: String,
}

impl From<&HarnessError> for FailureRecord {
    fn from(err: &HarnessError) -> Self {
        Self {
            scenario: err.scenario().clone(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Results in execution order, plus what failed and what never ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExperimentReport {
    pub results: Vec<RunResult>,
    pub failures: Vec<FailureRecord>,
    pub skipped: Vec<ScenarioId>,
}

impl ExperimentReport {
    /// Every scenario ran and none failed.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }

    pub fn result(&self, scenario: &ScenarioId) -> Option<&RunResult> {
        self.results.iter().find(|r| r.scenario() == scenario)
    }

    /// One point per scenario, in execution order.
    pub fn latency_throughput_series(&self) -> Vec<LatencyThroughputPoint> {
        self.results.iter().map(RunResult::latency_throughput).collect()
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        let data = self.to_json().map_err(io::Error::other)?;
        fs::write(path, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::latency_throughput_point;
    use crate::testing::{sample, stats, tuple};

    fn result(id: &str, delay_ms: f64, mbps: f64) -> RunResult {
        let mut flows = BTreeMap::new();
        flows.insert(tuple(49153), FlowRecord::new(tuple(49153), &stats(2_080)));
        RunResult::new(RunResultParts {
            scenario: ScenarioId::new(id),
            variant: CongestionVariant::Cubic,
            samples: vec![sample(1000, 0, 10_000)],
            flows,
            reduction_count: 0,
            throughput_mbps: mbps,
            latency_throughput: latency_throughput_point(delay_ms, mbps),
            completion: Completion::Complete,
            trace_path: PathBuf::from(format!("traces/{id}.cwnd")),
        })
    }

    #[test]
    fn json_lists_flows_and_omits_samples() {
        let report = ExperimentReport {
            results: vec![result("a", 2.0, 4.0)],
            failures: vec![],
            skipped: vec![ScenarioId::new("b")],
        };
        assert!(!report.is_complete());
        let json: serde_json::Value = serde_json::from_slice(&report.to_json().unwrap()).unwrap();
        let run = &json["results"][0];
        assert_eq!(run["scenario"], "a");
        assert_eq!(run["variant"], "cubic");
        assert_eq!(run["sample_count"], 1);
        assert!(run.get("samples").is_none());
        assert_eq!(run["flows"][0]["rx_bytes"], 2_080);
        assert_eq!(run["completion"]["status"], "complete");
        assert_eq!(json["skipped"][0], "b");
    }

    #[test]
    fn series_follows_execution_order() {
        let report = ExperimentReport {
            results: vec![result("slow", 50.0, 1.5), result("fast", 2.0, 4.0)],
            ..ExperimentReport::default()
        };
        let series = report.latency_throughput_series();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].delay_ms, 50.0);
        assert_eq!(report.result(&ScenarioId::new("fast")).unwrap().throughput_mbps(), 4.0);
        assert!(report.is_complete());
    }
}
