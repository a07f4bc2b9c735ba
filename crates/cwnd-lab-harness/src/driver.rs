use crate::collector::FlowStatsCollector;
use crate::error::HarnessError;
use crate::recorder::TraceRecorder;
use crate::session::{EngineSession, SessionGate};
use cwnd_lab_abstract::{
    CancelToken, CongestionVariant, CongestionWindowSample, EngineError, EngineFactory, FiveTuple,
    FlowRecord, InterfaceContainer, NodeContainer, RunOutcome, ScenarioDescriptor, ScenarioId, SimTime,
    SimulationEngine, SubscriptionId, TracePath, TransportKind,
};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::{debug, info};

const SENDER: usize = 0;
const RECEIVER: usize = 1;

/// Everything one run produced, before analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRunResult {
    pub scenario: ScenarioId,
    pub variant: CongestionVariant,
    pub samples: Vec<CongestionWindowSample>,
    pub flows: BTreeMap<FiveTuple, FlowRecord>,
    pub outcome: RunOutcome,
    /// Declared stop time of the scenario.
    pub stop: SimTime,
}

impl RawRunResult {
    pub fn is_complete(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed { .. })
    }
}

/// A freshly built topology inside its own engine session. Runs once.
pub struct TopologyHandle<E: SimulationEngine> {
    scenario: ScenarioId,
    session: EngineSession<E>,
    nodes: NodeContainer,
    interfaces: InterfaceContainer,
    subscriptions: Vec<SubscriptionId>,
    used: bool,
}

impl<E: SimulationEngine> TopologyHandle<E> {
    pub fn scenario(&self) -> &ScenarioId {
        &self.scenario
    }

    pub fn interfaces(&self) -> &InterfaceContainer {
        &self.interfaces
    }

    fn unsubscribe_all(&mut self) {
        for id in self.subscriptions.drain(..) {
            if self.session.engine().unsubscribe(id).is_some() {
                debug!("released window subscription {:?}", id);
            }
        }
    }
}

/// Owns the lifecycle of one engine per scenario: build, run, tear down.
pub struct SimulationDriver<F: EngineFactory> {
    factory: F,
    gate: SessionGate,
}

impl<F: EngineFactory> SimulationDriver<F> {
    pub fn new(factory: F) -> Self {
        Self::with_gate(factory, SessionGate::new())
    }

    /// Shares `gate` with other drivers driving the same engine.
    pub fn with_gate(factory: F, gate: SessionGate) -> Self {
        Self { factory, gate }
    }

    pub fn gate(&self) -> &SessionGate {
        &self.gate
    }

    /// Opens a session and builds the scenario's topology from scratch.
    pub fn build_topology(
        &self,
        descriptor: &ScenarioDescriptor,
    ) -> Result<TopologyHandle<F::Engine>, HarnessError> {
        let id = &descriptor.id;
        descriptor
            .validate()
            .map_err(|e| HarnessError::configuration(id, e))?;

        let mut session = self
            .gate
            .open(&self.factory, descriptor.seed)
            .map_err(|e| HarnessError::engine(id, e))?;
        let engine = session.engine();
        let wrap = |e: EngineError| HarnessError::from_engine(id, e);

        let nodes = engine.create_nodes(descriptor.node_count).map_err(wrap)?;
        engine.install_stack(&nodes).map_err(wrap)?;
        let devices = engine.create_link(&nodes, &descriptor.link).map_err(wrap)?;
        let interfaces = engine
            .assign_addresses(&devices, descriptor.addressing.base, descriptor.addressing.mask)
            .map_err(wrap)?;
        engine.populate_routing_tables().map_err(wrap)?;
        engine
            .set_congestion_control(descriptor.variant)
            .map_err(wrap)?;

        info!(
            "scenario {}: built {} / {} link, {}",
            id, descriptor.link.bandwidth, descriptor.link.delay, descriptor.variant
        );
        Ok(TopologyHandle {
            scenario: id.clone(),
            session,
            nodes,
            interfaces,
            subscriptions: Vec::new(),
            used: false,
        })
    }

    /// Installs traffic, runs to the declared stop time and snapshots the
    /// counters. A run that halts early yields
    /// [`HarnessError::IncompleteRun`] carrying the partial result.
    pub fn run_scenario(
        &self,
        handle: &mut TopologyHandle<F::Engine>,
        descriptor: &ScenarioDescriptor,
        recorder: &TraceRecorder,
        collector: &mut FlowStatsCollector,
        cancel: &CancelToken,
    ) -> Result<RawRunResult, HarnessError> {
        let id = &descriptor.id;
        if handle.scenario != *id {
            return Err(HarnessError::configuration(
                id,
                format!("topology handle was built for scenario {}", handle.scenario),
            ));
        }
        if handle.used {
            return Err(HarnessError::configuration(
                id,
                "topology handle already ran; rebuild it from the descriptor",
            ));
        }
        handle.used = true;

        let wrap = |e: EngineError| HarnessError::from_engine(id, e);
        let (Some(sender), Some(receiver), Some(sink_ip)) = (
            handle.nodes.get(SENDER),
            handle.nodes.get(RECEIVER),
            handle.interfaces.address(RECEIVER),
        ) else {
            return Err(HarnessError::engine(id, "topology is missing its receiver"));
        };
        let traffic = &descriptor.traffic;
        let stop = descriptor.stop_time();
        let engine = handle.session.engine();

        let rx = engine
            .install_receiver(
                receiver,
                traffic.protocol,
                SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, traffic.port),
            )
            .map_err(wrap)?;
        engine.schedule_app(rx, SimTime::ZERO, stop).map_err(wrap)?;
        let tx = engine
            .install_sender(
                sender,
                traffic.protocol,
                SocketAddrV4::new(sink_ip, traffic.port),
                traffic,
            )
            .map_err(wrap)?;
        engine
            .schedule_app(tx, traffic.sender_start, stop)
            .map_err(wrap)?;
        collector.install(engine).map_err(wrap)?;

        if traffic.protocol == TransportKind::Tcp {
            // The sender's socket is the first one created on its node.
            let path = TracePath::congestion_window(sender.0, 0);
            let sub = engine
                .subscribe_window_changes(&path, recorder.sink())
                .map_err(wrap)?;
            handle.subscriptions.push(sub);
            debug!("scenario {}: tracing {}", id, path);
        }

        info!("scenario {}: running until {}", id, stop);
        let outcome = handle.session.engine().run(stop, cancel).map_err(wrap)?;
        handle.unsubscribe_all();

        let samples = recorder
            .finish()
            .map_err(|e| HarnessError::engine(id, e))?;
        let flows = collector
            .snapshot(handle.session.engine())
            .map_err(|e| HarnessError::engine(id, e))?;

        let raw = RawRunResult {
            scenario: id.clone(),
            variant: descriptor.variant,
            samples,
            flows,
            outcome,
            stop,
        };
        match outcome {
            RunOutcome::Completed { .. } => Ok(raw),
            RunOutcome::Halted { at, reason } => {
                info!("scenario {}: halted at {} ({:?})", id, at, reason);
                Err(HarnessError::IncompleteRun {
                    scenario: id.clone(),
                    reached: at,
                    stop,
                    partial: Box::new(raw),
                })
            }
        }
    }

    /// Releases leftover subscriptions, destroys engine state and frees the
    /// session slot.
    pub fn teardown(&self, mut handle: TopologyHandle<F::Engine>) {
        handle.unsubscribe_all();
        debug!("scenario {}: teardown", handle.scenario);
        handle.session.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::testing::{Script, ScriptedFactory, sample, stats, tuple};
    use cwnd_lab_abstract::HaltReason;

    fn script() -> Script {
        Script {
            samples: vec![
                sample(1000, 0, 10_000),
                sample(1020, 10_000, 11_000),
                sample(2000, 11_000, 5_500),
            ],
            flows: vec![(tuple(49153), stats(104_000))],
            ..Script::default()
        }
    }

    fn run_once(
        driver: &SimulationDriver<ScriptedFactory>,
        descriptor: &ScenarioDescriptor,
    ) -> Result<RawRunResult, HarnessError> {
        let mut handle = driver.build_topology(descriptor)?;
        let result = driver.run_scenario(
            &mut handle,
            descriptor,
            &TraceRecorder::new(),
            &mut FlowStatsCollector::new(),
            &CancelToken::new(),
        );
        driver.teardown(handle);
        result
    }

    #[test]
    fn runs_scenario_end_to_end() {
        let driver = SimulationDriver::new(ScriptedFactory::new(script()));
        let descriptor = ScenarioDescriptor::new("base");
        let raw = run_once(&driver, &descriptor).unwrap();

        assert!(raw.is_complete());
        assert_eq!(raw.samples.len(), 3);
        assert_eq!(raw.flows[&tuple(49153)].rx_bytes, 104_000);
        assert!(!driver.gate().is_busy());

        let calls = driver.factory.calls();
        let pos = |op| calls.iter().position(|c| *c == op).unwrap();
        assert!(pos("set_congestion_control") < pos("install_receiver"));
        assert!(pos("subscribe") < pos("run"));
        assert!(pos("run") < pos("unsubscribe"));
        assert_eq!(calls.last(), Some(&"destroy"));
    }

    #[test]
    fn handle_runs_only_once_and_only_for_its_scenario() {
        let driver = SimulationDriver::new(ScriptedFactory::new(script()));
        let a = ScenarioDescriptor::new("a");
        let b = ScenarioDescriptor::new("b");
        let mut handle = driver.build_topology(&a).unwrap();
        assert_eq!(handle.scenario(), &a.id);
        assert_eq!(handle.interfaces().address(1), Some(Ipv4Addr::new(10, 1, 1, 2)));

        let wrong = driver.run_scenario(
            &mut handle,
            &b,
            &TraceRecorder::new(),
            &mut FlowStatsCollector::new(),
            &CancelToken::new(),
        );
        assert_eq!(wrong.unwrap_err().kind(), FailureKind::Configuration);

        let first = driver.run_scenario(
            &mut handle,
            &a,
            &TraceRecorder::new(),
            &mut FlowStatsCollector::new(),
            &CancelToken::new(),
        );
        assert!(first.is_ok());
        let again = driver.run_scenario(
            &mut handle,
            &a,
            &TraceRecorder::new(),
            &mut FlowStatsCollector::new(),
            &CancelToken::new(),
        );
        assert_eq!(again.unwrap_err().kind(), FailureKind::Configuration);
        driver.teardown(handle);
    }

    #[test]
    fn early_halt_carries_partial_result() {
        let driver = SimulationDriver::new(ScriptedFactory::new(Script {
            halt_at: Some(SimTime::from_millis(1500)),
            ..script()
        }));
        let err = run_once(&driver, &ScenarioDescriptor::new("short")).unwrap_err();
        match err {
            HarnessError::IncompleteRun {
                reached,
                stop,
                partial,
                ..
            } => {
                assert_eq!(reached, SimTime::from_millis(1500));
                assert_eq!(stop, SimTime::from_secs(10));
                assert_eq!(partial.samples.len(), 2);
                assert_eq!(
                    partial.outcome,
                    RunOutcome::Halted {
                        at: reached,
                        reason: HaltReason::Stalled
                    }
                );
            }
            other => panic!("expected incomplete run, got {other}"),
        }
        assert!(!driver.gate().is_busy());
    }

    #[test]
    fn engine_errors_are_classified() {
        let overlap = SimulationDriver::new(ScriptedFactory::new(Script {
            fail: Some((
                "assign_addresses",
                EngineError::InvalidTopology("overlapping range".into()),
            )),
            ..script()
        }));
        let err = run_once(&overlap, &ScenarioDescriptor::new("x")).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Configuration);
        assert!(!overlap.gate().is_busy());

        let crash = SimulationDriver::new(ScriptedFactory::new(Script {
            fail: Some(("run", EngineError::Fault("boom".into()))),
            ..script()
        }));
        let err = run_once(&crash, &ScenarioDescriptor::new("x")).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Engine);

        let invalid = ScenarioDescriptor::new("bad id!");
        let err = run_once(&crash, &invalid).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Configuration);
    }

    #[test]
    fn busy_gate_is_an_engine_failure() {
        let gate = SessionGate::new();
        let driver = SimulationDriver::with_gate(ScriptedFactory::new(script()), gate.clone());
        let held = driver.build_topology(&ScenarioDescriptor::new("first")).unwrap();
        let err = driver
            .build_topology(&ScenarioDescriptor::new("second"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), FailureKind::Engine);
        driver.teardown(held);
        assert!(!gate.is_busy());
    }
}
