//! Scripted engine for unit tests: replays canned window samples and flow
//! counters and logs every call it receives.

use cwnd_lab_abstract::{
    AppId, CancelToken, CongestionVariant, CongestionWindowSample, DeviceContainer, DeviceId,
    EngineError, EngineFactory, FiveTuple, FlowId, FlowStats, HaltReason, InterfaceContainer,
    LinkConfig, NodeContainer, NodeId, RunOutcome, SimTime, SimulationEngine, SubscriptionId,
    TracePath, TrafficProfile, TransportKind, WindowSink,
};
use std::cell::RefCell;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::rc::Rc;

pub type CallLog = Rc<RefCell<Vec<&'static str>>>;

#[derive(Debug, Clone, Default)]
pub struct Script {
    pub samples: Vec<CongestionWindowSample>,
    pub flows: Vec<(FiveTuple, FlowStats)>,
    /// The engine stalls here instead of reaching the stop time.
    pub halt_at: Option<SimTime>,
    pub fail: Option<(&'static str, EngineError)>,
    pub unclassified: bool,
    /// Packets `check_for_lost_packets` moves to the first flow's loss count.
    pub lost_on_check: u64,
}

pub fn sample(ms: u64, old: u32, new: u32) -> CongestionWindowSample {
    CongestionWindowSample::new(SimTime::from_millis(ms), old, new)
}

pub fn tuple(source_port: u16) -> FiveTuple {
    FiveTuple {
        source: Ipv4Addr::new(10, 1, 1, 1),
        source_port,
        destination: Ipv4Addr::new(10, 1, 1, 2),
        destination_port: 9,
        protocol: TransportKind::Tcp,
    }
}

pub fn stats(rx_bytes: u64) -> FlowStats {
    FlowStats {
        tx_bytes: rx_bytes,
        rx_bytes,
        tx_packets: rx_bytes / 1040,
        rx_packets: rx_bytes / 1040,
        lost_packets: 0,
    }
}

pub struct ScriptedFactory {
    script: Script,
    calls: CallLog,
}

impl ScriptedFactory {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: CallLog::default(),
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.borrow().clone()
    }
}

impl EngineFactory for ScriptedFactory {
    type Engine = ScriptedEngine;

    fn create(&self, _seed: u64) -> Result<ScriptedEngine, EngineError> {
        Ok(ScriptedEngine {
            script: self.script.clone(),
            calls: self.calls.clone(),
            sinks: Vec::new(),
            next_subscription: 0,
            checked: false,
        })
    }
}

pub struct ScriptedEngine {
    script: Script,
    calls: CallLog,
    sinks: Vec<(SubscriptionId, Box<dyn WindowSink>)>,
    next_subscription: u64,
    checked: bool,
}

impl ScriptedEngine {
    fn call(&mut self, op: &'static str) -> Result<(), EngineError> {
        self.calls.borrow_mut().push(op);
        match &self.script.fail {
            Some((name, err)) if *name == op => Err(err.clone()),
            _ => Ok(()),
        }
    }
}

impl SimulationEngine for ScriptedEngine {
    fn create_nodes(&mut self, count: usize) -> Result<NodeContainer, EngineError> {
        self.call("create_nodes")?;
        Ok(NodeContainer((0..count as u32).map(NodeId).collect()))
    }

    fn install_stack(&mut self, _nodes: &NodeContainer) -> Result<(), EngineError> {
        self.call("install_stack")
    }

    fn create_link(
        &mut self,
        _nodes: &NodeContainer,
        _link: &LinkConfig,
    ) -> Result<DeviceContainer, EngineError> {
        self.call("create_link")?;
        Ok(DeviceContainer(vec![DeviceId(0), DeviceId(1)]))
    }

    fn assign_addresses(
        &mut self,
        devices: &DeviceContainer,
        base: Ipv4Addr,
        _mask: Ipv4Addr,
    ) -> Result<InterfaceContainer, EngineError> {
        self.call("assign_addresses")?;
        let base = u32::from(base);
        Ok(InterfaceContainer(
            devices
                .iter()
                .enumerate()
                .map(|(i, d)| (d, Ipv4Addr::from(base + i as u32 + 1)))
                .collect(),
        ))
    }

    fn populate_routing_tables(&mut self) -> Result<(), EngineError> {
        self.call("populate_routing_tables")
    }

    fn set_congestion_control(&mut self, _variant: CongestionVariant) -> Result<(), EngineError> {
        self.call("set_congestion_control")
    }

    fn install_receiver(
        &mut self,
        _node: NodeId,
        _protocol: TransportKind,
        _local: SocketAddrV4,
    ) -> Result<AppId, EngineError> {
        self.call("install_receiver")?;
        Ok(AppId(0))
    }

    fn install_sender(
        &mut self,
        _node: NodeId,
        _protocol: TransportKind,
        _remote: SocketAddrV4,
        _traffic: &TrafficProfile,
    ) -> Result<AppId, EngineError> {
        self.call("install_sender")?;
        Ok(AppId(1))
    }

    fn schedule_app(&mut self, _app: AppId, _start: SimTime, _stop: SimTime) -> Result<(), EngineError> {
        self.call("schedule_app")
    }

    fn subscribe_window_changes(
        &mut self,
        _path: &TracePath,
        sink: Box<dyn WindowSink>,
    ) -> Result<SubscriptionId, EngineError> {
        self.call("subscribe")?;
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.sinks.push((id, sink));
        Ok(id)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> Option<Box<dyn WindowSink>> {
        self.calls.borrow_mut().push("unsubscribe");
        let pos = self.sinks.iter().position(|(s, _)| *s == id)?;
        Some(self.sinks.remove(pos).1)
    }

    fn install_flow_monitor(&mut self) -> Result<(), EngineError> {
        self.call("install_flow_monitor")
    }

    fn run(&mut self, stop: SimTime, cancel: &CancelToken) -> Result<RunOutcome, EngineError> {
        self.call("run")?;
        let end = self.script.halt_at.map_or(stop, |h| h.min(stop));
        let mut now = SimTime::ZERO;
        for sample in self.script.samples.iter().filter(|s| s.time < end) {
            if cancel.is_cancelled() {
                return Ok(RunOutcome::Halted {
                    at: now,
                    reason: HaltReason::Cancelled,
                });
            }
            now = sample.time;
            for (_, sink) in self.sinks.iter_mut() {
                sink.record_sample(*sample);
            }
        }
        if cancel.is_cancelled() {
            return Ok(RunOutcome::Halted {
                at: now,
                reason: HaltReason::Cancelled,
            });
        }
        if end < stop {
            return Ok(RunOutcome::Halted {
                at: end,
                reason: HaltReason::Stalled,
            });
        }
        Ok(RunOutcome::Completed { at: stop })
    }

    fn check_for_lost_packets(&mut self) {
        self.calls.borrow_mut().push("check_for_lost_packets");
        self.checked = true;
    }

    fn flow_stats(&self) -> Vec<(FlowId, FlowStats)> {
        self.calls.borrow_mut().push("flow_stats");
        self.script
            .flows
            .iter()
            .enumerate()
            .map(|(i, (_, stats))| {
                let mut stats = *stats;
                if i == 0 && self.checked {
                    stats.lost_packets += self.script.lost_on_check;
                }
                (FlowId(i as u32 + 1), stats)
            })
            .collect()
    }

    fn classify(&self, flow: FlowId) -> Option<FiveTuple> {
        if self.script.unclassified {
            return None;
        }
        let idx = (flow.0 as usize).checked_sub(1)?;
        self.script.flows.get(idx).map(|(t, _)| *t)
    }

    fn destroy(&mut self) {
        self.calls.borrow_mut().push("destroy");
        self.sinks.clear();
    }
}
