use crate::config::{LinkConfig, TrafficProfile};
use crate::flow::{FiveTuple, FlowId, FlowStats, TransportKind};
use crate::scenario::CongestionVariant;
use crate::trace::{TracePath, WindowSink};
use crate::units::SimTime;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AppId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeContainer(pub Vec<NodeId>);

impl NodeContainer {
    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.0.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.0.iter().copied()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceContainer(pub Vec<DeviceId>);

impl DeviceContainer {
    pub fn get(&self, index: usize) -> Option<DeviceId> {
        self.0.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.0.iter().copied()
    }
}

/// Addresses handed out by `assign_addresses`, in device order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceContainer(pub Vec<(DeviceId, Ipv4Addr)>);

impl InterfaceContainer {
    pub fn address(&self, index: usize) -> Option<Ipv4Addr> {
        self.0.get(index).map(|(_, addr)| *addr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltReason {
    /// A `CancelToken` was tripped.
    Cancelled,
    /// Events kept firing without simulated time advancing.
    Stalled,
}

/// How a call to [`SimulationEngine::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Completed { at: SimTime },
    Halted { at: SimTime, reason: HaltReason },
}

impl RunOutcome {
    pub fn reached(&self) -> SimTime {
        match self {
            RunOutcome::Completed { at } | RunOutcome::Halted { at, .. } => *at,
        }
    }
}

/// Shared early-stop request. Engines poll it between events, so it may be
/// tripped from a window sink while a run is in progress.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid topology: {0}")]
    InvalidTopology(String),
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),
    #[error("unknown device {0:?}")]
    UnknownDevice(DeviceId),
    #[error("unknown application {0:?}")]
    UnknownApp(AppId),
    #[error("node {0:?} has no internet stack installed")]
    StackMissing(NodeId),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("engine session already active")]
    SessionBusy,
    #[error("engine has been destroyed")]
    Destroyed,
    #[error("engine fault: {0}")]
    Fault(String),
}

/// Operations the harness needs from a simulation engine. One engine value
/// holds the whole mutable state of one simulation; callbacks fire on the
/// thread that calls [`SimulationEngine::run`].
pub trait SimulationEngine {
    fn create_nodes(&mut self, count: usize) -> Result<NodeContainer, EngineError>;

    fn install_stack(&mut self, nodes: &NodeContainer) -> Result<(), EngineError>;

    /// Connects the first two nodes of `nodes` with a point-to-point link and
    /// returns one device per node.
    fn create_link(
        &mut self,
        nodes: &NodeContainer,
        link: &LinkConfig,
    ) -> Result<DeviceContainer, EngineError>;

    fn assign_addresses(
        &mut self,
        devices: &DeviceContainer,
        base: Ipv4Addr,
        mask: Ipv4Addr,
    ) -> Result<InterfaceContainer, EngineError>;

    fn populate_routing_tables(&mut self) -> Result<(), EngineError>;

    /// Selects the algorithm used by TCP sockets created after this call.
    fn set_congestion_control(&mut self, variant: CongestionVariant) -> Result<(), EngineError>;

    fn install_receiver(
        &mut self,
        node: NodeId,
        protocol: TransportKind,
        local: SocketAddrV4,
    ) -> Result<AppId, EngineError>;

    fn install_sender(
        &mut self,
        node: NodeId,
        protocol: TransportKind,
        remote: SocketAddrV4,
        traffic: &TrafficProfile,
    ) -> Result<AppId, EngineError>;

    fn schedule_app(&mut self, app: AppId, start: SimTime, stop: SimTime) -> Result<(), EngineError>;

    /// Attaches `sink` to the window at `path`. The socket does not need to
    /// exist yet; the subscription binds when it is created.
    fn subscribe_window_changes(
        &mut self,
        path: &TracePath,
        sink: Box<dyn WindowSink>,
    ) -> Result<SubscriptionId, EngineError>;

    /// Detaches a subscription and hands the sink back.
    fn unsubscribe(&mut self, id: SubscriptionId) -> Option<Box<dyn WindowSink>>;

    fn install_flow_monitor(&mut self) -> Result<(), EngineError>;

    /// Advances simulated time until `stop` or until the cancel token trips.
    /// An engine with nothing left to do idles until `stop`.
    fn run(&mut self, stop: SimTime, cancel: &CancelToken) -> Result<RunOutcome, EngineError>;

    /// Finalizes loss accounting: packets still in flight are counted lost.
    fn check_for_lost_packets(&mut self);

    fn flow_stats(&self) -> Vec<(FlowId, FlowStats)>;

    fn classify(&self, flow: FlowId) -> Option<FiveTuple>;

    /// Releases every per-run object. The engine is unusable afterwards.
    fn destroy(&mut self);
}

/// Creates a fresh engine for each session.
pub trait EngineFactory {
    type Engine: SimulationEngine;

    fn create(&self, seed: u64) -> Result<Self::Engine, EngineError>;
}
