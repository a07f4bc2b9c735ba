pub mod config;
pub mod flow;
pub mod interface;
pub mod scenario;
pub mod trace;
pub mod units;

pub use config::{AddressPlan, LinkConfig, RatePattern, TrafficProfile};
pub use flow::{FiveTuple, FlowId, FlowRecord, FlowStats, TransportKind};
pub use interface::{
    AppId, CancelToken, DeviceContainer, DeviceId, EngineError, EngineFactory, HaltReason,
    InterfaceContainer, NodeContainer, NodeId, RunOutcome, SimulationEngine, SubscriptionId,
};
pub use scenario::{
    CongestionVariant, InvalidScenario, POINT_TO_POINT_NODES, ScenarioDescriptor, ScenarioId,
};
pub use trace::{CongestionWindowSample, TracePath, WindowSink};
pub use units::{DataRate, SimTime, UnitParseError};
