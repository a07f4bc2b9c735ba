//! Reference point-to-point engine for the cwnd-lab harness.
//!
//! Two nodes, one link, a small TCP/UDP stack and a flow monitor, driven by
//! a binary-heap event queue. Enough to reproduce the window dynamics of the
//! lab experiments; not a general-purpose network simulator.

mod app;
pub mod congestion;
pub mod engine;
mod flowmon;
pub mod packet;
pub mod tcp;
mod topology;

pub use engine::{P2pEngine, P2pEngineFactory};
