use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    Udp,
}

impl TransportKind {
    /// IANA protocol number carried in the IPv4 header.
    pub fn protocol_number(self) -> u8 {
        match self {
            TransportKind::Tcp => 6,
            TransportKind::Udp => 17,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "TCP"),
            TransportKind::Udp => write!(f, "UDP"),
        }
    }
}

/// Flow key: packets sharing these five fields belong to one flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FiveTuple {
    pub source: Ipv4Addr,
    pub source_port: u16,
    pub destination: Ipv4Addr,
    pub destination_port: u16,
    pub protocol: TransportKind,
}

impl FiveTuple {
    /// The tuple of traffic flowing the other way.
    pub fn reversed(&self) -> Self {
        Self {
            source: self.destination,
            source_port: self.destination_port,
            destination: self.source,
            destination_port: self.source_port,
            protocol: self.protocol,
        }
    }
}

impl fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} ({})",
            self.source, self.source_port, self.destination, self.destination_port, self.protocol
        )
    }
}

/// Engine-assigned flow identifier, meaningful only within one engine session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowId(pub u32);

/// Raw flow-monitor counters as the engine keeps them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStats {
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub lost_packets: u64,
}

/// Per-flow byte and packet counts, frozen once snapshotted from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub five_tuple: FiveTuple,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub lost_packets: u64,
}

impl FlowRecord {
    pub fn new(five_tuple: FiveTuple, stats: &FlowStats) -> Self {
        Self {
            five_tuple,
            tx_bytes: stats.tx_bytes,
            rx_bytes: stats.rx_bytes,
            tx_packets: stats.tx_packets,
            rx_packets: stats.rx_packets,
            lost_packets: stats.lost_packets,
        }
    }

    /// Folds counters of another flow id that classified to the same tuple.
    pub fn absorb(&mut self, stats: &FlowStats) {
        self.tx_bytes += stats.tx_bytes;
        self.rx_bytes += stats.rx_bytes;
        self.tx_packets += stats.tx_packets;
        self.rx_packets += stats.rx_packets;
        self.lost_packets += stats.lost_packets;
    }
}
