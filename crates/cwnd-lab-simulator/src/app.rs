use cwnd_lab_abstract::{
    DataRate, EngineError, FiveTuple, NodeId, RatePattern, SimTime, TrafficProfile, TransportKind,
};
use std::net::SocketAddrV4;

/// Socket an application sends through once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketRef {
    /// Index into the engine's TCP connection table.
    Tcp(usize),
    Udp(FiveTuple),
}

#[derive(Debug, Clone)]
pub enum AppKind {
    PacketSink {
        protocol: TransportKind,
        local: SocketAddrV4,
        received_bytes: u64,
    },
    OnOff {
        protocol: TransportKind,
        remote: SocketAddrV4,
        packet_size: u32,
        data_rate: DataRate,
        on_time: SimTime,
        off_time: SimTime,
        on: bool,
    },
    /// UDP client: fixed interval, bounded packet count.
    Periodic {
        remote: SocketAddrV4,
        packet_size: u32,
        interval: SimTime,
        max_packets: u32,
        sent: u32,
    },
}

#[derive(Debug)]
pub struct Application {
    pub node: NodeId,
    pub kind: AppKind,
    pub scheduled: bool,
    pub running: bool,
    pub socket: Option<SocketRef>,
    /// Bumped whenever pending send or toggle events must be discarded.
    pub generation: u64,
}

impl Application {
    fn new(node: NodeId, kind: AppKind) -> Self {
        Self {
            node,
            kind,
            scheduled: false,
            running: false,
            socket: None,
            generation: 0,
        }
    }

    pub fn sink(node: NodeId, protocol: TransportKind, local: SocketAddrV4) -> Self {
        Self::new(
            node,
            AppKind::PacketSink {
                protocol,
                local,
                received_bytes: 0,
            },
        )
    }

    pub fn sender(
        node: NodeId,
        protocol: TransportKind,
        remote: SocketAddrV4,
        traffic: &TrafficProfile,
    ) -> Result<Self, EngineError> {
        if traffic.packet_size == 0 {
            return Err(EngineError::Unsupported("zero-length packets".to_string()));
        }
        let kind = match traffic.pattern {
            RatePattern::OnOff {
                data_rate,
                on_time,
                off_time,
            } => {
                if data_rate.bps() == 0 || on_time == SimTime::ZERO {
                    return Err(EngineError::Unsupported(
                        "on/off source needs a positive rate and on time".to_string(),
                    ));
                }
                AppKind::OnOff {
                    protocol,
                    remote,
                    packet_size: traffic.packet_size,
                    data_rate,
                    on_time,
                    off_time,
                    on: false,
                }
            }
            RatePattern::Periodic {
                interval,
                max_packets,
            } => {
                if protocol != TransportKind::Udp {
                    return Err(EngineError::Unsupported(format!(
                        "periodic client over {protocol}"
                    )));
                }
                AppKind::Periodic {
                    remote,
                    packet_size: traffic.packet_size,
                    interval,
                    max_packets,
                    sent: 0,
                }
            }
        };
        Ok(Self::new(node, kind))
    }

    pub fn protocol(&self) -> TransportKind {
        match &self.kind {
            AppKind::PacketSink { protocol, .. } | AppKind::OnOff { protocol, .. } => *protocol,
            AppKind::Periodic { .. } => TransportKind::Udp,
        }
    }

    pub fn received_bytes(&self) -> Option<u64> {
        match &self.kind {
            AppKind::PacketSink { received_bytes, .. } => Some(*received_bytes),
            _ => None,
        }
    }
}
