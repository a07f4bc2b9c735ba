use cwnd_lab_abstract::{FiveTuple, TransportKind};

pub const IPV4_HEADER_BYTES: u32 = 20;
pub const TCP_HEADER_BYTES: u32 = 20;
pub const UDP_HEADER_BYTES: u32 = 8;
/// Point-to-point framing added on the wire, not counted at the IP layer.
pub const PPP_HEADER_BYTES: u32 = 2;

/// TCP header flags
pub mod flags {
    pub const ACK: u8 = 0x10;
    pub const PSH: u8 = 0x08;
}

/// Sequence numbers are absolute byte offsets; the lab never wraps them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpHeader {
    pub seq: u64,
    pub ack: u64,
    pub flags: u8,
}

impl TcpHeader {
    pub fn data(seq: u64) -> Self {
        Self {
            seq,
            ack: 0,
            flags: flags::PSH,
        }
    }

    pub fn pure_ack(ack: u64) -> Self {
        Self {
            seq: 0,
            ack,
            flags: flags::ACK,
        }
    }

    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Tcp { header: TcpHeader, payload: u32 },
    Udp { payload: u32 },
}

/// Payload bytes are not materialized; only their length travels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub uid: u64,
    pub flow: FiveTuple,
    pub segment: Segment,
}

impl Packet {
    pub fn protocol(&self) -> TransportKind {
        match self.segment {
            Segment::Tcp { .. } => TransportKind::Tcp,
            Segment::Udp { .. } => TransportKind::Udp,
        }
    }

    pub fn payload_len(&self) -> u32 {
        match self.segment {
            Segment::Tcp { payload, .. } | Segment::Udp { payload } => payload,
        }
    }

    /// Size as seen by the IP layer (and by the flow monitor).
    pub fn ip_size(&self) -> u32 {
        let transport = match self.segment {
            Segment::Tcp { .. } => TCP_HEADER_BYTES,
            Segment::Udp { .. } => UDP_HEADER_BYTES,
        };
        IPV4_HEADER_BYTES + transport + self.payload_len()
    }

    pub fn wire_size(&self) -> u32 {
        self.ip_size() + PPP_HEADER_BYTES
    }
}
