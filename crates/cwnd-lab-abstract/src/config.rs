use crate::flow::TransportKind;
use crate::units::{DataRate, SimTime};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Point-to-point link parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub bandwidth: DataRate,
    pub delay: SimTime,
    /// Per-packet drop probability applied on the receiving device.
    pub error_rate: Option<f64>,
    /// Drop-tail queue limit of each device, in packets.
    pub queue_packets: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            bandwidth: DataRate::from_mbps(5),
            delay: SimTime::from_millis(2),
            error_rate: None,
            queue_packets: 100,
        }
    }
}

/// How the sending application paces its packets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RatePattern {
    /// Sends at `data_rate` during on periods and stays silent during off
    /// periods. A zero `off_time` means the source is constantly on.
    OnOff {
        data_rate: DataRate,
        on_time: SimTime,
        off_time: SimTime,
    },
    /// One packet every `interval`, at most `max_packets` in total.
    Periodic { interval: SimTime, max_packets: u32 },
}

impl RatePattern {
    pub fn constant_on(data_rate: DataRate) -> Self {
        RatePattern::OnOff {
            data_rate,
            on_time: SimTime::from_secs(1),
            off_time: SimTime::ZERO,
        }
    }
}

impl Default for RatePattern {
    fn default() -> Self {
        RatePattern::constant_on(DataRate::from_kbps(500))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficProfile {
    pub protocol: TransportKind,
    /// Receiver listening port.
    pub port: u16,
    pub packet_size: u32,
    pub pattern: RatePattern,
    /// The receiver starts at time zero; the sender starts here.
    pub sender_start: SimTime,
}

impl Default for TrafficProfile {
    fn default() -> Self {
        Self {
            protocol: TransportKind::Tcp,
            port: 9,
            packet_size: 1000,
            pattern: RatePattern::default(),
            sender_start: SimTime::from_secs(1),
        }
    }
}

/// Network the two link interfaces are numbered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressPlan {
    pub base: Ipv4Addr,
    pub mask: Ipv4Addr,
}

impl Default for AddressPlan {
    fn default() -> Self {
        Self {
            base: Ipv4Addr::new(10, 1, 1, 0),
            mask: Ipv4Addr::new(255, 255, 255, 0),
        }
    }
}
