use crate::config::{AddressPlan, LinkConfig, RatePattern, TrafficProfile};
use crate::flow::TransportKind;
use crate::units::SimTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Topology size of every scenario: one sender, one receiver.
pub const POINT_TO_POINT_NODES: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScenarioId(String);

impl ScenarioId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScenarioId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ScenarioId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Congestion-control algorithm the sender's TCP socket runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum CongestionVariant {
    #[default]
    #[serde(alias = "newreno")]
    NewReno,
    Cubic,
    Tahoe,
}

impl fmt::Display for CongestionVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CongestionVariant::NewReno => write!(f, "NewReno"),
            CongestionVariant::Cubic => write!(f, "CUBIC"),
            CongestionVariant::Tahoe => write!(f, "Tahoe"),
        }
    }
}

impl FromStr for CongestionVariant {
    type Err = InvalidScenario;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "newreno" => Ok(CongestionVariant::NewReno),
            "cubic" => Ok(CongestionVariant::Cubic),
            "tahoe" => Ok(CongestionVariant::Tahoe),
            _ => Err(InvalidScenario::new(
                "variant",
                format!("unknown congestion control '{s}' (try newreno, cubic, tahoe)"),
            )),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{field}: {reason}")]
pub struct InvalidScenario {
    pub field: &'static str,
    pub reason: String,
}

impl InvalidScenario {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Everything needed to build and run one scenario from scratch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDescriptor {
    pub id: ScenarioId,
    pub node_count: usize,
    pub link: LinkConfig,
    pub variant: CongestionVariant,
    /// Declared stop time; applications stop and the engine halts here.
    pub duration: SimTime,
    pub traffic: TrafficProfile,
    pub addressing: AddressPlan,
    /// Seeds the engine's random streams (error model).
    pub seed: u64,
}

impl ScenarioDescriptor {
    pub fn new(id: impl Into<ScenarioId>) -> Self {
        Self {
            id: id.into(),
            node_count: POINT_TO_POINT_NODES,
            link: LinkConfig::default(),
            variant: CongestionVariant::default(),
            duration: SimTime::from_secs(10),
            traffic: TrafficProfile::default(),
            addressing: AddressPlan::default(),
            seed: 1,
        }
    }

    pub fn with_variant(mut self, variant: CongestionVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_link(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }

    pub fn with_traffic(mut self, traffic: TrafficProfile) -> Self {
        self.traffic = traffic;
        self
    }

    pub fn with_duration(mut self, duration: SimTime) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn stop_time(&self) -> SimTime {
        self.duration
    }

    pub fn delay_ms(&self) -> f64 {
        self.link.delay.as_millis_f64()
    }

    /// Rejects parameter sets no engine could run. Address plans are left to
    /// the engine, which owns address allocation.
    pub fn validate(&self) -> Result<(), InvalidScenario> {
        let id = self.id.as_str();
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(InvalidScenario::new(
                "id",
                format!("'{id}' must be non-empty and use only [A-Za-z0-9._-]"),
            ));
        }
        if self.node_count != POINT_TO_POINT_NODES {
            return Err(InvalidScenario::new(
                "node_count",
                format!("point-to-point runs need exactly {POINT_TO_POINT_NODES} nodes, got {}", self.node_count),
            ));
        }
        if self.link.bandwidth.bps() == 0 {
            return Err(InvalidScenario::new("link.bandwidth", "must be positive"));
        }
        if let Some(rate) = self.link.error_rate
            && !(0.0..=1.0).contains(&rate)
        {
            return Err(InvalidScenario::new(
                "link.error_rate",
                format!("{rate} is not a probability"),
            ));
        }
        if self.link.queue_packets == 0 {
            return Err(InvalidScenario::new("link.queue_packets", "must be positive"));
        }
        if self.duration == SimTime::ZERO {
            return Err(InvalidScenario::new("duration", "must be positive"));
        }
        let traffic = &self.traffic;
        if traffic.packet_size == 0 || traffic.packet_size > 65_000 {
            return Err(InvalidScenario::new(
                "traffic.packet_size",
                format!("{} is outside 1..=65000", traffic.packet_size),
            ));
        }
        if traffic.sender_start >= self.duration {
            return Err(InvalidScenario::new(
                "traffic.sender_start",
                format!("sender starts at {} but the run stops at {}", traffic.sender_start, self.duration),
            ));
        }
        match &traffic.pattern {
            RatePattern::OnOff {
                data_rate, on_time, ..
            } => {
                if data_rate.bps() == 0 {
                    return Err(InvalidScenario::new("traffic.data_rate", "must be positive"));
                }
                if *on_time == SimTime::ZERO {
                    return Err(InvalidScenario::new("traffic.on_time", "must be positive"));
                }
            }
            RatePattern::Periodic {
                interval,
                max_packets,
            } => {
                if traffic.protocol != TransportKind::Udp {
                    return Err(InvalidScenario::new(
                        "traffic.pattern",
                        "periodic pacing is only available for UDP",
                    ));
                }
                if *interval == SimTime::ZERO || *max_packets == 0 {
                    return Err(InvalidScenario::new(
                        "traffic.pattern",
                        "periodic pacing needs a positive interval and packet budget",
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ScenarioDescriptor::new("baseline").validate().is_ok());
    }

    #[test]
    fn rejects_bad_parameters() {
        let mut d = ScenarioDescriptor::new("bad id");
        assert_eq!(d.validate().unwrap_err().field, "id");

        d = ScenarioDescriptor::new("lossy");
        d.link.error_rate = Some(1.5);
        assert_eq!(d.validate().unwrap_err().field, "link.error_rate");

        d = ScenarioDescriptor::new("late").with_duration(SimTime::from_millis(500));
        assert_eq!(d.validate().unwrap_err().field, "traffic.sender_start");

        d = ScenarioDescriptor::new("tcp-periodic");
        d.traffic.pattern = RatePattern::Periodic {
            interval: SimTime::from_millis(10),
            max_packets: 10,
        };
        assert_eq!(d.validate().unwrap_err().field, "traffic.pattern");
    }

    #[test]
    fn variant_names() {
        assert_eq!("NewReno".parse::<CongestionVariant>().unwrap(), CongestionVariant::NewReno);
        assert_eq!("new_reno".parse::<CongestionVariant>().unwrap(), CongestionVariant::NewReno);
        assert_eq!("CUBIC".parse::<CongestionVariant>().unwrap(), CongestionVariant::Cubic);
        assert!("vegas".parse::<CongestionVariant>().is_err());
        assert_eq!(CongestionVariant::Cubic.to_string(), "CUBIC");
    }
}
