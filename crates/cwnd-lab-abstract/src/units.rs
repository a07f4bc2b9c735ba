use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;
use thiserror::Error;

const NANOS_PER_SEC: u64 = 1_000_000_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UnitParseError {
    #[error("empty value")]
    Empty,
    #[error("invalid number in '{0}'")]
    Number(String),
    #[error("unknown unit '{unit}' in '{input}'")]
    Unit { input: String, unit: String },
    #[error("value out of range: '{0}'")]
    Range(String),
}

/// Simulated time, stored in nanoseconds since the start of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);
    pub const MAX: SimTime = SimTime(u64::MAX);

    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    pub const fn from_micros(us: u64) -> Self {
        Self(us.saturating_mul(1_000))
    }

    pub const fn from_millis(ms: u64) -> Self {
        Self(ms.saturating_mul(1_000_000))
    }

    pub const fn from_secs(s: u64) -> Self {
        Self(s.saturating_mul(NANOS_PER_SEC))
    }

    /// Converts fractional seconds, rounding to the nearest nanosecond.
    /// Negative and non-finite inputs are rejected.
    pub fn try_from_secs_f64(secs: f64) -> Option<Self> {
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        let ns = (secs * NANOS_PER_SEC as f64).round();
        if ns > u64::MAX as f64 {
            return None;
        }
        Some(Self(ns as u64))
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    pub fn as_millis_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn saturating_sub(self, other: SimTime) -> SimTime {
        SimTime(self.0.saturating_sub(other.0))
    }

    pub fn saturating_mul(self, factor: u64) -> SimTime {
        SimTime(self.0.saturating_mul(factor))
    }

    /// Seconds with a full nanosecond fraction, e.g. `1.000250000`.
    /// This is the timestamp format of persisted window traces.
    pub fn to_trace_string(self) -> String {
        format!("{}.{:09}", self.0 / NANOS_PER_SEC, self.0 % NANOS_PER_SEC)
    }

    /// Exact inverse of [`SimTime::to_trace_string`]. Also accepts integral
    /// seconds and fractions shorter than nine digits.
    pub fn parse_trace_secs(s: &str) -> Result<Self, UnitParseError> {
        let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(UnitParseError::Empty);
        }
        let digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
        if !digits(whole) || !digits(frac) || frac.len() > 9 {
            return Err(UnitParseError::Number(s.to_string()));
        }
        let secs: u64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| UnitParseError::Range(s.to_string()))?
        };
        let mut nanos: u64 = 0;
        if !frac.is_empty() {
            nanos = frac
                .parse::<u64>()
                .map_err(|_| UnitParseError::Number(s.to_string()))?
                * 10u64.pow(9 - frac.len() as u32);
        }
        secs.checked_mul(NANOS_PER_SEC)
            .and_then(|ns| ns.checked_add(nanos))
            .map(SimTime)
            .ok_or_else(|| UnitParseError::Range(s.to_string()))
    }
}

impl Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimTime) -> SimTime {
        SimTime(self.0.saturating_add(rhs.0))
    }
}

impl Sub for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: SimTime) -> SimTime {
        self.saturating_sub(rhs)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ns = self.0;
        if ns == 0 {
            write!(f, "0s")
        } else if ns % NANOS_PER_SEC == 0 {
            write!(f, "{}s", ns / NANOS_PER_SEC)
        } else if ns % 1_000_000 == 0 {
            write!(f, "{}ms", ns / 1_000_000)
        } else if ns % 1_000 == 0 {
            write!(f, "{}us", ns / 1_000)
        } else {
            write!(f, "{ns}ns")
        }
    }
}

/// Splits `"2.5ms"` into `(2.5, "ms")`.
fn split_quantity(input: &str) -> Result<(f64, &str), UnitParseError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(UnitParseError::Empty);
    }
    let idx = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+' || c == 'e'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(idx);
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| UnitParseError::Number(input.to_string()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(UnitParseError::Range(input.to_string()));
    }
    Ok((value, unit.trim()))
}

impl FromStr for SimTime {
    type Err = UnitParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (value, unit) = split_quantity(input)?;
        let scale = match unit {
            "ns" => 1e-9,
            "us" => 1e-6,
            "ms" => 1e-3,
            "s" | "" => 1.0,
            "min" => 60.0,
            other => {
                return Err(UnitParseError::Unit {
                    input: input.to_string(),
                    unit: other.to_string(),
                });
            }
        };
        SimTime::try_from_secs_f64(value * scale).ok_or_else(|| UnitParseError::Range(input.to_string()))
    }
}

impl TryFrom<String> for SimTime {
    type Error = UnitParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SimTime> for String {
    fn from(value: SimTime) -> Self {
        value.to_string()
    }
}

/// Link or application data rate in bits per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataRate(u64);

impl DataRate {
    pub const fn from_bps(bps: u64) -> Self {
        Self(bps)
    }

    pub const fn from_kbps(kbps: u64) -> Self {
        Self(kbps.saturating_mul(1_000))
    }

    pub const fn from_mbps(mbps: u64) -> Self {
        Self(mbps.saturating_mul(1_000_000))
    }

    pub const fn bps(self) -> u64 {
        self.0
    }

    pub fn as_mbps(self) -> f64 {
        self.0 as f64 / 1e6
    }

    /// Time needed to serialize `bytes` onto a link of this rate.
    pub fn tx_time(self, bytes: u32) -> SimTime {
        if self.0 == 0 {
            return SimTime::MAX;
        }
        let ns = (bytes as u128 * 8 * NANOS_PER_SEC as u128).div_ceil(self.0 as u128);
        SimTime::from_nanos(ns.min(u64::MAX as u128) as u64)
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bps = self.0;
        if bps != 0 && bps % 1_000_000_000 == 0 {
            write!(f, "{}Gbps", bps / 1_000_000_000)
        } else if bps != 0 && bps % 1_000_000 == 0 {
            write!(f, "{}Mbps", bps / 1_000_000)
        } else if bps != 0 && bps % 1_000 == 0 {
            write!(f, "{}kbps", bps / 1_000)
        } else {
            write!(f, "{bps}bps")
        }
    }
}

impl FromStr for DataRate {
    type Err = UnitParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (value, unit) = split_quantity(input)?;
        let bad_unit = || UnitParseError::Unit {
            input: input.to_string(),
            unit: unit.to_string(),
        };
        // "bps"/"b/s" count bits, "Bps"/"B/s" count bytes.
        let (prefix, bits_per_unit) = if let Some(p) = unit.strip_suffix("bps").or_else(|| unit.strip_suffix("b/s")) {
            (p, 1.0)
        } else if let Some(p) = unit.strip_suffix("Bps").or_else(|| unit.strip_suffix("B/s")) {
            (p, 8.0)
        } else {
            return Err(bad_unit());
        };
        let scale = match prefix {
            "" => 1.0,
            "k" | "K" => 1e3,
            "M" => 1e6,
            "G" => 1e9,
            _ => return Err(bad_unit()),
        };
        let bps = (value * scale * bits_per_unit).round();
        if bps > u64::MAX as f64 {
            return Err(UnitParseError::Range(input.to_string()));
        }
        Ok(DataRate(bps as u64))
    }
}

impl TryFrom<String> for DataRate {
    type Error = UnitParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DataRate> for String {
    fn from(value: DataRate) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ns3_style_rates() {
        assert_eq!("5Mbps".parse::<DataRate>().unwrap(), DataRate::from_mbps(5));
        assert_eq!("500kb/s".parse::<DataRate>().unwrap(), DataRate::from_kbps(500));
        assert_eq!("1KBps".parse::<DataRate>().unwrap(), DataRate::from_bps(8_000));
        assert!("5 furlongs".parse::<DataRate>().is_err());
    }

    #[test]
    fn parses_durations() {
        assert_eq!("2ms".parse::<SimTime>().unwrap(), SimTime::from_millis(2));
        assert_eq!("1.5s".parse::<SimTime>().unwrap(), SimTime::from_millis(1500));
        assert_eq!("10".parse::<SimTime>().unwrap(), SimTime::from_secs(10));
        assert!("-1ms".parse::<SimTime>().is_err());
    }

    #[test]
    fn trace_timestamps_are_exact() {
        let t = SimTime::from_nanos(1_000_250_001);
        assert_eq!(t.to_trace_string(), "1.000250001");
        assert_eq!(SimTime::parse_trace_secs("1.000250001").unwrap(), t);
        assert_eq!(SimTime::parse_trace_secs("2.5").unwrap(), SimTime::from_millis(2500));
        assert!(SimTime::parse_trace_secs("1.2.3").is_err());
        assert!(SimTime::parse_trace_secs("abc").is_err());
    }

    #[test]
    fn serialization_delay_rounds_up() {
        let rate = DataRate::from_mbps(5);
        // 1042 bytes at 5 Mbps = 1.6672 ms
        assert_eq!(rate.tx_time(1042), SimTime::from_nanos(1_667_200));
    }
}
