use crate::units::SimTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One congestion-window mutation: the window went from `old_window` to
/// `new_window` bytes at `time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CongestionWindowSample {
    pub time: SimTime,
    pub old_window: u32,
    pub new_window: u32,
}

impl CongestionWindowSample {
    pub fn new(time: SimTime, old_window: u32, new_window: u32) -> Self {
        Self {
            time,
            old_window,
            new_window,
        }
    }

    pub fn is_reduction(&self) -> bool {
        self.new_window < self.old_window
    }
}

/// Receiver of window-change events. Engines call this on the thread that
/// advances simulated time, once per mutation, in event order.
pub trait WindowSink {
    fn record_sample(&mut self, sample: CongestionWindowSample);
}

/// Address of a traced congestion window:
/// `/NodeList/<node>/SocketList/<socket>/CongestionWindow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TracePath {
    pub node: u32,
    pub socket: u32,
}

impl TracePath {
    pub fn congestion_window(node: u32, socket: u32) -> Self {
        Self { node, socket }
    }
}

impl fmt::Display for TracePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/NodeList/{}/SocketList/{}/CongestionWindow",
            self.node, self.socket
        )
    }
}

#[derive(Debug, thiserror::Error)]
#[error("malformed trace path '{0}'")]
pub struct TracePathError(String);

impl FromStr for TracePath {
    type Err = TracePathError;

    /// Accepts the canonical form as well as paths carrying a
    /// `$ns3::TcpL4Protocol`-style type segment.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || TracePathError(s.to_string());
        let parts: Vec<&str> = s
            .split('/')
            .filter(|p| !p.is_empty() && !p.starts_with('$'))
            .collect();
        match parts.as_slice() {
            ["NodeList", node, "SocketList", socket, "CongestionWindow"] => Ok(Self {
                node: node.parse().map_err(|_| err())?,
                socket: socket.parse().map_err(|_| err())?,
            }),
            _ => Err(err()),
        }
    }
}
