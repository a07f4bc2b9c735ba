//! Window arithmetic for the congestion-control variants the engine knows.
//!
//! The TCP sender owns the loss-detection state machine; these types only
//! answer "what is the next window" and "what is the new threshold".

use cwnd_lab_abstract::{CongestionVariant, EngineError, SimTime};

const CUBIC_BETA: f64 = 0.7;
const CUBIC_C: f64 = 0.4;

#[derive(Debug, Clone, Default)]
pub struct CubicState {
    /// Window (in segments) just before the last reduction.
    w_max: f64,
    epoch_start: Option<SimTime>,
    k: f64,
    origin: f64,
}

#[derive(Debug, Clone)]
pub enum CongestionOps {
    NewReno,
    Tahoe,
    Cubic(CubicState),
}

impl CongestionOps {
    pub fn for_variant(variant: CongestionVariant) -> Result<Self, EngineError> {
        match variant {
            CongestionVariant::NewReno => Ok(CongestionOps::NewReno),
            CongestionVariant::Tahoe => Ok(CongestionOps::Tahoe),
            CongestionVariant::Cubic => Ok(CongestionOps::Cubic(CubicState::default())),
            other => Err(EngineError::Unsupported(format!(
                "congestion control {other} is not implemented by the point-to-point engine"
            ))),
        }
    }

    /// Whether triple duplicate ACKs lead into fast recovery or straight
    /// back to a one-segment window.
    pub fn fast_recovery(&self) -> bool {
        !matches!(self, CongestionOps::Tahoe)
    }

    /// Window after an ACK that acknowledged `acked` new bytes outside recovery.
    pub fn increase(&mut self, cwnd: u32, ssthresh: u32, mss: u32, acked: u64, now: SimTime) -> u32 {
        if cwnd < ssthresh {
            let segments = (acked / mss as u64).max(1) as u32;
            return cwnd.saturating_add(segments.saturating_mul(mss));
        }
        match self {
            CongestionOps::NewReno | CongestionOps::Tahoe => {
                let adder = (mss as f64 * mss as f64 / cwnd as f64).max(1.0);
                cwnd.saturating_add(adder as u32)
            }
            CongestionOps::Cubic(state) => state.increase(cwnd, mss, now),
        }
    }

    /// Slow-start threshold after a loss was detected.
    pub fn loss_threshold(&mut self, cwnd: u32, bytes_in_flight: u64, mss: u32) -> u32 {
        let floor = 2 * mss;
        match self {
            CongestionOps::NewReno | CongestionOps::Tahoe => {
                let half = (bytes_in_flight / 2).min(u32::MAX as u64) as u32;
                half.max(floor)
            }
            CongestionOps::Cubic(state) => {
                state.on_loss(cwnd, mss);
                ((cwnd as f64 * CUBIC_BETA) as u32).max(floor)
            }
        }
    }

    pub fn on_timeout(&mut self) {
        if let CongestionOps::Cubic(state) = self {
            state.epoch_start = None;
        }
    }
}

impl CubicState {
    fn on_loss(&mut self, cwnd: u32, mss: u32) {
        let segments = cwnd as f64 / mss as f64;
        // Fast convergence: release bandwidth when the window keeps shrinking.
        self.w_max = if segments < self.w_max {
            segments * (1.0 + CUBIC_BETA) / 2.0
        } else {
            segments
        };
        self.epoch_start = None;
    }

    fn increase(&mut self, cwnd: u32, mss: u32, now: SimTime) -> u32 {
        let segments = cwnd as f64 / mss as f64;
        let epoch = match self.epoch_start {
            Some(epoch) => epoch,
            None => {
                if self.w_max <= segments {
                    self.k = 0.0;
                    self.origin = segments;
                } else {
                    self.k = ((self.w_max - segments) / CUBIC_C).cbrt();
                    self.origin = self.w_max;
                }
                self.epoch_start = Some(now);
                now
            }
        };
        let t = (now - epoch).as_secs_f64();
        let target = self.origin + CUBIC_C * (t - self.k).powi(3);
        let increment = if target > segments {
            (target - segments) / segments * mss as f64
        } else {
            mss as f64 / (100.0 * segments)
        };
        let cap = (mss as f64 / 2.0).max(1.0);
        cwnd.saturating_add(increment.clamp(1.0, cap) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MSS: u32 = 1000;

    #[test]
    fn slow_start_grows_one_segment_per_ack() {
        let mut ops = CongestionOps::NewReno;
        assert_eq!(ops.increase(10 * MSS, u32::MAX, MSS, MSS as u64, SimTime::ZERO), 11 * MSS);
    }

    #[test]
    fn new_reno_halves_flight() {
        let mut ops = CongestionOps::NewReno;
        assert_eq!(ops.loss_threshold(40 * MSS, 40_000, MSS), 20 * MSS);
        assert_eq!(ops.loss_threshold(2 * MSS, 1_000, MSS), 2 * MSS);
    }

    #[test]
    fn cubic_backs_off_less_than_new_reno() {
        let mut cubic = CongestionOps::for_variant(CongestionVariant::Cubic).unwrap();
        let mut reno = CongestionOps::for_variant(CongestionVariant::NewReno).unwrap();
        let cubic_thresh = cubic.loss_threshold(40 * MSS, 40_000, MSS);
        let reno_thresh = reno.loss_threshold(40 * MSS, 40_000, MSS);
        assert_eq!(cubic_thresh, 28 * MSS);
        assert!(cubic_thresh > reno_thresh);
    }

    #[test]
    fn cubic_regrows_towards_previous_maximum() {
        let mut ops = CongestionOps::Cubic(CubicState::default());
        let ssthresh = ops.loss_threshold(40 * MSS, 40_000, MSS);
        let mut cwnd = ssthresh;
        let mut now = SimTime::from_secs(1);
        for _ in 0..200 {
            cwnd = ops.increase(cwnd, ssthresh, MSS, MSS as u64, now);
            now = now + SimTime::from_millis(5);
        }
        assert!(cwnd > ssthresh);
        assert!(ops.fast_recovery());
        assert!(!CongestionOps::Tahoe.fast_recovery());
    }
}
