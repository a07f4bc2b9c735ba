use crate::congestion::CongestionOps;
use cwnd_lab_abstract::SimTime;
use std::collections::BTreeMap;
use tracing::debug;

pub const INITIAL_WINDOW_SEGMENTS: u32 = 10;
/// 1500-byte MTU minus IPv4 and TCP headers.
pub const MAX_SEGMENT_BYTES: u32 = 1460;
pub const SEND_BUFFER_BYTES: u64 = 131_072;
const MIN_RTO: SimTime = SimTime::from_secs(1);
const MAX_RTO: SimTime = SimTime::from_secs(60);
const DUP_ACK_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutgoingSegment {
    pub seq: u64,
    pub len: u32,
    pub retransmit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    Arm(SimTime),
    Cancel,
}

/// Actions buffered during one socket callback; the engine applies them
/// once the callback returns.
#[derive(Debug, Default)]
pub struct TcpActions {
    pub segments: Vec<OutgoingSegment>,
    pub window_changes: Vec<(u32, u32)>,
    pub timer: Option<TimerCommand>,
}

/// Sending half of a bulk-transfer connection. The connection is considered
/// established when the socket is created.
#[derive(Debug)]
pub struct TcpSender {
    mss: u32,
    snd_una: u64,
    snd_nxt: u64,
    snd_max: u64,
    /// One past the last byte the application has written.
    app_end: u64,
    cwnd: u32,
    ssthresh: u32,
    dup_acks: u32,
    /// Highest sequence outstanding when fast recovery began.
    recover: Option<u64>,
    srtt: Option<f64>,
    rttvar: f64,
    rto: SimTime,
    rtt_sample: Option<(u64, SimTime)>,
    congestion: CongestionOps,
}

impl TcpSender {
    pub fn new(mss: u32, congestion: CongestionOps) -> Self {
        Self {
            mss,
            snd_una: 0,
            snd_nxt: 0,
            snd_max: 0,
            app_end: 0,
            cwnd: INITIAL_WINDOW_SEGMENTS * mss,
            ssthresh: u32::MAX,
            dup_acks: 0,
            recover: None,
            srtt: None,
            rttvar: 0.0,
            rto: MIN_RTO,
            rtt_sample: None,
            congestion,
        }
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn bytes_in_flight(&self) -> u64 {
        self.snd_max - self.snd_una
    }

    pub fn acked_bytes(&self) -> u64 {
        self.snd_una
    }

    /// Queues application data; returns how many bytes fit in the send buffer.
    pub fn write(&mut self, bytes: u32, now: SimTime, out: &mut TcpActions) -> u32 {
        let buffered = self.app_end - self.snd_una;
        let room = SEND_BUFFER_BYTES.saturating_sub(buffered);
        let accepted = (bytes as u64).min(room) as u32;
        self.app_end += accepted as u64;
        self.try_send(now, out);
        accepted
    }

    pub fn on_ack(&mut self, ack: u64, now: SimTime, out: &mut TcpActions) {
        if ack > self.snd_max {
            debug!("ignoring ACK {} beyond highest sent {}", ack, self.snd_max);
            return;
        }
        if ack > self.snd_una {
            let acked = ack - self.snd_una;
            self.snd_una = ack;
            if self.snd_nxt < self.snd_una {
                self.snd_nxt = self.snd_una;
            }
            if let Some((end, sent_at)) = self.rtt_sample
                && ack >= end
            {
                self.update_rtt(now - sent_at);
                self.rtt_sample = None;
            }

            match self.recover {
                Some(recover) if ack >= recover => {
                    self.recover = None;
                    self.dup_acks = 0;
                    self.set_cwnd(self.ssthresh, out);
                }
                Some(_) => {
                    // Partial ACK: the next hole is lost too.
                    self.retransmit_head(out);
                    let deflated = (self.cwnd as u64).saturating_sub(acked) + self.mss as u64;
                    self.set_cwnd(deflated.min(u32::MAX as u64) as u32, out);
                }
                None => {
                    self.dup_acks = 0;
                    let next = self
                        .congestion
                        .increase(self.cwnd, self.ssthresh, self.mss, acked, now);
                    self.set_cwnd(next, out);
                }
            }

            if self.snd_una == self.snd_max {
                out.timer = Some(TimerCommand::Cancel);
            } else {
                out.timer = Some(TimerCommand::Arm(self.rto));
            }
            self.try_send(now, out);
        } else if ack == self.snd_una && self.snd_max > self.snd_una {
            self.dup_acks += 1;
            if self.dup_acks == DUP_ACK_THRESHOLD && self.recover.is_none() {
                self.enter_loss_recovery(out);
            } else if self.dup_acks > DUP_ACK_THRESHOLD && self.recover.is_some() {
                self.set_cwnd(self.cwnd.saturating_add(self.mss), out);
                self.try_send(now, out);
            }
        }
    }

    pub fn on_retransmit_timeout(&mut self, now: SimTime, out: &mut TcpActions) {
        if self.snd_una >= self.snd_max {
            return;
        }
        debug!(
            "RTO at {}: snd_una={} snd_max={} rto={}",
            now, self.snd_una, self.snd_max, self.rto
        );
        self.ssthresh = self
            .congestion
            .loss_threshold(self.cwnd, self.bytes_in_flight(), self.mss);
        self.congestion.on_timeout();
        self.set_cwnd(self.mss, out);
        self.recover = None;
        self.dup_acks = 0;
        self.rtt_sample = None;
        self.snd_nxt = self.snd_una;
        self.rto = (self.rto.saturating_mul(2)).min(MAX_RTO);
        self.try_send(now, out);
        out.timer = Some(TimerCommand::Arm(self.rto));
    }

    fn enter_loss_recovery(&mut self, out: &mut TcpActions) {
        self.ssthresh = self
            .congestion
            .loss_threshold(self.cwnd, self.bytes_in_flight(), self.mss);
        let resent = self.retransmit_head(out);
        self.rtt_sample = None;
        if self.congestion.fast_recovery() {
            self.recover = Some(self.snd_max);
            self.set_cwnd(self.ssthresh.saturating_add(3 * self.mss), out);
        } else {
            self.set_cwnd(self.mss, out);
            self.snd_nxt = self.snd_una + resent as u64;
        }
        out.timer = Some(TimerCommand::Arm(self.rto));
    }

    fn retransmit_head(&mut self, out: &mut TcpActions) -> u32 {
        let len = (self.snd_max - self.snd_una).min(self.mss as u64) as u32;
        if len > 0 {
            out.segments.push(OutgoingSegment {
                seq: self.snd_una,
                len,
                retransmit: true,
            });
        }
        len
    }

    fn try_send(&mut self, now: SimTime, out: &mut TcpActions) {
        while self.snd_nxt < self.app_end {
            let len = (self.app_end - self.snd_nxt).min(self.mss as u64) as u32;
            let in_flight = self.snd_nxt - self.snd_una;
            if in_flight + len as u64 > self.cwnd as u64 {
                break;
            }
            let retransmit = self.snd_nxt < self.snd_max;
            if !retransmit && self.rtt_sample.is_none() {
                self.rtt_sample = Some((self.snd_nxt + len as u64, now));
            }
            out.segments.push(OutgoingSegment {
                seq: self.snd_nxt,
                len,
                retransmit,
            });
            self.snd_nxt += len as u64;
            self.snd_max = self.snd_max.max(self.snd_nxt);
            if out.timer.is_none() && in_flight == 0 {
                out.timer = Some(TimerCommand::Arm(self.rto));
            }
        }
    }

    fn set_cwnd(&mut self, cwnd: u32, out: &mut TcpActions) {
        if cwnd != self.cwnd {
            out.window_changes.push((self.cwnd, cwnd));
            self.cwnd = cwnd;
        }
    }

    fn update_rtt(&mut self, sample: SimTime) {
        let r = sample.as_secs_f64();
        match self.srtt {
            None => {
                self.srtt = Some(r);
                self.rttvar = r / 2.0;
            }
            Some(srtt) => {
                self.rttvar = 0.75 * self.rttvar + 0.25 * (srtt - r).abs();
                self.srtt = Some(0.875 * srtt + 0.125 * r);
            }
        }
        let srtt = self.srtt.unwrap_or(r);
        let rto = SimTime::try_from_secs_f64(srtt + 4.0 * self.rttvar).unwrap_or(MAX_RTO);
        self.rto = rto.clamp(MIN_RTO, MAX_RTO);
    }
}

/// Receiving half: cumulative ACKs, out-of-order segments are held until
/// the gap before them fills.
#[derive(Debug, Default)]
pub struct TcpReceiver {
    rcv_nxt: u64,
    out_of_order: BTreeMap<u64, u64>,
}

impl TcpReceiver {
    /// Returns the ACK number to send and how many bytes became deliverable.
    pub fn on_segment(&mut self, seq: u64, len: u32) -> (u64, u64) {
        let before = self.rcv_nxt;
        let end = seq + len as u64;
        if seq <= self.rcv_nxt {
            self.rcv_nxt = self.rcv_nxt.max(end);
        } else {
            let slot = self.out_of_order.entry(seq).or_insert(end);
            *slot = (*slot).max(end);
        }
        while let Some((&start, &stop)) = self.out_of_order.first_key_value() {
            if start > self.rcv_nxt {
                break;
            }
            self.rcv_nxt = self.rcv_nxt.max(stop);
            self.out_of_order.remove(&start);
        }
        (self.rcv_nxt, self.rcv_nxt - before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MSS: u32 = 1000;

    fn sender() -> TcpSender {
        TcpSender::new(MSS, CongestionOps::NewReno)
    }

    #[test]
    fn sends_up_to_initial_window() {
        let mut s = sender();
        let mut out = TcpActions::default();
        for _ in 0..20 {
            s.write(MSS, SimTime::ZERO, &mut out);
        }
        assert_eq!(out.segments.len(), INITIAL_WINDOW_SEGMENTS as usize);
        assert_eq!(out.timer, Some(TimerCommand::Arm(SimTime::from_secs(1))));
        assert_eq!(s.bytes_in_flight(), 10_000);
    }

    #[test]
    fn new_ack_grows_window_and_reports_change() {
        let mut s = sender();
        let mut out = TcpActions::default();
        for _ in 0..20 {
            s.write(MSS, SimTime::ZERO, &mut out);
        }
        let mut out = TcpActions::default();
        s.on_ack(1000, SimTime::from_millis(10), &mut out);
        assert_eq!(out.window_changes, vec![(10_000, 11_000)]);
        assert_eq!(s.acked_bytes(), 1000);
        // one segment freed by the ACK plus one from growth
        assert_eq!(out.segments.len(), 2);
    }

    #[test]
    fn triple_duplicate_ack_triggers_fast_retransmit() {
        let mut s = sender();
        let mut out = TcpActions::default();
        for _ in 0..10 {
            s.write(MSS, SimTime::ZERO, &mut out);
        }
        let mut out = TcpActions::default();
        for _ in 0..3 {
            s.on_ack(0, SimTime::from_millis(5), &mut out);
        }
        assert_eq!(
            out.segments,
            vec![OutgoingSegment {
                seq: 0,
                len: MSS,
                retransmit: true
            }]
        );
        assert_eq!(s.ssthresh(), 5_000);
        assert_eq!(out.window_changes, vec![(10_000, 8_000)]);

        // full ACK ends recovery and deflates to ssthresh
        let mut out = TcpActions::default();
        s.on_ack(10_000, SimTime::from_millis(10), &mut out);
        assert_eq!(out.window_changes, vec![(8_000, 5_000)]);
    }

    #[test]
    fn tahoe_restarts_from_one_segment() {
        let mut s = TcpSender::new(MSS, CongestionOps::Tahoe);
        let mut out = TcpActions::default();
        for _ in 0..10 {
            s.write(MSS, SimTime::ZERO, &mut out);
        }
        let mut out = TcpActions::default();
        for _ in 0..3 {
            s.on_ack(0, SimTime::from_millis(5), &mut out);
        }
        assert_eq!(s.cwnd(), MSS);
    }

    #[test]
    fn timeout_collapses_window_and_backs_off() {
        let mut s = sender();
        let mut out = TcpActions::default();
        s.write(5 * MSS, SimTime::ZERO, &mut out);
        let mut out = TcpActions::default();
        s.on_retransmit_timeout(SimTime::from_secs(1), &mut out);
        assert_eq!(out.window_changes, vec![(10_000, MSS)]);
        assert_eq!(out.segments.len(), 1);
        assert!(out.segments[0].retransmit);
        assert_eq!(out.timer, Some(TimerCommand::Arm(SimTime::from_secs(2))));
    }

    #[test]
    fn receiver_reassembles_out_of_order() {
        let mut r = TcpReceiver::default();
        assert_eq!(r.on_segment(0, 1000), (1000, 1000));
        assert_eq!(r.on_segment(2000, 1000), (1000, 0));
        assert_eq!(r.on_segment(3000, 1000), (1000, 0));
        assert_eq!(r.on_segment(1000, 1000), (4000, 3000));
        assert_eq!(r.on_segment(0, 1000), (4000, 0));
    }
}
