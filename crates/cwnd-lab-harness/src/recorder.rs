use cwnd_lab_abstract::{CancelToken, CongestionWindowSample, SimTime, WindowSink};
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("engine delivered {rejected} window sample(s) out of time order")]
pub struct OutOfOrderSamples {
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct RecorderState {
    samples: Vec<CongestionWindowSample>,
    rejected: u64,
    /// Trip `token` once `limit` samples were accepted.
    stop_after: Option<(usize, CancelToken)>,
}

/// Accumulates the congestion-window changes of one run, in arrival order.
///
/// The engine owns the subscription side (a boxed [`WindowSink`] obtained
/// from [`TraceRecorder::sink`]); the driver keeps the recorder and reads the
/// samples back once the run is over. Both live on the thread that drives
/// simulated time.
#[derive(Debug, Clone, Default)]
pub struct TraceRecorder {
    state: Rc<RefCell<RecorderState>>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests an early stop through `token` after `limit` samples. Samples
    /// arriving before the engine notices the cancellation are ignored.
    pub fn stop_after(self, limit: usize, token: CancelToken) -> Self {
        self.state.borrow_mut().stop_after = Some((limit, token));
        self
    }

    /// Timestamps must not go backwards; offending samples are dropped and
    /// counted.
    pub fn record_sample(&self, time: SimTime, old_window: u32, new_window: u32) {
        self.push(CongestionWindowSample::new(time, old_window, new_window));
    }

    fn push(&self, sample: CongestionWindowSample) {
        let mut state = self.state.borrow_mut();
        if let Some((limit, _)) = &state.stop_after
            && state.samples.len() >= *limit
        {
            return;
        }
        if let Some(last) = state.samples.last()
            && sample.time < last.time
        {
            warn!(
                "rejecting window sample at {} (last accepted at {})",
                sample.time, last.time
            );
            state.rejected += 1;
            return;
        }
        state.samples.push(sample);
        if let Some((limit, token)) = &state.stop_after
            && state.samples.len() >= *limit
        {
            token.cancel();
        }
    }

    pub fn sink(&self) -> Box<dyn WindowSink> {
        Box::new(RecorderSink(self.clone()))
    }

    pub fn len(&self) -> usize {
        self.state.borrow().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rejected(&self) -> u64 {
        self.state.borrow().rejected
    }

    /// Hands over the recorded samples. A recorder that had to reject
    /// anything is reporting a misbehaving engine.
    pub fn finish(&self) -> Result<Vec<CongestionWindowSample>, OutOfOrderSamples> {
        let mut state = self.state.borrow_mut();
        if state.rejected > 0 {
            return Err(OutOfOrderSamples {
                rejected: state.rejected,
            });
        }
        Ok(std::mem::take(&mut state.samples))
    }
}

struct RecorderSink(TraceRecorder);

impl WindowSink for RecorderSink {
    fn record_sample(&mut self, sample: CongestionWindowSample) {
        self.0.push(sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample;

    #[test]
    fn keeps_arrival_order_and_equal_timestamps() {
        let recorder = TraceRecorder::new();
        let mut sink = recorder.sink();
        sink.record_sample(sample(1000, 0, 10_000));
        sink.record_sample(sample(1010, 10_000, 11_000));
        sink.record_sample(sample(1010, 11_000, 12_000));
        assert_eq!(recorder.len(), 3);
        let samples = recorder.finish().unwrap();
        assert_eq!(samples[2], sample(1010, 11_000, 12_000));
    }

    #[test]
    fn out_of_order_samples_poison_the_run() {
        let recorder = TraceRecorder::new();
        recorder.record_sample(SimTime::from_secs(2), 0, 1000);
        recorder.record_sample(SimTime::from_secs(1), 1000, 2000);
        assert_eq!(recorder.len(), 1);
        assert_eq!(recorder.rejected(), 1);
        assert_eq!(recorder.finish(), Err(OutOfOrderSamples { rejected: 1 }));
    }

    #[test]
    fn trips_cancel_token_at_limit() {
        let token = CancelToken::new();
        let recorder = TraceRecorder::new().stop_after(2, token.clone());
        recorder.record_sample(SimTime::from_millis(1), 0, 1);
        assert!(!token.is_cancelled());
        recorder.record_sample(SimTime::from_millis(2), 1, 2);
        assert!(token.is_cancelled());
        recorder.record_sample(SimTime::from_millis(2), 2, 3);
        assert_eq!(recorder.len(), 2);
    }
}
