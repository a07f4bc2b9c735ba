//! Scoped access to an engine.
//!
//! Engines keep process-wide mutable state, so at most one session may be
//! open per gate. A session destroys its engine and releases the gate when
//! it is closed or dropped.

use cwnd_lab_abstract::{EngineError, EngineFactory, SimulationEngine};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct SessionGate(Arc<AtomicBool>);

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fails with [`EngineError::SessionBusy`] while another session is open.
    pub fn open<F: EngineFactory>(
        &self,
        factory: &F,
        seed: u64,
    ) -> Result<EngineSession<F::Engine>, EngineError> {
        if self
            .0
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::SessionBusy);
        }
        match factory.create(seed) {
            Ok(engine) => Ok(EngineSession {
                engine,
                gate: self.clone(),
                closed: false,
            }),
            Err(e) => {
                self.release();
                Err(e)
            }
        }
    }

    fn release(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct EngineSession<E: SimulationEngine> {
    engine: E,
    gate: SessionGate,
    closed: bool,
}

impl<E: SimulationEngine> EngineSession<E> {
    pub fn engine(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.engine.destroy();
        self.gate.release();
        self.closed = true;
        debug!("engine session closed");
    }
}

impl<E: SimulationEngine> Drop for EngineSession<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
