use cwnd_lab_abstract::{EngineError, FiveTuple, FlowId, FlowRecord, SimulationEngine};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollectError {
    #[error("flow monitor was never installed")]
    NotInstalled,
    #[error("engine could not classify flow {0:?}")]
    Unclassified(FlowId),
}

/// Reads the engine's flow monitor into per-five-tuple records.
#[derive(Debug, Default)]
pub struct FlowStatsCollector {
    installed: bool,
}

impl FlowStatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the flow monitor on every node.
    pub fn install<E: SimulationEngine + ?Sized>(&mut self, engine: &mut E) -> Result<(), EngineError> {
        engine.install_flow_monitor()?;
        self.installed = true;
        Ok(())
    }

    /// Finalizes loss accounting, then freezes the counters.
    pub fn snapshot<E: SimulationEngine + ?Sized>(
        &self,
        engine: &mut E,
    ) -> Result<BTreeMap<FiveTuple, FlowRecord>, CollectError> {
        if !self.installed {
            return Err(CollectError::NotInstalled);
        }
        engine.check_for_lost_packets();

        let mut records: BTreeMap<FiveTuple, FlowRecord> = BTreeMap::new();
        for (id, stats) in engine.flow_stats() {
            let tuple = engine.classify(id).ok_or(CollectError::Unclassified(id))?;
            debug!(
                "flow {:?} {}: tx {} B, rx {} B, lost {} pkts",
                id, tuple, stats.tx_bytes, stats.rx_bytes, stats.lost_packets
            );
            records
                .entry(tuple)
                .and_modify(|record| record.absorb(&stats))
                .or_insert_with(|| FlowRecord::new(tuple, &stats));
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Script, ScriptedFactory, stats, tuple};
    use cwnd_lab_abstract::EngineFactory;

    #[test]
    fn snapshot_finalizes_losses_first() {
        let factory = ScriptedFactory::new(Script {
            flows: vec![(tuple(49153), stats(10_400)), (tuple(49154), stats(2_080))],
            lost_on_check: 3,
            ..Script::default()
        });
        let mut engine = factory.create(1).unwrap();
        let mut collector = FlowStatsCollector::new();
        assert_eq!(collector.snapshot(&mut engine), Err(CollectError::NotInstalled));

        collector.install(&mut engine).unwrap();
        let records = collector.snapshot(&mut engine).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[&tuple(49153)].lost_packets, 3);
        assert_eq!(records[&tuple(49154)].rx_bytes, 2_080);

        let calls = factory.calls();
        let check = calls.iter().position(|c| *c == "check_for_lost_packets");
        let read = calls.iter().position(|c| *c == "flow_stats");
        assert!(check.is_some() && check < read);
    }

    #[test]
    fn unclassifiable_flow_is_an_error() {
        let factory = ScriptedFactory::new(Script {
            flows: vec![(tuple(49153), stats(1_040))],
            unclassified: true,
            ..Script::default()
        });
        let mut engine = factory.create(1).unwrap();
        let mut collector = FlowStatsCollector::new();
        collector.install(&mut engine).unwrap();
        assert_eq!(
            collector.snapshot(&mut engine),
            Err(CollectError::Unclassified(FlowId(1)))
        );
    }
}
