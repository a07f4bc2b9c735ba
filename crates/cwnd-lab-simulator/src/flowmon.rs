use crate::packet::Packet;
use cwnd_lab_abstract::{FiveTuple, FlowId, FlowStats};
use std::collections::{BTreeMap, HashMap};

/// Per-flow counters taken at the IP layer of every node.
#[derive(Debug, Default)]
pub struct FlowMonitor {
    ids: BTreeMap<FiveTuple, FlowId>,
    tuples: Vec<FiveTuple>,
    stats: Vec<FlowStats>,
    in_flight: HashMap<u64, FlowId>,
}

impl FlowMonitor {
    fn flow_id(&mut self, tuple: FiveTuple) -> FlowId {
        if let Some(id) = self.ids.get(&tuple) {
            return *id;
        }
        let id = FlowId(self.tuples.len() as u32 + 1);
        self.ids.insert(tuple, id);
        self.tuples.push(tuple);
        self.stats.push(FlowStats::default());
        id
    }

    fn stats_mut(&mut self, id: FlowId) -> &mut FlowStats {
        &mut self.stats[id.0 as usize - 1]
    }

    pub fn record_tx(&mut self, packet: &Packet) {
        let id = self.flow_id(packet.flow);
        let stats = self.stats_mut(id);
        stats.tx_bytes += packet.ip_size() as u64;
        stats.tx_packets += 1;
        self.in_flight.insert(packet.uid, id);
    }

    pub fn record_rx(&mut self, packet: &Packet) {
        if let Some(id) = self.in_flight.remove(&packet.uid) {
            let stats = self.stats_mut(id);
            stats.rx_bytes += packet.ip_size() as u64;
            stats.rx_packets += 1;
        }
    }

    pub fn record_drop(&mut self, packet: &Packet) {
        if let Some(id) = self.in_flight.remove(&packet.uid) {
            self.stats_mut(id).lost_packets += 1;
        }
    }

    /// Everything not yet received will never be: count it lost.
    pub fn check_for_lost_packets(&mut self) {
        let pending: Vec<FlowId> = self.in_flight.drain().map(|(_, id)| id).collect();
        for id in pending {
            self.stats_mut(id).lost_packets += 1;
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn flow_stats(&self) -> Vec<(FlowId, FlowStats)> {
        self.stats
            .iter()
            .enumerate()
            .map(|(idx, stats)| (FlowId(idx as u32 + 1), *stats))
            .collect()
    }

    pub fn classify(&self, id: FlowId) -> Option<FiveTuple> {
        let idx = (id.0 as usize).checked_sub(1)?;
        self.tuples.get(idx).copied()
    }
}
