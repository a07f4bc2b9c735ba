use crate::packet::Packet;
use cwnd_lab_abstract::{
    DataRate, DeviceContainer, DeviceId, EngineError, InterfaceContainer, LinkConfig,
    NodeContainer, NodeId, SimTime,
};
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use tracing::debug;

const FIRST_EPHEMERAL_PORT: u16 = 49153;

#[derive(Debug, Clone, Copy)]
struct Route {
    network: u32,
    mask: u32,
    device: DeviceId,
}

#[derive(Debug)]
pub struct Node {
    pub id: NodeId,
    stack: bool,
    devices: Vec<DeviceId>,
    routes: Vec<Route>,
    next_socket: u32,
    next_ephemeral_port: u16,
}

impl Node {
    fn new(id: NodeId) -> Self {
        Self {
            id,
            stack: false,
            devices: Vec::new(),
            routes: Vec::new(),
            next_socket: 0,
            next_ephemeral_port: FIRST_EPHEMERAL_PORT,
        }
    }

    pub fn has_stack(&self) -> bool {
        self.stack
    }

    /// Index of the next socket in this node's socket list.
    pub fn allocate_socket_index(&mut self) -> u32 {
        let idx = self.next_socket;
        self.next_socket += 1;
        idx
    }

    pub fn allocate_ephemeral_port(&mut self) -> u16 {
        let port = self.next_ephemeral_port;
        self.next_ephemeral_port = self.next_ephemeral_port.checked_add(1).unwrap_or(FIRST_EPHEMERAL_PORT);
        port
    }
}

/// Point-to-point net device with a drop-tail transmit queue.
#[derive(Debug)]
pub struct Device {
    pub id: DeviceId,
    pub node: NodeId,
    pub peer: DeviceId,
    pub rate: DataRate,
    pub delay: SimTime,
    pub error_rate: f64,
    pub address: Option<(Ipv4Addr, Ipv4Addr)>,
    /// Packet currently being serialized onto the wire.
    pub in_tx: Option<Packet>,
    queue: VecDeque<Packet>,
    queue_limit: usize,
    pub queue_drops: u64,
    pub error_drops: u64,
}

impl Device {
    /// Hands the packet back when the queue is full.
    pub fn enqueue(&mut self, packet: Packet) -> Result<(), Packet> {
        if self.queue.len() >= self.queue_limit {
            self.queue_drops += 1;
            return Err(packet);
        }
        self.queue.push_back(packet);
        Ok(())
    }

    pub fn dequeue(&mut self) -> Option<Packet> {
        self.queue.pop_front()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

#[derive(Debug, Default)]
pub struct Topology {
    pub nodes: Vec<Node>,
    pub devices: Vec<Device>,
    networks: Vec<(u32, u32)>,
}

impl Topology {
    pub fn node(&self, id: NodeId) -> Result<&Node, EngineError> {
        self.nodes.get(id.0 as usize).ok_or(EngineError::UnknownNode(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, EngineError> {
        self.nodes
            .get_mut(id.0 as usize)
            .ok_or(EngineError::UnknownNode(id))
    }

    pub fn device(&self, id: DeviceId) -> Result<&Device, EngineError> {
        self.devices
            .get(id.0 as usize)
            .ok_or(EngineError::UnknownDevice(id))
    }

    pub fn device_mut(&mut self, id: DeviceId) -> Result<&mut Device, EngineError> {
        self.devices
            .get_mut(id.0 as usize)
            .ok_or(EngineError::UnknownDevice(id))
    }

    pub fn create_nodes(&mut self, count: usize) -> NodeContainer {
        let first = self.nodes.len() as u32;
        let ids: Vec<NodeId> = (first..first + count as u32).map(NodeId).collect();
        self.nodes.extend(ids.iter().map(|id| Node::new(*id)));
        NodeContainer(ids)
    }

    pub fn install_stack(&mut self, nodes: &NodeContainer) -> Result<(), EngineError> {
        for id in nodes.iter() {
            let node = self.node_mut(id)?;
            if node.stack {
                return Err(EngineError::InvalidTopology(format!(
                    "node {} already has an internet stack",
                    id.0
                )));
            }
            node.stack = true;
        }
        Ok(())
    }

    pub fn create_link(
        &mut self,
        nodes: &NodeContainer,
        link: &LinkConfig,
    ) -> Result<DeviceContainer, EngineError> {
        let (Some(a), Some(b)) = (nodes.get(0), nodes.get(1)) else {
            return Err(EngineError::InvalidTopology(
                "a point-to-point link needs two nodes".to_string(),
            ));
        };
        if a == b {
            return Err(EngineError::InvalidTopology(
                "cannot link a node to itself".to_string(),
            ));
        }
        self.node(a)?;
        self.node(b)?;
        if link.bandwidth.bps() == 0 || link.queue_packets == 0 {
            return Err(EngineError::InvalidTopology(
                "link bandwidth and queue limit must be positive".to_string(),
            ));
        }

        let da = DeviceId(self.devices.len() as u32);
        let db = DeviceId(da.0 + 1);
        for (id, node, peer) in [(da, a, db), (db, b, da)] {
            self.devices.push(Device {
                id,
                node,
                peer,
                rate: link.bandwidth,
                delay: link.delay,
                error_rate: link.error_rate.unwrap_or(0.0),
                address: None,
                in_tx: None,
                queue: VecDeque::new(),
                queue_limit: link.queue_packets as usize,
                queue_drops: 0,
                error_drops: 0,
            });
            self.node_mut(node)?.devices.push(id);
        }
        debug!(
            "link {:?} <-> {:?}: {} / {} / error {:?}",
            a, b, link.bandwidth, link.delay, link.error_rate
        );
        Ok(DeviceContainer(vec![da, db]))
    }

    pub fn assign_addresses(
        &mut self,
        devices: &DeviceContainer,
        base: Ipv4Addr,
        mask: Ipv4Addr,
    ) -> Result<InterfaceContainer, EngineError> {
        let base_bits = u32::from(base);
        let mask_bits = u32::from(mask);
        if mask_bits == 0 || mask_bits.leading_ones() + mask_bits.trailing_zeros() != 32 {
            return Err(EngineError::InvalidTopology(format!(
                "{mask} is not a contiguous network mask"
            )));
        }
        if base_bits & !mask_bits != 0 {
            return Err(EngineError::InvalidTopology(format!(
                "base {base} is not aligned to mask {mask}"
            )));
        }
        let hosts = (!mask_bits).saturating_sub(1) as usize;
        let wanted = devices.iter().count();
        if wanted > hosts {
            return Err(EngineError::InvalidTopology(format!(
                "{base}/{} has room for {hosts} hosts, {wanted} needed",
                mask_bits.leading_ones()
            )));
        }
        for &(net, net_mask) in &self.networks {
            let common = net_mask & mask_bits;
            if net & common == base_bits & common {
                return Err(EngineError::InvalidTopology(format!(
                    "address range {base}/{} overlaps {}/{}",
                    mask_bits.leading_ones(),
                    Ipv4Addr::from(net),
                    net_mask.leading_ones()
                )));
            }
        }
        for id in devices.iter() {
            let device = self.device(id)?;
            if device.address.is_some() {
                return Err(EngineError::InvalidTopology(format!(
                    "device {} already has an address",
                    id.0
                )));
            }
            if !self.node(device.node)?.stack {
                return Err(EngineError::StackMissing(device.node));
            }
        }

        let mut assigned = Vec::with_capacity(wanted);
        for (offset, id) in devices.iter().enumerate() {
            let addr = Ipv4Addr::from(base_bits + offset as u32 + 1);
            self.device_mut(id)?.address = Some((addr, mask));
            assigned.push((id, addr));
        }
        self.networks.push((base_bits, mask_bits));
        Ok(InterfaceContainer(assigned))
    }

    /// Connected routes for every addressed device, plus host routes to each
    /// link peer not already covered.
    pub fn populate_routing_tables(&mut self) {
        let mut tables: Vec<Vec<Route>> = vec![Vec::new(); self.nodes.len()];
        for device in &self.devices {
            if let Some((addr, mask)) = device.address {
                let mask = u32::from(mask);
                tables[device.node.0 as usize].push(Route {
                    network: u32::from(addr) & mask,
                    mask,
                    device: device.id,
                });
            }
        }
        for device in &self.devices {
            let Some((peer_addr, _)) = self.devices[device.peer.0 as usize].address else {
                continue;
            };
            let table = &mut tables[device.node.0 as usize];
            let peer_bits = u32::from(peer_addr);
            if !table.iter().any(|r| peer_bits & r.mask == r.network) {
                table.push(Route {
                    network: peer_bits,
                    mask: u32::MAX,
                    device: device.id,
                });
            }
        }
        for (node, routes) in self.nodes.iter_mut().zip(tables) {
            node.routes = routes;
        }
    }

    /// Longest-prefix match.
    pub fn route(&self, node: NodeId, destination: Ipv4Addr) -> Option<DeviceId> {
        let dst = u32::from(destination);
        self.nodes
            .get(node.0 as usize)?
            .routes
            .iter()
            .filter(|r| dst & r.mask == r.network)
            .max_by_key(|r| r.mask.leading_ones())
            .map(|r| r.device)
    }

    /// Source address a socket on `node` uses to reach `destination`.
    pub fn source_address(&self, node: NodeId, destination: Ipv4Addr) -> Option<Ipv4Addr> {
        let device = self.route(node, destination)?;
        self.devices[device.0 as usize].address.map(|(addr, _)| addr)
    }

    pub fn owns_address(&self, node: NodeId, addr: Ipv4Addr) -> bool {
        self.nodes.get(node.0 as usize).is_some_and(|n| {
            n.devices
                .iter()
                .any(|d| self.devices[d.0 as usize].address.map(|(a, _)| a) == Some(addr))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_link() -> (Topology, NodeContainer, DeviceContainer) {
        let mut topo = Topology::default();
        let nodes = topo.create_nodes(2);
        topo.install_stack(&nodes).unwrap();
        let devices = topo.create_link(&nodes, &LinkConfig::default()).unwrap();
        (topo, nodes, devices)
    }

    #[test]
    fn assigns_sequential_host_addresses() {
        let (mut topo, nodes, devices) = two_node_link();
        let ifaces = topo
            .assign_addresses(&devices, Ipv4Addr::new(10, 1, 1, 0), Ipv4Addr::new(255, 255, 255, 0))
            .unwrap();
        assert_eq!(ifaces.address(0), Some(Ipv4Addr::new(10, 1, 1, 1)));
        assert_eq!(ifaces.address(1), Some(Ipv4Addr::new(10, 1, 1, 2)));

        topo.populate_routing_tables();
        let a = nodes.get(0).unwrap();
        assert_eq!(topo.route(a, Ipv4Addr::new(10, 1, 1, 2)), devices.get(0));
        assert_eq!(topo.route(a, Ipv4Addr::new(192, 168, 0, 1)), None);
        assert_eq!(
            topo.source_address(a, Ipv4Addr::new(10, 1, 1, 2)),
            Some(Ipv4Addr::new(10, 1, 1, 1))
        );
    }

    #[test]
    fn rejects_duplicate_and_misaligned_ranges() {
        let (mut topo, nodes, devices) = two_node_link();
        let mask = Ipv4Addr::new(255, 255, 255, 0);
        topo.assign_addresses(&devices, Ipv4Addr::new(10, 1, 1, 0), mask)
            .unwrap();

        let second = topo.create_link(&nodes, &LinkConfig::default()).unwrap();
        let dup = topo.assign_addresses(&second, Ipv4Addr::new(10, 1, 1, 0), mask);
        assert!(matches!(dup, Err(EngineError::InvalidTopology(_))));

        let misaligned = topo.assign_addresses(&second, Ipv4Addr::new(10, 1, 2, 7), mask);
        assert!(matches!(misaligned, Err(EngineError::InvalidTopology(_))));

        assert!(topo.assign_addresses(&second, Ipv4Addr::new(10, 1, 2, 0), mask).is_ok());
    }

    #[test]
    fn stack_is_installed_once() {
        let (mut topo, nodes, _) = two_node_link();
        assert!(matches!(
            topo.install_stack(&nodes),
            Err(EngineError::InvalidTopology(_))
        ));
    }

    #[test]
    fn drop_tail_queue_hands_back_overflow() {
        let mut topo = Topology::default();
        let nodes = topo.create_nodes(2);
        let link = LinkConfig {
            queue_packets: 1,
            ..LinkConfig::default()
        };
        let devices = topo.create_link(&nodes, &link).unwrap();
        let dev = topo.device_mut(devices.get(0).unwrap()).unwrap();
        let packet = Packet {
            uid: 7,
            flow: cwnd_lab_abstract::FiveTuple {
                source: Ipv4Addr::new(10, 1, 1, 1),
                source_port: 49153,
                destination: Ipv4Addr::new(10, 1, 1, 2),
                destination_port: 5000,
                protocol: cwnd_lab_abstract::TransportKind::Udp,
            },
            segment: crate::packet::Segment::Udp { payload: 1024 },
        };
        assert!(dev.enqueue(packet.clone()).is_ok());
        assert!(dev.enqueue(packet).is_err());
        assert_eq!(dev.queue_drops, 1);
    }
}
