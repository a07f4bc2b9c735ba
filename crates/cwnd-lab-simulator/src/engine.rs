use crate::app::{AppKind, Application, SocketRef};
use crate::congestion::CongestionOps;
use crate::flowmon::FlowMonitor;
use crate::packet::{Packet, Segment, TcpHeader};
use crate::tcp::{MAX_SEGMENT_BYTES, TcpActions, TcpReceiver, TcpSender, TimerCommand};
use crate::topology::Topology;
use cwnd_lab_abstract::{
    AppId, CancelToken, CongestionVariant, CongestionWindowSample, DeviceContainer, DeviceId,
    EngineError, EngineFactory, FiveTuple, FlowId, FlowStats, HaltReason, InterfaceContainer,
    LinkConfig, NodeContainer, NodeId, RunOutcome, SimTime, SimulationEngine, SubscriptionId,
    TracePath, TrafficProfile, TransportKind, WindowSink,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::{debug, info, warn};

/// Events processed without simulated time advancing before a run is
/// declared stalled.
const MAX_EVENTS_PER_INSTANT: u64 = 1_000_000;

#[derive(Debug)]
enum EventType {
    AppStart { app: AppId },
    AppStop { app: AppId },
    AppSend { app: AppId, generation: u64 },
    AppToggle { app: AppId, generation: u64 },
    TxComplete { device: DeviceId },
    Arrival { device: DeviceId, packet: Packet },
    RetransmitTimeout { conn: usize, generation: u64 },
}

#[derive(Debug)]
struct Event {
    time: SimTime,
    event_type: EventType,
    id: u64, // Unique ID to differentiate events at same time
}

// Custom Ord for Min-Heap (smallest time pops first)
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

#[derive(Debug)]
enum TcpRole {
    Sender(TcpSender),
    Receiver { app: AppId, receiver: TcpReceiver },
}

#[derive(Debug)]
struct TcpConnection {
    node: NodeId,
    socket_index: u32,
    /// Local endpoint first.
    flow: FiveTuple,
    role: TcpRole,
    rto_generation: u64,
}

struct Subscription {
    id: SubscriptionId,
    path: TracePath,
    sink: Box<dyn WindowSink>,
}

/// Discrete-event engine for a two-node point-to-point topology.
pub struct P2pEngine {
    time: SimTime,
    event_queue: BinaryHeap<Event>,
    event_id_counter: u64,
    rng: StdRng,
    destroyed: bool,

    topology: Topology,
    variant: CongestionVariant,
    apps: Vec<Application>,
    connections: Vec<TcpConnection>,
    /// Keyed by the receiving node and the flow as seen from that node.
    tcp_demux: HashMap<(NodeId, FiveTuple), usize>,
    listeners: HashMap<(NodeId, TransportKind, u16), AppId>,
    subscriptions: Vec<Subscription>,
    next_subscription: u64,
    flow_monitor: Option<FlowMonitor>,
    next_packet_uid: u64,
    processed_events: u64,
}

impl P2pEngine {
    pub fn new(seed: u64) -> Self {
        Self {
            time: SimTime::ZERO,
            event_queue: BinaryHeap::new(),
            event_id_counter: 0,
            rng: StdRng::seed_from_u64(seed),
            destroyed: false,
            topology: Topology::default(),
            variant: CongestionVariant::default(),
            apps: Vec::new(),
            connections: Vec::new(),
            tcp_demux: HashMap::new(),
            listeners: HashMap::new(),
            subscriptions: Vec::new(),
            next_subscription: 0,
            flow_monitor: None,
            next_packet_uid: 0,
            processed_events: 0,
        }
    }

    pub fn current_time(&self) -> SimTime {
        self.time
    }

    pub fn remaining_events(&self) -> usize {
        self.event_queue.len()
    }

    pub fn peek_next_event_time(&self) -> Option<SimTime> {
        self.event_queue.peek().map(|e| e.time)
    }

    /// Application-level bytes a packet sink has received.
    pub fn received_bytes(&self, app: AppId) -> Option<u64> {
        self.apps.get(app.0 as usize)?.received_bytes()
    }

    /// Packets dropped by full device queues.
    pub fn queue_drops(&self) -> u64 {
        self.topology.devices.iter().map(|d| d.queue_drops).sum()
    }

    /// Packets dropped by the receive error model.
    pub fn error_drops(&self) -> u64 {
        self.topology.devices.iter().map(|d| d.error_drops).sum()
    }

    fn ensure_live(&self) -> Result<(), EngineError> {
        if self.destroyed {
            Err(EngineError::Destroyed)
        } else {
            Ok(())
        }
    }

    fn push_event(&mut self, time: SimTime, event_type: EventType) {
        self.event_queue.push(Event {
            time,
            event_type,
            id: self.event_id_counter,
        });
        self.event_id_counter += 1;
    }

    /// Process the next event. Returns false if the queue is empty.
    fn step(&mut self) -> bool {
        let Some(event) = self.event_queue.pop() else {
            return false;
        };
        self.time = event.time;
        self.processed_events += 1;
        debug!("Processing event at {}: {:?}", self.time, event.event_type);

        match event.event_type {
            EventType::AppStart { app } => self.start_app(app),
            EventType::AppStop { app } => self.stop_app(app),
            EventType::AppSend { app, generation } => self.app_send(app, generation),
            EventType::AppToggle { app, generation } => self.app_toggle(app, generation),
            EventType::TxComplete { device } => self.tx_complete(device),
            EventType::Arrival { device, packet } => self.arrival(device, packet),
            EventType::RetransmitTimeout { conn, generation } => {
                let now = self.time;
                let Some(c) = self.connections.get_mut(conn) else {
                    return true;
                };
                if c.rto_generation != generation {
                    debug!("Skipping cancelled retransmission timer on connection {}", conn);
                    return true;
                }
                let mut out = TcpActions::default();
                if let TcpRole::Sender(sender) = &mut c.role {
                    sender.on_retransmit_timeout(now, &mut out);
                }
                self.process_tcp_actions(conn, out);
            }
        }
        true
    }

    fn start_app(&mut self, id: AppId) {
        let Some(app) = self.apps.get_mut(id.0 as usize) else {
            return;
        };
        if app.running {
            return;
        }
        app.running = true;
        app.generation += 1;
        let (node, generation, kind) = (app.node, app.generation, app.kind.clone());

        match kind {
            AppKind::PacketSink {
                protocol, local, ..
            } => {
                self.listeners.insert((node, protocol, local.port()), id);
                if protocol == TransportKind::Tcp
                    && let Ok(n) = self.topology.node_mut(node)
                {
                    let index = n.allocate_socket_index();
                    debug!("sink {:?} listening on {} (socket {})", id, local, index);
                }
            }
            AppKind::OnOff { off_time, .. } => {
                self.open_socket(id);
                self.push_event(self.time + off_time, EventType::AppToggle { app: id, generation });
            }
            AppKind::Periodic { .. } => {
                self.open_socket(id);
                self.push_event(self.time, EventType::AppSend { app: id, generation });
            }
        }
    }

    fn stop_app(&mut self, id: AppId) {
        let Some(app) = self.apps.get_mut(id.0 as usize) else {
            return;
        };
        app.running = false;
        app.generation += 1;
        if let AppKind::PacketSink {
            protocol, local, ..
        } = app.kind
        {
            self.listeners.remove(&(app.node, protocol, local.port()));
        }
        debug!("application {:?} stopped at {}", id, self.time);
    }

    fn app_toggle(&mut self, id: AppId, generation: u64) {
        let Some(app) = self.apps.get_mut(id.0 as usize) else {
            return;
        };
        if !app.running || app.generation != generation {
            return;
        }
        let AppKind::OnOff {
            packet_size,
            data_rate,
            on_time,
            off_time,
            on,
            ..
        } = &mut app.kind
        else {
            return;
        };
        let now = self.time;
        if *on {
            *on = false;
            app.generation += 1;
            let (off_time, generation) = (*off_time, app.generation);
            self.push_event(now + off_time, EventType::AppToggle { app: id, generation });
        } else {
            *on = true;
            let interval = data_rate.tx_time(*packet_size);
            let (on_time, off_time) = (*on_time, *off_time);
            self.push_event(now + interval, EventType::AppSend { app: id, generation });
            if off_time > SimTime::ZERO {
                self.push_event(now + on_time, EventType::AppToggle { app: id, generation });
            }
        }
    }

    fn app_send(&mut self, id: AppId, generation: u64) {
        let Some(app) = self.apps.get_mut(id.0 as usize) else {
            return;
        };
        if !app.running || app.generation != generation {
            return;
        }
        let now = self.time;
        let (bytes, next) = match &mut app.kind {
            AppKind::OnOff {
                packet_size,
                data_rate,
                ..
            } => (*packet_size, Some(now + data_rate.tx_time(*packet_size))),
            AppKind::Periodic {
                packet_size,
                interval,
                max_packets,
                sent,
                ..
            } => {
                if *sent >= *max_packets {
                    return;
                }
                *sent += 1;
                let next = (*sent < *max_packets).then(|| now + *interval);
                (*packet_size, next)
            }
            AppKind::PacketSink { .. } => return,
        };
        let (node, socket) = (app.node, app.socket);
        if let Some(next) = next {
            self.push_event(next, EventType::AppSend { app: id, generation });
        }

        match socket {
            Some(SocketRef::Tcp(conn)) => {
                let mut out = TcpActions::default();
                if let Some(TcpConnection {
                    role: TcpRole::Sender(sender),
                    ..
                }) = self.connections.get_mut(conn)
                {
                    let accepted = sender.write(bytes, now, &mut out);
                    if accepted < bytes {
                        debug!("send buffer full, {} of {} bytes accepted", accepted, bytes);
                    }
                }
                self.process_tcp_actions(conn, out);
            }
            Some(SocketRef::Udp(flow)) => {
                let packet = self.new_packet(flow, Segment::Udp { payload: bytes });
                self.send_ip(node, packet);
            }
            None => {}
        }
    }

    fn open_socket(&mut self, id: AppId) {
        let Some(app) = self.apps.get(id.0 as usize) else {
            return;
        };
        let (node, protocol) = (app.node, app.protocol());
        let (remote, packet_size) = match &app.kind {
            AppKind::OnOff {
                remote,
                packet_size,
                ..
            }
            | AppKind::Periodic {
                remote,
                packet_size,
                ..
            } => (*remote, *packet_size),
            AppKind::PacketSink { .. } => return,
        };
        let Some(source) = self.topology.source_address(node, *remote.ip()) else {
            warn!("application {:?}: no route from {:?} to {}", id, node, remote);
            return;
        };
        let Ok(n) = self.topology.node_mut(node) else {
            return;
        };
        let socket_index = n.allocate_socket_index();
        let flow = FiveTuple {
            source,
            source_port: n.allocate_ephemeral_port(),
            destination: *remote.ip(),
            destination_port: remote.port(),
            protocol,
        };

        let socket = match protocol {
            TransportKind::Udp => SocketRef::Udp(flow),
            TransportKind::Tcp => {
                let ops = match CongestionOps::for_variant(self.variant) {
                    Ok(ops) => ops,
                    Err(e) => {
                        warn!("application {:?}: {}", id, e);
                        return;
                    }
                };
                let sender = TcpSender::new(packet_size.min(MAX_SEGMENT_BYTES), ops);
                let initial = sender.cwnd();
                let conn = self.connections.len();
                self.connections.push(TcpConnection {
                    node,
                    socket_index,
                    flow,
                    role: TcpRole::Sender(sender),
                    rto_generation: 0,
                });
                self.tcp_demux.insert((node, flow), conn);
                self.notify_window(conn, 0, initial);
                SocketRef::Tcp(conn)
            }
        };
        info!(
            "{:?} socket {} open at {}: {} ({})",
            node, socket_index, self.time, flow, self.variant
        );
        if let Some(app) = self.apps.get_mut(id.0 as usize) {
            app.socket = Some(socket);
        }
    }

    fn new_packet(&mut self, flow: FiveTuple, segment: Segment) -> Packet {
        let uid = self.next_packet_uid;
        self.next_packet_uid += 1;
        Packet { uid, flow, segment }
    }

    fn send_ip(&mut self, node: NodeId, packet: Packet) {
        let Some(device) = self.topology.route(node, packet.flow.destination) else {
            debug!("{:?}: no route to {}, dropping", node, packet.flow.destination);
            return;
        };
        if let Some(mon) = self.flow_monitor.as_mut() {
            mon.record_tx(&packet);
        }
        let Ok(dev) = self.topology.device_mut(device) else {
            return;
        };
        if dev.in_tx.is_none() && dev.queue_len() == 0 {
            self.begin_tx(device, packet);
        } else if let Err(dropped) = dev.enqueue(packet) {
            debug!("{:?}: queue full, dropping packet {}", device, dropped.uid);
            if let Some(mon) = self.flow_monitor.as_mut() {
                mon.record_drop(&dropped);
            }
        }
    }

    fn begin_tx(&mut self, device: DeviceId, packet: Packet) {
        let Ok(dev) = self.topology.device_mut(device) else {
            return;
        };
        let done = self.time + dev.rate.tx_time(packet.wire_size());
        dev.in_tx = Some(packet);
        self.push_event(done, EventType::TxComplete { device });
    }

    fn tx_complete(&mut self, device: DeviceId) {
        let Ok(dev) = self.topology.device_mut(device) else {
            return;
        };
        let Some(packet) = dev.in_tx.take() else {
            return;
        };
        let (peer, delay) = (dev.peer, dev.delay);
        let next = dev.dequeue();
        self.push_event(self.time + delay, EventType::Arrival { device: peer, packet });
        if let Some(next) = next {
            self.begin_tx(device, next);
        }
    }

    fn arrival(&mut self, device: DeviceId, packet: Packet) {
        let Ok(dev) = self.topology.device_mut(device) else {
            return;
        };
        let node = dev.node;
        if dev.error_rate > 0.0 && self.rng.random::<f64>() < dev.error_rate {
            dev.error_drops += 1;
            debug!("{:?}: receive error on packet {}", device, packet.uid);
            if let Some(mon) = self.flow_monitor.as_mut() {
                mon.record_drop(&packet);
            }
            return;
        }
        if let Some(mon) = self.flow_monitor.as_mut() {
            mon.record_rx(&packet);
        }
        if !self.topology.owns_address(node, packet.flow.destination) {
            debug!("{:?}: not addressed to us ({}), dropping", node, packet.flow.destination);
            return;
        }
        match packet.segment {
            Segment::Tcp { header, payload } => self.deliver_tcp(node, packet.flow, header, payload),
            Segment::Udp { payload } => {
                match self.listeners.get(&(node, TransportKind::Udp, packet.flow.destination_port)) {
                    Some(app) => {
                        let app = *app;
                        self.credit_sink(app, payload as u64);
                    }
                    None => debug!("{:?}: no UDP socket on port {}", node, packet.flow.destination_port),
                }
            }
        }
    }

    fn deliver_tcp(&mut self, node: NodeId, flow: FiveTuple, header: TcpHeader, payload: u32) {
        let local = flow.reversed();
        let conn = match self.tcp_demux.get(&(node, local)) {
            Some(conn) => *conn,
            None if payload > 0 => {
                match self.listeners.get(&(node, TransportKind::Tcp, local.source_port)) {
                    Some(app) => {
                        let app = *app;
                        self.accept(node, local, app)
                    }
                    None => {
                        debug!("{:?}: no listener for {}", node, flow);
                        return;
                    }
                }
            }
            None => {
                debug!("{:?}: stray ACK for {}", node, flow);
                return;
            }
        };

        let now = self.time;
        let mut out = TcpActions::default();
        let reply = match &mut self.connections[conn].role {
            TcpRole::Sender(sender) => {
                if header.is_ack() {
                    sender.on_ack(header.ack, now, &mut out);
                }
                None
            }
            TcpRole::Receiver { app, receiver } => {
                let (ack, delivered) = receiver.on_segment(header.seq, payload);
                Some((*app, ack, delivered))
            }
        };
        match reply {
            None => self.process_tcp_actions(conn, out),
            Some((app, ack, delivered)) => {
                if delivered > 0 {
                    self.credit_sink(app, delivered);
                }
                let packet = self.new_packet(
                    local,
                    Segment::Tcp {
                        header: TcpHeader::pure_ack(ack),
                        payload: 0,
                    },
                );
                self.send_ip(node, packet);
            }
        }
    }

    /// Accepted connections take the next socket index after the listener.
    fn accept(&mut self, node: NodeId, local: FiveTuple, app: AppId) -> usize {
        let socket_index = self
            .topology
            .node_mut(node)
            .map(|n| n.allocate_socket_index())
            .unwrap_or_default();
        let conn = self.connections.len();
        self.connections.push(TcpConnection {
            node,
            socket_index,
            flow: local,
            role: TcpRole::Receiver {
                app,
                receiver: TcpReceiver::default(),
            },
            rto_generation: 0,
        });
        self.tcp_demux.insert((node, local), conn);
        debug!("{:?} accepted {} as socket {}", node, local.reversed(), socket_index);
        conn
    }

    fn credit_sink(&mut self, app: AppId, bytes: u64) {
        if let Some(Application {
            kind: AppKind::PacketSink { received_bytes, .. },
            ..
        }) = self.apps.get_mut(app.0 as usize)
        {
            *received_bytes += bytes;
        }
    }

    fn process_tcp_actions(&mut self, conn: usize, actions: TcpActions) {
        for (old, new) in actions.window_changes {
            self.notify_window(conn, old, new);
        }
        let Some(c) = self.connections.get_mut(conn) else {
            return;
        };
        let (node, flow) = (c.node, c.flow);
        match actions.timer {
            Some(TimerCommand::Arm(delay)) => {
                c.rto_generation += 1;
                let generation = c.rto_generation;
                self.push_event(
                    self.time + delay,
                    EventType::RetransmitTimeout { conn, generation },
                );
            }
            Some(TimerCommand::Cancel) => c.rto_generation += 1,
            None => {}
        }
        for segment in actions.segments {
            if segment.retransmit {
                debug!("{:?} retransmitting seq {} at {}", node, segment.seq, self.time);
            }
            let packet = self.new_packet(
                flow,
                Segment::Tcp {
                    header: TcpHeader::data(segment.seq),
                    payload: segment.len,
                },
            );
            self.send_ip(node, packet);
        }
    }

    fn notify_window(&mut self, conn: usize, old: u32, new: u32) {
        let Some(c) = self.connections.get(conn) else {
            return;
        };
        let path = TracePath::congestion_window(c.node.0, c.socket_index);
        let sample = CongestionWindowSample::new(self.time, old, new);
        for sub in self.subscriptions.iter_mut().filter(|s| s.path == path) {
            sub.sink.record_sample(sample);
        }
    }

    fn require_stack(&self, node: NodeId) -> Result<(), EngineError> {
        if self.topology.node(node)?.has_stack() {
            Ok(())
        } else {
            Err(EngineError::StackMissing(node))
        }
    }
}

impl SimulationEngine for P2pEngine {
    fn create_nodes(&mut self, count: usize) -> Result<NodeContainer, EngineError> {
        self.ensure_live()?;
        if count == 0 {
            return Err(EngineError::InvalidTopology("zero nodes requested".to_string()));
        }
        Ok(self.topology.create_nodes(count))
    }

    fn install_stack(&mut self, nodes: &NodeContainer) -> Result<(), EngineError> {
        self.ensure_live()?;
        self.topology.install_stack(nodes)
    }

    fn create_link(
        &mut self,
        nodes: &NodeContainer,
        link: &LinkConfig,
    ) -> Result<DeviceContainer, EngineError> {
        self.ensure_live()?;
        self.topology.create_link(nodes, link)
    }

    fn assign_addresses(
        &mut self,
        devices: &DeviceContainer,
        base: Ipv4Addr,
        mask: Ipv4Addr,
    ) -> Result<InterfaceContainer, EngineError> {
        self.ensure_live()?;
        self.topology.assign_addresses(devices, base, mask)
    }

    fn populate_routing_tables(&mut self) -> Result<(), EngineError> {
        self.ensure_live()?;
        self.topology.populate_routing_tables();
        Ok(())
    }

    fn set_congestion_control(&mut self, variant: CongestionVariant) -> Result<(), EngineError> {
        self.ensure_live()?;
        CongestionOps::for_variant(variant)?;
        self.variant = variant;
        Ok(())
    }

    fn install_receiver(
        &mut self,
        node: NodeId,
        protocol: TransportKind,
        local: SocketAddrV4,
    ) -> Result<AppId, EngineError> {
        self.ensure_live()?;
        self.require_stack(node)?;
        if !local.ip().is_unspecified() && !self.topology.owns_address(node, *local.ip()) {
            return Err(EngineError::InvalidTopology(format!(
                "{} is not an address of node {}",
                local.ip(),
                node.0
            )));
        }
        let taken = self.apps.iter().any(|app| {
            app.node == node
                && matches!(app.kind, AppKind::PacketSink { protocol: p, local: l, .. }
                    if p == protocol && l.port() == local.port())
        });
        if taken {
            return Err(EngineError::InvalidTopology(format!(
                "{protocol} port {} already bound on node {}",
                local.port(),
                node.0
            )));
        }
        let id = AppId(self.apps.len() as u32);
        self.apps.push(Application::sink(node, protocol, local));
        Ok(id)
    }

    fn install_sender(
        &mut self,
        node: NodeId,
        protocol: TransportKind,
        remote: SocketAddrV4,
        traffic: &TrafficProfile,
    ) -> Result<AppId, EngineError> {
        self.ensure_live()?;
        self.require_stack(node)?;
        let app = Application::sender(node, protocol, remote, traffic)?;
        let id = AppId(self.apps.len() as u32);
        self.apps.push(app);
        Ok(id)
    }

    fn schedule_app(&mut self, app: AppId, start: SimTime, stop: SimTime) -> Result<(), EngineError> {
        self.ensure_live()?;
        let entry = self
            .apps
            .get_mut(app.0 as usize)
            .ok_or(EngineError::UnknownApp(app))?;
        if stop <= start {
            return Err(EngineError::InvalidTopology(format!(
                "application {} stops ({stop}) before it starts ({start})",
                app.0
            )));
        }
        if entry.scheduled {
            return Err(EngineError::InvalidTopology(format!(
                "application {} is already scheduled",
                app.0
            )));
        }
        entry.scheduled = true;
        self.push_event(start, EventType::AppStart { app });
        self.push_event(stop, EventType::AppStop { app });
        Ok(())
    }

    fn subscribe_window_changes(
        &mut self,
        path: &TracePath,
        sink: Box<dyn WindowSink>,
    ) -> Result<SubscriptionId, EngineError> {
        self.ensure_live()?;
        self.topology.node(NodeId(path.node))?;
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscriptions.push(Subscription {
            id,
            path: *path,
            sink,
        });
        debug!("subscription {:?} on {}", id, path);
        Ok(id)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> Option<Box<dyn WindowSink>> {
        let pos = self.subscriptions.iter().position(|s| s.id == id)?;
        Some(self.subscriptions.remove(pos).sink)
    }

    fn install_flow_monitor(&mut self) -> Result<(), EngineError> {
        self.ensure_live()?;
        self.flow_monitor.get_or_insert_with(FlowMonitor::default);
        Ok(())
    }

    fn run(&mut self, stop: SimTime, cancel: &CancelToken) -> Result<RunOutcome, EngineError> {
        self.ensure_live()?;
        if stop < self.time {
            return Err(EngineError::Fault(format!(
                "stop time {stop} is before current time {}",
                self.time
            )));
        }
        let mut last = self.time;
        let mut same_instant = 0u64;
        let outcome = loop {
            if cancel.is_cancelled() {
                break RunOutcome::Halted {
                    at: self.time,
                    reason: HaltReason::Cancelled,
                };
            }
            match self.peek_next_event_time() {
                Some(next) if next <= stop => {}
                // An idle engine simply lets time pass until the stop point.
                _ => {
                    self.time = stop;
                    break RunOutcome::Completed { at: stop };
                }
            }
            self.step();
            if self.time == last {
                same_instant += 1;
                if same_instant > MAX_EVENTS_PER_INSTANT {
                    warn!("simulated time stuck at {}", self.time);
                    break RunOutcome::Halted {
                        at: self.time,
                        reason: HaltReason::Stalled,
                    };
                }
            } else {
                last = self.time;
                same_instant = 0;
            }
        };
        info!(
            "run ended at {} after {} events ({} queue drops, {} error drops)",
            outcome.reached(),
            self.processed_events,
            self.queue_drops(),
            self.error_drops()
        );
        Ok(outcome)
    }

    fn check_for_lost_packets(&mut self) {
        if let Some(mon) = self.flow_monitor.as_mut() {
            mon.check_for_lost_packets();
        }
    }

    fn flow_stats(&self) -> Vec<(FlowId, FlowStats)> {
        self.flow_monitor
            .as_ref()
            .map(FlowMonitor::flow_stats)
            .unwrap_or_default()
    }

    fn classify(&self, flow: FlowId) -> Option<FiveTuple> {
        self.flow_monitor.as_ref()?.classify(flow)
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        debug!(
            "destroying engine at {} ({} events pending, {} subscriptions)",
            self.time,
            self.event_queue.len(),
            self.subscriptions.len()
        );
        self.event_queue.clear();
        self.topology = Topology::default();
        self.apps.clear();
        self.connections.clear();
        self.tcp_demux.clear();
        self.listeners.clear();
        self.subscriptions.clear();
        self.flow_monitor = None;
        self.destroyed = true;
    }
}

/// Builds a fresh [`P2pEngine`] per session.
#[derive(Debug, Clone, Copy, Default)]
pub struct P2pEngineFactory;

impl EngineFactory for P2pEngineFactory {
    type Engine = P2pEngine;

    fn create(&self, seed: u64) -> Result<P2pEngine, EngineError> {
        Ok(P2pEngine::new(seed))
    }
}
