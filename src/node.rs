//! Node orchestrator: one radio-bearing device and its connections.
//!
//! A node owns its link-layer endpoints (one or more connections when central), a traffic
//! source per connection, an optional channel classifier per central connection, and the
//! event sinks subscribed to its link-layer events. Each `run(now)` drains the traffic
//! sources into the connection queues, advances every connection state machine, fans
//! observable events out, and reports when the node next wants to run.

use crate::afh::{ChannelClassifier, Classifier};
use crate::link::{
    Connection, EventSink, LinkAction, LinkEvent, Reception, Role, Transmission,
};
use crate::phy::DataChannel;
use crate::time::{Duration, Instant};

/// Radio and placement parameters of a node, from the scenario file.
#[derive(Clone, Debug)]
pub struct NodeInfo {
    pub name: String,
    pub id: u32,
    /// Cartesian position in metres.
    pub position: [f64; 3],
    pub role: Role,
    /// Transmitter power in dBm, within [-20, 20].
    pub tx_power_dbm: i8,
    pub rx_sensitivity_dbm: i8,
    pub noise_figure_db: i8,
    /// Maximum distance at which this receiver hears anything, metres.
    pub range_m: f64,
    /// Interference modelling fidelity, 0 or 1.
    pub interference_fidelity: u8,
}

/// Lazy byte-stream generator feeding a connection's transmit queue.
pub trait TrafficSource {
    /// The next payload due at or before `now`, with the timestamp it was produced at.
    /// Polled repeatedly until it yields `None`.
    fn next(&mut self, now: Instant) -> Option<(Vec<u8>, Instant)>;

    /// When the source will produce its next payload, if ever.
    fn next_time(&self) -> Option<Instant>;
}

/// Constant-bit-rate source: fixed-size payloads at a fixed rate.
pub struct CbrSource {
    payload_len: usize,
    period: Duration,
    next_at: Instant,
    seq: u32,
}

impl CbrSource {
    /// A source emitting `payload_len`-byte payloads at `bit_rate_kbps`.
    pub fn new(payload_len: usize, bit_rate_kbps: u32) -> Self {
        assert!(payload_len > 0 && bit_rate_kbps > 0);
        let period = Duration::from_micros(payload_len as u64 * 8 * 1_000 / u64::from(bit_rate_kbps));
        Self {
            payload_len,
            period,
            next_at: Instant::ZERO,
            seq: 0,
        }
    }
}

impl TrafficSource for CbrSource {
    fn next(&mut self, now: Instant) -> Option<(Vec<u8>, Instant)> {
        if self.next_at > now {
            return None;
        }
        let produced_at = self.next_at;
        self.next_at += self.period;

        let mut payload = vec![0u8; self.payload_len];
        let tag = self.seq.to_le_bytes();
        let n = tag.len().min(payload.len());
        payload[..n].copy_from_slice(&tag[..n]);
        self.seq = self.seq.wrapping_add(1);

        Some((payload, produced_at))
    }

    fn next_time(&self) -> Option<Instant> {
        Some(self.next_at)
    }
}

/// A source that never produces traffic; the connection idles on empty PDUs.
pub struct SilentSource;

impl TrafficSource for SilentSource {
    fn next(&mut self, _now: Instant) -> Option<(Vec<u8>, Instant)> {
        None
    }

    fn next_time(&self) -> Option<Instant> {
        None
    }
}

/// Result of advancing a node.
pub struct NodeOutcome {
    /// Frames to put on the air, in transmission order.
    pub transmissions: Vec<Transmission>,
    /// When the node next wants to run.
    pub next_wake: Option<Instant>,
}

/// One simulated device.
pub struct Node {
    pub info: NodeInfo,
    connections: Vec<Connection>,
    sources: Vec<Box<dyn TrafficSource>>,
    classifiers: Vec<Option<ChannelClassifier>>,
    sinks: Vec<Box<dyn EventSink>>,
}

impl Node {
    pub fn new(info: NodeInfo) -> Self {
        Self {
            info,
            connections: Vec::new(),
            sources: Vec::new(),
            classifiers: Vec::new(),
            sinks: Vec::new(),
        }
    }

    /// Attaches a connection endpoint with its traffic source and, for centrals running
    /// AFH, its channel classifier.
    pub fn add_connection(
        &mut self,
        connection: Connection,
        source: Box<dyn TrafficSource>,
        classifier: Option<ChannelClassifier>,
    ) {
        self.connections.push(connection);
        self.sources.push(source);
        self.classifiers.push(classifier);
    }

    /// Subscribes a sink to this node's link-layer events.
    pub fn add_sink(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn connection_mut(&mut self, index: usize) -> &mut Connection {
        &mut self.connections[index]
    }

    fn conn_index(&self, access_address: u32) -> Option<usize> {
        self.connections
            .iter()
            .position(|c| c.access_address() == access_address)
    }

    /// Advances the node to `now`.
    pub fn run(&mut self, now: Instant) -> NodeOutcome {
        let mut actions = Vec::new();
        for (i, conn) in self.connections.iter_mut().enumerate() {
            if !conn.is_active() {
                continue;
            }
            while let Some((payload, produced_at)) = self.sources[i].next(now) {
                conn.enqueue_app(&payload, produced_at);
            }
            conn.poll(now, &mut actions);
        }
        self.dispatch(now, actions)
    }

    /// PHY indication: a frame addressed to `access_address` started arriving.
    pub fn rx_start(&mut self, now: Instant, access_address: u32, channel: DataChannel) -> NodeOutcome {
        let mut actions = Vec::new();
        if let Some(i) = self.conn_index(access_address) {
            let conn = &mut self.connections[i];
            conn.catch_up(now, &mut actions);
            conn.on_rx_start(now, channel);
        }
        self.dispatch(now, actions)
    }

    /// PHY indication: a frame finished arriving.
    pub fn rx_end(&mut self, now: Instant, rx: Reception) -> NodeOutcome {
        let mut actions = Vec::new();
        if let Some(i) = self.conn_index(rx.access_address) {
            let conn = &mut self.connections[i];
            conn.catch_up(now, &mut actions);
            conn.on_rx_end(now, rx, &mut actions);
        }
        self.dispatch(now, actions)
    }

    /// Periodic classifier callback.
    pub fn classifier_tick(&mut self, now: Instant) -> NodeOutcome {
        for i in 0..self.connections.len() {
            if let Some(classifier) = self.classifiers[i].as_mut() {
                if let Some(list) = classifier.tick(now) {
                    self.connections[i].update_channel_list(&list);
                }
            }
        }
        NodeOutcome {
            transmissions: Vec::new(),
            next_wake: self.next_wake(),
        }
    }

    fn dispatch(&mut self, now: Instant, actions: Vec<LinkAction>) -> NodeOutcome {
        let mut transmissions = Vec::new();
        for action in actions {
            match action {
                LinkAction::Transmit(tx) => transmissions.push(tx),
                LinkAction::Event(event) => self.fan_event(now, event),
                // The connection has already left the active set; the structured
                // disconnection record was logged by the link layer.
                LinkAction::Disconnect(_) => {}
            }
        }
        NodeOutcome {
            transmissions,
            next_wake: self.next_wake(),
        }
    }

    fn fan_event(&mut self, _now: Instant, event: LinkEvent) {
        match &event {
            LinkEvent::ReceptionEnded(record) => {
                if let Some(i) = self.conn_index(record.access_address) {
                    if let Some(classifier) = self.classifiers[i].as_mut() {
                        classifier.on_reception(record);
                    }
                }
            }
            LinkEvent::ConnectionEventEnded(record) => {
                if let Some(i) = self.conn_index(record.access_address) {
                    if let Some(classifier) = self.classifiers[i].as_mut() {
                        if let Some(list) = classifier.on_connection_event(record) {
                            self.connections[i].update_channel_list(&list);
                        }
                    }
                }
            }
            _ => {}
        }

        for sink in &mut self.sinks {
            sink.on_event(&event);
        }
    }

    fn next_wake(&self) -> Option<Instant> {
        let conn_wakes = self
            .connections
            .iter()
            .filter_map(|c| c.next_wake());
        let source_wakes = self
            .connections
            .iter()
            .zip(&self.sources)
            .filter(|(c, _)| c.is_active())
            .filter_map(|(_, s)| s.next_time());
        conn_wakes.chain(source_wakes).min()
    }
}
