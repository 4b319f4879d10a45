//! The world: nodes, the scheduler, and packet routing between them.
//!
//! `Simulation` owns everything with simulated lifetime. Its event loop pops scheduler
//! entries in timestamp order and dispatches them: node wake-ups advance link-layer
//! state machines, delivery entries push PHY indications into listening endpoints, and
//! classifier entries run periodic classification passes. Transmissions produced by a
//! node are routed through the medium to the connection's peer, becoming `RxStart` and
//! `RxEnd` deliveries.

use crate::link::{Reception, Role, Transmission};
use crate::medium::{Medium, Verdict};
use crate::node::Node;
use crate::phy::DataChannel;
use crate::sched::{Priority, Scheduler};
use crate::time::{Duration, Instant};
use log::{info, trace, warn};
use rand::rngs::SmallRng;
use rand::SeedableRng;

/// Scheduler actions dispatched by the simulation loop.
#[derive(Clone, Debug)]
enum Action {
    NodeRun(usize),
    RxStart {
        node: usize,
        access_address: u32,
        channel: DataChannel,
    },
    RxEnd {
        node: usize,
        rx: Reception,
    },
    ClassifierTick(usize),
    StatsReport,
}

/// Route of one connection's frames: the two node indices sharing an access address.
struct LinkRoute {
    access_address: u32,
    central: usize,
    peripheral: usize,
}

/// A complete scenario instance, ready to run.
pub struct Simulation {
    sched: Scheduler<Action>,
    nodes: Vec<Node>,
    medium: Box<dyn Medium>,
    rng: SmallRng,
    duration: Duration,
    routes: Vec<LinkRoute>,
    started: bool,
}

impl Simulation {
    pub fn new(medium: Box<dyn Medium>, seed: u64, duration: Duration) -> Self {
        Self {
            sched: Scheduler::new(),
            nodes: Vec::new(),
            medium,
            rng: SmallRng::seed_from_u64(seed),
            duration,
            routes: Vec::new(),
            started: false,
        }
    }

    /// Adds a node; returns its index.
    pub fn add_node(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: usize) -> &mut Node {
        &mut self.nodes[index]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Current simulated time.
    pub fn now(&self) -> Instant {
        self.sched.now()
    }

    /// Configured end of the scenario.
    pub fn end(&self) -> Instant {
        Instant::ZERO + self.duration
    }

    /// Schedules the periodic classification callback for a node's classifiers.
    pub fn schedule_classifier_tick(&mut self, node: usize, at: Instant, every: Duration) {
        self.sched
            .schedule_every(at, every, Priority::Classifier, Action::ClassifierTick(node));
    }

    /// Schedules a periodic statistics snapshot in the log.
    pub fn schedule_stats_report(&mut self, at: Instant, every: Duration) {
        self.sched
            .schedule_every(at, every, Priority::Classifier, Action::StatsReport);
    }

    /// Runs the scenario to its configured end.
    pub fn run(&mut self) {
        self.run_until(self.end());
    }

    /// Runs the event loop up to and including `t`.
    pub fn run_until(&mut self, t: Instant) {
        if !self.started {
            self.start();
        }
        while let Some((now, action)) = self.sched.pop_due(t) {
            self.dispatch(now, action);
        }
    }

    /// Builds the routing table and gives every node its first wake-up.
    fn start(&mut self) {
        self.started = true;

        for (i, node) in self.nodes.iter().enumerate() {
            for conn in node.connections() {
                let aa = conn.access_address();
                let idx = match self.routes.iter().position(|r| r.access_address == aa) {
                    Some(idx) => idx,
                    None => {
                        self.routes.push(LinkRoute {
                            access_address: aa,
                            central: usize::MAX,
                            peripheral: usize::MAX,
                        });
                        self.routes.len() - 1
                    }
                };
                match conn.role() {
                    Role::Central => self.routes[idx].central = i,
                    Role::Peripheral => self.routes[idx].peripheral = i,
                }
            }
        }
        for route in &self.routes {
            debug_assert!(
                route.central != usize::MAX && route.peripheral != usize::MAX,
                "connection {:08X} is missing an endpoint",
                route.access_address
            );
        }

        for i in 0..self.nodes.len() {
            self.sched
                .schedule(Instant::ZERO, Priority::Wakeup, Action::NodeRun(i));
        }
        info!(
            "scenario started: {} nodes, {} connections, {} simulated",
            self.nodes.len(),
            self.routes.len(),
            self.duration
        );
    }

    fn dispatch(&mut self, now: Instant, action: Action) {
        match action {
            Action::NodeRun(i) => {
                let outcome = self.nodes[i].run(now);
                self.apply(i, now, outcome);
            }
            Action::RxStart {
                node,
                access_address,
                channel,
            } => {
                let outcome = self.nodes[node].rx_start(now, access_address, channel);
                self.apply(node, now, outcome);
            }
            Action::RxEnd { node, rx } => {
                let outcome = self.nodes[node].rx_end(now, rx);
                self.apply(node, now, outcome);
            }
            Action::ClassifierTick(i) => {
                let outcome = self.nodes[i].classifier_tick(now);
                self.apply(i, now, outcome);
            }
            Action::StatsReport => self.log_stats(now),
        }
    }

    fn apply(&mut self, node: usize, now: Instant, outcome: crate::node::NodeOutcome) {
        for tx in outcome.transmissions {
            self.route(node, now, tx);
        }
        if let Some(wake) = outcome.next_wake {
            self.sched
                .schedule(wake.max(now), Priority::Wakeup, Action::NodeRun(node));
        }
    }

    /// Hands a transmission to the medium and schedules the peer's PHY indications.
    fn route(&mut self, from: usize, now: Instant, tx: Transmission) {
        let Some(route) = self
            .routes
            .iter()
            .find(|r| r.access_address == tx.access_address)
        else {
            warn!("transmission on unknown access address {:08X}", tx.access_address);
            return;
        };
        let to = if route.central == from {
            route.peripheral
        } else {
            route.central
        };

        let verdict =
            self.medium
                .deliver(&tx, &self.nodes[from].info, &self.nodes[to].info, &mut self.rng);
        match verdict {
            Verdict::Lost => {
                trace!(
                    "frame on {:?} from node {} lost before node {}",
                    tx.channel,
                    from,
                    to
                );
            }
            Verdict::Delivered {
                rssi_dbm,
                sinr_db,
                corrupt,
            } => {
                let mut frame = tx.frame;
                if corrupt {
                    // Break the checksum; the receiver sees a CRC failure.
                    *frame.last_mut().expect("empty frame") ^= 0x01;
                }
                self.sched.schedule(
                    now,
                    Priority::Delivery,
                    Action::RxStart {
                        node: to,
                        access_address: tx.access_address,
                        channel: tx.channel,
                    },
                );
                self.sched.schedule(
                    now + tx.duration,
                    Priority::Delivery,
                    Action::RxEnd {
                        node: to,
                        rx: Reception {
                            frame,
                            rssi_dbm,
                            sinr_db,
                            access_address: tx.access_address,
                            channel: tx.channel,
                            phy: tx.phy,
                            ll_timestamp: now + tx.duration,
                            app_timestamp: tx.app_timestamp,
                            from_central: tx.from_central,
                        },
                    },
                );
            }
        }
    }

    fn log_stats(&self, now: Instant) {
        for node in &self.nodes {
            for conn in node.connections() {
                info!(
                    "[{}] {:08X} @ {}:\n{}",
                    node.info.name,
                    conn.access_address(),
                    now,
                    conn.stats.report(now - Instant::ZERO)
                );
            }
        }
    }
}
