//! The human-editable scenario surface.
//!
//! Scenarios are TOML files describing the world: seed, duration, node placement,
//! connections, classifier choice, the medium, and periodic scheduler actions. All
//! validation happens here at build time; a scenario that builds runs without
//! configuration surprises. Build failures are terminal, never runtime-recoverable.

use crate::afh::{ChannelClassifier, EafhClassifier, PerClassifier, PerParams};
use crate::link::channel_map::ChannelMap;
use crate::link::{Connection, ConnectionConfig, Role};
use crate::medium::{IdealMedium, JammedChannels, LogDistance, Medium};
use crate::node::{CbrSource, Node, NodeInfo, SilentSource, TrafficSource};
use crate::pcap::{PcapWriter, TraceFormat};
use crate::phy::PhyMode;
use crate::sim::Simulation;
use crate::time::{Duration, Instant};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Scenario build errors. None of these are recoverable at runtime.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse scenario: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("connection references unknown node {0:?}")]
    UnknownNode(String),
    #[error("node {name:?} has role {actual:?}, connection expects {expected:?}")]
    RoleMismatch {
        name: String,
        actual: Role,
        expected: Role,
    },
    #[error("invalid access address {0:?}, expected 8 hexadecimal digits")]
    BadAccessAddress(String),
    #[error("access address {0:08X} used by more than one connection of central {1:?}")]
    AccessAddressCollision(u32, String),
    #[error("connection {0:08X}: used-channel set has {1} channels, need at least 2")]
    ChannelSetTooSmall(u32, usize),
    #[error("connection {0:08X}: hop increment {1} outside [5, 16]")]
    BadHopIncrement(u32, u8),
    #[error("connection {0:08X}: instant offset {1} outside [6, 255]")]
    BadInstantOffset(u32, u16),
    #[error(
        "central {name:?}: connection interval {interval} below minimum {minimum} \
         for {peripherals} peripheral(s)"
    )]
    IntervalTooShort {
        name: String,
        interval: Duration,
        minimum: Duration,
        peripherals: usize,
    },
    #[error("central {0:?}: peripherals must share one connection interval")]
    IntervalMismatch(String),
    #[error("node {0:?}: advertising interval {1} is not a multiple of 0.625 ms")]
    BadAdvertisingInterval(String, Duration),
    #[error("node {0:?}: tx power {1} dBm outside [-20, 20]")]
    BadTxPower(String, i8),
    #[error("preferred minimum good channels {0} outside [2, 37]")]
    BadPreferredMinimum(usize),
    #[error("unknown trace file format {0:?}")]
    UnknownTraceFormat(String),
    #[error("unknown scheduler action tag {0:?}")]
    UnknownActionTag(String),
    #[error("traffic payload length {0} outside [1, 251]")]
    BadPayloadLength(usize),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Seed of the scenario's single random stream; identical seeds reproduce identical
    /// traces.
    pub seed: u64,
    /// Simulated duration in seconds.
    pub duration_s: f64,
    #[serde(default)]
    pub medium: MediumSpec,
    #[serde(default)]
    pub classifier: ClassifierSpec,
    #[serde(rename = "node")]
    pub nodes: Vec<NodeSpec>,
    #[serde(rename = "connection")]
    pub connections: Vec<ConnectionSpec>,
    #[serde(default)]
    pub trace: Option<TraceSpec>,
    #[serde(default, rename = "action")]
    pub actions: Vec<ActionSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSpec {
    pub name: String,
    /// Cartesian position in metres.
    pub position: [f64; 3],
    pub role: Role,
    #[serde(default)]
    pub tx_power_dbm: i8,
    #[serde(default = "default_sensitivity")]
    pub rx_sensitivity_dbm: i8,
    #[serde(default = "default_noise_figure")]
    pub noise_figure_db: i8,
    #[serde(default = "default_range")]
    pub range_m: f64,
    #[serde(default)]
    pub interference_fidelity: u8,
    /// Recorded for completeness and validated; advertising itself is out of scope.
    #[serde(default)]
    pub advertising_interval_ms: Option<f64>,
}

fn default_sensitivity() -> i8 {
    -90
}

fn default_noise_figure() -> i8 {
    5
}

fn default_range() -> f64 {
    100.0
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionSpec {
    /// 8 hexadecimal digits.
    pub access_address: String,
    pub central: String,
    pub peripheral: String,
    #[serde(default = "default_hop")]
    pub hop: u8,
    pub crc_init: Option<u32>,
    #[serde(default = "default_phy")]
    pub phy: PhyMode,
    pub interval_ms: f64,
    /// Defaults to the whole interval.
    pub active_period_ms: Option<f64>,
    #[serde(default)]
    pub offset_ms: f64,
    #[serde(default = "default_supervision_ms")]
    pub supervision_timeout_ms: f64,
    #[serde(default = "default_instant_offset")]
    pub instant_offset: u16,
    /// Initial used-channel set; defaults to all 37 data channels.
    pub channels: Option<Vec<u8>>,
    /// Simulate the inter-frame spacing. On by default.
    #[serde(default = "default_model_tifs")]
    pub model_tifs: bool,
    pub traffic: Option<TrafficSpec>,
}

fn default_model_tifs() -> bool {
    true
}

fn default_hop() -> u8 {
    7
}

fn default_phy() -> PhyMode {
    PhyMode::Le1M
}

fn default_supervision_ms() -> f64 {
    1_000.0
}

fn default_instant_offset() -> u16 {
    6
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrafficSpec {
    pub payload_len: usize,
    pub rate_kbps: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum MediumSpec {
    #[default]
    Ideal,
    Jammed {
        channels: Vec<u8>,
    },
    LogDistance {
        #[serde(default = "default_exponent")]
        exponent: f64,
        #[serde(default = "default_ref_loss")]
        ref_loss_db: f64,
    },
}

fn default_exponent() -> f64 {
    2.0
}

fn default_ref_loss() -> f64 {
    40.0
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum ClassifierSpec {
    None,
    Per {
        #[serde(default = "default_threshold")]
        threshold: f64,
        #[serde(default = "default_min_receptions")]
        min_receptions: usize,
        #[serde(default = "default_preferred_min")]
        preferred_min_good: usize,
        #[serde(default = "default_window")]
        window: usize,
        #[serde(default = "default_classify_interval")]
        classify_interval_s: f64,
    },
    Eafh,
}

impl Default for ClassifierSpec {
    fn default() -> Self {
        ClassifierSpec::None
    }
}

fn default_threshold() -> f64 {
    40.0
}

fn default_min_receptions() -> usize {
    4
}

fn default_preferred_min() -> usize {
    2
}

fn default_window() -> usize {
    20
}

fn default_classify_interval() -> f64 {
    2.0
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceSpec {
    #[serde(default = "default_trace_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_trace_format")]
    pub format: String,
}

fn default_trace_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_trace_format() -> String {
    "pcap".into()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionSpec {
    pub at_s: f64,
    pub every_s: f64,
    pub tag: String,
}

fn secs_to_duration(secs: f64) -> Duration {
    Duration::from_micros((secs * 1e6).round() as u64)
}

fn millis_to_duration(millis: f64) -> Duration {
    Duration::from_micros((millis * 1e3).round() as u64)
}

impl ScenarioConfig {
    /// Loads a scenario from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        Ok(toml::from_str(&std::fs::read_to_string(path)?)?)
    }

    /// Parses a scenario from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ScenarioError> {
        Ok(toml::from_str(text)?)
    }

    /// Validates the configuration and builds a ready-to-run [`Simulation`].
    pub fn build(&self) -> Result<Simulation, ScenarioError> {
        let duration = secs_to_duration(self.duration_s);
        let medium: Box<dyn Medium> = match &self.medium {
            MediumSpec::Ideal => Box::new(IdealMedium),
            MediumSpec::Jammed { channels } => Box::new(JammedChannels::new(channels.clone())),
            MediumSpec::LogDistance {
                exponent,
                ref_loss_db,
            } => Box::new(LogDistance {
                exponent: *exponent,
                ref_loss_db: *ref_loss_db,
            }),
        };

        if let ClassifierSpec::Per {
            preferred_min_good, ..
        } = self.classifier
        {
            if !(2..=37).contains(&preferred_min_good) {
                return Err(ScenarioError::BadPreferredMinimum(preferred_min_good));
            }
        }

        let trace_format = match &self.trace {
            Some(spec) => Some(
                TraceFormat::from_extension(&spec.format)
                    .ok_or_else(|| ScenarioError::UnknownTraceFormat(spec.format.clone()))?,
            ),
            None => None,
        };

        let mut nodes = Vec::new();
        let mut index_by_name = HashMap::new();
        for (i, spec) in self.nodes.iter().enumerate() {
            if !(-20..=20).contains(&spec.tx_power_dbm) {
                return Err(ScenarioError::BadTxPower(spec.name.clone(), spec.tx_power_dbm));
            }
            if let Some(adv_ms) = spec.advertising_interval_ms {
                let adv = millis_to_duration(adv_ms);
                if adv.as_micros() % 625 != 0 {
                    return Err(ScenarioError::BadAdvertisingInterval(spec.name.clone(), adv));
                }
            }
            index_by_name.insert(spec.name.clone(), i);
            nodes.push(Node::new(NodeInfo {
                name: spec.name.clone(),
                id: i as u32,
                position: spec.position,
                role: spec.role,
                tx_power_dbm: spec.tx_power_dbm,
                rx_sensitivity_dbm: spec.rx_sensitivity_dbm,
                noise_figure_db: spec.noise_figure_db,
                range_m: spec.range_m,
                interference_fidelity: spec.interference_fidelity,
            }));
        }

        // Per-central bookkeeping for the cross-connection invariants.
        let mut central_aas: HashMap<usize, Vec<u32>> = HashMap::new();
        let mut central_intervals: HashMap<usize, Duration> = HashMap::new();
        let mut central_peripherals: HashMap<usize, usize> = HashMap::new();
        let mut parsed = Vec::new();

        for spec in &self.connections {
            let access_address = u32::from_str_radix(&spec.access_address, 16)
                .map_err(|_| ScenarioError::BadAccessAddress(spec.access_address.clone()))?;
            if spec.access_address.len() != 8 {
                return Err(ScenarioError::BadAccessAddress(spec.access_address.clone()));
            }

            let central = *index_by_name
                .get(&spec.central)
                .ok_or_else(|| ScenarioError::UnknownNode(spec.central.clone()))?;
            let peripheral = *index_by_name
                .get(&spec.peripheral)
                .ok_or_else(|| ScenarioError::UnknownNode(spec.peripheral.clone()))?;
            for (index, expected) in [(central, Role::Central), (peripheral, Role::Peripheral)] {
                let actual = nodes[index].info.role;
                if actual != expected {
                    return Err(ScenarioError::RoleMismatch {
                        name: nodes[index].info.name.clone(),
                        actual,
                        expected,
                    });
                }
            }

            let aas = central_aas.entry(central).or_default();
            if aas.contains(&access_address) {
                return Err(ScenarioError::AccessAddressCollision(
                    access_address,
                    spec.central.clone(),
                ));
            }
            aas.push(access_address);

            if !(5..=16).contains(&spec.hop) {
                return Err(ScenarioError::BadHopIncrement(access_address, spec.hop));
            }
            if let Some(traffic) = &spec.traffic {
                if !(1..=crate::link::data::MAX_PAYLOAD).contains(&traffic.payload_len) {
                    return Err(ScenarioError::BadPayloadLength(traffic.payload_len));
                }
            }
            if !(6..=255).contains(&spec.instant_offset) {
                return Err(ScenarioError::BadInstantOffset(
                    access_address,
                    spec.instant_offset,
                ));
            }

            let channel_map = match &spec.channels {
                None => ChannelMap::with_all_channels(),
                Some(list) => {
                    let map = ChannelMap::from_channels(list.iter().copied())
                        .ok_or(ScenarioError::ChannelSetTooSmall(access_address, list.len()))?;
                    if map.num_used_channels() < 2 {
                        return Err(ScenarioError::ChannelSetTooSmall(
                            access_address,
                            usize::from(map.num_used_channels()),
                        ));
                    }
                    map
                }
            };

            let interval = millis_to_duration(spec.interval_ms);
            match central_intervals.get(&central) {
                None => {
                    central_intervals.insert(central, interval);
                }
                Some(existing) if *existing != interval => {
                    return Err(ScenarioError::IntervalMismatch(spec.central.clone()));
                }
                Some(_) => {}
            }
            *central_peripherals.entry(central).or_default() += 1;

            parsed.push((access_address, central, peripheral, channel_map, interval));
        }

        // Interval floor: room for one maximum-length exchange per peripheral.
        for (spec, (_, central, _, _, interval)) in self.connections.iter().zip(&parsed) {
            let peripherals = central_peripherals[central];
            let max_packet = spec.phy.packet_duration(crate::link::data::MAX_PAYLOAD);
            let minimum = (max_packet + Duration::T_IFS).times(2 * peripherals as u64);
            if *interval < minimum {
                return Err(ScenarioError::IntervalTooShort {
                    name: self.nodes[*central].name.clone(),
                    interval: *interval,
                    minimum,
                    peripherals,
                });
            }
        }

        let mut sim = Simulation::new(medium, self.seed, duration);

        for (spec, (access_address, central, peripheral, channel_map, interval)) in
            self.connections.iter().zip(&parsed)
        {
            let crc_init = spec.crc_init.unwrap_or(access_address & 0x00ff_ffff);
            let active_period = spec
                .active_period_ms
                .map(millis_to_duration)
                .unwrap_or(*interval);

            let base = ConnectionConfig {
                access_address: *access_address,
                crc_init,
                hop: spec.hop,
                phy: spec.phy,
                interval: *interval,
                active_period,
                offset: millis_to_duration(spec.offset_ms),
                supervision_timeout: millis_to_duration(spec.supervision_timeout_ms),
                instant_offset: spec.instant_offset,
                channel_map: *channel_map,
                model_tifs: spec.model_tifs,
                local_name: String::new(),
                peer_name: String::new(),
                peer_id: 0,
                tx_power_dbm: 0,
            };

            for (this, other, role) in [
                (*central, *peripheral, Role::Central),
                (*peripheral, *central, Role::Peripheral),
            ] {
                let cfg = ConnectionConfig {
                    local_name: nodes[this].info.name.clone(),
                    peer_name: nodes[other].info.name.clone(),
                    peer_id: nodes[other].info.id,
                    tx_power_dbm: nodes[this].info.tx_power_dbm,
                    ..base.clone()
                };
                let source: Box<dyn TrafficSource> = match &spec.traffic {
                    Some(t) => Box::new(CbrSource::new(t.payload_len, t.rate_kbps)),
                    None => Box::new(SilentSource),
                };
                let classifier = if role == Role::Central {
                    self.make_classifier(*channel_map)
                } else {
                    None
                };
                nodes[this].add_connection(Connection::new(cfg, role), source, classifier);
            }
        }

        for mut node in nodes {
            if let Some(format) = trace_format {
                let spec = self.trace.as_ref().unwrap();
                let writer =
                    PcapWriter::create(&spec.dir, &node.info.name, node.info.id, format)?;
                node.add_sink(Box::new(writer));
            }
            sim.add_node(node);
        }

        if let ClassifierSpec::Per {
            classify_interval_s,
            ..
        } = self.classifier
        {
            let every = secs_to_duration(classify_interval_s);
            for i in 0..self.nodes.len() {
                if self.nodes[i].role == Role::Central {
                    sim.schedule_classifier_tick(i, Instant::ZERO + every, every);
                }
            }
        }

        for action in &self.actions {
            let at = Instant::ZERO + secs_to_duration(action.at_s);
            let every = secs_to_duration(action.every_s);
            match action.tag.as_str() {
                "classify" => {
                    for i in 0..self.nodes.len() {
                        if self.nodes[i].role == Role::Central {
                            sim.schedule_classifier_tick(i, at, every);
                        }
                    }
                }
                "stats" => sim.schedule_stats_report(at, every),
                other => return Err(ScenarioError::UnknownActionTag(other.into())),
            }
        }

        Ok(sim)
    }

    fn make_classifier(&self, initial: ChannelMap) -> Option<ChannelClassifier> {
        match &self.classifier {
            ClassifierSpec::None => None,
            ClassifierSpec::Per {
                threshold,
                min_receptions,
                preferred_min_good,
                window,
                ..
            } => Some(ChannelClassifier::Per(PerClassifier::new(PerParams {
                threshold: *threshold,
                min_receptions: *min_receptions,
                preferred_min_good: *preferred_min_good,
                window: *window,
            }))),
            ClassifierSpec::Eafh => Some(ChannelClassifier::Eafh(EafhClassifier::new(initial))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_toml() -> String {
        r#"
            seed = 42
            duration_s = 1.0

            [[node]]
            name = "Laptop"
            position = [15.0, 6.0, 3.0]
            role = "central"

            [[node]]
            name = "Headset"
            position = [15.0, 7.0, 3.5]
            role = "peripheral"

            [[connection]]
            access_address = "487647F2"
            central = "Laptop"
            peripheral = "Headset"
            interval_ms = 10.0
            traffic = { payload_len = 50, rate_kbps = 150 }
        "#
        .to_string()
    }

    #[test]
    fn minimal_scenario_builds() {
        let cfg = ScenarioConfig::from_toml(&base_toml()).unwrap();
        let sim = cfg.build().unwrap();
        assert_eq!(sim.nodes().len(), 2);
        assert_eq!(sim.nodes()[0].connections().len(), 1);
        assert_eq!(
            sim.nodes()[0].connections()[0].access_address(),
            0x4876_47f2
        );
    }

    #[test]
    fn interval_floor_is_inclusive() {
        // Minimum for one peripheral on LE1M: 2 * (2088 + 150) = 4476 µs.
        let mut cfg = ScenarioConfig::from_toml(&base_toml()).unwrap();
        cfg.connections[0].interval_ms = 4.476;
        assert!(cfg.build().is_ok(), "exact minimum must be accepted");

        cfg.connections[0].interval_ms = 4.475;
        assert!(matches!(
            cfg.build(),
            Err(ScenarioError::IntervalTooShort { .. })
        ));
    }

    #[test]
    fn role_mismatch_is_rejected() {
        let toml = base_toml().replace("role = \"peripheral\"", "role = \"central\"");
        let cfg = ScenarioConfig::from_toml(&toml).unwrap();
        assert!(matches!(cfg.build(), Err(ScenarioError::RoleMismatch { .. })));
    }

    #[test]
    fn access_address_collision_on_one_central() {
        let mut toml = base_toml();
        toml.push_str(
            r#"
            [[node]]
            name = "Earbud"
            position = [14.0, 7.0, 3.5]
            role = "peripheral"

            [[connection]]
            access_address = "487647F2"
            central = "Laptop"
            peripheral = "Earbud"
            interval_ms = 10.0
        "#,
        );
        let cfg = ScenarioConfig::from_toml(&toml).unwrap();
        assert!(matches!(
            cfg.build(),
            Err(ScenarioError::AccessAddressCollision(0x4876_47f2, _))
        ));
    }

    #[test]
    fn small_channel_set_is_rejected() {
        let mut cfg = ScenarioConfig::from_toml(&base_toml()).unwrap();
        cfg.connections[0].channels = Some(vec![7]);
        assert!(matches!(
            cfg.build(),
            Err(ScenarioError::ChannelSetTooSmall(_, 1))
        ));
    }

    #[test]
    fn preferred_minimum_bounds() {
        let mut toml = base_toml();
        toml.push_str("\n[classifier]\nkind = \"per\"\npreferred_min_good = 1\n");
        let cfg = ScenarioConfig::from_toml(&toml).unwrap();
        assert!(matches!(
            cfg.build(),
            Err(ScenarioError::BadPreferredMinimum(1))
        ));
    }

    #[test]
    fn unknown_trace_format_is_rejected() {
        let mut toml = base_toml();
        toml.push_str("\n[trace]\nformat = \"txt\"\n");
        let cfg = ScenarioConfig::from_toml(&toml).unwrap();
        assert!(matches!(
            cfg.build(),
            Err(ScenarioError::UnknownTraceFormat(_))
        ));
    }

    #[test]
    fn advertising_interval_granularity() {
        let mut cfg = ScenarioConfig::from_toml(&base_toml()).unwrap();
        cfg.nodes[1].advertising_interval_ms = Some(20.0);
        assert!(cfg.build().is_ok());
        cfg.nodes[1].advertising_interval_ms = Some(20.1);
        assert!(matches!(
            cfg.build(),
            Err(ScenarioError::BadAdvertisingInterval(_, _))
        ));
    }

    #[test]
    fn bad_access_address_strings() {
        let mut cfg = ScenarioConfig::from_toml(&base_toml()).unwrap();
        cfg.connections[0].access_address = "xyz".into();
        assert!(matches!(
            cfg.build(),
            Err(ScenarioError::BadAccessAddress(_))
        ));
    }
}
