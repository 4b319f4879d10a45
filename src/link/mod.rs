//! Link-Layer: connection state machines and everything they exchange.
//!
//! The modules here are a construction kit for the simulated BLE Link-Layer: the
//! [`connection`] state machine drives packet exchange per connection event, [`chsel`]
//! picks the data channel, [`data`]/[`llcp`] encode and decode PDUs, and [`queue`] holds
//! application payloads awaiting transmission.
//!
//! The link layer communicates with the rest of the simulator through values: it emits
//! [`LinkAction`]s when polled (packets to put on the air, observable [`LinkEvent`]s,
//! disconnections) and consumes PHY indications ([`Reception`]). No component holds a
//! reference to its peer; packets are routed by the simulated medium.

pub mod channel_map;
pub mod chsel;
mod connection;
pub mod data;
pub mod llcp;
pub mod queue;
mod seq_num;

pub use self::connection::{Connection, ConnectionConfig};
pub use self::seq_num::SeqNum;

use crate::phy::{DataChannel, PhyMode};
use crate::time::{Duration, Instant};
use serde::{Deserialize, Serialize};

/// Role of a connection endpoint.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Central,
    Peripheral,
}

/// A packet handed to the PHY transmitter stub.
#[derive(Clone, Debug)]
pub struct Transmission {
    pub access_address: u32,
    pub channel: DataChannel,
    pub phy: PhyMode,
    pub tx_power_dbm: i8,
    /// The whole frame: header, payload and CRC.
    pub frame: Vec<u8>,
    /// Link-layer timestamp of the transmission start.
    pub ll_timestamp: Instant,
    /// Timestamp the application attached to the payload, if any.
    pub app_timestamp: Option<Instant>,
    /// Air time of the frame on this PHY.
    pub duration: Duration,
    pub from_central: bool,
}

/// A completed reception reported by the PHY receiver stub (`RxEnd`).
#[derive(Clone, Debug)]
pub struct Reception {
    pub frame: Vec<u8>,
    pub rssi_dbm: i8,
    pub sinr_db: i8,
    pub access_address: u32,
    pub channel: DataChannel,
    pub phy: PhyMode,
    /// Link-layer timestamp of the reception end.
    pub ll_timestamp: Instant,
    pub app_timestamp: Option<Instant>,
    pub from_central: bool,
}

/// Reason a connection was torn down.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// No valid reception within the supervision timeout.
    SupervisionTimeout,
    /// A channel map update reached its instant without being acknowledged.
    MapUpdateUnacknowledged,
}

/// Observable link-layer events, delivered by value to all subscribed sinks.
#[derive(Clone, Debug)]
pub enum LinkEvent {
    TransmissionStarted(TransmissionRecord),
    ReceptionEnded(ReceptionRecord),
    ChannelMapUpdated(MapUpdateRecord),
    ConnectionEventEnded(EventRecord),
}

#[derive(Clone, Debug)]
pub struct TransmissionRecord {
    pub access_address: u32,
    pub channel: u8,
    pub phy: PhyMode,
    pub frame: Vec<u8>,
    pub at: Instant,
    pub from_central: bool,
    pub tx_power_dbm: i8,
}

#[derive(Clone, Debug)]
pub struct ReceptionRecord {
    pub access_address: u32,
    pub channel: u8,
    pub phy: PhyMode,
    pub frame: Vec<u8>,
    pub at: Instant,
    pub rssi_dbm: i8,
    pub sinr_db: i8,
    /// `false` when the frame failed the CRC check.
    pub success: bool,
    pub from_central: bool,
}

#[derive(Clone, Debug)]
pub struct MapUpdateRecord {
    pub peer_name: String,
    pub peer_id: u32,
    pub channels: Vec<u8>,
    pub at: Instant,
}

/// Summary of one completed connection event.
#[derive(Clone, Debug)]
pub struct EventRecord {
    pub access_address: u32,
    pub counter: u16,
    pub channel: u8,
    pub tx_packets: u32,
    pub rx_packets: u32,
    pub acked_packets: u32,
    pub crc_failures: u32,
    pub at: Instant,
}

/// What a connection wants the outside world to do, produced by polling it.
#[derive(Clone, Debug)]
pub enum LinkAction {
    /// Put a packet on the air.
    Transmit(Transmission),
    /// Fan an observable event out to subscribers.
    Event(LinkEvent),
    /// The connection has terminated; remove it from the active set.
    Disconnect(DisconnectReason),
}

/// Consumer of observable link-layer events (trace writers, visualisers, recorders).
pub trait EventSink {
    fn on_event(&mut self, event: &LinkEvent);
}
