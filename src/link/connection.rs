//! Per-connection state machine.
//!
//! One `Connection` models one endpoint (central or peripheral) of a BLE connection. It
//! is driven by the discrete-event clock: every call to [`Connection::poll`] advances the
//! machine through all state transitions due at or before the given time and reports when
//! it next wants to run. PHY indications are pushed in through [`Connection::on_rx_start`]
//! and [`Connection::on_rx_end`].
//!
//! A connection event begins every `interval`, offset by the connection offset. The
//! central opens each event with a transmission; the peripheral opens it listening. Both
//! then alternate transmit and receive segments, separated by `T_IFS`, for as long as the
//! continuation predicate holds:
//!
//! * enough of the active period is left for another full exchange,
//! * at least one side announced more data,
//! * at most one consecutive CRC failure,
//! * the last listen did not fail at the PHY level.
//!
//! Channel map updates arrive from the classifier via [`Connection::update_channel_list`]
//! and are carried to the peer in-band as a Channel Map Indication, committing on both
//! sides at the *instant* event.

use crate::bytes::{ByteReader, ByteWriter, FromBytes, ToBytes};
use crate::link::channel_map::ChannelMap;
use crate::link::chsel;
use crate::link::data::{self, Header, Llid};
use crate::link::llcp::ControlPdu;
use crate::link::queue::TxQueue;
use crate::link::seq_num::SeqNum;
use crate::link::{
    DisconnectReason, EventRecord, LinkAction, LinkEvent, MapUpdateRecord, Reception,
    ReceptionRecord, Role, Transmission, TransmissionRecord,
};
use crate::phy::{DataChannel, PhyMode};
use crate::stats::ConnectionStats;
use crate::time::{Duration, Instant};
use crate::utils::HexSlice;
use log::{debug, info, trace, warn};

/// Immutable parameters of a connection, shared by both endpoints.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// 32-bit identifier of the physical link.
    pub access_address: u32,
    /// CRC initialization value.
    pub crc_init: u32,
    /// Channel hop increment, 5..=16.
    pub hop: u8,
    pub phy: PhyMode,
    /// Duration between the starts of two consecutive connection events.
    pub interval: Duration,
    /// Portion of the interval available for packet exchange.
    pub active_period: Duration,
    /// Offset of the first connection event from scenario start.
    pub offset: Duration,
    pub supervision_timeout: Duration,
    /// Events between a Channel Map Indication and its commit instant, 6..=255.
    pub instant_offset: u16,
    /// Initial used-channel map.
    pub channel_map: ChannelMap,
    /// Whether the inter-frame spacing is simulated; turning it off packs exchanges
    /// back-to-back for idealised throughput studies.
    pub model_tifs: bool,
    pub local_name: String,
    pub peer_name: String,
    pub peer_id: u32,
    /// Transmit power of this endpoint, carried into every transmission.
    pub tx_power_dbm: i8,
}

/// Link-layer connection states.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    /// Terminal: the connection is dead.
    Standby,
    /// Waiting for the next connection event.
    Sleep,
    /// A frame is on the air.
    Transmit,
    /// Inter-frame spacing after a transmit segment.
    TxSpacing,
    /// Listening for a frame.
    Receive,
    /// Inter-frame spacing after a receive segment.
    RxSpacing,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum PduKind {
    Data,
    Control,
}

/// The last transmitted, not yet acknowledged PDU.
struct InFlight {
    header: Header,
    payload: Vec<u8>,
    kind: PduKind,
    app_timestamp: Option<Instant>,
    first_sent_at: Instant,
}

/// One endpoint of a BLE connection.
pub struct Connection {
    cfg: ConnectionConfig,
    role: Role,

    state: State,
    /// When the current state ends (meaningless in `Standby`).
    until: Instant,
    /// When the current state was entered.
    state_since: Instant,

    /// Connection event counter, wrapping at 65 535. Starts at the pre-event value.
    event_counter: u16,
    /// Non-wrapping count of events started, used to anchor event start times.
    events_started: u64,
    event_start: Instant,

    last_unmapped: u8,
    channel: DataChannel,
    /// The used-channel map currently in force.
    channel_map: ChannelMap,

    sn: SeqNum,
    nesn: SeqNum,
    last_tx: Option<InFlight>,

    rx_more_data: bool,
    phy_rx_failed: bool,
    consec_crc_fails: u8,
    supervision_deadline: Instant,

    /// Per-event tallies, reported in the `ConnectionEventEnded` record.
    event_tx: u32,
    event_rx: u32,
    event_acks: u32,
    event_crc_fails: u32,

    queue: TxQueue,

    // Classifier coordination (central side; the peripheral only uses the commit fields).
    channels_classified: bool,
    classification_sent: bool,
    channel_update_ack: bool,
    update_in_progress: bool,
    pending_map: Option<ChannelMap>,
    map_instant: u16,

    pub stats: ConnectionStats,
}

impl Connection {
    pub fn new(cfg: ConnectionConfig, role: Role) -> Self {
        let first_wake = Instant::ZERO + cfg.offset;
        let supervision_deadline = first_wake + cfg.supervision_timeout;
        let channel_map = cfg.channel_map;
        Self {
            cfg,
            role,
            state: State::Sleep,
            until: first_wake,
            state_since: Instant::ZERO,
            event_counter: u16::MAX,
            events_started: 0,
            event_start: Instant::ZERO,
            last_unmapped: 0,
            channel: DataChannel::new(0),
            sn: SeqNum::ZERO,
            nesn: SeqNum::ZERO,
            last_tx: None,
            rx_more_data: false,
            phy_rx_failed: false,
            consec_crc_fails: 0,
            supervision_deadline,
            event_tx: 0,
            event_rx: 0,
            event_acks: 0,
            event_crc_fails: 0,
            queue: TxQueue::new(),
            channels_classified: false,
            classification_sent: false,
            channel_update_ack: false,
            update_in_progress: false,
            pending_map: None,
            map_instant: 0,
            stats: ConnectionStats::default(),
            channel_map,
        }
    }

    pub fn access_address(&self) -> u32 {
        self.cfg.access_address
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_active(&self) -> bool {
        self.state != State::Standby
    }

    pub fn event_counter(&self) -> u16 {
        self.event_counter
    }

    /// The used-channel map currently enforced on this endpoint.
    pub fn used_channels(&self) -> &ChannelMap {
        &self.channel_map
    }

    /// Whether a channel map update is between request and instant.
    pub fn update_in_progress(&self) -> bool {
        self.update_in_progress
    }

    /// Offers an application payload to the transmit queue.
    ///
    /// Returns `false` and counts a queue overflow when the queue is full.
    pub fn enqueue_app(&mut self, payload: &[u8], produced_at: Instant) -> bool {
        if self.state == State::Standby {
            return false;
        }
        if self.queue.enqueue(payload, produced_at) {
            true
        } else {
            self.stats.queue_overflows += 1;
            false
        }
    }

    /// Installs a new used-channel list from the classifier.
    ///
    /// Only the central initiates the in-band update procedure. Invalid lists (fewer than
    /// two channels, indices out of range) are ignored with a warning; a list equal to the
    /// enforced map produces no wire traffic, and only one update may be in flight.
    pub fn update_channel_list(&mut self, channels: &[u8]) -> bool {
        if self.role != Role::Central || self.state == State::Standby {
            return false;
        }
        let map = match ChannelMap::from_channels(channels.iter().copied()) {
            Some(map) if map.num_used_channels() >= 2 => map,
            _ => {
                warn!(
                    "{}: classifier produced invalid channel list {:?}, ignoring",
                    self.cfg.local_name, channels
                );
                return false;
            }
        };
        if map == self.channel_map {
            trace!("{}: channel list unchanged, no update", self.cfg.local_name);
            return false;
        }
        if self.update_in_progress {
            debug!(
                "{}: channel map update already in flight, ignoring new list",
                self.cfg.local_name
            );
            return false;
        }
        info!(
            "{}: scheduling channel map update to {:?}",
            self.cfg.local_name,
            map.channel_indices()
        );
        self.pending_map = Some(map);
        self.channels_classified = true;
        self.update_in_progress = true;
        true
    }

    /// When this connection next wants to be polled.
    pub fn next_wake(&self) -> Option<Instant> {
        if self.state == State::Standby {
            None
        } else {
            Some(self.until)
        }
    }

    /// Advances the state machine through every transition due at or before `now`.
    pub fn poll(&mut self, now: Instant, out: &mut Vec<LinkAction>) -> Option<Instant> {
        while self.state != State::Standby && self.due(now, true) {
            self.step(out);
        }
        self.next_wake()
    }

    /// Like [`Connection::poll`], but leaves a listen window open at its exact deadline.
    ///
    /// Called before applying a PHY indication timestamped `now`: transitions scheduled
    /// strictly before the indication must happen first, and a sleep or spacing period
    /// ending exactly at `now` must too (listening *begins* at its boundary), but a listen
    /// window ending exactly at `now` must not time out before the indication is applied.
    pub(crate) fn catch_up(&mut self, now: Instant, out: &mut Vec<LinkAction>) {
        while self.state != State::Standby && self.due(now, false) {
            self.step(out);
        }
    }

    fn due(&self, now: Instant, at_deadline: bool) -> bool {
        match self.state {
            State::Standby => false,
            State::Receive if !at_deadline => self.until < now,
            _ => self.until <= now,
        }
    }

    /// Executes the single transition scheduled for `self.until`.
    fn step(&mut self, out: &mut Vec<LinkAction>) {
        let now = self.until;

        if now >= self.supervision_deadline {
            info!(
                "{}: supervision timeout after {} without valid reception",
                self.cfg.local_name, self.cfg.supervision_timeout
            );
            self.disconnect(DisconnectReason::SupervisionTimeout, out);
            return;
        }

        match self.state {
            State::Standby => unreachable!("stepping a standby connection"),
            State::Sleep => {
                self.stats.sleep_time += now - self.state_since;
                self.begin_event(now, out);
            }
            State::Transmit => {
                self.enter_spacing(State::TxSpacing, now);
            }
            State::TxSpacing => {
                self.stats.idle_time += now - self.state_since;
                match self.role {
                    Role::Central => self.start_listen(now),
                    Role::Peripheral => {
                        if self.may_continue(now) {
                            self.start_listen(now);
                        } else {
                            self.enter_sleep(now);
                        }
                    }
                }
            }
            State::Receive => {
                // Listen window closed without a completed reception.
                self.stats.listen_time += now - self.state_since;
                self.phy_rx_failed = true;
                self.enter_spacing(State::RxSpacing, now);
            }
            State::RxSpacing => {
                self.stats.idle_time += now - self.state_since;
                match self.role {
                    Role::Central => {
                        if self.may_continue(now) {
                            self.build_and_transmit(now, out);
                        } else {
                            self.enter_sleep(now);
                        }
                    }
                    Role::Peripheral => {
                        // The peripheral answers every reception with at most one CRC
                        // failure; a PHY failure or a second bad CRC ends its event.
                        if self.phy_rx_failed || self.consec_crc_fails >= 2 {
                            self.enter_sleep(now);
                        } else {
                            self.build_and_transmit(now, out);
                        }
                    }
                }
            }
        }
    }

    /// Opens a connection event: closes out the previous one, hops the channel, commits a
    /// pending channel map at its instant, and starts the first segment.
    fn begin_event(&mut self, now: Instant, out: &mut Vec<LinkAction>) {
        let prev_counter = self.event_counter;
        self.event_counter = self.event_counter.wrapping_add(1);

        if self.events_started > 0 {
            out.push(LinkAction::Event(LinkEvent::ConnectionEventEnded(
                EventRecord {
                    access_address: self.cfg.access_address,
                    counter: prev_counter,
                    channel: self.channel.index(),
                    tx_packets: self.event_tx,
                    rx_packets: self.event_rx,
                    acked_packets: self.event_acks,
                    crc_failures: self.event_crc_fails,
                    at: now,
                },
            )));
        }
        self.events_started += 1;
        self.event_tx = 0;
        self.event_rx = 0;
        self.event_acks = 0;
        self.event_crc_fails = 0;
        self.consec_crc_fails = 0;
        self.phy_rx_failed = false;
        self.rx_more_data = false;
        self.event_start = now;

        // Select this event's channel with the map in force; a map committed below takes
        // effect on the next selection.
        let (unmapped, channel) = chsel::select(self.last_unmapped, self.cfg.hop, &self.channel_map);
        self.last_unmapped = unmapped;
        self.channel = channel;

        // The instant only exists once the indication is on the wire (central) or has
        // been received (peripheral); an update that is merely scheduled has none yet.
        let instant_known = self.classification_sent || self.role == Role::Peripheral;
        if self.update_in_progress && instant_known && self.event_counter == self.map_instant {
            if self.role == Role::Central && !self.channel_update_ack {
                info!(
                    "{}: channel map update unacknowledged at instant {}, terminating",
                    self.cfg.local_name, self.map_instant
                );
                self.disconnect(DisconnectReason::MapUpdateUnacknowledged, out);
                return;
            }
            if let Some(map) = self.pending_map.take() {
                self.channel_map = map;
                self.update_in_progress = false;
                self.classification_sent = false;
                self.channels_classified = false;
                self.channel_update_ack = false;
                info!(
                    "{}: channel map committed at event {}: {:?}",
                    self.cfg.local_name,
                    self.event_counter,
                    map.channel_indices()
                );
                out.push(LinkAction::Event(LinkEvent::ChannelMapUpdated(
                    MapUpdateRecord {
                        peer_name: self.cfg.peer_name.clone(),
                        peer_id: self.cfg.peer_id,
                        channels: map.channel_indices(),
                        at: now,
                    },
                )));
            }
        }

        trace!(
            "{}: event #{} on {:?}",
            self.cfg.local_name,
            self.event_counter,
            self.channel
        );

        match self.role {
            Role::Central => self.build_and_transmit(now, out),
            Role::Peripheral => self.start_listen(now),
        }
    }

    /// Builds the next PDU and puts it on the air.
    ///
    /// Selection order: retransmit buffer, then a pending Channel Map Indication, then a
    /// queued application payload, then an empty PDU.
    fn build_and_transmit(&mut self, now: Instant, out: &mut Vec<LinkAction>) {
        let wants_control = self.role == Role::Central
            && self.pending_map.is_some()
            && (self.channels_classified || (self.classification_sent && !self.channel_update_ack));

        let (header, payload, app_timestamp) = if let Some(inflight) = &self.last_tx {
            // Unacknowledged PDU: retransmit with the original SN, current NESN.
            let mut header = inflight.header;
            header.set_nesn(self.nesn);
            header.set_md(self.tx_more_pending());
            self.stats.retransmitted_packets += 1;
            trace!("{}: retransmitting {:?}", self.cfg.local_name, header);
            (header, inflight.payload.clone(), inflight.app_timestamp)
        } else if wants_control {
            let instant = self.event_counter.wrapping_add(self.cfg.instant_offset);
            self.map_instant = instant;
            let pdu = ControlPdu::ChannelMapInd {
                map: self.pending_map.expect("pending map checked above"),
                instant,
            };
            let mut payload = vec![0; pdu.encoded_len()];
            pdu.to_bytes(&mut ByteWriter::new(&mut payload)).unwrap();

            self.channels_classified = false;
            self.classification_sent = true;
            self.channel_update_ack = false;
            info!(
                "{}: sending channel map indication, instant {}",
                self.cfg.local_name, instant
            );

            let header = self.fresh_header(Llid::Control, payload.len());
            self.stats.control_packets += 1;
            self.store_in_flight(header, payload.clone(), PduKind::Control, None, now);
            (header, payload, None)
        } else if let Some(queued) = self.queue.dequeue() {
            let payload = queued.data.to_vec();
            let header = self.fresh_header(Llid::DataStart, payload.len());
            self.stats.data_packets += 1;
            self.stats.tx_payload_bytes += payload.len() as u64;
            self.store_in_flight(
                header,
                payload.clone(),
                PduKind::Data,
                Some(queued.produced_at),
                now,
            );
            (header, payload, Some(queued.produced_at))
        } else {
            let header = self.fresh_header(Llid::DataCont, 0);
            self.stats.empty_packets += 1;
            (header, Vec::new(), None)
        };

        let frame = data::encode(header, &payload, self.cfg.crc_init);
        let duration = self.cfg.phy.packet_duration(payload.len());

        self.stats.tx_packets += 1;
        self.stats.tx_bytes += frame.len() as u64;
        self.stats.tx_time += duration;
        self.event_tx += 1;

        trace!(
            "{}: TX {:?} {:?} on {:?}",
            self.cfg.local_name,
            header,
            HexSlice(&payload[..]),
            self.channel
        );

        out.push(LinkAction::Event(LinkEvent::TransmissionStarted(
            TransmissionRecord {
                access_address: self.cfg.access_address,
                channel: self.channel.index(),
                phy: self.cfg.phy,
                frame: frame.clone(),
                at: now,
                from_central: self.role == Role::Central,
                tx_power_dbm: self.cfg.tx_power_dbm,
            },
        )));
        out.push(LinkAction::Transmit(Transmission {
            access_address: self.cfg.access_address,
            channel: self.channel,
            phy: self.cfg.phy,
            tx_power_dbm: self.cfg.tx_power_dbm,
            frame,
            ll_timestamp: now,
            app_timestamp,
            duration,
            from_central: self.role == Role::Central,
        }));

        self.state = State::Transmit;
        self.state_since = now;
        self.until = now + duration;
    }

    fn fresh_header(&self, llid: Llid, payload_len: usize) -> Header {
        let mut header = Header::new(llid);
        header.set_payload_length(payload_len as u8);
        header.set_sn(self.sn);
        header.set_nesn(self.nesn);
        header.set_md(self.tx_more_pending());
        header
    }

    fn store_in_flight(
        &mut self,
        header: Header,
        payload: Vec<u8>,
        kind: PduKind,
        app_timestamp: Option<Instant>,
        now: Instant,
    ) {
        debug_assert!(self.last_tx.is_none());
        self.last_tx = Some(InFlight {
            header,
            payload,
            kind,
            app_timestamp,
            first_sent_at: now,
        });
    }

    fn start_listen(&mut self, now: Instant) {
        self.state = State::Receive;
        self.state_since = now;
        self.until = now + self.max_packet_duration();
    }

    fn enter_spacing(&mut self, state: State, now: Instant) {
        self.state = state;
        self.state_since = now;
        self.until = now + self.tifs();
    }

    fn tifs(&self) -> Duration {
        if self.cfg.model_tifs {
            Duration::T_IFS
        } else {
            Duration::ZERO
        }
    }

    fn enter_sleep(&mut self, now: Instant) {
        self.state = State::Sleep;
        self.state_since = now;
        let scheduled = Instant::ZERO + self.cfg.offset + self.cfg.interval.times(self.events_started);
        // A scenario whose active period fills the whole interval can run an exchange
        // right up to the next anchor point; never sleep into the past.
        self.until = scheduled.max(now);
    }

    fn max_packet_duration(&self) -> Duration {
        self.cfg.phy.packet_duration(data::MAX_PAYLOAD)
    }

    /// The continuation predicate: whether this event has room and reason for another
    /// exchange.
    fn may_continue(&self, now: Instant) -> bool {
        let elapsed = (now - self.event_start).as_micros();
        let budget = self.cfg.active_period.as_micros() + self.cfg.offset.as_micros();
        let room = budget.saturating_sub(elapsed);
        room > 2 * (self.max_packet_duration().as_micros() + self.tifs().as_micros())
            && (self.tx_more_pending() || self.rx_more_data)
            && self.consec_crc_fails <= 1
            && !self.phy_rx_failed
    }

    fn tx_more_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// PHY indication: a frame started arriving on `channel`.
    ///
    /// Extends the listen window to the end of the active period minus `T_IFS` so a
    /// long frame is not cut off by the nominal listen timeout.
    pub fn on_rx_start(&mut self, _now: Instant, channel: DataChannel) {
        if self.state != State::Receive || channel != self.channel {
            return;
        }
        let extended = self.event_start + self.cfg.active_period - self.tifs();
        self.until = self.until.max(extended);
    }

    /// PHY indication: a frame finished arriving.
    pub fn on_rx_end(&mut self, now: Instant, rx: Reception, out: &mut Vec<LinkAction>) {
        if self.state != State::Receive || rx.channel != self.channel {
            // Not listening (or listening elsewhere); the frame is lost to us.
            return;
        }

        self.stats.listen_time += now - self.state_since;

        if rx.access_address != self.cfg.access_address {
            self.phy_rx_failed = true;
            self.enter_spacing(State::RxSpacing, now);
            return;
        }

        let decoded = match data::decode(&rx.frame, self.cfg.crc_init) {
            Ok(decoded) => decoded,
            Err(_) => {
                // A frame mangled beyond parsing counts like any corrupted reception.
                self.note_crc_failure(now, &rx, out);
                return;
            }
        };
        if !decoded.crc_ok {
            self.note_crc_failure(now, &rx, out);
            return;
        }

        let header = decoded.header;
        let payload = decoded.payload.to_vec();

        self.supervision_deadline = now + self.cfg.supervision_timeout;
        self.consec_crc_fails = 0;
        self.stats.rx_packets += 1;
        self.stats.rx_bytes += rx.frame.len() as u64;
        self.event_rx += 1;
        self.rx_more_data = header.md();

        trace!(
            "{}: RX {:?} {:?} on {:?}",
            self.cfg.local_name,
            header,
            HexSlice(&payload[..]),
            self.channel
        );

        if header.sn() == self.nesn {
            // New data, acknowledge it.
            self.nesn += SeqNum::ONE;
            if header.llid() == Llid::Control {
                self.process_control(&payload);
            } else if !payload.is_empty() {
                self.stats.rx_payload_bytes += payload.len() as u64;
                if let Some(produced_at) = rx.app_timestamp {
                    self.stats.record_latency(now, produced_at);
                }
            }
        } else {
            self.stats.rx_duplicates += 1;
        }

        if header.nesn() != self.sn {
            // Our last PDU is acknowledged. Empty PDUs take part in the sequence-number
            // scheme too, so the per-event tally counts every acknowledgement; the
            // acked-packets statistic only counts PDUs that were held for retransmission.
            self.sn += SeqNum::ONE;
            self.event_acks += 1;
            if let Some(inflight) = self.last_tx.take() {
                self.stats.acked_packets += 1;
                self.stats.record_rtt(now, inflight.first_sent_at);
                if inflight.kind == PduKind::Control {
                    self.channel_update_ack = true;
                }
            }
        }

        out.push(LinkAction::Event(LinkEvent::ReceptionEnded(
            ReceptionRecord {
                access_address: rx.access_address,
                channel: rx.channel.index(),
                phy: rx.phy,
                frame: rx.frame,
                at: now,
                rssi_dbm: rx.rssi_dbm,
                sinr_db: rx.sinr_db,
                success: true,
                from_central: rx.from_central,
            },
        )));

        self.enter_spacing(State::RxSpacing, now);
    }

    fn note_crc_failure(&mut self, now: Instant, rx: &Reception, out: &mut Vec<LinkAction>) {
        self.stats.crc_failures += 1;
        self.event_crc_fails += 1;
        self.consec_crc_fails += 1;
        // Force a re-attempt: corrupted frames keep the event alive for a retry.
        self.rx_more_data = true;

        out.push(LinkAction::Event(LinkEvent::ReceptionEnded(
            ReceptionRecord {
                access_address: rx.access_address,
                channel: rx.channel.index(),
                phy: rx.phy,
                frame: rx.frame.clone(),
                at: now,
                rssi_dbm: rx.rssi_dbm,
                sinr_db: rx.sinr_db,
                success: false,
                from_central: rx.from_central,
            },
        )));

        self.enter_spacing(State::RxSpacing, now);
    }

    fn process_control(&mut self, payload: &[u8]) {
        match ControlPdu::from_bytes(&mut ByteReader::new(payload)) {
            Ok(ControlPdu::ChannelMapInd { map, instant }) => {
                info!(
                    "{}: received channel map indication {:?}, instant {}",
                    self.cfg.local_name,
                    map.channel_indices(),
                    instant
                );
                self.pending_map = Some(map);
                self.map_instant = instant;
                self.update_in_progress = true;
                self.channel_update_ack = true;
                self.stats.rx_control_packets += 1;
            }
            Err(e) => {
                debug!(
                    "{}: undecodable control PDU ({}), ignoring",
                    self.cfg.local_name, e
                );
            }
        }
    }

    fn disconnect(&mut self, reason: DisconnectReason, out: &mut Vec<LinkAction>) {
        info!(
            "{}: disconnected from {} (id {}): {:?} at event {}",
            self.cfg.local_name, self.cfg.peer_name, self.cfg.peer_id, reason, self.event_counter
        );
        self.state = State::Standby;
        out.push(LinkAction::Disconnect(reason));
    }
}
