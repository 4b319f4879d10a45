//! Enhanced classifier: informed exploration over short and long PDR windows.
//!
//! Per channel, two sliding windows of per-event packet delivery ratios drive three
//! rules, evaluated at the end of every connection event:
//!
//! * **Exclusion** - a full short window averaging at or below the exclusion threshold
//!   removes the channel from the candidate set.
//! * **Exploration** - an excluded channel returns once its exploration score (driven by
//!   how long it has rested and how bad its long-window history is) outweighs the leaky
//!   penalty derived from its neighbours' long-window loss.
//! * **Fallback** - the candidate set is topped up from the channels with the best
//!   long-window history whenever it would drop below the minimum of two.
//!
//! A cooldown keeps wire traffic bounded: at most one channel list push every seven
//! events. The numeric constants are algorithm constants; changing them changes the
//! published traces this simulator is meant to reproduce.

use crate::afh::{ChannelList, Classifier};
use crate::link::channel_map::ChannelMap;
use crate::link::{EventRecord, ReceptionRecord};
use crate::phy::{DataChannel, NUM_DATA_CHANNELS};
use crate::time::Instant;
use log::{debug, info};

/// Short PDR window length (events).
pub const W_SHORT: usize = 15;
/// Long PDR window length (events).
pub const W_LONG: usize = 20;
/// A full short window at or below this mean PDR excludes the channel.
const EXCLUSION_THRESHOLD: f64 = 0.95;
/// Connection events between two channel-list pushes.
const UPDATE_COOLDOWN: u32 = 6;
/// Weight of the leaky-neighbour penalty in the inclusion rule.
const LEAKY_WEIGHT: f64 = 2.0;
/// Normaliser of the exploration score.
const EXPLORATION_NORMALISER: f64 = 200.0;
/// Channels the candidate set may never drop below.
const MIN_CHANNELS: usize = 2;

/// Sliding window of PDR samples with a cached sum.
///
/// Slots not yet written count as a 1.0 sample (optimistic prior), so an unobserved
/// channel neither excludes itself nor drags down its neighbours' scores.
struct PdrWindow {
    samples: Vec<f64>,
    cursor: usize,
    filled: usize,
    sum_observed: f64,
}

impl PdrWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity],
            cursor: 0,
            filled: 0,
            sum_observed: 0.0,
        }
    }

    fn push(&mut self, pdr: f64) {
        if self.filled < self.samples.len() {
            self.filled += 1;
        } else {
            self.sum_observed -= self.samples[self.cursor];
        }
        self.samples[self.cursor] = pdr;
        self.sum_observed += pdr;
        self.cursor = (self.cursor + 1) % self.samples.len();
    }

    /// Window sum with the optimistic prior filling unobserved slots.
    fn sum(&self) -> f64 {
        self.sum_observed + (self.samples.len() - self.filled) as f64
    }

    fn is_full(&self) -> bool {
        self.filled == self.samples.len()
    }
}

/// The enhanced channel classifier.
pub struct EafhClassifier {
    short: Vec<PdrWindow>,
    long: Vec<PdrWindow>,
    /// Connection events since each channel was last used.
    last_use: [u64; NUM_DATA_CHANNELS as usize],
    leaky_loss: [f64; NUM_DATA_CHANNELS as usize],
    exploration: [f64; NUM_DATA_CHANNELS as usize],
    /// Event counter at which each channel was most recently excluded.
    exclusion_event: [Option<u16>; NUM_DATA_CHANNELS as usize],
    /// Candidate used-channel set.
    used: ChannelMap,
    /// Last list actually pushed to the link layer.
    enforced: ChannelMap,
    /// Connection events since the last push.
    last_update_cnt: u32,
}

impl EafhClassifier {
    pub fn new(initial: ChannelMap) -> Self {
        Self {
            short: (0..NUM_DATA_CHANNELS).map(|_| PdrWindow::new(W_SHORT)).collect(),
            long: (0..NUM_DATA_CHANNELS).map(|_| PdrWindow::new(W_LONG)).collect(),
            last_use: [0; NUM_DATA_CHANNELS as usize],
            leaky_loss: [0.0; NUM_DATA_CHANNELS as usize],
            exploration: [0.0; NUM_DATA_CHANNELS as usize],
            exclusion_event: [None; NUM_DATA_CHANNELS as usize],
            used: initial,
            enforced: initial,
            last_update_cnt: 0,
        }
    }

    /// Event counter at which `channel` was most recently excluded, if ever.
    pub fn exclusion_event(&self, channel: u8) -> Option<u16> {
        self.exclusion_event[usize::from(channel)]
    }

    /// The current candidate set.
    pub fn candidate_channels(&self) -> ChannelList {
        self.used.channel_indices()
    }

    fn long_sum(&self, c: usize) -> f64 {
        self.long[c].sum()
    }

    /// Mean long-window sum of the adjacent channels; the band edges only have one.
    fn neighbour_long_sum(&self, c: usize) -> f64 {
        let last = usize::from(NUM_DATA_CHANNELS) - 1;
        match c {
            0 => self.long_sum(1),
            c if c == last => self.long_sum(last - 1),
            c => (self.long_sum(c - 1) + self.long_sum(c + 1)) / 2.0,
        }
    }
}

impl Classifier for EafhClassifier {
    fn on_reception(&mut self, _record: &ReceptionRecord) {
        // Per-event tallies arrive with the connection event record.
    }

    fn on_connection_event(&mut self, record: &EventRecord) -> Option<ChannelList> {
        let event_channel = usize::from(record.channel);

        // 1. This event's delivery ratio goes into the used channel's windows.
        let pdr = if record.tx_packets == 0 {
            0.0
        } else {
            f64::from(record.acked_packets) / f64::from(record.tx_packets)
        };
        self.short[event_channel].push(pdr);
        self.long[event_channel].push(pdr);

        // 2. Rest counters.
        self.last_use[event_channel] = 0;
        for cnt in self.last_use.iter_mut() {
            *cnt += 1;
        }

        // 3./4. Exploration scores and leaky-neighbour penalties.
        for c in 0..usize::from(NUM_DATA_CHANNELS) {
            self.exploration[c] = (self.last_use[c] as f64
                / (W_LONG as f64 + 1.0 - self.long_sum(c)))
                / EXPLORATION_NORMALISER;
        }
        for c in 0..usize::from(NUM_DATA_CHANNELS) {
            self.leaky_loss[c] = -(1.0 - self.neighbour_long_sum(c) / W_LONG as f64);
        }

        // 5. Exclusion: a full short window at or below the threshold.
        for c in 0..NUM_DATA_CHANNELS {
            let ch = DataChannel::new(c);
            let short = &self.short[usize::from(c)];
            if self.used.is_used(ch)
                && short.is_full()
                && short.sum() / W_SHORT as f64 <= EXCLUSION_THRESHOLD
            {
                debug!(
                    "excluding channel {} (short PDR {:.2}) at event {}",
                    c,
                    short.sum() / W_SHORT as f64,
                    record.counter
                );
                self.used.remove(ch);
                self.exclusion_event[usize::from(c)] = Some(record.counter);
            }
        }

        // 6. Exploration inclusion.
        for c in 0..NUM_DATA_CHANNELS {
            let ch = DataChannel::new(c);
            let idx = usize::from(c);
            if !self.used.is_used(ch)
                && self.exploration[idx] + LEAKY_WEIGHT * self.leaky_loss[idx] >= 1.0
            {
                debug!("re-including channel {} for exploration", c);
                self.used.insert(ch);
            }
        }

        // 7. Fallback: keep at least two candidates, best long-window history first.
        while usize::from(self.used.num_used_channels()) < MIN_CHANNELS {
            let best = (0..NUM_DATA_CHANNELS)
                .filter(|&c| !self.used.is_used(DataChannel::new(c)))
                .max_by(|&a, &b| {
                    self.long_sum(usize::from(a))
                        .partial_cmp(&self.long_sum(usize::from(b)))
                        .unwrap()
                })
                .expect("fewer than two data channels exist");
            info!("topping candidate set up with channel {}", best);
            self.used.insert(DataChannel::new(best));
        }

        // 8. Cooldown gate, checked after this event's metrics were folded in.
        if self.last_update_cnt > UPDATE_COOLDOWN && self.used != self.enforced {
            self.enforced = self.used;
            self.last_update_cnt = 0;
            Some(self.used.channel_indices())
        } else {
            self.last_update_cnt += 1;
            None
        }
    }

    fn tick(&mut self, _now: Instant) -> Option<ChannelList> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(counter: u16, channel: u8, tx: u32, acked: u32) -> EventRecord {
        EventRecord {
            access_address: 0,
            counter,
            channel,
            tx_packets: tx,
            rx_packets: acked,
            acked_packets: acked,
            crc_failures: 0,
            at: Instant::ZERO,
        }
    }

    /// Drives the classifier with one lossy channel; all other events are lossless and
    /// rotate over the remaining channels.
    fn run_events(
        clf: &mut EafhClassifier,
        counter: &mut u16,
        n: usize,
        lossy: Option<(u8, u32, u32)>,
    ) -> Vec<ChannelList> {
        let mut updates = Vec::new();
        let mut other = 0u8;
        for _ in 0..n {
            let rec = match lossy {
                Some((ch, tx, acked)) => event(*counter, ch, tx, acked),
                None => {
                    // Only candidate channels can host a connection event.
                    loop {
                        other = (other + 1) % NUM_DATA_CHANNELS;
                        if clf.used.is_used(DataChannel::new(other)) {
                            break;
                        }
                    }
                    event(*counter, other, 2, 2)
                }
            };
            if let Some(update) = clf.on_connection_event(&rec) {
                updates.push(update);
            }
            *counter = counter.wrapping_add(1);
        }
        updates
    }

    #[test]
    fn exclusion_requires_a_full_short_window() {
        let mut clf = EafhClassifier::new(ChannelMap::with_all_channels());
        let mut counter = 0;

        // 14 events at PDR 0.5 on channel 10: window not yet full, channel stays.
        run_events(&mut clf, &mut counter, W_SHORT - 1, Some((10, 2, 1)));
        assert!(clf.candidate_channels().contains(&10));
        assert_eq!(clf.exclusion_event(10), None);

        // The 15th sample fills the window and trips the rule.
        run_events(&mut clf, &mut counter, 1, Some((10, 2, 1)));
        assert!(!clf.candidate_channels().contains(&10));
        assert_eq!(clf.exclusion_event(10), Some((W_SHORT - 1) as u16));
    }

    #[test]
    fn excluded_channel_is_eventually_re_explored() {
        let mut clf = EafhClassifier::new(ChannelMap::with_all_channels());
        let mut counter = 0;
        run_events(&mut clf, &mut counter, W_SHORT, Some((10, 2, 1)));
        assert!(!clf.candidate_channels().contains(&10));

        // Lossless traffic elsewhere: the rest counter grows until the exploration
        // score outweighs the leaky penalty.
        let mut restored = false;
        for _ in 0..5000 {
            run_events(&mut clf, &mut counter, 1, None);
            if clf.candidate_channels().contains(&10) {
                restored = true;
                break;
            }
        }
        assert!(restored, "channel 10 never re-explored");
    }

    #[test]
    fn at_most_one_update_per_cooldown_window() {
        let mut clf = EafhClassifier::new(ChannelMap::with_all_channels());
        let mut counter = 0;

        // Alternate two lossy channels so the candidate set keeps changing.
        let mut updates = 0;
        let mut events = 0;
        for round in 0..40 {
            let ch = if round % 2 == 0 { 4 } else { 20 };
            let produced = run_events(&mut clf, &mut counter, W_SHORT, Some((ch, 2, 0)));
            updates += produced.len();
            events += W_SHORT;
        }
        assert!(updates > 0);
        // Cooldown: strictly fewer than one update per seven events.
        assert!(
            updates <= events / (UPDATE_COOLDOWN as usize + 1),
            "{} updates in {} events",
            updates,
            events
        );
    }

    #[test]
    fn candidate_set_never_drops_below_two() {
        let mut clf = EafhClassifier::new(ChannelMap::with_all_channels());
        let mut counter = 0;
        // Every channel lossy: exclusion would empty the set without the fallback.
        for ch in 0..NUM_DATA_CHANNELS {
            run_events(&mut clf, &mut counter, W_SHORT, Some((ch, 2, 0)));
        }
        assert!(clf.candidate_channels().len() >= 2);
    }
}
