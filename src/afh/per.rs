//! Baseline classifier: per-channel packet error rate over a reception ring buffer.
//!
//! Each channel keeps a ring of the most recent reception outcomes. A periodic
//! classification pass marks a channel bad when its PER exceeds the configured threshold;
//! when that leaves fewer good channels than the preferred minimum, every channel is
//! declared good again and the observation history is discarded.

use crate::afh::{ChannelList, Classifier};
use crate::link::{EventRecord, ReceptionRecord};
use crate::phy::NUM_DATA_CHANNELS;
use crate::time::Instant;
use log::{debug, info};

/// Tri-state reception outcome cell. A cell is `Empty` iff the ring has not yet wrapped
/// past it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Outcome {
    Empty,
    Success,
    Failure,
}

/// Fixed-capacity ring of reception outcomes with a write cursor.
struct OutcomeRing {
    cells: Vec<Outcome>,
    cursor: usize,
}

impl OutcomeRing {
    fn new(capacity: usize) -> Self {
        Self {
            cells: vec![Outcome::Empty; capacity],
            cursor: 0,
        }
    }

    fn push(&mut self, success: bool) {
        self.cells[self.cursor] = if success {
            Outcome::Success
        } else {
            Outcome::Failure
        };
        self.cursor = (self.cursor + 1) % self.cells.len();
    }

    /// Returns `(observed, failures)` over the non-empty cells.
    fn counts(&self) -> (usize, usize) {
        let observed = self.cells.iter().filter(|c| **c != Outcome::Empty).count();
        let failures = self.cells.iter().filter(|c| **c == Outcome::Failure).count();
        (observed, failures)
    }

    fn clear(&mut self) {
        self.cells.fill(Outcome::Empty);
        self.cursor = 0;
    }
}

/// Tunables of the PER classifier.
#[derive(Clone, Debug)]
pub struct PerParams {
    /// PER threshold in percent above which a channel is marked bad.
    pub threshold: f64,
    /// Minimum observations before a channel may be classified.
    pub min_receptions: usize,
    /// When fewer channels than this remain good, the map collapses back to all-good.
    pub preferred_min_good: usize,
    /// Ring capacity per channel; must be at least `min_receptions`.
    pub window: usize,
}

impl Default for PerParams {
    fn default() -> Self {
        Self {
            threshold: 40.0,
            min_receptions: 4,
            preferred_min_good: 2,
            window: 20,
        }
    }
}

/// The baseline PER-based channel classifier.
pub struct PerClassifier {
    params: PerParams,
    rings: Vec<OutcomeRing>,
    good: [bool; NUM_DATA_CHANNELS as usize],
}

impl PerClassifier {
    pub fn new(params: PerParams) -> Self {
        assert!(params.window >= params.min_receptions);
        let rings = (0..NUM_DATA_CHANNELS)
            .map(|_| OutcomeRing::new(params.window))
            .collect();
        Self {
            params,
            rings,
            good: [true; NUM_DATA_CHANNELS as usize],
        }
    }

    fn good_channels(&self) -> ChannelList {
        self.good
            .iter()
            .enumerate()
            .filter_map(|(c, good)| good.then(|| c as u8))
            .collect()
    }
}

impl Classifier for PerClassifier {
    fn on_reception(&mut self, record: &ReceptionRecord) {
        self.rings[usize::from(record.channel)].push(record.success);
    }

    fn on_connection_event(&mut self, _record: &EventRecord) -> Option<ChannelList> {
        None
    }

    /// One classification pass over all currently good channels.
    fn tick(&mut self, _now: Instant) -> Option<ChannelList> {
        for c in 0..usize::from(NUM_DATA_CHANNELS) {
            if !self.good[c] {
                continue;
            }
            let (observed, failures) = self.rings[c].counts();
            if observed < self.params.min_receptions {
                continue;
            }
            let per = failures as f64 / observed as f64 * 100.0;
            if per > self.params.threshold {
                debug!("channel {} marked bad (PER {:.1}%)", c, per);
                self.good[c] = false;
            }
        }

        if self.good.iter().filter(|g| **g).count() < self.params.preferred_min_good {
            info!("too few good channels remain, resetting all channels to good");
            self.good = [true; NUM_DATA_CHANNELS as usize];
            for ring in &mut self.rings {
                ring.clear();
            }
        }

        Some(self.good_channels())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::PhyMode;

    fn rx(channel: u8, success: bool) -> ReceptionRecord {
        ReceptionRecord {
            access_address: 0,
            channel,
            phy: PhyMode::Le1M,
            frame: Vec::new(),
            at: Instant::ZERO,
            rssi_dbm: -40,
            sinr_db: 20,
            success,
            from_central: false,
        }
    }

    #[test]
    fn lossy_channels_are_trained_out() {
        let mut clf = PerClassifier::new(PerParams::default());
        for _ in 0..10 {
            for c in 0..37 {
                clf.on_reception(&rx(c, c >= 5));
            }
        }
        let list = clf.tick(Instant::ZERO).unwrap();
        assert_eq!(list, (5..=36).collect::<Vec<_>>());
    }

    #[test]
    fn too_few_observations_never_classify() {
        let mut clf = PerClassifier::new(PerParams::default());
        // Three failures are below min_receptions = 4.
        for _ in 0..3 {
            clf.on_reception(&rx(7, false));
        }
        let list = clf.tick(Instant::ZERO).unwrap();
        assert_eq!(list.len(), 37, "channel 7 must not be classified yet");
        // The fourth observation makes it eligible.
        clf.on_reception(&rx(7, false));
        let list = clf.tick(Instant::ZERO).unwrap();
        assert!(!list.contains(&7));
    }

    #[test]
    fn threshold_is_strictly_exceeded() {
        let params = PerParams {
            threshold: 50.0,
            ..PerParams::default()
        };
        let mut clf = PerClassifier::new(params);
        // Exactly 50% PER: not above threshold, stays good.
        for i in 0..10 {
            clf.on_reception(&rx(3, i % 2 == 0));
        }
        assert!(clf.tick(Instant::ZERO).unwrap().contains(&3));
        // Push it over.
        clf.on_reception(&rx(3, false));
        clf.on_reception(&rx(3, false));
        assert!(!clf.tick(Instant::ZERO).unwrap().contains(&3));
    }

    #[test]
    fn collapse_to_all_good_when_too_few_remain() {
        let mut clf = PerClassifier::new(PerParams::default());
        for _ in 0..5 {
            for c in 0..36 {
                clf.on_reception(&rx(c, false));
            }
        }
        // 36 of 37 channels fail; 1 < preferred_min_good = 2 fires the collapse.
        let list = clf.tick(Instant::ZERO).unwrap();
        assert_eq!(list.len(), 37);
        // History was discarded: the next pass sees no observations.
        let list = clf.tick(Instant::ZERO).unwrap();
        assert_eq!(list.len(), 37);
    }

    #[test]
    fn bad_channels_stay_bad_without_collapse() {
        let mut clf = PerClassifier::new(PerParams::default());
        for _ in 0..5 {
            for c in 0..37 {
                clf.on_reception(&rx(c, c != 0));
            }
        }
        assert!(!clf.tick(Instant::ZERO).unwrap().contains(&0));
        // No further observations on channel 0: it remains excluded.
        assert!(!clf.tick(Instant::ZERO).unwrap().contains(&0));
    }
}
