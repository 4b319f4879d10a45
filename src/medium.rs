//! The simulated radio medium.
//!
//! The medium is the seam between the link layer and the RF world: given a transmission
//! and the two endpoints' radio parameters, it decides whether the frame reaches the
//! receiver and in what shape. Scenario files pick one of the bundled models;
//! interference studies plug in their own implementation of [`Medium`].

use crate::link::Transmission;
use crate::node::NodeInfo;
use crate::phy::DataChannel;
use rand::rngs::SmallRng;

/// What became of a transmission on its way to one receiver.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The frame never reaches the receiver; its listen window will time out.
    Lost,
    /// The frame arrives. `corrupt` frames reach the receiver with a broken CRC.
    Delivered {
        rssi_dbm: i8,
        sinr_db: i8,
        corrupt: bool,
    },
}

/// Propagation and interference model.
///
/// The RNG is the scenario's single seeded stream; models that draw from it stay
/// reproducible across runs with the same seed.
pub trait Medium {
    fn deliver(
        &mut self,
        tx: &Transmission,
        from: &NodeInfo,
        to: &NodeInfo,
        rng: &mut SmallRng,
    ) -> Verdict;
}

/// Lossless medium: every frame arrives intact with a fixed, comfortable link margin.
pub struct IdealMedium;

impl Medium for IdealMedium {
    fn deliver(
        &mut self,
        _tx: &Transmission,
        _from: &NodeInfo,
        _to: &NodeInfo,
        _rng: &mut SmallRng,
    ) -> Verdict {
        Verdict::Delivered {
            rssi_dbm: -40,
            sinr_db: 30,
            corrupt: false,
        }
    }
}

/// Otherwise ideal medium that corrupts every frame on the given channels.
///
/// Classifier studies are built on this: a known set of channels fails
/// deterministically, everything else is clean.
pub struct JammedChannels {
    channels: Vec<u8>,
}

impl JammedChannels {
    pub fn new(channels: Vec<u8>) -> Self {
        Self { channels }
    }

    fn is_jammed(&self, channel: DataChannel) -> bool {
        self.channels.contains(&channel.index())
    }
}

impl Medium for JammedChannels {
    fn deliver(
        &mut self,
        tx: &Transmission,
        _from: &NodeInfo,
        _to: &NodeInfo,
        _rng: &mut SmallRng,
    ) -> Verdict {
        Verdict::Delivered {
            rssi_dbm: -40,
            sinr_db: 30,
            corrupt: self.is_jammed(tx.channel),
        }
    }
}

/// Log-distance path loss between the node positions.
///
/// `PL(d) = ref_loss_db + 10·exponent·log10(d)` with `d` in metres. A frame below the
/// receiver's sensitivity, or beyond its configured range, is lost outright; everything
/// else arrives clean with an SINR against the receiver's thermal noise floor.
pub struct LogDistance {
    pub exponent: f64,
    /// Path loss at one metre, dB.
    pub ref_loss_db: f64,
}

impl Default for LogDistance {
    fn default() -> Self {
        // Free-space reference loss at 1 m for 2.4 GHz.
        Self {
            exponent: 2.0,
            ref_loss_db: 40.0,
        }
    }
}

fn distance_m(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

impl Medium for LogDistance {
    fn deliver(
        &mut self,
        tx: &Transmission,
        from: &NodeInfo,
        to: &NodeInfo,
        _rng: &mut SmallRng,
    ) -> Verdict {
        let d = distance_m(from.position, to.position).max(0.01);
        if d > to.range_m {
            return Verdict::Lost;
        }

        let loss = self.ref_loss_db + 10.0 * self.exponent * d.log10();
        let rssi = f64::from(tx.tx_power_dbm) - loss;
        if rssi < f64::from(to.rx_sensitivity_dbm) {
            return Verdict::Lost;
        }

        // Thermal noise floor over a 1 MHz channel, plus the receiver's noise figure.
        let noise_floor = -114.0 + f64::from(to.noise_figure_db);
        let sinr = rssi - noise_floor;

        Verdict::Delivered {
            rssi_dbm: rssi.clamp(-128.0, 127.0) as i8,
            sinr_db: sinr.clamp(-128.0, 127.0) as i8,
            corrupt: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Role;
    use crate::phy::PhyMode;
    use crate::time::{Duration, Instant};
    use rand::SeedableRng;

    fn node_at(position: [f64; 3]) -> NodeInfo {
        NodeInfo {
            name: "n".into(),
            id: 0,
            position,
            role: Role::Central,
            tx_power_dbm: 0,
            rx_sensitivity_dbm: -90,
            noise_figure_db: 5,
            range_m: 100.0,
            interference_fidelity: 0,
        }
    }

    fn tx_on(channel: u8) -> Transmission {
        Transmission {
            access_address: 0x1234_5678,
            channel: DataChannel::new(channel),
            phy: PhyMode::Le1M,
            tx_power_dbm: 0,
            frame: vec![0; 10],
            ll_timestamp: Instant::ZERO,
            app_timestamp: None,
            duration: Duration::from_micros(80),
            from_central: true,
        }
    }

    #[test]
    fn jammed_channels_corrupt_only_their_set() {
        let mut medium = JammedChannels::new(vec![0, 1, 2, 3, 4]);
        let mut rng = SmallRng::seed_from_u64(1);
        let (a, b) = (node_at([0.0; 3]), node_at([1.0, 0.0, 0.0]));

        match medium.deliver(&tx_on(2), &a, &b, &mut rng) {
            Verdict::Delivered { corrupt, .. } => assert!(corrupt),
            v => panic!("unexpected {:?}", v),
        }
        match medium.deliver(&tx_on(20), &a, &b, &mut rng) {
            Verdict::Delivered { corrupt, .. } => assert!(!corrupt),
            v => panic!("unexpected {:?}", v),
        }
    }

    #[test]
    fn log_distance_loses_weak_links() {
        let mut medium = LogDistance::default();
        let mut rng = SmallRng::seed_from_u64(1);
        let a = node_at([0.0; 3]);

        // 1 m: 40 dB loss, well above -90 dBm sensitivity.
        let near = node_at([1.0, 0.0, 0.0]);
        assert!(matches!(
            medium.deliver(&tx_on(0), &a, &near, &mut rng),
            Verdict::Delivered { corrupt: false, .. }
        ));

        // ~316 m would be below sensitivity, but the range cut applies first.
        let far = node_at([316.0, 0.0, 0.0]);
        assert_eq!(medium.deliver(&tx_on(0), &a, &far, &mut rng), Verdict::Lost);
    }
}
