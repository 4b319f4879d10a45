//! Physical-layer model: channel indices, PHY modes, and packet air times.
//!
//! BLE data is transmitted on 40 RF channels numbered 0 to 39 with ascending frequencies.
//! The link layer reorders them into "channel indices" so that 0..=36 refer to data
//! channels and 37..=39 to the advertising channels. Only data channels exist in this
//! simulator (advertising is out of scope), so `DataChannel` is the only channel type.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Number of data channels.
pub const NUM_DATA_CHANNELS: u8 = 37;

/// Returns the center frequency in MHz corresponding to an RF channel.
fn rf_channel_freq(rf_channel: u8) -> u16 {
    2402 + u16::from(rf_channel) * 2
}

/// One of 37 data channels on which data channel PDUs are sent between connected devices.
///
/// (channel indices 0..=36)
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct DataChannel(u8);

impl DataChannel {
    /// Creates a `DataChannel` from a raw index.
    ///
    /// # Panics
    ///
    /// This will panic if `index` is not a valid data channel index. Valid indices are
    /// 0..=36.
    pub fn new(index: u8) -> Self {
        assert!(index < NUM_DATA_CHANNELS);
        DataChannel(index)
    }

    /// Returns the data channel index, always in range 0..=36.
    pub fn index(&self) -> u8 {
        self.0
    }

    /// Returns the RF channel corresponding to this data channel index.
    ///
    /// RF channels 1-11 and 13-38 are used for data transmission.
    pub fn rf_channel(&self) -> u8 {
        match self.0 {
            ch @ 0..=10 => ch + 1,
            ch @ 11..=36 => ch + 2,
            _ => unreachable!(),
        }
    }

    /// Returns the center frequency of this channel in MHz.
    pub fn freq(&self) -> u16 {
        rf_channel_freq(self.rf_channel())
    }
}

impl fmt::Debug for DataChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

impl fmt::Display for DataChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The PHY a connection runs on.
///
/// `Le500K` and `Le125K` are the two coded PHY operating modes (S=2 and S=8).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhyMode {
    #[serde(rename = "LE1M")]
    Le1M,
    #[serde(rename = "LE2M")]
    Le2M,
    #[serde(rename = "LE500K")]
    Le500K,
    #[serde(rename = "LE125K")]
    Le125K,
}

impl PhyMode {
    /// Air time in microseconds of a data channel packet carrying `payload_len` payload
    /// bytes.
    ///
    /// Uncoded PHYs transmit preamble (1 or 2 octets), access address (4), PDU header (2),
    /// payload, and CRC (3) at the symbol rate. The coded PHYs have a fixed-rate FEC
    /// block 1 (preamble 80µs, access address 256µs, CI 16µs, TERM1 24µs) followed by
    /// header, payload, CRC, and TERM2 (3 bits) at S=8 or S=2.
    pub fn packet_duration(&self, payload_len: usize) -> crate::time::Duration {
        let len = payload_len as u64;
        let micros = match self {
            PhyMode::Le1M => (1 + 4 + 2 + len + 3) * 8,
            PhyMode::Le2M => (2 + 4 + 2 + len + 3) * 4,
            PhyMode::Le125K => 80 + 256 + 16 + 24 + ((2 + len + 3) * 8 + 3) * 8,
            PhyMode::Le500K => 80 + 256 + 16 + 24 + ((2 + len + 3) * 8 + 3) * 2,
        };
        crate::time::Duration::from_micros(micros)
    }

    /// Whether this is one of the coded PHY modes.
    pub fn is_coded(&self) -> bool {
        matches!(self, PhyMode::Le500K | PhyMode::Le125K)
    }

    /// The CI field value announcing this coding scheme, for coded PHYs only.
    pub fn coding_indicator(&self) -> Option<u8> {
        match self {
            PhyMode::Le500K => Some(0b10),
            PhyMode::Le125K => Some(0b00),
            _ => None,
        }
    }
}

impl fmt::Display for PhyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PhyMode::Le1M => "LE1M",
            PhyMode::Le2M => "LE2M",
            PhyMode::Le500K => "LE500K",
            PhyMode::Le125K => "LE125K",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rf_mapping_skips_advertising_channels() {
        assert_eq!(DataChannel::new(0).rf_channel(), 1);
        assert_eq!(DataChannel::new(10).rf_channel(), 11);
        assert_eq!(DataChannel::new(11).rf_channel(), 13);
        assert_eq!(DataChannel::new(36).rf_channel(), 38);
        assert_eq!(DataChannel::new(0).freq(), 2404);
        assert_eq!(DataChannel::new(36).freq(), 2478);
    }

    #[test]
    #[should_panic]
    fn channel_37_is_not_a_data_channel() {
        DataChannel::new(37);
    }

    #[test]
    fn air_times() {
        // Empty PDU on LE1M is the canonical 80µs.
        assert_eq!(PhyMode::Le1M.packet_duration(0).as_micros(), 80);
        // LE2M halves the on-air time of the variable part.
        assert!(PhyMode::Le2M.packet_duration(251) < PhyMode::Le1M.packet_duration(251));
        // Coded PHYs are strictly slower than both.
        assert!(PhyMode::Le500K.packet_duration(50) > PhyMode::Le1M.packet_duration(50));
        assert!(PhyMode::Le125K.packet_duration(50) > PhyMode::Le500K.packet_duration(50));
    }
}
