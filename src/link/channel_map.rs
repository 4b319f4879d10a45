use crate::phy::{DataChannel, NUM_DATA_CHANNELS};
use core::fmt;

/// A map marking data channels as used or unused.
///
/// A channel map enforced on a live connection must mark at least 2 channels as used;
/// candidate maps under construction by a classifier may transiently hold fewer.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct ChannelMap {
    raw: [u8; 5],
    num_used_channels: u8,
}

impl ChannelMap {
    /// Create a new channel map from the raw format used in the Channel Map Indication
    /// PDU (`ChM`).
    ///
    /// The first byte (LSB) contains flags for data channels 0 to 7, where the least
    /// significant bit is the flag for channel 0, and so on.
    ///
    /// Since there are only 37 data channels, but 40 bits in the 5 Bytes, the 3 most
    /// significant bits in the last Byte of `raw` are considered reserved for future use
    /// (RFU) and are ignored by this function.
    pub fn from_raw(mut raw: [u8; 5]) -> Self {
        raw[4] &= 0b11111; // clear RFU bits
        Self {
            raw,
            num_used_channels: raw.iter().map(|b| b.count_ones() as u8).sum(),
        }
    }

    /// Returns the raw bytes encoding this channel map.
    pub fn to_raw(&self) -> [u8; 5] {
        self.raw
    }

    /// Creates a new channel map that marks all data channels as used.
    pub fn with_all_channels() -> Self {
        Self {
            raw: [0xff, 0xff, 0xff, 0xff, 0b11111],
            num_used_channels: NUM_DATA_CHANNELS,
        }
    }

    /// Creates a channel map marking exactly the given channel indices as used.
    ///
    /// Returns `None` if any index is not a valid data channel index.
    pub fn from_channels<I: IntoIterator<Item = u8>>(channels: I) -> Option<Self> {
        let mut raw = [0u8; 5];
        for ch in channels {
            if ch >= NUM_DATA_CHANNELS {
                return None;
            }
            raw[usize::from(ch) / 8] |= 1 << (ch % 8);
        }
        Some(Self::from_raw(raw))
    }

    /// Returns the number of data channels marked as used by this map.
    pub fn num_used_channels(&self) -> u8 {
        self.num_used_channels
    }

    /// Returns whether the given data channel is marked as used.
    pub fn is_used(&self, channel: DataChannel) -> bool {
        let byte = self.raw[usize::from(channel.index()) / 8];
        byte & (1 << (channel.index() % 8)) != 0
    }

    /// Marks `channel` as used.
    pub fn insert(&mut self, channel: DataChannel) {
        if !self.is_used(channel) {
            self.raw[usize::from(channel.index()) / 8] |= 1 << (channel.index() % 8);
            self.num_used_channels += 1;
        }
    }

    /// Marks `channel` as unused.
    pub fn remove(&mut self, channel: DataChannel) {
        if self.is_used(channel) {
            self.raw[usize::from(channel.index()) / 8] &= !(1 << (channel.index() % 8));
            self.num_used_channels -= 1;
        }
    }

    /// Returns an iterator over all data channels marked as used in this map.
    pub fn iter_used(&self) -> impl Iterator<Item = DataChannel> + '_ {
        self.raw
            .iter()
            .enumerate()
            .flat_map(move |(byteindex, byte)| {
                (0..8).filter_map(move |bitindex| {
                    let index = byteindex as u8 * 8 + bitindex;
                    if index < NUM_DATA_CHANNELS && byte & (1 << bitindex) != 0 {
                        Some(DataChannel::new(index))
                    } else {
                        None
                    }
                })
            })
    }

    /// Returns the used channel indices as a sorted list.
    pub fn channel_indices(&self) -> Vec<u8> {
        self.iter_used().map(|ch| ch.index()).collect()
    }

    /// Returns the `n`th channel marked as used.
    ///
    /// # Panics
    ///
    /// This will panic when `n >= self.num_used_channels()`.
    pub fn by_index(&self, n: u8) -> DataChannel {
        self.iter_used()
            .nth(n.into())
            .expect("by_index: index out of bounds")
    }
}

impl fmt::Display for ChannelMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.raw[..4] {
            write!(f, "{:08b}", b.reverse_bits())?;
        }
        write!(f, "{:05b}", self.raw[4].reverse_bits() >> 3)?;
        Ok(())
    }
}

impl fmt::Debug for ChannelMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self, self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_channel() {
        // Channel map where only channel 0 is used.
        // Not valid on a live connection, but useful for testing.
        let map = ChannelMap::from_raw([0x01, 0, 0, 0, 0]);
        assert_eq!(map.num_used_channels(), 1);
        assert!(map.is_used(DataChannel::new(0)));
        assert!(!map.is_used(DataChannel::new(1)));
        assert!(!map.is_used(DataChannel::new(8)));
        assert!(!map.is_used(DataChannel::new(36)));
        assert_eq!(map.by_index(0), DataChannel::new(0));
        assert!(map.iter_used().eq(vec![DataChannel::new(0)]));
    }

    #[test]
    fn from_raw_clears_rfu() {
        let map = ChannelMap::from_raw([0xff; 5]);
        assert_eq!(map.num_used_channels(), 37);
        assert_eq!(map, ChannelMap::with_all_channels());
    }

    #[test]
    fn from_channels() {
        let map = ChannelMap::from_channels(5..=36).unwrap();
        assert_eq!(map.num_used_channels(), 32);
        assert!(!map.is_used(DataChannel::new(4)));
        assert!(map.is_used(DataChannel::new(5)));
        assert_eq!(map.channel_indices(), (5..=36).collect::<Vec<_>>());
        assert!(ChannelMap::from_channels([0, 37]).is_none());
    }

    #[test]
    fn insert_remove() {
        let mut map = ChannelMap::with_all_channels();
        map.remove(DataChannel::new(12));
        map.remove(DataChannel::new(12));
        assert_eq!(map.num_used_channels(), 36);
        assert!(!map.is_used(DataChannel::new(12)));
        map.insert(DataChannel::new(12));
        assert_eq!(map, ChannelMap::with_all_channels());
    }
}
