//! Channel selection algorithm #1.
//!
//! `4.5.8.2 Channel Selection` of the core specification: each connection event hops the
//! *unmapped* channel forward by the connection's hop increment, then remaps unused
//! channels onto the used set. The function is pure so that identical connection
//! parameters reproduce identical hop traces on both endpoints.

use crate::link::channel_map::ChannelMap;
use crate::phy::{DataChannel, NUM_DATA_CHANNELS};

/// Advances the unmapped channel and selects the data channel for the next connection
/// event.
///
/// Returns `(next_unmapped, selected)`. Callers store `next_unmapped` as the input for the
/// following event. Channel map updates committed between invocations take effect on the
/// next call.
///
/// `hop` must be in range 5..=16 (validated at scenario build time).
pub fn select(last_unmapped: u8, hop: u8, map: &ChannelMap) -> (u8, DataChannel) {
    debug_assert!((5..=16).contains(&hop));
    debug_assert!(map.num_used_channels() >= 2);

    let unmapped = (last_unmapped + hop) % NUM_DATA_CHANNELS;
    let unmapped_channel = DataChannel::new(unmapped);

    let selected = if map.is_used(unmapped_channel) {
        unmapped_channel
    } else {
        // Not in the used set, remap according to the map.
        let remapping_index = unmapped % map.num_used_channels();
        map.by_index(remapping_index)
    };

    (unmapped, selected)
}
