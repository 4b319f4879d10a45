//! Packet structures used by the Link Layer Control Protocol.
//!
//! Exactly one control procedure exists in this simulator: the channel map update. Its
//! PDU carries the new map and the *instant* (a connection event counter value) at which
//! both sides commit it.

use crate::bytes::*;
use crate::link::channel_map::ChannelMap;
use crate::Error;

enum_with_unknown! {
    /// LL Control PDU opcodes.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum ControlOpcode(u8) {
        ChannelMapInd = 0x01,
    }
}

/// Structured representation of an LL Control PDU.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ControlPdu {
    /// `LL_CHANNEL_MAP_IND` - update the channel map in use.
    ChannelMapInd {
        /// The map to switch to.
        map: ChannelMap,

        /// The connection event counter value at which to switch.
        instant: u16,
    },
}

impl ControlPdu {
    pub fn opcode(&self) -> ControlOpcode {
        match self {
            ControlPdu::ChannelMapInd { .. } => ControlOpcode::ChannelMapInd,
        }
    }

    /// Encoded length in octets, including the opcode.
    pub fn encoded_len(&self) -> usize {
        match self {
            ControlPdu::ChannelMapInd { .. } => 1 + 5 + 2,
        }
    }
}

impl<'a> FromBytes<'a> for ControlPdu {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        match ControlOpcode::from(bytes.read_u8()?) {
            ControlOpcode::ChannelMapInd => {
                let raw: [u8; 5] = bytes.read_array()?;
                let instant = bytes.read_u16_le()?;
                if !bytes.is_empty() {
                    return Err(Error::IncompleteParse);
                }
                Ok(ControlPdu::ChannelMapInd {
                    map: ChannelMap::from_raw(raw),
                    instant,
                })
            }
            ControlOpcode::Unknown(_) => Err(Error::InvalidValue),
        }
    }
}

impl ToBytes for ControlPdu {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u8(self.opcode().into())?;
        match self {
            ControlPdu::ChannelMapInd { map, instant } => {
                writer.write_slice(&map.to_raw())?;
                writer.write_u16_le(*instant)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_map_ind_round_trip() {
        let pdu = ControlPdu::ChannelMapInd {
            map: ChannelMap::from_channels(5..=36).unwrap(),
            instant: 0x1234,
        };

        let mut buf = [0; 8];
        let mut writer = ByteWriter::new(&mut buf);
        pdu.to_bytes(&mut writer).unwrap();
        assert_eq!(writer.space_left(), 0);
        assert_eq!(pdu.encoded_len(), 8);
        assert_eq!(buf[0], 0x01);

        let decoded = ControlPdu::from_bytes(&mut ByteReader::new(&buf)).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let err = ControlPdu::from_bytes(&mut ByteReader::new(&[0x42, 0, 0])).unwrap_err();
        assert_eq!(err, Error::InvalidValue);
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut buf = [0; 9];
        buf[0] = 0x01;
        let err = ControlPdu::from_bytes(&mut ByteReader::new(&buf)).unwrap_err();
        assert_eq!(err, Error::IncompleteParse);
    }
}
