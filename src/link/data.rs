//! Data channel structures and the PDU codec.
//!
//! A data channel PDU consists of a 16-bit header and a variably-sized payload:
//!
//! ```notrust
//! LSB                                                                MSB
//! +----------+---------+---------+---------+------------+--------------+
//! |   LLID   |  NESN   |   SN    |   MD    |     -      |    Length    |
//! | (2 bits) | (1 bit) | (1 bit) | (1 bit) |  (3 bits)  |   (8 bits)   |
//! +----------+---------+---------+---------+------------+--------------+
//! ```
//!
//! Payload format depends on the value of the 2-bit `LLID` field:
//!
//! * `0b00`: Reserved value.
//! * `0b01`: Continuation fragment of an upper-layer message, or empty PDU.
//! * `0b10`: Start of an upper-layer message (or complete message).
//! * `0b11`: LL Control PDU.
//!
//! The `NESN` and `SN` fields are used for retransmission and acknowledgement. The link
//! layer stores two 1-bit parameters per connection, `transmitSeqNum` and
//! `nextExpectedSeqNum`, both starting at 0.
//!
//! When a packet is received with an `SN` equal to the receiver's `nextExpectedSeqNum`,
//! the packet is new (not a retransmission) and `nextExpectedSeqNum` is incremented.
//! When the received `NESN` differs from the receiver's `transmitSeqNum`, the last PDU
//! has been acknowledged and `transmitSeqNum` is incremented; otherwise the last PDU must
//! be resent.
//!
//! The `MD` field announces that the sender has more data for this connection event; the
//! event closes once both sides send `MD = 0`.
//!
//! On the simulated air interface a *frame* is `header ‖ payload ‖ CRC-24`, with the CRC
//! computed from the connection's CRC initialization value. [`decode`] verifies the
//! checksum and reports failure through [`DecodedFrame::crc_ok`] rather than an error,
//! since a corrupted frame is a protocol event, not a caller mistake.

use crate::bytes::*;
use crate::link::seq_num::SeqNum;
use crate::{crc, Error};
use byteorder::{ByteOrder, LittleEndian};
use core::fmt;

/// Maximum payload length in octets of a data channel PDU (packet length extension).
pub const MAX_PAYLOAD: usize = 251;

/// Number of octets appended to the PDU as CRC.
pub const CRC_LEN: usize = 3;

/// Length in octets of the data channel PDU header.
pub const HEADER_LEN: usize = 2;

/// 16-bit data channel header preceding the payload.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Header(u16);

impl Header {
    /// Creates a header with the given LLID field and all other fields set to 0
    /// (including the payload length).
    pub fn new(llid: Llid) -> Self {
        Header(llid as u16)
    }

    /// Parses a header from raw bytes.
    ///
    /// Panics when `raw` contains less than 2 Bytes.
    pub fn parse(raw: &[u8]) -> Self {
        Header(LittleEndian::read_u16(raw))
    }

    /// Returns the raw representation of the header.
    ///
    /// The returned `u16` is transmitted LSB and LSb first as the first 2 octets of the
    /// PDU.
    pub fn to_u16(&self) -> u16 {
        self.0
    }

    /// Returns the length of the payload in octets as specified in the `Length` field.
    pub fn payload_length(&self) -> u8 {
        ((self.0 & 0b11111111_00000000) >> 8) as u8
    }

    /// Sets the payload length field to `len`.
    pub fn set_payload_length(&mut self, len: u8) {
        self.0 = (u16::from(len) << 8) | (self.0 & 0x00ff);
    }

    /// Returns the `LLID` field (PDU type).
    pub fn llid(&self) -> Llid {
        match self.0 & 0b11 {
            0b00 => Llid::Reserved,
            0b01 => Llid::DataCont,
            0b10 => Llid::DataStart,
            0b11 => Llid::Control,
            _ => unreachable!(),
        }
    }

    /// Returns the value of the `NESN` field (Next Expected Sequence Number).
    pub fn nesn(&self) -> SeqNum {
        if self.0 & 0b0100 == 0 {
            SeqNum::ZERO
        } else {
            SeqNum::ONE
        }
    }

    /// Sets the value of the `NESN` field.
    pub fn set_nesn(&mut self, nesn: SeqNum) {
        if nesn == SeqNum::ONE {
            self.0 |= 0b0100;
        } else {
            self.0 &= !0b0100;
        }
    }

    /// Returns the value of the `SN` field (Sequence Number).
    pub fn sn(&self) -> SeqNum {
        if self.0 & 0b1000 == 0 {
            SeqNum::ZERO
        } else {
            SeqNum::ONE
        }
    }

    /// Sets the value of the `SN` field.
    pub fn set_sn(&mut self, sn: SeqNum) {
        if sn == SeqNum::ONE {
            self.0 |= 0b1000;
        } else {
            self.0 &= !0b1000;
        }
    }

    /// Returns whether the `MD` field is set (More Data).
    pub fn md(&self) -> bool {
        self.0 & 0b10000 != 0
    }

    /// Sets the value of the `MD` field.
    pub fn set_md(&mut self, md: bool) {
        if md {
            self.0 |= 0b10000;
        } else {
            self.0 &= !0b10000;
        }
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("LLID", &self.llid())
            .field("NESN", &self.nesn())
            .field("SN", &self.sn())
            .field("MD", &self.md())
            .field("Length", &self.payload_length())
            .finish()
    }
}

impl<'a> FromBytes<'a> for Header {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        Ok(Header(bytes.read_u16_le()?))
    }
}

impl ToBytes for Header {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u16_le(self.to_u16())
    }
}

/// Values of the LLID field in `Header`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Llid {
    /// Reserved for future use.
    Reserved = 0b00,

    /// Continuation of an upper-layer message, or empty PDU.
    DataCont = 0b01,

    /// Start of an upper-layer message.
    DataStart = 0b10,

    /// LL control PDU.
    Control = 0b11,
}

/// Encodes a complete frame: header, payload, and CRC-24.
///
/// # Panics
///
/// Panics when `payload` exceeds [`MAX_PAYLOAD`] or does not match the header's length
/// field; both indicate a bug in the caller, not a runtime condition.
pub fn encode(header: Header, payload: &[u8], crc_init: u32) -> Vec<u8> {
    assert!(payload.len() <= MAX_PAYLOAD);
    assert_eq!(usize::from(header.payload_length()), payload.len());

    let mut frame = vec![0; HEADER_LEN + payload.len() + CRC_LEN];
    {
        let mut writer = ByteWriter::new(&mut frame);
        header.to_bytes(&mut writer).unwrap();
        writer.write_slice(payload).unwrap();
    }
    let pdu_len = HEADER_LEN + payload.len();
    let checksum = crc::checksum(crc_init, &frame[..pdu_len]);
    frame[pdu_len] = (checksum & 0xff) as u8;
    frame[pdu_len + 1] = ((checksum >> 8) & 0xff) as u8;
    frame[pdu_len + 2] = ((checksum >> 16) & 0xff) as u8;
    frame
}

/// A decoded frame. `crc_ok` is the CRC-failed marker: when `false` the header and
/// payload bytes must not be trusted.
#[derive(Debug)]
pub struct DecodedFrame<'a> {
    pub header: Header,
    pub payload: &'a [u8],
    pub crc_ok: bool,
}

/// Decodes a frame produced by [`encode`], verifying length consistency and CRC.
pub fn decode(frame: &[u8], crc_init: u32) -> Result<DecodedFrame<'_>, Error> {
    if frame.len() < HEADER_LEN + CRC_LEN {
        return Err(Error::InvalidLength);
    }
    let header = Header::parse(frame);
    let pdu_len = frame.len() - CRC_LEN;
    if usize::from(header.payload_length()) != pdu_len - HEADER_LEN {
        return Err(Error::InvalidLength);
    }

    let stored = u32::from(frame[pdu_len])
        | u32::from(frame[pdu_len + 1]) << 8
        | u32::from(frame[pdu_len + 2]) << 16;
    let crc_ok = crc::checksum(crc_init, &frame[..pdu_len]) == stored;

    Ok(DecodedFrame {
        header,
        payload: &frame[HEADER_LEN..pdu_len],
        crc_ok,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_bit_layout() {
        let mut header = Header::new(Llid::Control);
        assert_eq!(header.llid(), Llid::Control);
        assert_eq!(header.sn(), SeqNum::ZERO);

        header.set_sn(SeqNum::ONE);
        header.set_nesn(SeqNum::ONE);
        header.set_md(true);
        header.set_payload_length(7);
        assert_eq!(header.sn(), SeqNum::ONE);
        assert_eq!(header.nesn(), SeqNum::ONE);
        assert!(header.md());
        assert_eq!(header.payload_length(), 7);
        assert_eq!(header.llid(), Llid::Control);

        header.set_sn(SeqNum::ZERO);
        assert_eq!(header.sn(), SeqNum::ZERO);
        assert_eq!(header.nesn(), SeqNum::ONE);

        let reparsed = Header::parse(&header.to_u16().to_le_bytes());
        assert_eq!(reparsed.to_u16(), header.to_u16());
    }

    #[test]
    fn encode_decode_round_trip() {
        let payload = b"adaptive frequency hopping";
        let mut header = Header::new(Llid::DataStart);
        header.set_payload_length(payload.len() as u8);
        header.set_sn(SeqNum::ONE);

        let frame = encode(header, payload, 0x2a_bcde);
        let decoded = decode(&frame, 0x2a_bcde).unwrap();
        assert!(decoded.crc_ok);
        assert_eq!(decoded.payload, payload);
        assert_eq!(decoded.header.llid(), Llid::DataStart);
        assert_eq!(decoded.header.sn(), SeqNum::ONE);
    }

    #[test]
    fn corruption_is_flagged_not_errored() {
        let mut header = Header::new(Llid::DataCont);
        header.set_payload_length(3);
        let mut frame = encode(header, &[1, 2, 3], 0x555555);
        *frame.last_mut().unwrap() ^= 0x01;
        let decoded = decode(&frame, 0x555555).unwrap();
        assert!(!decoded.crc_ok);
    }

    #[test]
    fn wrong_crc_init_fails_check() {
        let mut header = Header::new(Llid::DataCont);
        header.set_payload_length(0);
        let frame = encode(header, &[], 0x111111);
        assert!(!decode(&frame, 0x222222).unwrap().crc_ok);
    }

    #[test]
    fn truncated_frame_is_an_error() {
        assert_eq!(decode(&[0x01, 0x00], 0).unwrap_err(), Error::InvalidLength);
    }

    #[test]
    fn length_field_must_match_frame() {
        let mut header = Header::new(Llid::DataCont);
        header.set_payload_length(9);
        let mut frame = encode(header, &[0; 9], 0);
        // Header now claims more payload than the frame carries.
        frame[1] = 200;
        assert_eq!(decode(&frame, 0).unwrap_err(), Error::InvalidLength);
    }
}
