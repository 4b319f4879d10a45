//! PCAP trace export.
//!
//! One capture file per node records every frame the node's link layer put on the air or
//! picked up, in `LINKTYPE_BLUETOOTH_LE_LL_WITH_PHDR` framing: a synthetic PHY header
//! (channel, powers, reference access address, flag word, and a coding indicator on the
//! coded PHYs) followed by the access address and the PDU bits. Both the legacy pcap
//! format and pcapng are supported, chosen by file extension.
//!
//! Trace I/O failures never stop a simulation: the stream is disabled for that node and
//! the error logged.

use crate::link::{EventSink, LinkEvent, ReceptionRecord, TransmissionRecord};
use crate::phy::{DataChannel, PhyMode};
use crate::time::Instant;
use bitflags::bitflags;
use byteorder::{LittleEndian, WriteBytesExt};
use log::error;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// `LINKTYPE_BLUETOOTH_LE_LL_WITH_PHDR`
const LINKTYPE: u32 = 256;

bitflags! {
    /// Single-bit fields of the 16-bit PHY header flag word.
    struct PhyFlags: u16 {
        const WHITENED           = 1 << 0;
        const SIGNAL_POWER_VALID = 1 << 1;
        const NOISE_POWER_VALID  = 1 << 2;
        const DECRYPTED          = 1 << 3;
        const REF_AA_VALID       = 1 << 4;
        const AA_OFFENSES_VALID  = 1 << 5;
        const RF_CHANNEL_ALIASED = 1 << 6;
        const CRC_CHECKED        = 1 << 10;
        const CRC_PASSED         = 1 << 11;
        const MIC_CHECKED        = 1 << 12;
        const MIC_PASSED         = 1 << 13;
    }
}

/// 3-bit direction field, bits 7..=9 of the flag word.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Direction {
    CentralToPeripheral = 0b010,
    PeripheralToCentral = 0b110,
}

const DIRECTION_SHIFT: u16 = 7;

/// 2-bit PHY field, bits 14..=15 of the flag word.
fn phy_bits(phy: PhyMode) -> u16 {
    match phy {
        PhyMode::Le1M => 0b00,
        PhyMode::Le2M => 0b10,
        PhyMode::Le500K | PhyMode::Le125K => 0b01,
    }
}

const PHY_SHIFT: u16 = 14;

/// Capture file format, selected by the scenario's file extension.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TraceFormat {
    Pcap,
    PcapNg,
}

impl TraceFormat {
    /// Maps a file extension to a format. Unknown extensions are a configuration error.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "pcap" => Some(TraceFormat::Pcap),
            "pcapng" => Some(TraceFormat::PcapNg),
            _ => None,
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            TraceFormat::Pcap => "pcap",
            TraceFormat::PcapNg => "pcapng",
        }
    }
}

/// Writes one node's link-layer traffic to a capture file.
pub struct PcapWriter {
    out: Option<BufWriter<File>>,
    format: TraceFormat,
    path: PathBuf,
}

impl PcapWriter {
    /// Creates `<dir>/<node_name>_<node_id>_<yyyyMMdd_HHmmss>.<ext>` and writes the file
    /// header.
    pub fn create(
        dir: &Path,
        node_name: &str,
        node_id: u32,
        format: TraceFormat,
    ) -> io::Result<Self> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!(
            "{}_{}_{}.{}",
            node_name,
            node_id,
            stamp,
            format.extension()
        ));
        let mut writer = Self {
            out: Some(BufWriter::new(File::create(&path)?)),
            format,
            path,
        };
        writer.write_file_header()?;
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_file_header(&mut self) -> io::Result<()> {
        let Some(out) = self.out.as_mut() else {
            return Ok(());
        };
        match self.format {
            TraceFormat::Pcap => {
                out.write_u32::<LittleEndian>(0xa1b2_c3d4)?; // magic, µs timestamps
                out.write_u16::<LittleEndian>(2)?; // version major
                out.write_u16::<LittleEndian>(4)?; // version minor
                out.write_u32::<LittleEndian>(0)?; // thiszone
                out.write_u32::<LittleEndian>(0)?; // sigfigs
                out.write_u32::<LittleEndian>(65_535)?; // snaplen
                out.write_u32::<LittleEndian>(LINKTYPE)?;
            }
            TraceFormat::PcapNg => {
                // Section Header Block
                out.write_u32::<LittleEndian>(0x0a0d_0d0a)?;
                out.write_u32::<LittleEndian>(28)?; // block total length
                out.write_u32::<LittleEndian>(0x1a2b_3c4d)?; // byte-order magic
                out.write_u16::<LittleEndian>(1)?; // version major
                out.write_u16::<LittleEndian>(0)?; // version minor
                out.write_u64::<LittleEndian>(u64::MAX)?; // section length, unknown
                out.write_u32::<LittleEndian>(28)?;
                // Interface Description Block
                out.write_u32::<LittleEndian>(1)?;
                out.write_u32::<LittleEndian>(20)?;
                out.write_u16::<LittleEndian>(LINKTYPE as u16)?;
                out.write_u16::<LittleEndian>(0)?; // reserved
                out.write_u32::<LittleEndian>(0)?; // snaplen: unlimited
                out.write_u32::<LittleEndian>(20)?;
            }
        }
        Ok(())
    }

    /// Assembles the synthetic PHY header and packet body.
    #[allow(clippy::too_many_arguments)]
    fn build_record(
        channel: u8,
        signal_dbm: Option<i8>,
        noise_dbm: Option<i8>,
        access_address: u32,
        phy: PhyMode,
        direction: Direction,
        crc_passed: bool,
        pdu: &[u8],
    ) -> Vec<u8> {
        let mut flags = PhyFlags::CRC_CHECKED | PhyFlags::REF_AA_VALID;
        if signal_dbm.is_some() {
            flags |= PhyFlags::SIGNAL_POWER_VALID;
        }
        if noise_dbm.is_some() {
            flags |= PhyFlags::NOISE_POWER_VALID;
        }
        if crc_passed {
            flags |= PhyFlags::CRC_PASSED;
        }
        let flag_word = flags.bits()
            | (direction as u16) << DIRECTION_SHIFT
            | phy_bits(phy) << PHY_SHIFT;

        let ci = phy.coding_indicator();
        let mut record = Vec::with_capacity(10 + 1 + 4 + 1 + pdu.len());
        record.push(DataChannel::new(channel).rf_channel());
        record.push(signal_dbm.unwrap_or(0) as u8);
        record.push(noise_dbm.unwrap_or(0) as u8);
        record.push(0); // access address offenses
        record.extend_from_slice(&access_address.to_le_bytes());
        record.extend_from_slice(&flag_word.to_le_bytes());
        if let Some(ci) = ci {
            record.push(ci);
        }
        record.extend_from_slice(&access_address.to_le_bytes());
        if let Some(ci) = ci {
            record.push(ci);
        }
        record.extend_from_slice(pdu);
        record
    }

    fn write_record(&mut self, at: Instant, data: &[u8]) {
        let Some(out) = self.out.as_mut() else {
            return;
        };
        let result = (|| -> io::Result<()> {
            match self.format {
                TraceFormat::Pcap => {
                    out.write_u32::<LittleEndian>((at.micros() / 1_000_000) as u32)?;
                    out.write_u32::<LittleEndian>((at.micros() % 1_000_000) as u32)?;
                    out.write_u32::<LittleEndian>(data.len() as u32)?;
                    out.write_u32::<LittleEndian>(data.len() as u32)?;
                    out.write_all(data)?;
                }
                TraceFormat::PcapNg => {
                    let padded = (data.len() + 3) & !3;
                    let total = 32 + padded as u32;
                    out.write_u32::<LittleEndian>(6)?; // Enhanced Packet Block
                    out.write_u32::<LittleEndian>(total)?;
                    out.write_u32::<LittleEndian>(0)?; // interface 0
                    out.write_u32::<LittleEndian>((at.micros() >> 32) as u32)?;
                    out.write_u32::<LittleEndian>(at.micros() as u32)?;
                    out.write_u32::<LittleEndian>(data.len() as u32)?;
                    out.write_u32::<LittleEndian>(data.len() as u32)?;
                    out.write_all(data)?;
                    out.write_all(&[0u8; 3][..padded - data.len()])?;
                    out.write_u32::<LittleEndian>(total)?;
                }
            }
            Ok(())
        })();

        if let Err(e) = result {
            error!(
                "trace write to {} failed ({}), disabling stream",
                self.path.display(),
                e
            );
            self.out = None;
        }
    }

    fn record_tx(&mut self, record: &TransmissionRecord) {
        let direction = if record.from_central {
            Direction::CentralToPeripheral
        } else {
            Direction::PeripheralToCentral
        };
        let data = Self::build_record(
            record.channel,
            Some(record.tx_power_dbm),
            None,
            record.access_address,
            record.phy,
            direction,
            true,
            &record.frame,
        );
        self.write_record(record.at, &data);
    }

    fn record_rx(&mut self, record: &ReceptionRecord) {
        let direction = if record.from_central {
            Direction::CentralToPeripheral
        } else {
            Direction::PeripheralToCentral
        };
        let noise = record.rssi_dbm.saturating_sub(record.sinr_db);
        let data = Self::build_record(
            record.channel,
            Some(record.rssi_dbm),
            Some(noise),
            record.access_address,
            record.phy,
            direction,
            record.success,
            &record.frame,
        );
        self.write_record(record.at, &data);
    }
}

impl EventSink for PcapWriter {
    fn on_event(&mut self, event: &LinkEvent) {
        match event {
            LinkEvent::TransmissionStarted(record) => self.record_tx(record),
            LinkEvent::ReceptionEnded(record) => self.record_rx(record),
            _ => {}
        }
    }
}

impl Drop for PcapWriter {
    fn drop(&mut self) {
        if let Some(out) = self.out.as_mut() {
            let _ = out.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx_record() -> TransmissionRecord {
        TransmissionRecord {
            access_address: 0x4876_47f2,
            channel: 12,
            phy: PhyMode::Le1M,
            frame: vec![0x02, 0x03, 0xaa, 0xbb, 0xcc, 1, 2, 3],
            at: Instant::from_micros(1_500_000),
            from_central: true,
            tx_power_dbm: 4,
        }
    }

    #[test]
    fn pcap_file_header_and_record() {
        let dir = std::env::temp_dir();
        let mut writer = PcapWriter::create(&dir, "TestNode", 7, TraceFormat::Pcap).unwrap();
        let path = writer.path().to_path_buf();
        writer.on_event(&LinkEvent::TransmissionStarted(tx_record()));
        drop(writer);

        let bytes = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(&bytes[0..4], &0xa1b2_c3d4u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &LINKTYPE.to_le_bytes());
        // Record header: 1 s, 500_000 µs.
        assert_eq!(&bytes[24..28], &1u32.to_le_bytes());
        assert_eq!(&bytes[28..32], &500_000u32.to_le_bytes());
        // PHY header (10 bytes) + AA (4) + PDU (8).
        let len = 10 + 4 + 8u32;
        assert_eq!(&bytes[32..36], &len.to_le_bytes());
        // RF channel of data channel 12 is 14.
        assert_eq!(bytes[40], 14);
    }

    #[test]
    fn flag_word_layout() {
        let data = PcapWriter::build_record(
            0,
            Some(-40),
            Some(-90),
            0xdead_beef,
            PhyMode::Le2M,
            Direction::PeripheralToCentral,
            true,
            &[],
        );
        let flags = u16::from_le_bytes([data[8], data[9]]);
        assert_ne!(flags & (1 << 1), 0, "signal power present");
        assert_ne!(flags & (1 << 2), 0, "noise power present");
        assert_ne!(flags & (1 << 10), 0, "crc checked");
        assert_ne!(flags & (1 << 11), 0, "crc passed");
        assert_eq!((flags >> 7) & 0b111, 0b110, "direction");
        assert_eq!(flags >> 14, 0b10, "phy bits");
    }

    #[test]
    fn coded_phy_carries_coding_indicator() {
        let data = PcapWriter::build_record(
            5,
            None,
            None,
            0x1111_2222,
            PhyMode::Le500K,
            Direction::CentralToPeripheral,
            false,
            &[0xff],
        );
        // channel(1) powers(2) offenses(1) aa(4) flags(2) ci(1) | aa(4) ci(1) pdu(1)
        assert_eq!(data.len(), 11 + 4 + 1 + 1);
        assert_eq!(data[10], 0b10, "coding indicator in PHY header");
        assert_eq!(data[15], 0b10, "coding indicator before the PDU");
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert_eq!(TraceFormat::from_extension("pcap"), Some(TraceFormat::Pcap));
        assert_eq!(TraceFormat::from_extension("pcapng"), Some(TraceFormat::PcapNg));
        assert_eq!(TraceFormat::from_extension("txt"), None);
    }
}
