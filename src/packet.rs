use crate::paged_reader::PagedReader;
use crate::paged_writer::PagedWriter;
use crate::{Error, ErrorKind, Result};
use std::io::{Read, Seek, Write};

/// Largest allowed packet, including header and alignment padding.
pub(crate) const MAX_PACKET_SIZE: usize = 64 * 1024 - 4;

const TYPE_INDEX: u8 = 0;
const TYPE_DATA: u8 = 1;
const TYPE_IGNORED: u8 = 2;

/// Common 4-byte packet header: type, flags and the packet length.
/// The length covers the whole packet including padding to 4-byte alignment.
pub(crate) enum PacketHeader {
    Index(IndexPacketHeader),
    Data(DataPacketHeader),
    Ignored(IgnoredPacketHeader),
}

impl PacketHeader {
    pub fn read<T: Read + Seek>(reader: &mut PagedReader<T>) -> Result<Self> {
        let mut buffer = [0_u8; 4];
        reader.read_exact(&mut buffer)?;
        let packet_length = u16::from_le_bytes([buffer[2], buffer[3]]);
        if packet_length < 4 || packet_length % 4 != 0 {
            Error::failed(
                ErrorKind::BadCvPacket,
                format!("Invalid packet length {packet_length}"),
            )?
        }
        match buffer[0] {
            TYPE_INDEX => {
                let mut extra = [0_u8; 4];
                reader.read_exact(&mut extra)?;
                Ok(PacketHeader::Index(IndexPacketHeader {
                    packet_length,
                    entry_count: u16::from_le_bytes([extra[0], extra[1]]),
                }))
            }
            TYPE_DATA => Ok(PacketHeader::Data(DataPacketHeader { packet_length })),
            TYPE_IGNORED => Ok(PacketHeader::Ignored(IgnoredPacketHeader { packet_length })),
            other => Error::failed(
                ErrorKind::BadCvPacket,
                format!("Found unknown packet type {other}"),
            ),
        }
    }
}

/// Data packets carry one length-prefixed bytestream chunk per field.
pub(crate) struct DataPacketHeader {
    pub packet_length: u16,
}

impl DataPacketHeader {
    pub const SIZE: usize = 4;

    pub fn write<T: Read + Write + Seek>(&self, writer: &mut PagedWriter<T>) -> Result<()> {
        let mut buffer = [0_u8; Self::SIZE];
        buffer[0] = TYPE_DATA;
        buffer[2..4].copy_from_slice(&self.packet_length.to_le_bytes());
        writer.write_all(&buffer)
    }
}

/// Index packets map record numbers to the logical file offsets
/// of the data packets containing them.
pub(crate) struct IndexPacketHeader {
    pub packet_length: u16,
    pub entry_count: u16,
}

impl IndexPacketHeader {
    pub const SIZE: usize = 8;

    pub fn write<T: Read + Write + Seek>(&self, writer: &mut PagedWriter<T>) -> Result<()> {
        let mut buffer = [0_u8; Self::SIZE];
        buffer[0] = TYPE_INDEX;
        buffer[2..4].copy_from_slice(&self.packet_length.to_le_bytes());
        buffer[4..6].copy_from_slice(&self.entry_count.to_le_bytes());
        writer.write_all(&buffer)
    }
}

/// One index packet entry: the number of the first record of a data
/// packet and the logical file offset of that packet.
#[derive(Debug)]
pub(crate) struct IndexEntry {
    pub record: u64,
    pub offset: u64,
}

impl IndexEntry {
    pub const SIZE: usize = 16;

    pub fn write<T: Read + Write + Seek>(&self, writer: &mut PagedWriter<T>) -> Result<()> {
        let mut buffer = [0_u8; Self::SIZE];
        buffer[0..8].copy_from_slice(&self.record.to_le_bytes());
        buffer[8..16].copy_from_slice(&self.offset.to_le_bytes());
        writer.write_all(&buffer)
    }
}

/// Ignored packets pad the binary section and are skipped when reading.
pub(crate) struct IgnoredPacketHeader {
    pub packet_length: u16,
}
