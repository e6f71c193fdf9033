use crate::bitpack::BitPack;
use crate::bs_read::ByteStreamReadBuffer;
use crate::buffer::{check_same_shapes, from_storage, validate_buffers, BufferShape, DestBuffer};
use crate::cv_section::CompressedVectorSectionHeader;
use crate::error::Converter;
use crate::node::{NodeId, NodeType};
use crate::packet::{DataPacketHeader, IndexPacketHeader, PacketHeader};
use crate::paged_reader::PagedReader;
use crate::prototype::{extract_fields, validate_codecs, Field};
use crate::tree::NodeTree;
use crate::{Error, ErrorKind, Result};
use std::io::{Read, Seek, SeekFrom};

/// Streams the records of a compressed vector into caller buffers.
///
/// Packets are decoded on demand, values are converted from their in-file
/// storage representation into the memory representation of the buffers.
pub struct CompressedVectorReader<'a, T: Read + Seek> {
    reader: &'a mut PagedReader<T>,
    reader_slots: &'a mut usize,
    node: NodeId,
    fields: Vec<Field>,
    bindings: Vec<usize>,
    expected: Vec<BufferShape>,
    byte_streams: Vec<ByteStreamReadBuffer>,
    record_count: u64,
    records_read: u64,
    section_end: u64,
    open: bool,
}

impl<'a, T: Read + Seek> CompressedVectorReader<'a, T> {
    pub(crate) fn new(
        reader: &'a mut PagedReader<T>,
        tree: &NodeTree,
        reader_slots: &'a mut usize,
        max_readers: usize,
        node: NodeId,
        buffers: &[DestBuffer],
    ) -> Result<Self> {
        if *reader_slots >= max_readers {
            Error::failed(
                ErrorKind::TooManyReaders,
                "Too many compressed vector readers are already open",
            )?
        }
        if tree.node_type(node)? != NodeType::CompressedVector {
            Error::failed(ErrorKind::BadNodeDowncast, "Node is not a compressed vector")?
        }

        let fields = extract_fields(tree, tree.cv_prototype(node)?)?;
        validate_codecs(tree, tree.cv_codecs(node)?)?;
        let bindings = validate_buffers(&fields, buffers)?;
        let expected: Vec<BufferShape> = buffers.iter().map(BufferShape::of).collect();

        let section_offset = tree.cv_file_offset(node)?;
        reader.seek(SeekFrom::Start(section_offset))?;
        let section_header = CompressedVectorSectionHeader::read(reader)?;
        reader.seek(SeekFrom::Start(section_header.data_offset))?;

        let byte_streams = vec![ByteStreamReadBuffer::new(); fields.len()];
        *reader_slots += 1;
        Ok(Self {
            reader,
            reader_slots,
            node,
            fields,
            bindings,
            expected,
            byte_streams,
            record_count: tree.cv_record_count(node)?,
            records_read: 0,
            section_end: section_offset + section_header.section_length,
            open: true,
        })
    }

    /// The compressed vector node this reader belongs to.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// True until the reader has been closed.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Fills the buffers with the next records and returns how many were
    /// transferred. Returns zero once all records have been read.
    pub fn read(&mut self, buffers: &mut [DestBuffer]) -> Result<usize> {
        if !self.open {
            Error::failed(ErrorKind::ReaderNotOpen, "The reader was already closed")?
        }
        check_same_shapes(&self.expected, buffers)?;
        let capacity = buffers.first().map(|b| b.capacity()).unwrap_or(0);

        let mut filled = 0;
        while filled < capacity && self.records_read < self.record_count {
            while !self.record_available() {
                self.advance()?;
            }
            for (i, field) in self.fields.iter().enumerate() {
                let value = BitPack::unpack(&field.kind, &mut self.byte_streams[i])
                    .internal_err("Record was available but extraction failed")?;
                let buffer = &mut buffers[self.bindings[i]];
                from_storage(&field.kind, value, buffer, filled)?;
            }
            filled += 1;
            self.records_read += 1;
        }
        Ok(filled)
    }

    /// True if every field stream has enough bits buffered for one record.
    fn record_available(&self) -> bool {
        self.fields.iter().enumerate().all(|(i, field)| {
            let bits = field.kind.bit_size();
            bits == 0 || self.byte_streams[i].available() >= bits as u64
        })
    }

    /// Reads the next packet of the binary section. Data packet payloads
    /// are appended to the field streams, other packet types are skipped.
    fn advance(&mut self) -> Result<()> {
        if self.reader.position() >= self.section_end {
            Error::failed(
                ErrorKind::BadCvPacket,
                "Binary section ended before all records were read",
            )?
        }
        match PacketHeader::read(self.reader)? {
            PacketHeader::Data(header) => {
                let mut consumed = DataPacketHeader::SIZE;
                let mut size_buffer = [0_u8; 2];
                for stream in &mut self.byte_streams {
                    self.reader.read_exact(&mut size_buffer)?;
                    let size = u16::from_le_bytes(size_buffer) as usize;
                    let mut data = vec![0_u8; size];
                    self.reader.read_exact(&mut data)?;
                    stream.append(&data);
                    consumed += 2 + size;
                }
                if consumed > header.packet_length as usize {
                    Error::failed(
                        ErrorKind::BadCvPacket,
                        "Data packet is smaller than its bytestreams",
                    )?
                }
                let padding = header.packet_length as usize - consumed;
                self.reader.seek(SeekFrom::Current(padding as i64))?;
            }
            PacketHeader::Index(header) => {
                let skip = header.packet_length as i64 - IndexPacketHeader::SIZE as i64;
                self.reader.seek(SeekFrom::Current(skip))?;
            }
            PacketHeader::Ignored(header) => {
                let skip = header.packet_length as i64 - 4;
                self.reader.seek(SeekFrom::Current(skip))?;
            }
        }
        Ok(())
    }

    /// Jumping to a specific record is part of the interface
    /// but intentionally not supported.
    pub fn seek(&mut self, _record: u64) -> Result<()> {
        Error::not_implemented("Seeking inside compressed vectors is not supported")
    }

    /// Releases the reader slot of the file.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            Error::failed(ErrorKind::ReaderNotOpen, "The reader was already closed")?
        }
        self.open = false;
        *self.reader_slots -= 1;
        Ok(())
    }
}
