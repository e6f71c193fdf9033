use crate::bitpack::BitPack;
use crate::bs_write::ByteStreamWriteBuffer;
use crate::buffer::{check_same_shapes, to_storage, validate_buffers, BufferShape, SourceBuffer};
use crate::cv_section::CompressedVectorSectionHeader;
use crate::node::{NodeId, NodeType};
use crate::packet::{DataPacketHeader, IndexEntry, IndexPacketHeader, MAX_PACKET_SIZE};
use crate::paged_writer::PagedWriter;
use crate::prototype::{extract_fields, validate_codecs, Field};
use crate::tree::NodeTree;
use crate::{Error, ErrorKind, Result};
use std::io::{Read, Seek, Write};

const SAFETY_MARGIN: usize = 500;
const MAX_INDEX_ENTRIES: usize = 2048;

/// Streams records from caller buffers into the binary section
/// of a compressed vector node.
///
/// Records are bit-packed per field, collected into data packets and
/// interleaved with index packets. Closing the writer patches the section
/// header and stores record count and section offset in the node.
#[derive(Debug)]
pub struct CompressedVectorWriter<'a, T: Read + Write + Seek> {
    writer: &'a mut PagedWriter<T>,
    tree: &'a mut NodeTree,
    writer_slot: &'a mut bool,
    node: NodeId,
    fields: Vec<Field>,
    bindings: Vec<usize>,
    expected: Vec<BufferShape>,
    byte_streams: Vec<ByteStreamWriteBuffer>,
    section_offset: u64,
    section_header: CompressedVectorSectionHeader,
    record_count: u64,
    records_in_streams: usize,
    max_records_per_packet: usize,
    packet_first_record: u64,
    index_entries: Vec<IndexEntry>,
    open: bool,
}

impl<'a, T: Read + Write + Seek> CompressedVectorWriter<'a, T> {
    pub(crate) fn new(
        writer: &'a mut PagedWriter<T>,
        tree: &'a mut NodeTree,
        writer_slot: &'a mut bool,
        node: NodeId,
        buffers: &[SourceBuffer],
    ) -> Result<Self> {
        if *writer_slot {
            Error::failed(
                ErrorKind::TooManyWriters,
                "Another compressed vector writer is already open",
            )?
        }
        if tree.node_type(node)? != NodeType::CompressedVector {
            Error::failed(ErrorKind::BadNodeDowncast, "Node is not a compressed vector")?
        }
        if !tree.is_attached(node)? {
            Error::failed(
                ErrorKind::NodeUnattached,
                "Compressed vector must be attached before writing",
            )?
        }
        if tree.cv_sealed(node)? {
            Error::failed(
                ErrorKind::BadApiArgument,
                "Compressed vector has already been written",
            )?
        }

        let fields = extract_fields(tree, tree.cv_prototype(node)?)?;
        validate_codecs(tree, tree.cv_codecs(node)?)?;
        let bindings = validate_buffers(&fields, buffers)?;
        let expected: Vec<BufferShape> = buffers.iter().map(BufferShape::of).collect();

        let max_records_per_packet = max_records_per_packet(&fields)?;
        let byte_streams = vec![ByteStreamWriteBuffer::new(); fields.len()];

        // The record schema is immutable from the first write on
        tree.seal_cv(node)?;

        // Write a preliminary section header with still unknown length
        writer.align()?;
        let section_offset = writer.position()?;
        let mut section_header = CompressedVectorSectionHeader::default();
        section_header.write(writer)?;
        section_header.data_offset = writer.position()?;

        *writer_slot = true;
        Ok(Self {
            writer,
            tree,
            writer_slot,
            node,
            fields,
            bindings,
            expected,
            byte_streams,
            section_offset,
            section_header,
            record_count: 0,
            records_in_streams: 0,
            max_records_per_packet,
            packet_first_record: 0,
            index_entries: Vec::new(),
            open: true,
        })
    }

    /// The compressed vector node this writer belongs to.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// True until the writer has been closed.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Number of records written so far.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Packs the first `records` records from the supplied buffers.
    ///
    /// The buffer set must stay compatible with the one given at creation.
    /// Callers stream large vectors by refilling their buffers between calls.
    pub fn write(&mut self, buffers: &[SourceBuffer], records: usize) -> Result<()> {
        if !self.open {
            Error::failed(ErrorKind::WriterNotOpen, "The writer was already closed")?
        }
        check_same_shapes(&self.expected, buffers)?;
        let capacity = buffers.first().map(|b| b.capacity()).unwrap_or(0);
        if records > capacity {
            Error::failed(
                ErrorKind::BadApiArgument,
                format!("Requested {records} records but the buffers hold only {capacity}"),
            )?
        }

        for record in 0..records {
            for (i, field) in self.fields.iter().enumerate() {
                let buffer = &buffers[self.bindings[i]];
                let value = to_storage(&field.kind, buffer, record)?;
                BitPack::pack(&field.kind, value, &mut self.byte_streams[i])?;
            }
            self.record_count += 1;
            self.records_in_streams += 1;
            if self.records_in_streams >= self.max_records_per_packet {
                self.flush_packet(false)?;
            }
        }
        Ok(())
    }

    /// Writes the buffered bytestreams as one data packet.
    /// With `last` set, trailing partial bytes are flushed as well.
    fn flush_packet(&mut self, last: bool) -> Result<()> {
        let field_count = self.fields.len();
        let mut sizes = Vec::with_capacity(field_count);
        let mut sum_sizes = 0;
        let mut streams_empty = true;
        for stream in &self.byte_streams {
            let size = if last {
                stream.all_bytes()
            } else {
                stream.full_bytes()
            };
            if size > 0 {
                streams_empty = false;
            }
            sum_sizes += size;
            sizes.push(size);
        }

        self.records_in_streams = 0;
        if streams_empty {
            self.packet_first_record = self.record_count;
            return Ok(());
        }

        // Packet length must be aligned to four bytes
        let mut packet_length = DataPacketHeader::SIZE + field_count * 2 + sum_sizes;
        if packet_length % 4 != 0 {
            packet_length += 4 - (packet_length % 4);
        }
        if packet_length > MAX_PACKET_SIZE {
            Error::internal("Invalid data packet length detected")?
        }

        let packet_offset = self.writer.position()?;
        self.index_entries.push(IndexEntry {
            record: self.packet_first_record,
            offset: packet_offset,
        });

        DataPacketHeader {
            packet_length: packet_length as u16,
        }
        .write(self.writer)?;

        let mut written = DataPacketHeader::SIZE;
        for (i, stream) in self.byte_streams.iter_mut().enumerate() {
            let data = if last {
                stream.get_all_bytes()
            } else {
                stream.get_full_bytes()
            };
            self.writer.write_all(&(sizes[i] as u16).to_le_bytes())?;
            self.writer.write_all(&data)?;
            written += 2 + data.len();
        }
        let padding = [0_u8; 4];
        self.writer.write_all(&padding[..packet_length - written])?;

        self.packet_first_record = self.record_count;
        if self.index_entries.len() >= MAX_INDEX_ENTRIES {
            self.flush_index_packet()?;
        }
        Ok(())
    }

    fn flush_index_packet(&mut self) -> Result<()> {
        if self.index_entries.is_empty() {
            return Ok(());
        }
        let packet_length = IndexPacketHeader::SIZE + self.index_entries.len() * IndexEntry::SIZE;
        let offset = self.writer.position()?;
        if self.section_header.index_offset == 0 {
            self.section_header.index_offset = offset;
        }
        IndexPacketHeader {
            packet_length: packet_length as u16,
            entry_count: self.index_entries.len() as u16,
        }
        .write(self.writer)?;
        for entry in self.index_entries.drain(..) {
            entry.write(self.writer)?;
        }
        Ok(())
    }

    /// Finishes the binary section: flushes pending packets, writes the
    /// final index packet, patches the section header and updates record
    /// count and file offset of the node.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            Error::failed(ErrorKind::WriterNotOpen, "The writer was already closed")?
        }
        self.flush_packet(true)?;
        self.flush_index_packet()?;

        let end = self.writer.position()?;
        self.section_header.section_length = end - self.section_offset;
        self.writer.seek(self.section_offset)?;
        self.section_header.write(self.writer)?;
        self.writer.seek(end)?;

        self.tree
            .finish_cv(self.node, self.record_count, self.section_offset)?;
        self.open = false;
        *self.writer_slot = false;
        Ok(())
    }
}

/// Each data packet is limited to 64 KiB, including headers, the per-field
/// size prefixes and possible incomplete trailing bytes per stream.
fn max_records_per_packet(fields: &[Field]) -> Result<usize> {
    let bits_per_record: usize = fields.iter().map(|f| f.kind.bit_size() as usize).sum();
    let headers_size = DataPacketHeader::SIZE + fields.len() * 2;
    let max_incomplete_bytes = fields.len();
    let overhead = headers_size + max_incomplete_bytes + SAFETY_MARGIN;
    if bits_per_record == 0 {
        return Ok(usize::MAX);
    }
    if overhead + bits_per_record.div_ceil(8) > MAX_PACKET_SIZE {
        Error::not_implemented("Records bigger than a single packet are not supported")?
    }
    Ok(((MAX_PACKET_SIZE - overhead) * 8) / bits_per_record)
}
