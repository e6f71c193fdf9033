use crate::blob::{create_blob, write_blob_range};
use crate::buffer::SourceBuffer;
use crate::cv_writer::CompressedVectorWriter;
use crate::error::Converter;
use crate::header::Header;
use crate::node::NodeId;
use crate::paged_writer::PagedWriter;
use crate::tree::NodeTree;
use crate::xml_write::serialize_xml;
use crate::{Error, ErrorKind, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::Path;

/// Main interface for creating E57 files.
///
/// A new file starts with an empty root structure node. The caller builds
/// the element tree, streams compressed vectors and blobs into the binary
/// area and finally calls [`E57Writer::close`] to serialize the XML section
/// and complete the file header.
pub struct E57Writer<T: Read + Write + Seek> {
    writer: PagedWriter<T>,
    tree: NodeTree,
    cv_writer_open: bool,
}

impl<T: Read + Write + Seek> E57Writer<T> {
    /// Creates a new E57 writer from a writer that must also implement Read and Seek.
    ///
    /// Keep in mind that File::create() will not work as input because
    /// it only opens the file for writing!
    pub fn new(writer: T) -> Result<Self> {
        let mut writer = PagedWriter::new(writer)?;

        // Write placeholder header that will be replaced on close
        let header = Header::default();
        writer.write_all(&header.to_array())?;

        Ok(Self {
            writer,
            tree: NodeTree::new(),
            cv_writer_open: false,
        })
    }

    /// Handle of the root structure node.
    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    /// The element tree of the file.
    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    /// Mutable access to the element tree for building the file contents.
    pub fn tree_mut(&mut self) -> &mut NodeTree {
        &mut self.tree
    }

    /// Registers an extension namespace before its prefix is used in paths.
    pub fn extensions_add(&mut self, prefix: &str, uri: &str) -> Result<()> {
        self.tree.extensions_mut().add(prefix, uri)
    }

    /// Creates a new blob node and reserves its zero-filled binary section.
    /// The returned node is unattached and still has to be placed in the tree.
    pub fn new_blob(&mut self, length: u64) -> Result<NodeId> {
        let offset = create_blob(&mut self.writer, length)?;
        Ok(self.tree.new_blob_node(offset, length))
    }

    /// Writes bytes into the reserved section of a blob node,
    /// starting at the given offset inside the blob.
    pub fn blob_write(&mut self, blob: NodeId, src: &[u8], start: u64) -> Result<()> {
        let offset = self.tree.blob_offset(blob)?;
        let length = self.tree.blob_length(blob)?;
        write_blob_range(&mut self.writer, offset, length, src, start)
    }

    /// Opens a compressed vector writer for an attached compressed vector node.
    /// Only one writer may be open per file at any time.
    pub fn cv_writer<'b>(
        &mut self,
        node: NodeId,
        buffers: &[SourceBuffer<'b>],
    ) -> Result<CompressedVectorWriter<'_, T>> {
        CompressedVectorWriter::new(
            &mut self.writer,
            &mut self.tree,
            &mut self.cv_writer_open,
            node,
            buffers,
        )
    }

    /// Finalizes the file: serializes the XML section, completes the file
    /// header and flushes the last page. Consumes the writer, no further
    /// modifications are possible afterwards.
    pub fn close(mut self) -> Result<()> {
        if self.cv_writer_open {
            Error::internal("A compressed vector writer was left open")?
        }

        let xml = serialize_xml(&self.tree)?;
        let xml_offset = self.writer.position()?;
        self.writer.write_all(xml.as_bytes())?;

        let log_length = self.writer.logical_size()?;
        let header = Header {
            log_length,
            xml_log_offset: xml_offset,
            xml_log_length: xml.len() as u64,
            ..Default::default()
        };
        self.writer.physical_seek(0)?;
        self.writer.write_all(&header.to_array())?;
        self.writer.flush()
    }

    /// Abandons write mode without finalizing the XML section or header.
    /// The underlying file is left in an undefined state and should be deleted.
    pub fn cancel(self) -> Result<()> {
        // Dropping the paged writer flushes buffered pages, but the header
        // placeholder stays incomplete so the file can never parse as E57.
        Ok(())
    }
}

impl E57Writer<File> {
    /// Creates an E57 writer instance from a path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .truncate(true)
            .open(path)
            .kind_err(
                ErrorKind::OpenFailed,
                "Unable to create file for writing, reading and seeking",
            )?;
        Self::new(file)
    }
}
