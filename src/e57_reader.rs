use crate::blob::read_blob_range;
use crate::buffer::DestBuffer;
use crate::cv_reader::CompressedVectorReader;
use crate::error::Converter;
use crate::extension::ExtensionRegistry;
use crate::header::Header;
use crate::node::NodeId;
use crate::paged_reader::{ChecksumPolicy, PagedReader};
use crate::tree::NodeTree;
use crate::xml_read::parse_xml;
use crate::{Error, ErrorKind, Result};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

const PAGE_SIZE: u64 = 1024;
const MAX_XML_SIZE: usize = 1024 * 1024 * 10;
const MAX_CV_READERS: usize = 16;

/// Main interface for reading E57 files.
///
/// Opening a file validates the header, checks the page holding it and
/// parses the XML section into the element tree. Compressed vector records
/// and blob payloads are streamed on demand through reader objects.
#[derive(Debug)]
pub struct E57Reader<T: Read + Seek> {
    reader: PagedReader<T>,
    header: Header,
    xml: String,
    tree: NodeTree,
    open_readers: usize,
}

impl<T: Read + Seek> E57Reader<T> {
    /// Creates a new E57 reader that verifies every page checksum.
    pub fn new(reader: T) -> Result<Self> {
        Self::with_policy(reader, ChecksumPolicy::All)
    }

    /// Creates a new E57 reader with the supplied checksum verification policy.
    /// The header page and the last page are verified under every policy.
    pub fn with_policy(reader: T, policy: ChecksumPolicy) -> Result<Self> {
        let mut reader = PagedReader::new(reader, PAGE_SIZE, policy)?;

        let mut header_bytes = [0_u8; Header::SIZE];
        reader.read_exact(&mut header_bytes)?;
        let header = Header::from_array(&header_bytes)?;
        if header.log_length != reader.logical_size() {
            Error::failed(
                ErrorKind::BadFileLength,
                "File length in header does not match the actual file",
            )?
        }

        let xml = Self::extract_xml(
            &mut reader,
            header.xml_log_offset,
            header.xml_log_length as usize,
        )?;
        let xml = String::from_utf8(xml).kind_err(
            ErrorKind::BadXmlFormat,
            "XML section is not valid UTF-8",
        )?;

        let mut tree = NodeTree::new();
        parse_xml(&mut tree, &xml)?;

        Ok(Self {
            reader,
            header,
            xml,
            tree,
            open_readers: 0,
        })
    }

    /// Returns the contents of the E57 binary file header structure.
    pub fn header(&self) -> Header {
        self.header.clone()
    }

    /// Returns the XML section of the E57 file.
    pub fn xml(&self) -> &str {
        &self.xml
    }

    /// Handle of the root structure node.
    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    /// The element tree parsed from the XML section.
    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    /// The extensions declared by the file.
    pub fn extensions(&self) -> &ExtensionRegistry {
        self.tree.extensions()
    }

    /// Reads bytes from the payload of a blob node,
    /// starting at the given offset inside the blob.
    pub fn blob_read(&mut self, blob: NodeId, dst: &mut [u8], start: u64) -> Result<()> {
        let offset = self.tree.blob_offset(blob)?;
        let length = self.tree.blob_length(blob)?;
        read_blob_range(&mut self.reader, offset, length, dst, start)
    }

    /// Opens a compressed vector reader for a compressed vector node.
    pub fn cv_reader<'b>(
        &mut self,
        node: NodeId,
        buffers: &[DestBuffer<'b>],
    ) -> Result<CompressedVectorReader<'_, T>> {
        CompressedVectorReader::new(
            &mut self.reader,
            &self.tree,
            &mut self.open_readers,
            MAX_CV_READERS,
            node,
            buffers,
        )
    }

    /// Number of compressed vector readers currently open.
    pub fn reader_count(&self) -> usize {
        self.open_readers
    }

    /// Releases the file. Fails if compressed vector readers were left open.
    pub fn close(self) -> Result<()> {
        if self.open_readers > 0 {
            Error::internal("Compressed vector readers were left open")?
        }
        Ok(())
    }

    /// Iterates over a reader to check an E57 file for checksum errors.
    ///
    /// This standalone function does only the minimal parsing required
    /// and CRC-validates the whole file without looking at its contents.
    /// Returns the number of validated pages.
    pub fn validate_crc(reader: T) -> Result<u64> {
        let mut paged = PagedReader::new(reader, PAGE_SIZE, ChecksumPolicy::All)?;
        let pages = paged.logical_size() / (PAGE_SIZE - 4);
        let mut buffer = vec![0_u8; (PAGE_SIZE - 4) as usize];
        while paged.read(&mut buffer)? != 0 {}
        Ok(pages)
    }

    /// Returns the raw unparsed XML data of an E57 file as bytes.
    ///
    /// This standalone function does only the minimal header parsing
    /// required to find the XML section, with basic CRC checking for
    /// the touched pages.
    pub fn raw_xml(reader: T) -> Result<Vec<u8>> {
        let mut paged = PagedReader::new(reader, PAGE_SIZE, ChecksumPolicy::None)?;
        let mut header_bytes = [0_u8; Header::SIZE];
        paged.read_exact(&mut header_bytes)?;
        let header = Header::from_array(&header_bytes)?;
        Self::extract_xml(
            &mut paged,
            header.xml_log_offset,
            header.xml_log_length as usize,
        )
    }

    fn extract_xml(
        reader: &mut PagedReader<T>,
        offset: u64,
        length: usize,
    ) -> Result<Vec<u8>> {
        if length > MAX_XML_SIZE {
            Error::not_implemented(format!(
                "XML sections larger than {MAX_XML_SIZE} bytes are not supported"
            ))?
        }
        reader.seek(SeekFrom::Start(offset))?;
        let mut xml = vec![0_u8; length];
        reader.read_exact(&mut xml)?;
        Ok(xml)
    }
}

impl E57Reader<BufReader<File>> {
    /// Creates an E57 reader instance from a path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_file_with_policy(path, ChecksumPolicy::All)
    }

    /// Creates an E57 reader instance from a path with a checksum policy.
    pub fn from_file_with_policy(
        path: impl AsRef<Path>,
        policy: ChecksumPolicy,
    ) -> Result<Self> {
        let file = File::open(path).kind_err(ErrorKind::OpenFailed, "Unable to open file")?;
        Self::with_policy(BufReader::new(file), policy)
    }
}
