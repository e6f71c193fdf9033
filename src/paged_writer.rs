use crate::error::Converter;
use crate::{Error, ErrorKind, Result};
use std::io::{Read, Seek, SeekFrom, Write};

#[cfg(not(feature = "crc32c"))]
use crate::crc32::Crc32;

const PAGE_SIZE: u64 = 1024;
const CRC_SIZE: u64 = 4;
const PAGE_PAYLOAD_SIZE: usize = (PAGE_SIZE - CRC_SIZE) as usize;

/// Writes a logical byte stream into checksum-protected pages of an E57 file.
///
/// The current page is kept buffered in memory and its checksum is computed
/// right before the page is flushed to the underlying writer.
#[derive(Debug)]
pub struct PagedWriter<T: Read + Write + Seek> {
    writer: T,
    offset: usize,
    page_buffer: [u8; PAGE_SIZE as usize],

    #[cfg(not(feature = "crc32c"))]
    crc: Crc32,
}

impl<T: Read + Write + Seek> PagedWriter<T> {
    /// Creates a paged writer over an empty writer that must also support reading and seeking.
    pub fn new(mut writer: T) -> Result<Self> {
        let end = writer
            .seek(SeekFrom::End(0))
            .kind_err(ErrorKind::SeekFailed, "Unable to seek length of writer")?;
        if end != 0 {
            Error::failed(ErrorKind::BadApiArgument, "Supplied writer is not empty")?
        }
        Ok(Self {
            writer,
            offset: 0,
            page_buffer: [0_u8; PAGE_SIZE as usize],

            #[cfg(not(feature = "crc32c"))]
            crc: Crc32::new(),
        })
    }

    /// Writes all supplied bytes into the logical stream.
    pub fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let written = self
                .write_some(buf)
                .write_err("Failed to write data into page")?;
            buf = &buf[written..];
        }
        Ok(())
    }

    fn write_some(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let remaining_page_bytes = PAGE_PAYLOAD_SIZE - self.offset;
        let writeable_bytes = buf.len().min(remaining_page_bytes);
        self.page_buffer[self.offset..self.offset + writeable_bytes]
            .copy_from_slice(&buf[..writeable_bytes]);
        self.offset += writeable_bytes;
        if self.offset == PAGE_PAYLOAD_SIZE {
            self.seal_page();
            self.writer.write_all(&self.page_buffer)?;

            let page_phys_offset = self.writer.stream_position()?;
            self.offset = 0;
            self.populate_existing_data()?;
            self.writer.seek(SeekFrom::Start(page_phys_offset))?;
        }
        Ok(writeable_bytes)
    }

    /// Computes the checksum over the fully populated payload of the current page.
    fn seal_page(&mut self) {
        // Simple & slower default included SW implementation
        #[cfg(not(feature = "crc32c"))]
        let crc = self.crc.calculate(&self.page_buffer[..PAGE_PAYLOAD_SIZE]);

        // Optional faster external crate with HW support
        #[cfg(feature = "crc32c")]
        let crc = crc32c::crc32c(&self.page_buffer[..PAGE_PAYLOAD_SIZE]);

        // Checksums are the only big endian values in E57 files.
        self.page_buffer[PAGE_PAYLOAD_SIZE..].copy_from_slice(&crc.to_be_bytes());
    }

    /// Persists the current partial page, if there is one, and flushes the writer.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_impl()
            .write_err("Failed to flush current page to writer")
    }

    fn flush_impl(&mut self) -> std::io::Result<()> {
        // If the page buffer is empty we do not need to persist it
        if self.offset > 0 {
            let pos = self.writer.stream_position()?;
            self.seal_page();
            self.writer.write_all(&self.page_buffer)?;
            self.writer.seek(SeekFrom::Start(pos))?;
        }
        self.writer.flush()
    }

    fn populate_existing_data(&mut self) -> std::io::Result<()> {
        // If available, read existing page data
        let mut unread = &mut self.page_buffer[..];
        while !unread.is_empty() {
            let read = self.writer.read(unread)?;
            if read == 0 {
                break;
            }
            unread = &mut unread[read..];
        }
        unread.fill(0);
        Ok(())
    }

    /// Get the current physical offset in the file.
    pub fn physical_position(&mut self) -> Result<u64> {
        let pos = self
            .writer
            .stream_position()
            .kind_err(ErrorKind::SeekFailed, "Failed to get position from writer")?;
        Ok(pos + self.offset as u64)
    }

    /// Get the current logical offset in the file.
    pub fn position(&mut self) -> Result<u64> {
        let page_start = self
            .writer
            .stream_position()
            .kind_err(ErrorKind::SeekFailed, "Failed to get position from writer")?;
        Ok((page_start / PAGE_SIZE) * PAGE_PAYLOAD_SIZE as u64 + self.offset as u64)
    }

    /// Seek to a specific physical offset inside the already written part of the file.
    pub fn physical_seek(&mut self, pos: u64) -> Result<()> {
        // Make sure we wrote the current (partial) page before seeking
        self.flush()?;

        let end = self
            .writer
            .seek(SeekFrom::End(0))
            .kind_err(ErrorKind::SeekFailed, "Failed to seek to file end")?;
        let page = pos / PAGE_SIZE;
        self.offset = (pos % PAGE_SIZE) as usize;

        if pos > end {
            Error::failed(ErrorKind::SeekFailed, "Cannot seek after end of file")?
        }
        if self.offset >= PAGE_PAYLOAD_SIZE {
            Error::failed(ErrorKind::SeekFailed, "Cannot seek into checksum")?
        }

        let page_phys_offset = page * PAGE_SIZE;
        self.writer
            .seek(SeekFrom::Start(page_phys_offset))
            .kind_err(ErrorKind::SeekFailed, "Failed to seek to specified position")?;

        self.populate_existing_data()
            .read_err("Failed to read existing page data")?;

        self.writer
            .seek(SeekFrom::Start(page_phys_offset))
            .kind_err(
                ErrorKind::SeekFailed,
                "Failed to seek back to page start after reading existing data",
            )?;

        Ok(())
    }

    /// Seek to a specific logical offset inside the already written part of the file.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        let physical = pos + CRC_SIZE * (pos / PAGE_PAYLOAD_SIZE as u64);
        self.physical_seek(physical)
    }

    /// Get the current physical size of the file.
    pub fn physical_size(&mut self) -> Result<u64> {
        self.flush()?;
        let pos = self
            .writer
            .stream_position()
            .kind_err(ErrorKind::SeekFailed, "Cannot get current position")?;
        let size = self
            .writer
            .seek(SeekFrom::End(0))
            .kind_err(ErrorKind::SeekFailed, "Cannot seek to file end")?;
        self.writer
            .seek(SeekFrom::Start(pos))
            .kind_err(ErrorKind::SeekFailed, "Cannot seek to previous position")?;
        Ok(size)
    }

    /// Get the current logical size of the file.
    pub fn logical_size(&mut self) -> Result<u64> {
        let physical = self.physical_size()?;
        Ok((physical / PAGE_SIZE) * PAGE_PAYLOAD_SIZE as u64)
    }

    /// Write some zeros to the next 4-byte-aligned offset, if needed.
    pub fn align(&mut self) -> Result<()> {
        let zeros = [0u8; 4];
        let mod_offset = self.offset % 4;
        if mod_offset != 0 {
            self.write_all(&zeros[mod_offset..])?;
        }
        Ok(())
    }
}

impl<T: Read + Write + Seek> Drop for PagedWriter<T> {
    fn drop(&mut self) {
        if self.flush().is_err() {
            // Cannot handle the error here :/
        }
    }
}
