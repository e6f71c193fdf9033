use crate::error::Converter;
use crate::{Error, ErrorKind, Result};
use std::io::{Read, Seek, SeekFrom};

#[cfg(not(feature = "crc32c"))]
use crate::crc32::Crc32;

const CHECKSUM_SIZE: u64 = 4;
const ALIGNMENT_SIZE: u64 = 4;
const MAX_PAGE_SIZE: u64 = 1024 * 1024;

/// Controls which share of the page checksums is verified when reading.
///
/// The page holding the file header and the last page of the file
/// are always verified, regardless of the configured policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChecksumPolicy {
    /// Do not verify checksums. (fast)
    None,
    /// Verify around 25% of all read pages.
    Sparse,
    /// Verify around 50% of all read pages.
    Half,
    /// Verify every read page. This is the default. (slow)
    #[default]
    All,
}

impl ChecksumPolicy {
    /// The percentage of verified pages this policy corresponds to.
    pub fn percentage(&self) -> u8 {
        match self {
            ChecksumPolicy::None => 0,
            ChecksumPolicy::Sparse => 25,
            ChecksumPolicy::Half => 50,
            ChecksumPolicy::All => 100,
        }
    }
}

/// Exposes the checksum-protected pages of an E57 file as one logical byte stream.
///
/// All offsets accepted and returned by this type are logical offsets
/// unless explicitly named physical.
#[derive(Debug)]
pub struct PagedReader<T: Read + Seek> {
    reader: T,
    page_size: u64,
    phy_file_size: u64,
    log_file_size: u64,
    pages: u64,
    offset: u64,
    page_num: Option<u64>,
    page_buffer: Vec<u8>,
    policy: ChecksumPolicy,
    page_loads: u64,

    #[cfg(not(feature = "crc32c"))]
    crc: Crc32,
}

impl<T: Read + Seek> PagedReader<T> {
    /// Creates a paged reader over a raw file with the supplied verification policy.
    pub fn new(mut reader: T, page_size: u64, policy: ChecksumPolicy) -> Result<Self> {
        if page_size > MAX_PAGE_SIZE {
            Error::failed(
                ErrorKind::BadApiArgument,
                format!("Page size {page_size} is bigger than the allowed maximum of {MAX_PAGE_SIZE} bytes"),
            )?
        }
        if page_size <= CHECKSUM_SIZE {
            Error::failed(
                ErrorKind::BadApiArgument,
                format!("Page size {page_size} needs to be bigger than the checksum ({CHECKSUM_SIZE} bytes)"),
            )?
        }

        let phy_file_size = reader
            .seek(SeekFrom::End(0))
            .kind_err(ErrorKind::SeekFailed, "Failed to determine file size")?;
        if phy_file_size == 0 {
            Error::failed(ErrorKind::BadFileLength, "A file size of zero is not allowed")?
        }
        if phy_file_size % page_size != 0 {
            Error::failed(
                ErrorKind::BadFileLength,
                format!("File size {phy_file_size} is not a multiple of the page size {page_size}"),
            )?
        }

        let pages = phy_file_size / page_size;

        Ok(Self {
            reader,
            page_size,
            pages,
            phy_file_size,
            log_file_size: pages * (page_size - CHECKSUM_SIZE),
            page_buffer: vec![0_u8; page_size as usize],
            page_num: None,
            offset: 0,
            policy,
            page_loads: 0,

            #[cfg(not(feature = "crc32c"))]
            crc: Crc32::new(),
        })
    }

    /// Logical size of the file without any checksum bytes.
    pub fn logical_size(&self) -> u64 {
        self.log_file_size
    }

    /// Current read position as logical offset.
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Seek to a logical offset relative to start, end or the current position.
    /// Returns the new logical offset inside the file.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let new_offset = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(p) => self.log_file_size as i64 + p,
            SeekFrom::Current(p) => self.offset as i64 + p,
        };
        if new_offset < 0 || new_offset as u64 > self.log_file_size {
            Error::failed(
                ErrorKind::SeekFailed,
                format!("Detected invalid logical offset {new_offset}"),
            )?
        }
        self.offset = new_offset as u64;
        Ok(self.offset)
    }

    /// Seeking to a physical file address as offset relative to the start of the file.
    /// Will return the new logical offset inside the file.
    pub fn seek_physical(&mut self, offset: u64) -> Result<u64> {
        if offset >= self.phy_file_size {
            Error::failed(
                ErrorKind::SeekFailed,
                format!("Physical offset {offset} is behind the end of the file"),
            )?
        }
        let pages_before = offset / self.page_size;
        self.offset = offset - pages_before * CHECKSUM_SIZE;
        Ok(self.offset)
    }

    /// Skip ahead to the next 4-byte-aligned logical offset, if needed.
    pub fn align(&mut self) -> Result<()> {
        let off_alignment = self.offset % ALIGNMENT_SIZE;
        if off_alignment != 0 {
            let skip = ALIGNMENT_SIZE - off_alignment;
            if self.offset + skip > self.log_file_size {
                Error::failed(ErrorKind::SeekFailed, "Tried to seek behind the end of the file")?
            }
            self.offset += skip;
        }
        Ok(())
    }

    /// Reads as many bytes as available into the buffer and returns their count.
    /// Returns zero when the end of the logical stream was reached.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let payload_size = self.page_size - CHECKSUM_SIZE;
        let page = self.offset / payload_size;
        if page >= self.pages || buf.is_empty() {
            return Ok(0);
        }
        if self.page_num != Some(page) {
            self.load_page(page)?;
        }
        let page_offset = self.offset % payload_size;
        let page_readable = payload_size - page_offset;
        let read_size = usize::min(buf.len(), page_readable as usize);
        buf[..read_size].copy_from_slice(
            &self.page_buffer[page_offset as usize..page_offset as usize + read_size],
        );
        self.offset += read_size as u64;
        Ok(read_size)
    }

    /// Fills the whole buffer or fails.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let read = self.read(&mut buf[filled..])?;
            if read == 0 {
                Error::failed(
                    ErrorKind::ReadFailed,
                    "Unexpected end of file inside logical stream",
                )?
            }
            filled += read;
        }
        Ok(())
    }

    fn load_page(&mut self, page: u64) -> Result<()> {
        if page >= self.pages {
            let max = self.pages - 1;
            Error::failed(
                ErrorKind::ReadFailed,
                format!("Page {page} does not exist, only page numbers 0..{max} are valid"),
            )?
        }
        let phy_offset = page * self.page_size;
        self.reader
            .seek(SeekFrom::Start(phy_offset))
            .kind_err(ErrorKind::SeekFailed, "Failed to seek to page start")?;
        self.reader
            .read_exact(&mut self.page_buffer)
            .read_err(format!("Failed to read page {page}"))?;
        self.page_loads += 1;

        if self.should_verify(page) {
            self.verify_page(page)?;
        }
        self.page_num = Some(page);
        Ok(())
    }

    /// The header page and the last page are always verified,
    /// everything else depends on the configured policy.
    fn should_verify(&self, page: u64) -> bool {
        if page == 0 || page + 1 == self.pages {
            return true;
        }
        match self.policy {
            ChecksumPolicy::None => false,
            ChecksumPolicy::Sparse => self.page_loads % 4 == 1,
            ChecksumPolicy::Half => self.page_loads % 2 == 1,
            ChecksumPolicy::All => true,
        }
    }

    fn verify_page(&mut self, page: u64) -> Result<()> {
        let data_size = (self.page_size - CHECKSUM_SIZE) as usize;
        let expected_checksum = &self.page_buffer[data_size..];

        // Simple & slower default included SW implementation
        #[cfg(not(feature = "crc32c"))]
        let crc = self.crc.calculate(&self.page_buffer[..data_size]);

        // Optional faster external crate with HW support
        #[cfg(feature = "crc32c")]
        let crc = crc32c::crc32c(&self.page_buffer[..data_size]);

        // The standard says all binary values are stored as little endian,
        // but the page checksums are stored in big endian order.
        let calculated_checksum = crc.to_be_bytes();

        if expected_checksum != calculated_checksum {
            self.page_num = None;
            Error::failed(
                ErrorKind::BadChecksum,
                format!("Detected invalid checksum for page {page}"),
            )?
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc32::Crc32;
    use std::io::Cursor;

    const PAGE_SIZE: u64 = 1024;

    /// Builds a valid paged file from payload bytes by appending page checksums.
    fn paged_file(payload: &[u8], page_size: u64) -> Vec<u8> {
        let data_size = (page_size - CHECKSUM_SIZE) as usize;
        let crc = Crc32::new();
        let mut file = Vec::new();
        for chunk in payload.chunks(data_size) {
            let mut page = vec![0_u8; data_size];
            page[..chunk.len()].copy_from_slice(chunk);
            let sum = crc.calculate(&page);
            page.extend_from_slice(&sum.to_be_bytes());
            file.extend_from_slice(&page);
        }
        file
    }

    #[test]
    fn read_full_valid_file() {
        let payload = vec![7_u8; 3000];
        let file = paged_file(&payload, PAGE_SIZE);
        let mut reader =
            PagedReader::new(Cursor::new(file), PAGE_SIZE, ChecksumPolicy::All).unwrap();

        assert_eq!(reader.logical_size(), 3 * (PAGE_SIZE - CHECKSUM_SIZE));
        let mut buf = vec![0_u8; 3000];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf, payload);
    }

    #[test]
    fn size_not_multiple_of_page() {
        let file = vec![0_u8; 1000];
        let result = PagedReader::new(Cursor::new(file), PAGE_SIZE, ChecksumPolicy::All);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::BadFileLength);
    }

    #[test]
    fn page_size_too_small() {
        let file = vec![0_u8; 128];
        let result = PagedReader::new(Cursor::new(file), CHECKSUM_SIZE, ChecksumPolicy::All);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::BadApiArgument);
    }

    #[test]
    fn zero_pages() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let result = PagedReader::new(cursor, PAGE_SIZE, ChecksumPolicy::All);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::BadFileLength);
    }

    #[test]
    fn corrupt_page() {
        let data = vec![1_u8; 128];
        let mut reader =
            PagedReader::new(Cursor::new(data), 128, ChecksumPolicy::All).unwrap();
        let mut buf = [0_u8; 16];
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadChecksum);
    }

    #[test]
    fn policy_none_skips_middle_pages() {
        let payload = vec![3_u8; 4000];
        let mut file = paged_file(&payload, PAGE_SIZE);

        // Corrupt a byte in the second page payload
        file[PAGE_SIZE as usize + 10] ^= 0xFF;

        let mut reader =
            PagedReader::new(Cursor::new(file.clone()), PAGE_SIZE, ChecksumPolicy::None)
                .unwrap();
        let mut buf = vec![0_u8; payload.len()];
        reader.read_exact(&mut buf).unwrap();
        assert_ne!(buf, payload);

        // The same file fails when everything is verified
        let mut reader =
            PagedReader::new(Cursor::new(file), PAGE_SIZE, ChecksumPolicy::All).unwrap();
        let mut buf = vec![0_u8; payload.len()];
        let err = reader.read_exact(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadChecksum);
    }

    #[test]
    fn policy_none_still_verifies_first_and_last_page() {
        let payload = vec![3_u8; 3000];
        let mut file = paged_file(&payload, PAGE_SIZE);
        let last_page_start = 2 * PAGE_SIZE as usize;
        file[last_page_start + 5] ^= 0xFF;

        let mut reader =
            PagedReader::new(Cursor::new(file), PAGE_SIZE, ChecksumPolicy::None).unwrap();
        let mut buf = vec![0_u8; payload.len()];
        let err = reader.read_exact(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadChecksum);
    }

    #[test]
    fn seek() {
        let payload: Vec<u8> = (0..4000_u32).map(|i| (i % 256) as u8).collect();
        let file = paged_file(&payload, PAGE_SIZE);
        let mut reader =
            PagedReader::new(Cursor::new(file), PAGE_SIZE, ChecksumPolicy::All).unwrap();

        assert_eq!(reader.seek(SeekFrom::Start(2000)).unwrap(), 2000);
        let mut buf = [0_u8; 1];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf[0], payload[2000]);

        let logical_end = 4 * (PAGE_SIZE - CHECKSUM_SIZE);
        assert_eq!(reader.seek(SeekFrom::End(0)).unwrap(), logical_end);
        assert_eq!(
            reader.seek(SeekFrom::Current(-10)).unwrap(),
            logical_end - 10
        );
        assert!(reader.seek(SeekFrom::Start(logical_end + 1)).is_err());
    }

    #[test]
    fn physical_seek() {
        let payload: Vec<u8> = (0..4000_u32).map(|i| (i % 256) as u8).collect();
        let file = paged_file(&payload, PAGE_SIZE);
        let mut reader =
            PagedReader::new(Cursor::new(file), PAGE_SIZE, ChecksumPolicy::All).unwrap();

        // Physical offset of the start of the second page payload
        let logical = reader.seek_physical(PAGE_SIZE).unwrap();
        assert_eq!(logical, PAGE_SIZE - CHECKSUM_SIZE);

        let mut buf = [0_u8; 1];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf[0], payload[logical as usize]);
    }

    #[test]
    fn read_at_end_returns_zero() {
        let payload = vec![0_u8; 1000];
        let file = paged_file(&payload, PAGE_SIZE);
        let mut reader =
            PagedReader::new(Cursor::new(file), PAGE_SIZE, ChecksumPolicy::All).unwrap();
        reader.seek(SeekFrom::End(0)).unwrap();
        let mut buf = [0_u8; 16];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn align() {
        let payload = vec![0_u8; 1000];
        let file = paged_file(&payload, PAGE_SIZE);
        let mut reader =
            PagedReader::new(Cursor::new(file), PAGE_SIZE, ChecksumPolicy::All).unwrap();

        reader.align().unwrap();
        assert_eq!(reader.position(), 0);

        reader.seek(SeekFrom::Start(1)).unwrap();
        reader.align().unwrap();
        assert_eq!(reader.position(), ALIGNMENT_SIZE);

        reader.align().unwrap();
        assert_eq!(reader.position(), ALIGNMENT_SIZE);
    }
}
