use crate::error::{Converter, WRONG_OFFSET};
use crate::paged_reader::PagedReader;
use crate::paged_writer::PagedWriter;
use crate::{Error, ErrorKind, Result};
use std::io::{Read, Seek, SeekFrom, Write};

/// Binary section header written before the payload of each blob.
#[derive(Debug)]
pub(crate) struct BlobSectionHeader {
    pub section_length: u64,
}

impl BlobSectionHeader {
    pub const SIZE: u64 = 16;

    fn read<T: Read + Seek>(reader: &mut PagedReader<T>) -> Result<Self> {
        let mut buffer = [0_u8; Self::SIZE as usize];
        reader.read_exact(&mut buffer)?;
        if buffer[0] != 0 {
            Error::failed(
                ErrorKind::BadCvHeader,
                "Section ID of the blob section header is not 0",
            )?
        }
        Ok(Self {
            section_length: u64::from_le_bytes(
                buffer[8..16].try_into().internal_err(WRONG_OFFSET)?,
            ),
        })
    }

    fn write<T: Read + Write + Seek>(&self, writer: &mut PagedWriter<T>) -> Result<()> {
        let mut buffer = [0_u8; Self::SIZE as usize];
        buffer[8..16].copy_from_slice(&self.section_length.to_le_bytes());
        writer.write_all(&buffer)
    }
}

/// Reserves a blob section of the requested payload length and returns
/// its logical file offset. The payload is zeroed and filled later.
pub(crate) fn create_blob<T: Read + Write + Seek>(
    writer: &mut PagedWriter<T>,
    length: u64,
) -> Result<u64> {
    writer.align()?;
    let offset = writer.position()?;

    let padding = (4 - (length % 4)) % 4;
    let header = BlobSectionHeader {
        section_length: BlobSectionHeader::SIZE + length + padding,
    };
    header.write(writer)?;

    const CHUNK: usize = 4096;
    let zeros = [0_u8; CHUNK];
    let mut remaining = length + padding;
    while remaining > 0 {
        let batch = remaining.min(CHUNK as u64) as usize;
        writer.write_all(&zeros[..batch])?;
        remaining -= batch as u64;
    }
    Ok(offset)
}

/// Writes a byte range into the payload of an already reserved blob section.
pub(crate) fn write_blob_range<T: Read + Write + Seek>(
    writer: &mut PagedWriter<T>,
    blob_offset: u64,
    blob_length: u64,
    src: &[u8],
    start: u64,
) -> Result<()> {
    if start + src.len() as u64 > blob_length {
        Error::failed(
            ErrorKind::BadApiArgument,
            "Byte range is outside of the declared blob length",
        )?
    }
    let resume = writer.physical_position()?;
    writer.seek(blob_offset + BlobSectionHeader::SIZE + start)?;
    writer.write_all(src)?;
    writer.physical_seek(resume)?;
    Ok(())
}

/// Reads a byte range from the payload of a blob section.
pub(crate) fn read_blob_range<T: Read + Seek>(
    reader: &mut PagedReader<T>,
    blob_offset: u64,
    blob_length: u64,
    dst: &mut [u8],
    start: u64,
) -> Result<()> {
    if start + dst.len() as u64 > blob_length {
        Error::failed(
            ErrorKind::BadApiArgument,
            "Byte range is outside of the declared blob length",
        )?
    }
    reader.seek(SeekFrom::Start(blob_offset))?;
    let header = BlobSectionHeader::read(reader)?;
    if blob_length + BlobSectionHeader::SIZE > header.section_length {
        Error::failed(
            ErrorKind::BadCvHeader,
            "Blob length and blob section header mismatch",
        )?
    }
    reader.seek(SeekFrom::Start(blob_offset + BlobSectionHeader::SIZE + start))?;
    reader.read_exact(dst)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paged_reader::ChecksumPolicy;
    use std::io::Cursor;

    #[test]
    fn create_write_and_read_back() {
        let mut file = Vec::new();
        let mut writer = PagedWriter::new(Cursor::new(&mut file)).unwrap();
        let offset = create_blob(&mut writer, 100).unwrap();
        write_blob_range(&mut writer, offset, 100, b"hello blob", 10).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let mut reader =
            PagedReader::new(Cursor::new(file), 1024, ChecksumPolicy::All).unwrap();
        let mut data = [0_u8; 10];
        read_blob_range(&mut reader, offset, 100, &mut data, 10).unwrap();
        assert_eq!(&data, b"hello blob");

        // Unwritten parts of the blob read as zeros
        let mut head = [0xFF_u8; 10];
        read_blob_range(&mut reader, offset, 100, &mut head, 0).unwrap();
        assert_eq!(head, [0_u8; 10]);
    }

    #[test]
    fn range_checks() {
        let mut file = Vec::new();
        let mut writer = PagedWriter::new(Cursor::new(&mut file)).unwrap();
        let offset = create_blob(&mut writer, 16).unwrap();

        let err = write_blob_range(&mut writer, offset, 16, &[0_u8; 8], 9).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadApiArgument);
        write_blob_range(&mut writer, offset, 16, &[1_u8; 8], 8).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let mut reader =
            PagedReader::new(Cursor::new(file), 1024, ChecksumPolicy::All).unwrap();
        let mut data = [0_u8; 8];
        let err = read_blob_range(&mut reader, offset, 16, &mut data, 9).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadApiArgument);
    }
}
