use crate::error::{Converter, WRONG_OFFSET};
use crate::{Error, ErrorKind, Result};

const SIGNATURE: &[u8; 8] = b"ASTM-E57";
const MAJOR_VERSION: u32 = 1;
const MINOR_VERSION: u32 = 0;
const PAGE_SIZE: u64 = 1024;

/// Represents the fixed-size file structure at the start of an E57 file.
///
/// All offsets and lengths in the header are logical values,
/// meaning they exclude the page checksum bytes.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Header {
    /// File header signature that must be always "ASTM-E57".
    pub signature: [u8; 8],

    /// Major version number of the E57 format of the file.
    pub major: u32,

    /// Minor version number of the E57 format of the file.
    pub minor: u32,

    /// Logical length of the E57 file.
    pub log_length: u64,

    /// Logical offset of the XML data inside the file.
    pub xml_log_offset: u64,

    /// Logical length of the XML data.
    pub xml_log_length: u64,

    /// Page size of the E57 file.
    pub page_size: u64,
}

impl Header {
    /// Size of the serialized header structure in bytes.
    pub const SIZE: usize = 48;

    /// Parses and validates an E57 file header structure.
    pub fn from_array(data: &[u8; Self::SIZE]) -> Result<Self> {
        let header = Header {
            signature: data[0..8].try_into().internal_err(WRONG_OFFSET)?,
            major: u32::from_le_bytes(data[8..12].try_into().internal_err(WRONG_OFFSET)?),
            minor: u32::from_le_bytes(data[12..16].try_into().internal_err(WRONG_OFFSET)?),
            log_length: u64::from_le_bytes(data[16..24].try_into().internal_err(WRONG_OFFSET)?),
            xml_log_offset: u64::from_le_bytes(
                data[24..32].try_into().internal_err(WRONG_OFFSET)?,
            ),
            xml_log_length: u64::from_le_bytes(
                data[32..40].try_into().internal_err(WRONG_OFFSET)?,
            ),
            page_size: u64::from_le_bytes(data[40..48].try_into().internal_err(WRONG_OFFSET)?),
        };

        if &header.signature != SIGNATURE {
            Error::failed(
                ErrorKind::BadFileSignature,
                "Found unsupported signature in header",
            )?
        }
        if header.major != MAJOR_VERSION || header.minor != MINOR_VERSION {
            Error::failed(
                ErrorKind::UnknownFileVersion,
                format!(
                    "Found unsupported version {}.{} in header",
                    header.major, header.minor
                ),
            )?
        }
        if header.page_size != PAGE_SIZE {
            Error::failed(
                ErrorKind::BadConfiguration,
                "Found unsupported page size in header",
            )?
        }

        Ok(header)
    }

    /// Serializes the header structure into its binary form.
    pub fn to_array(&self) -> [u8; Self::SIZE] {
        let mut data = [0_u8; Self::SIZE];
        data[0..8].copy_from_slice(&self.signature);
        data[8..12].copy_from_slice(&self.major.to_le_bytes());
        data[12..16].copy_from_slice(&self.minor.to_le_bytes());
        data[16..24].copy_from_slice(&self.log_length.to_le_bytes());
        data[24..32].copy_from_slice(&self.xml_log_offset.to_le_bytes());
        data[32..40].copy_from_slice(&self.xml_log_length.to_le_bytes());
        data[40..48].copy_from_slice(&self.page_size.to_le_bytes());
        data
    }
}

impl Default for Header {
    fn default() -> Self {
        Self {
            signature: *SIGNATURE,
            major: MAJOR_VERSION,
            minor: MINOR_VERSION,
            log_length: 0,
            xml_log_offset: 0,
            xml_log_length: 0,
            page_size: PAGE_SIZE,
        }
    }
}
