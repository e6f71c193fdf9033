use crate::bs_read::ByteStreamReadBuffer;
use crate::bs_write::ByteStreamWriteBuffer;
use crate::prototype::StorageKind;
use crate::{Error, Result};

/// A record field value in its in-file storage representation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum StorageValue {
    /// Raw value of integer and scaled integer fields.
    Int(i64),
    Single(f32),
    Double(f64),
}

/// Packs and unpacks storage values to and from the per-field bitstreams.
pub(crate) struct BitPack;

impl BitPack {
    /// Appends one value to the bitstream of its field.
    /// Integers are biased by their minimum so the stored value is non-negative.
    pub fn pack(
        kind: &StorageKind,
        value: StorageValue,
        stream: &mut ByteStreamWriteBuffer,
    ) -> Result<()> {
        match (kind, value) {
            (
                StorageKind::Integer { min, .. } | StorageKind::ScaledInteger { min, .. },
                StorageValue::Int(raw),
            ) => {
                let biased = (raw as i128 - *min as i128) as u64;
                stream.add_bits(biased, kind.bit_size());
            }
            (StorageKind::Single { .. }, StorageValue::Single(value)) => {
                stream.add_bytes(&value.to_le_bytes());
            }
            (StorageKind::Double { .. }, StorageValue::Double(value)) => {
                stream.add_bytes(&value.to_le_bytes());
            }
            _ => Error::internal("Storage value does not match field kind")?,
        }
        Ok(())
    }

    /// Extracts the next value of a field from its bitstream,
    /// or None if not enough bits have been buffered yet.
    pub fn unpack(kind: &StorageKind, stream: &mut ByteStreamReadBuffer) -> Option<StorageValue> {
        Some(match kind {
            StorageKind::Integer { min, .. } | StorageKind::ScaledInteger { min, .. } => {
                let biased = stream.extract(kind.bit_size())?;
                StorageValue::Int((*min as i128 + biased as i128) as i64)
            }
            StorageKind::Single { .. } => {
                let bits = stream.extract(32)?;
                StorageValue::Single(f32::from_bits(bits as u32))
            }
            StorageKind::Double { .. } => {
                let bits = stream.extract(64)?;
                StorageValue::Double(f64::from_bits(bits))
            }
        })
    }
}
