use crate::node::{FloatPrecision, NodeId, NodeType};
use crate::tree::NodeTree;
use crate::{Error, ErrorKind, Result};

/// In-file encoding of one record field, derived from a prototype leaf.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum StorageKind {
    Integer {
        min: i64,
        max: i64,
    },
    ScaledInteger {
        min: i64,
        max: i64,
        scale: f64,
        offset: f64,
    },
    Single {
        min: f64,
        max: f64,
    },
    Double {
        min: f64,
        max: f64,
    },
}

impl StorageKind {
    /// Number of bits each value of this field occupies in the packet bitstream.
    /// Integers use the smallest width that can hold their biased range.
    pub fn bit_size(&self) -> u32 {
        match self {
            StorageKind::Integer { min, max } | StorageKind::ScaledInteger { min, max, .. } => {
                int_bit_size(*min, *max)
            }
            StorageKind::Single { .. } => 32,
            StorageKind::Double { .. } => 64,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            StorageKind::Integer { .. } | StorageKind::ScaledInteger { .. }
        )
    }
}

/// Bits needed for values biased into the range `0..=(max - min)`.
/// A range of a single value needs zero bits per record.
pub(crate) fn int_bit_size(min: i64, max: i64) -> u32 {
    let range = (max as i128 - min as i128) as u64;
    if range == 0 {
        0
    } else {
        64 - range.leading_zeros()
    }
}

/// One field of a compressed vector record: its path relative
/// to the prototype root and its in-file encoding.
#[derive(Clone, Debug)]
pub(crate) struct Field {
    pub path: String,
    pub kind: StorageKind,
}

/// Extracts the ordered field list of a prototype subtree.
///
/// A depth-first traversal of the prototype yields one field per numeric
/// leaf. The prototype root must be a structure and may contain nested
/// structures, all other variants are invalid inside a prototype.
pub(crate) fn extract_fields(tree: &NodeTree, prototype: NodeId) -> Result<Vec<Field>> {
    if tree.node_type(prototype)? != NodeType::Structure {
        Error::failed(
            ErrorKind::BadPrototype,
            "The prototype of a compressed vector must be a structure",
        )?
    }
    let mut fields = Vec::new();
    collect_fields(tree, prototype, "", &mut fields)?;
    if fields.is_empty() {
        Error::failed(
            ErrorKind::BadPrototype,
            "The prototype of a compressed vector must contain at least one field",
        )?
    }
    Ok(fields)
}

fn collect_fields(
    tree: &NodeTree,
    node: NodeId,
    prefix: &str,
    fields: &mut Vec<Field>,
) -> Result<()> {
    for child in tree.children_of(node)? {
        let name = tree.element_name(child)?;
        let path = if prefix.is_empty() {
            name.to_owned()
        } else {
            format!("{prefix}/{name}")
        };
        match tree.node_type(child)? {
            NodeType::Structure => collect_fields(tree, child, &path, fields)?,
            NodeType::Integer => {
                let (min, max) = tree.int_bounds(child)?;
                fields.push(Field {
                    path,
                    kind: StorageKind::Integer { min, max },
                });
            }
            NodeType::ScaledInteger => {
                let (min, max) = tree.scaled_bounds(child)?;
                fields.push(Field {
                    path,
                    kind: StorageKind::ScaledInteger {
                        min,
                        max,
                        scale: tree.scaled_scale(child)?,
                        offset: tree.scaled_offset(child)?,
                    },
                });
            }
            NodeType::Float => {
                let (min, max) = tree.float_bounds(child)?;
                let kind = match tree.float_precision(child)? {
                    FloatPrecision::Single => StorageKind::Single { min, max },
                    FloatPrecision::Double => StorageKind::Double { min, max },
                };
                fields.push(Field { path, kind });
            }
            other => Error::failed(
                ErrorKind::BadPrototype,
                format!("Prototype element '{path}' has unsupported type {other:?}"),
            )?,
        }
    }
    Ok(())
}

/// Validates the codecs vector of a compressed vector.
///
/// Each codec descriptor must be a structure containing a `bitPackCodec`
/// element. An empty codecs vector means bit-packing for all fields.
pub(crate) fn validate_codecs(tree: &NodeTree, codecs: NodeId) -> Result<()> {
    if tree.node_type(codecs)? != NodeType::Vector {
        Error::failed(
            ErrorKind::BadCodecs,
            "The codecs of a compressed vector must be a vector",
        )?
    }
    for descriptor in tree.children_of(codecs)? {
        if tree.node_type(descriptor)? != NodeType::Structure {
            Error::failed(
                ErrorKind::BadCodecs,
                "Codec descriptors must be structure nodes",
            )?
        }
        if !tree.is_defined(descriptor, "bitPackCodec") {
            Error::failed(
                ErrorKind::BadCodecs,
                "Found unsupported codec, only 'bitPackCodec' is defined",
            )?
        }
    }
    Ok(())
}
