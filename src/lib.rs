//! Foundation layer for reading and writing ASTM E57 files.
//!
//! An E57 file combines an XML-described tree of typed elements with
//! compressed binary record streams and opaque blobs, all stored in
//! checksum-protected pages. This crate exposes the generic element tree
//! with path-addressable access, the paged file layer with a configurable
//! checksum verification policy and the bit-packing codec for compressed
//! vector records.

#![forbid(unsafe_code)]

mod bitpack;
mod blob;
mod bs_read;
mod bs_write;
mod buffer;
mod crc32;
mod cv_reader;
mod cv_section;
mod cv_writer;
mod e57_reader;
mod e57_writer;
mod error;
mod extension;
mod header;
mod node;
mod packet;
mod paged_reader;
mod paged_writer;
mod path;
mod prototype;
mod tree;
mod xml_read;
mod xml_write;

pub use self::buffer::{DestBuffer, DestValues, SourceBuffer, SourceValues};
pub use self::cv_reader::CompressedVectorReader;
pub use self::cv_writer::CompressedVectorWriter;
pub use self::e57_reader::E57Reader;
pub use self::e57_writer::E57Writer;
pub use self::error::{Error, ErrorKind, Result};
pub use self::extension::{Extension, ExtensionRegistry, E57_V1_0_URI};
pub use self::header::Header;
pub use self::node::{FloatPrecision, NodeId, NodeType};
pub use self::paged_reader::ChecksumPolicy;
pub use self::path::{is_element_name_extended, parse_element_name, validate_name};
pub use self::tree::NodeTree;
