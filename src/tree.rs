use crate::error::Converter;
use crate::extension::ExtensionRegistry;
use crate::node::{FloatPrecision, NodeData, NodeId, NodeType, NodeValue};
use crate::path::{is_index_segment, parse_element_name, parse_path};
use crate::{Error, ErrorKind, Result};
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_FILE_ID: AtomicU32 = AtomicU32::new(1);

/// The typed element tree of one E57 file.
///
/// All nodes live in an arena owned by this type and are addressed
/// through copyable [`NodeId`] handles. The tree always contains a root
/// structure node. Handles from one file cannot be used with another,
/// such mixups are detected through a per-file identifier.
#[derive(Debug)]
pub struct NodeTree {
    file_id: u32,
    nodes: Vec<NodeData>,
    extensions: ExtensionRegistry,
}

impl NodeTree {
    pub(crate) fn new() -> Self {
        let file_id = NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed);
        let mut root = NodeData::new(NodeValue::Structure {
            children: Vec::new(),
        });
        root.attached = true;
        Self {
            file_id,
            nodes: vec![root],
            extensions: ExtensionRegistry::new(),
        }
    }

    /// Handle of the root structure node.
    pub fn root(&self) -> NodeId {
        NodeId {
            file: self.file_id,
            index: 0,
        }
    }

    /// Registered extensions of this file.
    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    /// Mutable access to the extension registry for write-mode files.
    pub fn extensions_mut(&mut self) -> &mut ExtensionRegistry {
        &mut self.extensions
    }

    fn data(&self, id: NodeId) -> Result<&NodeData> {
        if id.file != self.file_id {
            Error::failed(
                ErrorKind::DifferentDestImageFile,
                "Node handle belongs to a different file",
            )?
        }
        self.nodes
            .get(id.index as usize)
            .internal_err("Node handle index is out of range")
    }

    fn data_mut(&mut self, id: NodeId) -> Result<&mut NodeData> {
        if id.file != self.file_id {
            Error::failed(
                ErrorKind::DifferentDestImageFile,
                "Node handle belongs to a different file",
            )?
        }
        self.nodes
            .get_mut(id.index as usize)
            .internal_err("Node handle index is out of range")
    }

    fn push(&mut self, value: NodeValue) -> NodeId {
        let index = self.nodes.len() as u32;
        self.nodes.push(NodeData::new(value));
        NodeId {
            file: self.file_id,
            index,
        }
    }

    /// Creates a new unattached structure node.
    pub fn new_structure(&mut self) -> NodeId {
        self.push(NodeValue::Structure {
            children: Vec::new(),
        })
    }

    /// Creates a new unattached vector node.
    pub fn new_vector(&mut self, allow_hetero: bool) -> NodeId {
        self.push(NodeValue::Vector {
            children: Vec::new(),
            allow_hetero,
        })
    }

    /// Creates a new unattached integer node with value and bounds.
    pub fn new_integer(&mut self, value: i64, min: i64, max: i64) -> Result<NodeId> {
        if min > max {
            Error::failed(
                ErrorKind::BadApiArgument,
                format!("Integer minimum {min} is bigger than maximum {max}"),
            )?
        }
        if value < min || value > max {
            Error::failed(
                ErrorKind::ValueOutOfBounds,
                format!("Integer value {value} is outside of [{min}, {max}]"),
            )?
        }
        Ok(self.push(NodeValue::Integer { value, min, max }))
    }

    /// Creates a new unattached scaled integer node.
    /// The represented value is `raw * scale + offset`.
    pub fn new_scaled_integer(
        &mut self,
        raw: i64,
        min: i64,
        max: i64,
        scale: f64,
        offset: f64,
    ) -> Result<NodeId> {
        if scale == 0.0 {
            Error::failed(ErrorKind::BadApiArgument, "Scale must not be zero")?
        }
        if min > max {
            Error::failed(
                ErrorKind::BadApiArgument,
                format!("Scaled integer minimum {min} is bigger than maximum {max}"),
            )?
        }
        if raw < min || raw > max {
            Error::failed(
                ErrorKind::ValueOutOfBounds,
                format!("Scaled integer raw value {raw} is outside of [{min}, {max}]"),
            )?
        }
        Ok(self.push(NodeValue::ScaledInteger {
            raw,
            min,
            max,
            scale,
            offset,
        }))
    }

    /// Creates a new unattached float node with the given precision and bounds.
    pub fn new_float(
        &mut self,
        value: f64,
        precision: FloatPrecision,
        min: f64,
        max: f64,
    ) -> Result<NodeId> {
        if min > max {
            Error::failed(
                ErrorKind::BadApiArgument,
                format!("Float minimum {min} is bigger than maximum {max}"),
            )?
        }
        if value < min || value > max {
            Error::failed(
                ErrorKind::ValueOutOfBounds,
                format!("Float value {value} is outside of [{min}, {max}]"),
            )?
        }
        Ok(self.push(NodeValue::Float {
            value,
            precision,
            min,
            max,
        }))
    }

    /// Creates a new unattached string node.
    pub fn new_string(&mut self, value: impl Into<String>) -> NodeId {
        let value = value.into();
        self.push(NodeValue::String { value })
    }

    /// Creates a new unattached compressed vector node from a prototype
    /// subtree and a codecs vector. Both become children of the new node.
    pub fn new_compressed_vector(&mut self, prototype: NodeId, codecs: NodeId) -> Result<NodeId> {
        if prototype == codecs {
            Error::failed(
                ErrorKind::BadApiArgument,
                "Prototype and codecs must be different nodes",
            )?
        }
        self.check_attachable(prototype)?;
        self.check_attachable(codecs)?;
        if self.data(codecs)?.value.node_type() != NodeType::Vector {
            Error::failed(
                ErrorKind::BadNodeDowncast,
                "Codecs of a compressed vector must be a vector node",
            )?
        }

        let cv = self.push(NodeValue::CompressedVector {
            prototype,
            codecs,
            record_count: 0,
            binary_offset: 0,
            sealed: false,
        });
        let proto_data = self.data_mut(prototype)?;
        proto_data.parent = Some(cv);
        proto_data.name = String::from("prototype");
        let codecs_data = self.data_mut(codecs)?;
        codecs_data.parent = Some(cv);
        codecs_data.name = String::from("codecs");
        Ok(cv)
    }

    /// Registers a blob node for an already reserved binary section.
    pub(crate) fn new_blob_node(&mut self, offset: u64, length: u64) -> NodeId {
        self.push(NodeValue::Blob { offset, length })
    }

    /// Returns the variant of a node.
    pub fn node_type(&self, id: NodeId) -> Result<NodeType> {
        Ok(self.data(id)?.value.node_type())
    }

    /// Returns the element name of a node, empty if not yet attached.
    pub fn element_name(&self, id: NodeId) -> Result<&str> {
        Ok(self.data(id)?.name.as_str())
    }

    /// Returns the parent of a node, absent for the root and unattached subtree roots.
    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.data(id)?.parent)
    }

    /// True if the node is part of the root-reachable tree of the file.
    pub fn is_attached(&self, id: NodeId) -> Result<bool> {
        Ok(self.data(id)?.attached)
    }

    /// True if the node is the root node of the file.
    pub fn is_root(&self, id: NodeId) -> bool {
        id == self.root()
    }

    /// Computes the path name of a node by walking its parents.
    pub fn path_name(&self, id: NodeId) -> Result<String> {
        let mut parts = Vec::new();
        let mut current = id;
        loop {
            let data = self.data(current)?;
            match data.parent {
                Some(parent) => {
                    parts.push(data.name.clone());
                    current = parent;
                }
                None => {
                    parts.reverse();
                    let joined = parts.join("/");
                    return Ok(if current == self.root() {
                        format!("/{joined}")
                    } else {
                        joined
                    });
                }
            }
        }
    }

    /// Number of children for containers and the record count for compressed vectors.
    pub fn child_count(&self, id: NodeId) -> Result<u64> {
        Ok(match &self.data(id)?.value {
            NodeValue::Structure { children } => children.len() as u64,
            NodeValue::Vector { children, .. } => children.len() as u64,
            NodeValue::CompressedVector { record_count, .. } => *record_count,
            _ => 0,
        })
    }

    /// Returns the child at an index of a structure or vector node.
    pub fn get_child(&self, id: NodeId, index: u64) -> Result<NodeId> {
        let children = match &self.data(id)?.value {
            NodeValue::Structure { children } => children,
            NodeValue::Vector { children, .. } => children,
            _ => Error::failed(
                ErrorKind::BadNodeDowncast,
                "Node has no indexable children",
            )?,
        };
        children
            .get(index as usize)
            .copied()
            .kind_err(
                ErrorKind::ChildIndexOutOfBounds,
                format!("Child index {index} is out of bounds"),
            )
    }

    /// Resolves a path name starting at the given node (or the root for
    /// absolute paths) and returns the found node.
    pub fn get(&self, start: NodeId, path: &str) -> Result<NodeId> {
        let (absolute, segments) = parse_path(path)?;
        let mut current = if absolute { self.root() } else { start };
        self.data(current)?;
        for segment in segments {
            current = match self.step(current, segment)? {
                Some(next) => next,
                None => Error::failed(
                    ErrorKind::PathUndefined,
                    format!("Element '{segment}' of path '{path}' is not defined"),
                )?,
            };
        }
        Ok(current)
    }

    /// True if the path resolves to an existing node. Never fails,
    /// malformed paths simply yield false.
    pub fn is_defined(&self, start: NodeId, path: &str) -> bool {
        self.get(start, path).is_ok()
    }

    /// Resolves one path segment, returning None if a name is not defined.
    fn step(&self, current: NodeId, segment: &str) -> Result<Option<NodeId>> {
        if let (Some(prefix), _) = parse_element_name(segment)? {
            if self.extensions.lookup_prefix(prefix).is_none() {
                Error::failed(
                    ErrorKind::BadPathName,
                    format!("Namespace prefix '{prefix}' is not registered"),
                )?
            }
        }
        Ok(match &self.data(current)?.value {
            NodeValue::Structure { children } => {
                let mut found = None;
                for &child in children {
                    if self.data(child)?.name == segment {
                        found = Some(child);
                        break;
                    }
                }
                found
            }
            NodeValue::Vector { children, .. } => {
                if is_index_segment(segment) {
                    let index: usize = segment.parse().internal_err("Invalid index segment")?;
                    children.get(index).copied()
                } else {
                    None
                }
            }
            NodeValue::CompressedVector {
                prototype, codecs, ..
            } => match segment {
                "prototype" => Some(*prototype),
                "codecs" => Some(*codecs),
                _ => None,
            },
            _ => None,
        })
    }

    /// Sets a child of a structure node. The path may contain multiple
    /// segments, but all intermediate elements must already exist.
    pub fn set(&mut self, parent: NodeId, path: &str, child: NodeId) -> Result<()> {
        self.set_impl(parent, path, child, false)
    }

    /// Like [`NodeTree::set`], but auto-creates missing intermediate structure nodes.
    pub fn set_create_path(&mut self, parent: NodeId, path: &str, child: NodeId) -> Result<()> {
        self.set_impl(parent, path, child, true)
    }

    fn set_impl(
        &mut self,
        parent: NodeId,
        path: &str,
        child: NodeId,
        auto_create: bool,
    ) -> Result<()> {
        let (absolute, segments) = parse_path(path)?;
        let mut container = if absolute { self.root() } else { parent };
        self.data(container)?;
        if segments.is_empty() {
            Error::failed(ErrorKind::BadPathName, "Cannot set the root node itself")?
        }

        for segment in &segments[..segments.len() - 1] {
            container = match self.step(container, segment)? {
                Some(next) => next,
                None if auto_create => {
                    let next = self.new_structure();
                    self.link_child(container, segment, next)?;
                    next
                }
                None => Error::failed(
                    ErrorKind::PathUndefined,
                    format!("Intermediate element '{segment}' of path '{path}' is not defined"),
                )?,
            };
        }

        let name = segments.last().internal_err("Empty path segments")?;
        if is_index_segment(name) {
            Error::failed(
                ErrorKind::BadPathName,
                "Cannot set a numeric element name, use append on a vector instead",
            )?
        }
        if self.step(container, name)?.is_some() {
            Error::failed(
                ErrorKind::SetTwice,
                format!("Element '{name}' of path '{path}' is already defined"),
            )?
        }
        self.link_child(container, name, child)
    }

    /// Appends a child to a vector node.
    pub fn append(&mut self, vector: NodeId, child: NodeId) -> Result<()> {
        let (children, allow_hetero) = match &self.data(vector)?.value {
            NodeValue::Vector {
                children,
                allow_hetero,
            } => (children.clone(), *allow_hetero),
            _ => Error::failed(ErrorKind::BadNodeDowncast, "Node is not a vector")?,
        };
        if !allow_hetero {
            if let Some(&first) = children.first() {
                if !self.type_equivalent(first, child)? {
                    Error::failed(
                        ErrorKind::HomogeneousViolation,
                        "Child is not type-equivalent to the existing children of the vector",
                    )?
                }
            }
        }
        let name = children.len().to_string();
        self.link_child(vector, &name, child)
    }

    /// Checks everything that must hold before a node can be attached somewhere.
    fn check_attachable(&self, child: NodeId) -> Result<()> {
        let data = self.data(child)?;
        if self.is_root(child) {
            Error::failed(ErrorKind::BadApiArgument, "Cannot attach the root node")?
        }
        if data.parent.is_some() {
            Error::failed(
                ErrorKind::AlreadyHasParent,
                "Node is already attached to a parent",
            )?
        }
        Ok(())
    }

    fn link_child(&mut self, container: NodeId, name: &str, child: NodeId) -> Result<()> {
        self.check_attachable(child)?;

        if let (Some(prefix), _) = parse_element_name(name)? {
            if self.extensions.lookup_prefix(prefix).is_none() {
                Error::failed(
                    ErrorKind::BadPathName,
                    format!("Namespace prefix '{prefix}' is not registered"),
                )?
            }
        }

        // Attaching an ancestor of the container would create a cycle.
        let mut current = Some(container);
        while let Some(id) = current {
            if id == child {
                Error::failed(
                    ErrorKind::BadApiArgument,
                    "Cannot attach a node below itself",
                )?
            }
            if let NodeValue::CompressedVector { sealed: true, .. } = self.data(id)?.value {
                Error::failed(
                    ErrorKind::BadPrototype,
                    "The record schema of a written compressed vector is immutable",
                )?
            }
            current = self.data(id)?.parent;
        }

        match &self.data(container)?.value {
            NodeValue::Structure { .. } | NodeValue::Vector { .. } => {}
            _ => Error::failed(
                ErrorKind::BadNodeDowncast,
                "Only structures and vectors can take children",
            )?,
        }

        let child_data = self.data_mut(child)?;
        child_data.name = name.to_owned();
        child_data.parent = Some(container);

        let container_attached = self.data(container)?.attached;
        match &mut self.data_mut(container)?.value {
            NodeValue::Structure { children } => children.push(child),
            NodeValue::Vector { children, .. } => children.push(child),
            _ => Error::internal("Container lost its children")?,
        }
        if container_attached {
            self.set_attached_recursive(child)?;
        }
        Ok(())
    }

    fn set_attached_recursive(&mut self, id: NodeId) -> Result<()> {
        self.data_mut(id)?.attached = true;
        for child in self.children_of(id)? {
            self.set_attached_recursive(child)?;
        }
        Ok(())
    }

    /// All direct children of a node, including the prototype and codecs
    /// subtrees of compressed vectors.
    pub(crate) fn children_of(&self, id: NodeId) -> Result<Vec<NodeId>> {
        Ok(match &self.data(id)?.value {
            NodeValue::Structure { children } => children.clone(),
            NodeValue::Vector { children, .. } => children.clone(),
            NodeValue::CompressedVector {
                prototype, codecs, ..
            } => vec![*prototype, *codecs],
            _ => Vec::new(),
        })
    }

    /// Structural type equivalence of two nodes: same variant and
    /// recursively identical type-relevant attributes.
    pub fn type_equivalent(&self, a: NodeId, b: NodeId) -> Result<bool> {
        let da = self.data(a)?;
        let db = self.data(b)?;
        Ok(match (&da.value, &db.value) {
            (NodeValue::Structure { children: ca }, NodeValue::Structure { children: cb }) => {
                if ca.len() != cb.len() {
                    return Ok(false);
                }
                for &child_a in ca {
                    let name = &self.data(child_a)?.name;
                    let mut matched = false;
                    for &child_b in cb {
                        if &self.data(child_b)?.name == name {
                            matched = self.type_equivalent(child_a, child_b)?;
                            break;
                        }
                    }
                    if !matched {
                        return Ok(false);
                    }
                }
                true
            }
            (
                NodeValue::Vector {
                    children: ca,
                    allow_hetero: ha,
                },
                NodeValue::Vector {
                    children: cb,
                    allow_hetero: hb,
                },
            ) => {
                if ha != hb || ca.len() != cb.len() {
                    return Ok(false);
                }
                for (&child_a, &child_b) in ca.iter().zip(cb.iter()) {
                    if !self.type_equivalent(child_a, child_b)? {
                        return Ok(false);
                    }
                }
                true
            }
            (
                NodeValue::CompressedVector {
                    prototype: pa,
                    codecs: ka,
                    ..
                },
                NodeValue::CompressedVector {
                    prototype: pb,
                    codecs: kb,
                    ..
                },
            ) => self.type_equivalent(*pa, *pb)? && self.type_equivalent(*ka, *kb)?,
            (
                NodeValue::Integer {
                    min: mina,
                    max: maxa,
                    ..
                },
                NodeValue::Integer {
                    min: minb,
                    max: maxb,
                    ..
                },
            ) => mina == minb && maxa == maxb,
            (
                NodeValue::ScaledInteger {
                    min: mina,
                    max: maxa,
                    scale: sa,
                    offset: oa,
                    ..
                },
                NodeValue::ScaledInteger {
                    min: minb,
                    max: maxb,
                    scale: sb,
                    offset: ob,
                    ..
                },
            ) => mina == minb && maxa == maxb && sa == sb && oa == ob,
            (
                NodeValue::Float {
                    precision: pa,
                    min: mina,
                    max: maxa,
                    ..
                },
                NodeValue::Float {
                    precision: pb,
                    min: minb,
                    max: maxb,
                    ..
                },
            ) => pa == pb && mina == minb && maxa == maxb,
            (NodeValue::String { .. }, NodeValue::String { .. }) => true,
            (NodeValue::Blob { .. }, NodeValue::Blob { .. }) => true,
            _ => false,
        })
    }

    fn downcast_err<T>(&self, id: NodeId, expected: NodeType) -> Result<T> {
        let actual = self.data(id)?.value.node_type();
        Error::failed(
            ErrorKind::BadNodeDowncast,
            format!("Expected {expected:?} node, found {actual:?}"),
        )
    }

    /// Value of an integer node.
    pub fn int_value(&self, id: NodeId) -> Result<i64> {
        match &self.data(id)?.value {
            NodeValue::Integer { value, .. } => Ok(*value),
            _ => self.downcast_err(id, NodeType::Integer),
        }
    }

    /// Minimum and maximum bounds of an integer node.
    pub fn int_bounds(&self, id: NodeId) -> Result<(i64, i64)> {
        match &self.data(id)?.value {
            NodeValue::Integer { min, max, .. } => Ok((*min, *max)),
            _ => self.downcast_err(id, NodeType::Integer),
        }
    }

    /// Raw integer value of a scaled integer node.
    pub fn scaled_raw_value(&self, id: NodeId) -> Result<i64> {
        match &self.data(id)?.value {
            NodeValue::ScaledInteger { raw, .. } => Ok(*raw),
            _ => self.downcast_err(id, NodeType::ScaledInteger),
        }
    }

    /// Represented value of a scaled integer node: `raw * scale + offset`.
    pub fn scaled_value(&self, id: NodeId) -> Result<f64> {
        match &self.data(id)?.value {
            NodeValue::ScaledInteger {
                raw, scale, offset, ..
            } => Ok(*raw as f64 * *scale + *offset),
            _ => self.downcast_err(id, NodeType::ScaledInteger),
        }
    }

    /// Raw minimum and maximum bounds of a scaled integer node.
    pub fn scaled_bounds(&self, id: NodeId) -> Result<(i64, i64)> {
        match &self.data(id)?.value {
            NodeValue::ScaledInteger { min, max, .. } => Ok((*min, *max)),
            _ => self.downcast_err(id, NodeType::ScaledInteger),
        }
    }

    /// Scale factor of a scaled integer node.
    pub fn scaled_scale(&self, id: NodeId) -> Result<f64> {
        match &self.data(id)?.value {
            NodeValue::ScaledInteger { scale, .. } => Ok(*scale),
            _ => self.downcast_err(id, NodeType::ScaledInteger),
        }
    }

    /// Offset of a scaled integer node.
    pub fn scaled_offset(&self, id: NodeId) -> Result<f64> {
        match &self.data(id)?.value {
            NodeValue::ScaledInteger { offset, .. } => Ok(*offset),
            _ => self.downcast_err(id, NodeType::ScaledInteger),
        }
    }

    /// Value of a float node.
    pub fn float_value(&self, id: NodeId) -> Result<f64> {
        match &self.data(id)?.value {
            NodeValue::Float { value, .. } => Ok(*value),
            _ => self.downcast_err(id, NodeType::Float),
        }
    }

    /// Precision of a float node.
    pub fn float_precision(&self, id: NodeId) -> Result<FloatPrecision> {
        match &self.data(id)?.value {
            NodeValue::Float { precision, .. } => Ok(*precision),
            _ => self.downcast_err(id, NodeType::Float),
        }
    }

    /// Minimum and maximum bounds of a float node.
    pub fn float_bounds(&self, id: NodeId) -> Result<(f64, f64)> {
        match &self.data(id)?.value {
            NodeValue::Float { min, max, .. } => Ok((*min, *max)),
            _ => self.downcast_err(id, NodeType::Float),
        }
    }

    /// Value of a string node.
    pub fn string_value(&self, id: NodeId) -> Result<&str> {
        match &self.data(id)?.value {
            NodeValue::String { value } => Ok(value.as_str()),
            _ => self.downcast_err(id, NodeType::String),
        }
    }

    /// Byte length of a blob node.
    pub fn blob_length(&self, id: NodeId) -> Result<u64> {
        match &self.data(id)?.value {
            NodeValue::Blob { length, .. } => Ok(*length),
            _ => self.downcast_err(id, NodeType::Blob),
        }
    }

    pub(crate) fn blob_offset(&self, id: NodeId) -> Result<u64> {
        match &self.data(id)?.value {
            NodeValue::Blob { offset, .. } => Ok(*offset),
            _ => self.downcast_err(id, NodeType::Blob),
        }
    }

    /// Heterogeneous children flag of a vector node.
    pub fn vector_allow_hetero(&self, id: NodeId) -> Result<bool> {
        match &self.data(id)?.value {
            NodeValue::Vector { allow_hetero, .. } => Ok(*allow_hetero),
            _ => self.downcast_err(id, NodeType::Vector),
        }
    }

    /// Prototype subtree of a compressed vector node.
    pub fn cv_prototype(&self, id: NodeId) -> Result<NodeId> {
        match &self.data(id)?.value {
            NodeValue::CompressedVector { prototype, .. } => Ok(*prototype),
            _ => self.downcast_err(id, NodeType::CompressedVector),
        }
    }

    /// Codecs vector of a compressed vector node.
    pub fn cv_codecs(&self, id: NodeId) -> Result<NodeId> {
        match &self.data(id)?.value {
            NodeValue::CompressedVector { codecs, .. } => Ok(*codecs),
            _ => self.downcast_err(id, NodeType::CompressedVector),
        }
    }

    /// Number of records stored in a compressed vector.
    pub fn cv_record_count(&self, id: NodeId) -> Result<u64> {
        match &self.data(id)?.value {
            NodeValue::CompressedVector { record_count, .. } => Ok(*record_count),
            _ => self.downcast_err(id, NodeType::CompressedVector),
        }
    }

    /// Logical file offset of the binary section of a compressed vector.
    pub fn cv_file_offset(&self, id: NodeId) -> Result<u64> {
        match &self.data(id)?.value {
            NodeValue::CompressedVector { binary_offset, .. } => Ok(*binary_offset),
            _ => self.downcast_err(id, NodeType::CompressedVector),
        }
    }

    pub(crate) fn cv_sealed(&self, id: NodeId) -> Result<bool> {
        match &self.data(id)?.value {
            NodeValue::CompressedVector { sealed, .. } => Ok(*sealed),
            _ => self.downcast_err(id, NodeType::CompressedVector),
        }
    }

    /// Marks the record schema of a compressed vector as immutable.
    pub(crate) fn seal_cv(&mut self, id: NodeId) -> Result<()> {
        match &mut self.data_mut(id)?.value {
            NodeValue::CompressedVector { sealed, .. } => {
                *sealed = true;
                Ok(())
            }
            _ => self.downcast_err(id, NodeType::CompressedVector),
        }
    }

    /// Stores record count and binary section offset after writing or parsing.
    pub(crate) fn finish_cv(&mut self, id: NodeId, records: u64, offset: u64) -> Result<()> {
        match &mut self.data_mut(id)?.value {
            NodeValue::CompressedVector {
                record_count,
                binary_offset,
                ..
            } => {
                *record_count = records;
                *binary_offset = offset;
                Ok(())
            }
            _ => self.downcast_err(id, NodeType::CompressedVector),
        }
    }

    /// Writes a human-readable representation of a subtree for debugging.
    pub fn dump(&self, id: NodeId, indent: usize, out: &mut dyn Write) -> Result<()> {
        let data = self.data(id)?;
        let pad = " ".repeat(indent);
        let name = if data.name.is_empty() {
            "<root>"
        } else {
            data.name.as_str()
        };
        let line = match &data.value {
            NodeValue::Structure { children } => {
                format!("{name}: Structure with {} children", children.len())
            }
            NodeValue::Vector {
                children,
                allow_hetero,
            } => format!(
                "{name}: Vector with {} children (hetero: {allow_hetero})",
                children.len()
            ),
            NodeValue::CompressedVector {
                record_count,
                binary_offset,
                ..
            } => format!(
                "{name}: CompressedVector with {record_count} records at offset {binary_offset}"
            ),
            NodeValue::Integer { value, min, max } => {
                format!("{name}: Integer {value} in [{min}, {max}]")
            }
            NodeValue::ScaledInteger {
                raw,
                min,
                max,
                scale,
                offset,
            } => format!(
                "{name}: ScaledInteger {raw} in [{min}, {max}], scale {scale}, offset {offset}"
            ),
            NodeValue::Float {
                value,
                precision,
                min,
                max,
            } => format!("{name}: Float {value} ({precision:?}) in [{min}, {max}]"),
            NodeValue::String { value } => format!("{name}: String \"{value}\""),
            NodeValue::Blob { offset, length } => {
                format!("{name}: Blob with {length} bytes at offset {offset}")
            }
        };
        writeln!(out, "{pad}{line}").write_err("Failed to write node dump")?;
        for child in self.children_of(id)? {
            self.dump(child, indent + 2, out)?;
        }
        Ok(())
    }

    /// Verifies the structural invariants of a subtree.
    pub fn check_invariant(&self, id: NodeId) -> Result<()> {
        let data = self.data(id)?;

        if let Some(parent) = data.parent {
            let siblings = self.children_of(parent)?;
            if !siblings.contains(&id) {
                Error::failed(
                    ErrorKind::InvarianceViolation,
                    "Node is not listed among the children of its parent",
                )?
            }
            if data.name.is_empty() {
                Error::failed(
                    ErrorKind::InvarianceViolation,
                    "Attached node has no element name",
                )?
            }
            if self.data(parent)?.attached != data.attached {
                Error::failed(
                    ErrorKind::InvarianceViolation,
                    "Attached state differs between parent and child",
                )?
            }
        }

        match &data.value {
            NodeValue::Structure { children } => {
                for (i, &a) in children.iter().enumerate() {
                    let name = &self.data(a)?.name;
                    for &b in &children[i + 1..] {
                        if &self.data(b)?.name == name {
                            Error::failed(
                                ErrorKind::InvarianceViolation,
                                format!("Duplicate element name '{name}' in structure"),
                            )?
                        }
                    }
                }
            }
            NodeValue::Vector {
                children,
                allow_hetero,
            } => {
                if !allow_hetero {
                    for pair in children.windows(2) {
                        if !self.type_equivalent(pair[0], pair[1])? {
                            Error::failed(
                                ErrorKind::InvarianceViolation,
                                "Homogeneous vector contains non-equivalent children",
                            )?
                        }
                    }
                }
            }
            NodeValue::Integer { value, min, max } => {
                if value < min || value > max {
                    Error::failed(
                        ErrorKind::InvarianceViolation,
                        "Integer value is outside of its bounds",
                    )?
                }
            }
            NodeValue::ScaledInteger {
                raw,
                min,
                max,
                scale,
                ..
            } => {
                if raw < min || raw > max {
                    Error::failed(
                        ErrorKind::InvarianceViolation,
                        "Scaled integer raw value is outside of its bounds",
                    )?
                }
                if *scale == 0.0 {
                    Error::failed(ErrorKind::InvarianceViolation, "Scale must not be zero")?
                }
            }
            NodeValue::Float {
                value, min, max, ..
            } => {
                if value < min || value > max {
                    Error::failed(
                        ErrorKind::InvarianceViolation,
                        "Float value is outside of its bounds",
                    )?
                }
            }
            _ => {}
        }

        for child in self.children_of(id)? {
            if self.data(child)?.parent != Some(id) {
                Error::failed(
                    ErrorKind::InvarianceViolation,
                    "Child does not point back to its parent",
                )?
            }
            self.check_invariant(child)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::is_element_name_extended;

    #[test]
    fn root_is_empty_structure() {
        let tree = NodeTree::new();
        let root = tree.root();
        assert_eq!(tree.node_type(root).unwrap(), NodeType::Structure);
        assert_eq!(tree.child_count(root).unwrap(), 0);
        assert!(tree.is_attached(root).unwrap());
        assert_eq!(tree.path_name(root).unwrap(), "/");
    }

    #[test]
    fn set_and_get() {
        let mut tree = NodeTree::new();
        let root = tree.root();
        let answer = tree.new_integer(42, 0, 100).unwrap();
        tree.set(root, "answer", answer).unwrap();

        assert_eq!(tree.get(root, "answer").unwrap(), answer);
        assert_eq!(tree.get(root, "/answer").unwrap(), answer);
        assert_eq!(tree.int_value(answer).unwrap(), 42);
        assert_eq!(tree.element_name(answer).unwrap(), "answer");
        assert_eq!(tree.path_name(answer).unwrap(), "/answer");
        assert!(tree.is_attached(answer).unwrap());
        assert!(tree.is_defined(root, "answer"));
        assert!(!tree.is_defined(root, "question"));
        assert!(!tree.is_defined(root, "not a name"));
    }

    #[test]
    fn set_twice_fails() {
        let mut tree = NodeTree::new();
        let root = tree.root();
        let first = tree.new_string("one");
        let second = tree.new_string("two");
        tree.set(root, "name", first).unwrap();
        let err = tree.set(root, "name", second).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SetTwice);
    }

    #[test]
    fn set_with_intermediates() {
        let mut tree = NodeTree::new();
        let root = tree.root();
        let value = tree.new_integer(1, 0, 10).unwrap();

        let err = tree.set(root, "a/b/value", value).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PathUndefined);

        tree.set_create_path(root, "a/b/value", value).unwrap();
        assert_eq!(tree.get(root, "/a/b/value").unwrap(), value);
        assert_eq!(
            tree.node_type(tree.get(root, "a").unwrap()).unwrap(),
            NodeType::Structure
        );
        assert_eq!(tree.path_name(value).unwrap(), "/a/b/value");
    }

    #[test]
    fn reattachment_fails() {
        let mut tree = NodeTree::new();
        let root = tree.root();
        let child = tree.new_string("text");
        tree.set(root, "first", child).unwrap();
        let err = tree.set(root, "second", child).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyHasParent);
    }

    #[test]
    fn foreign_nodes_are_rejected() {
        let mut tree_a = NodeTree::new();
        let mut tree_b = NodeTree::new();
        let foreign = tree_b.new_string("other file");
        let root = tree_a.root();
        let err = tree_a.set(root, "child", foreign).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DifferentDestImageFile);
    }

    #[test]
    fn attachment_propagates() {
        let mut tree = NodeTree::new();
        let root = tree.root();
        let outer = tree.new_structure();
        let inner = tree.new_string("deep");
        tree.set(outer, "inner", inner).unwrap();
        assert!(!tree.is_attached(outer).unwrap());
        assert!(!tree.is_attached(inner).unwrap());

        tree.set(root, "outer", outer).unwrap();
        assert!(tree.is_attached(outer).unwrap());
        assert!(tree.is_attached(inner).unwrap());
    }

    #[test]
    fn homogeneous_vector_rejects_different_types() {
        let mut tree = NodeTree::new();
        let vector = tree.new_vector(false);
        let int = tree.new_integer(1, 0, 10).unwrap();
        tree.append(vector, int).unwrap();

        let float = tree
            .new_float(1.0, FloatPrecision::Double, f64::MIN, f64::MAX)
            .unwrap();
        let err = tree.append(vector, float).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HomogeneousViolation);

        // Equivalent children are still fine
        let int2 = tree.new_integer(7, 0, 10).unwrap();
        tree.append(vector, int2).unwrap();
        assert_eq!(tree.child_count(vector).unwrap(), 2);

        // Same variant with different bounds is not equivalent
        let int3 = tree.new_integer(1, 0, 11).unwrap();
        let err = tree.append(vector, int3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HomogeneousViolation);
    }

    #[test]
    fn hetero_vector_takes_everything() {
        let mut tree = NodeTree::new();
        let vector = tree.new_vector(true);
        let int = tree.new_integer(1, 0, 10).unwrap();
        let text = tree.new_string("mixed");
        tree.append(vector, int).unwrap();
        tree.append(vector, text).unwrap();
        assert_eq!(tree.get_child(vector, 1).unwrap(), text);
        assert_eq!(tree.get(vector, "1").unwrap(), text);
        let err = tree.get_child(vector, 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChildIndexOutOfBounds);
    }

    #[test]
    fn structure_equivalence_ignores_order() {
        let mut tree = NodeTree::new();
        let a = tree.new_structure();
        let ax = tree.new_integer(0, 0, 10).unwrap();
        let ay = tree.new_string("");
        tree.set(a, "x", ax).unwrap();
        tree.set(a, "y", ay).unwrap();

        let b = tree.new_structure();
        let by = tree.new_string("other");
        let bx = tree.new_integer(5, 0, 10).unwrap();
        tree.set(b, "y", by).unwrap();
        tree.set(b, "x", bx).unwrap();

        assert!(tree.type_equivalent(a, b).unwrap());

        let c = tree.new_structure();
        let cx = tree.new_integer(0, 0, 11).unwrap();
        tree.set(c, "x", cx).unwrap();
        assert!(!tree.type_equivalent(a, c).unwrap());
    }

    #[test]
    fn downcast_errors() {
        let mut tree = NodeTree::new();
        let text = tree.new_string("hello");
        assert_eq!(tree.string_value(text).unwrap(), "hello");
        let err = tree.int_value(text).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadNodeDowncast);
    }

    #[test]
    fn scaled_integer_values() {
        let mut tree = NodeTree::new();
        let node = tree
            .new_scaled_integer(100, 0, 1000, 0.01, 5.0)
            .unwrap();
        assert_eq!(tree.scaled_raw_value(node).unwrap(), 100);
        assert_eq!(tree.scaled_value(node).unwrap(), 6.0);
        assert!(tree.new_scaled_integer(1, 0, 10, 0.0, 0.0).is_err());
    }

    #[test]
    fn numeric_bounds_are_enforced() {
        let mut tree = NodeTree::new();
        let err = tree.new_integer(101, 0, 100).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueOutOfBounds);
        let err = tree
            .new_float(2.0, FloatPrecision::Double, -1.0, 1.0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueOutOfBounds);
    }

    #[test]
    fn compressed_vector_children() {
        let mut tree = NodeTree::new();
        let proto = tree.new_structure();
        let x = tree.new_integer(0, 0, 1023).unwrap();
        tree.set(proto, "x", x).unwrap();
        let codecs = tree.new_vector(true);
        let cv = tree.new_compressed_vector(proto, codecs).unwrap();

        assert_eq!(tree.cv_prototype(cv).unwrap(), proto);
        assert_eq!(tree.cv_codecs(cv).unwrap(), codecs);
        assert_eq!(tree.cv_record_count(cv).unwrap(), 0);
        assert_eq!(tree.get(cv, "prototype/x").unwrap(), x);

        let root = tree.root();
        tree.set(root, "points", cv).unwrap();
        assert!(tree.is_attached(proto).unwrap());
        assert_eq!(tree.path_name(x).unwrap(), "/points/prototype/x");
    }

    #[test]
    fn sealed_prototype_is_immutable() {
        let mut tree = NodeTree::new();
        let proto = tree.new_structure();
        let x = tree.new_integer(0, 0, 1023).unwrap();
        tree.set(proto, "x", x).unwrap();
        let codecs = tree.new_vector(true);
        let cv = tree.new_compressed_vector(proto, codecs).unwrap();
        tree.seal_cv(cv).unwrap();

        let y = tree.new_integer(0, 0, 1).unwrap();
        let err = tree.set(proto, "y", y).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadPrototype);
    }

    #[test]
    fn extension_prefixes_in_paths() {
        let mut tree = NodeTree::new();
        let root = tree.root();
        let value = tree.new_string("custom");

        let err = tree.set(root, "demo:custom", value).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadPathName);

        tree.extensions_mut()
            .add("demo", "https://example.com/demo")
            .unwrap();
        tree.set(root, "demo:custom", value).unwrap();
        assert!(tree.is_defined(root, "demo:custom"));
        assert!(is_element_name_extended("demo:custom"));
    }

    #[test]
    fn invariants_and_dump() {
        let mut tree = NodeTree::new();
        let root = tree.root();
        let outer = tree.new_structure();
        let value = tree.new_integer(3, 0, 7).unwrap();
        tree.set(outer, "value", value).unwrap();
        tree.set(root, "outer", outer).unwrap();

        tree.check_invariant(root).unwrap();

        let mut dump = Vec::new();
        tree.dump(root, 0, &mut dump).unwrap();
        let dump = String::from_utf8(dump).unwrap();
        assert!(dump.contains("outer: Structure"));
        assert!(dump.contains("value: Integer 3"));
    }

    #[test]
    fn cycles_are_rejected() {
        let mut tree = NodeTree::new();
        let outer = tree.new_structure();
        let inner = tree.new_structure();
        tree.set(outer, "inner", inner).unwrap();
        let err = tree.set(inner, "outer", outer).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadApiArgument);

        let err = tree.set(outer, "self", outer).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadApiArgument);
    }
}
