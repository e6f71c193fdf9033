/// Identifies the variant of an E57 element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeType {
    /// Ordered mapping from unique element names to child nodes.
    Structure = 1,
    /// Ordered sequence of child nodes, optionally heterogeneous.
    Vector = 2,
    /// Prototype-described record stream stored in a binary section.
    CompressedVector = 3,
    /// 64 bit signed integer value with bounds.
    Integer = 4,
    /// Raw integer with scale and offset applied at the API boundary.
    ScaledInteger = 5,
    /// IEEE 754 floating point value with bounds.
    Float = 6,
    /// UTF-8 string value.
    String = 7,
    /// Opaque binary section referenced by offset and length.
    Blob = 8,
}

impl NodeType {
    /// XML value of the `type` attribute for this variant.
    pub fn type_attribute(&self) -> &'static str {
        match self {
            NodeType::Structure => "Structure",
            NodeType::Vector => "Vector",
            NodeType::CompressedVector => "CompressedVector",
            NodeType::Integer => "Integer",
            NodeType::ScaledInteger => "ScaledInteger",
            NodeType::Float => "Float",
            NodeType::String => "String",
            NodeType::Blob => "Blob",
        }
    }

    pub(crate) fn from_type_attribute(value: &str) -> Option<Self> {
        Some(match value {
            "Structure" => NodeType::Structure,
            "Vector" => NodeType::Vector,
            "CompressedVector" => NodeType::CompressedVector,
            "Integer" => NodeType::Integer,
            "ScaledInteger" => NodeType::ScaledInteger,
            "Float" => NodeType::Float,
            "String" => NodeType::String,
            "Blob" => NodeType::Blob,
            _ => return None,
        })
    }
}

/// The IEEE 754 floating point precisions supported by float nodes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FloatPrecision {
    /// 32 bit IEEE 754 floating point number.
    Single,
    /// 64 bit IEEE 754 floating point number.
    #[default]
    Double,
}

/// Handle identifying one node inside the tree of an open E57 file.
///
/// Handles are small copyable values and stay valid as long as
/// the file they were created from is open.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub(crate) file: u32,
    pub(crate) index: u32,
}

/// Variant payload of one node in the tree arena.
#[derive(Clone, Debug)]
pub(crate) enum NodeValue {
    Structure {
        children: Vec<NodeId>,
    },
    Vector {
        children: Vec<NodeId>,
        allow_hetero: bool,
    },
    CompressedVector {
        prototype: NodeId,
        codecs: NodeId,
        record_count: u64,
        binary_offset: u64,
        sealed: bool,
    },
    Integer {
        value: i64,
        min: i64,
        max: i64,
    },
    ScaledInteger {
        raw: i64,
        min: i64,
        max: i64,
        scale: f64,
        offset: f64,
    },
    Float {
        value: f64,
        precision: FloatPrecision,
        min: f64,
        max: f64,
    },
    String {
        value: String,
    },
    Blob {
        offset: u64,
        length: u64,
    },
}

impl NodeValue {
    pub(crate) fn node_type(&self) -> NodeType {
        match self {
            NodeValue::Structure { .. } => NodeType::Structure,
            NodeValue::Vector { .. } => NodeType::Vector,
            NodeValue::CompressedVector { .. } => NodeType::CompressedVector,
            NodeValue::Integer { .. } => NodeType::Integer,
            NodeValue::ScaledInteger { .. } => NodeType::ScaledInteger,
            NodeValue::Float { .. } => NodeType::Float,
            NodeValue::String { .. } => NodeType::String,
            NodeValue::Blob { .. } => NodeType::Blob,
        }
    }
}

/// One entry of the tree arena: common header plus variant payload.
#[derive(Clone, Debug)]
pub(crate) struct NodeData {
    pub name: String,
    pub parent: Option<NodeId>,
    pub attached: bool,
    pub value: NodeValue,
}

impl NodeData {
    pub(crate) fn new(value: NodeValue) -> Self {
        Self {
            name: String::new(),
            parent: None,
            attached: false,
            value,
        }
    }
}
