use crate::error::Converter;
use crate::extension::E57_V1_0_URI;
use crate::node::{FloatPrecision, NodeId, NodeType};
use crate::tree::NodeTree;
use crate::{Error, ErrorKind, Result};
use roxmltree::{Document, Node};

/// Parses the XML section of an E57 file into the node tree skeleton.
///
/// The XML lexer is `roxmltree`, its document is replayed as a stream of
/// SAX-style events into a [`TreeBuilder`] that materializes the nodes.
pub(crate) fn parse_xml(tree: &mut NodeTree, xml: &str) -> Result<()> {
    let document =
        Document::parse(xml).kind_err(ErrorKind::XmlParser, "Failed to parse XML section")?;
    let root = document.root_element();

    // Namespace declarations on the root element repopulate the extension registry
    for ns in root.namespaces() {
        if let Some(name) = ns.name() {
            tree.extensions_mut().add(name, ns.uri())?;
        }
    }

    let mut builder = TreeBuilder::new(tree);
    walk(&mut builder, root)?;
    builder.end_document()
}

fn walk(builder: &mut TreeBuilder, node: Node) -> Result<()> {
    let tag = qualified_tag(&node);
    let attrs: Vec<(&str, &str)> = node.attributes().map(|a| (a.name(), a.value())).collect();
    builder.start_element(&tag, &attrs)?;
    for child in node.children() {
        if child.is_element() {
            walk(builder, child)?;
        } else if child.is_text() {
            builder.characters(child.text().unwrap_or_default())?;
        }
    }
    builder.end_element()
}

/// Restores the prefixed form of extension element names.
fn qualified_tag(node: &Node) -> String {
    let name = node.tag_name().name();
    match node.tag_name().namespace() {
        Some(uri) if uri != E57_V1_0_URI => match node.lookup_prefix(uri) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}:{name}"),
            _ => name.to_owned(),
        },
        _ => name.to_owned(),
    }
}

/// All the fields that need to be remembered while parsing one element.
/// Not all fields are used at the same time, this depends on the node type.
struct Descriptor {
    tag: String,
    node_type: NodeType,
    /// Containers are created up front so children can be attached on the fly.
    node: Option<NodeId>,
    text: String,
    minimum: Option<String>,
    maximum: Option<String>,
    scale: Option<String>,
    offset: Option<String>,
    precision: Option<String>,
    file_offset: Option<String>,
    length: Option<String>,
    record_count: Option<String>,
    prototype: Option<NodeId>,
    codecs: Option<NodeId>,
}

impl Descriptor {
    fn new(tag: &str, node_type: NodeType) -> Self {
        Self {
            tag: tag.to_owned(),
            node_type,
            node: None,
            text: String::new(),
            minimum: None,
            maximum: None,
            scale: None,
            offset: None,
            precision: None,
            file_offset: None,
            length: None,
            record_count: None,
            prototype: None,
            codecs: None,
        }
    }
}

/// Consumes SAX-style element events and produces nodes in the tree.
/// Keeps a stack of partially parsed descriptors for the current XML path.
pub(crate) struct TreeBuilder<'a> {
    tree: &'a mut NodeTree,
    stack: Vec<Descriptor>,
    done: bool,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(tree: &'a mut NodeTree) -> Self {
        Self {
            tree,
            stack: Vec::new(),
            done: false,
        }
    }

    pub fn start_element(&mut self, tag: &str, attrs: &[(&str, &str)]) -> Result<()> {
        if self.done {
            Error::failed(ErrorKind::XmlParser, "Multiple root elements in XML section")?
        }
        let type_attr = lookup(attrs, "type");

        if self.stack.is_empty() {
            // The root element maps onto the already existing tree root
            if let Some(value) = type_attr {
                if value != "Structure" {
                    Error::failed(
                        ErrorKind::BadXmlFormat,
                        "The root element must be a structure",
                    )?
                }
            }
            let mut descriptor = Descriptor::new(tag, NodeType::Structure);
            descriptor.node = Some(self.tree.root());
            self.stack.push(descriptor);
            return Ok(());
        }

        let type_attr = type_attr.kind_err(
            ErrorKind::XmlParser,
            format!("Missing type attribute for element '{tag}'"),
        )?;
        let node_type = NodeType::from_type_attribute(type_attr).kind_err(
            ErrorKind::BadXmlFormat,
            format!("Unknown node type '{type_attr}' for element '{tag}'"),
        )?;

        let mut descriptor = Descriptor::new(tag, node_type);
        match node_type {
            NodeType::Structure => {
                descriptor.node = Some(self.tree.new_structure());
            }
            NodeType::Vector => {
                let hetero = matches!(lookup(attrs, "allowHeterogeneousChildren"), Some("1"));
                descriptor.node = Some(self.tree.new_vector(hetero));
            }
            _ => {
                descriptor.minimum = lookup(attrs, "minimum").map(str::to_owned);
                descriptor.maximum = lookup(attrs, "maximum").map(str::to_owned);
                descriptor.scale = lookup(attrs, "scale").map(str::to_owned);
                descriptor.offset = lookup(attrs, "offset").map(str::to_owned);
                descriptor.precision = lookup(attrs, "precision").map(str::to_owned);
                descriptor.file_offset = lookup(attrs, "fileOffset").map(str::to_owned);
                descriptor.length = lookup(attrs, "length").map(str::to_owned);
                descriptor.record_count = lookup(attrs, "recordCount").map(str::to_owned);
            }
        }
        self.stack.push(descriptor);
        Ok(())
    }

    pub fn characters(&mut self, text: &str) -> Result<()> {
        match self.stack.last_mut() {
            Some(descriptor) => descriptor.text += text,
            None => {
                if !text.trim().is_empty() {
                    Error::failed(ErrorKind::XmlParser, "Unexpected text outside root element")?
                }
            }
        }
        Ok(())
    }

    pub fn end_element(&mut self) -> Result<()> {
        let descriptor = self
            .stack
            .pop()
            .internal_err("Element end without matching start")?;
        let id = self.materialize(&descriptor)?;

        match self.stack.last_mut() {
            None => {
                // The root element itself was closed
                self.done = true;
                Ok(())
            }
            Some(parent) => match parent.node_type {
                NodeType::Structure => {
                    let parent_node = parent.node.internal_err("Structure without node")?;
                    self.tree.set(parent_node, &descriptor.tag, id)
                }
                NodeType::Vector => {
                    let parent_node = parent.node.internal_err("Vector without node")?;
                    self.tree.append(parent_node, id)
                }
                NodeType::CompressedVector => match descriptor.tag.as_str() {
                    "prototype" => {
                        parent.prototype = Some(id);
                        Ok(())
                    }
                    "codecs" => {
                        parent.codecs = Some(id);
                        Ok(())
                    }
                    _ => Error::failed(
                        ErrorKind::XmlParser,
                        format!(
                            "Unexpected element '{}' inside a compressed vector",
                            descriptor.tag
                        ),
                    ),
                },
                _ => Error::failed(
                    ErrorKind::XmlParser,
                    format!("Element '{}' nested below a leaf node", descriptor.tag),
                ),
            },
        }
    }

    pub fn end_document(&self) -> Result<()> {
        if !self.done || !self.stack.is_empty() {
            Error::failed(ErrorKind::XmlParser, "XML section ended unexpectedly")?
        }
        Ok(())
    }

    fn materialize(&mut self, descriptor: &Descriptor) -> Result<NodeId> {
        Ok(match descriptor.node_type {
            NodeType::Structure | NodeType::Vector => {
                descriptor.node.internal_err("Container without node")?
            }
            NodeType::Integer => {
                let value = parse_i64(&descriptor.text, 0)?;
                let min = parse_opt_i64(&descriptor.minimum, i64::MIN)?;
                let max = parse_opt_i64(&descriptor.maximum, i64::MAX)?;
                self.tree.new_integer(value, min, max)?
            }
            NodeType::ScaledInteger => {
                let raw = parse_i64(&descriptor.text, 0)?;
                let min = parse_opt_i64(&descriptor.minimum, i64::MIN)?;
                let max = parse_opt_i64(&descriptor.maximum, i64::MAX)?;
                let scale = parse_opt_f64(&descriptor.scale, 1.0)?;
                let offset = parse_opt_f64(&descriptor.offset, 0.0)?;
                self.tree.new_scaled_integer(raw, min, max, scale, offset)?
            }
            NodeType::Float => {
                let precision = match descriptor.precision.as_deref() {
                    None | Some("double") => FloatPrecision::Double,
                    Some("single") => FloatPrecision::Single,
                    Some(other) => Error::failed(
                        ErrorKind::BadXmlFormat,
                        format!("Unknown float precision '{other}'"),
                    )?,
                };
                let (def_min, def_max) = match precision {
                    FloatPrecision::Single => (f32::MIN as f64, f32::MAX as f64),
                    FloatPrecision::Double => (f64::MIN, f64::MAX),
                };
                let value = parse_f64(&descriptor.text, 0.0)?;
                let min = parse_opt_f64(&descriptor.minimum, def_min)?;
                let max = parse_opt_f64(&descriptor.maximum, def_max)?;
                self.tree.new_float(value, precision, min, max)?
            }
            NodeType::String => self.tree.new_string(descriptor.text.clone()),
            NodeType::Blob => {
                let offset = descriptor.file_offset.as_deref().kind_err(
                    ErrorKind::BadXmlFormat,
                    "Missing 'fileOffset' attribute in blob element",
                )?;
                let offset = offset
                    .parse::<u64>()
                    .kind_err(ErrorKind::BadXmlFormat, "Cannot parse blob file offset")?;
                let length = descriptor.length.as_deref().kind_err(
                    ErrorKind::BadXmlFormat,
                    "Missing 'length' attribute in blob element",
                )?;
                let length = length
                    .parse::<u64>()
                    .kind_err(ErrorKind::BadXmlFormat, "Cannot parse blob length")?;
                self.tree.new_blob_node(offset, length)
            }
            NodeType::CompressedVector => {
                let prototype = descriptor.prototype.kind_err(
                    ErrorKind::XmlParser,
                    "Compressed vector without prototype element",
                )?;
                let codecs = match descriptor.codecs {
                    Some(codecs) => codecs,
                    None => self.tree.new_vector(true),
                };
                let cv = self.tree.new_compressed_vector(prototype, codecs)?;
                let offset = parse_opt_u64(&descriptor.file_offset, 0)?;
                let records = parse_opt_u64(&descriptor.record_count, 0)?;
                self.tree.finish_cv(cv, records, offset)?;
                cv
            }
        })
    }
}

fn lookup<'b>(attrs: &[(&str, &'b str)], name: &str) -> Option<&'b str> {
    attrs.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
}

/// Numeric element text is trimmed before parsing, empty text means default.
fn parse_i64(text: &str, default: i64) -> Result<i64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(default);
    }
    trimmed
        .parse::<i64>()
        .kind_err(ErrorKind::BadXmlFormat, "Cannot parse integer value")
}

fn parse_f64(text: &str, default: f64) -> Result<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(default);
    }
    trimmed
        .parse::<f64>()
        .kind_err(ErrorKind::BadXmlFormat, "Cannot parse float value")
}

fn parse_opt_i64(value: &Option<String>, default: i64) -> Result<i64> {
    match value {
        Some(text) => parse_i64(text, default),
        None => Ok(default),
    }
}

fn parse_opt_f64(value: &Option<String>, default: f64) -> Result<f64> {
    match value {
        Some(text) => parse_f64(text, default),
        None => Ok(default),
    }
}

fn parse_opt_u64(value: &Option<String>, default: u64) -> Result<u64> {
    match value {
        Some(text) => text
            .trim()
            .parse::<u64>()
            .kind_err(ErrorKind::BadXmlFormat, "Cannot parse unsigned value"),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml_write::serialize_xml;

    fn roundtrip(tree: &NodeTree) -> NodeTree {
        let xml = serialize_xml(tree).unwrap();
        let mut parsed = NodeTree::new();
        parse_xml(&mut parsed, &xml).unwrap();
        parsed
    }

    #[test]
    fn roundtrip_leaves() {
        let mut tree = NodeTree::new();
        let root = tree.root();
        let int = tree.new_integer(42, 0, 100).unwrap();
        tree.set(root, "answer", int).unwrap();
        let scaled = tree.new_scaled_integer(100, 0, 1000, 0.01, 5.0).unwrap();
        tree.set(root, "scaled", scaled).unwrap();
        let float = tree
            .new_float(1.25, FloatPrecision::Single, -10.0, 10.0)
            .unwrap();
        tree.set(root, "ratio", float).unwrap();
        let text = tree.new_string("hello <world> & \"friends\"");
        tree.set(root, "greeting", text).unwrap();

        let parsed = roundtrip(&tree);
        let root = parsed.root();
        let answer = parsed.get(root, "answer").unwrap();
        assert_eq!(parsed.int_value(answer).unwrap(), 42);
        assert_eq!(parsed.int_bounds(answer).unwrap(), (0, 100));

        let scaled = parsed.get(root, "scaled").unwrap();
        assert_eq!(parsed.scaled_raw_value(scaled).unwrap(), 100);
        assert_eq!(parsed.scaled_value(scaled).unwrap(), 6.0);

        let ratio = parsed.get(root, "ratio").unwrap();
        assert_eq!(parsed.float_value(ratio).unwrap(), 1.25);
        assert_eq!(
            parsed.float_precision(ratio).unwrap(),
            FloatPrecision::Single
        );

        let greeting = parsed.get(root, "greeting").unwrap();
        assert_eq!(
            parsed.string_value(greeting).unwrap(),
            "hello <world> & \"friends\""
        );

        parsed.check_invariant(root).unwrap();
    }

    #[test]
    fn roundtrip_containers() {
        let mut tree = NodeTree::new();
        let root = tree.root();
        let vector = tree.new_vector(false);
        for i in 0..3 {
            let child = tree.new_integer(i, 0, 10).unwrap();
            tree.append(vector, child).unwrap();
        }
        tree.set(root, "list", vector).unwrap();
        let nested = tree.new_structure();
        let deep = tree.new_string("deep");
        tree.set(nested, "inner", deep).unwrap();
        tree.set(root, "nested", nested).unwrap();

        let parsed = roundtrip(&tree);
        let root = parsed.root();
        let list = parsed.get(root, "list").unwrap();
        assert_eq!(parsed.child_count(list).unwrap(), 3);
        assert!(!parsed.vector_allow_hetero(list).unwrap());
        let second = parsed.get(root, "list/1").unwrap();
        assert_eq!(parsed.int_value(second).unwrap(), 1);
        let inner = parsed.get(root, "nested/inner").unwrap();
        assert_eq!(parsed.string_value(inner).unwrap(), "deep");
    }

    #[test]
    fn roundtrip_compressed_vector_and_blob() {
        let mut tree = NodeTree::new();
        let root = tree.root();
        let proto = tree.new_structure();
        let x = tree.new_integer(0, 0, 1023).unwrap();
        tree.set(proto, "x", x).unwrap();
        let codecs = tree.new_vector(true);
        let cv = tree.new_compressed_vector(proto, codecs).unwrap();
        tree.finish_cv(cv, 3, 48).unwrap();
        tree.set(root, "points", cv).unwrap();
        let blob = tree.new_blob_node(4711, 256);
        tree.set(root, "payload", blob).unwrap();

        let parsed = roundtrip(&tree);
        let root = parsed.root();
        let cv = parsed.get(root, "points").unwrap();
        assert_eq!(parsed.node_type(cv).unwrap(), NodeType::CompressedVector);
        assert_eq!(parsed.cv_record_count(cv).unwrap(), 3);
        assert_eq!(parsed.cv_file_offset(cv).unwrap(), 48);
        let x = parsed.get(cv, "prototype/x").unwrap();
        assert_eq!(parsed.int_bounds(x).unwrap(), (0, 1023));

        let blob = parsed.get(root, "payload").unwrap();
        assert_eq!(parsed.blob_length(blob).unwrap(), 256);
    }

    #[test]
    fn roundtrip_extension_elements() {
        let mut tree = NodeTree::new();
        tree.extensions_mut()
            .add("demo", "https://example.com/demo")
            .unwrap();
        let root = tree.root();
        let custom = tree.new_string("extended");
        tree.set(root, "demo:custom", custom).unwrap();

        let parsed = roundtrip(&tree);
        assert_eq!(
            parsed.extensions().lookup_prefix("demo"),
            Some("https://example.com/demo")
        );
        let root = parsed.root();
        let custom = parsed.get(root, "demo:custom").unwrap();
        assert_eq!(parsed.string_value(custom).unwrap(), "extended");
    }

    #[test]
    fn malformed_values_are_rejected() {
        let mut tree = NodeTree::new();
        let xml = "<e57Root type=\"Structure\">\
                   <bad type=\"Integer\">not-a-number</bad>\
                   </e57Root>";
        let err = parse_xml(&mut tree, xml).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadXmlFormat);
    }

    #[test]
    fn unknown_types_are_rejected() {
        let mut tree = NodeTree::new();
        let xml = "<e57Root type=\"Structure\">\
                   <bad type=\"Unicorn\"/>\
                   </e57Root>";
        let err = parse_xml(&mut tree, xml).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadXmlFormat);
    }

    #[test]
    fn nesting_below_leaves_is_rejected() {
        let mut tree = NodeTree::new();
        let xml = "<e57Root type=\"Structure\">\
                   <num type=\"Integer\"><sub type=\"Integer\">1</sub></num>\
                   </e57Root>";
        let err = parse_xml(&mut tree, xml).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::XmlParser);
    }

    #[test]
    fn broken_xml_is_rejected() {
        let mut tree = NodeTree::new();
        let err = parse_xml(&mut tree, "<e57Root><unclosed>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::XmlParser);
    }

    #[test]
    fn whitespace_around_numbers_is_trimmed() {
        let mut tree = NodeTree::new();
        let xml = "<e57Root type=\"Structure\">\
                   <num type=\"Integer\" minimum=\"0\" maximum=\"10\">  7 </num>\
                   </e57Root>";
        parse_xml(&mut tree, xml).unwrap();
        let num = tree.get(tree.root(), "num").unwrap();
        assert_eq!(tree.int_value(num).unwrap(), 7);
    }
}
