use crate::extension::E57_V1_0_URI;
use crate::node::{FloatPrecision, NodeId, NodeType};
use crate::tree::NodeTree;
use crate::Result;

/// Serializes the node tree of a file into its E57 XML section.
///
/// Numeric attributes that equal the implicit defaults of their variant
/// are omitted and restored by the parser on reading.
pub(crate) fn serialize_xml(tree: &NodeTree) -> Result<String> {
    let mut xml = String::new();
    xml += "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";
    xml += &format!("<e57Root type=\"Structure\" xmlns=\"{E57_V1_0_URI}\"");
    for ext in tree.extensions().iter() {
        xml += &format!(" xmlns:{}=\"{}\"", ext.prefix, escape(&ext.uri));
    }
    xml += ">\n";
    for child in tree.children_of(tree.root())? {
        let name = tree.element_name(child)?.to_owned();
        serialize_node(tree, child, &name, &mut xml)?;
    }
    xml += "</e57Root>\n";
    Ok(xml)
}

fn serialize_node(tree: &NodeTree, id: NodeId, tag: &str, xml: &mut String) -> Result<()> {
    match tree.node_type(id)? {
        NodeType::Structure => {
            *xml += &format!("<{tag} type=\"Structure\">\n");
            for child in tree.children_of(id)? {
                let name = tree.element_name(child)?.to_owned();
                serialize_node(tree, child, &name, xml)?;
            }
            *xml += &format!("</{tag}>\n");
        }
        NodeType::Vector => {
            *xml += &format!("<{tag} type=\"Vector\"");
            if tree.vector_allow_hetero(id)? {
                *xml += " allowHeterogeneousChildren=\"1\"";
            }
            *xml += ">\n";
            for child in tree.children_of(id)? {
                serialize_node(tree, child, "vectorChild", xml)?;
            }
            *xml += &format!("</{tag}>\n");
        }
        NodeType::CompressedVector => {
            *xml += &format!(
                "<{tag} type=\"CompressedVector\" fileOffset=\"{}\" recordCount=\"{}\">\n",
                tree.cv_file_offset(id)?,
                tree.cv_record_count(id)?
            );
            serialize_node(tree, tree.cv_prototype(id)?, "prototype", xml)?;
            serialize_node(tree, tree.cv_codecs(id)?, "codecs", xml)?;
            *xml += &format!("</{tag}>\n");
        }
        NodeType::Integer => {
            let (min, max) = tree.int_bounds(id)?;
            *xml += &format!("<{tag} type=\"Integer\"");
            if min != i64::MIN {
                *xml += &format!(" minimum=\"{min}\"");
            }
            if max != i64::MAX {
                *xml += &format!(" maximum=\"{max}\"");
            }
            *xml += &format!(">{}</{tag}>\n", tree.int_value(id)?);
        }
        NodeType::ScaledInteger => {
            let (min, max) = tree.scaled_bounds(id)?;
            let scale = tree.scaled_scale(id)?;
            let offset = tree.scaled_offset(id)?;
            *xml += &format!("<{tag} type=\"ScaledInteger\"");
            if min != i64::MIN {
                *xml += &format!(" minimum=\"{min}\"");
            }
            if max != i64::MAX {
                *xml += &format!(" maximum=\"{max}\"");
            }
            if scale != 1.0 {
                *xml += &format!(" scale=\"{scale}\"");
            }
            if offset != 0.0 {
                *xml += &format!(" offset=\"{offset}\"");
            }
            *xml += &format!(">{}</{tag}>\n", tree.scaled_raw_value(id)?);
        }
        NodeType::Float => {
            let (min, max) = tree.float_bounds(id)?;
            let precision = tree.float_precision(id)?;
            *xml += &format!("<{tag} type=\"Float\"");
            let (def_min, def_max) = match precision {
                FloatPrecision::Single => {
                    *xml += " precision=\"single\"";
                    (f32::MIN as f64, f32::MAX as f64)
                }
                FloatPrecision::Double => (f64::MIN, f64::MAX),
            };
            if min != def_min {
                *xml += &format!(" minimum=\"{min}\"");
            }
            if max != def_max {
                *xml += &format!(" maximum=\"{max}\"");
            }
            *xml += &format!(">{}</{tag}>\n", tree.float_value(id)?);
        }
        NodeType::String => {
            let value = tree.string_value(id)?;
            *xml += &format!("<{tag} type=\"String\">{}</{tag}>\n", escape(value));
        }
        NodeType::Blob => {
            *xml += &format!(
                "<{tag} type=\"Blob\" fileOffset=\"{}\" length=\"{}\"/>\n",
                tree.blob_offset(id)?,
                tree.blob_length(id)?
            );
        }
    }
    Ok(())
}

/// Escapes text for use in XML content and attribute values.
pub(crate) fn escape(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => result += "&amp;",
            '<' => result += "&lt;",
            '>' => result += "&gt;",
            '"' => result += "&quot;",
            '\'' => result += "&apos;",
            _ => result.push(c),
        }
    }
    result
}
