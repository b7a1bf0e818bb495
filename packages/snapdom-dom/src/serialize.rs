//! XHTML serialization of a subtree.
//!
//! The output lands inside an SVG `<foreignObject>`, so it must be
//! well-formed XML: every element is explicitly closed (void elements are
//! self-closed), text and attribute values are entity-escaped, and `<style>`
//! contents are escaped like ordinary text (XHTML has no raw-text elements).

use std::fmt::Write;

use markup5ever::{LocalName, local_name};

use crate::Document;
use crate::node::NodeData;

/// Serializes the subtree rooted at `node_id` into `out`.
pub fn serialize_subtree(doc: &Document, node_id: usize, out: &mut String) {
    let Some(node) = doc.get_node(node_id) else {
        return;
    };

    match &node.data {
        NodeData::Document => {
            for child in &node.children {
                serialize_subtree(doc, *child, out);
            }
        }
        NodeData::Text(data) => {
            out.push_str(&html_escape::encode_text(&data.content));
        }
        NodeData::Comment => {}
        NodeData::Element(data) => {
            let tag = &data.name.local;
            out.push('<');
            out.push_str(tag);
            for attr in &data.attrs {
                let _ = write!(
                    out,
                    " {}=\"{}\"",
                    qualified_attr_name(&attr.name),
                    html_escape::encode_double_quoted_attribute(&attr.value)
                );
            }
            if node.children.is_empty() && is_void_element(tag) {
                out.push_str("/>");
                return;
            }
            out.push('>');
            for child in &node.children {
                serialize_subtree(doc, *child, out);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
    }
}

fn qualified_attr_name(name: &markup5ever::QualName) -> String {
    match &name.prefix {
        Some(prefix) => format!("{}:{}", prefix, name.local),
        None => name.local.to_string(),
    }
}

pub fn is_void_element(tag: &LocalName) -> bool {
    matches!(
        *tag,
        local_name!("area")
            | local_name!("base")
            | local_name!("br")
            | local_name!("col")
            | local_name!("embed")
            | local_name!("hr")
            | local_name!("img")
            | local_name!("input")
            | local_name!("link")
            | local_name!("meta")
            | local_name!("param")
            | local_name!("source")
            | local_name!("track")
            | local_name!("wbr")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, DocumentConfig};

    #[test]
    fn serializes_nested_markup() {
        let mut doc = Document::new(DocumentConfig::default());
        let div = doc.create_element("div", &[("class", "c1")]);
        let img = doc.create_element("img", &[("src", "data:image/png;base64,AA==")]);
        let text = doc.create_text_node("a < b & c");
        doc.append_child(0, div);
        doc.append_child(div, img);
        doc.append_child(div, text);

        let mut out = String::new();
        serialize_subtree(&doc, div, &mut out);
        assert_eq!(
            out,
            "<div class=\"c1\"><img src=\"data:image/png;base64,AA==\"/>a &lt; b &amp; c</div>"
        );
    }

    #[test]
    fn escapes_attribute_values() {
        let mut doc = Document::new(DocumentConfig::default());
        let div = doc.create_element("div", &[("title", "say \"hi\" & <go>")]);
        doc.append_child(0, div);

        let mut out = String::new();
        serialize_subtree(&doc, div, &mut out);
        assert!(out.contains("&quot;hi&quot;"));
        assert!(!out.contains("<go>"));
    }

    #[test]
    fn non_void_empty_elements_get_end_tags() {
        let mut doc = Document::new(DocumentConfig::default());
        let span = doc.create_element("span", &[]);
        doc.append_child(0, span);

        let mut out = String::new();
        serialize_subtree(&doc, span, &mut out);
        assert_eq!(out, "<span></span>");
    }
}
