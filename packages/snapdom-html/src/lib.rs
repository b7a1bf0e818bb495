//! An implementation of html5ever's sink trait, allowing us to parse HTML
//! into a snapdom [`Document`].
//!
//! Parsing a snapshot is simpler than parsing for a live engine: no network
//! requests are issued and no cascade runs. Instead, every element's
//! resolved style map is seeded from its inline `style` attribute (embedders
//! with richer style knowledge overwrite these afterwards), `<style>`
//! elements are registered as inline stylesheet sources, and
//! `<link rel="stylesheet">` elements are recorded with their origin so the
//! capture engine can decide whether their rules are readable.

use std::borrow::Cow;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashSet;

use html5ever::{
    QualName, local_name,
    tendril::{StrTendril, TendrilSink},
    tree_builder::{ElementFlags, NodeOrText, QuirksMode, TreeSink},
};
use snapdom_dom::node::{Attribute, ElementNodeData, Node, NodeData};
use snapdom_dom::style::StyleMap;
use snapdom_dom::Document;

/// Convert an html5ever Attribute which uses tendril for its value to a
/// snapdom Attribute which uses String.
fn to_dom_attr(attr: html5ever::Attribute) -> Attribute {
    Attribute {
        name: attr.name,
        value: attr.value.to_string(),
    }
}

pub struct DocumentHtmlParser<'a> {
    doc: RefCell<&'a mut Document>,
    style_nodes: RefCell<Vec<usize>>,
    link_nodes: RefCell<Vec<usize>>,

    /// Errors that occurred during parsing.
    pub errors: RefCell<Vec<Cow<'static, str>>>,

    /// The document's quirks mode.
    pub quirks_mode: Cell<QuirksMode>,
}

impl DocumentHtmlParser<'_> {
    pub fn new(doc: &mut Document) -> DocumentHtmlParser<'_> {
        DocumentHtmlParser {
            doc: RefCell::new(doc),
            style_nodes: RefCell::new(Vec::new()),
            link_nodes: RefCell::new(Vec::new()),
            errors: RefCell::new(Vec::new()),
            quirks_mode: Cell::new(QuirksMode::NoQuirks),
        }
    }

    pub fn parse_into_doc<'d>(doc: &'d mut Document, html: &str) -> &'d mut Document {
        let sink = Self::new(doc);
        html5ever::parse_document(sink, Default::default())
            .from_utf8()
            .read_from(&mut html.as_bytes())
            .expect("parsing from an in-memory byte slice cannot fail")
    }

    #[track_caller]
    fn create_node(&self, node_data: NodeData) -> usize {
        self.doc.borrow_mut().create_node(node_data)
    }

    #[track_caller]
    fn create_text_node(&self, text: &str) -> usize {
        self.doc.borrow_mut().create_text_node(text)
    }

    #[track_caller]
    fn node(&self, id: usize) -> Ref<'_, Node> {
        Ref::map(self.doc.borrow(), |doc| {
            doc.get_node(id).expect("node ids created by the parser are never dropped")
        })
    }

    #[track_caller]
    fn node_mut(&self, id: usize) -> RefMut<'_, Node> {
        RefMut::map(self.doc.borrow_mut(), |doc| {
            doc.get_node_mut(id).expect("node ids created by the parser are never dropped")
        })
    }

    fn try_append_text_to_text_node(&self, node_id: Option<usize>, text: &str) -> bool {
        let Some(node_id) = node_id else {
            return false;
        };
        let mut node = self.node_mut(node_id);

        match node.text_data_mut() {
            Some(data) => {
                data.content += text;
                true
            }
            None => false,
        }
    }

    fn last_child(&self, parent_id: usize) -> Option<usize> {
        self.node(parent_id).children.last().copied()
    }

    /// Seed the element's resolved style map from its inline `style`
    /// attribute. Embedders overwrite these when they know more.
    fn seed_styles_from_style_attr(&self, target_id: usize) {
        let css = self
            .node(target_id)
            .attr(local_name!("style"))
            .map(str::to_string);
        if let Some(css) = css {
            let map = StyleMap::from_inline_css(&css);
            if !map.is_empty() {
                self.doc.borrow_mut().set_styles(target_id, map);
            }
        }
    }

    fn register_linked_stylesheet(&self, target_id: usize) {
        let node = self.node(target_id);
        let rel_attr = node.attr(local_name!("rel"));
        let href_attr = node.attr(local_name!("href"));

        if let (Some(rel), Some(href)) = (rel_attr, href_attr) {
            if rel.eq_ignore_ascii_case("stylesheet") && !href.is_empty() {
                let href = href.to_string();
                drop(node);
                self.doc
                    .borrow_mut()
                    .add_linked_stylesheet(target_id, &href);
            }
        }
    }
}

impl<'b> TreeSink for DocumentHtmlParser<'b> {
    type Output = &'b mut Document;

    // we use the ID of the nodes in the tree as the handle
    type Handle = usize;

    type ElemName<'a>
        = Ref<'a, QualName>
    where
        Self: 'a;

    fn finish(self) -> Self::Output {
        let doc = self.doc.into_inner();

        // Register inline stylesheets (<style> elements) in document order
        for id in self.style_nodes.borrow().iter() {
            doc.process_style_element(*id);
        }

        for error in self.errors.borrow().iter() {
            tracing::debug!("parse error: {error}");
        }

        doc
    }

    fn parse_error(&self, msg: Cow<'static, str>) {
        self.errors.borrow_mut().push(msg);
    }

    fn get_document(&self) -> Self::Handle {
        0
    }

    fn elem_name<'a>(&'a self, target: &'a Self::Handle) -> Self::ElemName<'a> {
        Ref::map(self.doc.borrow(), |doc| {
            &doc.get_node(*target)
                .and_then(|node| node.element_data())
                .expect("TreeSink::elem_name called on a node which is not an element!")
                .name
        })
    }

    fn create_element(
        &self,
        name: QualName,
        attrs: Vec<html5ever::Attribute>,
        _flags: ElementFlags,
    ) -> Self::Handle {
        let attrs = attrs.into_iter().map(to_dom_attr).collect();
        let data = ElementNodeData::new(name.clone(), attrs);
        let id = self.create_node(NodeData::Element(data));

        self.seed_styles_from_style_attr(id);

        // Custom post-processing by element tag name
        match name.local.as_ref() {
            "link" => self.link_nodes.borrow_mut().push(id),
            "style" => self.style_nodes.borrow_mut().push(id),
            _ => {}
        }

        id
    }

    fn create_comment(&self, _text: StrTendril) -> Self::Handle {
        self.create_node(NodeData::Comment)
    }

    fn create_pi(&self, _target: StrTendril, _data: StrTendril) -> Self::Handle {
        self.create_node(NodeData::Comment)
    }

    fn append(&self, parent_id: &Self::Handle, child: NodeOrText<Self::Handle>) {
        match child {
            NodeOrText::AppendNode(child_id) => {
                self.node_mut(*parent_id).children.push(child_id);
                self.node_mut(child_id).parent = Some(*parent_id);

                // <link> targets are only interesting once their attributes
                // are final, which is guaranteed by insertion time.
                if self
                    .node(child_id)
                    .data
                    .is_element_with_tag_name(&local_name!("link"))
                {
                    self.register_linked_stylesheet(child_id);
                }
            }
            NodeOrText::AppendText(text) => {
                let last_child_id = self.last_child(*parent_id);
                let has_appended = self.try_append_text_to_text_node(last_child_id, &text);
                if !has_appended {
                    let id = self.create_text_node(&text);
                    self.append(parent_id, NodeOrText::AppendNode(id));
                }
            }
        }
    }

    // Note: The tree builder promises we won't have a text node after the
    // insertion point.
    fn append_before_sibling(&self, sibling_id: &Self::Handle, new_node: NodeOrText<Self::Handle>) {
        let sibling = self.node(*sibling_id);
        let parent_id = sibling.parent.expect("sibling has no parent");
        let parent = self.node(parent_id);
        let sibling_pos = parent
            .children
            .iter()
            .position(|cid| cid == sibling_id)
            .expect("sibling is not a child of parent");

        // If node to append is a text node, first attempt to merge it into
        // the preceding text node
        let new_child_id = match new_node {
            NodeOrText::AppendText(text) => {
                let previous_sibling_id = match sibling_pos {
                    0 => None,
                    other => Some(parent.children[other - 1]),
                };
                let has_appended = self.try_append_text_to_text_node(previous_sibling_id, &text);
                if has_appended {
                    return;
                } else {
                    self.create_text_node(&text)
                }
            }
            NodeOrText::AppendNode(id) => id,
        };

        drop(parent);
        drop(sibling);

        self.node_mut(new_child_id).parent = Some(parent_id);
        self.node_mut(parent_id)
            .children
            .insert(sibling_pos, new_child_id);
    }

    fn append_based_on_parent_node(
        &self,
        element: &Self::Handle,
        prev_element: &Self::Handle,
        child: NodeOrText<Self::Handle>,
    ) {
        let has_parent = self.node(*element).parent.is_some();
        if has_parent {
            self.append_before_sibling(element, child);
        } else {
            self.append(prev_element, child);
        }
    }

    fn append_doctype_to_document(
        &self,
        _name: StrTendril,
        _public_id: StrTendril,
        _system_id: StrTendril,
    ) {
        // A snapshot has no use for the DOCTYPE.
    }

    fn get_template_contents(&self, target: &Self::Handle) -> Self::Handle {
        // Templates don't render; their contents never reach a capture.
        *target
    }

    fn same_node(&self, x: &Self::Handle, y: &Self::Handle) -> bool {
        x == y
    }

    fn set_quirks_mode(&self, mode: QuirksMode) {
        self.quirks_mode.set(mode);
    }

    fn add_attrs_if_missing(&self, target: &Self::Handle, attrs: Vec<html5ever::Attribute>) {
        let mut node = self.node_mut(*target);
        let element_data = node.element_data_mut().expect("not an element");

        let existing_names = element_data
            .attrs
            .iter()
            .map(|e| e.name.clone())
            .collect::<HashSet<_>>();

        element_data.attrs.extend(
            attrs
                .into_iter()
                .map(to_dom_attr)
                .filter(|attr| !existing_names.contains(&attr.name)),
        );
        drop(node);
        self.seed_styles_from_style_attr(*target);
    }

    fn remove_from_parent(&self, target: &Self::Handle) {
        self.doc.borrow_mut().detach(*target);
    }

    fn reparent_children(&self, node_id: &Self::Handle, new_parent_id: &Self::Handle) {
        // Take children array from old parent
        let children = std::mem::take(&mut self.node_mut(*node_id).children);

        // Update parent reference of children
        for child_id in children.iter() {
            self.node_mut(*child_id).parent = Some(*new_parent_id);
        }

        // Add children to new parent
        self.node_mut(*new_parent_id).children.extend(&children);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapdom_dom::document::DocumentConfig;
    use snapdom_dom::stylesheet::StylesheetOrigin;

    #[test]
    fn parses_some_html() {
        let html = "<!DOCTYPE html><html><body><h1 style=\"color: red\">hello world</h1></body></html>";
        let mut doc = Document::new(DocumentConfig::default());
        DocumentHtmlParser::parse_into_doc(&mut doc, html);

        let h1 = snapdom_dom::TreeTraverser::new(&doc)
            .find(|id| doc.get_node(*id).unwrap().tag_name() == Some("h1"))
            .unwrap();
        assert_eq!(doc.text_content(h1), "hello world");
        assert_eq!(
            doc.styles(h1).primary.as_ref().unwrap().get("color"),
            Some("red")
        );
    }

    #[test]
    fn registers_style_and_link_elements() {
        let html = r#"
            <html><head>
                <style>.a::before { content: "x"; }</style>
                <link rel="stylesheet" href="https://cdn.example/site.css">
            </head><body><div class="a"></div></body></html>
        "#;
        let mut doc = Document::new(DocumentConfig {
            base_url: Some("https://example.com/".to_string()),
        });
        DocumentHtmlParser::parse_into_doc(&mut doc, html);

        assert_eq!(doc.stylesheets.len(), 2);
        let inline = &doc.stylesheets[1];
        assert!(matches!(inline.origin, StylesheetOrigin::Inline { .. }));
        assert!(inline.text.as_ref().unwrap().contains("::before"));

        let linked = &doc.stylesheets[0];
        match &linked.origin {
            StylesheetOrigin::Linked {
                href, same_origin, ..
            } => {
                assert_eq!(href, "https://cdn.example/site.css");
                assert!(!same_origin);
            }
            other => panic!("expected linked stylesheet, got {other:?}"),
        }
    }

    #[test]
    fn merges_adjacent_text() {
        let mut doc = Document::new(DocumentConfig::default());
        DocumentHtmlParser::parse_into_doc(&mut doc, "<p>a<!-- split -->b</p>");
        let p = snapdom_dom::TreeTraverser::new(&doc)
            .find(|id| doc.get_node(*id).unwrap().tag_name() == Some("p"))
            .unwrap();
        assert_eq!(doc.text_content(p), "ab");
    }
}
