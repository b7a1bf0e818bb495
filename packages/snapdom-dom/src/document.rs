use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use markup5ever::{LocalName, QualName, namespace_url, ns};
use rustc_hash::FxHashMap;
use slab::Slab;
use snapdom_traits::Rect;

use crate::fonts::FontRegistry;
use crate::node::{Attribute, ElementNodeData, Node, NodeData, TextNodeData};
use crate::style::{ElementStyles, PseudoKind, StyleMap};
use crate::stylesheet::{StylesheetOrigin, StylesheetSource};
use crate::url::DocumentUrl;

/// Options used when constructing a [`Document`].
#[derive(Default)]
pub struct DocumentConfig {
    /// The base url which relative URLs are resolved against
    pub base_url: Option<String>,
}

/// A payload registered for a `blob:` URL. The capture engine rewrites such
/// URLs into data URIs by looking them up here.
#[derive(Clone)]
pub struct BlobEntry {
    pub mime: String,
    pub bytes: Bytes,
}

/// A snapshot document: a slab-backed tree of nodes plus the document-level
/// registries the capture pipeline reads (stylesheets, fonts, blobs).
///
/// Node 0 is always the `Document` node.
pub struct Document {
    /// ID of the document
    id: usize,

    /// Base url for resolving linked resources
    pub(crate) url: DocumentUrl,

    /// A slab-backed tree of nodes
    pub(crate) nodes: Box<Slab<Node>>,

    /// Map of id attribute to node id for fast lookups
    pub(crate) nodes_to_id: FxHashMap<String, usize>,

    /// Stylesheet sources in document order
    pub stylesheets: Vec<StylesheetSource>,

    /// Registered font faces (the `document.fonts` analog)
    pub fonts: FontRegistry,

    /// Payloads for `blob:` URLs minted by the embedder
    blob_store: FxHashMap<String, BlobEntry>,
}

impl Document {
    /// Create a new (empty) [`Document`] with the specified configuration
    pub fn new(config: DocumentConfig) -> Self {
        static ID_GENERATOR: AtomicUsize = AtomicUsize::new(1);
        let id = ID_GENERATOR.fetch_add(1, Ordering::SeqCst);

        let url = config
            .base_url
            .and_then(|url| DocumentUrl::from_str(&url).ok())
            .unwrap_or_default();

        let mut doc = Self {
            id,
            url,
            nodes: Box::new(Slab::new()),
            nodes_to_id: FxHashMap::default(),
            stylesheets: Vec::new(),
            fonts: FontRegistry::default(),
            blob_store: FxHashMap::default(),
        };

        // Initialise document with root Document node
        doc.create_node(NodeData::Document);
        doc
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn base_url(&self) -> &DocumentUrl {
        &self.url
    }

    pub fn set_base_url(&mut self, url: &str) {
        if let Ok(parsed) = DocumentUrl::from_str(url) {
            self.url = parsed;
        }
    }

    /// Resolves a possibly-relative URL reference against the document base.
    pub fn resolve_url(&self, raw: &str) -> Option<url::Url> {
        self.url.resolve_relative(raw)
    }

    /// Whether an absolute URL shares the document's origin.
    pub fn is_same_origin(&self, url: &url::Url) -> bool {
        self.url.is_same_origin(url)
    }

    // ------- nodes -------

    pub fn create_node(&mut self, node_data: NodeData) -> usize {
        let entry = self.nodes.vacant_entry();
        let id = entry.key();
        entry.insert(Node::new(id, node_data));

        // If the node has an "id" attribute, index it.
        if let Some(id_attr) = self.nodes[id].element_data().and_then(|el| el.id.clone()) {
            self.nodes_to_id.entry(id_attr).or_insert(id);
        }
        id
    }

    pub fn create_text_node(&mut self, text: &str) -> usize {
        self.create_node(NodeData::Text(TextNodeData::new(text.to_string())))
    }

    /// Convenience: create an element in the HTML namespace with string
    /// attributes.
    pub fn create_element(&mut self, tag: &str, attrs: &[(&str, &str)]) -> usize {
        let name = QualName::new(None, ns!(html), LocalName::from(tag));
        let attrs = attrs
            .iter()
            .map(|(k, v)| Attribute {
                name: QualName::new(None, ns!(), LocalName::from(*k)),
                value: v.to_string(),
            })
            .collect();
        self.create_node(NodeData::Element(ElementNodeData::new(name, attrs)))
    }

    pub fn get_node(&self, node_id: usize) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn get_node_mut(&mut self, node_id: usize) -> Option<&mut Node> {
        self.nodes.get_mut(node_id)
    }

    pub fn root_node(&self) -> &Node {
        &self.nodes[0]
    }

    /// First element child of the document node, if any.
    pub fn try_root_element(&self) -> Option<&Node> {
        self.nodes[0]
            .children
            .iter()
            .map(|id| &self.nodes[*id])
            .find(|node| node.is_element())
    }

    /// First node (in document order) whose id attribute matches.
    pub fn element_by_dom_id(&self, dom_id: &str) -> Option<usize> {
        self.nodes_to_id.get(dom_id).copied()
    }

    // ------- tree surgery -------

    pub fn append_child(&mut self, parent_id: usize, child_id: usize) {
        self.detach(child_id);
        self.nodes[child_id].parent = Some(parent_id);
        self.nodes[parent_id].children.push(child_id);
    }

    pub fn prepend_child(&mut self, parent_id: usize, child_id: usize) {
        self.insert_child_at(parent_id, child_id, 0);
    }

    pub fn insert_child_at(&mut self, parent_id: usize, child_id: usize, index: usize) {
        self.detach(child_id);
        self.nodes[child_id].parent = Some(parent_id);
        let children = &mut self.nodes[parent_id].children;
        let index = index.min(children.len());
        children.insert(index, child_id);
    }

    pub fn insert_before(&mut self, sibling_id: usize, new_id: usize) {
        let Some(parent_id) = self.nodes.get(sibling_id).and_then(|n| n.parent) else {
            return;
        };
        let index = self.nodes[parent_id]
            .children
            .iter()
            .position(|id| *id == sibling_id)
            .unwrap_or(0);
        self.insert_child_at(parent_id, new_id, index);
    }

    /// Unlinks a node from its parent without dropping it. A no-op for ids
    /// that are no longer in the arena.
    pub fn detach(&mut self, node_id: usize) {
        let Some(node) = self.nodes.get_mut(node_id) else {
            return;
        };
        if let Some(parent_id) = node.parent.take() {
            if let Some(parent) = self.nodes.get_mut(parent_id) {
                parent.children.retain(|id| *id != node_id);
            }
        }
    }

    /// Detaches a node and drops its whole subtree from the arena.
    pub fn remove_subtree(&mut self, node_id: usize) {
        self.detach(node_id);
        self.drop_subtree_ignoring_parent(node_id);
    }

    fn drop_subtree_ignoring_parent(&mut self, node_id: usize) {
        let Some(node) = self.nodes.try_remove(node_id) else {
            return;
        };
        if let Some(shadow) = node.element_data().and_then(|el| el.shadow.as_ref()) {
            let shadow_root = shadow.root;
            self.drop_subtree_ignoring_parent(shadow_root);
        }
        for child in node.children {
            self.drop_subtree_ignoring_parent(child);
        }
    }

    /// Replaces `old_id` with `new_id` in `old_id`'s parent, dropping the old
    /// subtree.
    pub fn replace_subtree(&mut self, old_id: usize, new_id: usize) {
        let Some(parent_id) = self.nodes.get(old_id).and_then(|n| n.parent) else {
            return;
        };
        let index = self.nodes[parent_id]
            .children
            .iter()
            .position(|id| *id == old_id)
            .unwrap_or(0);
        self.remove_subtree(old_id);
        self.insert_child_at(parent_id, new_id, index);
    }

    /// Deep-clones a subtree within the arena, carrying styles and rects.
    /// Shadow and iframe payloads are not cloned (see
    /// [`Node::clone_data_shallow`]).
    pub fn deep_clone_node(&mut self, node_id: usize) -> usize {
        let node = &self.nodes[node_id];
        let data = node.clone_data_shallow();
        let styles = node.styles.clone();
        let rect = node.rect;
        let children = node.children.clone();

        let new_node_id = self.create_node(data);
        self.nodes[new_node_id].styles = styles;
        self.nodes[new_node_id].rect = rect;

        let new_children: Vec<usize> = children
            .into_iter()
            .map(|child_id| self.deep_clone_node(child_id))
            .collect();
        for &child_id in &new_children {
            self.nodes[child_id].parent = Some(new_node_id);
        }
        self.nodes[new_node_id].children = new_children;

        new_node_id
    }

    // ------- resolved style & geometry (embedder surface) -------

    pub fn set_rect(&mut self, node_id: usize, rect: Rect) {
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.rect = rect;
        }
    }

    pub fn set_styles(&mut self, node_id: usize, styles: StyleMap) {
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.styles.primary = Some(std::sync::Arc::new(styles));
        }
    }

    pub fn set_pseudo_styles(&mut self, node_id: usize, kind: PseudoKind, styles: StyleMap) {
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.styles.set_pseudo(kind, std::sync::Arc::new(styles));
        }
    }

    pub fn styles(&self, node_id: usize) -> &ElementStyles {
        &self.nodes[node_id].styles
    }

    // ------- shadow DOM -------

    /// Attaches a shadow root to `host_id` and returns the arena id of the
    /// shadow content container. Children created under that container form
    /// the shadow tree; light-DOM children of the host remain the slottable
    /// content.
    pub fn attach_shadow_root(&mut self, host_id: usize, adopted_css: Vec<String>) -> usize {
        let container = self.create_node(NodeData::Document);
        if let Some(el) = self.nodes[host_id].element_data_mut() {
            el.shadow = Some(crate::node::ShadowRootData {
                root: container,
                adopted_css,
            });
        }
        container
    }

    /// Attaches a content document to an `<iframe>` element (the
    /// same-origin case; cross-origin frames simply have none).
    pub fn set_iframe_document(&mut self, node_id: usize, document: Document) {
        if let Some(el) = self
            .nodes
            .get_mut(node_id)
            .and_then(|node| node.element_data_mut())
        {
            el.special_data = crate::node::SpecialData::Iframe(Box::new(crate::node::IframeData {
                document: Some(document),
            }));
        }
    }

    // ------- blobs -------

    /// Registers the payload behind a `blob:` URL.
    pub fn register_blob(&mut self, url: impl Into<String>, mime: &str, bytes: Bytes) {
        self.blob_store.insert(
            url.into(),
            BlobEntry {
                mime: mime.to_string(),
                bytes,
            },
        );
    }

    pub fn blob_entry(&self, url: &str) -> Option<&BlobEntry> {
        self.blob_store.get(url)
    }

    // ------- stylesheets -------

    /// Registers the text of a `<style>` element as an inline stylesheet.
    pub fn process_style_element(&mut self, target_id: usize) {
        let css = self.text_content(target_id);
        let css = html_escape::decode_html_entities(&css).into_owned();
        self.stylesheets.push(StylesheetSource::inline(target_id, css));
    }

    /// Registers a `<link rel="stylesheet">`. The text is filled in lazily
    /// by whoever fetches it.
    pub fn add_linked_stylesheet(&mut self, node_id: usize, href: &str) {
        let same_origin = self
            .resolve_url(href)
            .map(|url| self.is_same_origin(&url))
            .unwrap_or(true);
        self.stylesheets.push(StylesheetSource {
            origin: StylesheetOrigin::Linked {
                node: Some(node_id),
                href: href.to_string(),
                same_origin,
            },
            text: None,
        });
    }

    pub fn add_adopted_stylesheet(&mut self, css: impl Into<String>) {
        self.stylesheets.push(StylesheetSource {
            origin: StylesheetOrigin::Adopted,
            text: Some(css.into()),
        });
    }

    /// Engine-owned stylesheet injection (the `document.head` analog).
    /// Replaces any previous sheet with the same tag.
    pub fn set_engine_stylesheet(&mut self, tag: &str, css: impl Into<String>) {
        self.remove_engine_stylesheet(tag);
        self.stylesheets.push(StylesheetSource {
            origin: StylesheetOrigin::Engine {
                tag: tag.to_string(),
            },
            text: Some(css.into()),
        });
    }

    pub fn remove_engine_stylesheet(&mut self, tag: &str) {
        self.stylesheets.retain(
            |sheet| !matches!(&sheet.origin, StylesheetOrigin::Engine { tag: t } if t == tag),
        );
    }

    pub fn engine_stylesheet(&self, tag: &str) -> Option<&StylesheetSource> {
        self.stylesheets
            .iter()
            .find(|sheet| matches!(&sheet.origin, StylesheetOrigin::Engine { tag: t } if t == tag))
    }

    // ------- text -------

    pub fn text_content(&self, node_id: usize) -> String {
        let mut out = String::new();
        self.write_text_content(node_id, &mut out);
        out
    }

    fn write_text_content(&self, node_id: usize, out: &mut String) {
        let node = &self.nodes[node_id];
        match &node.data {
            NodeData::Text(data) => out.push_str(&data.content),
            NodeData::Element(..) | NodeData::Document => {
                for child_id in node.children.iter() {
                    self.write_text_content(*child_id, out);
                }
            }
            NodeData::Comment => {}
        }
    }

    /// First text node in the subtree, in document order.
    pub fn first_text_node(&self, node_id: usize) -> Option<usize> {
        let node = &self.nodes[node_id];
        if node.is_text_node() {
            return Some(node_id);
        }
        node.children
            .iter()
            .find_map(|child| self.first_text_node(*child))
    }

    pub fn print_tree(&self) {
        crate::util::walk_tree(0, self, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with_tree() -> (Document, usize, usize, usize) {
        let mut doc = Document::new(DocumentConfig::default());
        let div = doc.create_element("div", &[("id", "outer")]);
        let span = doc.create_element("span", &[]);
        let text = doc.create_text_node("hello");
        doc.append_child(0, div);
        doc.append_child(div, span);
        doc.append_child(span, text);
        (doc, div, span, text)
    }

    #[test]
    fn builds_and_walks_a_tree() {
        let (doc, div, span, _) = doc_with_tree();
        assert_eq!(doc.text_content(div), "hello");
        assert_eq!(doc.get_node(span).unwrap().parent, Some(div));
        assert_eq!(doc.element_by_dom_id("outer"), Some(div));
    }

    #[test]
    fn deep_clone_carries_styles_and_rects() {
        let (mut doc, div, ..) = doc_with_tree();
        doc.set_styles(div, StyleMap::from_inline_css("color: red"));
        doc.set_rect(div, Rect::from_size(100.0, 50.0));

        let clone = doc.deep_clone_node(div);
        assert_ne!(clone, div);
        let clone_node = doc.get_node(clone).unwrap();
        assert_eq!(clone_node.rect.width, 100.0);
        assert_eq!(
            clone_node.styles.primary.as_ref().unwrap().get("color"),
            Some("red")
        );
        assert_eq!(doc.text_content(clone), "hello");
    }

    #[test]
    fn remove_subtree_drops_nodes() {
        let (mut doc, div, span, text) = doc_with_tree();
        doc.remove_subtree(span);
        assert!(doc.get_node(span).is_none());
        assert!(doc.get_node(text).is_none());
        assert!(doc.get_node(div).unwrap().children.is_empty());
    }

    #[test]
    fn replace_subtree_keeps_position() {
        let (mut doc, div, span, _) = doc_with_tree();
        let replacement = doc.create_element("p", &[]);
        doc.replace_subtree(span, replacement);
        assert_eq!(doc.get_node(div).unwrap().children, vec![replacement]);
        assert!(doc.get_node(span).is_none());
    }

    #[test]
    fn blob_store_round_trip() {
        let mut doc = Document::new(DocumentConfig::default());
        doc.register_blob("blob:abc", "image/png", Bytes::from_static(b"\x89PNG"));
        let entry = doc.blob_entry("blob:abc").unwrap();
        assert_eq!(entry.mime, "image/png");
        assert!(doc.blob_entry("blob:other").is_none());
    }

    #[test]
    fn engine_stylesheets_replace_by_tag() {
        let mut doc = Document::new(DocumentConfig::default());
        doc.set_engine_stylesheet("embedFonts", "@font-face { font-family: A; }");
        doc.set_engine_stylesheet("embedFonts", "@font-face { font-family: B; }");
        let sheets: Vec<_> = doc
            .stylesheets
            .iter()
            .filter(|s| matches!(&s.origin, StylesheetOrigin::Engine { .. }))
            .collect();
        assert_eq!(sheets.len(), 1);
        assert!(sheets[0].text.as_ref().unwrap().contains("B"));
    }
}
