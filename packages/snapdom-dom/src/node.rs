use std::str::FromStr;

use markup5ever::{LocalName, QualName, local_name};
use snapdom_traits::Rect;

use crate::document::Document;
use crate::style::ElementStyles;

/// A single node in the document arena. Tree links are arena ids; walking
/// the tree goes through the owning [`Document`].
pub struct Node {
    /// Our id in the arena
    pub id: usize,
    /// Our parent's id
    pub parent: Option<usize>,
    /// Child ids, in document order
    pub children: Vec<usize>,

    /// Node type specific data
    pub data: NodeData,

    /// Resolved styles for this node (elements only)
    pub styles: ElementStyles,
    /// Resolved border box, document-relative (`getBoundingClientRect`)
    pub rect: Rect,
}

impl Node {
    pub fn new(id: usize, data: NodeData) -> Self {
        Self {
            id,
            parent: None,
            children: vec![],
            data,
            styles: ElementStyles::default(),
            rect: Rect::ZERO,
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self.data, NodeData::Element(..))
    }

    pub fn is_text_node(&self) -> bool {
        matches!(self.data, NodeData::Text(..))
    }

    pub fn element_data(&self) -> Option<&ElementNodeData> {
        match self.data {
            NodeData::Element(ref data) => Some(data),
            _ => None,
        }
    }

    pub fn element_data_mut(&mut self) -> Option<&mut ElementNodeData> {
        match self.data {
            NodeData::Element(ref mut data) => Some(data),
            _ => None,
        }
    }

    pub fn text_data(&self) -> Option<&TextNodeData> {
        match self.data {
            NodeData::Text(ref data) => Some(data),
            _ => None,
        }
    }

    pub fn text_data_mut(&mut self) -> Option<&mut TextNodeData> {
        match self.data {
            NodeData::Text(ref mut data) => Some(data),
            _ => None,
        }
    }

    /// Lowercase tag name, or `None` for non-elements.
    pub fn tag_name(&self) -> Option<&str> {
        self.element_data().map(|el| &*el.name.local)
    }

    pub fn attrs(&self) -> Option<&[Attribute]> {
        Some(&self.element_data()?.attrs)
    }

    pub fn attr(&self, name: LocalName) -> Option<&str> {
        self.element_data()?.attr(name)
    }

    /// A shallow copy of this node's data for cloning purposes. Shadow and
    /// iframe payloads are deliberately not carried over: the clone engine
    /// materializes those separately (scoped mirror / rasterization).
    pub fn clone_data_shallow(&self) -> NodeData {
        match &self.data {
            NodeData::Document => NodeData::Document,
            NodeData::Comment => NodeData::Comment,
            NodeData::Text(data) => NodeData::Text(data.clone()),
            NodeData::Element(data) => NodeData::Element(ElementNodeData {
                name: data.name.clone(),
                id: data.id.clone(),
                attrs: data.attrs.clone(),
                shadow: None,
                special_data: SpecialData::None,
            }),
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Node {}

/// The different kinds of nodes in the DOM.
pub enum NodeData {
    /// The `Document` itself - the root node of the document.
    Document,

    /// An element with attributes.
    Element(ElementNodeData),

    /// A text node.
    Text(TextNodeData),

    /// A comment.
    Comment,
}

impl NodeData {
    pub fn downcast_element(&self) -> Option<&ElementNodeData> {
        match self {
            Self::Element(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_element_with_tag_name(&self, name: &impl PartialEq<LocalName>) -> bool {
        let Some(elem) = self.downcast_element() else {
            return false;
        };
        *name == elem.name.local
    }
}

/// A tag attribute, e.g. `class="test"` in `<div class="test" ...>`.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Debug)]
pub struct Attribute {
    pub name: QualName,
    pub value: String,
}

pub struct ElementNodeData {
    /// The element's tag name, namespace and prefix
    pub name: QualName,

    /// The element's id attribute (if it has one)
    pub id: Option<String>,

    /// The element's attributes
    pub attrs: Vec<Attribute>,

    /// Attached shadow root (mirrored into the clone with scoped CSS)
    pub shadow: Option<ShadowRootData>,

    /// Heterogeneous data that depends on the element's type
    pub special_data: SpecialData,
}

impl ElementNodeData {
    pub fn new(name: QualName, attrs: Vec<Attribute>) -> Self {
        let id_attr = attrs
            .iter()
            .find(|attr| &attr.name.local == "id")
            .map(|attr| attr.value.clone());
        ElementNodeData {
            name,
            id: id_attr,
            attrs,
            shadow: None,
            special_data: SpecialData::None,
        }
    }

    pub fn attrs(&self) -> &[Attribute] {
        &self.attrs
    }

    pub fn attr(&self, name: impl PartialEq<LocalName>) -> Option<&str> {
        let attr = self.attrs.iter().find(|attr| name == attr.name.local)?;
        Some(&attr.value)
    }

    pub fn attr_parsed<T: FromStr>(&self, name: impl PartialEq<LocalName>) -> Option<T> {
        self.attr(name)?.parse::<T>().ok()
    }

    /// Sets (or replaces) an attribute in the null namespace.
    pub fn set_attr(&mut self, name: QualName, value: impl Into<String>) {
        let value = value.into();
        if name.local == local_name!("id") {
            self.id = Some(value.clone());
        }
        match self.attrs.iter_mut().find(|a| a.name == name) {
            Some(attr) => attr.value = value,
            None => self.attrs.push(Attribute { name, value }),
        }
    }

    pub fn remove_attr(&mut self, name: impl PartialEq<LocalName>) -> Option<String> {
        let idx = self.attrs.iter().position(|a| name == a.name.local)?;
        Some(self.attrs.remove(idx).value)
    }

    pub fn iframe_data(&self) -> Option<&IframeData> {
        match self.special_data {
            SpecialData::Iframe(ref data) => Some(data),
            _ => None,
        }
    }
}

/// An attached shadow root: a subtree in the same arena, plus the adopted
/// stylesheet texts scoped to it.
pub struct ShadowRootData {
    /// Arena id of the shadow content container node
    pub root: usize,
    /// `adoptedStyleSheets` CSS texts, in adoption order
    pub adopted_css: Vec<String>,
}

/// Heterogeneous data that depends on the element's type.
pub enum SpecialData {
    /// Content document of an `<iframe>` element
    Iframe(Box<IframeData>),
    /// No data (for nodes that don't need any node-specific data)
    None,
}

/// The content document of an `<iframe>`. `document: None` models a
/// cross-origin frame: the engine can see the box but not the contents.
pub struct IframeData {
    pub document: Option<Document>,
}

#[derive(Clone, Debug)]
pub struct TextNodeData {
    /// The textual content of the text node
    pub content: String,
}

impl TextNodeData {
    pub fn new(content: String) -> Self {
        Self { content }
    }
}
