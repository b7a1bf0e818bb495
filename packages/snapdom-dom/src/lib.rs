//! snapdom-dom
//!
//! A slab-backed document snapshot: the DOM tree the capture pipeline reads
//! from and clones into. Unlike a live browser DOM there is no cascade and
//! no layout here — computed styles and bounding rects arrive on the nodes
//! already resolved (seeded by the HTML parser from inline styles, or set by
//! the embedder), which is exactly the contract the capture engine needs.

/// The document itself: node arena, stylesheet list, font registry, blob
/// store. The primary entry point for this crate.
pub mod document;

/// The nodes themselves, and their data.
pub mod node;

/// Computed-style maps and inline-style parsing.
pub mod style;

/// Stylesheet sources (`<style>`, `<link>`, adopted, engine-injected).
pub mod stylesheet;

/// The `document.fonts` analog: registered font faces with an explicit
/// dynamic-source side channel.
pub mod fonts;

/// Pre-order and ancestor traversal over a document.
pub mod traversal;

/// XHTML serialization of a subtree.
pub mod serialize;

pub mod url;

pub mod util;

pub use document::{BlobEntry, Document, DocumentConfig};
pub use fonts::{FaceId, FontFaceHandle, FontRegistry};
pub use markup5ever::{
    LocalName, Namespace, Prefix, QualName, local_name, namespace_url, ns,
};
pub use node::{
    Attribute, ElementNodeData, IframeData, Node, NodeData, ShadowRootData, SpecialData,
    TextNodeData,
};
pub use style::{ElementStyles, PseudoKind, StyleMap};
pub use stylesheet::{StylesheetOrigin, StylesheetSource};
pub use traversal::{AncestorTraverser, TreeTraverser};

/// Creates a markup5ever `QualName` in the null namespace (or the one given).
#[macro_export]
macro_rules! qual_name {
    ($local:tt $(, $ns:ident)?) => {
        $crate::QualName {
            prefix: None,
            ns: $crate::ns!($($ns)?),
            local: $crate::local_name!($local),
        }
    };
}
