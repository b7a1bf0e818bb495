use crate::Document;

/// A pre-order tree traverser for a [`Document`] subtree. Does not descend
/// into shadow roots or iframe content documents — callers that need those
/// enter them explicitly.
#[derive(Clone)]
pub struct TreeTraverser<'a> {
    doc: &'a Document,
    stack: Vec<usize>,
}

impl<'a> TreeTraverser<'a> {
    /// Creates a new tree traverser which starts at the root node.
    pub fn new(doc: &'a Document) -> Self {
        Self::new_with_root(doc, 0)
    }

    /// Creates a new tree traverser which starts at the specified node.
    pub fn new_with_root(doc: &'a Document, root: usize) -> Self {
        TreeTraverser {
            doc,
            stack: vec![root],
        }
    }
}

impl Iterator for TreeTraverser<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let node = self.doc.get_node(id)?;
        self.stack.extend(node.children.iter().rev());
        Some(id)
    }
}

/// An ancestor traverser for a [`Document`].
#[derive(Clone)]
pub struct AncestorTraverser<'a> {
    doc: &'a Document,
    current: usize,
}

impl<'a> AncestorTraverser<'a> {
    /// Creates a new ancestor traverser for the given document and node ID.
    pub fn new(doc: &'a Document, node_id: usize) -> Self {
        AncestorTraverser {
            doc,
            current: node_id,
        }
    }
}

impl Iterator for AncestorTraverser<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let current_node = self.doc.get_node(self.current)?;
        self.current = current_node.parent?;
        Some(self.current)
    }
}

#[cfg(test)]
mod tests {
    use crate::document::{Document, DocumentConfig};

    #[test]
    fn preorder_and_ancestors() {
        let mut doc = Document::new(DocumentConfig::default());
        let a = doc.create_element("div", &[]);
        let b = doc.create_element("span", &[]);
        let c = doc.create_element("b", &[]);
        let d = doc.create_element("i", &[]);
        doc.append_child(0, a);
        doc.append_child(a, b);
        doc.append_child(a, c);
        doc.append_child(b, d);

        let order: Vec<_> = super::TreeTraverser::new_with_root(&doc, a).collect();
        assert_eq!(order, vec![a, b, d, c]);

        let ancestors: Vec<_> = super::AncestorTraverser::new(&doc, d).collect();
        assert_eq!(ancestors, vec![b, a, 0]);
    }
}
