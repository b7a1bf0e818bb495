use crate::Document;
use crate::node::NodeData;

// Debug print a document subtree
pub fn walk_tree(indent: usize, doc: &Document, node_id: usize) {
    let Some(node) = doc.get_node(node_id) else {
        return;
    };

    // Skip all-whitespace text nodes entirely
    if let NodeData::Text(data) = &node.data {
        if data.content.chars().all(|c| c.is_ascii_whitespace()) {
            return;
        }
    }

    print!("{}", " ".repeat(indent));
    let id = node.id;
    match &node.data {
        NodeData::Document => println!("#Document {id}"),
        NodeData::Text(data) => {
            let content = data.content.trim();
            if content.len() > 10 {
                let cut = content
                    .char_indices()
                    .take(10)
                    .last()
                    .map(|(i, c)| i + c.len_utf8())
                    .unwrap_or(content.len());
                println!("#text {id}: {}...", content[..cut].escape_default());
            } else {
                println!("#text {id}: {}", content.escape_default());
            }
        }
        NodeData::Comment => println!("<!-- COMMENT {id} -->"),
        NodeData::Element(data) => {
            print!("<{} {id}", data.name.local);
            for attr in data.attrs.iter() {
                print!(" {}=\"{}\"", attr.name.local, attr.value);
            }
            if !node.children.is_empty() {
                println!(">");
            } else {
                println!("/>");
            }
        }
    }

    if !node.children.is_empty() {
        for child_id in node.children.iter() {
            walk_tree(indent + 2, doc, *child_id);
        }
        if let NodeData::Element(data) = &node.data {
            println!("{}</{}>", " ".repeat(indent), data.name.local);
        }
    }
}
