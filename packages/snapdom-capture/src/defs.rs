//! SVG defs inlining.
//!
//! Serialized SVG fragments reference `<symbol>`/`<defs>` by id; when those
//! live outside the captured subtree the clone would render empty. This
//! pass collects every `href="#id"` / `url(#id)` reference under the clone,
//! resolves each id against the rest of the document, and clones the
//! definitions into a hidden in-tree container — following nested
//! references until the queue drains.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use snapdom_dom::{Document, TreeTraverser};

/// Attributes that can carry `url(#id)` references.
const URL_REFERENCE_ATTRS: &[&str] = &[
    "fill",
    "stroke",
    "filter",
    "clip-path",
    "mask",
    "marker",
    "marker-start",
    "marker-mid",
    "marker-end",
    "style",
];

/// Resolves external `<use>`/`url(#id)` references under `clone_root`,
/// cloning the matching definitions into a hidden
/// `<svg class="inline-defs-container">` first child. The container is only
/// created when at least one reference was observed, and legitimately stays
/// empty when nothing external matches.
pub fn inline_external_defs(doc: &mut Document, capture_root: usize, clone_root: usize) {
    let mut queue: VecDeque<String> = collect_references(doc, clone_root).into_iter().collect();
    if queue.is_empty() {
        return;
    }

    // Ids already satisfied inside the clone need no inlining.
    let mut satisfied = ids_in_subtree(doc, clone_root);
    let mut container: Option<usize> = None;
    let mut defs: Option<usize> = None;

    while let Some(id) = queue.pop_front() {
        if satisfied.contains(&id) {
            continue;
        }
        satisfied.insert(id.clone());

        let Some(source) = find_definition(doc, &id, &[capture_root, clone_root]) else {
            continue;
        };

        let container_id = *container.get_or_insert_with(|| {
            let hidden = doc.create_element(
                "svg",
                &[
                    ("class", "inline-defs-container"),
                    ("aria-hidden", "true"),
                    ("style", "position:absolute;width:0;height:0;overflow:hidden"),
                ],
            );
            doc.prepend_child(clone_root, hidden);
            hidden
        });
        let defs_id = *defs.get_or_insert_with(|| {
            let defs = doc.create_element("defs", &[]);
            doc.append_child(container_id, defs);
            defs
        });

        let cloned = doc.deep_clone_node(source);
        doc.append_child(defs_id, cloned);

        // The clone may itself reference further definitions.
        for reference in collect_references(doc, cloned) {
            if !satisfied.contains(&reference) {
                queue.push_back(reference);
            }
        }
    }
}

/// Every id referenced from `href`/`xlink:href` fragments and `url(#id)`
/// occurrences under `root`.
fn collect_references(doc: &Document, root: usize) -> FxHashSet<String> {
    let mut ids = FxHashSet::default();
    for node_id in TreeTraverser::new_with_root(doc, root) {
        let Some(el) = doc.get_node(node_id).and_then(|n| n.element_data()) else {
            continue;
        };
        for attr in &el.attrs {
            let local = attr.name.local.as_ref();
            // <use href="#id">, xlink:href and any prefixed href variant.
            if local == "href" {
                if let Some(fragment) = attr.value.strip_prefix('#') {
                    if !fragment.is_empty() {
                        ids.insert(fragment.to_string());
                    }
                }
            }
            if URL_REFERENCE_ATTRS.contains(&local) {
                collect_url_fragment_ids(&attr.value, &mut ids);
            }
        }
    }
    ids
}

/// Extracts the `X` of each `url(#X)` in a CSS-ish value.
fn collect_url_fragment_ids(value: &str, ids: &mut FxHashSet<String>) {
    let lower = value.to_ascii_lowercase();
    let mut pos = 0;
    while let Some(found) = lower[pos..].find("url(") {
        let inner_start = pos + found + 4;
        let Some(end_rel) = value[inner_start..].find(')') else {
            break;
        };
        let inner = value[inner_start..inner_start + end_rel]
            .trim()
            .trim_matches(['"', '\''])
            .trim();
        if let Some(fragment) = inner.strip_prefix('#') {
            if !fragment.is_empty() {
                ids.insert(fragment.to_string());
            }
        }
        pos = inner_start + end_rel + 1;
    }
}

fn ids_in_subtree(doc: &Document, root: usize) -> FxHashSet<String> {
    TreeTraverser::new_with_root(doc, root)
        .filter_map(|id| doc.get_node(id))
        .filter_map(|node| node.element_data())
        .filter_map(|el| el.id.clone())
        .collect()
}

/// The first element with the given DOM id that can serve as a definition —
/// a `<symbol>`/`<defs>` or anything inside a `<defs>` — searching the
/// whole document but never inside the excluded subtrees.
fn find_definition(doc: &Document, dom_id: &str, excluded: &[usize]) -> Option<usize> {
    fn walk(
        doc: &Document,
        node_id: usize,
        dom_id: &str,
        excluded: &[usize],
        inside_defs: bool,
    ) -> Option<usize> {
        if excluded.contains(&node_id) {
            return None;
        }
        let node = doc.get_node(node_id)?;
        let mut in_defs = inside_defs;
        if let Some(el) = node.element_data() {
            let tag = el.name.local.as_ref();
            let def_like = tag.eq_ignore_ascii_case("symbol")
                || tag.eq_ignore_ascii_case("defs")
                || tag.eq_ignore_ascii_case("linearGradient")
                || tag.eq_ignore_ascii_case("radialGradient")
                || tag.eq_ignore_ascii_case("pattern")
                || tag.eq_ignore_ascii_case("filter")
                || tag.eq_ignore_ascii_case("marker")
                || tag.eq_ignore_ascii_case("clipPath")
                || tag.eq_ignore_ascii_case("mask");
            if el.id.as_deref() == Some(dom_id) && (def_like || inside_defs) {
                return Some(node_id);
            }
            in_defs = in_defs || tag.eq_ignore_ascii_case("defs");
        }
        node.children
            .iter()
            .find_map(|child| walk(doc, *child, dom_id, excluded, in_defs))
    }
    walk(doc, 0, dom_id, excluded, false)
}
