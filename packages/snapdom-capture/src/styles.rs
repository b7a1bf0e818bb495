//! Style utilities: per-tag default styles, style keys and the reusable
//! class generator.
//!
//! A live engine discovers per-tag defaults by probing a sandboxed element
//! with `all: initial`; here the sandbox is a built-in UA default table,
//! lazily materialized per tag and cached on the registry. The table only
//! records values that differ from the initial value, which keeps style
//! keys small and the generated base CSS readable.

use std::collections::BTreeMap;
use std::sync::Arc;

use snapdom_dom::{Document, StyleMap, TreeTraverser};

use crate::cache::CacheRegistry;

/// Tags whose subtree never renders: their default style is empty and they
/// are skipped wholesale by the capture.
pub fn is_non_rendered_tag(tag: &str) -> bool {
    matches!(
        tag,
        "script" | "style" | "meta" | "link" | "noscript" | "template" | "head" | "title" | "base"
    )
}

/// Declarations every rendered element starts from.
const BASE_DEFAULTS: &[(&str, &str)] = &[
    ("display", "inline"),
    ("margin", "0px"),
    ("padding", "0px"),
    ("border-width", "0px"),
    ("border-style", "none"),
    ("font-size", "16px"),
    ("font-weight", "400"),
    ("font-style", "normal"),
    ("color", "rgb(0, 0, 0)"),
    ("background-color", "rgba(0, 0, 0, 0)"),
    ("text-align", "start"),
    ("line-height", "normal"),
];

/// Per-tag deviations from [`BASE_DEFAULTS`] — the interesting part of a UA
/// stylesheet, flattened to declarations.
fn tag_overrides(tag: &str) -> &'static [(&'static str, &'static str)] {
    match tag {
        "div" | "section" | "article" | "aside" | "header" | "footer" | "nav" | "main"
        | "address" | "figcaption" | "form" | "dd" | "dt" | "html" | "body" => {
            &[("display", "block")]
        }
        "p" => &[("display", "block"), ("margin", "16px 0px")],
        "h1" => &[
            ("display", "block"),
            ("font-size", "32px"),
            ("font-weight", "700"),
            ("margin", "21.44px 0px"),
        ],
        "h2" => &[
            ("display", "block"),
            ("font-size", "24px"),
            ("font-weight", "700"),
            ("margin", "19.92px 0px"),
        ],
        "h3" => &[
            ("display", "block"),
            ("font-size", "18.72px"),
            ("font-weight", "700"),
            ("margin", "18.72px 0px"),
        ],
        "h4" => &[
            ("display", "block"),
            ("font-weight", "700"),
            ("margin", "21.28px 0px"),
        ],
        "h5" => &[
            ("display", "block"),
            ("font-size", "13.28px"),
            ("font-weight", "700"),
            ("margin", "22.18px 0px"),
        ],
        "h6" => &[
            ("display", "block"),
            ("font-size", "10.72px"),
            ("font-weight", "700"),
            ("margin", "24.98px 0px"),
        ],
        "pre" => &[
            ("display", "block"),
            ("font-family", "monospace"),
            ("font-size", "13.333px"),
            ("margin", "16px 0px"),
            ("white-space", "pre"),
        ],
        "code" | "kbd" | "samp" | "tt" => {
            &[("font-family", "monospace"), ("font-size", "13.333px")]
        }
        "b" | "strong" => &[("font-weight", "700")],
        "i" | "em" | "cite" | "var" | "dfn" => &[("font-style", "italic")],
        "small" => &[("font-size", "13.333px")],
        "big" => &[("font-size", "19.2px")],
        "u" | "ins" => &[("text-decoration-line", "underline")],
        "s" | "strike" | "del" => &[("text-decoration-line", "line-through")],
        "a" => &[
            ("color", "rgb(0, 0, 238)"),
            ("text-decoration-line", "underline"),
            ("cursor", "pointer"),
        ],
        "ul" => &[
            ("display", "block"),
            ("margin", "16px 0px"),
            ("padding-left", "40px"),
            ("list-style-type", "disc"),
        ],
        "ol" => &[
            ("display", "block"),
            ("margin", "16px 0px"),
            ("padding-left", "40px"),
            ("list-style-type", "decimal"),
        ],
        "li" => &[("display", "list-item")],
        "blockquote" | "figure" => &[("display", "block"), ("margin", "16px 40px")],
        "hr" => &[
            ("display", "block"),
            ("margin", "8px auto"),
            ("border-width", "1px"),
            ("border-style", "inset"),
        ],
        "table" => &[
            ("display", "table"),
            ("border-collapse", "separate"),
            ("border-spacing", "2px"),
        ],
        "thead" => &[("display", "table-header-group"), ("vertical-align", "middle")],
        "tbody" => &[("display", "table-row-group"), ("vertical-align", "middle")],
        "tfoot" => &[("display", "table-footer-group"), ("vertical-align", "middle")],
        "tr" => &[("display", "table-row"), ("vertical-align", "inherit")],
        "td" => &[
            ("display", "table-cell"),
            ("vertical-align", "inherit"),
            ("padding", "1px"),
        ],
        "th" => &[
            ("display", "table-cell"),
            ("vertical-align", "inherit"),
            ("padding", "1px"),
            ("font-weight", "700"),
            ("text-align", "center"),
        ],
        "caption" => &[("display", "table-caption"), ("text-align", "center")],
        "button" | "input" | "select" | "textarea" => &[
            ("display", "inline-block"),
            ("text-align", "center"),
        ],
        "img" | "video" | "canvas" | "svg" | "object" | "embed" => &[],
        "iframe" => &[("border-width", "2px"), ("border-style", "inset")],
        "fieldset" => &[
            ("display", "block"),
            ("margin", "0px 2px"),
            ("padding", "5.6px 12px 9.6px"),
            ("border-width", "2px"),
            ("border-style", "groove"),
        ],
        "dl" => &[("display", "block"), ("margin", "16px 0px")],
        "area" | "datalist" | "param" => &[("display", "none")],
        _ => &[],
    }
}

/// The default (computed-equivalent) style for a tag: base defaults plus
/// tag overrides, cached on the registry. Non-rendered tags get an empty
/// mapping.
pub fn default_style_for_tag(registry: &CacheRegistry, tag: &str) -> Arc<StyleMap> {
    registry.default_style_or_insert_with(tag, || {
        if is_non_rendered_tag(tag) {
            return StyleMap::new();
        }
        let mut map = StyleMap::new();
        for (prop, value) in BASE_DEFAULTS {
            map.set(*prop, *value);
        }
        for (prop, value) in tag_overrides(tag) {
            map.set(*prop, *value);
        }
        map
    })
}

/// A plain mapping of the element's resolved declarations. In this host
/// model the resolved style already lives on the node; an absent map is an
/// empty snapshot.
pub fn snapshot_computed_style(doc: &Document, node_id: usize) -> Arc<StyleMap> {
    doc.get_node(node_id)
        .and_then(|node| node.styles.primary.clone())
        .unwrap_or_default()
}

/// A stable identity string for a snapshot: sorted `prop:value` entries
/// joined with `;`. With `compress`, properties whose value equals the tag
/// default are omitted.
pub fn style_key(snapshot: &StyleMap, tag_defaults: &StyleMap, compress: bool) -> String {
    let mut out = String::new();
    for (prop, value) in snapshot.iter() {
        if compress && tag_defaults.get(prop) == Some(value) {
            continue;
        }
        if !out.is_empty() {
            out.push(';');
        }
        out.push_str(prop);
        out.push(':');
        out.push_str(value);
    }
    out
}

/// The set of lowercase tag names present under `root` (inclusive),
/// depth-first.
pub fn collect_used_tag_names(doc: &Document, root: usize) -> Vec<String> {
    let mut tags: Vec<String> = TreeTraverser::new_with_root(doc, root)
        .filter_map(|id| doc.get_node(id))
        .filter_map(|node| node.tag_name())
        .map(|tag| tag.to_ascii_lowercase())
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

/// Groups tags by identical default-style blocks and emits one
/// `tag1,tag2{...}` rule per group — the class-less baseline CSS injected
/// into the clone.
pub fn generate_deduped_base_css(registry: &CacheRegistry, tags: &[String]) -> String {
    let mut groups: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for tag in tags {
        let defaults = default_style_for_tag(registry, tag);
        if defaults.is_empty() {
            continue;
        }
        let block = defaults
            .iter()
            .map(|(prop, value)| format!("{prop}:{value}"))
            .collect::<Vec<_>>()
            .join(";");
        groups.entry(block).or_default().push(tag.as_str());
    }

    let mut css = String::new();
    for (block, tags) in groups {
        css.push_str(&tags.join(","));
        css.push('{');
        css.push_str(&block);
        css.push('}');
    }
    css
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapdom_dom::document::DocumentConfig;

    #[test]
    fn non_rendered_tags_have_empty_defaults() {
        let registry = CacheRegistry::new();
        assert!(default_style_for_tag(&registry, "script").is_empty());
        assert!(default_style_for_tag(&registry, "template").is_empty());
        assert!(!default_style_for_tag(&registry, "div").is_empty());
    }

    #[test]
    fn defaults_are_cached_per_tag() {
        let registry = CacheRegistry::new();
        let first = default_style_for_tag(&registry, "h1");
        let second = default_style_for_tag(&registry, "h1");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.get("font-weight"), Some("700"));
    }

    #[test]
    fn style_key_compression_drops_tag_defaults() {
        let registry = CacheRegistry::new();
        let defaults = default_style_for_tag(&registry, "strong");
        let snapshot = StyleMap::from_inline_css("font-weight: 700; color: rgb(200, 0, 0)");

        let full = style_key(&snapshot, &defaults, false);
        assert_eq!(full, "color:rgb(200, 0, 0);font-weight:700");

        let compressed = style_key(&snapshot, &defaults, true);
        assert_eq!(compressed, "color:rgb(200, 0, 0)");
    }

    #[test]
    fn collects_tags_depth_first_and_deduped() {
        let mut doc = Document::new(DocumentConfig::default());
        let div = doc.create_element("div", &[]);
        let span = doc.create_element("span", &[]);
        let span2 = doc.create_element("span", &[]);
        let b = doc.create_element("b", &[]);
        doc.append_child(0, div);
        doc.append_child(div, span);
        doc.append_child(div, span2);
        doc.append_child(span, b);

        let tags = collect_used_tag_names(&doc, div);
        assert_eq!(tags, vec!["b", "div", "span"]);
    }

    #[test]
    fn base_css_groups_identical_blocks() {
        let registry = CacheRegistry::new();
        let tags = vec![
            "div".to_string(),
            "section".to_string(),
            "strong".to_string(),
        ];
        let css = generate_deduped_base_css(&registry, &tags);
        // div and section share a default block and collapse into one rule.
        assert!(css.contains("div,section{"));
        assert!(css.contains("strong{"));
        assert!(css.contains("font-weight:700"));
    }
}
