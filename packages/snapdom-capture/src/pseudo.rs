//! Pseudo-element and counter materialization.
//!
//! `::before`, `::after` and `::first-letter` only exist as computed style;
//! a serialized clone needs them as real nodes. The resolver first runs a
//! cheap preflight over the document's style landscape (memoized per
//! fingerprint, so repeated captures of an unchanged document skip the scan
//! entirely), then materializes each pseudo as a
//! `<span data-snapdom-pseudo="...">` with resolved `content`, counters and
//! inlined resources.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use cssparser::{Parser, ParserInput, Token};
use snapdom_dom::{Document, PseudoKind, StyleMap, TreeTraverser, qual_name};
use snapdom_traits::layout::LayoutProbe;

use crate::cache::Bucket;
use crate::counters::{
    CounterContext, apply_counter_declarations, format_counter, format_counters,
    parse_counter_pairs,
};
use crate::fetch::{FetchOptions, Fetcher};
use crate::fonts::{icon_glyph_data_uri, is_icon_family, primary_family};
use crate::options::CaptureContext;
use crate::session::Session;
use crate::styles::{default_style_for_tag, style_key};

/// Budget of rules scanned per stylesheet during preflight.
const PREFLIGHT_RULE_BUDGET: usize = 300;

const PSEUDO_TOKENS: &[&str] = &[
    "::before",
    "::after",
    "::first-letter",
    ":before",
    ":after",
    ":first-letter",
    "counter(",
    "counters(",
    "counter-increment",
    "counter-reset",
];

/// Decides whether pseudo/counter resolution can be skipped for this
/// document. The decision is memoized against a fingerprint of the style
/// landscape; an unchanged landscape reuses the previous answer without
/// rescanning any rule text.
pub fn pseudo_preflight(doc: &Document, session: &mut Session) -> bool {
    let fingerprint = style_landscape_fingerprint(doc);
    if let Some((cached, decision)) = session.preflight {
        if cached == fingerprint {
            return decision;
        }
    }

    let decision = scan_for_pseudo_rules(doc);
    session.preflight = Some((fingerprint, decision));
    decision
}

fn style_landscape_fingerprint(doc: &Document) -> u64 {
    let mut hasher = DefaultHasher::new();
    doc.stylesheets.len().hash(&mut hasher);
    for sheet in &doc.stylesheets {
        sheet.text_len().hash(&mut hasher);
        sheet.rule_count(PREFLIGHT_RULE_BUDGET).hash(&mut hasher);
        sheet.href().hash(&mut hasher);
    }
    // Host-attached pseudo styles and inline counter properties are part of
    // the landscape too.
    let mut attached = 0usize;
    for id in TreeTraverser::new(doc) {
        let Some(node) = doc.get_node(id) else { continue };
        if node.styles.has_any_pseudo() {
            attached += 1;
        }
    }
    attached.hash(&mut hasher);
    hasher.finish()
}

fn scan_for_pseudo_rules(doc: &Document) -> bool {
    for id in TreeTraverser::new(doc) {
        let Some(node) = doc.get_node(id) else { continue };
        if node.styles.has_any_pseudo() {
            return true;
        }
        if let Some(style) = &node.styles.primary {
            if style.get("counter-reset").is_some()
                || style.get("counter-increment").is_some()
                || style.get("content").is_some_and(|c| c.contains("counter("))
            {
                return true;
            }
        }
    }

    for sheet in &doc.stylesheets {
        let Some(text) = &sheet.text else { continue };
        let scanned = bounded_rule_text(text, PREFLIGHT_RULE_BUDGET);
        if PSEUDO_TOKENS.iter().any(|token| scanned.contains(token)) {
            return true;
        }
    }
    false
}

/// The prefix of `text` covering at most `budget` top-level rules.
fn bounded_rule_text(text: &str, budget: usize) -> &str {
    let mut depth = 0usize;
    let mut rules = 0usize;
    for (i, byte) in text.bytes().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    rules += 1;
                    if rules >= budget {
                        return &text[..=i];
                    }
                }
            }
            _ => {}
        }
    }
    text
}

// ------- content value parsing -------

/// One resolved piece of a `content` value.
#[derive(Clone, Debug, PartialEq)]
pub enum ContentToken {
    Text(String),
    Counter { name: String, style: String },
    Counters { name: String, separator: String, style: String },
    Url(String),
    Attr(String),
    None,
    Normal,
}

/// Tokenizes a CSS `content` value. Quoted-string escapes (`\2605`) are
/// decoded by the tokenizer itself.
pub fn parse_content_tokens(value: &str) -> Vec<ContentToken> {
    let mut input = ParserInput::new(value);
    let mut parser = Parser::new(&mut input);
    let mut tokens = Vec::new();

    while let Ok(token) = parser.next() {
        match token {
            Token::QuotedString(text) => tokens.push(ContentToken::Text(text.to_string())),
            Token::UnquotedUrl(url) => tokens.push(ContentToken::Url(url.to_string())),
            Token::Ident(ident) => match ident.to_ascii_lowercase().as_str() {
                "none" => tokens.push(ContentToken::None),
                "normal" => tokens.push(ContentToken::Normal),
                // open-quote and friends resolve to nothing here: quote
                // nesting depth is a live-document concept.
                _ => {}
            },
            Token::Function(name) => {
                let name = name.to_ascii_lowercase();
                let parsed =
                    parser.parse_nested_block(|inner| parse_content_function(&name, inner));
                if let Ok(Some(token)) = parsed {
                    tokens.push(token);
                }
            }
            _ => {}
        }
    }
    tokens
}

fn parse_content_function<'i>(
    name: &str,
    inner: &mut Parser<'i, '_>,
) -> Result<Option<ContentToken>, cssparser::ParseError<'i, ()>> {
    Ok(match name {
        "counter" => {
            let counter = inner.expect_ident()?.to_string();
            let style = if inner.expect_comma().is_ok() {
                inner.expect_ident()?.to_string()
            } else {
                "decimal".to_string()
            };
            Some(ContentToken::Counter {
                name: counter,
                style,
            })
        }
        "counters" => {
            let counter = inner.expect_ident()?.to_string();
            inner.expect_comma()?;
            let separator = inner.expect_string()?.to_string();
            let style = if inner.expect_comma().is_ok() {
                inner.expect_ident()?.to_string()
            } else {
                "decimal".to_string()
            };
            Some(ContentToken::Counters {
                name: counter,
                separator,
                style,
            })
        }
        "url" => {
            let url = inner.expect_string()?.to_string();
            Some(ContentToken::Url(url))
        }
        "attr" => {
            let attr = inner.expect_ident()?.to_string();
            Some(ContentToken::Attr(attr))
        }
        _ => None,
    })
}

// ------- materialization -------

pub struct PseudoDeps<'a> {
    pub ctx: &'a CaptureContext,
    pub fetcher: &'a Fetcher,
    pub probe: &'a dyn LayoutProbe,
}

/// Materializes `::before`/`::after`/`::first-letter` under `clone_root` as
/// real nodes. Any failure in a single pseudo is logged and that pseudo is
/// skipped; the capture continues.
pub async fn resolve_pseudo_elements(
    doc: &mut Document,
    clone_root: usize,
    deps: &PseudoDeps<'_>,
    session: &mut Session,
) {
    if !pseudo_preflight(doc, session) {
        return;
    }
    if session.counter_ctx.is_none() {
        session.counter_ctx = Some(CounterContext::build(doc));
        session.counter_epoch += 1;
    }

    let clone_ids: Vec<usize> = TreeTraverser::new_with_root(doc, clone_root)
        .filter(|id| doc.get_node(*id).is_some_and(|n| n.is_element()))
        .collect();

    for clone_id in clone_ids {
        let Some(&orig_id) = session.node_map.get(&clone_id) else {
            continue;
        };
        for kind in PseudoKind::ALL {
            materialize_pseudo(doc, clone_id, orig_id, kind, deps, session).await;
        }
    }
}

async fn materialize_pseudo(
    doc: &mut Document,
    clone_id: usize,
    orig_id: usize,
    kind: PseudoKind,
    deps: &PseudoDeps<'_>,
    session: &mut Session,
) {
    let Some(style) = doc
        .get_node(orig_id)
        .and_then(|node| node.styles.pseudo(kind).cloned())
    else {
        return;
    };

    if is_visually_empty(&style) {
        return;
    }

    match kind {
        PseudoKind::FirstLetter => {
            materialize_first_letter(doc, clone_id, orig_id, &style, deps, session);
        }
        PseudoKind::Before | PseudoKind::After => {
            materialize_before_after(doc, clone_id, orig_id, kind, style, deps, session).await;
        }
    }
}

/// All of: no content, no background image, transparent background, zero
/// border, no transform, inline display.
fn is_visually_empty(style: &StyleMap) -> bool {
    let content = style.get_or("content", "none");
    let content_empty = matches!(content, "none" | "normal" | "\"\"" | "''" | "");
    if !content_empty {
        return false;
    }
    if style.get_or("background-image", "none") != "none" {
        return false;
    }
    let bg_color = style.get_or("background-color", "transparent");
    if !matches!(bg_color, "transparent" | "rgba(0, 0, 0, 0)") {
        return false;
    }
    let border = style.get_or("border-width", "0px");
    if !border.split_ascii_whitespace().all(|w| w.starts_with('0')) {
        return false;
    }
    if style.get("transform").is_some_and(|t| t != "none") {
        return false;
    }
    style.get_or("display", "inline") == "inline"
}

/// `::first-letter` materializes only when it visibly differs from the
/// normal text: the first grapheme cluster of the first text node splits
/// into its own styled span.
fn materialize_first_letter(
    doc: &mut Document,
    clone_id: usize,
    orig_id: usize,
    style: &Arc<StyleMap>,
    deps: &PseudoDeps<'_>,
    session: &mut Session,
) {
    let primary = doc
        .get_node(orig_id)
        .and_then(|n| n.styles.primary.clone())
        .unwrap_or_default();
    let differs = ["color", "font-size", "font-weight"]
        .iter()
        .any(|prop| style.get(prop).is_some() && style.get(prop) != primary.get(prop));
    if !differs {
        return;
    }

    let Some(text_id) = doc.first_text_node(clone_id) else {
        return;
    };
    let Some(text) = doc.get_node(text_id).and_then(|n| n.text_data()) else {
        return;
    };
    let content = text.content.clone();
    let split = grapheme_cluster_len(&content);
    if split == 0 {
        return;
    }
    let (head, tail) = content.split_at(split);
    let head = head.to_string();
    let tail = tail.to_string();

    if let Some(text_node) = doc.get_node_mut(text_id).and_then(|n| n.text_data_mut()) {
        text_node.content = tail;
    }

    let span = pseudo_span(doc, PseudoKind::FirstLetter, style, deps, session);
    let head_text = doc.create_text_node(&head);
    doc.append_child(span, head_text);
    doc.insert_before(text_id, span);
}

/// First char plus trailing combining marks / variation selectors / ZWJ
/// continuations — close enough to a grapheme cluster for split purposes.
fn grapheme_cluster_len(text: &str) -> usize {
    let mut chars = text.char_indices();
    let Some((_, first)) = chars.next() else {
        return 0;
    };
    let mut end = first.len_utf8();
    let mut join_next = false;
    for (idx, ch) in chars {
        let code = ch as u32;
        let is_mark = (0x0300..=0x036F).contains(&code)
            || (0xFE00..=0xFE0F).contains(&code)
            || (0x1AB0..=0x1AFF).contains(&code)
            || (0x20D0..=0x20FF).contains(&code);
        let is_zwj = code == 0x200D;
        if is_mark || is_zwj || join_next {
            end = idx + ch.len_utf8();
            join_next = is_zwj;
        } else {
            break;
        }
    }
    end
}

async fn materialize_before_after(
    doc: &mut Document,
    clone_id: usize,
    orig_id: usize,
    kind: PseudoKind,
    style: Arc<StyleMap>,
    deps: &PseudoDeps<'_>,
    session: &mut Session,
) {
    let orig_parent = doc.get_node(orig_id).and_then(|n| n.parent);

    // Counter state: element context, overlaid with the continuation carried
    // from earlier sibling pseudos, then the pseudo's own declarations.
    let mut state = session
        .counter_ctx
        .as_ref()
        .map(|ctx| ctx.state_at(orig_id))
        .unwrap_or_default();
    if let Some(parent) = orig_parent {
        if let Some(carried) = session.sibling_counters.get(&parent) {
            for (name, value) in carried {
                let stack = state.entry(name.clone()).or_default();
                if stack.is_empty() {
                    stack.push(*value);
                } else if let Some(top) = stack.last_mut() {
                    *top = *value;
                }
            }
        }
    }
    apply_counter_declarations(
        &mut state,
        style.get("counter-reset"),
        style.get("counter-increment"),
    );

    // Resolve content to text and/or an inline image.
    let tokens = style
        .get("content")
        .map(parse_content_tokens)
        .unwrap_or_default();
    let mut text = String::new();
    let mut image_urls: Vec<String> = Vec::new();
    for token in &tokens {
        match token {
            ContentToken::Text(t) => text.push_str(t),
            ContentToken::Counter { name, style } => {
                let value = state
                    .get(name.as_str())
                    .and_then(|stack| stack.last().copied())
                    .unwrap_or(0);
                text.push_str(&format_counter(value, style));
            }
            ContentToken::Counters {
                name,
                separator,
                style,
            } => {
                let stack = state.get(name.as_str()).cloned().unwrap_or_default();
                text.push_str(&format_counters(&stack, separator, style));
            }
            ContentToken::Attr(attr_name) => {
                let value = doc
                    .get_node(orig_id)
                    .and_then(|n| n.element_data())
                    .and_then(|el| {
                        el.attrs
                            .iter()
                            .find(|a| a.name.local.as_ref() == attr_name.as_str())
                    })
                    .map(|a| a.value.clone());
                if let Some(value) = value {
                    text.push_str(&value);
                }
            }
            ContentToken::Url(url) => image_urls.push(url.clone()),
            ContentToken::None | ContentToken::Normal => {}
        }
    }

    // Re-inline background image declarations through the fetcher.
    let mut style_owned = (*style).clone();
    inline_style_urls(doc, deps.fetcher, &mut style_owned, "background-image").await;

    // Icon-font glyph content becomes a sized vector image.
    let mut icon_image: Option<(String, f64, f64)> = None;
    if text.chars().count() == 1 {
        if let Some(family) = style.get("font-family").and_then(primary_family) {
            if is_icon_family(&family, deps.ctx) {
                icon_image =
                    icon_glyph_data_uri(doc, deps.fetcher, deps.probe, &family, &style, &text)
                        .await;
            }
        }
    }

    let style_arc = Arc::new(style_owned);
    let span = pseudo_span(doc, kind, &style_arc, deps, session);

    if let Some((data_uri, width, height)) = icon_image {
        let img = doc.create_element(
            "img",
            &[
                ("src", data_uri.as_str()),
                (
                    "style",
                    &format!("width:{width}px;height:{height}px;"),
                ),
            ],
        );
        doc.append_child(span, img);
    } else {
        for url in &image_urls {
            let inlined = if url.starts_with("data:") {
                // Data URIs in content are kept verbatim.
                Some(url.clone())
            } else {
                deps.fetcher
                    .snap_fetch(doc, url, FetchOptions::image(Bucket::Image).silent())
                    .await
                    .payload()
                    .map(str::to_string)
            };
            if let Some(src) = inlined {
                let img = doc.create_element("img", &[("src", src.as_str())]);
                doc.append_child(span, img);
            } else {
                tracing::warn!("skipping unfetchable pseudo content url {url}");
            }
        }
        if !text.is_empty() {
            let text_node = doc.create_text_node(&text);
            doc.append_child(span, text_node);
        }
    }

    match kind {
        PseudoKind::Before => doc.prepend_child(clone_id, span),
        _ => doc.append_child(clone_id, span),
    }

    // Propagate this pseudo's increments so the next sibling's pseudo sees
    // the continuation.
    if let (Some(parent), Some(increments)) = (orig_parent, style.get("counter-increment")) {
        let carried = session.sibling_counters.entry(parent).or_default();
        for (name, _) in parse_counter_pairs(increments, 1) {
            if let Some(value) = state.get(&name).and_then(|stack| stack.last()) {
                carried.insert(name, *value);
            }
        }
    }
}

/// Creates the styled span a pseudo materializes into, frozen via the same
/// reusable-class machinery as ordinary clone elements.
fn pseudo_span(
    doc: &mut Document,
    kind: PseudoKind,
    style: &Arc<StyleMap>,
    deps: &PseudoDeps<'_>,
    session: &mut Session,
) -> usize {
    let span = doc.create_element("span", &[("data-snapdom-pseudo", kind.selector())]);

    let registry = deps.fetcher.registry();
    let defaults = default_style_for_tag(registry, "span");
    let key = style_key(style, &defaults, true);
    if !key.is_empty() {
        let class = registry.class_for_style_key(&key);
        session.note_class(&class, &key);
        session.style_map.insert(span, key);
        if let Some(el) = doc
            .get_node_mut(span)
            .and_then(|node| node.element_data_mut())
        {
            el.set_attr(qual_name!("class"), class);
        }
    }
    span
}

/// Rewrites every non-data `url(...)` inside a style property value into a
/// data URI, leaving the value untouched on failure.
pub async fn inline_style_urls(
    doc: &Document,
    fetcher: &Fetcher,
    style: &mut StyleMap,
    property: &str,
) {
    let Some(value) = style.get(property).map(str::to_string) else {
        return;
    };
    if !value.to_ascii_lowercase().contains("url(") {
        return;
    }
    let rewritten = crate::clone::rewrite_css_urls(doc, fetcher, &value, Bucket::Background).await;
    if rewritten != value {
        style.set(property, rewritten);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_tokens_concatenate_without_spaces() {
        let tokens = parse_content_tokens("\"1\" \".\"");
        assert_eq!(
            tokens,
            vec![
                ContentToken::Text("1".to_string()),
                ContentToken::Text(".".to_string())
            ]
        );
    }

    #[test]
    fn content_counter_functions() {
        let tokens = parse_content_tokens("counter(list-item) \".\"");
        assert_eq!(
            tokens[0],
            ContentToken::Counter {
                name: "list-item".to_string(),
                style: "decimal".to_string()
            }
        );

        let tokens = parse_content_tokens("counters(section, \".\", upper-roman)");
        assert_eq!(
            tokens[0],
            ContentToken::Counters {
                name: "section".to_string(),
                separator: ".".to_string(),
                style: "upper-roman".to_string()
            }
        );
    }

    #[test]
    fn content_decodes_css_escapes() {
        let tokens = parse_content_tokens("\"\\2605\"");
        assert_eq!(tokens, vec![ContentToken::Text("\u{2605}".to_string())]);
    }

    #[test]
    fn content_urls_and_attrs() {
        let tokens = parse_content_tokens("url(\"icon.png\") attr(data-label)");
        assert_eq!(tokens[0], ContentToken::Url("icon.png".to_string()));
        assert_eq!(tokens[1], ContentToken::Attr("data-label".to_string()));

        let tokens = parse_content_tokens("url(unquoted.png)");
        assert_eq!(tokens[0], ContentToken::Url("unquoted.png".to_string()));
    }

    #[test]
    fn visually_empty_detection() {
        let empty = StyleMap::from_inline_css("content: none; display: inline");
        assert!(is_visually_empty(&empty));

        let with_content = StyleMap::from_inline_css("content: \"x\"");
        assert!(!is_visually_empty(&with_content));

        let with_bg = StyleMap::from_inline_css(
            "content: none; background-image: url(x.png)",
        );
        assert!(!is_visually_empty(&with_bg));

        let block = StyleMap::from_inline_css("content: none; display: block");
        assert!(!is_visually_empty(&block));
    }

    #[test]
    fn grapheme_cluster_lengths() {
        assert_eq!(grapheme_cluster_len("abc"), 1);
        // e + combining acute
        assert_eq!(grapheme_cluster_len("e\u{0301}x"), "e\u{0301}".len());
        assert_eq!(grapheme_cluster_len(""), 0);
    }

    #[test]
    fn bounded_rule_text_stops_at_budget() {
        let css = ".a{x}.b{y}.c{z}";
        assert_eq!(bounded_rule_text(css, 2), ".a{x}.b{y}");
        assert_eq!(bounded_rule_text(css, 10), css);
    }
}
