//! The clone engine: deep-clones the capture root with frozen styles,
//! mirrored shadow roots, frozen responsive images, resolved line clamps,
//! rasterized same-origin iframes and no `blob:` URL left anywhere.
//!
//! Clones live in the same node arena as their source document; the capture
//! driver owns the clone subtree and tears it down after serialization.

use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use snapdom_dom::node::{Attribute, ElementNodeData, NodeData, SpecialData};
use snapdom_dom::{
    Document, LocalName, QualName, StyleMap, TreeTraverser, local_name, namespace_url, ns,
};
use snapdom_traits::layout::{LayoutProbe, TextProbe};

use crate::cache::Bucket;
use crate::error::CaptureError;
use crate::fetch::{FetchOptions, Fetcher};
use crate::options::{CaptureContext, CaptureOptions};
use crate::pseudo::{PseudoDeps, resolve_pseudo_elements};
use crate::session::Session;
use crate::styles::{default_style_for_tag, is_non_rendered_tag, snapshot_computed_style, style_key};

/// Cooperative scheduling for the clone walk. In fast mode the walk runs to
/// completion on the calling task; otherwise it yields back to the executor
/// whenever the current slice has used up its budget.
pub struct Scheduler {
    fast: bool,
    slice_started: Instant,
}

const SLICE_BUDGET: Duration = Duration::from_millis(4);

impl Scheduler {
    pub fn new(fast: bool) -> Self {
        Self {
            fast,
            slice_started: Instant::now(),
        }
    }

    pub async fn slot(&mut self) {
        if self.fast {
            return;
        }
        if self.slice_started.elapsed() >= SLICE_BUDGET {
            tokio::task::yield_now().await;
            self.slice_started = Instant::now();
        }
    }
}

pub struct CloneDeps<'a> {
    pub ctx: &'a CaptureContext,
    pub fetcher: &'a Fetcher,
    pub probe: &'a dyn LayoutProbe,
}

/// A QualName in the null namespace for a dynamic attribute name.
fn attr_name(name: &str) -> QualName {
    QualName::new(None, ns!(), LocalName::from(name))
}

pub struct CloneOutput {
    pub clone_root: usize,
    /// Shadow-scope CSS blocks plus the generated reusable-class CSS.
    pub class_css: String,
}

/// Produces the frozen clone of `root_id`.
pub async fn prepare_clone(
    doc: &mut Document,
    root_id: usize,
    deps: &CloneDeps<'_>,
    session: &mut Session,
) -> Result<CloneOutput, CaptureError> {
    let Some(root) = doc.get_node(root_id) else {
        return Err(CaptureError::BadInput(format!(
            "capture root {root_id} does not exist"
        )));
    };
    if !root.is_element() {
        return Err(CaptureError::BadInput(
            "capture root must be an element".to_string(),
        ));
    }

    let mut scheduler = Scheduler::new(deps.ctx.fast);
    let clone_root = clone_node(doc, root_id, true, None, deps, session, &mut scheduler)
        .await
        .ok_or_else(|| {
            CaptureError::BadInput("capture root was excluded by the configured filter".to_string())
        })?;

    crate::defs::inline_external_defs(doc, root_id, clone_root);

    let pseudo_deps = PseudoDeps {
        ctx: deps.ctx,
        fetcher: deps.fetcher,
        probe: deps.probe,
    };
    resolve_pseudo_elements(doc, clone_root, &pseudo_deps, session).await;

    resolve_blob_urls(doc, clone_root, deps.fetcher).await;

    strip_root_translation(doc, root_id, clone_root, session);

    let mut class_css = String::new();
    for block in &session.shadow_css_blocks {
        class_css.push_str(block);
    }
    class_css.push_str(&session.class_css());

    Ok(CloneOutput {
        clone_root,
        class_css,
    })
}

/// Clones one node (and subtree). Returns `None` for nodes that do not
/// appear in the clone: non-rendered tags, filtered/excluded elements.
fn clone_node<'a>(
    doc: &'a mut Document,
    orig_id: usize,
    is_root: bool,
    slot_host: Option<usize>,
    deps: &'a CloneDeps<'a>,
    session: &'a mut Session,
    scheduler: &'a mut Scheduler,
) -> BoxFuture<'a, Option<usize>> {
    Box::pin(async move {
        let node = doc.get_node(orig_id)?;

        match &node.data {
            NodeData::Document => None,
            NodeData::Comment => Some(doc.create_node(NodeData::Comment)),
            NodeData::Text(text) => {
                let content = text.content.clone();
                Some(doc.create_text_node(&content))
            }
            NodeData::Element(el) => {
                let tag = el.name.local.to_ascii_lowercase();
                if is_non_rendered_tag(&tag) {
                    return None;
                }
                if deps.ctx.is_excluded(doc, orig_id) {
                    return None;
                }
                if tag.as_ref() == "slot" {
                    if let Some(host) = slot_host {
                        return clone_slot_contents(doc, host, deps, session, scheduler).await;
                    }
                }
                if tag.as_ref() == "iframe" {
                    return Some(clone_iframe(doc, orig_id, deps, session).await);
                }

                clone_element(doc, orig_id, is_root, slot_host, deps, session, scheduler).await
            }
        }
    })
}

async fn clone_element(
    doc: &mut Document,
    orig_id: usize,
    is_root: bool,
    slot_host: Option<usize>,
    deps: &CloneDeps<'_>,
    session: &mut Session,
    scheduler: &mut Scheduler,
) -> Option<usize> {
    let node = doc.get_node(orig_id)?;
    let el = node.element_data()?;
    let tag = el.name.local.to_ascii_lowercase();
    let name = el.name.clone();
    let rect = node.rect;
    let orig_attrs = el.attrs.clone();
    let has_shadow = el.shadow.is_some();
    let children = node.children.clone();

    // Style freeze: snapshot, rewrite, key, class.
    let snapshot = session
        .style_cache
        .entry(orig_id)
        .or_insert_with(|| snapshot_computed_style(doc, orig_id))
        .clone();
    let mut style = (*snapshot).clone();

    if is_root {
        stabilize_outline(&mut style);
    }
    if tag.as_ref() == "pre" {
        // Leading block margin collapses differently inside foreignObject.
        style.set("margin-top", "0px");
        if style.get("margin-block-start").is_some() {
            style.set("margin-block-start", "0px");
        }
    }
    for property in ["background-image", "background", "mask-image", "-webkit-mask-image"] {
        inline_style_property(doc, deps.fetcher, &mut style, property).await;
    }

    // Build the clone element: original attributes minus live-only ones;
    // `class` is replaced by the generated reusable class.
    let mut attrs: Vec<Attribute> = orig_attrs
        .iter()
        .filter(|attr| {
            !matches!(
                attr.name.local.as_ref(),
                "style" | "class" | "srcset" | "sizes"
            )
        })
        .cloned()
        .collect();

    // Original classes are kept (shadow-scoped CSS still selects by them);
    // the generated reusable class is appended.
    let original_class = orig_attrs
        .iter()
        .find(|a| a.name.local.as_ref() == "class")
        .map(|a| a.value.clone());
    let defaults = default_style_for_tag(deps.fetcher.registry(), &tag);
    let key = style_key(&style, &defaults, true);
    let class_value = if key.is_empty() {
        original_class
    } else {
        let class = deps.fetcher.registry().class_for_style_key(&key);
        session.note_class(&class, &key);
        Some(match original_class {
            Some(original) => format!("{original} {class}"),
            None => class,
        })
    };
    if let Some(value) = class_value {
        attrs.push(Attribute {
            name: attr_name("class"),
            value,
        });
    }

    if tag.as_ref() == "img" {
        freeze_img_attrs(&mut attrs, &orig_attrs, deps.ctx.dpr);
    }

    let clone_id = doc.create_node(NodeData::Element(ElementNodeData::new(name, attrs)));
    doc.set_rect(clone_id, rect);
    session.node_map.insert(clone_id, orig_id);
    session.style_map.insert(clone_id, key);

    if tag.as_ref() == "img" {
        inline_img_src(doc, clone_id, deps.fetcher).await;
    }

    // Line clamp: truncate plain-text containers to the clamped height.
    if let Some(clamp) = style
        .get("-webkit-line-clamp")
        .and_then(|v| v.parse::<usize>().ok())
    {
        let all_text = children
            .iter()
            .all(|id| doc.get_node(*id).is_some_and(|n| n.is_text_node()));
        if clamp > 0 && all_text && !children.is_empty() {
            let text: String = children
                .iter()
                .filter_map(|id| doc.get_node(*id).and_then(|n| n.text_data()))
                .map(|t| t.content.clone())
                .collect();
            if let Some(clamped) = clamp_text(&text, clamp, &style, rect.width, deps.probe) {
                let text_node = doc.create_text_node(&clamped);
                doc.append_child(clone_id, text_node);
                return Some(clone_id);
            }
        }
    }

    if has_shadow {
        mirror_shadow_root(doc, orig_id, clone_id, deps, session, scheduler).await;
        return Some(clone_id);
    }

    for child in children {
        scheduler.slot().await;
        if let Some(child_clone) = clone_node(doc, child, false, slot_host, deps, session, scheduler).await
        {
            doc.append_child(clone_id, child_clone);
        }
    }
    Some(clone_id)
}

/// Replaces a `<slot>` with the host's light children, each marked
/// `data-sd-slotted`. Multiple slotted children collapse into a wrapper
/// span so the slot stays a single node in its parent's child list.
async fn clone_slot_contents(
    doc: &mut Document,
    host_id: usize,
    deps: &CloneDeps<'_>,
    session: &mut Session,
    scheduler: &mut Scheduler,
) -> Option<usize> {
    let light_children = doc.get_node(host_id)?.children.clone();
    let wrapper = doc.create_element("span", &[("data-sd-slotted", "")]);
    for child in light_children {
        scheduler.slot().await;
        if let Some(clone) = clone_node(doc, child, false, None, deps, session, scheduler).await {
            if let Some(el) = doc.get_node_mut(clone).and_then(|n| n.element_data_mut()) {
                el.set_attr(attr_name("data-sd-slotted"), "");
            }
            doc.append_child(wrapper, clone);
        }
    }
    Some(wrapper)
}

/// Mirrors a shadow root into the clone: scoped CSS is extracted and
/// rewritten under a fresh `sN` scope id, and the shadow tree becomes the
/// host clone's children (slots expanding to slotted light children).
async fn mirror_shadow_root(
    doc: &mut Document,
    orig_host: usize,
    clone_host: usize,
    deps: &CloneDeps<'_>,
    session: &mut Session,
    scheduler: &mut Scheduler,
) {
    let Some((shadow_root, adopted_css)) = doc
        .get_node(orig_host)
        .and_then(|n| n.element_data())
        .and_then(|el| el.shadow.as_ref())
        .map(|shadow| (shadow.root, shadow.adopted_css.clone()))
    else {
        return;
    };

    session.shadow_scope_seq += 1;
    let scope = format!("s{}", session.shadow_scope_seq);
    if let Some(el) = doc.get_node_mut(clone_host).and_then(|n| n.element_data_mut()) {
        el.set_attr(attr_name("data-sd"), scope.clone());
    }

    // Concatenate the shadow tree's inline styles with its adopted sheets.
    let mut css = String::new();
    for id in TreeTraverser::new_with_root(doc, shadow_root) {
        let Some(node) = doc.get_node(id) else { continue };
        if node.data.is_element_with_tag_name(&local_name!("style")) {
            css.push_str(&doc.text_content(id));
            css.push('\n');
        }
    }
    for adopted in &adopted_css {
        css.push_str(adopted);
        css.push('\n');
    }

    if !css.trim().is_empty() {
        let mut block = String::new();
        let seed = custom_property_seed(doc, orig_host, &css, &scope);
        if !seed.is_empty() {
            block.push_str(&seed);
        }
        block.push_str(&rewrite_shadow_css(&css, &scope));
        session.shadow_css_blocks.push(block);
    }

    let shadow_children = doc
        .get_node(shadow_root)
        .map(|n| n.children.clone())
        .unwrap_or_default();
    for child in shadow_children {
        scheduler.slot().await;
        if let Some(clone) =
            clone_node(doc, child, false, Some(orig_host), deps, session, scheduler).await
        {
            doc.append_child(clone_host, clone);
        }
    }
}

/// Seed rule initializing the custom properties the scoped CSS references,
/// resolved from the host (falling back to the document root element).
fn custom_property_seed(doc: &Document, host_id: usize, css: &str, scope: &str) -> String {
    let mut names: Vec<String> = Vec::new();
    let mut from = 0;
    while let Some(at) = css[from..].find("var(--") {
        let start = from + at + 4;
        let rest = &css[start..];
        let end = rest
            .find([',', ')'])
            .unwrap_or(rest.len());
        let name = rest[..end].trim().to_string();
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
        from = start + end;
    }
    if names.is_empty() {
        return String::new();
    }

    let host_style = doc.get_node(host_id).and_then(|n| n.styles.primary.clone());
    let root_style = doc
        .try_root_element()
        .and_then(|root| root.styles.primary.clone());

    let mut decls = String::new();
    for name in names {
        let value = host_style
            .as_ref()
            .and_then(|s| s.get(&name))
            .or_else(|| root_style.as_ref().and_then(|s| s.get(&name)));
        if let Some(value) = value {
            decls.push_str(&name);
            decls.push(':');
            decls.push_str(value);
            decls.push(';');
        }
    }
    if decls.is_empty() {
        return String::new();
    }
    format!(":where([data-sd=\"{scope}\"]){{{decls}}}")
}

/// Rewrites shadow CSS under a scope id, flattening specificity to zero.
pub fn rewrite_shadow_css(css: &str, scope: &str) -> String {
    let mut out = String::new();
    let mut rest = css;

    while let Some(open) = rest.find('{') {
        let prelude = rest[..open].trim();
        let Some(close) = find_block_end(rest, open) else {
            break;
        };
        let body = &rest[open + 1..close];

        if let Some(at_rule) = prelude.strip_prefix('@') {
            // Conditional group rules recurse; other at-rules pass through.
            if at_rule.starts_with("media") || at_rule.starts_with("supports") {
                out.push_str(prelude);
                out.push('{');
                out.push_str(&rewrite_shadow_css(body, scope));
                out.push('}');
            } else {
                out.push_str(prelude);
                out.push('{');
                out.push_str(body);
                out.push('}');
            }
        } else if !prelude.is_empty() {
            let selectors: Vec<String> = crate::fonts::split_top_level_commas(prelude)
                .iter()
                .map(|sel| rewrite_shadow_selector(sel, scope))
                .collect();
            out.push_str(&selectors.join(","));
            out.push('{');
            out.push_str(body.trim());
            out.push('}');
        }

        rest = &rest[close + 1..];
    }
    out
}

fn find_block_end(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, byte) in text.bytes().enumerate().skip(open) {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn rewrite_shadow_selector(sel: &str, scope: &str) -> String {
    let sel = sel.trim();

    if let Some(inner_and_tail) = strip_functional(sel, ":host-context(") {
        let (inner, tail) = inner_and_tail;
        return format!(":where(:where({inner}) [data-sd=\"{scope}\"]){tail}");
    }
    if let Some((inner, tail)) = strip_functional(sel, ":host(") {
        return format!(":where([data-sd=\"{scope}\"]:is({inner})){tail}");
    }
    if let Some(tail) = sel.strip_prefix(":host") {
        return format!(":where([data-sd=\"{scope}\"]){tail}");
    }
    if let Some((inner, tail)) = strip_functional(sel, "::slotted(") {
        return format!(":where([data-sd=\"{scope}\"] {inner}){tail}");
    }
    format!(":where([data-sd=\"{scope}\"] {sel}:not([data-sd-slotted]))")
}

/// For `prefix(inner)tail` selectors, returns `(inner, tail)`.
fn strip_functional<'a>(sel: &'a str, prefix: &str) -> Option<(&'a str, &'a str)> {
    let rest = sel.strip_prefix(prefix)?;
    let mut depth = 1usize;
    for (i, ch) in rest.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some((&rest[..i], &rest[i + 1..]));
                }
            }
            _ => {}
        }
    }
    None
}

// ------- images -------

/// Freezes the UA-chosen srcset candidate into `src` and pins decode
/// attributes. `srcset`/`sizes` themselves were already dropped from the
/// attribute copy.
fn freeze_img_attrs(attrs: &mut Vec<Attribute>, orig_attrs: &[Attribute], dpr: f64) {
    let srcset = orig_attrs
        .iter()
        .find(|a| a.name.local.as_ref() == "srcset")
        .map(|a| a.value.as_str());
    if let Some(srcset) = srcset {
        if let Some(chosen) = pick_srcset_candidate(srcset, dpr) {
            match attrs.iter_mut().find(|a| a.name.local == local_name!("src")) {
                Some(src) => src.value = chosen,
                None => attrs.push(Attribute {
                    name: attr_name("src"),
                    value: chosen,
                }),
            }
        }
    }

    for (name, value) in [("decoding", "sync"), ("loading", "eager")] {
        let name = attr_name(name);
        match attrs.iter_mut().find(|a| a.name == name) {
            Some(attr) => attr.value = value.to_string(),
            None => attrs.push(Attribute {
                name,
                value: value.to_string(),
            }),
        }
    }
}

/// Picks the srcset candidate whose density is closest to (and preferably
/// at least) the device pixel ratio; width descriptors prefer the largest.
fn pick_srcset_candidate(srcset: &str, dpr: f64) -> Option<String> {
    let mut best: Option<(String, f64)> = None;
    let mut best_width: Option<(String, f64)> = None;

    for entry in srcset.split(',') {
        let mut parts = entry.split_ascii_whitespace();
        let Some(url) = parts.next().map(str::to_string) else {
            continue;
        };
        let descriptor = parts.next().unwrap_or("1x");
        if let Some(width) = descriptor.strip_suffix('w').and_then(|w| w.parse::<f64>().ok()) {
            if best_width.as_ref().is_none_or(|(_, w)| width > *w) {
                best_width = Some((url, width));
            }
        } else if let Some(density) = descriptor
            .strip_suffix('x')
            .and_then(|d| d.parse::<f64>().ok())
        {
            let better = match &best {
                None => true,
                Some((_, current)) => {
                    let current_ok = *current >= dpr;
                    let candidate_ok = density >= dpr;
                    match (current_ok, candidate_ok) {
                        (false, true) => true,
                        (true, false) => false,
                        _ => (density - dpr).abs() < (*current - dpr).abs(),
                    }
                }
            };
            if better {
                best = Some((url, density));
            }
        }
    }
    best.map(|(url, _)| url).or(best_width.map(|(url, _)| url))
}

/// Inlines an `<img src>` as a data URI, keeping the original URL on
/// failure (blob URLs are handled by the blob sweep).
async fn inline_img_src(doc: &mut Document, clone_id: usize, fetcher: &Fetcher) {
    let Some(src) = doc
        .get_node(clone_id)
        .and_then(|n| n.element_data())
        .and_then(|el| el.attr(local_name!("src")))
        .map(str::to_string)
    else {
        return;
    };
    if src.is_empty() || src.starts_with("data:") || src.starts_with("blob:") {
        return;
    }

    let result = fetcher
        .snap_fetch(doc, &src, FetchOptions::image(Bucket::Image).silent())
        .await;
    if let Some(data_uri) = result.payload().map(str::to_string) {
        if let Some(el) = doc.get_node_mut(clone_id).and_then(|n| n.element_data_mut()) {
            el.set_attr(attr_name("src"), data_uri);
        }
    }
}

// ------- line clamp -------

/// Binary-searches the longest prefix whose measured height fits within
/// `clamp` lines, returning the ellipsized text (or `None` when no
/// truncation is needed).
fn clamp_text(
    text: &str,
    clamp: usize,
    style: &StyleMap,
    width: f64,
    probe: &dyn LayoutProbe,
) -> Option<String> {
    let font_size = parse_px(style.get_or("font-size", "16px")).unwrap_or(16.0);
    let line_height = style
        .get("line-height")
        .and_then(parse_px)
        .unwrap_or(font_size * 1.2);
    let font = TextProbe {
        font_family: style.get_or("font-family", "sans-serif"),
        font_size,
        line_height,
    };
    let max_height = clamp as f64 * line_height;
    if probe.text_height(text, width, &font) <= max_height {
        return None;
    }

    let chars: Vec<char> = text.chars().collect();
    let (mut lo, mut hi) = (0usize, chars.len());
    while lo < hi {
        let mid = (lo + hi).div_ceil(2);
        let candidate: String = chars[..mid].iter().collect::<String>() + "\u{2026}";
        if probe.text_height(&candidate, width, &font) <= max_height {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    let mut clamped: String = chars[..lo].iter().collect();
    clamped.push('\u{2026}');
    Some(clamped)
}

fn parse_px(value: &str) -> Option<f64> {
    value.trim().strip_suffix("px")?.trim().parse().ok()
}

// ------- iframes -------

/// Same-origin iframes are recursively captured at scale 1 and replaced by
/// a `<div>` styled like the iframe box containing the rendered `<img>`.
/// Cross-origin (or failed) iframes stay as `<iframe>` markers for the
/// driver's placeholder pass.
async fn clone_iframe(
    doc: &mut Document,
    orig_id: usize,
    deps: &CloneDeps<'_>,
    session: &mut Session,
) -> usize {
    let rect = doc.get_node(orig_id).map(|n| n.rect).unwrap_or_default();
    let width = rect.width.max(0.0);
    let height = rect.height.max(0.0);

    // Take the content document out for the recursive capture; cross-origin
    // frames have none.
    let inner_doc = doc
        .get_node_mut(orig_id)
        .and_then(|n| n.element_data_mut())
        .and_then(|el| match &mut el.special_data {
            SpecialData::Iframe(data) => data.document.take(),
            SpecialData::None => None,
        });

    let Some(mut inner_doc) = inner_doc else {
        return marker_iframe(doc, orig_id, width, height, session);
    };

    let inner_root = inner_doc
        .try_root_element()
        .map(|n| n.id);
    let rendered = match inner_root {
        Some(inner_root) => {
            // Pin the internal viewport to the iframe's content box.
            if let Some(node) = inner_doc.get_node_mut(inner_root) {
                node.rect.width = width;
                node.rect.height = height;
            }
            let options = CaptureOptions {
                scale: Some(1.0),
                fast: Some(deps.ctx.fast),
                use_proxy: (!deps.ctx.use_proxy.is_empty())
                    .then(|| deps.ctx.use_proxy.clone()),
                cache: Some(deps.fetcher.policy()),
                ..Default::default()
            };
            Box::pin(crate::capture::capture_dom_with(
                &mut inner_doc,
                inner_root,
                options,
                deps.fetcher.backend(),
                deps.fetcher.registry().clone(),
            ))
            .await
        }
        None => Err(CaptureError::BadInput("iframe document is empty".to_string())),
    };

    // Put the content document back on the source node.
    if let Some(el) = doc.get_node_mut(orig_id).and_then(|n| n.element_data_mut()) {
        el.special_data = SpecialData::Iframe(Box::new(snapdom_dom::IframeData {
            document: Some(inner_doc),
        }));
    }

    match rendered {
        Ok(svg_data_uri) => {
            let wrapper = doc.create_element(
                "div",
                &[(
                    "style",
                    format!(
                        "width:{width}px;height:{height}px;overflow:hidden;display:inline-block;"
                    )
                    .as_str(),
                )],
            );
            let img = doc.create_element(
                "img",
                &[
                    ("src", svg_data_uri.as_str()),
                    ("width", format!("{width}").as_str()),
                    ("height", format!("{height}").as_str()),
                    ("decoding", "sync"),
                    ("loading", "eager"),
                ],
            );
            doc.append_child(wrapper, img);
            session.node_map.insert(wrapper, orig_id);
            wrapper
        }
        Err(error) => {
            tracing::warn!("iframe capture failed, substituting placeholder: {error}");
            marker_iframe(doc, orig_id, width, height, session)
        }
    }
}

/// A bare `<iframe>` clone the driver later swaps for the gradient
/// placeholder.
fn marker_iframe(
    doc: &mut Document,
    orig_id: usize,
    width: f64,
    height: f64,
    session: &mut Session,
) -> usize {
    let clone = doc.create_element(
        "iframe",
        &[
            ("width", format!("{width}").as_str()),
            ("height", format!("{height}").as_str()),
        ],
    );
    doc.set_rect(
        clone,
        snapdom_traits::Rect::from_size(width, height),
    );
    session.node_map.insert(clone, orig_id);
    clone
}

// ------- style/url rewriting -------

/// Rewrites every non-`data:` `url(...)` occurrence in a CSS value into a
/// data URI via the fetcher, leaving entries unchanged when their fetch
/// fails.
pub async fn rewrite_css_urls(
    doc: &Document,
    fetcher: &Fetcher,
    css: &str,
    bucket: Bucket,
) -> String {
    let lower = css.to_ascii_lowercase();
    let mut out = String::new();
    let mut pos = 0;

    while let Some(found) = lower[pos..].find("url(") {
        let inner_start = pos + found + 4;
        let Some(end_rel) = css[inner_start..].find(')') else {
            break;
        };
        let inner_end = inner_start + end_rel;
        out.push_str(&css[pos..inner_start]);

        let inner = &css[inner_start..inner_end];
        let url = inner.trim().trim_matches(['"', '\'']).trim();

        if url.is_empty() || url.starts_with("data:") || url.starts_with('#') {
            out.push_str(inner);
        } else {
            let result = fetcher
                .snap_fetch(doc, url, FetchOptions::image(bucket).silent())
                .await;
            match result.payload() {
                Some(data_uri) => out.push_str(data_uri),
                None => {
                    // Keep the original entry and allow a later retry.
                    if let Some(absolute) = doc.resolve_url(url) {
                        fetcher.registry().forget(bucket, absolute.as_str());
                    }
                    out.push_str(inner);
                }
            }
        }
        out.push(')');
        pos = inner_end + 1;
    }
    out.push_str(&css[pos..]);
    out
}

async fn inline_style_property(
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
    let rewritten = rewrite_css_urls(doc, fetcher, &value, Bucket::Background).await;
    if rewritten != value {
        style.set(property, rewritten);
    }
}

// ------- blob sweep -------

/// Walks the clone and converts every remaining `blob:` URL — `src`,
/// `srcset` entries (descriptors preserved), `href`/`xlink:href`, `poster`,
/// inline style attributes and `<style>` text — into data URIs. Attributes
/// are left unchanged when conversion fails, and memo entries are cleared
/// so a later capture may retry.
pub async fn resolve_blob_urls(doc: &mut Document, clone_root: usize, fetcher: &Fetcher) {
    let ids: Vec<usize> = TreeTraverser::new_with_root(doc, clone_root).collect();

    for id in ids {
        let Some(node) = doc.get_node(id) else { continue };
        let Some(el) = node.element_data() else { continue };

        // Collect the rewrites first; attribute mutation happens after the
        // awaits so the borrow never spans one.
        let mut updates: Vec<(snapdom_dom::QualName, String)> = Vec::new();
        let mut remove_xlink = false;

        let attrs = el.attrs.clone();
        for attr in &attrs {
            let local = attr.name.local.as_ref();
            match local {
                "src" | "poster" if attr.value.starts_with("blob:") => {
                    if let Some(data) = blob_to_data_uri(doc, fetcher, &attr.value).await {
                        updates.push((attr.name.clone(), data));
                    }
                }
                "srcset" => {
                    if attr.value.contains("blob:") {
                        let rewritten = rewrite_srcset(doc, fetcher, &attr.value).await;
                        updates.push((attr.name.clone(), rewritten));
                    }
                }
                "href" if attr.value.starts_with("blob:") => {
                    if let Some(data) = blob_to_data_uri(doc, fetcher, &attr.value).await {
                        updates.push((attr.name.clone(), data));
                    }
                }
                "style" if attr.value.contains("blob:") => {
                    let rewritten =
                        rewrite_css_urls(doc, fetcher, &attr.value, Bucket::Background).await;
                    updates.push((attr.name.clone(), rewritten));
                }
                _ => {}
            }

            // xlink:href moves to href.
            if attr.name.prefix.is_some() && local == "href" {
                let value = if attr.value.starts_with("blob:") {
                    blob_to_data_uri(doc, fetcher, &attr.value)
                        .await
                        .unwrap_or_else(|| attr.value.clone())
                } else {
                    attr.value.clone()
                };
                updates.push((attr_name("href"), value));
                remove_xlink = true;
            }
        }

        if updates.is_empty() && !remove_xlink {
            continue;
        }
        let Some(el) = doc.get_node_mut(id).and_then(|n| n.element_data_mut()) else {
            continue;
        };
        for (name, value) in updates {
            el.set_attr(name, value);
        }
        if remove_xlink {
            el.attrs
                .retain(|a| !(a.name.prefix.is_some() && a.name.local.as_ref() == "href"));
        }
    }

    // <style> text children inside the clone.
    let style_ids: Vec<usize> = TreeTraverser::new_with_root(doc, clone_root)
        .filter(|id| {
            doc.get_node(*id)
                .is_some_and(|n| n.data.is_element_with_tag_name(&local_name!("style")))
        })
        .collect();
    for style_id in style_ids {
        let text = doc.text_content(style_id);
        if !text.contains("blob:") {
            continue;
        }
        let rewritten = rewrite_css_urls(doc, fetcher, &text, Bucket::Background).await;
        let children = doc
            .get_node(style_id)
            .map(|n| n.children.clone())
            .unwrap_or_default();
        for child in children {
            doc.remove_subtree(child);
        }
        let text_node = doc.create_text_node(&rewritten);
        doc.append_child(style_id, text_node);
    }
}

async fn blob_to_data_uri(doc: &Document, fetcher: &Fetcher, url: &str) -> Option<String> {
    let result = fetcher
        .snap_fetch(doc, url, FetchOptions::data_url(Bucket::Image).silent())
        .await;
    result.payload().map(str::to_string)
}

async fn rewrite_srcset(doc: &Document, fetcher: &Fetcher, srcset: &str) -> String {
    let mut entries = Vec::new();
    for entry in srcset.split(',') {
        let entry = entry.trim();
        let mut parts = entry.split_ascii_whitespace();
        let Some(url) = parts.next() else {
            continue;
        };
        let descriptor = parts.collect::<Vec<_>>().join(" ");
        let url = if url.starts_with("blob:") {
            blob_to_data_uri(doc, fetcher, url)
                .await
                .unwrap_or_else(|| url.to_string())
        } else {
            url.to_string()
        };
        if descriptor.is_empty() {
            entries.push(url);
        } else {
            entries.push(format!("{url} {descriptor}"));
        }
    }
    entries.join(", ")
}

// ------- transforms -------

/// Strips the translation components out of the root's transform and
/// assigns the remainder to the clone root as inline style, so the capture
/// origin lands at (0, 0) while rotations/scales survive.
fn strip_root_translation(
    doc: &mut Document,
    root_id: usize,
    clone_root: usize,
    session: &Session,
) {
    let transform = session
        .style_cache
        .get(&root_id)
        .and_then(|style| style.get("transform"))
        .map(str::to_string);
    let Some(transform) = transform else {
        return;
    };
    if transform == "none" {
        return;
    }

    let stripped = strip_translation(&transform);
    let value = if stripped.is_empty() {
        "none".to_string()
    } else {
        stripped
    };
    if let Some(el) = doc.get_node_mut(clone_root).and_then(|n| n.element_data_mut()) {
        let existing = el.attr(local_name!("style")).unwrap_or("").to_string();
        el.set_attr(attr_name("style"), format!("{existing}transform:{value};"));
    }
}

/// Drops `translate*` functions and zeroes the translation entries of
/// `matrix`/`matrix3d`.
pub fn strip_translation(transform: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut rest = transform.trim();

    while let Some(open) = rest.find('(') {
        let name = rest[..open].trim().to_ascii_lowercase();
        let Some(close) = rest[open..].find(')') else {
            break;
        };
        let close = open + close;
        let args = &rest[open + 1..close];

        match name.as_str() {
            "translate" | "translatex" | "translatey" | "translatez" | "translate3d" => {}
            "matrix" => {
                let mut parts: Vec<String> =
                    args.split(',').map(|p| p.trim().to_string()).collect();
                if parts.len() == 6 {
                    parts[4] = "0".to_string();
                    parts[5] = "0".to_string();
                    let is_identity = parts == ["1", "0", "0", "1", "0", "0"];
                    if !is_identity {
                        out.push(format!("matrix({})", parts.join(", ")));
                    }
                }
            }
            "matrix3d" => {
                let mut parts: Vec<String> =
                    args.split(',').map(|p| p.trim().to_string()).collect();
                if parts.len() == 16 {
                    parts[12] = "0".to_string();
                    parts[13] = "0".to_string();
                    out.push(format!("matrix3d({})", parts.join(", ")));
                }
            }
            _ => out.push(format!("{}({})", rest[..open].trim(), args)),
        }
        rest = rest[close + 1..].trim_start();
    }
    out.join(" ")
}

// ------- outline stabilization -------

/// Outlines don't render inside `foreignObject`; when the source box shows
/// one without a border, a transparent border of the same width keeps the
/// clone box identical.
fn stabilize_outline(style: &mut StyleMap) {
    let outline_style = style.get_or("outline-style", "none").to_string();
    let outline_width = style.get_or("outline-width", "0px").to_string();
    if outline_style == "none" || outline_width.starts_with('0') {
        return;
    }
    let border_width = style.get_or("border-width", "0px").to_string();
    if !border_width.split_ascii_whitespace().all(|w| w.starts_with('0')) {
        return;
    }
    style.set("border", format!("{outline_width} solid transparent"));
    style.set("border-width", outline_width.to_string());
    style.set("border-style", "solid");
    style.remove("outline");
    style.remove("outline-style");
    style.remove("outline-width");
    style.remove("outline-color");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_translate_functions() {
        assert_eq!(strip_translation("translate(10px, 20px)"), "");
        assert_eq!(
            strip_translation("translateX(5px) rotate(45deg)"),
            "rotate(45deg)"
        );
        assert_eq!(
            strip_translation("scale(2) translate3d(1px, 2px, 3px)"),
            "scale(2)"
        );
    }

    #[test]
    fn zeroes_matrix_translation() {
        assert_eq!(
            strip_translation("matrix(1, 0, 0, 1, 10, 20)"),
            ""
        );
        assert_eq!(
            strip_translation("matrix(0, 1, -1, 0, 10, 20)"),
            "matrix(0, 1, -1, 0, 0, 0)"
        );
    }

    #[test]
    fn srcset_candidate_selection() {
        assert_eq!(
            pick_srcset_candidate("a.png 1x, b.png 2x", 2.0).as_deref(),
            Some("b.png")
        );
        assert_eq!(
            pick_srcset_candidate("a.png 1x, b.png 2x", 1.0).as_deref(),
            Some("a.png")
        );
        assert_eq!(
            pick_srcset_candidate("s.png 320w, l.png 1024w", 1.0).as_deref(),
            Some("l.png")
        );
    }

    #[test]
    fn shadow_selector_rewrites() {
        assert_eq!(
            rewrite_shadow_selector(":host", "s1"),
            ":where([data-sd=\"s1\"])"
        );
        assert_eq!(
            rewrite_shadow_selector(":host(.dark)", "s1"),
            ":where([data-sd=\"s1\"]:is(.dark))"
        );
        assert_eq!(
            rewrite_shadow_selector(":host-context(.theme)", "s2"),
            ":where(:where(.theme) [data-sd=\"s2\"])"
        );
        assert_eq!(
            rewrite_shadow_selector("::slotted(p)", "s1"),
            ":where([data-sd=\"s1\"] p)"
        );
        assert_eq!(
            rewrite_shadow_selector(".button", "s1"),
            ":where([data-sd=\"s1\"] .button:not([data-sd-slotted]))"
        );
    }

    #[test]
    fn shadow_css_block_rewrite() {
        let css = ".a { color: red; } :host { display: block; }";
        let out = rewrite_shadow_css(css, "s1");
        assert_eq!(
            out,
            ":where([data-sd=\"s1\"] .a:not([data-sd-slotted])){color: red;}\
             :where([data-sd=\"s1\"]){display: block;}"
        );
    }

    #[test]
    fn outline_becomes_transparent_border() {
        let mut style = StyleMap::from_inline_css(
            "outline-style: solid; outline-width: 2px; border-width: 0px",
        );
        stabilize_outline(&mut style);
        assert_eq!(style.get("border"), Some("2px solid transparent"));
        assert_eq!(style.get("outline-style"), None);

        // With an existing border, nothing changes.
        let mut bordered = StyleMap::from_inline_css(
            "outline-style: solid; outline-width: 2px; border-width: 1px",
        );
        stabilize_outline(&mut bordered);
        assert_eq!(bordered.get("outline-style"), Some("solid"));
    }

    #[test]
    fn clamp_text_uses_probe() {
        use snapdom_traits::HeuristicLayoutProbe;
        let probe = HeuristicLayoutProbe;
        let style = StyleMap::from_inline_css("font-size: 16px; line-height: 20px");
        // 8px advance, 80px wide => 10 chars/line; 2 lines => 20 chars max.
        let clamped = clamp_text(&"x".repeat(100), 2, &style, 80.0, &probe).unwrap();
        assert!(clamped.ends_with('\u{2026}'));
        assert!(clamped.chars().count() <= 21);

        assert!(clamp_text("short", 2, &style, 80.0, &probe).is_none());
    }
}
