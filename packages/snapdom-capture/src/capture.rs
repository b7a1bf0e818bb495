//! The capture driver: measures the root, runs the clone engine, assembles
//! the `<svg><foreignObject>` document and serializes it to a
//! `data:image/svg+xml` URI.

use std::sync::Arc;

use percent_encoding::utf8_percent_encode;
use snapdom_dom::serialize::serialize_subtree;
use snapdom_dom::{Document, TreeTraverser, local_name};
use snapdom_traits::layout::{HeuristicLayoutProbe, SharedLayoutProbe};
use snapdom_traits::net::SharedBackend;

use crate::cache::CacheRegistry;
use crate::clone::{CloneDeps, prepare_clone};
use crate::error::CaptureError;
use crate::fetch::{COMPONENT, Fetcher};
use crate::fonts::{EmbedFontsParams, collect_used_codepoints, collect_used_font_variants, embed_custom_fonts};
use crate::options::{CaptureContext, CaptureOptions};
use crate::session::Session;
use crate::styles::{collect_used_tag_names, generate_deduped_base_css};

/// Collaborators a capture runs against.
#[derive(Clone)]
pub struct CaptureDeps {
    pub backend: SharedBackend,
    pub registry: Arc<CacheRegistry>,
    pub probe: SharedLayoutProbe,
}

impl CaptureDeps {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            backend,
            registry: CacheRegistry::shared(),
            probe: Arc::new(HeuristicLayoutProbe),
        }
    }
}

/// Captures the subtree rooted at `root_id` and returns the canonical SVG
/// data URI.
pub async fn capture_dom(
    doc: &mut Document,
    root_id: usize,
    options: CaptureOptions,
    deps: &CaptureDeps,
) -> Result<String, CaptureError> {
    let ctx = CaptureContext::from_options(options)?;

    let root = doc
        .get_node(root_id)
        .ok_or_else(|| CaptureError::BadInput(format!("node {root_id} does not exist")))?;
    if !root.is_element() {
        return Err(CaptureError::BadInput(
            "capture root must be an element".to_string(),
        ));
    }
    let rect = root.rect;
    if !rect.is_finite() {
        return Err(CaptureError::Measure(format!(
            "bounding rect of node {root_id} is not finite"
        )));
    }
    let width = rect.width.max(0.0);
    let height = rect.height.max(0.0);

    let policy = deps.registry.apply_policy(ctx.cache);
    let fetcher = Fetcher::new(
        deps.backend.clone(),
        deps.registry.clone(),
        policy,
        ctx.use_proxy.clone(),
    );

    // Font embedding reads the source subtree, not the clone: required
    // variants and used codepoints are what the original renders with.
    let font_css = if ctx.embed_fonts {
        let required = collect_used_font_variants(doc, root_id);
        let used_codepoints = collect_used_codepoints(doc, root_id);
        embed_custom_fonts(
            doc,
            &fetcher,
            &ctx,
            EmbedFontsParams {
                required: &required,
                used_codepoints: &used_codepoints,
                inject: true,
            },
        )
        .await
    } else {
        String::new()
    };

    let mut session = Session::new();
    let clone_deps = CloneDeps {
        ctx: &ctx,
        fetcher: &fetcher,
        probe: deps.probe.as_ref(),
    };
    let clone = prepare_clone(doc, root_id, &clone_deps, &mut session).await?;

    apply_capture_attributes(doc, clone.clone_root);
    substitute_failed_iframes(doc, clone.clone_root);

    // Assemble CSS: overflow guarantees, baseline tag CSS, reusable
    // classes (with shadow scopes), embedded fonts.
    let mut css = String::from("svg{overflow:visible}foreignObject{overflow:visible}");
    let tags = collect_used_tag_names(doc, clone.clone_root);
    css.push_str(&generate_deduped_base_css(fetcher.registry(), &tags));
    css.push_str(&clone.class_css);
    css.push_str(&font_css);

    let svg_id = build_svg_document(doc, clone.clone_root, &ctx, width, height, &css);

    let mut markup = String::new();
    serialize_subtree(doc, svg_id, &mut markup);

    // The clone (now inside the svg wrapper) is owned by this capture only.
    doc.remove_subtree(svg_id);

    Ok(format!(
        "data:image/svg+xml;charset=utf-8,{}",
        utf8_percent_encode(&markup, COMPONENT)
    ))
}

/// Entry point for recursive captures (iframes) that already hold a fetcher
/// configuration.
pub(crate) async fn capture_dom_with(
    doc: &mut Document,
    root_id: usize,
    options: CaptureOptions,
    backend: SharedBackend,
    registry: Arc<CacheRegistry>,
) -> Result<String, CaptureError> {
    let deps = CaptureDeps {
        backend,
        registry,
        probe: Arc::new(HeuristicLayoutProbe),
    };
    capture_dom(doc, root_id, options, &deps).await
}

/// Honors the `data-capture` attributes on clone elements:
/// `exclude` drops the node, `placeholder` swaps it for a span holding
/// `data-placeholder-text`.
fn apply_capture_attributes(doc: &mut Document, clone_root: usize) {
    let ids: Vec<usize> = TreeTraverser::new_with_root(doc, clone_root).collect();
    for id in ids {
        let Some(el) = doc.get_node(id).and_then(|n| n.element_data()) else {
            continue;
        };
        let mode = el
            .attrs
            .iter()
            .find(|a| a.name.local.as_ref() == "data-capture")
            .map(|a| a.value.clone());
        let placeholder_text = el
            .attrs
            .iter()
            .find(|a| a.name.local.as_ref() == "data-placeholder-text")
            .map(|a| a.value.clone());

        match mode.as_deref() {
            Some("exclude") => {
                doc.remove_subtree(id);
            }
            Some("placeholder") => {
                let span = doc.create_element("span", &[]);
                let text_node = doc.create_text_node(&placeholder_text.unwrap_or_default());
                doc.append_child(span, text_node);
                doc.replace_subtree(id, span);
            }
            _ => {}
        }
    }
}

/// Replaces `<iframe>` clones that could not be rasterized with a visible
/// placeholder box of the same dimensions.
fn substitute_failed_iframes(doc: &mut Document, clone_root: usize) {
    let ids: Vec<usize> = TreeTraverser::new_with_root(doc, clone_root)
        .filter(|id| {
            doc.get_node(*id)
                .is_some_and(|n| n.data.is_element_with_tag_name(&local_name!("iframe")))
        })
        .collect();
    for id in ids {
        let rect = doc.get_node(id).map(|n| n.rect).unwrap_or_default();
        let width = format_css_number(rect.width.max(0.0));
        let height = format_css_number(rect.height.max(0.0));
        let style = format!(
            "width:{width}px;height:{height}px;display:inline-block;\
             background:repeating-linear-gradient(45deg,#ddd,#ddd 5px,#f9f9f9 5px,#f9f9f9 10px);"
        );
        let placeholder = doc.create_element("div", &[("style", style.as_str())]);
        doc.replace_subtree(id, placeholder);
    }
}

/// Builds the `<svg><foreignObject><div>...` wrapper around the clone and
/// returns the svg node id.
fn build_svg_document(
    doc: &mut Document,
    clone_root: usize,
    ctx: &CaptureContext,
    width: f64,
    height: f64,
    css: &str,
) -> usize {
    let w = format_css_number(width);
    let h = format_css_number(height);

    let svg = doc.create_element(
        "svg",
        &[
            ("xmlns", "http://www.w3.org/2000/svg"),
            ("width", w.as_str()),
            ("height", h.as_str()),
            ("viewBox", format!("0 0 {w} {h}").as_str()),
        ],
    );

    let foreign_object = doc.create_element(
        "foreignObject",
        &[
            ("x", "0"),
            ("y", "0"),
            ("width", w.as_str()),
            ("height", h.as_str()),
        ],
    );

    let wrapper_style = wrapper_style(ctx);
    let mut wrapper_attrs: Vec<(&str, &str)> =
        vec![("xmlns", "http://www.w3.org/1999/xhtml")];
    if !wrapper_style.is_empty() {
        wrapper_attrs.push(("style", wrapper_style.as_str()));
    }
    let wrapper = doc.create_element("div", &wrapper_attrs);

    let style_el = doc.create_element("style", &[]);
    let css_text = doc.create_text_node(css);
    doc.append_child(style_el, css_text);

    doc.append_child(svg, foreign_object);
    doc.append_child(foreign_object, wrapper);
    doc.append_child(wrapper, style_el);
    doc.append_child(wrapper, clone_root);

    svg
}

/// Sizing options resolve to wrapper styles: explicit width/height pin the
/// wrapper box; `scale` applies a transform from the top-left corner.
fn wrapper_style(ctx: &CaptureContext) -> String {
    let mut style = String::new();
    if let Some(width) = ctx.width {
        style.push_str(&format!("width:{width}px;"));
    }
    if let Some(height) = ctx.height {
        style.push_str(&format!("height:{height}px;"));
    }
    if ctx.scale != 1.0 {
        style.push_str(&format!(
            "transform:scale({});transform-origin:0 0;",
            format_css_number(ctx.scale)
        ));
    }
    style
}

/// Prints a CSS number without a trailing `.0`, keeping fractional values.
pub fn format_css_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        let formatted = format!("{value:.3}");
        formatted.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn css_number_formatting() {
        assert_eq!(format_css_number(100.0), "100");
        assert_eq!(format_css_number(50.5), "50.5");
        assert_eq!(format_css_number(33.3333333), "33.333");
        assert_eq!(format_css_number(0.0), "0");
    }
}
