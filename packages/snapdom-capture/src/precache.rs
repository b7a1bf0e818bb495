//! Cache warm-up: scans a subtree and populates the registry (and
//! optionally the embedded-font CSS) before a capture runs, so the capture
//! itself hits memory instead of the network.

use snapdom_dom::{Document, TreeTraverser, local_name};

use crate::cache::Bucket;
use crate::capture::CaptureDeps;
use crate::error::CaptureError;
use crate::fetch::{FetchOptions, Fetcher};
use crate::fonts::{EmbedFontsParams, collect_used_codepoints, collect_used_font_variants, embed_custom_fonts};
use crate::options::{CaptureContext, CaptureOptions};

/// Options for a warm-up pass.
#[derive(Clone, Default)]
pub struct PreCacheOptions {
    /// Clear the whole registry before warming.
    pub reset: bool,
    /// Also resolve and cache the embedded-font CSS.
    pub embed_fonts: bool,
    pub use_proxy: Option<String>,
    pub cache: Option<crate::options::CachePolicy>,
}

/// Scans the subtree under `root_id` and fetches what a capture of it would
/// need: `<img>` sources and style background images, plus (optionally) the
/// font CSS.
pub async fn pre_cache(
    doc: &mut Document,
    root_id: usize,
    options: PreCacheOptions,
    deps: &CaptureDeps,
) -> Result<(), CaptureError> {
    if options.reset {
        deps.registry.reset();
    }
    if doc.get_node(root_id).is_none() {
        return Err(CaptureError::BadInput(format!(
            "node {root_id} does not exist"
        )));
    }

    let ctx = CaptureContext::from_options(CaptureOptions {
        embed_fonts: Some(options.embed_fonts),
        use_proxy: options.use_proxy.clone(),
        cache: options.cache,
        ..Default::default()
    })?;
    let policy = deps.registry.effective_policy(ctx.cache);
    let fetcher = Fetcher::new(
        deps.backend.clone(),
        deps.registry.clone(),
        policy,
        ctx.use_proxy.clone(),
    );

    // Image sources.
    let mut image_urls = Vec::new();
    let mut style_values = Vec::new();
    for id in TreeTraverser::new_with_root(doc, root_id) {
        let Some(node) = doc.get_node(id) else { continue };
        let Some(el) = node.element_data() else { continue };
        if el.name.local == local_name!("img") {
            if let Some(src) = el.attr(local_name!("src")) {
                if !src.is_empty() && !src.starts_with("data:") {
                    image_urls.push(src.to_string());
                }
            }
        }
        if let Some(style) = &node.styles.primary {
            for property in ["background-image", "background", "mask-image"] {
                if let Some(value) = style.get(property) {
                    if value.to_ascii_lowercase().contains("url(") {
                        style_values.push(value.to_string());
                    }
                }
            }
        }
    }

    for url in image_urls {
        let _ = fetcher
            .snap_fetch(doc, &url, FetchOptions::image(Bucket::Image).silent())
            .await;
    }
    for value in style_values {
        let _ = crate::clone::rewrite_css_urls(doc, &fetcher, &value, Bucket::Background).await;
    }

    if ctx.embed_fonts {
        let required = collect_used_font_variants(doc, root_id);
        let used_codepoints = collect_used_codepoints(doc, root_id);
        embed_custom_fonts(
            doc,
            &fetcher,
            &ctx,
            EmbedFontsParams {
                required: &required,
                used_codepoints: &used_codepoints,
                inject: false,
            },
        )
        .await;
    }
    Ok(())
}
