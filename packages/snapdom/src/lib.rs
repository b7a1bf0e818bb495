//! snapdom
//!
//! Captures a subtree of a document snapshot into a self-contained,
//! resolution-independent SVG — and from there into PNG, JPEG or WebP via a
//! pluggable rasterizer.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use snapdom::{CaptureOptions, Snapdom, SnapdomConfig};
//! use snapdom_dom::document::{Document, DocumentConfig};
//! use snapdom_traits::Rect;
//!
//! let mut doc = Document::new(DocumentConfig::default());
//! snapdom_html::DocumentHtmlParser::parse_into_doc(&mut doc, "<div>Hello</div>");
//! let root = doc.try_root_element().map(|n| n.id).unwrap();
//! doc.set_rect(root, Rect::from_size(100.0, 50.0));
//!
//! let snapdom = Snapdom::new(SnapdomConfig::default());
//! let result = snapdom.capture(&mut doc, root, CaptureOptions::default()).await?;
//! let svg_data_uri = result.to_raw();
//! # let _ = svg_data_uri;
//! # Ok(())
//! # }
//! ```

mod result;

use std::sync::Arc;

use snapdom_capture::capture::CaptureDeps;
use snapdom_capture::{CaptureContext, capture_dom, pre_cache};
use snapdom_dom::Document;
use snapdom_traits::layout::SharedLayoutProbe;
use snapdom_traits::net::SharedBackend;
use snapdom_traits::raster::{DummyRasterizer, SharedRasterizer};
use snapdom_traits::{HeuristicLayoutProbe, Rect};

pub use result::{CaptureResult, ExportError};
pub use snapdom_capture::{
    CachePolicy, CacheRegistry, CaptureError, CaptureOptions, FontExclusion, LocalFontFace,
    OutputFormat, PreCacheOptions,
};

/// Collaborator wiring for a [`Snapdom`] instance. Every field has a
/// sensible default: the bundled network backend (with the `net` feature),
/// a fresh cache registry, the heuristic layout probe, and a rasterizer
/// that declines (SVG output still works without one).
#[derive(Default)]
pub struct SnapdomConfig {
    pub backend: Option<SharedBackend>,
    pub registry: Option<Arc<CacheRegistry>>,
    pub probe: Option<SharedLayoutProbe>,
    pub rasterizer: Option<SharedRasterizer>,
}

/// The user-facing capture façade.
pub struct Snapdom {
    deps: CaptureDeps,
    rasterizer: SharedRasterizer,
}

impl Snapdom {
    pub fn new(config: SnapdomConfig) -> Self {
        let backend = config.backend.unwrap_or_else(default_backend);
        let deps = CaptureDeps {
            backend,
            registry: config.registry.unwrap_or_else(CacheRegistry::shared),
            probe: config
                .probe
                .unwrap_or_else(|| Arc::new(HeuristicLayoutProbe)),
        };
        Self {
            deps,
            rasterizer: config.rasterizer.unwrap_or_else(|| Arc::new(DummyRasterizer)),
        }
    }

    pub fn registry(&self) -> &Arc<CacheRegistry> {
        &self.deps.registry
    }

    /// Captures the subtree rooted at `root_id`.
    pub async fn capture(
        &self,
        doc: &mut Document,
        root_id: usize,
        options: CaptureOptions,
    ) -> Result<CaptureResult, CaptureError> {
        let ctx = CaptureContext::from_options(options.clone())?;
        let rect = doc
            .get_node(root_id)
            .map(|node| node.rect)
            .unwrap_or(Rect::ZERO);

        let raw = capture_dom(doc, root_id, options, &self.deps).await?;
        Ok(CaptureResult::new(
            raw,
            rect.width.max(0.0),
            rect.height.max(0.0),
            ctx,
            self.rasterizer.clone(),
        ))
    }

    /// Warms the cache registry for a subtree ahead of a capture.
    pub async fn pre_cache(
        &self,
        doc: &mut Document,
        root_id: usize,
        options: PreCacheOptions,
    ) -> Result<(), CaptureError> {
        pre_cache(doc, root_id, options, &self.deps).await
    }
}

#[cfg(feature = "net")]
fn default_backend() -> SharedBackend {
    snapdom_net::Backend::shared()
}

#[cfg(not(feature = "net"))]
fn default_backend() -> SharedBackend {
    Arc::new(snapdom_traits::net::DummyFetchBackend)
}
