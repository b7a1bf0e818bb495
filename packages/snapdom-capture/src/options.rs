//! Capture options and their frozen, validated form.
//!
//! [`CaptureOptions`] is the loose record callers hand in (everything
//! optional); [`CaptureContext`] is the defaulted, validated configuration
//! the pipeline actually reads. Once built, a context never changes for the
//! duration of a capture.

use std::sync::Arc;

use snapdom_dom::Document;

use crate::error::CaptureError;

/// Output format of a capture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Jpg,
    Jpeg,
    Webp,
    #[default]
    Svg,
}

impl OutputFormat {
    /// Lossy raster formats get an opaque background by default.
    pub fn is_lossy(self) -> bool {
        matches!(self, OutputFormat::Jpg | OutputFormat::Jpeg | OutputFormat::Webp)
    }

    pub fn mime(self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpg | OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Svg => "image/svg+xml",
        }
    }
}

/// How the shared cache registry behaves for one capture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CachePolicy {
    /// Keep positive entries, clear negative (cooldown) entries.
    #[default]
    Soft,
    /// Keep both positive and negative entries.
    Full,
    /// Bypass the registry entirely for this capture.
    Disabled,
    /// `Full` while the registry is fresh, `Soft` afterwards.
    Auto,
}

/// A user-supplied font face to embed in addition to whatever the document
/// declares.
#[derive(Clone, Debug)]
pub struct LocalFontFace {
    pub family: String,
    /// URL of the binary payload.
    pub src: String,
    pub weight: Option<String>,
    pub style: Option<String>,
    pub stretch_pct: Option<f32>,
}

/// Rules for leaving fonts out of the embed step.
#[derive(Clone, Debug, Default)]
pub struct FontExclusion {
    /// Family names, matched case-insensitively.
    pub families: Vec<String>,
    /// URL domains of the face sources.
    pub domains: Vec<String>,
    /// Subset labels inferred from unicode-range
    /// (latin, latin-ext, greek, cyrillic, vietnamese).
    pub subsets: Vec<String>,
}

/// Element predicate: return `false` to drop an element (and subtree) from
/// the capture.
pub type ElementFilter = Arc<dyn Fn(&Document, usize) -> bool + Send + Sync>;

/// The options record accepted by the capture entry points. Unrecognized
/// concerns simply have no field here — construction is the validation
/// boundary.
#[derive(Clone, Default)]
pub struct CaptureOptions {
    /// Output scale factor (default 1).
    pub scale: Option<f64>,
    /// `true` (default): clone on the calling task without yielding.
    /// `false`: spread child cloning across cooperative yields.
    pub fast: Option<bool>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<OutputFormat>,
    /// CSS color composited under lossy rasters. Defaults to `#ffffff` for
    /// jpg/webp and to none for png/svg.
    pub background_color: Option<String>,
    /// Device pixel ratio for rasterization (default 1).
    pub dpr: Option<f64>,
    /// Encoding quality for lossy formats, 0..=1 (default 0.92).
    pub quality: Option<f64>,
    pub embed_fonts: Option<bool>,
    /// Family-name patterns treated as icon fonts.
    pub icon_fonts: Vec<String>,
    pub local_fonts: Vec<LocalFontFace>,
    pub exclude_fonts: Option<FontExclusion>,
    pub cache: Option<CachePolicy>,
    /// Proxy URL prefix. When non-empty, only proxied URLs are fetched.
    pub use_proxy: Option<String>,
    pub filter: Option<ElementFilter>,
    /// Patterns selecting elements to drop: `tag`, `.class` or `#id`.
    pub exclude: Vec<String>,
}

/// The frozen per-capture configuration.
#[derive(Clone)]
pub struct CaptureContext {
    pub scale: f64,
    pub fast: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: OutputFormat,
    pub background_color: Option<String>,
    pub dpr: f64,
    pub quality: f64,
    pub embed_fonts: bool,
    pub icon_fonts: Vec<String>,
    pub local_fonts: Vec<LocalFontFace>,
    pub exclude_fonts: Option<FontExclusion>,
    pub cache: CachePolicy,
    pub use_proxy: String,
    pub filter: Option<ElementFilter>,
    pub exclude: Vec<ExcludePattern>,
}

impl CaptureContext {
    /// Normalizes recognized options into the frozen configuration,
    /// rejecting values that can never produce a valid capture.
    pub fn from_options(options: CaptureOptions) -> Result<Self, CaptureError> {
        let scale = options.scale.unwrap_or(1.0);
        if !(scale.is_finite() && scale > 0.0) {
            return Err(CaptureError::BadInput(format!(
                "scale must be a positive number, got {scale}"
            )));
        }
        let dpr = options.dpr.unwrap_or(1.0);
        if !(dpr.is_finite() && dpr > 0.0) {
            return Err(CaptureError::BadInput(format!(
                "dpr must be a positive number, got {dpr}"
            )));
        }
        if options.width == Some(0) || options.height == Some(0) {
            return Err(CaptureError::BadInput(
                "width/height must be positive".to_string(),
            ));
        }
        let quality = options.quality.unwrap_or(0.92).clamp(0.0, 1.0);

        let format = options.format.unwrap_or_default();
        let background_color = match options.background_color {
            Some(color) => Some(color),
            None if format.is_lossy() => Some("#ffffff".to_string()),
            None => None,
        };

        Ok(Self {
            scale,
            fast: options.fast.unwrap_or(true),
            width: options.width,
            height: options.height,
            format,
            background_color,
            dpr,
            quality,
            embed_fonts: options.embed_fonts.unwrap_or(false),
            icon_fonts: options.icon_fonts,
            local_fonts: options.local_fonts,
            exclude_fonts: options.exclude_fonts,
            cache: options.cache.unwrap_or_default(),
            use_proxy: options.use_proxy.unwrap_or_default(),
            filter: options.filter,
            exclude: options
                .exclude
                .iter()
                .map(|p| ExcludePattern::parse(p))
                .collect(),
        })
    }

    /// Whether an element should be dropped from the clone.
    pub fn is_excluded(&self, doc: &Document, node_id: usize) -> bool {
        if let Some(filter) = &self.filter {
            if !filter(doc, node_id) {
                return true;
            }
        }
        if self.exclude.is_empty() {
            return false;
        }
        let Some(node) = doc.get_node(node_id) else {
            return false;
        };
        let Some(el) = node.element_data() else {
            return false;
        };
        self.exclude.iter().any(|pattern| pattern.matches(el))
    }
}

/// A minimal selector pattern: tag name, `.class` or `#id`.
#[derive(Clone, Debug, PartialEq)]
pub enum ExcludePattern {
    Tag(String),
    Class(String),
    Id(String),
}

impl ExcludePattern {
    pub fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim();
        if let Some(class) = pattern.strip_prefix('.') {
            ExcludePattern::Class(class.to_string())
        } else if let Some(id) = pattern.strip_prefix('#') {
            ExcludePattern::Id(id.to_string())
        } else {
            ExcludePattern::Tag(pattern.to_ascii_lowercase())
        }
    }

    pub fn matches(&self, el: &snapdom_dom::ElementNodeData) -> bool {
        match self {
            ExcludePattern::Tag(tag) => &*el.name.local == tag.as_str(),
            ExcludePattern::Id(id) => el.id.as_deref() == Some(id.as_str()),
            ExcludePattern::Class(class) => el
                .attr(snapdom_dom::local_name!("class"))
                .is_some_and(|value| value.split_ascii_whitespace().any(|c| c == class)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_frozen_in() {
        let ctx = CaptureContext::from_options(CaptureOptions::default()).unwrap();
        assert_eq!(ctx.scale, 1.0);
        assert!(ctx.fast);
        assert_eq!(ctx.format, OutputFormat::Svg);
        assert_eq!(ctx.background_color, None);
        assert_eq!(ctx.cache, CachePolicy::Soft);
        assert!(ctx.use_proxy.is_empty());
    }

    #[test]
    fn lossy_formats_get_white_background() {
        let ctx = CaptureContext::from_options(CaptureOptions {
            format: Some(OutputFormat::Jpg),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(ctx.background_color.as_deref(), Some("#ffffff"));
    }

    #[test]
    fn rejects_non_positive_scale() {
        for scale in [0.0, -1.0, f64::NAN] {
            let result = CaptureContext::from_options(CaptureOptions {
                scale: Some(scale),
                ..Default::default()
            });
            assert!(matches!(result, Err(CaptureError::BadInput(_))));
        }
    }

    #[test]
    fn exclude_patterns() {
        use snapdom_dom::document::{Document, DocumentConfig};
        let mut doc = Document::new(DocumentConfig::default());
        let div = doc.create_element("div", &[("class", "ads banner"), ("id", "promo")]);
        let el = doc.get_node(div).unwrap().element_data().unwrap();

        assert!(ExcludePattern::parse("div").matches(el));
        assert!(ExcludePattern::parse(".ads").matches(el));
        assert!(ExcludePattern::parse("#promo").matches(el));
        assert!(!ExcludePattern::parse(".other").matches(el));
    }
}
