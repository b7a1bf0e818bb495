//! snapdom-capture
//!
//! The capture pipeline: given a document snapshot and a root element, this
//! crate produces a self-contained, resolution-independent SVG data URI —
//! an XHTML clone of the subtree inside a `<foreignObject>`, with every
//! style frozen, every pseudo-element and counter materialized, shadow DOM
//! mirrored under scoped CSS, same-origin iframes rasterized, fonts
//! subsetted and inlined, and no network-dependent URL left in the output.
//!
//! The pipeline talks to the world only through `snapdom-traits`: a fetch
//! backend, a layout probe, and (downstream) a rasterizer.

/// The process-wide cache registry: typed stores, single-flight
/// memoization, negative cooldowns.
pub mod cache;

/// The no-throw resource fetcher.
pub mod fetch;

/// Per-tag default styles, style keys, reusable class generation.
pub mod styles;

/// `<use>`/`url(#id)` reference resolution into an in-tree defs container.
pub mod defs;

/// CSS counter context and formatting.
pub mod counters;

/// Pseudo-element preflight and materialization.
pub mod pseudo;

/// Font variant collection, `@font-face` matching, embedding.
pub mod fonts;

/// The clone engine.
pub mod clone;

/// The capture driver.
pub mod capture;

/// Cache warm-up.
pub mod precache;

/// Options and the frozen capture context.
pub mod options;

/// Per-capture scratch state.
pub mod session;

pub mod error;

pub use cache::{Bucket, CacheRegistry, NEGATIVE_COOLDOWN};
pub use capture::{CaptureDeps, capture_dom};
pub use error::CaptureError;
pub use fetch::{FailureReason, FetchAs, FetchData, FetchOptions, Fetcher, SnapFetchResult};
pub use options::{
    CachePolicy, CaptureContext, CaptureOptions, FontExclusion, LocalFontFace, OutputFormat,
};
pub use precache::{PreCacheOptions, pre_cache};
pub use session::Session;
