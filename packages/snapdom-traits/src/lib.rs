//! Shared traits and types for the snapdom capture pipeline.
//!
//! The capture engine only ever talks to the outside world through the
//! contracts defined here: fetching bytes ([`net`]), measuring text
//! ([`layout`]) and turning a finished SVG into pixels ([`raster`]).
//! Embedders provide implementations; the `snapdom-net` crate ships the
//! production network backend.

pub mod geometry;
pub mod layout;
pub mod net;
pub mod raster;

pub use geometry::Rect;
pub use layout::{HeuristicLayoutProbe, LayoutProbe, SharedLayoutProbe, TextProbe};
pub use net::{
    BoxedFetchFuture, FetchBackend, FetchError, FetchRequest, FetchResponse, SharedBackend,
};
pub use raster::{DummyRasterizer, RasterError, Rasterizer, RgbaBitmap, SharedRasterizer};
