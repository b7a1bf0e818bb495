//! Rasterization is a collaborator, not part of the capture pipeline: the
//! engine produces a self-contained SVG data URI and hands it to a
//! [`Rasterizer`] when the caller asks for pixels.

use std::sync::Arc;

pub type SharedRasterizer = Arc<dyn Rasterizer>;

/// A decoded RGBA8 bitmap, row-major, premultiplied-alpha not assumed.
#[derive(Debug, Clone)]
pub struct RgbaBitmap {
    pub width: u32,
    pub height: u32,
    /// `width * height * 4` bytes.
    pub pixels: Vec<u8>,
}

impl RgbaBitmap {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), width as usize * height as usize * 4);
        Self {
            width,
            height,
            pixels,
        }
    }
}

/// Renders a finished SVG data URI at a concrete pixel size.
pub trait Rasterizer: Send + Sync + 'static {
    fn rasterize(
        &self,
        svg_data_uri: &str,
        width: u32,
        height: u32,
    ) -> Result<RgbaBitmap, RasterError>;
}

#[derive(Debug)]
pub enum RasterError {
    /// No rasterizer was configured for this capture.
    Unavailable,
    /// The collaborator failed to render.
    Render(String),
}

impl std::fmt::Display for RasterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RasterError::Unavailable => write!(f, "no rasterizer configured"),
            RasterError::Render(msg) => write!(f, "rasterization failed: {msg}"),
        }
    }
}

impl std::error::Error for RasterError {}

/// A default noop rasterizer.
#[derive(Default)]
pub struct DummyRasterizer;

impl Rasterizer for DummyRasterizer {
    fn rasterize(
        &self,
        _svg_data_uri: &str,
        _width: u32,
        _height: u32,
    ) -> Result<RgbaBitmap, RasterError> {
        Err(RasterError::Unavailable)
    }
}
