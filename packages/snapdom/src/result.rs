//! The capture result: the canonical SVG data URI plus the derived forms.
//!
//! `to_raw` is free; every raster form goes through the configured
//! [`Rasterizer`] at `natural size × scale × dpr` and is encoded with the
//! `image` crate. Lossy formats composite over the capture's background
//! color first.

use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ImageEncoder, RgbaImage};
use percent_encoding::percent_decode_str;
use snapdom_capture::{CaptureContext, OutputFormat};
use snapdom_traits::raster::{RasterError, Rasterizer, RgbaBitmap, SharedRasterizer};

/// A failure deriving an export from a capture.
#[derive(Debug)]
pub enum ExportError {
    Raster(RasterError),
    Encode(String),
    Io(std::io::Error),
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::Raster(e) => write!(f, "rasterization failed: {e}"),
            ExportError::Encode(msg) => write!(f, "encoding failed: {msg}"),
            ExportError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for ExportError {}

impl From<RasterError> for ExportError {
    fn from(value: RasterError) -> Self {
        Self::Raster(value)
    }
}

impl From<std::io::Error> for ExportError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

pub struct CaptureResult {
    raw: String,
    width: f64,
    height: f64,
    ctx: CaptureContext,
    rasterizer: SharedRasterizer,
}

impl CaptureResult {
    pub(crate) fn new(
        raw: String,
        width: f64,
        height: f64,
        ctx: CaptureContext,
        rasterizer: SharedRasterizer,
    ) -> Self {
        Self {
            raw,
            width,
            height,
            ctx,
            rasterizer,
        }
    }

    /// The canonical SVG data URI.
    pub fn to_raw(&self) -> &str {
        &self.raw
    }

    /// Natural capture size in CSS pixels.
    pub fn natural_size(&self) -> (f64, f64) {
        (self.width, self.height)
    }

    /// The decoded SVG markup.
    pub fn svg_markup(&self) -> String {
        let body = self
            .raw
            .strip_prefix("data:image/svg+xml;charset=utf-8,")
            .unwrap_or(&self.raw);
        percent_decode_str(body)
            .decode_utf8()
            .map(|s| s.into_owned())
            .unwrap_or_default()
    }

    /// Output pixel dimensions: natural size × scale × dpr, ceiled.
    pub fn pixel_size(&self) -> (u32, u32) {
        let w = (self.width * self.ctx.scale * self.ctx.dpr).ceil().max(1.0) as u32;
        let h = (self.height * self.ctx.scale * self.ctx.dpr).ceil().max(1.0) as u32;
        (w, h)
    }

    /// Rasterizes to an RGBA bitmap (`to_canvas` in the original API — the
    /// raw pixel buffer is the closest thing to a canvas here).
    pub fn to_canvas(&self) -> Result<RgbaBitmap, ExportError> {
        let (w, h) = self.pixel_size();
        Ok(self.rasterizer.rasterize(&self.raw, w, h)?)
    }

    /// Rasterizes to a decoded image.
    pub fn to_img(&self) -> Result<DynamicImage, ExportError> {
        let bitmap = self.to_canvas()?;
        let buffer = RgbaImage::from_raw(bitmap.width, bitmap.height, bitmap.pixels)
            .ok_or_else(|| ExportError::Encode("rasterizer returned a short buffer".into()))?;
        Ok(DynamicImage::ImageRgba8(buffer))
    }

    /// PNG-encoded bytes.
    pub fn to_png(&self) -> Result<Vec<u8>, ExportError> {
        let image = self.composited()?;
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, image::ImageFormat::Png)
            .map_err(|e| ExportError::Encode(e.to_string()))?;
        Ok(out.into_inner())
    }

    /// JPEG-encoded bytes (composited over the background color).
    pub fn to_jpg(&self) -> Result<Vec<u8>, ExportError> {
        let image = self.composited()?.to_rgb8();
        let quality = (self.ctx.quality * 100.0).round().clamp(1.0, 100.0) as u8;
        let mut out = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode_image(&image)
            .map_err(|e| ExportError::Encode(e.to_string()))?;
        Ok(out.into_inner())
    }

    /// WebP-encoded bytes (lossless).
    pub fn to_webp(&self) -> Result<Vec<u8>, ExportError> {
        let image = self.composited()?.to_rgba8();
        let mut out = Cursor::new(Vec::new());
        WebPEncoder::new_lossless(&mut out)
            .write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ExtendedColorType::Rgba8,
            )
            .map_err(|e| ExportError::Encode(e.to_string()))?;
        Ok(out.into_inner())
    }

    /// Encoded bytes plus mime type in the capture's configured format.
    pub fn to_blob(&self) -> Result<(String, Vec<u8>), ExportError> {
        let bytes = match self.ctx.format {
            OutputFormat::Svg => self.svg_markup().into_bytes(),
            OutputFormat::Png => self.to_png()?,
            OutputFormat::Jpg | OutputFormat::Jpeg => self.to_jpg()?,
            OutputFormat::Webp => self.to_webp()?,
        };
        Ok((self.ctx.format.mime().to_string(), bytes))
    }

    /// Writes the capture to disk in the configured format.
    pub fn download(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        let (_, bytes) = self.to_blob()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// The rasterized image with the configured background composited in.
    fn composited(&self) -> Result<DynamicImage, ExportError> {
        let image = self.to_img()?;
        let Some(color) = self
            .ctx
            .background_color
            .as_deref()
            .and_then(parse_css_color)
        else {
            return Ok(image);
        };

        let mut rgba = image.to_rgba8();
        for pixel in rgba.pixels_mut() {
            let alpha = pixel[3] as u32;
            if alpha == 255 {
                continue;
            }
            for channel in 0..3 {
                let fg = pixel[channel] as u32;
                let bg = color[channel] as u32;
                pixel[channel] = ((fg * alpha + bg * (255 - alpha)) / 255) as u8;
            }
            pixel[3] = 255;
        }
        Ok(DynamicImage::ImageRgba8(rgba))
    }
}

/// Parses the small set of CSS colors the background option accepts:
/// `#rgb`, `#rrggbb`, `rgb(...)`/`rgba(...)` and a few keywords.
fn parse_css_color(value: &str) -> Option<[u8; 3]> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "white" => return Some([255, 255, 255]),
        "black" => return Some([0, 0, 0]),
        "transparent" => return None,
        _ => {}
    }

    if let Some(hex) = value.strip_prefix('#') {
        return match hex.len() {
            3 | 4 => {
                let r = u8::from_str_radix(&hex[0..1], 16).ok()?;
                let g = u8::from_str_radix(&hex[1..2], 16).ok()?;
                let b = u8::from_str_radix(&hex[2..3], 16).ok()?;
                Some([r * 17, g * 17, b * 17])
            }
            6 | 8 => {
                let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
                let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
                let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
                Some([r, g, b])
            }
            _ => None,
        };
    }

    if let Some(args) = value
        .strip_prefix("rgba(")
        .or_else(|| value.strip_prefix("rgb("))
    {
        let args = args.strip_suffix(')')?;
        let mut parts = args.split(',').map(str::trim);
        let r = parts.next()?.parse::<f32>().ok()?;
        let g = parts.next()?.parse::<f32>().ok()?;
        let b = parts.next()?.parse::<f32>().ok()?;
        return Some([r as u8, g as u8, b as u8]);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_colors() {
        assert_eq!(parse_css_color("#fff"), Some([255, 255, 255]));
        assert_eq!(parse_css_color("#102030"), Some([16, 32, 48]));
        assert_eq!(parse_css_color("rgb(1, 2, 3)"), Some([1, 2, 3]));
        assert_eq!(parse_css_color("white"), Some([255, 255, 255]));
        assert_eq!(parse_css_color("transparent"), None);
        assert_eq!(parse_css_color("bogus"), None);
    }
}
