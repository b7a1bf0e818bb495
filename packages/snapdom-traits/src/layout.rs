//! Host capability for the few measurements the capture engine cannot derive
//! from resolved geometry alone: how tall a run of text would be at a given
//! width, and the ink box of a single glyph (used when icon-font pseudo
//! content is inlined as an image).

use std::sync::Arc;

use crate::geometry::Rect;

pub type SharedLayoutProbe = Arc<dyn LayoutProbe>;

/// Font parameters for a text measurement, already resolved to concrete
/// values by the caller.
#[derive(Debug, Clone)]
pub struct TextProbe<'a> {
    pub font_family: &'a str,
    /// Font size in CSS pixels.
    pub font_size: f64,
    /// Used line height in CSS pixels (`normal` resolved upstream).
    pub line_height: f64,
}

/// A type that answers text-measurement questions for a Document.
///
/// Embedders with a real layout engine should forward these to it; the
/// [`HeuristicLayoutProbe`] fallback estimates from average glyph metrics,
/// which is good enough for line-clamp searches on plain text.
pub trait LayoutProbe: Send + Sync + 'static {
    /// Height in CSS pixels that `text` occupies when laid out in a block of
    /// the given `width`, i.e. the `scrollHeight` of a plain-text container.
    fn text_height(&self, text: &str, width: f64, font: &TextProbe<'_>) -> f64;

    /// Ink bounding box of a single glyph rendered at `font.font_size`.
    fn glyph_box(&self, ch: char, font: &TextProbe<'_>) -> Rect;
}

/// Estimates measurements from average glyph metrics: 0.5em advance per
/// character, no shaping, hard breaks on whitespace.
#[derive(Default)]
pub struct HeuristicLayoutProbe;

impl HeuristicLayoutProbe {
    const AVG_ADVANCE_EM: f64 = 0.5;
}

impl LayoutProbe for HeuristicLayoutProbe {
    fn text_height(&self, text: &str, width: f64, font: &TextProbe<'_>) -> f64 {
        if text.is_empty() {
            return 0.0;
        }
        let advance = font.font_size * Self::AVG_ADVANCE_EM;
        let per_line = if width > 0.0 {
            (width / advance).floor().max(1.0) as usize
        } else {
            usize::MAX
        };
        let mut lines = 0usize;
        for hard_line in text.split('\n') {
            let chars = hard_line.chars().count();
            lines += chars.div_ceil(per_line).max(1);
        }
        lines as f64 * font.line_height
    }

    fn glyph_box(&self, _ch: char, font: &TextProbe<'_>) -> Rect {
        Rect::from_size(font.font_size, font.font_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_wraps_text() {
        let probe = HeuristicLayoutProbe;
        let font = TextProbe {
            font_family: "serif",
            font_size: 16.0,
            line_height: 20.0,
        };
        // 8px advance, 80px wide => 10 chars per line.
        let one_line = probe.text_height("short", 80.0, &font);
        assert_eq!(one_line, 20.0);
        let three_lines = probe.text_height(&"x".repeat(25), 80.0, &font);
        assert_eq!(three_lines, 60.0);
    }

    #[test]
    fn taller_with_more_text() {
        let probe = HeuristicLayoutProbe;
        let font = TextProbe {
            font_family: "serif",
            font_size: 14.0,
            line_height: 18.0,
        };
        let short = probe.text_height("hello world", 100.0, &font);
        let long = probe.text_height(&"hello world ".repeat(20), 100.0, &font);
        assert!(long > short);
    }
}
