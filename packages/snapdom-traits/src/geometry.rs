/// An axis-aligned box in CSS pixels, relative to the document origin.
///
/// This is the resolved equivalent of `getBoundingClientRect()`: geometry
/// arrives on the document already measured, the capture engine never
/// performs layout itself.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const ZERO: Self = Rect {
        x: 0.0,
        y: 0.0,
        width: 0.0,
        height: 0.0,
    };

    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A rect positioned at the origin with the given size.
    pub fn from_size(width: f64, height: f64) -> Self {
        Self::new(0.0, 0.0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Whether all components are finite numbers. A non-finite rect means
    /// measurement failed upstream.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finite_and_empty() {
        assert!(Rect::ZERO.is_finite());
        assert!(Rect::ZERO.is_empty());
        assert!(!Rect::new(0.0, 0.0, f64::NAN, 10.0).is_finite());
        assert!(!Rect::from_size(100.0, 50.0).is_empty());
    }
}
