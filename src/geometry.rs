//! Geometry System - Physical Zones in Millimeters
//!
//! All zones are trim-relative: origin at the bottom-left corner of the
//! trimmed area, y pointing up. Every derivation here is a pure function.

use serde::{Deserialize, Serialize};

pub const MM_PER_INCH: f64 = 25.4;
pub const POINTS_PER_INCH: f64 = 72.0;

/// Containment and overlap tolerance in millimeters.
pub const EPSILON_MM: f64 = 1e-9;

/// Convert millimeters to PDF points.
///
/// 72 / 25.4 reduces to 360 / 127, which keeps the factor exact.
pub fn mm_to_pt(mm: f64) -> f64 {
    mm * 360.0 / 127.0
}

/// Convert PDF points back to millimeters.
pub fn pt_to_mm(pt: f64) -> f64 {
    pt * 127.0 / 360.0
}

/// Pixel count covering `mm` at `dpi`. Never rounds up, so assets are
/// generated at the requested density or below it, never above.
pub fn pixels_for(mm: f64, dpi: u32) -> u32 {
    let px = (mm / MM_PER_INCH * f64::from(dpi)).floor();
    if px <= 0.0 {
        0
    } else {
        px as u32
    }
}

/// Smallest pixel count that holds `dpi` across `mm`. Placed content is
/// sized with this so its effective density never drops below `dpi`.
pub fn pixels_at_least(mm: f64, dpi: u32) -> u32 {
    let px = (mm / MM_PER_INCH * f64::from(dpi)).ceil();
    if px <= 0.0 {
        0
    } else {
        px as u32
    }
}

/// Width/height pair in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Trim corner used to anchor excluded zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Corner {
    BottomLeft,
    BottomRight,
    TopLeft,
    TopRight,
}

/// Axis-aligned rectangle given by its lower-left and upper-right corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneRect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl ZoneRect {
    /// Rectangle spanning two corners, normalized so `x0 <= x1` and `y0 <= y1`.
    pub fn from_corners(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn from_origin_size(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::from_corners(x, y, x + width, y + height)
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn center_x(&self) -> f64 {
        (self.x0 + self.x1) / 2.0
    }

    pub fn is_finite(&self) -> bool {
        self.x0.is_finite() && self.y0.is_finite() && self.x1.is_finite() && self.y1.is_finite()
    }

    /// True when `other` lies fully inside `self` (shared edges allowed).
    pub fn contains(&self, other: &ZoneRect) -> bool {
        other.x0 >= self.x0 - EPSILON_MM
            && other.y0 >= self.y0 - EPSILON_MM
            && other.x1 <= self.x1 + EPSILON_MM
            && other.y1 <= self.y1 + EPSILON_MM
    }

    /// True when `other` lies inside `self` without touching any edge.
    pub fn strictly_contains(&self, other: &ZoneRect) -> bool {
        other.x0 > self.x0 + EPSILON_MM
            && other.y0 > self.y0 + EPSILON_MM
            && other.x1 < self.x1 - EPSILON_MM
            && other.y1 < self.y1 - EPSILON_MM
    }

    /// True when the intersection has positive area. Touching edges do not overlap.
    pub fn overlaps(&self, other: &ZoneRect) -> bool {
        let w = self.x1.min(other.x1) - self.x0.max(other.x0);
        let h = self.y1.min(other.y1) - self.y0.max(other.y0);
        w > EPSILON_MM && h > EPSILON_MM
    }

    /// Grow by `d` on all four sides.
    pub fn expand(&self, d: f64) -> ZoneRect {
        ZoneRect {
            x0: self.x0 - d,
            y0: self.y0 - d,
            x1: self.x1 + d,
            y1: self.y1 + d,
        }
    }

    /// Shrink by `d` on all four sides.
    pub fn inset(&self, d: f64) -> ZoneRect {
        self.expand(-d)
    }

    /// Largest rectangle with the given aspect ratio (width / height) centered in `self`.
    pub fn fit_aspect(&self, aspect: f64) -> ZoneRect {
        if !(aspect.is_finite() && aspect > 0.0) || self.height() <= 0.0 {
            return *self;
        }
        let own = self.width() / self.height();
        if own > aspect {
            let w = self.height() * aspect;
            let x0 = self.center_x() - w / 2.0;
            ZoneRect { x0, y0: self.y0, x1: x0 + w, y1: self.y1 }
        } else {
            let h = self.width() / aspect;
            let y0 = (self.y0 + self.y1) / 2.0 - h / 2.0;
            ZoneRect { x0: self.x0, y0, x1: self.x1, y1: y0 + h }
        }
    }
}

impl std::fmt::Display for ZoneRect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})-({}, {})", self.x0, self.y0, self.x1, self.y1)
    }
}

/// Trim rectangle: the origin-anchored cut size.
pub fn trim_rect(trim: Size) -> ZoneRect {
    ZoneRect::from_origin_size(0.0, 0.0, trim.width, trim.height)
}

/// Document size including bleed on all sides.
pub fn document_size(trim: Size, bleed: f64) -> Size {
    Size {
        width: trim.width + 2.0 * bleed,
        height: trim.height + 2.0 * bleed,
    }
}

/// Trim expanded by bleed, in trim-relative coordinates.
pub fn document_rect(trim: Size, bleed: f64) -> ZoneRect {
    trim_rect(trim).expand(bleed)
}

/// Trim inset by the safe margin.
pub fn safe_rect(trim: Size, safe_inset: f64) -> ZoneRect {
    trim_rect(trim).inset(safe_inset)
}

/// No-content rectangle of the given size flush against a trim corner.
pub fn excluded_rect(trim: Size, corner: Corner, width: f64, height: f64) -> ZoneRect {
    let (x, y) = match corner {
        Corner::BottomLeft => (0.0, 0.0),
        Corner::BottomRight => (trim.width - width, 0.0),
        Corner::TopLeft => (0.0, trim.height - height),
        Corner::TopRight => (trim.width - width, trim.height - height),
    };
    ZoneRect::from_origin_size(x, y, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_size_adds_bleed_twice() {
        let size = document_size(Size::new(1000.0, 2170.0), 5.0);
        assert_eq!(size, Size::new(1010.0, 2180.0));
    }

    #[test]
    fn test_safe_rect_insets_all_sides() {
        let safe = safe_rect(Size::new(1000.0, 2170.0), 50.0);
        assert_eq!(safe, ZoneRect::from_corners(50.0, 50.0, 950.0, 2120.0));
    }

    #[test]
    fn test_excluded_rect_anchors_to_corner() {
        let trim = Size::new(1000.0, 2170.0);
        assert_eq!(
            excluded_rect(trim, Corner::BottomLeft, 300.0, 800.0),
            ZoneRect::from_corners(0.0, 0.0, 300.0, 800.0)
        );
        assert_eq!(
            excluded_rect(trim, Corner::TopRight, 300.0, 800.0),
            ZoneRect::from_corners(700.0, 1370.0, 1000.0, 2170.0)
        );
    }

    #[test]
    fn test_touching_edges_do_not_overlap() {
        let a = ZoneRect::from_corners(0.0, 0.0, 300.0, 800.0);
        let b = ZoneRect::from_corners(300.0, 0.0, 400.0, 100.0);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&ZoneRect::from_corners(299.0, 799.0, 310.0, 810.0)));
    }

    #[test]
    fn test_mm_to_pt_exact_for_inch() {
        assert_eq!(mm_to_pt(25.4), 72.0);
        assert!((pt_to_mm(mm_to_pt(1010.0)) - 1010.0).abs() < 1e-9);
    }

    #[test]
    fn test_pixels_for_never_rounds_up() {
        assert_eq!(pixels_for(25.4, 300), 300);
        assert_eq!(pixels_for(1.0, 150), 5);
        assert_eq!(pixels_for(0.0, 300), 0);
    }

    #[test]
    fn test_pixels_at_least_holds_density() {
        assert_eq!(pixels_at_least(25.4, 300), 300);
        assert_eq!(pixels_at_least(1.0, 150), 6);
        assert_eq!(pixels_at_least(0.0, 300), 0);
        let mm = 130.0;
        assert!(f64::from(pixels_at_least(mm, 150)) / (mm / MM_PER_INCH) >= 150.0);
    }

    #[test]
    fn test_fit_aspect_stays_inside() {
        let outer = ZoneRect::from_corners(60.0, 60.0, 240.0, 120.0);
        let fitted = outer.fit_aspect(1.0);
        assert!(outer.contains(&fitted));
        assert!((fitted.width() - 60.0).abs() < 1e-9);
    }
}
